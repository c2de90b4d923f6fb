//! 端到端集成测试: 合成流的完整同步播放管线.
//!
//! 测试流程: 合成解封装器 -> 读取线程 -> 音频/视频解码线程 -> 帧队列
//! -> 模拟音频设备 (独立线程按缓冲区时长拉取) + 刷新循环 -> 记录呈现结果.
//!
//! 音频 100 帧 (每帧 20ms), 视频 50 帧 (每帧 40ms), 时间基 1/1000.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use avsync::core::demuxer::{AudioStreamParams, VideoStreamParams};
use avsync::core::{
    AudioFrame, ChannelLayout, Decoder, Demuxer, Frame, MediaBackend, MediaType, Packet,
    PixelFormat, Rational, SampleFormat, StreamInfo, StreamParams, SyncError, SyncResult,
    VideoFrame,
};
use avsync::engine::{
    AudioRenderer, AudioSink, AudioSpec, Player, PlayerEvent, SyncConfig, VideoSurface,
};

const TIME_BASE: Rational = Rational::new(1, 1000);
const SAMPLE_RATE: u32 = 48000;
const AUDIO_FRAMES: i64 = 100;
const VIDEO_FRAMES: i64 = 50;

/// 按时间戳交错产出音视频数据包
struct SyntheticDemuxer {
    streams: Vec<StreamInfo>,
    packets: VecDeque<Packet>,
}

impl SyntheticDemuxer {
    fn new() -> Self {
        let mut packets = Vec::new();
        for i in 0..AUDIO_FRAMES {
            packets.push(Packet::from_data(1, vec![0u8; 16]).with_pts(i * 20, TIME_BASE));
        }
        for i in 0..VIDEO_FRAMES {
            packets.push(Packet::from_data(0, vec![0u8; 64]).with_pts(i * 40, TIME_BASE));
        }
        packets.sort_by_key(|p| (p.pts, p.stream_index));

        Self {
            streams: vec![
                StreamInfo {
                    index: 0,
                    media_type: MediaType::Video,
                    codec_name: "synthetic".into(),
                    time_base: TIME_BASE,
                    params: StreamParams::Video(VideoStreamParams {
                        width: 4,
                        height: 4,
                        pixel_format: PixelFormat::Yuv420p,
                        frame_rate: Rational::new(25, 1),
                    }),
                },
                StreamInfo {
                    index: 1,
                    media_type: MediaType::Audio,
                    codec_name: "synthetic".into(),
                    time_base: TIME_BASE,
                    params: StreamParams::Audio(AudioStreamParams {
                        sample_rate: SAMPLE_RATE,
                        channel_layout: ChannelLayout::STEREO,
                        sample_format: SampleFormat::S16,
                    }),
                },
            ],
            packets: packets.into(),
        }
    }
}

impl Demuxer for SyntheticDemuxer {
    fn format_name(&self) -> &str {
        "synthetic"
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> SyncResult<Packet> {
        self.packets.pop_front().ok_or(SyncError::Eof)
    }
}

/// 每个数据包解码为一帧, 时间戳取自数据包
struct SyntheticDecoder {
    media_type: MediaType,
    pending: Option<Frame>,
}

impl Decoder for SyntheticDecoder {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn send_packet(&mut self, packet: &Packet) -> SyncResult<()> {
        if packet.is_flush() {
            return Ok(());
        }
        if self.pending.is_some() {
            return Err(SyncError::NeedMoreData);
        }
        let frame = match self.media_type {
            MediaType::Audio => {
                // 20ms @ 48kHz
                let nb_samples = SAMPLE_RATE / 50;
                let mut frame =
                    AudioFrame::new(nb_samples, SAMPLE_RATE, SampleFormat::S16, ChannelLayout::STEREO);
                frame.data[0] = vec![0u8; nb_samples as usize * 4];
                frame.pts = packet.pts;
                Frame::Audio(frame)
            }
            _ => {
                let mut frame = VideoFrame::new(4, 4, PixelFormat::Yuv420p);
                frame.data = vec![vec![16u8; 16], vec![128u8; 4], vec![128u8; 4]];
                frame.linesize = vec![4, 2, 2];
                frame.pts = packet.pts;
                Frame::Video(frame)
            }
        };
        self.pending = Some(frame);
        Ok(())
    }

    fn receive_frame(&mut self) -> SyncResult<Frame> {
        self.pending.take().ok_or(SyncError::NeedMoreData)
    }
}

struct SyntheticBackend;

impl MediaBackend for SyntheticBackend {
    fn open_input(&self, _source: &str) -> SyncResult<Box<dyn Demuxer>> {
        Ok(Box::new(SyntheticDemuxer::new()))
    }

    fn open_decoder(&self, stream: &StreamInfo) -> SyncResult<Box<dyn Decoder>> {
        Ok(Box::new(SyntheticDecoder {
            media_type: stream.media_type,
            pending: None,
        }))
    }
}

/// 模拟音频设备: 独立线程按缓冲区时长周期性调用回调
#[derive(Default)]
struct FakeAudioDevice {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioSink for FakeAudioDevice {
    fn open(&mut self, wanted: &AudioSpec, mut renderer: AudioRenderer) -> SyncResult<AudioSpec> {
        let size = u32::from(wanted.samples) * u32::from(wanted.channels) * 2;
        let obtained = AudioSpec { size, ..*wanted };
        let period = Duration::from_secs_f64(f64::from(wanted.samples) / f64::from(wanted.freq));

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        self.thread = Some(thread::spawn(move || {
            let mut buf = vec![0u8; size as usize];
            let mut deadline = Instant::now();
            while running.load(Ordering::SeqCst) {
                renderer.fill(&mut buf);
                deadline += period;
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                }
            }
        }));
        Ok(obtained)
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            handle.join().unwrap();
        }
    }
}

#[derive(Default)]
struct RecordingSurface {
    presented: Vec<i64>,
}

impl VideoSurface for RecordingSurface {
    fn present(&mut self, frame: &VideoFrame) -> SyncResult<()> {
        self.presented.push(frame.pts);
        Ok(())
    }
}

#[test]
fn test_video_clock_tracks_audio_clock() {
    let config = SyncConfig::default();
    let (mut player, events) = Player::open(
        "synthetic://av",
        config.clone(),
        Arc::new(SyntheticBackend),
        Box::new(FakeAudioDevice::default()),
    )
    .unwrap();
    let session = Arc::clone(player.session());

    let mut surface = RecordingSurface::default();
    let mut diffs = Vec::new();
    let started = Instant::now();
    while !player.is_drained() {
        assert!(started.elapsed() < Duration::from_secs(20), "播放超时");
        let wait = player.refresh(&mut surface).unwrap();
        assert!(session.pictq.size() <= config.video_queue_size);

        let (video, audio) = (session.vidclk.get(), session.audclk.get());
        // 跳过起播阶段, 只统计稳态
        if !video.is_nan() && !audio.is_nan() && video > 0.5 && video < 1.8 {
            diffs.push((video - audio).abs());
        }
        thread::sleep(wait);
    }

    let state = player.stop();
    assert_eq!(state, Some(avsync::engine::ReaderState::Eof));

    assert!(!diffs.is_empty());
    let within = diffs
        .iter()
        .filter(|&&d| d < config.sync_threshold_max)
        .count();
    assert!(
        within * 10 >= diffs.len() * 9,
        "稳态同步率过低: {within}/{}",
        diffs.len()
    );
    let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
    assert!(mean < config.sync_threshold_max, "平均时钟差 {mean:.3}s");

    // 不丢帧: 每一帧至少呈现一次, 且按显示顺序
    let distinct: BTreeSet<i64> = surface.presented.iter().copied().collect();
    assert_eq!(distinct.len(), VIDEO_FRAMES as usize);
    assert!(surface.presented.windows(2).all(|w| w[0] <= w[1]));

    let events: Vec<PlayerEvent> = events.try_iter().collect();
    assert!(events.contains(&PlayerEvent::VideoSize {
        width: 4,
        height: 4
    }));
    assert!(events.contains(&PlayerEvent::ReaderEof));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, PlayerEvent::Quit { .. }))
    );
}

#[test]
fn test_two_sessions_play_concurrently() {
    let open = || {
        Player::open(
            "synthetic://av",
            SyncConfig::default(),
            Arc::new(SyntheticBackend),
            Box::new(FakeAudioDevice::default()),
        )
        .unwrap()
    };
    let (mut first, _first_events) = open();
    let (mut second, _second_events) = open();

    let mut surfaces = (RecordingSurface::default(), RecordingSurface::default());
    let started = Instant::now();
    while started.elapsed() < Duration::from_millis(500) {
        first.refresh(&mut surfaces.0).unwrap();
        second.refresh(&mut surfaces.1).unwrap();
        thread::sleep(Duration::from_millis(10));
    }

    // 两个会话互不干扰, 各自独立推进
    assert!(!surfaces.0.presented.is_empty());
    assert!(!surfaces.1.presented.is_empty());
    assert!(first.session().audclk.is_set());
    assert!(second.session().audclk.is_set());

    // 读取线程可能尚未读完输入, 此时以中止结束
    assert!(first.stop().is_some());
    assert!(second.stop().is_some());
}
