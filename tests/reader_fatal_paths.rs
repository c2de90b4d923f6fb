//! 读取线程致命错误路径测试.
//!
//! 打开输入失败, 缺少音频或视频流, 解码器打开失败都应通知宿主退出,
//! 并让读取线程以 `Failed` 终态结束.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use avsync::core::demuxer::{AudioStreamParams, VideoStreamParams};
use avsync::core::{
    ChannelLayout, Decoder, Demuxer, MediaBackend, MediaType, Packet, PixelFormat, Rational,
    SampleFormat, StreamInfo, StreamParams, SyncError, SyncResult,
};
use avsync::engine::{
    AudioRenderer, AudioSink, AudioSpec, Player, PlayerEvent, ReaderState, SyncConfig,
};

struct StaticDemuxer {
    streams: Vec<StreamInfo>,
}

impl Demuxer for StaticDemuxer {
    fn format_name(&self) -> &str {
        "static"
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> SyncResult<Packet> {
        Err(SyncError::Eof)
    }
}

/// 可配置故障的后端
struct FaultyBackend {
    open_fails: bool,
    kinds: Vec<MediaType>,
    decoder_fails: bool,
}

impl MediaBackend for FaultyBackend {
    fn open_input(&self, source: &str) -> SyncResult<Box<dyn Demuxer>> {
        if self.open_fails {
            return Err(SyncError::Format(format!("无法识别的容器: {source}")));
        }
        let streams = self
            .kinds
            .iter()
            .enumerate()
            .map(|(index, kind)| StreamInfo {
                index,
                media_type: *kind,
                codec_name: "raw".into(),
                time_base: Rational::new(1, 1000),
                params: match kind {
                    MediaType::Video => StreamParams::Video(VideoStreamParams {
                        width: 320,
                        height: 240,
                        pixel_format: PixelFormat::Yuv420p,
                        frame_rate: Rational::new(25, 1),
                    }),
                    _ => StreamParams::Audio(AudioStreamParams {
                        sample_rate: 44100,
                        channel_layout: ChannelLayout::STEREO,
                        sample_format: SampleFormat::S16,
                    }),
                },
            })
            .collect();
        Ok(Box::new(StaticDemuxer { streams }))
    }

    fn open_decoder(&self, stream: &StreamInfo) -> SyncResult<Box<dyn Decoder>> {
        if self.decoder_fails {
            return Err(SyncError::Unsupported(format!(
                "编解码器 {}",
                stream.codec_name
            )));
        }
        Err(SyncError::Internal("不应创建解码器".into()))
    }
}

struct NullSink;

impl AudioSink for NullSink {
    fn open(&mut self, wanted: &AudioSpec, _renderer: AudioRenderer) -> SyncResult<AudioSpec> {
        Ok(*wanted)
    }
}

fn play(backend: FaultyBackend) -> (Option<ReaderState>, Vec<PlayerEvent>) {
    let (player, events) = Player::open(
        "broken.bin",
        SyncConfig::default(),
        Arc::new(backend),
        Box::new(NullSink),
    )
    .unwrap();
    let events = collect_until_quit(&events);
    (player.stop(), events)
}

fn collect_until_quit(events: &Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.recv_timeout(Duration::from_secs(5)) {
        let quit = matches!(event, PlayerEvent::Quit { .. });
        collected.push(event);
        if quit {
            break;
        }
    }
    collected
}

fn quit_reason(events: &[PlayerEvent]) -> &str {
    events
        .iter()
        .find_map(|e| match e {
            PlayerEvent::Quit { reason } => Some(reason.as_str()),
            _ => None,
        })
        .expect("应收到退出事件")
}

#[test]
fn test_open_failure_quits() {
    let (state, events) = play(FaultyBackend {
        open_fails: true,
        kinds: Vec::new(),
        decoder_fails: false,
    });
    assert_eq!(state, Some(ReaderState::Failed));
    assert!(quit_reason(&events).contains("broken.bin"));
}

#[test]
fn test_missing_video_stream_quits() {
    let (state, events) = play(FaultyBackend {
        open_fails: false,
        kinds: vec![MediaType::Audio],
        decoder_fails: false,
    });
    assert_eq!(state, Some(ReaderState::Failed));
    assert!(quit_reason(&events).contains("未找到视频流"));
}

#[test]
fn test_missing_audio_stream_quits() {
    let (state, events) = play(FaultyBackend {
        open_fails: false,
        kinds: vec![MediaType::Video, MediaType::Subtitle],
        decoder_fails: false,
    });
    assert_eq!(state, Some(ReaderState::Failed));
    assert!(quit_reason(&events).contains("未找到音频流"));
}

#[test]
fn test_decoder_open_failure_quits() {
    let (state, events) = play(FaultyBackend {
        open_fails: false,
        kinds: vec![MediaType::Video, MediaType::Audio],
        decoder_fails: true,
    });
    assert_eq!(state, Some(ReaderState::Failed));
    let reason = quit_reason(&events);
    assert!(reason.contains("解码器"), "{reason}");
    // 失败发生在打开解码器阶段, 不会上报窗口尺寸
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, PlayerEvent::VideoSize { .. }))
    );
}
