//! 音频/视频解码线程.
//!
//! 两种线程共用 [`decoder_loop`]: 从数据包队列取包, 送入解码器, 取出全部解码帧.
//! 数据包队列到达末尾后刷新解码器, 取完缓存帧再退出并关闭对应的帧队列.
//!
//! 音频线程在开始解码前协商并打开音频设备, 解码帧经 [`AudioConverter`]
//! 转换为输出格式后写入音频帧队列.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use avsync_core::demuxer::AudioStreamParams;
use avsync_core::{
    AudioFrame, Decoder, Frame, MediaType, NOPTS_VALUE, Packet, Rational, SampleFormat,
    StreamInfo, SyncError, SyncResult, Timestamp,
};
use avsync_resample::{ResampleContext, output_capacity};
use log::{debug, info, warn};

use crate::audio::AudioRenderer;
use crate::frame_queue::QueuedFrame;
use crate::output::{AudioSink, AudioSpec};
use crate::packet_queue::{PacketGet, PacketQueue};
use crate::session::{AudioParams, StreamSession};

/// 共享的音频设备句柄
pub type SharedAudioSink = Arc<Mutex<Box<dyn AudioSink>>>;

/// 把流时间基下的时间戳换算为秒, 未知时间戳返回 NaN
pub fn pts_seconds(pts: i64, time_base: Rational) -> f64 {
    if pts == NOPTS_VALUE {
        return f64::NAN;
    }
    Timestamp::new(pts, time_base).to_seconds()
}

/// 音频格式转换器
///
/// 解码帧与输出参数一致且从未需要重采样时直接透传; 首次遇到不一致的帧时
/// 创建重采样上下文, 之后所有帧都经过重采样. 源参数再次变化时重建上下文.
pub struct AudioConverter {
    resampler: Option<ResampleContext>,
    headroom: u32,
}

impl AudioConverter {
    pub fn new(headroom: u32) -> Self {
        Self {
            resampler: None,
            headroom,
        }
    }

    /// 是否已启用重采样
    pub fn is_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    /// 当前重采样上下文 (未启用时为 None)
    pub fn resampler(&self) -> Option<&ResampleContext> {
        self.resampler.as_ref()
    }

    /// 将解码帧转换为输出格式 (S16 交错)
    pub fn convert(&mut self, frame: AudioFrame, tgt: &AudioParams) -> SyncResult<AudioFrame> {
        let matches_target = frame.sample_format == tgt.fmt
            && frame.channel_layout.channels == tgt.channels
            && frame.sample_rate == tgt.freq;
        if self.resampler.is_none() && matches_target {
            return Ok(frame);
        }

        let mut ctx = match self.resampler.take() {
            Some(ctx)
                if ctx.matches_source(
                    frame.sample_format,
                    frame.channel_layout,
                    frame.sample_rate,
                ) =>
            {
                ctx
            }
            previous => {
                if previous.is_some() {
                    info!(
                        "音频源参数变化, 重建重采样上下文: {}Hz/{}/{}",
                        frame.sample_rate, frame.channel_layout, frame.sample_format
                    );
                }
                ResampleContext::new(
                    tgt.channel_layout,
                    tgt.fmt,
                    tgt.freq,
                    frame.channel_layout,
                    frame.sample_format,
                    frame.sample_rate,
                )?
            }
        };

        let capacity = output_capacity(frame.nb_samples, frame.sample_rate, tgt.freq, self.headroom);
        let converted = ctx.convert_frame(&frame, capacity);
        self.resampler = Some(ctx);
        let (nb_samples, data) = converted?;

        let mut out = AudioFrame::new(nb_samples, tgt.freq, tgt.fmt, tgt.channel_layout);
        out.data = vec![data];
        out.pts = frame.pts;
        Ok(out)
    }
}

/// 按流参数协商并打开音频设备
///
/// 期望规格: 流的采样率与声道数, S16, `audio_buffer_samples` 个采样.
/// 设备实际规格决定输出参数, 记录到会话中.
pub fn audio_open(
    session: &Arc<StreamSession>,
    sink: &SharedAudioSink,
    params: &AudioStreamParams,
) -> SyncResult<AudioParams> {
    let channels = params.channel_layout.channels;
    if params.sample_rate == 0 || channels == 0 {
        return Err(SyncError::Device(format!(
            "无效的采样率或声道数: {}Hz, {}ch",
            params.sample_rate, channels
        )));
    }
    let wanted = AudioSpec {
        freq: params.sample_rate,
        channels: u16::try_from(channels)
            .map_err(|_| SyncError::Device(format!("声道数过多: {channels}")))?,
        format: SampleFormat::S16,
        samples: session.config().audio_buffer_samples,
        size: 0,
    };

    let renderer = AudioRenderer::new(Arc::clone(session));
    let obtained = sink
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .open(&wanted, renderer)?;
    if obtained.freq != wanted.freq || obtained.channels != wanted.channels {
        debug!(
            "音频设备参数与期望不同: {}Hz/{}ch -> {}Hz/{}ch",
            wanted.freq, wanted.channels, obtained.freq, obtained.channels
        );
    }

    let tgt = AudioParams::from_spec(&obtained)?;
    session.set_audio_target(tgt, obtained.size as usize)?;
    Ok(tgt)
}

/// 启动音频解码线程
pub fn spawn_audio_decoder(
    session: Arc<StreamSession>,
    mut decoder: Box<dyn Decoder>,
    stream: StreamInfo,
    sink: SharedAudioSink,
) -> SyncResult<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("audio_decoder".into())
        .spawn(move || {
            let result = run_audio(&session, decoder.as_mut(), &stream, &sink);
            finish_worker(&session, MediaType::Audio, result);
        })?;
    Ok(handle)
}

/// 启动视频解码线程
pub fn spawn_video_decoder(
    session: Arc<StreamSession>,
    mut decoder: Box<dyn Decoder>,
    stream: StreamInfo,
) -> SyncResult<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("video_decoder".into())
        .spawn(move || {
            let result = run_video(&session, decoder.as_mut(), &stream);
            finish_worker(&session, MediaType::Video, result);
        })?;
    Ok(handle)
}

fn run_audio(
    session: &Arc<StreamSession>,
    decoder: &mut dyn Decoder,
    stream: &StreamInfo,
    sink: &SharedAudioSink,
) -> SyncResult<()> {
    let params = stream
        .audio()
        .ok_or_else(|| SyncError::InvalidArgument(format!("流 {} 不是音频流", stream.index)))?;
    let tgt = audio_open(session, sink, params)?;
    let time_base = stream.time_base;
    let mut converter = AudioConverter::new(session.config().resample_headroom);

    decoder_loop(session, &session.audioq, decoder, |frame| {
        let Frame::Audio(frame) = frame else {
            warn!("音频解码器输出了非音频帧, 已忽略");
            return Ok(true);
        };
        let pts = pts_seconds(frame.pts, time_base);
        let duration = frame.duration_secs();
        let frame = converter.convert(frame, &tgt)?;
        Ok(session.sampq.push(QueuedFrame::new(frame, pts, duration)))
    })
}

fn run_video(
    session: &StreamSession,
    decoder: &mut dyn Decoder,
    stream: &StreamInfo,
) -> SyncResult<()> {
    let duration = stream
        .video()
        .map_or(0.0, |v| v.frame_rate.frame_duration());
    let time_base = stream.time_base;

    decoder_loop(session, &session.videoq, decoder, |frame| {
        let Frame::Video(frame) = frame else {
            warn!("视频解码器输出了非视频帧, 已忽略");
            return Ok(true);
        };
        let pts = pts_seconds(frame.pts, time_base);
        Ok(session.pictq.push(QueuedFrame::new(frame, pts, duration)))
    })
}

fn finish_worker(session: &StreamSession, kind: MediaType, result: SyncResult<()>) {
    match result {
        Ok(()) => info!("{kind}解码线程结束"),
        Err(SyncError::Aborted) => debug!("{kind}解码线程中止"),
        Err(e) => session.request_quit(format!("{kind}解码失败: {e}")),
    }
    match kind {
        MediaType::Audio => session.mark_audio_finished(),
        _ => session.mark_video_finished(),
    }
}

/// 解码主循环
///
/// `on_frame` 返回 false 表示帧队列已中止. 数据包队列到达末尾时返回 `Ok(())`,
/// 会话中止时返回 [`SyncError::Aborted`].
pub fn decoder_loop<F>(
    session: &StreamSession,
    queue: &PacketQueue,
    decoder: &mut dyn Decoder,
    mut on_frame: F,
) -> SyncResult<()>
where
    F: FnMut(Frame) -> SyncResult<bool>,
{
    loop {
        if session.is_aborted() {
            return Err(SyncError::Aborted);
        }
        let packet = match queue.get(true) {
            PacketGet::Packet(packet) => packet,
            PacketGet::NoMoreData => return flush_decoder(decoder, &mut on_frame),
            PacketGet::Aborted => return Err(SyncError::Aborted),
            PacketGet::Empty => continue,
        };
        send_packet(decoder, &packet, &mut on_frame)?;
        drain_frames(decoder, &mut on_frame)?;
    }
}

/// 送包; 解码器要求先取帧时, 取完后原地重试一次
fn send_packet<F>(decoder: &mut dyn Decoder, packet: &Packet, on_frame: &mut F) -> SyncResult<()>
where
    F: FnMut(Frame) -> SyncResult<bool>,
{
    match decoder.send_packet(packet) {
        Err(SyncError::NeedMoreData | SyncError::Again) => {
            drain_frames(decoder, on_frame)?;
            match decoder.send_packet(packet) {
                Err(SyncError::NeedMoreData | SyncError::Again) => {
                    warn!("{}: 解码器拒绝数据包, 已丢弃", decoder.name());
                    Ok(())
                }
                other => other,
            }
        }
        other => other,
    }
}

fn drain_frames<F>(decoder: &mut dyn Decoder, on_frame: &mut F) -> SyncResult<()>
where
    F: FnMut(Frame) -> SyncResult<bool>,
{
    loop {
        match decoder.receive_frame() {
            Ok(frame) => {
                if !on_frame(frame)? {
                    return Err(SyncError::Aborted);
                }
            }
            Err(SyncError::NeedMoreData | SyncError::Again | SyncError::Eof) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

fn flush_decoder<F>(decoder: &mut dyn Decoder, on_frame: &mut F) -> SyncResult<()>
where
    F: FnMut(Frame) -> SyncResult<bool>,
{
    debug!("{}: 刷新解码器", decoder.name());
    match decoder.send_packet(&Packet::flush()) {
        Ok(()) | Err(SyncError::Eof | SyncError::NeedMoreData | SyncError::Again) => {}
        Err(e) => return Err(e),
    }
    drain_frames(decoder, on_frame)
}
