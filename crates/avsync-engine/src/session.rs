//! 播放会话状态.
//!
//! 一个 [`StreamSession`] 持有一次播放的全部共享状态, 由读取线程, 解码线程,
//! 音频回调与刷新循环通过 `Arc` 共同引用. 不存在进程级全局状态,
//! 同一进程内可以并存多个会话.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use avsync_core::{AudioFrame, ChannelLayout, SampleFormat, SyncError, SyncResult, VideoFrame};
use log::{debug, error, info};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::frame_queue::FrameQueue;
use crate::output::AudioSpec;
use crate::packet_queue::PacketQueue;

/// 协商后的音频输出参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    /// 采样率 (Hz)
    pub freq: u32,
    /// 声道数
    pub channels: u32,
    /// 声道布局
    pub channel_layout: ChannelLayout,
    /// 采样格式, 固定为 S16 交错
    pub fmt: SampleFormat,
    /// 每个采样点 (全部声道) 的字节数
    pub frame_size: usize,
    /// 每秒字节数
    pub bytes_per_sec: usize,
}

impl AudioParams {
    /// 由设备实际规格推导输出参数
    pub fn from_spec(spec: &AudioSpec) -> SyncResult<Self> {
        let fmt = SampleFormat::S16;
        let channels = u32::from(spec.channels);
        let frame_size = fmt.buffer_size(channels, 1);
        let bytes_per_sec = fmt.buffer_size(channels, spec.freq);
        if frame_size == 0 || bytes_per_sec == 0 {
            return Err(SyncError::Device(format!(
                "无效的音频输出参数: {}Hz, {}ch",
                spec.freq, spec.channels
            )));
        }
        Ok(Self {
            freq: spec.freq,
            channels,
            channel_layout: ChannelLayout::from_channels(channels),
            fmt,
            frame_size,
            bytes_per_sec,
        })
    }
}

/// 会话向宿主 (UI 层) 发出的事件
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// 视频解码器已打开, 可按该尺寸调整窗口
    VideoSize { width: u32, height: u32 },
    /// 音频设备已打开
    AudioOpened(AudioParams),
    /// 读取线程已读到输入末尾
    ReaderEof,
    /// 发生致命错误, 宿主应退出
    Quit { reason: String },
}

/// 播放会话
pub struct StreamSession {
    source: String,
    config: SyncConfig,
    /// 音频数据包队列
    pub audioq: PacketQueue,
    /// 视频数据包队列
    pub videoq: PacketQueue,
    /// 音频帧队列 (已转换为输出格式)
    pub sampq: FrameQueue<AudioFrame>,
    /// 视频帧队列 (keep_last)
    pub pictq: FrameQueue<VideoFrame>,
    /// 音频时钟 (主时钟), 只由音频回调写
    pub audclk: Clock,
    /// 视频时钟, 只由刷新循环写
    pub vidclk: Clock,
    eof: AtomicBool,
    abort: AtomicBool,
    audio_tgt: OnceLock<AudioParams>,
    audio_hw_buf_size: AtomicUsize,
    max_frame_duration: OnceLock<f64>,
    audio_finished: AtomicBool,
    video_finished: AtomicBool,
    audio_stream: OnceLock<usize>,
    video_stream: OnceLock<usize>,
    events: Sender<PlayerEvent>,
}

impl StreamSession {
    /// 创建会话, 同时返回事件接收端
    pub fn new(source: impl Into<String>, config: SyncConfig) -> (Arc<Self>, Receiver<PlayerEvent>) {
        let (events, receiver) = mpsc::channel();
        let session = Self {
            source: source.into(),
            audioq: PacketQueue::new(),
            videoq: PacketQueue::new(),
            sampq: FrameQueue::new(config.audio_queue_size, true),
            pictq: FrameQueue::new(config.video_queue_size, true),
            audclk: Clock::new(),
            vidclk: Clock::new(),
            eof: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            audio_tgt: OnceLock::new(),
            audio_hw_buf_size: AtomicUsize::new(0),
            max_frame_duration: OnceLock::new(),
            audio_finished: AtomicBool::new(false),
            video_finished: AtomicBool::new(false),
            audio_stream: OnceLock::new(),
            video_stream: OnceLock::new(),
            events,
            config,
        };
        (Arc::new(session), receiver)
    }

    /// 输入源路径
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 标记输入末尾, 两个数据包队列的等待者随之返回 "无更多数据"
    pub fn set_eof(&self) {
        self.eof.store(true, Ordering::Release);
        self.audioq.set_eof();
        self.videoq.set_eof();
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    /// 中止会话: 所有队列的等待者被唤醒, 各线程在下一个检查点退出
    pub fn abort(&self) {
        if self.abort.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("会话中止: {}", self.source);
        self.audioq.abort();
        self.videoq.abort();
        self.sampq.abort();
        self.pictq.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// 致命错误: 记录日志, 中止会话并通知宿主退出
    pub fn request_quit(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("{}: {reason}", self.source);
        self.abort();
        self.notify(PlayerEvent::Quit { reason });
    }

    /// 发送事件, 宿主已不再接收时忽略
    pub fn notify(&self, event: PlayerEvent) {
        self.events.send(event).ok();
    }

    /// 记录协商后的音频输出参数, 只能设置一次
    pub fn set_audio_target(&self, params: AudioParams, hw_buf_size: usize) -> SyncResult<()> {
        self.audio_hw_buf_size.store(hw_buf_size, Ordering::Release);
        self.audio_tgt
            .set(params)
            .map_err(|_| SyncError::Internal("音频输出参数已设置".into()))?;
        info!(
            "音频输出: {}Hz, {}ch, {}, 设备缓冲 {} 字节",
            params.freq, params.channels, params.fmt, hw_buf_size
        );
        self.notify(PlayerEvent::AudioOpened(params));
        Ok(())
    }

    /// 音频输出参数 (设备打开前为 None)
    pub fn audio_target(&self) -> Option<&AudioParams> {
        self.audio_tgt.get()
    }

    /// 设备硬件缓冲区字节数
    pub fn audio_hw_buf_size(&self) -> usize {
        self.audio_hw_buf_size.load(Ordering::Acquire)
    }

    pub fn set_max_frame_duration(&self, value: f64) {
        self.max_frame_duration.set(value).ok();
    }

    /// 最大可信帧间隔 (秒), 探测前取配置默认值
    pub fn max_frame_duration(&self) -> f64 {
        self.max_frame_duration
            .get()
            .copied()
            .unwrap_or(self.config.max_frame_duration)
    }

    pub fn set_stream_indices(&self, audio: usize, video: usize) {
        self.audio_stream.set(audio).ok();
        self.video_stream.set(video).ok();
    }

    pub fn audio_stream(&self) -> Option<usize> {
        self.audio_stream.get().copied()
    }

    pub fn video_stream(&self) -> Option<usize> {
        self.video_stream.get().copied()
    }

    /// 音频解码结束: 关闭音频帧队列, 回调取完剩余帧后输出静音
    pub fn mark_audio_finished(&self) {
        self.audio_finished.store(true, Ordering::Release);
        self.sampq.close();
    }

    /// 视频解码结束
    pub fn mark_video_finished(&self) {
        self.video_finished.store(true, Ordering::Release);
        self.pictq.close();
    }

    pub fn is_audio_finished(&self) -> bool {
        self.audio_finished.load(Ordering::Acquire)
    }

    pub fn is_video_finished(&self) -> bool {
        self.video_finished.load(Ordering::Acquire)
    }

    /// 两个解码线程都已结束, 且帧队列中没有待播放的帧
    pub fn is_drained(&self) -> bool {
        self.is_audio_finished()
            && self.is_video_finished()
            && self.sampq.nb_remaining() == 0
            && self.pictq.nb_remaining() == 0
    }

    /// 主时钟 (音频) 当前位置
    pub fn master_clock(&self) -> f64 {
        self.audclk.get()
    }
}
