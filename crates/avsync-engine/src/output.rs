//! 物理输出接口: 音频设备与视频呈现表面.

use avsync_core::{SampleFormat, SyncResult, VideoFrame};

use crate::audio::AudioRenderer;

/// 音频设备规格, 对标 `SDL_AudioSpec`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    /// 采样率 (Hz)
    pub freq: u32,
    /// 声道数
    pub channels: u16,
    /// 采样格式 (交错)
    pub format: SampleFormat,
    /// 设备缓冲区采样数 (每声道)
    pub samples: u16,
    /// 设备缓冲区字节数, 由设备在打开时给出
    pub size: u32,
}

/// 拉取式音频输出设备
///
/// `open` 成功后, 设备在自己的线程上周期性调用 [`AudioRenderer::fill`].
/// 回调中除读取非空队列外不得长时间阻塞.
pub trait AudioSink: Send {
    /// 按期望规格打开设备并开始播放, 返回设备实际采用的规格
    fn open(&mut self, wanted: &AudioSpec, renderer: AudioRenderer) -> SyncResult<AudioSpec>;

    /// 关闭设备
    fn close(&mut self) {}
}

/// 视频呈现表面
pub trait VideoSurface {
    /// 显示一帧
    fn present(&mut self, frame: &VideoFrame) -> SyncResult<()>;
}
