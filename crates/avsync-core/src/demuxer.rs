//! 解封装器与媒体后端接口.
//!
//! 同步引擎只通过这里的窄接口使用外部的解封装/解码库:
//! 后端负责打开输入与创建解码器, 解封装器负责产出数据包.

use crate::channel_layout::ChannelLayout;
use crate::decoder::Decoder;
use crate::error::SyncResult;
use crate::media_type::MediaType;
use crate::packet::Packet;
use crate::pixel_format::PixelFormat;
use crate::rational::Rational;
use crate::sample_format::SampleFormat;

/// 流信息
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// 流索引 (在容器中的位置, 从 0 开始)
    pub index: usize,
    /// 媒体类型
    pub media_type: MediaType,
    /// 编解码器名称
    pub codec_name: String,
    /// 时间基
    pub time_base: Rational,
    /// 流特定参数
    pub params: StreamParams,
}

/// 流特定参数
#[derive(Debug, Clone)]
pub enum StreamParams {
    /// 视频流参数
    Video(VideoStreamParams),
    /// 音频流参数
    Audio(AudioStreamParams),
    /// 其他
    Other,
}

/// 视频流参数
#[derive(Debug, Clone)]
pub struct VideoStreamParams {
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 像素格式
    pub pixel_format: PixelFormat,
    /// 推测帧率 (对标 `av_guess_frame_rate`), 未知时分子为 0
    pub frame_rate: Rational,
}

/// 音频流参数
#[derive(Debug, Clone)]
pub struct AudioStreamParams {
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道布局
    pub channel_layout: ChannelLayout,
    /// 采样格式
    pub sample_format: SampleFormat,
}

impl StreamInfo {
    /// 音频参数 (非音频流返回 None)
    pub fn audio(&self) -> Option<&AudioStreamParams> {
        match &self.params {
            StreamParams::Audio(a) => Some(a),
            _ => None,
        }
    }

    /// 视频参数 (非视频流返回 None)
    pub fn video(&self) -> Option<&VideoStreamParams> {
        match &self.params {
            StreamParams::Video(v) => Some(v),
            _ => None,
        }
    }
}

/// 解封装器 trait
///
/// 从容器中按顺序读取压缩数据包.
pub trait Demuxer: Send {
    /// 容器格式名称
    fn format_name(&self) -> &str;

    /// 所有流信息 (探测阶段结果)
    fn streams(&self) -> &[StreamInfo];

    /// 查找指定类型的最佳流
    ///
    /// 默认选择该类型的第一条流.
    fn find_best_stream(&self, kind: MediaType) -> Option<usize> {
        self.streams()
            .iter()
            .find(|s| s.media_type == kind)
            .map(|s| s.index)
    }

    /// 读取下一个数据包
    ///
    /// # 返回
    /// - `Ok(packet)`: 成功读取
    /// - `Err(SyncError::Again)`: 暂时无数据, 原地重试
    /// - `Err(SyncError::Eof)`: 已到达末尾
    /// - 其他错误: 致命
    fn read_packet(&mut self) -> SyncResult<Packet>;

    /// 容器时间戳是否可能不连续 (如 MPEG-TS)
    fn has_ts_discontinuities(&self) -> bool {
        false
    }
}

/// 媒体后端: 打开输入与创建解码器
pub trait MediaBackend: Send + Sync {
    /// 打开输入源并完成流探测
    fn open_input(&self, source: &str) -> SyncResult<Box<dyn Demuxer>>;

    /// 为指定流创建并打开解码器
    fn open_decoder(&self, stream: &StreamInfo) -> SyncResult<Box<dyn Decoder>>;
}
