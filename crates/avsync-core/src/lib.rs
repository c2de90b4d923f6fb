//! # avsync-core
//!
//! avsync 核心库, 提供基础类型定义、错误处理以及外部协作者接口.
//!
//! - 基础类型: 时间基, 时间戳, 采样/像素格式, 声道布局
//! - 数据单元: 压缩数据包 [`Packet`] 与解码帧 [`Frame`]
//! - 协作者接口: [`Demuxer`], [`Decoder`], [`MediaBackend`]

pub mod channel_layout;
pub mod decoder;
pub mod demuxer;
pub mod error;
pub mod frame;
pub mod media_type;
pub mod packet;
pub mod pixel_format;
pub mod rational;
pub mod sample_format;
pub mod timestamp;

// 重导出常用类型
pub use channel_layout::ChannelLayout;
pub use decoder::Decoder;
pub use demuxer::{Demuxer, MediaBackend, StreamInfo, StreamParams};
pub use error::{SyncError, SyncResult};
pub use frame::{AudioFrame, Frame, VideoFrame};
pub use media_type::MediaType;
pub use packet::Packet;
pub use pixel_format::PixelFormat;
pub use rational::Rational;
pub use sample_format::SampleFormat;
pub use timestamp::{NOPTS_VALUE, Timestamp};
