//! 压缩数据包 (Packet).
//!
//! 对标 FFmpeg 的 `AVPacket`. 数据包的所有权只转移一次:
//! 解封装器 → 包队列节点 → 解码线程, 被解码或被丢弃, 不会两者兼有.

use bytes::Bytes;

use crate::rational::Rational;
use crate::timestamp::NOPTS_VALUE;

/// 压缩数据包
#[derive(Debug, Clone)]
pub struct Packet {
    /// 压缩数据
    pub data: Bytes,
    /// 显示时间戳 (以 time_base 为单位)
    pub pts: i64,
    /// 解码时间戳 (以 time_base 为单位)
    pub dts: i64,
    /// 数据包时长 (以 time_base 为单位)
    pub duration: i64,
    /// 时间基
    pub time_base: Rational,
    /// 所属流的索引
    pub stream_index: usize,
    /// 是否为关键帧
    pub is_keyframe: bool,
}

impl Packet {
    /// 创建空数据包
    ///
    /// 空包送入解码器表示刷新 (flush), 用于取出解码器中缓存的帧.
    pub fn flush() -> Self {
        Self {
            data: Bytes::new(),
            pts: NOPTS_VALUE,
            dts: NOPTS_VALUE,
            duration: 0,
            time_base: Rational::UNDEFINED,
            stream_index: 0,
            is_keyframe: false,
        }
    }

    /// 从数据创建数据包
    pub fn from_data(stream_index: usize, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            stream_index,
            ..Self::flush()
        }
    }

    /// 设置显示时间戳与时间基
    pub fn with_pts(mut self, pts: i64, time_base: Rational) -> Self {
        self.pts = pts;
        self.dts = pts;
        self.time_base = time_base;
        self
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为空包 (flush packet)
    pub fn is_flush(&self) -> bool {
        self.data.is_empty()
    }
}
