//! 同步引擎配置.
//!
//! 队列容量, 准入阈值与同步阈值都是调优常量, 可通过 JSON 文件覆盖.

use std::path::Path;

use avsync_core::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// 帧队列容量上限
pub const FRAME_QUEUE_SIZE: usize = 16;

/// 同步引擎配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SyncConfig {
    /// 任一数据包队列达到该包数时, 读取线程暂停读取
    #[serde(default = "default_packet_queue_ceiling")]
    pub packet_queue_ceiling: usize,
    /// 读取线程背压休眠时长 (毫秒)
    #[serde(default = "default_backpressure_sleep_ms")]
    pub backpressure_sleep_ms: u64,
    /// 视频帧队列容量
    #[serde(default = "default_video_queue_size")]
    pub video_queue_size: usize,
    /// 音频帧队列容量
    #[serde(default = "default_audio_queue_size")]
    pub audio_queue_size: usize,
    /// 刷新循环默认 tick 间隔 (秒)
    #[serde(default = "default_refresh_rate")]
    pub refresh_rate: f64,
    /// 同步阈值下限 (秒)
    #[serde(default = "default_sync_threshold_min")]
    pub sync_threshold_min: f64,
    /// 同步阈值上限 (秒), 也用于刷新时刻的重新校准
    #[serde(default = "default_sync_threshold_max")]
    pub sync_threshold_max: f64,
    /// 视频超前超过该值时, 一次性补偿全部差值 (秒)
    #[serde(default = "default_framedup_threshold")]
    pub framedup_threshold: f64,
    /// 重采样输出缓冲区额外余量 (每声道采样数)
    #[serde(default = "default_resample_headroom")]
    pub resample_headroom: u32,
    /// 音频设备缓冲区采样数 (每声道)
    #[serde(default = "default_audio_buffer_samples")]
    pub audio_buffer_samples: u16,
    /// 时间戳可能不连续的容器的最大帧间隔 (秒)
    #[serde(default = "default_max_frame_duration_discont")]
    pub max_frame_duration_discont: f64,
    /// 其他容器的最大帧间隔 (秒)
    #[serde(default = "default_max_frame_duration")]
    pub max_frame_duration: f64,
}

fn default_packet_queue_ceiling() -> usize {
    32
}

fn default_backpressure_sleep_ms() -> u64 {
    10
}

fn default_video_queue_size() -> usize {
    3
}

fn default_audio_queue_size() -> usize {
    9
}

fn default_refresh_rate() -> f64 {
    0.01
}

fn default_sync_threshold_min() -> f64 {
    0.04
}

fn default_sync_threshold_max() -> f64 {
    0.1
}

fn default_framedup_threshold() -> f64 {
    0.1
}

fn default_resample_headroom() -> u32 {
    256
}

fn default_audio_buffer_samples() -> u16 {
    1024
}

fn default_max_frame_duration_discont() -> f64 {
    10.0
}

fn default_max_frame_duration() -> f64 {
    3600.0
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            packet_queue_ceiling: default_packet_queue_ceiling(),
            backpressure_sleep_ms: default_backpressure_sleep_ms(),
            video_queue_size: default_video_queue_size(),
            audio_queue_size: default_audio_queue_size(),
            refresh_rate: default_refresh_rate(),
            sync_threshold_min: default_sync_threshold_min(),
            sync_threshold_max: default_sync_threshold_max(),
            framedup_threshold: default_framedup_threshold(),
            resample_headroom: default_resample_headroom(),
            audio_buffer_samples: default_audio_buffer_samples(),
            max_frame_duration_discont: default_max_frame_duration_discont(),
            max_frame_duration: default_max_frame_duration(),
        }
    }
}

impl SyncConfig {
    /// 从 JSON 文件加载配置, 缺省字段取默认值
    pub fn from_json_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            SyncError::InvalidArgument(format!("解析配置文件 {} 失败: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置取值
    pub fn validate(&self) -> SyncResult<()> {
        if self.packet_queue_ceiling == 0 {
            return Err(SyncError::InvalidArgument(
                "packet_queue_ceiling 不能为 0".into(),
            ));
        }
        for (name, size) in [
            ("video_queue_size", self.video_queue_size),
            ("audio_queue_size", self.audio_queue_size),
        ] {
            if size == 0 || size > FRAME_QUEUE_SIZE {
                return Err(SyncError::InvalidArgument(format!(
                    "{name} 必须在 1..={FRAME_QUEUE_SIZE} 之间, 实际为 {size}"
                )));
            }
        }
        if self.backpressure_sleep_ms == 0 {
            return Err(SyncError::InvalidArgument(
                "backpressure_sleep_ms 不能为 0".into(),
            ));
        }
        // NaN 不满足 `> 0.0`, 一并拒绝
        for (name, value) in [
            ("refresh_rate", self.refresh_rate),
            ("sync_threshold_min", self.sync_threshold_min),
            ("sync_threshold_max", self.sync_threshold_max),
            ("framedup_threshold", self.framedup_threshold),
            ("max_frame_duration", self.max_frame_duration),
            ("max_frame_duration_discont", self.max_frame_duration_discont),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(SyncError::InvalidArgument(format!(
                    "{name} 必须为有限正数, 实际为 {value}"
                )));
            }
        }
        if self.sync_threshold_min > self.sync_threshold_max {
            return Err(SyncError::InvalidArgument(format!(
                "sync_threshold_min ({}) 大于 sync_threshold_max ({})",
                self.sync_threshold_min, self.sync_threshold_max
            )));
        }
        if self.audio_buffer_samples == 0 {
            return Err(SyncError::InvalidArgument(
                "audio_buffer_samples 不能为 0".into(),
            ));
        }
        Ok(())
    }

    /// 根据容器是否存在时间戳不连续选择最大帧间隔
    pub fn max_frame_duration_for(&self, ts_discontinuities: bool) -> f64 {
        if ts_discontinuities {
            self.max_frame_duration_discont
        } else {
            self.max_frame_duration
        }
    }
}
