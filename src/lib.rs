//! # avsync
//!
//! 音视频同步播放框架, 对标 ffplay 的 A/V 同步核心.
//!
//! 读取线程解封装, 音频/视频解码线程经有界队列解耦, 音频回调驱动主时钟,
//! 视频刷新调度根据时钟差决定每一帧的显示时刻.
//!
//! # 快速开始
//!
//! ```rust
//! use avsync::engine::{SyncConfig, compute_target_delay};
//!
//! let config = SyncConfig::default();
//! // 视频超前音频 60ms: 本帧延迟加倍
//! let delay = compute_target_delay(0.04, 1.06, 1.0, config.max_frame_duration, &config);
//! assert!((delay - 0.08).abs() < 1e-9);
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `avsync-core` | 核心类型, 错误与解封装/解码接口 |
//! | `avsync-resample` | 音频重采样 |
//! | `avsync-engine` | 队列, 时钟, 读取/解码线程, 音频回调与视频刷新 |

/// 核心类型与协作者接口 (对标 libavutil)
pub use avsync_core as core;

/// 音频重采样 (对标 libswresample)
pub use avsync_resample as resample;

/// 同步播放核心
pub use avsync_engine as engine;

/// 获取 avsync 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
