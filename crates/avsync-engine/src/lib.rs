//! # avsync-engine
//!
//! 音视频同步播放核心, 对标 ffplay 的 demux -> decode -> 定时呈现管线.
//!
//! 线程模型:
//! - 读取线程 ([`reader`]): 解封装并把数据包分发到音频/视频数据包队列, 队列满时休眠重试
//! - 音频/视频解码线程 ([`decoder`]): 消费数据包, 解码后写入帧队列
//! - 音频输出回调 ([`AudioRenderer`]): 由音频设备驱动, 拉取音频帧并更新音频 (主) 时钟
//! - 视频刷新调度 ([`VideoRefresher`]): 宿主事件循环中按 tick 调用, 根据时钟差计算显示延迟
//!
//! 所有共享状态由 [`StreamSession`] 持有, 各线程通过 `Arc` 引用同一会话.

pub mod audio;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod frame_queue;
pub mod output;
pub mod packet_queue;
pub mod player;
pub mod reader;
pub mod session;
pub mod video;

pub use audio::AudioRenderer;
pub use clock::{Clock, relative_time};
pub use config::{FRAME_QUEUE_SIZE, SyncConfig};
pub use frame_queue::{FrameQueue, QueuedFrame};
pub use output::{AudioSink, AudioSpec, VideoSurface};
pub use packet_queue::{PacketGet, PacketQueue};
pub use player::Player;
pub use reader::ReaderState;
pub use session::{AudioParams, PlayerEvent, StreamSession};
pub use video::{VideoRefresher, compute_target_delay, frame_duration};
