//! 媒体时钟模块.
//!
//! 以墙上时钟为锚点的播放位置: `pts_drift = pts - 更新时刻`,
//! 当前位置 = `pts_drift + 当前时刻`. 音频时钟为主时钟.
//!
//! 每个时钟只有一个写线程 (音频时钟由音频回调写, 视频时钟由刷新循环写),
//! 读取不加锁, 各字段以 f64 位模式存放在原子变量中.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// 单调墙上时钟 (秒), 对标 `av_gettime_relative() / 1e6`
pub fn relative_time() -> f64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// 媒体时钟
pub struct Clock {
    /// 最近一次设置的 pts (秒), 未设置时为 NaN
    pts: AtomicF64,
    /// pts 与设置时刻之差
    pts_drift: AtomicF64,
    /// 最近一次设置的墙上时刻
    last_updated: AtomicF64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// 创建未设置的时钟, [`get`](Self::get) 返回 NaN
    pub fn new() -> Self {
        Self {
            pts: AtomicF64::new(f64::NAN),
            pts_drift: AtomicF64::new(f64::NAN),
            last_updated: AtomicF64::new(0.0),
        }
    }

    /// 在指定墙上时刻设置时钟
    pub fn set_at(&self, pts: f64, time: f64) {
        self.pts.store(pts);
        self.last_updated.store(time);
        self.pts_drift.store(pts - time);
    }

    /// 以当前墙上时刻设置时钟
    pub fn set(&self, pts: f64) {
        self.set_at(pts, relative_time());
    }

    /// 当前播放位置 (秒)
    pub fn get(&self) -> f64 {
        self.get_at(relative_time())
    }

    /// 指定墙上时刻的播放位置
    pub fn get_at(&self, time: f64) -> f64 {
        if self.pts.load().is_nan() {
            return f64::NAN;
        }
        self.pts_drift.load() + time
    }

    /// 最近一次设置的 pts
    pub fn pts(&self) -> f64 {
        self.pts.load()
    }

    pub fn last_updated(&self) -> f64 {
        self.last_updated.load()
    }

    /// 时钟是否已被设置过
    pub fn is_set(&self) -> bool {
        !self.pts.load().is_nan()
    }
}
