//! 视频刷新调度.
//!
//! 宿主事件循环每个 tick 调用一次 [`VideoRefresher::refresh`]. 根据视频时钟与
//! 音频 (主) 时钟之差修正帧显示延迟: 落后时立即追赶, 超前时逐步放慢.

use std::sync::Arc;

use avsync_core::SyncResult;
use log::trace;

use crate::clock::relative_time;
use crate::config::SyncConfig;
use crate::output::VideoSurface;
use crate::session::StreamSession;

/// 相邻两帧的显示间隔 (秒)
///
/// 时间戳差值非正, 未知, 或超过 `max_frame_duration` (时间戳不连续) 时,
/// 退回上一帧自身的估计时长.
pub fn frame_duration(last_pts: f64, last_duration: f64, next_pts: f64, max_frame_duration: f64) -> f64 {
    let duration = next_pts - last_pts;
    if duration.is_nan() || duration <= 0.0 || duration > max_frame_duration {
        last_duration
    } else {
        duration
    }
}

/// 根据音视频时钟差计算本帧的目标延迟 (秒)
///
/// `diff = video_clock - master_clock`, 同步阈值为 `delay` 限制在
/// `[sync_threshold_min, sync_threshold_max]` 内:
/// - 任一时钟未知, 或 `|diff|` 超过 `max_frame_duration`: 不修正
/// - `diff <= -阈值` (视频落后): `max(0, delay + diff)`
/// - `diff >= 阈值` 且超过 `framedup_threshold` (视频大幅超前): `delay + diff`
/// - `diff >= 阈值` (视频略微超前): `delay * 2`
pub fn compute_target_delay(
    delay: f64,
    video_clock: f64,
    master_clock: f64,
    max_frame_duration: f64,
    config: &SyncConfig,
) -> f64 {
    let diff = video_clock - master_clock;
    if diff.is_nan() || diff.abs() >= max_frame_duration {
        return delay;
    }

    let sync_threshold = delay.clamp(config.sync_threshold_min, config.sync_threshold_max);
    let target = if diff <= -sync_threshold {
        (delay + diff).max(0.0)
    } else if diff >= sync_threshold && diff > config.framedup_threshold {
        delay + diff
    } else if diff >= sync_threshold {
        2.0 * delay
    } else {
        delay
    };
    trace!("视频延迟: delay={delay:.3} diff={diff:.3} -> {target:.3}");
    target
}

/// 视频刷新调度器, 在宿主的事件循环线程上运行
pub struct VideoRefresher {
    session: Arc<StreamSession>,
    /// 上一帧的计划显示时刻 (墙上时钟, 秒)
    frame_timer: f64,
    /// 换帧或宿主要求重绘时置位, 呈现后清除
    force_refresh: bool,
}

impl VideoRefresher {
    pub fn new(session: Arc<StreamSession>) -> Self {
        Self {
            session,
            frame_timer: 0.0,
            force_refresh: false,
        }
    }

    /// 要求下次刷新时重新呈现当前帧, 用于窗口尺寸变化或被遮挡后重绘
    pub fn force_refresh(&mut self) {
        self.force_refresh = true;
    }

    /// 上一帧的计划显示时刻
    pub fn frame_timer(&self) -> f64 {
        self.frame_timer
    }

    /// 执行一次刷新
    ///
    /// `remaining_time` 为距下次刷新的等待时长, 下一帧显示时刻更早时会被缩短.
    pub fn refresh(&mut self, remaining_time: &mut f64, surface: &mut dyn VideoSurface) -> SyncResult<()> {
        self.refresh_at(relative_time(), remaining_time, surface)
    }

    /// 以指定墙上时刻执行一次刷新
    pub fn refresh_at(
        &mut self,
        time: f64,
        remaining_time: &mut f64,
        surface: &mut dyn VideoSurface,
    ) -> SyncResult<()> {
        let session = &self.session;
        if session.is_aborted() {
            return Ok(());
        }
        let config = session.config();
        let pictq = &session.pictq;

        let last = pictq.peek_last(|f| (f.pts, f.duration));
        let next = pictq.peek(|f| f.pts);
        if let (Some((last_pts, last_duration)), Some(next_pts)) = (last, next) {
            let max_frame_duration = session.max_frame_duration();
            let duration = frame_duration(last_pts, last_duration, next_pts, max_frame_duration);
            let delay = compute_target_delay(
                duration,
                session.vidclk.get_at(time),
                session.audclk.get_at(time),
                max_frame_duration,
                config,
            );

            if time < self.frame_timer + delay {
                // 下一帧显示时刻未到, 继续显示上一帧
                *remaining_time = remaining_time.min(self.frame_timer + delay - time);
            } else {
                self.frame_timer += delay;
                if delay > 0.0 && time - self.frame_timer > config.sync_threshold_max {
                    self.frame_timer = time;
                }
                if !next_pts.is_nan() {
                    session.vidclk.set_at(next_pts, time);
                }
                pictq.pop();
                self.force_refresh = true;
                trace!("显示视频帧 pts={next_pts:.3}, frame_timer={:.3}", self.frame_timer);
            }
        }

        // 画面未变化时不重复上传
        if self.force_refresh && pictq.is_last_shown() {
            self.force_refresh = false;
            if let Some(result) = pictq.peek_last(|f| surface.present(&f.frame)) {
                result?;
            }
        }
        Ok(())
    }
}
