//! 解码帧队列.
//!
//! 固定容量的环形缓冲区, 单生产者 (解码线程) 单消费者 (音频回调或视频刷新).
//!
//! `keep_last` 模式下, 上一次显示的帧在下一次 `pop` 之前保持可见:
//! 第一次 `pop` 只置位 `rindex_shown`, 之后每次 `pop` 释放上一帧.
//! 这样刷新循环总能同时看到 "正在显示" 与 "即将显示" 两帧, 用于计算帧间隔.
//!
//! 槽位通过闭包借用访问, 闭包在队列锁内执行, 应只做短暂的读取或拷贝.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::config::FRAME_QUEUE_SIZE;

/// 队列中的一帧, 附带换算为秒的时间信息
#[derive(Debug, Clone)]
pub struct QueuedFrame<T> {
    /// 帧数据
    pub frame: T,
    /// 显示时间戳 (秒), 未知时为 NaN
    pub pts: f64,
    /// 估计时长 (秒)
    pub duration: f64,
}

impl<T> QueuedFrame<T> {
    pub fn new(frame: T, pts: f64, duration: f64) -> Self {
        Self {
            frame,
            pts,
            duration,
        }
    }
}

struct Ring<T> {
    slots: Vec<Option<QueuedFrame<T>>>,
    rindex: usize,
    windex: usize,
    size: usize,
    /// 0 或 1: 读位置上的帧是否已显示
    rindex_shown: usize,
    closed: bool,
    aborted: bool,
}

impl<T> Ring<T> {
    fn nb_remaining(&self) -> usize {
        self.size.saturating_sub(self.rindex_shown)
    }
}

/// 解码帧队列
pub struct FrameQueue<T> {
    ring: Mutex<Ring<T>>,
    cond: Condvar,
    max_size: usize,
    keep_last: bool,
}

/// [`FrameQueue::peek_writable`] 返回的可写槽位
///
/// 调用 [`WritableSlot::push`] 填充并提交; 直接丢弃则不占用槽位.
pub struct WritableSlot<'a, T> {
    queue: &'a FrameQueue<T>,
    index: usize,
}

impl<T> WritableSlot<'_, T> {
    /// 槽位在环形缓冲区中的下标
    pub fn index(&self) -> usize {
        self.index
    }

    /// 填充槽位并推进写位置
    pub fn push(self, frame: QueuedFrame<T>) {
        let mut ring = self.queue.lock();
        ring.slots[self.index] = Some(frame);
        ring.windex = (ring.windex + 1) % self.queue.max_size;
        ring.size += 1;
        self.queue.cond.notify_all();
    }
}

impl<T> FrameQueue<T> {
    /// 创建帧队列
    ///
    /// 容量限制在 `[1, FRAME_QUEUE_SIZE]` 内.
    pub fn new(max_size: usize, keep_last: bool) -> Self {
        let max_size = max_size.clamp(1, FRAME_QUEUE_SIZE);
        let mut slots = Vec::with_capacity(max_size);
        slots.resize_with(max_size, || None);
        Self {
            ring: Mutex::new(Ring {
                slots,
                rindex: 0,
                windex: 0,
                size: 0,
                rindex_shown: 0,
                closed: false,
                aborted: false,
            }),
            cond: Condvar::new(),
            max_size,
            keep_last,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 等待可写槽位
    ///
    /// 队列满时阻塞; 队列中止时返回 None.
    pub fn peek_writable(&self) -> Option<WritableSlot<'_, T>> {
        let mut ring = self.lock();
        while ring.size >= self.max_size && !ring.aborted {
            ring = self.cond.wait(ring).unwrap_or_else(PoisonError::into_inner);
        }
        if ring.aborted {
            return None;
        }
        Some(WritableSlot {
            queue: self,
            index: ring.windex,
        })
    }

    /// 等待可写槽位并写入一帧
    ///
    /// 队列中止时返回 false, 帧被丢弃.
    pub fn push(&self, frame: QueuedFrame<T>) -> bool {
        match self.peek_writable() {
            Some(slot) => {
                slot.push(frame);
                true
            }
            None => false,
        }
    }

    /// 等待下一帧可读并访问它
    ///
    /// 无可读帧时阻塞. 队列中止, 或已关闭且没有剩余帧时返回 None.
    pub fn peek_readable<R>(&self, f: impl FnOnce(&QueuedFrame<T>) -> R) -> Option<R> {
        let mut ring = self.lock();
        while ring.nb_remaining() == 0 && !ring.aborted && !ring.closed {
            ring = self.cond.wait(ring).unwrap_or_else(PoisonError::into_inner);
        }
        if ring.aborted || ring.nb_remaining() == 0 {
            return None;
        }
        let index = (ring.rindex + ring.rindex_shown) % self.max_size;
        ring.slots[index].as_ref().map(f)
    }

    /// 访问下一个待显示的帧 (不阻塞)
    pub fn peek<R>(&self, f: impl FnOnce(&QueuedFrame<T>) -> R) -> Option<R> {
        let ring = self.lock();
        if ring.nb_remaining() == 0 {
            return None;
        }
        let index = (ring.rindex + ring.rindex_shown) % self.max_size;
        ring.slots[index].as_ref().map(f)
    }

    /// 访问上一次显示的帧 (不阻塞)
    ///
    /// 尚未显示过任何帧时, 返回读位置上的帧 (与 [`peek`](Self::peek) 相同).
    pub fn peek_last<R>(&self, f: impl FnOnce(&QueuedFrame<T>) -> R) -> Option<R> {
        let ring = self.lock();
        if ring.size == 0 {
            return None;
        }
        ring.slots[ring.rindex].as_ref().map(f)
    }

    /// 出队
    ///
    /// `keep_last` 模式下首次调用只标记读位置上的帧为已显示, 不释放数据.
    pub fn pop(&self) {
        let mut ring = self.lock();
        if ring.size == 0 {
            return;
        }
        if self.keep_last && ring.rindex_shown == 0 {
            ring.rindex_shown = 1;
            return;
        }
        let rindex = ring.rindex;
        ring.slots[rindex] = None;
        ring.rindex = (rindex + 1) % self.max_size;
        ring.size -= 1;
        self.cond.notify_all();
    }

    /// 尚未显示的帧数
    pub fn nb_remaining(&self) -> usize {
        self.lock().nb_remaining()
    }

    /// 占用的槽位数 (含保留的已显示帧)
    pub fn size(&self) -> usize {
        self.lock().size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// 是否已有帧被标记为显示过
    pub fn is_last_shown(&self) -> bool {
        self.lock().rindex_shown == 1
    }

    /// 生产者结束: 消费者取完剩余帧后不再阻塞
    pub fn close(&self) {
        let mut ring = self.lock();
        ring.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// 中止队列, 唤醒所有等待的生产者与消费者
    pub fn abort(&self) {
        let mut ring = self.lock();
        ring.aborted = true;
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }
}
