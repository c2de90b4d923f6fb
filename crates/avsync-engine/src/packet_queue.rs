//! 数据包队列.
//!
//! 线程安全的 FIFO, 维护包数与字节数统计. 容量不由队列自身限制,
//! 准入控制由读取线程负责.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use avsync_core::{Packet, SyncError, SyncResult};

/// [`PacketQueue::get`] 的结果
#[derive(Debug)]
pub enum PacketGet {
    /// 取到一个数据包
    Packet(Packet),
    /// 非阻塞模式下队列为空
    Empty,
    /// 队列为空且已到达流末尾, 不会再有数据
    NoMoreData,
    /// 队列已中止
    Aborted,
}

#[derive(Default)]
struct QueueState {
    packets: VecDeque<Packet>,
    /// 所有排队数据包的数据总字节数
    size: usize,
    eof: bool,
    aborted: bool,
}

/// 数据包队列
#[derive(Default)]
pub struct PacketQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl PacketQueue {
    /// 创建空队列
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 追加数据包到队尾, 唤醒一个等待者
    ///
    /// 队列已中止时数据包被丢弃, 返回 [`SyncError::Aborted`].
    pub fn put(&self, packet: Packet) -> SyncResult<()> {
        let mut state = self.lock();
        if state.aborted {
            return Err(SyncError::Aborted);
        }
        state.size += packet.size();
        state.packets.push_back(packet);
        self.cond.notify_one();
        Ok(())
    }

    /// 取出队首数据包
    ///
    /// `block` 为 true 时, 队列为空且未到末尾会阻塞等待.
    /// 队列为空且已设置 eof 时返回 [`PacketGet::NoMoreData`], 不会永久阻塞.
    pub fn get(&self, block: bool) -> PacketGet {
        let mut state = self.lock();
        loop {
            if state.aborted {
                return PacketGet::Aborted;
            }
            if let Some(packet) = state.packets.pop_front() {
                state.size -= packet.size();
                return PacketGet::Packet(packet);
            }
            if state.eof {
                return PacketGet::NoMoreData;
            }
            if !block {
                return PacketGet::Empty;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 标记流末尾并唤醒所有等待者
    pub fn set_eof(&self) {
        let mut state = self.lock();
        state.eof = true;
        self.cond.notify_all();
    }

    /// 中止队列, 丢弃剩余数据包并唤醒所有等待者
    pub fn abort(&self) {
        let mut state = self.lock();
        state.aborted = true;
        state.packets.clear();
        state.size = 0;
        self.cond.notify_all();
    }

    /// 排队中的数据包数
    pub fn nb_packets(&self) -> usize {
        self.lock().packets.len()
    }

    /// 排队中的数据总字节数
    pub fn size(&self) -> usize {
        self.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.lock().packets.is_empty()
    }

    pub fn is_eof(&self) -> bool {
        self.lock().eof
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }
}
