//! 解码器 trait 定义.
//!
//! 解码流程:
//! 1. 调用 `send_packet()` 送入压缩数据
//! 2. 循环调用 `receive_frame()` 取出解码后的帧, 直到返回 `NeedMoreData`
//! 3. 输入结束后送入空包 (flush), 取出解码器中缓存的帧, 直到返回 `Eof`

use crate::error::SyncResult;
use crate::frame::Frame;
use crate::packet::Packet;

/// 解码器 trait
pub trait Decoder: Send {
    /// 解码器名称
    fn name(&self) -> &str;

    /// 送入一个压缩数据包
    ///
    /// # 返回
    /// - `Ok(())`: 数据包已接受
    /// - `Err(SyncError::NeedMoreData)`: 内部缓冲区已满, 需先取出帧后重新送入同一数据包
    /// - 其他错误: 致命
    fn send_packet(&mut self, packet: &Packet) -> SyncResult<()>;

    /// 取出一帧解码数据
    ///
    /// # 返回
    /// - `Ok(frame)`: 成功取出一帧
    /// - `Err(SyncError::NeedMoreData)`: 需要送入更多数据包
    /// - `Err(SyncError::Eof)`: 刷新完成, 所有帧已取出
    /// - 其他错误: 致命
    fn receive_frame(&mut self) -> SyncResult<Frame>;
}
