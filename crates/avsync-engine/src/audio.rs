//! 音频输出回调.
//!
//! 由音频设备在其自身线程上调用, 从音频帧队列拉取已转换为输出格式的数据,
//! 拷贝到设备缓冲区, 并按仍未播出的数据量修正音频时钟.

use std::sync::Arc;

use log::trace;

use crate::clock::relative_time;
use crate::session::StreamSession;

/// 音频渲染器, 即设备的拉取回调
///
/// 内部持有一个暂存缓冲区, 保存当前帧尚未交给设备的部分.
pub struct AudioRenderer {
    session: Arc<StreamSession>,
    /// 当前帧的 S16 交错数据
    buf: Vec<u8>,
    /// `buf` 中下一个待拷贝字节的位置
    buf_index: usize,
    /// 当前帧末尾对应的播放位置 (秒), 未知时为 NaN
    audio_clock: f64,
}

impl AudioRenderer {
    pub fn new(session: Arc<StreamSession>) -> Self {
        Self {
            session,
            buf: Vec::new(),
            buf_index: 0,
            audio_clock: f64::NAN,
        }
    }

    /// 填充设备缓冲区
    pub fn fill(&mut self, stream: &mut [u8]) {
        self.fill_at(stream, relative_time());
    }

    /// 以指定回调时刻填充设备缓冲区
    ///
    /// 会话中止, 输出参数未协商, 或音频解码结束且队列已空时,
    /// 剩余部分写入静音且不更新时钟.
    pub fn fill_at(&mut self, stream: &mut [u8], callback_time: f64) {
        let Some(bytes_per_sec) = self.session.audio_target().map(|p| p.bytes_per_sec) else {
            stream.fill(0);
            return;
        };

        let mut written = 0;
        while written < stream.len() {
            if self.buf_index >= self.buf.len() && !self.decode_next() {
                stream[written..].fill(0);
                return;
            }
            let len = (stream.len() - written).min(self.buf.len() - self.buf_index);
            stream[written..written + len]
                .copy_from_slice(&self.buf[self.buf_index..self.buf_index + len]);
            written += len;
            self.buf_index += len;
        }

        if !self.audio_clock.is_nan() {
            // 设备采用双缓冲, 硬件缓冲区中最多还有两块未播出
            let pending = 2 * self.session.audio_hw_buf_size() + self.buf.len() - self.buf_index;
            let rest_time = pending as f64 / bytes_per_sec as f64;
            self.session
                .audclk
                .set_at(self.audio_clock - rest_time, callback_time);
        }
    }

    /// 从音频帧队列取下一帧到暂存缓冲区
    ///
    /// 无数据可取时返回 false, 暂存缓冲区被清空.
    fn decode_next(&mut self) -> bool {
        let Self {
            session,
            buf,
            buf_index,
            audio_clock,
        } = self;

        *buf_index = 0;
        if session.is_aborted() {
            buf.clear();
            return false;
        }
        let got = session.sampq.peek_readable(|f| {
            buf.clear();
            if let Some(data) = f.frame.data.first() {
                buf.extend_from_slice(data);
            }
            *audio_clock = if f.pts.is_nan() {
                f64::NAN
            } else {
                f.pts + f.frame.duration_secs()
            };
        });
        if got.is_none() {
            trace!("音频队列无数据, 输出静音");
            buf.clear();
            return false;
        }
        session.sampq.pop();
        true
    }
}
