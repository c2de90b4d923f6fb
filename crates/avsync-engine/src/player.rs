//! 播放器门面.
//!
//! 创建会话并启动读取线程, 向宿主事件循环提供视频刷新入口与退出控制.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use avsync_core::{MediaBackend, SyncResult};
use log::{error, info};

use crate::config::SyncConfig;
use crate::decoder::SharedAudioSink;
use crate::output::{AudioSink, VideoSurface};
use crate::reader::{ReaderState, spawn_reader};
use crate::session::{PlayerEvent, StreamSession};
use crate::video::VideoRefresher;

/// 播放器
///
/// 持有会话, 读取线程句柄与音频设备. 丢弃时自动中止并回收所有线程.
pub struct Player {
    session: Arc<StreamSession>,
    reader: Option<JoinHandle<ReaderState>>,
    sink: SharedAudioSink,
    refresher: VideoRefresher,
}

impl Player {
    /// 打开输入并开始播放
    ///
    /// 打开输入, 探测与解码器创建都在读取线程中进行, 失败时通过
    /// [`PlayerEvent::Quit`] 通知宿主.
    pub fn open(
        source: impl Into<String>,
        config: SyncConfig,
        backend: Arc<dyn MediaBackend>,
        sink: Box<dyn AudioSink>,
    ) -> SyncResult<(Self, Receiver<PlayerEvent>)> {
        config.validate()?;
        let (session, events) = StreamSession::new(source, config);
        let sink: SharedAudioSink = Arc::new(Mutex::new(sink));
        let reader = spawn_reader(Arc::clone(&session), backend, Arc::clone(&sink))?;
        let refresher = VideoRefresher::new(Arc::clone(&session));
        Ok((
            Self {
                session,
                reader: Some(reader),
                sink,
                refresher,
            },
            events,
        ))
    }

    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// 执行一次视频刷新, 返回距下次刷新的建议等待时长
    pub fn refresh(&mut self, surface: &mut dyn VideoSurface) -> SyncResult<Duration> {
        let mut remaining = self.session.config().refresh_rate;
        self.refresher.refresh(&mut remaining, surface)?;
        Ok(Duration::from_secs_f64(remaining.max(0.0)))
    }

    /// 下次刷新时重绘当前帧
    pub fn force_refresh(&mut self) {
        self.refresher.force_refresh();
    }

    /// 中止会话, 唤醒阻塞在队列上的所有线程, 包括等待数据的音频回调
    ///
    /// 关闭外部音频设备前必须先调用, 否则设备关闭会等待一个永不返回的回调.
    pub fn abort(&self) {
        self.session.abort();
    }

    /// 全部数据已解码并播放完毕
    pub fn is_drained(&self) -> bool {
        self.session.is_drained()
    }

    /// 停止播放: 中止会话, 等待读取线程 (及其解码线程) 退出, 关闭音频设备
    ///
    /// 返回读取线程的终态.
    pub fn stop(mut self) -> Option<ReaderState> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<ReaderState> {
        let reader = self.reader.take()?;
        self.session.abort();
        let state = match reader.join() {
            Ok(state) => Some(state),
            Err(_) => {
                error!("读取线程异常退出");
                None
            }
        };
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
        info!("播放结束: {}", self.session.source());
        state
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}
