//! 读取线程.
//!
//! 状态机: OPENING -> PROBING -> STREAMING -> (EOF | FAILED) -> STOPPED.
//!
//! 读取前检查两个数据包队列: 任一队列包数达到上限时休眠后重试, 不读取新包.
//! 这样既限制了内存占用, 也避免一路流饿死另一路.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use avsync_core::{Demuxer, MediaBackend, MediaType, StreamInfo, SyncError, SyncResult};
use log::{debug, error, info, trace};

use crate::decoder::{SharedAudioSink, spawn_audio_decoder, spawn_video_decoder};
use crate::session::{PlayerEvent, StreamSession};

/// 读取线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// 打开输入
    Opening,
    /// 探测流并打开解码器
    Probing,
    /// 读取并分发数据包
    Streaming,
    /// 已读到输入末尾
    Eof,
    /// 发生致命错误
    Failed,
    /// 线程已退出
    Stopped,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Opening => "OPENING",
            Self::Probing => "PROBING",
            Self::Streaming => "STREAMING",
            Self::Eof => "EOF",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// 启动读取线程
///
/// 线程返回退出前的终态: `Eof`, `Failed`, 或被中止时的 `Stopped`.
pub fn spawn_reader(
    session: Arc<StreamSession>,
    backend: Arc<dyn MediaBackend>,
    sink: SharedAudioSink,
) -> SyncResult<JoinHandle<ReaderState>> {
    let reader = Reader {
        session,
        backend,
        sink,
        state: ReaderState::Opening,
        workers: Vec::new(),
    };
    let handle = thread::Builder::new()
        .name("read_thread".into())
        .spawn(move || reader.run())?;
    Ok(handle)
}

struct Reader {
    session: Arc<StreamSession>,
    backend: Arc<dyn MediaBackend>,
    sink: SharedAudioSink,
    state: ReaderState,
    workers: Vec<JoinHandle<()>>,
}

impl Reader {
    fn transition(&mut self, next: ReaderState) {
        debug!("读取线程: {} -> {}", self.state, next);
        self.state = next;
    }

    fn run(mut self) -> ReaderState {
        let outcome = match self.open_and_stream() {
            Ok(()) => ReaderState::Eof,
            Err(SyncError::Aborted) => ReaderState::Stopped,
            Err(e) => {
                self.transition(ReaderState::Failed);
                self.session.request_quit(e.to_string());
                ReaderState::Failed
            }
        };
        if outcome == ReaderState::Eof {
            self.transition(ReaderState::Eof);
        }

        // 读到末尾后解码线程仍在消费剩余数据包, 等待它们结束
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("解码线程异常退出");
            }
        }
        self.transition(ReaderState::Stopped);
        info!("读取线程退出");
        outcome
    }

    fn open_and_stream(&mut self) -> SyncResult<()> {
        let source = self.session.source().to_string();
        let mut demuxer = self.backend.open_input(&source)?;

        self.transition(ReaderState::Probing);
        info!("打开输入: {source} (格式: {})", demuxer.format_name());
        let video_index = demuxer
            .find_best_stream(MediaType::Video)
            .ok_or(SyncError::StreamNotFound(MediaType::Video))?;
        let audio_index = demuxer
            .find_best_stream(MediaType::Audio)
            .ok_or(SyncError::StreamNotFound(MediaType::Audio))?;
        info!("视频流 #{video_index}, 音频流 #{audio_index}");
        self.session.set_stream_indices(audio_index, video_index);

        let max_frame_duration = self
            .session
            .config()
            .max_frame_duration_for(demuxer.has_ts_discontinuities());
        self.session.set_max_frame_duration(max_frame_duration);

        let video_stream = find_stream(demuxer.streams(), video_index)?;
        let audio_stream = find_stream(demuxer.streams(), audio_index)?;
        self.open_component(video_stream)?;
        self.open_component(audio_stream)?;

        self.transition(ReaderState::Streaming);
        run_streaming(&self.session, demuxer.as_mut())
    }

    /// 打开解码器并启动对应的解码线程
    fn open_component(&mut self, stream: StreamInfo) -> SyncResult<()> {
        let decoder = self.backend.open_decoder(&stream).map_err(|e| {
            SyncError::Codec(format!(
                "打开{}解码器 {} 失败: {e}",
                stream.media_type, stream.codec_name
            ))
        })?;
        info!(
            "{}解码器已打开: {} (流 #{})",
            stream.media_type,
            decoder.name(),
            stream.index
        );

        let session = Arc::clone(&self.session);
        let handle = match stream.media_type {
            MediaType::Video => {
                if let Some(video) = stream.video() {
                    self.session.notify(PlayerEvent::VideoSize {
                        width: video.width,
                        height: video.height,
                    });
                }
                spawn_video_decoder(session, decoder, stream)?
            }
            MediaType::Audio => {
                spawn_audio_decoder(session, decoder, stream, Arc::clone(&self.sink))?
            }
            other => {
                return Err(SyncError::Unsupported(format!("不支持的流类型: {other}")));
            }
        };
        self.workers.push(handle);
        Ok(())
    }
}

fn find_stream(streams: &[StreamInfo], index: usize) -> SyncResult<StreamInfo> {
    streams
        .iter()
        .find(|s| s.index == index)
        .cloned()
        .ok_or_else(|| SyncError::Internal(format!("流 #{index} 不存在")))
}

/// 读取并分发数据包, 直到输入末尾, 会话中止或致命错误
///
/// 不属于已选音频/视频流的数据包直接丢弃. 到达末尾时设置会话 eof 并返回 `Ok(())`.
pub fn run_streaming(session: &StreamSession, demuxer: &mut dyn Demuxer) -> SyncResult<()> {
    let ceiling = session.config().packet_queue_ceiling;
    let backoff = Duration::from_millis(session.config().backpressure_sleep_ms);
    let audio_index = session.audio_stream();
    let video_index = session.video_stream();

    loop {
        if session.is_aborted() {
            return Err(SyncError::Aborted);
        }
        if session.audioq.nb_packets() >= ceiling || session.videoq.nb_packets() >= ceiling {
            trace!(
                "数据包队列已满, 等待 {}ms (音频 {}, 视频 {})",
                backoff.as_millis(),
                session.audioq.nb_packets(),
                session.videoq.nb_packets()
            );
            thread::sleep(backoff);
            continue;
        }

        match demuxer.read_packet() {
            Ok(packet) => {
                let index = Some(packet.stream_index);
                if index == video_index {
                    session.videoq.put(packet)?;
                } else if index == audio_index {
                    session.audioq.put(packet)?;
                }
            }
            Err(e) if e.is_retryable() => {
                trace!("读取暂不可用, 重试");
            }
            Err(e) if e.is_terminal() => {
                info!("读取到输入末尾: {}", session.source());
                session.set_eof();
                session.notify(PlayerEvent::ReaderEof);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use avsync_core::{Packet, Rational, StreamParams};
    use std::collections::VecDeque;

    struct ScriptedDemuxer {
        streams: Vec<StreamInfo>,
        script: VecDeque<SyncResult<Packet>>,
    }

    impl Demuxer for ScriptedDemuxer {
        fn format_name(&self) -> &str {
            "scripted"
        }

        fn streams(&self) -> &[StreamInfo] {
            &self.streams
        }

        fn read_packet(&mut self) -> SyncResult<Packet> {
            self.script.pop_front().unwrap_or(Err(SyncError::Eof))
        }
    }

    fn packet(stream_index: usize) -> SyncResult<Packet> {
        Ok(Packet::from_data(stream_index, vec![0u8; 8]).with_pts(0, Rational::new(1, 1000)))
    }

    fn demuxer(script: Vec<SyncResult<Packet>>) -> ScriptedDemuxer {
        let stream = |index, media_type| StreamInfo {
            index,
            media_type,
            codec_name: "raw".into(),
            time_base: Rational::new(1, 1000),
            params: StreamParams::Other,
        };
        ScriptedDemuxer {
            streams: vec![stream(0, MediaType::Video), stream(1, MediaType::Audio)],
            script: script.into(),
        }
    }

    #[test]
    fn test_routes_packets_and_drops_foreign_streams() {
        let (session, events) = StreamSession::new("t", SyncConfig::default());
        session.set_stream_indices(1, 0);
        let mut demuxer = demuxer(vec![
            packet(0),
            packet(1),
            packet(2),
            Err(SyncError::Again),
            packet(1),
        ]);

        run_streaming(&session, &mut demuxer).unwrap();
        assert_eq!(session.videoq.nb_packets(), 1);
        assert_eq!(session.audioq.nb_packets(), 2);
        assert_eq!(session.audioq.size(), 16);
        assert!(session.is_eof());
        assert_eq!(events.try_recv().unwrap(), PlayerEvent::ReaderEof);
    }

    #[test]
    fn test_fatal_read_error_is_returned() {
        let (session, _events) = StreamSession::new("t", SyncConfig::default());
        session.set_stream_indices(1, 0);
        let mut demuxer = demuxer(vec![packet(0), Err(SyncError::Format("坏数据".into()))]);
        let result = run_streaming(&session, &mut demuxer);
        assert!(matches!(result, Err(SyncError::Format(_))));
        assert!(!session.is_eof());
    }

    #[test]
    fn test_aborted_session_stops_streaming() {
        let (session, _events) = StreamSession::new("t", SyncConfig::default());
        session.abort();
        let mut demuxer = demuxer(vec![packet(0)]);
        assert!(matches!(
            run_streaming(&session, &mut demuxer),
            Err(SyncError::Aborted)
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ReaderState::Streaming.to_string(), "STREAMING");
        assert_eq!(ReaderState::Stopped.to_string(), "STOPPED");
    }
}
