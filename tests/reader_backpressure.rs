//! 读取线程背压测试.
//!
//! 消费端暂停时, 读取线程在任一数据包队列达到上限后停止读取;
//! 消费端恢复后继续读取, 队列包数始终不超过上限.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use avsync::core::{
    Demuxer, MediaType, Packet, Rational, StreamInfo, StreamParams, SyncError, SyncResult,
};
use avsync::engine::reader::run_streaming;
use avsync::engine::{PacketGet, StreamSession, SyncConfig};

/// 无限交替产出视频 (流 0) 与音频 (流 1) 数据包, 并统计每路读取次数
struct EndlessDemuxer {
    streams: Vec<StreamInfo>,
    next: usize,
    reads: Arc<[AtomicUsize; 2]>,
}

impl EndlessDemuxer {
    fn new(reads: Arc<[AtomicUsize; 2]>) -> Self {
        let stream = |index, media_type| StreamInfo {
            index,
            media_type,
            codec_name: "raw".into(),
            time_base: Rational::new(1, 1000),
            params: StreamParams::Other,
        };
        Self {
            streams: vec![stream(0, MediaType::Video), stream(1, MediaType::Audio)],
            next: 0,
            reads,
        }
    }
}

impl Demuxer for EndlessDemuxer {
    fn format_name(&self) -> &str {
        "endless"
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> SyncResult<Packet> {
        let index = self.next;
        self.next = (self.next + 1) % 2;
        self.reads[index].fetch_add(1, Ordering::SeqCst);
        Ok(Packet::from_data(index, vec![0u8; 32]))
    }
}

fn spawn_streaming(
    config: SyncConfig,
) -> (
    Arc<StreamSession>,
    Arc<[AtomicUsize; 2]>,
    thread::JoinHandle<SyncResult<()>>,
) {
    let (session, _events) = StreamSession::new("endless", config);
    session.set_stream_indices(1, 0);
    let reads = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
    let mut demuxer = EndlessDemuxer::new(Arc::clone(&reads));
    let reader_session = Arc::clone(&session);
    let handle = thread::spawn(move || run_streaming(&reader_session, &mut demuxer));
    (session, reads, handle)
}

#[test]
fn test_paused_consumer_throttles_reader() {
    let config = SyncConfig::default();
    let ceiling = config.packet_queue_ceiling;
    let (session, reads, handle) = spawn_streaming(config);

    for _ in 0..10 {
        thread::sleep(Duration::from_millis(20));
        assert!(reads[0].load(Ordering::SeqCst) <= ceiling);
        assert!(reads[1].load(Ordering::SeqCst) <= ceiling);
        assert!(session.videoq.nb_packets() <= ceiling);
        assert!(session.audioq.nb_packets() <= ceiling);
    }
    // 视频先到上限, 音频停在上限之下一个
    assert_eq!(reads[0].load(Ordering::SeqCst), ceiling);
    assert_eq!(reads[1].load(Ordering::SeqCst), ceiling - 1);

    // 恢复消费: 两路各取出 10 个包后读取继续, 但队列仍不超过上限
    for _ in 0..10 {
        assert!(matches!(session.videoq.get(false), PacketGet::Packet(_)));
        assert!(matches!(session.audioq.get(false), PacketGet::Packet(_)));
    }
    thread::sleep(Duration::from_millis(100));
    let total = reads[0].load(Ordering::SeqCst) + reads[1].load(Ordering::SeqCst);
    assert!(total > 2 * ceiling - 1, "恢复消费后未继续读取");
    assert!(session.videoq.nb_packets() <= ceiling);
    assert!(session.audioq.nb_packets() <= ceiling);

    session.abort();
    assert!(matches!(handle.join().unwrap(), Err(SyncError::Aborted)));
}

#[test]
fn test_ceiling_holds_across_configurations() {
    for (ceiling, sleep_ms) in [(1, 1), (4, 2), (16, 5), (32, 10)] {
        let config = SyncConfig {
            packet_queue_ceiling: ceiling,
            backpressure_sleep_ms: sleep_ms,
            ..SyncConfig::default()
        };
        let (session, reads, handle) = spawn_streaming(config);

        thread::sleep(Duration::from_millis(60));
        let total = reads[0].load(Ordering::SeqCst) + reads[1].load(Ordering::SeqCst);
        assert!(total <= 2 * ceiling, "ceiling={ceiling}: 读取 {total} 次");
        assert!(session.videoq.nb_packets() <= ceiling);
        assert!(session.audioq.nb_packets() <= ceiling);

        session.abort();
        assert!(matches!(handle.join().unwrap(), Err(SyncError::Aborted)));
    }
}
