//! The non-blocking transmission state machine, driven by a scripted
//! sink.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use bytes::Bytes;
use http::StatusCode;

use strand_accel::cache::{AccelCache, CacheableResponse};
use strand_accel::config::{ConfigRegistry, Configuration, VirtualServer};
use strand_accel::log::{AccessLog, LogRecord};
use strand_accel::transmit::{AsyncPhase, Serviced};

use common::{MemEntry, MemFileCache, ScriptedSink, SinkStep, request};

#[derive(Default)]
struct RecordingLog {
    batches: Mutex<Vec<Vec<LogRecord>>>,
}

impl AccessLog for RecordingLog {
    fn append(&self, records: &[LogRecord]) {
        self.batches.lock().unwrap().push(records.to_vec());
    }
}

struct Fixture {
    cache: AccelCache,
    vs: Arc<VirtualServer>,
    log: Arc<RecordingLog>,
}

fn fixture(body: &[u8]) -> Fixture {
    let vs = VirtualServer::new("default");
    let registry = ConfigRegistry::new(Configuration::new(1, vec![Arc::clone(&vs)]));
    let entry = MemEntry::new(body);
    let files = MemFileCache::new(vec![Arc::clone(&entry)]);
    let cache = AccelCache::new(registry, files);
    let log = Arc::new(RecordingLog::default());

    let req = request(b"GET /file HTTP/1.1\r\n\r\n");
    cache
        .store(CacheableResponse {
            enabled: true,
            request: &req,
            vs: Arc::clone(&vs),
            entry: Arc::clone(&entry) as Arc<dyn strand_accel::store::FileEntry>,
            status: StatusCode::OK,
            status_text: "OK",
            last_modified: UNIX_EPOCH + Duration::from_secs(1_000_000_000),
            etag: None,
            header_tail: Bytes::from_static(b"Content-Length: 10\r\n\r\n"),
            content_encoded: false,
            transfer_encoded: false,
            path_info: false,
            internal: false,
            log: Some(Arc::clone(&log) as Arc<dyn AccessLog>),
            unclean_shutdown_pattern: None,
        })
        .unwrap();
    cache.run_cycle();

    Fixture { cache, vs, log }
}

#[tokio::test]
async fn begin_async_requires_a_generation() {
    let vs = VirtualServer::new("default");
    let registry = ConfigRegistry::new(Configuration::new(1, vec![Arc::clone(&vs)]));
    let cache = AccelCache::new(registry, MemFileCache::new(Vec::new()));
    let handle = cache.create_handle();

    assert!(cache.begin_async(&handle).is_none(), "no generation yet: fall back to sync");
}

#[tokio::test]
async fn completes_in_one_attempt_when_socket_drains() {
    let fx = fixture(b"0123456789");
    let handle = fx.cache.create_handle();
    let req = request(b"GET /file HTTP/1.1\r\n\r\n");

    let mut batch = fx.cache.begin_async(&handle).unwrap();
    let conn = batch.lookup(&req, &fx.vs).unwrap();
    assert_eq!(conn.phase(), AsyncPhase::Idle);

    let mut sink = ScriptedSink::accepting();
    assert!(matches!(batch.service(conn, &mut sink), Serviced::Done));
    batch.end();

    let text = String::from_utf8(sink.written).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\nDate: "));
    assert!(text.ends_with("\r\n\r\n0123456789"));

    // The batch generation went back to the handle.
    assert!(handle.take().is_some());

    let batches = fx.log.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert!(!batches[0][0].aborted);
    assert_eq!(batches[0][0].uri.as_ref(), "/file");
}

#[tokio::test]
async fn partial_writes_suspend_and_resume() {
    let fx = fixture(b"0123456789");
    let handle = fx.cache.create_handle();
    let req = request(b"GET /file HTTP/1.1\r\n\r\n");

    let generation = fx.cache.current_generation().unwrap();
    let refs_before = Arc::strong_count(&generation);

    let mut batch = fx.cache.begin_async(&handle).unwrap();
    let conn = batch.lookup(&req, &fx.vs).unwrap();

    // Accept a few header bytes, then stall.
    let mut sink = ScriptedSink::new(vec![SinkStep::Accept(7), SinkStep::Block]);
    assert!(matches!(batch.service(conn, &mut sink), Serviced::Again));

    // The suspended connection now holds its own generation reference.
    assert_eq!(Arc::strong_count(&generation), refs_before + 1);

    let mut retries = batch.take_retries();
    assert_eq!(retries.len(), 1);
    let conn = retries.pop().unwrap();

    // Drain the headers, stall mid-body, then drain.
    let mut sink2 = ScriptedSink::new(vec![SinkStep::Accept(200), SinkStep::Accept(4), SinkStep::Block]);
    let conn = match batch.service(conn, &mut sink2) {
        Serviced::Again => batch.take_retries().pop().unwrap(),
        other => panic!("expected Again, got {other:?}"),
    };
    assert_eq!(conn.phase(), AsyncPhase::BodyPending);

    let mut sink3 = ScriptedSink::accepting();
    assert!(matches!(batch.service(conn, &mut sink3), Serviced::Done));
    batch.end();

    let full: Vec<u8> = [sink.written, sink2.written, sink3.written].concat();
    let text = String::from_utf8(full).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("\r\n\r\n0123456789"));

    // Every per-connection and batch reference has been released.
    assert_eq!(Arc::strong_count(&generation), refs_before);
    assert!(handle.take().is_some());
}

#[tokio::test]
async fn first_attempt_hard_failure_falls_back_to_sync() {
    let fx = fixture(b"0123456789");
    let handle = fx.cache.create_handle();
    let req = request(b"GET /file HTTP/1.1\r\n\r\n");

    let mut batch = fx.cache.begin_async(&handle).unwrap();
    let conn = batch.lookup(&req, &fx.vs).unwrap();

    let mut sink = ScriptedSink::new(vec![SinkStep::Fail]);
    let conn = match batch.service(conn, &mut sink) {
        Serviced::Unserviceable(conn) => conn,
        other => panic!("expected Unserviceable, got {other:?}"),
    };
    assert_eq!(conn.phase(), AsyncPhase::Idle);
    assert_eq!(conn.bytes_sent(), 0);
    batch.end();

    assert_eq!(fx.cache.stats().async_unserviceable, 1);
    // Nothing was finished, so nothing was logged.
    assert!(fx.log.batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failure_after_progress_still_reaches_cleanup() {
    let fx = fixture(b"0123456789");
    let handle = fx.cache.create_handle();
    let req = request(b"GET /file HTTP/1.1\r\n\r\n");

    let mut batch = fx.cache.begin_async(&handle).unwrap();
    let conn = batch.lookup(&req, &fx.vs).unwrap();

    let mut sink = ScriptedSink::new(vec![SinkStep::Accept(10), SinkStep::Fail]);
    assert!(matches!(batch.service(conn, &mut sink), Serviced::Done));
    batch.end();

    let batches = fx.log.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert!(batches[0][0].aborted, "a failed transmission is logged as aborted");
}

#[tokio::test]
async fn abort_routes_through_the_finished_list() {
    let fx = fixture(b"0123456789");
    let handle = fx.cache.create_handle();
    let req = request(b"GET /file HTTP/1.1\r\n\r\n");

    let mut batch = fx.cache.begin_async(&handle).unwrap();
    let conn = batch.lookup(&req, &fx.vs).unwrap();

    let mut sink = ScriptedSink::new(vec![SinkStep::Accept(3), SinkStep::Block]);
    assert!(matches!(batch.service(conn, &mut sink), Serviced::Again));
    let conn = batch.take_retries().pop().unwrap();

    batch.abort(conn);
    batch.end();

    let batches = fx.log.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert!(batches[0][0].aborted);
    assert!(handle.take().is_some(), "abort must not leak the handle's generation");
}
