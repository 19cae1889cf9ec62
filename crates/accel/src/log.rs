//! Access-log contract.
//!
//! Replayed responses still get access-log entries. The async finished
//! list batches records per log × virtual server before appending, so a
//! log implementation pays its internal locking once per batch rather
//! than once per connection.

use http::StatusCode;
use std::sync::Arc;

/// One finished (or aborted) replayed response.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub vs: Box<str>,
    pub uri: Box<str>,
    pub status: StatusCode,
    pub bytes_sent: u64,
    pub aborted: bool,
}

/// An access log accepting batched appends.
pub trait AccessLog: Send + Sync {
    fn append(&self, records: &[LogRecord]);
}

/// Groups records by their target log and appends each group once.
pub(crate) fn flush_batched(batches: Vec<(Option<Arc<dyn AccessLog>>, LogRecord)>) {
    let mut pending: Vec<(Arc<dyn AccessLog>, Vec<LogRecord>)> = Vec::new();
    for (log, record) in batches {
        let Some(log) = log else { continue };
        match pending.iter_mut().find(|(l, _)| Arc::ptr_eq(l, &log)) {
            Some((_, records)) => records.push(record),
            None => pending.push((log, vec![record])),
        }
    }
    for (log, records) in pending {
        log.append(&records);
    }
}
