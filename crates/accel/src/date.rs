//! Cached HTTP `Date` header value.
//!
//! Replaying a cached response regenerates the `Date` header, and
//! formatting an HTTP date per hit would dominate the replay cost. A
//! background task reformats the date on a sub-second interval and
//! republishes it through an `ArcSwap`, so the hot path pays one atomic
//! load per response.

use arc_swap::ArcSwap;
use bytes::Bytes;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Debug)]
pub struct DateService {
    current: Arc<ArcSwap<Bytes>>,
    handle: tokio::task::JoinHandle<()>,
}

static DATE_SERVICE: Lazy<DateService> = Lazy::new(|| DateService::with_update_interval(Duration::from_millis(800)));

impl DateService {
    /// The process-wide instance. First use must happen inside a tokio
    /// runtime, which is where every replay path already runs.
    pub fn global() -> &'static DateService {
        &DATE_SERVICE
    }

    fn with_update_interval(update_interval: Duration) -> Self {
        let current = Arc::new(ArcSwap::from_pointee(format_now()));
        let current_arc = Arc::clone(&current);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(update_interval).await;
                current_arc.store(Arc::new(format_now()));
            }
        });

        DateService { current, handle }
    }

    /// The current formatted HTTP date, e.g. `Thu, 07 Aug 2026 03:00:00 GMT`.
    pub fn current(&self) -> Bytes {
        self.current.load().as_ref().clone()
    }
}

impl Drop for DateService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn format_now() -> Bytes {
    Bytes::from(httpdate::fmt_http_date(SystemTime::now()).into_bytes())
}
