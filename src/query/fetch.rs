//! Chunk fetcher
//!
//! Turns the partitioned windows into [`Chunk`]s by asking a
//! [`ChunkBackend`] for each window in order. Consumers pull one chunk at a
//! time with [`ChunkFetcher::next_chunk`].
//!
//! # Read-ahead
//!
//! When a chunk is handed out, the request for the following window is
//! issued immediately on a spawned task, so the network round trip overlaps
//! evaluation of the current chunk. At most one request is ever in flight:
//!
//! ```text
//!  consumer:  [eval w0]        [eval w1]        [eval w2]
//!  backend:   [fetch w1 ────]  [fetch w2 ────]  (done)
//! ```
//!
//! # Failure
//!
//! A failed or timed-out fetch ends the fetcher: no further windows are
//! requested and every later call returns `None`. Dropping the fetcher
//! aborts whatever request is still in flight.

use crate::backend::{ChunkBackend, FetchRequest};
use crate::metrics;
use crate::query::error::{QueryError, QueryResult};
use crate::query::window::Window;
use crate::types::{BaseQuery, RawData};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default deadline for one backend fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A window together with the raw data fetched for it
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Window the data covers
    pub window: Window,
    /// Raw series by base query
    pub data: RawData,
}

/// Request currently running on a spawned task
struct InFlight {
    window: Window,
    handle: JoinHandle<QueryResult<RawData>>,
}

/// Pull-based producer of chunks with one window of read-ahead
pub struct ChunkFetcher {
    backend: Arc<dyn ChunkBackend>,
    queries: Vec<BaseQuery>,
    pending: VecDeque<Window>,
    in_flight: Option<InFlight>,
    timeout: Duration,
    finished: bool,
}

impl ChunkFetcher {
    /// Create a fetcher for `windows`, requesting `queries` from `backend`
    pub fn new(
        backend: Arc<dyn ChunkBackend>,
        queries: Vec<BaseQuery>,
        windows: Vec<Window>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            queries,
            pending: windows.into(),
            in_flight: None,
            timeout,
            finished: false,
        }
    }

    /// Windows not yet requested
    pub fn remaining_windows(&self) -> usize {
        self.pending.len()
    }

    /// Whether a request is currently outstanding
    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Pull the next chunk
    ///
    /// Returns:
    /// - `Some(Ok(chunk))` - the next window's data
    /// - `Some(Err(e))` - the fetch failed; the fetcher is finished
    /// - `None` - every window has been delivered, or a failure was reported
    ///
    /// Cancel safe: dropping the returned future before it completes leaves
    /// the outstanding request in place for the next call.
    pub async fn next_chunk(&mut self) -> Option<QueryResult<Chunk>> {
        if self.finished {
            return None;
        }

        if self.in_flight.is_none() {
            match self.issue_next() {
                Some(in_flight) => self.in_flight = Some(in_flight),
                None => {
                    self.finished = true;
                    return None;
                }
            }
        }

        let in_flight = self.in_flight.as_mut()?;
        let joined = (&mut in_flight.handle).await;
        let window = in_flight.window;
        self.in_flight = None;

        let result = joined.unwrap_or_else(|e| {
            Err(QueryError::internal(format!(
                "fetch task for window [{}, {}) failed: {}",
                window.start, window.end, e
            )))
        });

        match result {
            Ok(data) => {
                self.in_flight = self.issue_next();
                Some(Ok(Chunk { window, data }))
            }
            Err(e) => {
                self.cancel();
                Some(Err(e))
            }
        }
    }

    /// Stop fetching: abort the outstanding request and drop the remaining
    /// windows
    pub fn cancel(&mut self) {
        self.finished = true;
        self.pending.clear();
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.abort();
        }
    }

    /// Spawn the request for the next pending window
    fn issue_next(&mut self) -> Option<InFlight> {
        let window = self.pending.pop_front()?;
        let backend = Arc::clone(&self.backend);
        let request = FetchRequest::new(self.queries.clone(), window);
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            match tokio::time::timeout(timeout, backend.fetch(request)).await {
                Ok(Ok(data)) => {
                    metrics::record_fetch(started.elapsed().as_secs_f64());
                    debug!(
                        backend = backend.backend_id(),
                        start = window.start,
                        end = window.end,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Fetched window"
                    );
                    Ok(data)
                }
                Ok(Err(e)) => {
                    metrics::record_fetch_failure(e.kind.as_label());
                    warn!(
                        backend = backend.backend_id(),
                        start = window.start,
                        end = window.end,
                        error = %e,
                        "Backend fetch failed"
                    );
                    Err(e)
                }
                Err(_) => {
                    metrics::record_fetch_failure("timeout");
                    warn!(
                        backend = backend.backend_id(),
                        start = window.start,
                        end = window.end,
                        timeout_ms = timeout.as_millis() as u64,
                        "Backend fetch timed out"
                    );
                    Err(QueryError::timeout(format!(
                        "backend did not answer window [{}, {}) within {:?}",
                        window.start, window.end, timeout
                    )))
                }
            }
        });

        Some(InFlight { window, handle })
    }
}

impl Drop for ChunkFetcher {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::query::error::QueryErrorKind;
    use crate::types::TagSet;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn windows(count: i64) -> Vec<Window> {
        (0..count)
            .map(|i| Window {
                start: i * 100,
                end: (i + 1) * 100,
                step: 10,
            })
            .collect()
    }

    /// Backend that records requests and fails or stalls on chosen windows
    #[derive(Default)]
    struct ScriptedBackend {
        requested: Mutex<Vec<i64>>,
        fail_at: Option<i64>,
        stall_at: Option<i64>,
    }

    #[async_trait]
    impl ChunkBackend for ScriptedBackend {
        fn backend_id(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self, request: FetchRequest) -> QueryResult<RawData> {
            let start = request.window.start;
            self.requested.lock().push(start);
            if self.stall_at == Some(start) {
                std::future::pending::<()>().await;
            }
            if self.fail_at == Some(start) {
                return Err(QueryError::fetch("backend unavailable"));
            }
            Ok(RawData::new())
        }
    }

    #[tokio::test]
    async fn test_delivers_windows_in_order() {
        let backend = Arc::new(MemoryBackend::new());
        backend.write("cpu", TagSet::new(), [(0, 1.0), (150, 2.0)]);

        let mut fetcher = ChunkFetcher::new(
            backend.clone(),
            vec![BaseQuery::from("cpu")],
            windows(3),
            DEFAULT_FETCH_TIMEOUT,
        );

        let mut starts = Vec::new();
        while let Some(chunk) = fetcher.next_chunk().await {
            starts.push(chunk.unwrap().window.start);
        }
        assert_eq!(starts, vec![0, 100, 200]);
        assert_eq!(backend.fetch_count(), 3);
        assert!(fetcher.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_read_ahead_is_one_window() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut fetcher =
            ChunkFetcher::new(backend.clone(), vec![], windows(5), DEFAULT_FETCH_TIMEOUT);

        let first = fetcher.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.window.start, 0);
        assert!(fetcher.has_in_flight());
        assert_eq!(fetcher.remaining_windows(), 3);

        // Give the read-ahead task time to run; it must not run further ahead
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*backend.requested.lock(), vec![0, 100]);
    }

    #[tokio::test]
    async fn test_failure_stops_further_fetches() {
        let backend = Arc::new(ScriptedBackend {
            fail_at: Some(100),
            ..Default::default()
        });
        let mut fetcher =
            ChunkFetcher::new(backend.clone(), vec![], windows(4), DEFAULT_FETCH_TIMEOUT);

        assert!(fetcher.next_chunk().await.unwrap().is_ok());
        let err = fetcher.next_chunk().await.unwrap().unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::FetchFailed);
        assert!(fetcher.next_chunk().await.is_none());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*backend.requested.lock(), vec![0, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_chunk() {
        let backend = Arc::new(ScriptedBackend {
            stall_at: Some(0),
            ..Default::default()
        });
        let mut fetcher = ChunkFetcher::new(backend, vec![], windows(2), Duration::from_secs(30));

        let err = fetcher.next_chunk().await.unwrap().unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Timeout);
        assert!(fetcher.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_window_list() {
        let backend = Arc::new(MemoryBackend::new());
        let mut fetcher = ChunkFetcher::new(backend.clone(), vec![], vec![], DEFAULT_FETCH_TIMEOUT);
        assert!(fetcher.next_chunk().await.is_none());
        assert_eq!(backend.fetch_count(), 0);
    }
}
