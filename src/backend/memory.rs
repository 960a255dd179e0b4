//! In-memory backend
//!
//! Keeps every written series in a `RwLock`-guarded map keyed by base query
//! and tag set. Used by the HTTP server and by tests.

use super::{ChunkBackend, FetchRequest};
use crate::query::error::QueryResult;
use crate::types::{BaseQuery, RawData, TagSet, TimeSeries};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Backend serving series held in process memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Series by query, then by tag set
    series: RwLock<HashMap<BaseQuery, BTreeMap<TagSet, TimeSeries>>>,

    /// Number of fetch requests answered
    fetches: AtomicU64,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `points` into the series identified by `query` and `tags`
    ///
    /// Returns the number of points written. Existing samples at the same
    /// timestamp are overwritten.
    pub fn write(
        &self,
        query: impl Into<BaseQuery>,
        tags: TagSet,
        points: impl IntoIterator<Item = (i64, f64)>,
    ) -> usize {
        let mut guard = self.series.write();
        let series = guard
            .entry(query.into())
            .or_default()
            .entry(tags.clone())
            .or_insert_with(|| TimeSeries::new(tags));

        let mut written = 0;
        for (ts, value) in points {
            series.insert(ts, value);
            written += 1;
        }
        written
    }

    /// Number of distinct series stored
    pub fn series_count(&self) -> usize {
        self.series.read().values().map(BTreeMap::len).sum()
    }

    /// Number of fetch requests answered so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChunkBackend for MemoryBackend {
    fn backend_id(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, request: FetchRequest) -> QueryResult<RawData> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let window = request.window;
        let guard = self.series.read();

        let mut data = RawData::with_capacity(request.queries.len());
        for query in request.queries {
            let series: Vec<TimeSeries> = guard
                .get(&query)
                .map(|by_tags| {
                    by_tags
                        .values()
                        .map(|s| s.restrict(window.start, window.end))
                        .collect()
                })
                .unwrap_or_default();
            data.insert(query, series);
        }

        debug!(
            start = window.start,
            end = window.end,
            queries = data.len(),
            "Memory backend answered fetch"
        );
        Ok(data)
    }
}
