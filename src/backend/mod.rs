//! Backend fetch protocol
//!
//! The pipeline asks a [`ChunkBackend`] for the raw series behind a set of
//! base queries, one window at a time. Backends are shared across
//! executions, so implementations must be `Send + Sync`.

pub mod memory;

pub use memory::MemoryBackend;

use crate::query::error::QueryResult;
use crate::query::window::Window;
use crate::types::{BaseQuery, RawData};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One per-window data request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Base queries to answer
    pub queries: Vec<BaseQuery>,
    /// Window the answer must cover exactly
    pub window: Window,
}

impl FetchRequest {
    /// Create a request for `queries` over `window`
    pub fn new(queries: Vec<BaseQuery>, window: Window) -> Self {
        Self { queries, window }
    }
}

/// Store that answers per-window data requests
#[async_trait]
pub trait ChunkBackend: Send + Sync + 'static {
    /// Unique identifier for this backend
    fn backend_id(&self) -> &str;

    /// Fetch the raw series for every requested query, restricted to
    /// `request.window`
    ///
    /// A query the backend knows nothing about maps to an empty list rather
    /// than an error.
    async fn fetch(&self, request: FetchRequest) -> QueryResult<RawData>;
}
