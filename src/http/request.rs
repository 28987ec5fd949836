//! Request-side types handed to route pipelines.
//!
//! # Responsibilities
//! - Assign a request ID (reuse a valid inbound `x-request-id`)
//! - Carry the immutable request head shared by every subscription
//! - Expose the body as a stream of chunks that is read at most once
//!
//! # Design Decisions
//! - The head and body are `Arc`-shared: every route observing the same
//!   request sees the same connection-backed data
//! - The first reader drains the chunk stream; everyone else awaits the
//!   same cached result
//! - Body size limit enforced while accumulating, before parsing

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use futures_util::Stream;
use http::{HeaderMap, Method, Version};
use http_body_util::BodyExt;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Request ID header name.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Unique identifier for a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Reuse the inbound `x-request-id` when it holds a UUID, otherwise
    /// generate a fresh one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .map(Self)
            .unwrap_or_default()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The parsed request line and headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Raw request target, path and query (`/users/42?expand=posts`).
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestHead {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            remote_addr: None,
        }
    }
}

/// Errors produced while reading a request body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    #[error("request body exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Read(String),

    #[error("request body stream was already taken")]
    Consumed,
}

/// Stream of raw body chunks.
pub type ChunkStream = BoxStream<'static, Result<Bytes, BodyError>>;

/// Default body limit when none is configured.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

struct BodyState {
    chunks: Mutex<Option<ChunkStream>>,
    collected: OnceCell<Result<Bytes, BodyError>>,
    limit: usize,
}

/// Shared handle to a request body.
///
/// Cloning is cheap. `collect` drains the underlying chunks exactly once, no
/// matter how many pipelines ask for the body.
#[derive(Clone)]
pub struct RequestBody {
    inner: Arc<BodyState>,
}

impl RequestBody {
    /// Wrap a stream of chunks, enforcing `limit` bytes in total.
    pub fn new<S>(chunks: S, limit: usize) -> Self
    where
        S: Stream<Item = Result<Bytes, BodyError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(BodyState {
                chunks: Mutex::new(Some(chunks.boxed())),
                collected: OnceCell::new(),
                limit,
            }),
        }
    }

    /// A body with no content.
    pub fn empty() -> Self {
        Self::new(stream::empty(), DEFAULT_BODY_LIMIT)
    }

    /// A body that is already fully available.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let limit = bytes.len().max(DEFAULT_BODY_LIMIT);
        Self::new(stream::iter([Ok(bytes)]), limit)
    }

    /// Wrap a hyper request body.
    pub(crate) fn from_incoming(incoming: hyper::body::Incoming, limit: usize) -> Self {
        let chunks = TryStreamExt::map_err(incoming.into_data_stream(), |e| {
            BodyError::Read(e.to_string())
        });
        Self::new(chunks, limit)
    }

    /// Whether the body has already been read to completion (or failed).
    pub fn is_collected(&self) -> bool {
        self.inner.collected.initialized()
    }

    /// The error a finished read ended with, if any.
    pub fn failure(&self) -> Option<BodyError> {
        self.inner.collected.get()?.as_ref().err().cloned()
    }

    /// Await the complete body.
    pub async fn collect(&self) -> Result<Bytes, BodyError> {
        self.inner
            .collected
            .get_or_init(|| self.read_to_end())
            .await
            .clone()
    }

    async fn read_to_end(&self) -> Result<Bytes, BodyError> {
        let taken = self
            .inner
            .chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut chunks) = taken else {
            return Err(BodyError::Consumed);
        };

        let limit = self.inner.limit;
        let mut buf = BytesMut::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > limit {
                return Err(BodyError::TooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }

        tracing::trace!(bytes = buf.len(), "Request body collected");
        Ok(buf.freeze())
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("limit", &self.inner.limit)
            .field("collected", &self.is_collected())
            .finish()
    }
}
