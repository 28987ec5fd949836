//! Test helpers for driving pipelines without a socket.
//!
//! ```rust,ignore
//! let (ctx, recorded) = TestRequest::post("/users/1").body(r#"{"a":1}"#).build();
//! let out = standard_pipeline(&options).apply(context_stream(vec![ctx]));
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::Value;

use crate::http::request::{RequestBody, RequestHead};
use crate::http::response::{ResponseHandle, ResponseSink};
use crate::pipeline::context::DispatchContext;
use crate::pipeline::stage::ContextStream;

/// A response captured by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct RecordedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RecordedResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Default)]
struct RecordedState {
    head: Option<(StatusCode, HeaderMap)>,
    body: Vec<u8>,
    ended: usize,
    aborted: bool,
}

/// Read side of a [`MemorySink`].
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    state: Arc<Mutex<RecordedState>>,
}

impl Recorded {
    fn lock(&self) -> std::sync::MutexGuard<'_, RecordedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The finished response, once `end` was called.
    pub fn response(&self) -> Option<RecordedResponse> {
        let state = self.lock();
        if state.ended == 0 {
            return None;
        }
        let (status, headers) = state.head.clone().unwrap_or((StatusCode::OK, HeaderMap::new()));
        Some(RecordedResponse {
            status,
            headers,
            body: state.body.clone(),
        })
    }

    pub fn end_calls(&self) -> usize {
        self.lock().ended
    }

    pub fn aborted(&self) -> bool {
        self.lock().aborted
    }
}

/// A [`ResponseSink`] that records everything written to it.
#[derive(Debug)]
pub struct MemorySink {
    recorded: Recorded,
}

impl MemorySink {
    pub fn new() -> (Self, Recorded) {
        let recorded = Recorded::default();
        (
            Self {
                recorded: recorded.clone(),
            },
            recorded,
        )
    }
}

impl ResponseSink for MemorySink {
    fn write_head(&mut self, status: StatusCode, headers: HeaderMap) {
        self.recorded.lock().head = Some((status, headers));
    }

    fn write(&mut self, chunk: &[u8]) {
        self.recorded.lock().body.extend_from_slice(chunk);
    }

    fn end(&mut self) {
        self.recorded.lock().ended += 1;
    }

    fn abort(&mut self) {
        self.recorded.lock().aborted = true;
    }
}

/// Builder for a [`DispatchContext`] backed by a [`MemorySink`].
#[derive(Debug)]
pub struct TestRequest {
    head: RequestHead,
    body: Option<RequestBody>,
}

impl TestRequest {
    pub fn new(method: Method, target: &str) -> Self {
        Self {
            head: RequestHead::new(method, target),
            body: None,
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: &str) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.head.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    /// A fully available body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::from_bytes(body));
        self
    }

    /// A custom body source, e.g. one that never completes.
    pub fn body_source(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn build(self) -> (DispatchContext, Recorded) {
        let (sink, recorded) = MemorySink::new();
        let body = self.body.unwrap_or_else(RequestBody::empty);
        let ctx = DispatchContext::new(self.head, body, ResponseHandle::new(sink));
        (ctx, recorded)
    }
}

/// A context stream holding the given contexts.
pub fn context_stream(contexts: Vec<DispatchContext>) -> ContextStream {
    stream::iter(contexts.into_iter().map(Ok)).boxed()
}
