//! Response-side plumbing between pipelines and the listener.
//!
//! # Responsibilities
//! - Define the writable sink the listener hands to each request
//! - Share one sink between every subscription observing the same request
//! - Guarantee the sink is answered (or aborted) at most once
//!
//! # Design Decisions
//! - The "already responded" flag is sticky and claimed with a CAS, so the
//!   first responder wins even across route pipelines
//! - Dropping every handle without answering lets the listener apply its
//!   own default (404); aborting closes the connection without a response

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Response, StatusCode};
use http_body_util::Full;
use tokio::sync::oneshot;

/// The writable side of one HTTP exchange, provided by the listener.
pub trait ResponseSink: Send + 'static {
    /// Set the status line and headers.
    fn write_head(&mut self, status: StatusCode, headers: HeaderMap);

    /// Append body bytes.
    fn write(&mut self, chunk: &[u8]);

    /// Finish the response and hand it to the connection.
    fn end(&mut self);

    /// Give up on the exchange; the connection is closed without a response.
    fn abort(&mut self) {}
}

struct ResponseState {
    responded: AtomicBool,
    sink: Mutex<Box<dyn ResponseSink>>,
}

/// Shared handle to a request's response sink.
#[derive(Clone)]
pub struct ResponseHandle {
    inner: Arc<ResponseState>,
}

impl ResponseHandle {
    pub fn new(sink: impl ResponseSink) -> Self {
        Self {
            inner: Arc::new(ResponseState {
                responded: AtomicBool::new(false),
                sink: Mutex::new(Box::new(sink)),
            }),
        }
    }

    /// Whether a response was sent or the exchange was aborted.
    pub fn has_responded(&self) -> bool {
        self.inner.responded.load(Ordering::Acquire)
    }

    /// Close the connection without a response, unless something was
    /// already sent. Returns whether this call aborted the exchange.
    pub fn abort(&self) -> bool {
        if !self.claim() {
            return false;
        }
        self.with_sink(|sink| sink.abort());
        true
    }

    /// Take the exactly-once slot. Only the first caller gets `true`.
    pub(crate) fn claim(&self) -> bool {
        self.inner
            .responded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn with_sink<R>(&self, f: impl FnOnce(&mut dyn ResponseSink) -> R) -> R {
        let mut sink = self.inner.sink.lock().unwrap_or_else(PoisonError::into_inner);
        f(sink.as_mut())
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("responded", &self.has_responded())
            .finish()
    }
}

/// What a pipeline decided for an exchange.
#[derive(Debug)]
pub(crate) enum Outcome {
    Respond(Response<Full<Bytes>>),
    Abort,
}

/// Sink that buffers the response and delivers it to the waiting
/// connection task over a oneshot channel.
pub(crate) struct ChannelSink {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    tx: Option<oneshot::Sender<Outcome>>,
}

impl ChannelSink {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            tx: Some(tx),
        };
        (sink, rx)
    }
}

impl ResponseSink for ChannelSink {
    fn write_head(&mut self, status: StatusCode, headers: HeaderMap) {
        self.status = status;
        self.headers = headers;
    }

    fn write(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    fn end(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let body = std::mem::take(&mut self.body).freeze();
        let mut response = Response::new(Full::new(body));
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);
        // The connection may already be gone.
        let _ = tx.send(Outcome::Respond(response));
    }

    fn abort(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Outcome::Abort);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySink;
    use http_body_util::BodyExt;

    #[test]
    fn test_claim_is_exactly_once() {
        let (sink, _recorded) = MemorySink::new();
        let handle = ResponseHandle::new(sink);
        let other = handle.clone();

        assert!(!handle.has_responded());
        assert!(handle.claim());
        assert!(!other.claim());
        assert!(other.has_responded());
    }

    #[test]
    fn test_abort_after_claim_is_noop() {
        let (sink, recorded) = MemorySink::new();
        let handle = ResponseHandle::new(sink);
        assert!(handle.claim());
        assert!(!handle.abort());
        assert!(!recorded.aborted());
    }

    #[test]
    fn test_abort_reaches_sink() {
        let (sink, recorded) = MemorySink::new();
        let handle = ResponseHandle::new(sink);
        assert!(handle.abort());
        assert!(recorded.aborted());
        assert!(handle.has_responded());
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_response() {
        let (mut sink, rx) = ChannelSink::new();
        let mut headers = HeaderMap::new();
        headers.insert("x-test", "1".parse().unwrap());
        sink.write_head(StatusCode::CREATED, headers);
        sink.write(b"hel");
        sink.write(b"lo");
        sink.end();

        let Outcome::Respond(response) = rx.await.unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-test"], "1");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_channel_sink_abort() {
        let (mut sink, rx) = ChannelSink::new();
        sink.abort();
        sink.end();
        assert!(matches!(rx.await.unwrap(), Outcome::Abort));
    }

    #[tokio::test]
    async fn test_dropped_sink_closes_channel() {
        let (sink, rx) = ChannelSink::new();
        drop(ResponseHandle::new(sink));
        assert!(rx.await.is_err());
    }
}
