//! HTTP server: the listener side of the bus.
//!
//! # Responsibilities
//! - Accept connections and serve each with hyper HTTP/1
//! - Turn every request into a `DispatchContext` and publish it
//! - Wait for a route to answer, abort, or give up
//! - Drain in-flight connections on shutdown
//!
//! # Outcomes per request
//! - a pipeline ends the response → that response is returned
//! - a pipeline aborts → the service errors and hyper closes the connection
//! - every copy of the context is dropped unanswered → `404 Not Found`,
//!   unless reading the body failed, which closes the connection
//! - nothing happens within `timeouts.request_secs` → connection closed

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::bus::EventBus;
use crate::config::ServerConfig;
use crate::http::request::{BodyError, RequestBody, RequestHead, RequestId, X_REQUEST_ID};
use crate::http::response::{ChannelSink, Outcome, ResponseHandle};
use crate::net::{ConnectionGuard, ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::pipeline::DispatchContext;

/// Why an exchange ended without a response.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("request {request_id} was aborted by its pipeline")]
    Aborted { request_id: RequestId },
    #[error("request {request_id} body could not be read: {source}")]
    Body {
        request_id: RequestId,
        #[source]
        source: BodyError,
    },
    #[error("request {request_id} got no response within {after:?}")]
    TimedOut {
        request_id: RequestId,
        after: Duration,
    },
}

/// Per-request work shared by every connection.
struct Exchange {
    bus: Arc<EventBus>,
    request_timeout: Duration,
    body_limit: usize,
}

impl Exchange {
    async fn handle(
        &self,
        request: Request<Incoming>,
        peer: SocketAddr,
    ) -> Result<Response<Full<Bytes>>, ExchangeError> {
        let (parts, incoming) = request.into_parts();
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        let head = RequestHead {
            method: parts.method,
            target,
            version: parts.version,
            headers: parts.headers,
            remote_addr: Some(peer),
        };
        let body = RequestBody::from_incoming(incoming, self.body_limit);
        let (sink, outcome) = ChannelSink::new();
        let ctx = DispatchContext::new(head, body.clone(), ResponseHandle::new(sink));
        let request_id = ctx.request_id();

        tracing::debug!(
            request_id = %request_id,
            method = %ctx.method(),
            path = %ctx.target(),
            peer_addr = %peer,
            "Request received"
        );

        let delivered = self.bus.publish(ctx);
        tracing::trace!(request_id = %request_id, subscribers = delivered, "Request published");

        match tokio::time::timeout(self.request_timeout, outcome).await {
            Ok(Ok(Outcome::Respond(response))) => {
                tracing::debug!(
                    request_id = %request_id,
                    status = response.status().as_u16(),
                    "Response sent"
                );
                Ok(response)
            }
            Ok(Ok(Outcome::Abort)) => {
                tracing::debug!(request_id = %request_id, "Exchange aborted");
                Err(ExchangeError::Aborted { request_id })
            }
            Ok(Err(_)) => match body.failure() {
                Some(source) => {
                    tracing::debug!(
                        request_id = %request_id,
                        error = %source,
                        "Request body failed, closing connection"
                    );
                    Err(ExchangeError::Body { request_id, source })
                }
                None => {
                    tracing::debug!(request_id = %request_id, "No route answered");
                    Ok(not_found(request_id))
                }
            },
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    timeout_secs = self.request_timeout.as_secs(),
                    "Request timed out"
                );
                Err(ExchangeError::TimedOut {
                    request_id,
                    after: self.request_timeout,
                })
            }
        }
    }
}

fn not_found(request_id: RequestId) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Not Found")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert(X_REQUEST_ID, value);
    }
    response
}

/// HTTP server feeding an [`EventBus`].
pub struct HttpServer {
    exchange: Arc<Exchange>,
    bus: Arc<EventBus>,
    tracker: ConnectionTracker,
    shutdown_grace: Duration,
}

impl HttpServer {
    pub fn new(bus: Arc<EventBus>, config: ServerConfig) -> Self {
        let exchange = Arc::new(Exchange {
            bus: Arc::clone(&bus),
            request_timeout: config.timeouts.request(),
            body_limit: config.limits.max_body_bytes,
        });
        Self {
            exchange,
            bus,
            tracker: ConnectionTracker::new(),
            shutdown_grace: config.timeouts.shutdown_grace(),
        }
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(address = %listener.local_addr(), "HTTP server starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        tokio::spawn(serve_connection(
                            stream,
                            peer,
                            Arc::clone(&self.exchange),
                            shutdown.resubscribe(),
                            permit,
                            guard,
                        ));
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }
        drop(listener);

        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active, "Draining connections");
        }
        if !self.tracker.drain(self.shutdown_grace).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Shutdown grace period elapsed with connections still open"
            );
        }

        self.bus.close();
        tracing::info!("HTTP server stopped");
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    exchange: Arc<Exchange>,
    mut shutdown: broadcast::Receiver<()>,
    _permit: ConnectionPermit,
    guard: ConnectionGuard,
) {
    let connection_id = guard.id();
    let service = service_fn(move |request| {
        let exchange = Arc::clone(&exchange);
        async move { exchange.handle(request, peer).await }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let mut draining = false;
    let result = loop {
        tokio::select! {
            result = connection.as_mut() => break result,
            _ = shutdown.recv(), if !draining => {
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(e) = result {
        tracing::debug!(
            connection_id = %connection_id,
            peer_addr = %peer,
            error = %e,
            "Connection closed with error"
        );
    }
}
