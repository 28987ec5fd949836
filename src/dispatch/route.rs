//! Route registrations and the streams handed back to callers.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{FutureExt, Stream, StreamExt};
use tokio::task::JoinHandle;

use crate::bus::SubscriberId;
use crate::pipeline::{BoxError, ContextStream, DispatchContext, RouteOptions, StagePanic};
use crate::routing::PathMatcher;

/// Identifies one `Server::on` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(pub(crate) u64);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route-{}", self.0)
    }
}

/// What was registered for a route. Lives as long as the server.
#[derive(Debug)]
pub struct RouteRegistration {
    pub id: RouteId,
    pub options: RouteOptions,
    pub matcher: Arc<PathMatcher>,
    /// Stage names in the order a context visits them.
    pub stages: Vec<String>,
    pub subscriber: SubscriberId,
}

/// The contexts that made it through a route's pipeline.
///
/// Stage faults never reach the consumer. A fault raised after the route's
/// pattern matched is logged and closes the request's connection. A fault
/// raised before matching only drops this route's copy of the context, so
/// other routes (or the listener's 404) still decide the response. A panic
/// escaping a stage's stream transform ends this stream only.
pub struct RouteStream {
    route: RouteId,
    url: String,
    inner: ContextStream,
    done: bool,
}

impl RouteStream {
    pub(crate) fn new(route: RouteId, url: String, inner: ContextStream) -> Self {
        Self {
            route,
            url,
            inner,
            done: false,
        }
    }

    pub fn route(&self) -> RouteId {
        self.route
    }

    /// Run `handler` for every context, concurrently, on a spawned task.
    ///
    /// A panicking handler is logged and its request's connection is
    /// closed, unless it already responded.
    pub fn subscribe<F, Fut>(self, handler: F) -> JoinHandle<()>
    where
        F: Fn(DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.try_subscribe(move |ctx| handler(ctx).map(Ok::<(), BoxError>))
    }

    /// Like [`subscribe`](Self::subscribe), for fallible handlers. An error
    /// is treated like a panic.
    pub fn try_subscribe<F, Fut, E>(self, handler: F) -> JoinHandle<()>
    where
        F: Fn(DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let route = self.route;
        tokio::spawn(async move {
            let handler = &handler;
            self.for_each_concurrent(None, |ctx| {
                let response = ctx.response().clone();
                let request_id = ctx.request_id();
                async move {
                    let run = AssertUnwindSafe(async move { handler(ctx).await });
                    let error: BoxError = match run.catch_unwind().await {
                        Ok(Ok(())) => return,
                        Ok(Err(error)) => error.into(),
                        Err(payload) => Box::new(StagePanic::from_payload(payload)),
                    };
                    tracing::error!(
                        route = %route,
                        request_id = %request_id,
                        error = %error,
                        "Handler failed"
                    );
                    response.abort();
                }
            })
            .await;
            tracing::debug!(route = %route, "Route stream ended");
        })
    }
}

impl Stream for RouteStream {
    type Item = DispatchContext;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }

            let polled = panic::catch_unwind(AssertUnwindSafe(|| this.inner.poll_next_unpin(cx)));
            match polled {
                Ok(Poll::Pending) => return Poll::Pending,
                Ok(Poll::Ready(Some(Ok(ctx)))) => return Poll::Ready(Some(ctx)),
                Ok(Poll::Ready(Some(Err(fault)))) if fault.matched() => {
                    tracing::error!(
                        route = %this.route,
                        url = %this.url,
                        stage = %fault.stage,
                        request_id = %fault.request_id,
                        error = %fault.error,
                        "Stage failed, closing connection"
                    );
                    fault.abort_response();
                }
                Ok(Poll::Ready(Some(Err(fault)))) => {
                    tracing::warn!(
                        route = %this.route,
                        url = %this.url,
                        stage = %fault.stage,
                        request_id = %fault.request_id,
                        error = %fault.error,
                        "Stage failed before the route matched, dropping request"
                    );
                }
                Ok(Poll::Ready(None)) => {
                    this.done = true;
                }
                Err(payload) => {
                    tracing::error!(
                        route = %this.route,
                        url = %this.url,
                        error = %StagePanic::from_payload(payload),
                        "Route pipeline panicked, route stream ended"
                    );
                    this.done = true;
                }
            }
        }
    }
}

impl fmt::Debug for RouteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteStream")
            .field("route", &self.route)
            .field("url", &self.url)
            .field("done", &self.done)
            .finish()
    }
}
