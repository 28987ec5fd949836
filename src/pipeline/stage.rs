//! Stages: the unit of composition in a route pipeline.
//!
//! A stage turns one stream of contexts into another. Items are
//! `Result<DispatchContext, StageFault>`: a fault raised upstream flows
//! through every later stage untouched until the route stream reports it.
//!
//! The constructors below lift per-context functions into stages and turn
//! errors and panics inside those functions into faults, so one bad request
//! never takes the route's stream down with it.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::future::{self, FutureExt};
use futures_util::stream::{BoxStream, StreamExt};

use crate::http::request::RequestId;
use crate::http::response::ResponseHandle;
use crate::pipeline::context::DispatchContext;

/// Boxed error returned by stage functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One item of a context stream.
pub type Flow = Result<DispatchContext, StageFault>;

/// Stream of contexts between stages.
pub type ContextStream = BoxStream<'static, Flow>;

/// A stream transform.
pub type Transform = Arc<dyn Fn(ContextStream) -> ContextStream + Send + Sync>;

/// Upper bound on contexts an async stage processes at once, per route.
pub const MAX_IN_FLIGHT: usize = 1024;

/// A stage function panicked.
#[derive(Debug, thiserror::Error)]
#[error("stage panicked: {0}")]
pub struct StagePanic(pub String);

impl StagePanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self(message)
    }
}

/// A failure inside a stage, tied to the request it happened on.
#[derive(Debug, thiserror::Error)]
#[error("stage `{stage}` failed for request {request_id}: {error}")]
pub struct StageFault {
    pub stage: Cow<'static, str>,
    pub request_id: RequestId,
    matched: bool,
    response: ResponseHandle,
    #[source]
    pub error: BoxError,
}

impl StageFault {
    pub fn new(
        stage: impl Into<Cow<'static, str>>,
        ctx: &DispatchContext,
        error: impl Into<BoxError>,
    ) -> Self {
        Self {
            stage: stage.into(),
            request_id: ctx.request_id(),
            matched: ctx.params().is_some(),
            response: ctx.response().clone(),
            error: error.into(),
        }
    }

    /// Whether the route's pattern had already matched the request when the
    /// stage failed. Faults raised earlier belong to no route in particular.
    pub fn matched(&self) -> bool {
        self.matched
    }

    /// Close the faulted request's connection without a response.
    pub fn abort_response(&self) -> bool {
        self.response.abort()
    }
}

/// A named stream transform.
#[derive(Clone)]
pub struct Stage {
    name: Cow<'static, str>,
    transform: Transform,
}

impl Stage {
    /// A stage from a raw stream transform.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, transform: F) -> Self
    where
        F: Fn(ContextStream) -> ContextStream + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            transform: Arc::new(transform),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, input: ContextStream) -> ContextStream {
        (self.transform)(input)
    }

    /// Transform each context; `None` drops it from the stream.
    pub fn try_filter_map<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(DispatchContext) -> Result<Option<DispatchContext>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let stage = name.clone();
        let f = Arc::new(f);
        Self::new(name, move |input: ContextStream| {
            let f = Arc::clone(&f);
            let stage = stage.clone();
            input
                .filter_map(move |flow| {
                    let out = match flow {
                        Err(fault) => Some(Err(fault)),
                        Ok(ctx) => {
                            let origin = ctx.clone();
                            match panic::catch_unwind(AssertUnwindSafe(|| f(ctx))) {
                                Ok(Ok(next)) => next.map(Ok),
                                Ok(Err(error)) => {
                                    Some(Err(StageFault::new(stage.clone(), &origin, error)))
                                }
                                Err(payload) => Some(Err(StageFault::new(
                                    stage.clone(),
                                    &origin,
                                    StagePanic::from_payload(payload),
                                ))),
                            }
                        }
                    };
                    future::ready(out)
                })
                .boxed()
        })
    }

    /// Transform each context.
    pub fn map<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(DispatchContext) -> DispatchContext + Send + Sync + 'static,
    {
        Self::try_filter_map(name, move |ctx| Ok(Some(f(ctx))))
    }

    /// Transform each context, faulting on error.
    pub fn try_map<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(DispatchContext) -> Result<DispatchContext, BoxError> + Send + Sync + 'static,
    {
        Self::try_filter_map(name, move |ctx| f(ctx).map(Some))
    }

    /// Keep only contexts for which `predicate` holds.
    pub fn filter<F>(name: impl Into<Cow<'static, str>>, predicate: F) -> Self
    where
        F: Fn(&DispatchContext) -> bool + Send + Sync + 'static,
    {
        Self::try_filter_map(name, move |ctx| Ok(predicate(&ctx).then_some(ctx)))
    }

    /// Transform and filter in one step.
    pub fn filter_map<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(DispatchContext) -> Option<DispatchContext> + Send + Sync + 'static,
    {
        Self::try_filter_map(name, move |ctx| Ok(f(ctx)))
    }

    /// An asynchronous stage.
    ///
    /// Each context gets its own future and up to [`MAX_IN_FLIGHT`] run at
    /// once, so a context waiting on I/O does not hold back the ones behind
    /// it. Output order follows completion, not arrival.
    pub fn then<F, Fut>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<DispatchContext>, BoxError>> + Send + 'static,
    {
        let name = name.into();
        let stage = name.clone();
        let f = Arc::new(f);
        Self::new(name, move |input: ContextStream| {
            let f = Arc::clone(&f);
            let stage = stage.clone();
            input
                .map(move |flow| {
                    let f = Arc::clone(&f);
                    let stage = stage.clone();
                    async move {
                        let ctx = match flow {
                            Ok(ctx) => ctx,
                            Err(fault) => return Some(Err(fault)),
                        };
                        let origin = ctx.clone();
                        let run = AssertUnwindSafe(async move { f(ctx).await });
                        match run.catch_unwind().await {
                            Ok(Ok(next)) => next.map(Ok),
                            Ok(Err(error)) => Some(Err(StageFault::new(stage, &origin, error))),
                            Err(payload) => Some(Err(StageFault::new(
                                stage,
                                &origin,
                                StagePanic::from_payload(payload),
                            ))),
                        }
                    }
                })
                .buffer_unordered(MAX_IN_FLIGHT)
                .filter_map(future::ready)
                .boxed()
        })
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_stream, TestRequest};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Mark(u32);

    async fn run(stage: &Stage, targets: &[&str]) -> Vec<Flow> {
        let contexts = targets
            .iter()
            .map(|t| TestRequest::get(t).build().0)
            .collect();
        stage.apply(context_stream(contexts)).collect().await
    }

    #[tokio::test]
    async fn test_map_and_filter() {
        let stage = Stage::map("mark", |ctx| ctx.with_extension(Mark(7)));
        let out = run(&stage, &["/a"]).await;
        assert_eq!(out[0].as_ref().unwrap().extension::<Mark>(), Some(&Mark(7)));

        let stage = Stage::filter("only-a", |ctx| ctx.target() == "/a");
        let out = run(&stage, &["/a", "/b", "/a"]).await;
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_error_becomes_fault() {
        let stage = Stage::try_map("fails", |ctx| {
            if ctx.target() == "/bad" {
                Err("boom".into())
            } else {
                Ok(ctx)
            }
        });
        let out = run(&stage, &["/ok", "/bad"]).await;
        assert!(out[0].is_ok());
        let fault = out[1].as_ref().unwrap_err();
        assert_eq!(fault.stage, "fails");
        assert_eq!(fault.error.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_panic_becomes_fault() {
        let stage = Stage::map("panics", |ctx| {
            if ctx.target() == "/bad" {
                panic!("stage exploded");
            }
            ctx
        });
        let out = run(&stage, &["/bad", "/ok"]).await;
        let fault = out[0].as_ref().unwrap_err();
        assert!(fault.error.to_string().contains("stage exploded"));
        assert!(out[1].is_ok());
    }

    #[tokio::test]
    async fn test_faults_pass_through_later_stages() {
        let failing = Stage::try_map("first", |_| Err("nope".into()));
        let counting = Stage::map("second", |ctx| ctx.with_extension(Mark(1)));
        let (ctx, recorded) = TestRequest::get("/").build();

        let out: Vec<Flow> = counting
            .apply(failing.apply(context_stream(vec![ctx])))
            .collect()
            .await;
        let fault = out[0].as_ref().unwrap_err();
        assert_eq!(fault.stage, "first");
        assert!(fault.abort_response());
        assert!(recorded.aborted());
    }

    #[test]
    fn test_fault_records_whether_route_matched() {
        let (ctx, _) = TestRequest::get("/7").build();
        assert!(!StageFault::new("early", &ctx, "nope").matched());

        let params = crate::routing::PathMatcher::compile("/:id")
            .unwrap()
            .match_path("/7")
            .unwrap();
        let ctx = ctx.with_params(params);
        assert!(StageFault::new("late", &ctx, "nope").matched());
    }

    #[tokio::test]
    async fn test_then_runs_contexts_concurrently() {
        let stage = Stage::then("sleepy", |ctx: DispatchContext| async move {
            if ctx.target() == "/slow" {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Ok(Some(ctx))
        });

        let out = tokio::time::timeout(Duration::from_secs(2), run(&stage, &["/slow", "/fast"]))
            .await
            .unwrap();
        let order: Vec<_> = out
            .iter()
            .map(|f| f.as_ref().unwrap().target().to_string())
            .collect();
        assert_eq!(order, vec!["/fast", "/slow"]);
    }

    #[tokio::test]
    async fn test_then_panic_becomes_fault() {
        let stage = Stage::then("async-panic", |ctx: DispatchContext| async move {
            if ctx.target() == "/bad" {
                panic!("async stage exploded");
            }
            Ok(Some(ctx))
        });
        let out = run(&stage, &["/bad"]).await;
        assert!(out[0].as_ref().unwrap_err().error.to_string().contains("async stage exploded"));
    }
}
