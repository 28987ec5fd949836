//! The per-request value threaded through a route pipeline.

use std::fmt;
use std::sync::Arc;

use http::{Extensions, HeaderMap, Method};
use serde_json::Value;

use crate::http::request::{RequestBody, RequestHead, RequestId};
use crate::http::response::ResponseHandle;
use crate::http::send::{Payload, Responder, SendError};
use crate::routing::{Params, Query};

/// One request as seen by one route pipeline.
///
/// Stages return updated copies through the `with_*` methods. The request
/// head, body source and response handle are shared with every other
/// subscription observing the same request. `path`, `query`, `params`,
/// `body` and the responder stay `None` until the stage that owns them ran.
#[derive(Clone)]
pub struct DispatchContext {
    request_id: RequestId,
    request: Arc<RequestHead>,
    body_source: RequestBody,
    response: ResponseHandle,
    responder: Option<Responder>,
    path: Option<String>,
    query: Option<Query>,
    params: Option<Params>,
    body: Option<Value>,
    extensions: Extensions,
}

impl DispatchContext {
    pub fn new(head: RequestHead, body_source: RequestBody, response: ResponseHandle) -> Self {
        Self {
            request_id: RequestId::from_headers(&head.headers),
            request: Arc::new(head),
            body_source,
            response,
            responder: None,
            path: None,
            query: None,
            params: None,
            body: None,
            extensions: Extensions::new(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn request(&self) -> &RequestHead {
        &self.request
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    /// Raw request target, path plus query.
    pub fn target(&self) -> &str {
        &self.request.target
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    /// The shared, not yet parsed, body.
    pub fn body_source(&self) -> &RequestBody {
        &self.body_source
    }

    pub fn response(&self) -> &ResponseHandle {
        &self.response
    }

    pub fn responder(&self) -> Option<&Responder> {
        self.responder.as_ref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    pub fn params(&self) -> Option<&Params> {
        self.params.as_ref()
    }

    /// Shorthand for `params().and_then(|p| p.get(name))`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.as_ref().and_then(|p| p.get(name))
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// A value attached by a custom stage.
    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    /// Send the response through the attached responder.
    pub fn send(&self, payload: Payload) -> Result<(), SendError> {
        let responder = self.responder.as_ref().ok_or(SendError::NoResponder {
            request_id: self.request_id,
        })?;
        responder.send(payload)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_extension<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("request_id", &self.request_id)
            .field("method", &self.request.method)
            .field("target", &self.request.target)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("params", &self.params)
            .field("body", &self.body)
            .field("responder", &self.responder.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestRequest;

    #[derive(Debug, Clone, PartialEq)]
    struct Tenant(&'static str);

    #[test]
    fn test_fields_absent_until_set() {
        let (ctx, _) = TestRequest::get("/users/1?x=1").build();
        assert_eq!(ctx.target(), "/users/1?x=1");
        assert_eq!(ctx.method(), Method::GET);
        assert!(ctx.path().is_none());
        assert!(ctx.query().is_none());
        assert!(ctx.params().is_none());
        assert!(ctx.body().is_none());
        assert!(ctx.responder().is_none());
    }

    #[test]
    fn test_copies_share_the_response_handle() {
        let (ctx, _) = TestRequest::get("/").build();
        let copy = ctx.clone().with_body(Value::Null);

        assert!(ctx.body().is_none());
        assert!(copy.body().is_some());
        assert!(copy.response().claim());
        assert!(ctx.response().has_responded());
    }

    #[test]
    fn test_send_without_responder() {
        let (ctx, recorded) = TestRequest::get("/").build();
        let err = ctx.send(Payload::text("hi")).unwrap_err();
        assert!(matches!(err, SendError::NoResponder { .. }));
        assert!(recorded.response().is_none());
    }

    #[test]
    fn test_extensions() {
        let (ctx, _) = TestRequest::get("/").build();
        let ctx = ctx.with_extension(Tenant("acme"));
        assert_eq!(ctx.extension::<Tenant>(), Some(&Tenant("acme")));
        assert_eq!(ctx.extensions().len(), 1);
    }
}
