//! The standard route preprocessors.
//!
//! In the order a context visits them:
//!
//! ```text
//! body-parser → query-splitter → param-extractor → method-filter → response-injector
//! ```
//!
//! Each one is a plain `fn(&RouteOptions) -> Stage`, so callers can
//! recompose them, swap one out, or wrap them with their own stages.

use http::Method;
use serde_json::{Map, Value};

use crate::http::send::Responder;
use crate::pipeline::chain::TransformChain;
use crate::pipeline::context::DispatchContext;
use crate::pipeline::options::{ParseType, RouteOptions};
use crate::pipeline::stage::Stage;
use crate::routing::{split_target, PathMatcher};

pub const BODY_PARSER: &str = "body-parser";
pub const QUERY_SPLITTER: &str = "query-splitter";
pub const PARAM_EXTRACTOR: &str = "param-extractor";
pub const METHOD_FILTER: &str = "method-filter";
pub const RESPONSE_INJECTOR: &str = "response-injector";

/// Builds one stage for a route.
pub type Preprocessor = fn(&RouteOptions) -> Stage;

/// The standard preprocessors, outermost first (composition order).
pub fn standard_preprocessors() -> [Preprocessor; 5] {
    [
        response_injector,
        method_filter,
        param_extractor,
        query_splitter,
        body_parser,
    ]
}

/// `injector ∘ method ∘ params ∘ query ∘ body`.
pub fn standard_pipeline(options: &RouteOptions) -> TransformChain {
    TransformChain::compose(standard_preprocessors().iter().map(|pre| pre(options)))
}

fn expects_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

/// Await the whole body and parse it per the route's parse type.
///
/// `GET` and `HEAD` get an empty object without touching the body.
pub fn body_parser(options: &RouteOptions) -> Stage {
    let parse_type = options.parse_type;
    Stage::then(BODY_PARSER, move |ctx: DispatchContext| async move {
        if !expects_body(ctx.method()) {
            return Ok(Some(ctx.with_body(Value::Object(Map::new()))));
        }

        let raw = ctx.body_source().collect().await?;
        let body = parse_body(parse_type, &raw, &ctx);
        Ok(Some(ctx.with_body(body)))
    })
}

fn parse_body(parse_type: ParseType, raw: &[u8], ctx: &DispatchContext) -> Value {
    match parse_type {
        ParseType::Json => match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(e) => {
                if !raw.is_empty() {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        error = %e,
                        "Body is not valid JSON, passing raw text"
                    );
                }
                Value::String(String::from_utf8_lossy(raw).into_owned())
            }
        },
        ParseType::Text => Value::String(String::from_utf8_lossy(raw).into_owned()),
        ParseType::Form => {
            let fields = url::form_urlencoded::parse(raw)
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect::<Map<_, _>>();
            Value::Object(fields)
        }
    }
}

/// Split the raw target into `path` and `query`.
pub fn query_splitter(_options: &RouteOptions) -> Stage {
    Stage::map(QUERY_SPLITTER, |ctx| {
        let (path, query) = split_target(ctx.target());
        ctx.with_path(path).with_query(query)
    })
}

/// Match the route pattern; contexts that do not match are dropped.
pub fn param_extractor(options: &RouteOptions) -> Stage {
    let matcher = match PathMatcher::compile(&options.url) {
        Ok(matcher) => matcher,
        Err(e) => {
            tracing::error!(url = %options.url, error = %e, "Route pattern does not compile");
            return Stage::try_map(PARAM_EXTRACTOR, move |_| Err(e.clone().into()));
        }
    };

    Stage::filter_map(PARAM_EXTRACTOR, move |ctx| {
        let params = matcher.match_path(ctx.path().unwrap_or_else(|| ctx.target()))?;
        Some(ctx.with_params(params))
    })
}

/// Keep only contexts with the route's method.
pub fn method_filter(options: &RouteOptions) -> Stage {
    let method = options.method.clone();
    Stage::filter(METHOD_FILTER, move |ctx| method.allows(ctx.method()))
}

/// Attach the `send` capability.
pub fn response_injector(_options: &RouteOptions) -> Stage {
    Stage::map(RESPONSE_INJECTOR, |ctx| {
        let responder = Responder::new(ctx.response().clone(), ctx.request_id());
        ctx.with_responder(responder)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{BodyError, RequestBody};
    use crate::http::send::Payload;
    use crate::pipeline::stage::Flow;
    use crate::testing::{context_stream, TestRequest};
    use futures_util::{stream, StreamExt};
    use serde_json::json;
    use std::time::Duration;

    async fn run(options: &RouteOptions, contexts: Vec<DispatchContext>) -> Vec<DispatchContext> {
        let out: Vec<Flow> = standard_pipeline(options)
            .apply(context_stream(contexts))
            .collect()
            .await;
        out.into_iter().map(|flow| flow.unwrap()).collect()
    }

    #[test]
    fn test_standard_pipeline_order() {
        let chain = standard_pipeline(&RouteOptions::new("/"));
        assert_eq!(
            chain.stage_names(),
            vec![BODY_PARSER, QUERY_SPLITTER, PARAM_EXTRACTOR, METHOD_FILTER, RESPONSE_INJECTOR]
        );
    }

    #[tokio::test]
    async fn test_full_pipeline_shapes_context() {
        let options = RouteOptions::new("/:collection/:id").method("POST");
        let (ctx, recorded) = TestRequest::post("/users/42?expand=posts")
            .body(r#"{"a":1}"#)
            .build();

        let out = run(&options, vec![ctx]).await;
        let ctx = &out[0];
        assert_eq!(ctx.path(), Some("/users/42"));
        assert_eq!(ctx.query().unwrap().first("expand"), Some("posts"));
        assert_eq!(ctx.param("collection"), Some("users"));
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.body(), Some(&json!({"a": 1})));

        ctx.send(Payload::json(json!({"ok": true}))).unwrap();
        assert_eq!(recorded.response().unwrap().body_json(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_malformed_json_falls_back_to_text() {
        let options = RouteOptions::new("/items");
        let (ctx, _) = TestRequest::post("/items").body("{not json").build();
        let out = run(&options, vec![ctx]).await;
        assert_eq!(out[0].body(), Some(&json!("{not json")));
    }

    #[tokio::test]
    async fn test_text_and_form_parse_types() {
        let options = RouteOptions::new("/t").parse_type(ParseType::Text);
        let (ctx, _) = TestRequest::post("/t").body(r#"{"a":1}"#).build();
        assert_eq!(run(&options, vec![ctx]).await[0].body(), Some(&json!(r#"{"a":1}"#)));

        let options = RouteOptions::new("/f").parse_type(ParseType::Form);
        let (ctx, _) = TestRequest::post("/f").body("name=John+Smith&age=30").build();
        assert_eq!(
            run(&options, vec![ctx]).await[0].body(),
            Some(&json!({"name": "John Smith", "age": "30"}))
        );
    }

    #[tokio::test]
    async fn test_get_does_not_wait_for_body() {
        let options = RouteOptions::new("/:id");
        let never = RequestBody::new(stream::pending::<Result<bytes::Bytes, BodyError>>(), 64);
        let (ctx, _) = TestRequest::get("/1").body_source(never.clone()).build();

        let out = tokio::time::timeout(Duration::from_millis(500), run(&options, vec![ctx]))
            .await
            .expect("GET must not block on the body");
        assert_eq!(out[0].body(), Some(&json!({})));
        assert!(!never.is_collected());
    }

    #[tokio::test]
    async fn test_method_filter() {
        let options = RouteOptions::new("/:id").method("get");
        let (get, _) = TestRequest::get("/1").build();
        let (post, _) = TestRequest::post("/1").build();
        let out = run(&options, vec![get, post]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].method(), Method::GET);
    }

    #[tokio::test]
    async fn test_unmatched_path_is_filtered() {
        let options = RouteOptions::new("/users/:id");
        let (ctx, recorded) = TestRequest::get("/posts/1").build();
        assert!(run(&options, vec![ctx]).await.is_empty());
        assert!(recorded.response().is_none());
        assert!(!recorded.aborted());
    }

    #[tokio::test]
    async fn test_param_extractor_without_splitter_uses_raw_target() {
        let options = RouteOptions::new("/users/:id");
        let chain = TransformChain::compose([param_extractor(&options)]);
        let (ctx, _) = TestRequest::get("/users/7?x=1").build();
        let out: Vec<Flow> = chain.apply(context_stream(vec![ctx])).collect().await;
        assert_eq!(out[0].as_ref().unwrap().param("id"), Some("7"));
    }

    #[tokio::test]
    async fn test_bad_pattern_faults() {
        let options = RouteOptions::new("no-slash");
        let chain = TransformChain::compose([param_extractor(&options)]);
        let (ctx, _) = TestRequest::get("/x").build();
        let out: Vec<Flow> = chain.apply(context_stream(vec![ctx])).collect().await;
        assert_eq!(out[0].as_ref().unwrap_err().stage, PARAM_EXTRACTOR);
    }

    #[tokio::test]
    async fn test_body_read_failure_is_a_fault() {
        let options = RouteOptions::new("/upload");
        let body = RequestBody::new(
            stream::iter(vec![Ok(bytes::Bytes::from_static(b"0123456789"))]),
            4,
        );
        let (ctx, _) = TestRequest::post("/upload").body_source(body).build();
        let out: Vec<Flow> = standard_pipeline(&options)
            .apply(context_stream(vec![ctx]))
            .collect()
            .await;
        let fault = out[0].as_ref().unwrap_err();
        assert_eq!(fault.stage, BODY_PARSER);
        assert!(fault.error.to_string().contains("limit"));
    }
}
