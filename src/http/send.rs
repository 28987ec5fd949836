//! The `send` capability attached to route contexts.
//!
//! # Wire contract
//! - A `code` header (any case) becomes the status line and is not sent;
//!   status defaults to 200
//! - Remaining headers are passed through verbatim
//! - A string body is written as-is; any other JSON value is serialized and
//!   gets `Content-Type: application/json` unless the caller set one
//! - `x-request-id` is echoed unless the caller set one
//!
//! Payloads are validated before the exactly-once slot is taken, so a
//! rejected payload never blocks a later, valid one.

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::http::request::{RequestId, X_REQUEST_ID};
use crate::http::response::ResponseHandle;

/// Errors returned by [`Responder::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("a response for request {request_id} was already sent")]
    AlreadySent { request_id: RequestId },

    #[error("request {request_id} has no responder; the response injector did not run")]
    NoResponder { request_id: RequestId },

    #[error("invalid status code `{0}`")]
    InvalidStatus(String),

    #[error("invalid response header `{name}`")]
    InvalidHeader { name: String },

    #[error("failed to serialize response body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PayloadBody {
    #[default]
    Empty,
    Text(String),
    Json(Value),
}

/// Pseudo-header carrying the response status.
pub const CODE_HEADER: &str = "code";

/// What a handler wants written back to the client.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    headers: Vec<(String, String)>,
    body: PayloadBody,
}

impl Payload {
    /// A `200` with no body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A plain string body, written verbatim.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: PayloadBody::Text(body.into()),
            ..Self::default()
        }
    }

    /// A JSON body.
    pub fn json(body: Value) -> Self {
        Self {
            body: PayloadBody::Json(body),
            ..Self::default()
        }
    }

    /// Any value: strings pass through verbatim, everything else is JSON.
    pub fn body(body: Value) -> Self {
        match body {
            Value::String(text) => Self::text(text),
            other => Self::json(other),
        }
    }

    /// Serialize any `Serialize` value as the body.
    pub fn serialize<T: Serialize>(body: &T) -> Result<Self, SendError> {
        Ok(Self::body(serde_json::to_value(body)?))
    }

    /// Shorthand for `.header("code", code)`.
    pub fn status(self, code: u16) -> Self {
        self.header(CODE_HEADER, code.to_string())
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body_ref(&self) -> &PayloadBody {
        &self.body
    }

    fn encode(self, request_id: RequestId) -> Result<(StatusCode, HeaderMap, Vec<u8>), SendError> {
        let mut status = StatusCode::OK;
        let mut headers = HeaderMap::with_capacity(self.headers.len() + 2);
        for (name, value) in self.headers {
            if name.eq_ignore_ascii_case(CODE_HEADER) {
                status = parse_status(&value)?;
                continue;
            }
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| SendError::InvalidHeader { name: name.clone() })?;
            let header_value =
                HeaderValue::from_str(&value).map_err(|_| SendError::InvalidHeader { name })?;
            headers.append(header_name, header_value);
        }

        let body = match self.body {
            PayloadBody::Empty => Vec::new(),
            PayloadBody::Text(text) => text.into_bytes(),
            PayloadBody::Json(value) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                serde_json::to_vec(&value)?
            }
        };

        if !headers.contains_key(X_REQUEST_ID) {
            if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                headers.insert(X_REQUEST_ID, value);
            }
        }

        Ok((status, headers, body))
    }
}

fn parse_status(value: &str) -> Result<StatusCode, SendError> {
    value
        .trim()
        .parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| SendError::InvalidStatus(value.to_string()))
}

/// Writes one response for one request.
#[derive(Debug, Clone)]
pub struct Responder {
    response: ResponseHandle,
    request_id: RequestId,
}

impl Responder {
    pub fn new(response: ResponseHandle, request_id: RequestId) -> Self {
        Self {
            response,
            request_id,
        }
    }

    /// Write the payload and end the exchange.
    ///
    /// Only the first successful call for a request writes anything; later
    /// calls, from this route or any other, get [`SendError::AlreadySent`].
    pub fn send(&self, payload: Payload) -> Result<(), SendError> {
        let (status, headers, body) = payload.encode(self.request_id)?;

        if !self.response.claim() {
            tracing::warn!(
                request_id = %self.request_id,
                status = status.as_u16(),
                "Response already sent, dropping second send"
            );
            return Err(SendError::AlreadySent {
                request_id: self.request_id,
            });
        }

        let bytes = body.len();
        self.response.with_sink(|sink| {
            sink.write_head(status, headers);
            if !body.is_empty() {
                sink.write(&body);
            }
            sink.end();
        });

        tracing::debug!(
            request_id = %self.request_id,
            status = status.as_u16(),
            bytes,
            "Response sent"
        );
        Ok(())
    }

    pub fn has_responded(&self) -> bool {
        self.response.has_responded()
    }
}
