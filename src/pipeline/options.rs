//! Route registration options.

use std::fmt;
use std::str::FromStr;

use http::Method;

/// Which methods a route accepts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MethodSpec {
    /// `*`: every method.
    #[default]
    Any,
    /// One method, compared case-insensitively.
    Only(String),
}

impl MethodSpec {
    pub fn allows(&self, method: &Method) -> bool {
        match self {
            MethodSpec::Any => true,
            MethodSpec::Only(expected) => method.as_str().eq_ignore_ascii_case(expected),
        }
    }
}

impl From<&str> for MethodSpec {
    fn from(value: &str) -> Self {
        match value.trim() {
            "*" | "" => MethodSpec::Any,
            other => MethodSpec::Only(other.to_ascii_uppercase()),
        }
    }
}

impl From<Method> for MethodSpec {
    fn from(value: Method) -> Self {
        MethodSpec::Only(value.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodSpec::Any => f.write_str("*"),
            MethodSpec::Only(method) => f.write_str(method),
        }
    }
}

/// How the body parser interprets a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseType {
    /// JSON; falls back to the raw text when the body is not valid JSON.
    #[default]
    Json,
    /// UTF-8 text (lossy).
    Text,
    /// `application/x-www-form-urlencoded`, parsed into an object.
    Form,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown parse type `{0}` (expected json, text or form)")]
pub struct UnknownParseType(pub String);

impl FromStr for ParseType {
    type Err = UnknownParseType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ParseType::Json),
            "text" => Ok(ParseType::Text),
            "form" | "urlencoded" => Ok(ParseType::Form),
            _ => Err(UnknownParseType(s.to_string())),
        }
    }
}

impl fmt::Display for ParseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParseType::Json => "json",
            ParseType::Text => "text",
            ParseType::Form => "form",
        })
    }
}

/// What a route listens for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOptions {
    /// Express-style pattern, e.g. `/:collection/:id`.
    pub url: String,
    /// Method to accept, `*` by default.
    pub method: MethodSpec,
    /// Body interpretation, JSON by default.
    pub parse_type: ParseType,
}

impl RouteOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: MethodSpec::Any,
            parse_type: ParseType::Json,
        }
    }

    pub fn method(mut self, method: impl Into<MethodSpec>) -> Self {
        self.method = method.into();
        self
    }

    pub fn parse_type(mut self, parse_type: ParseType) -> Self {
        self.parse_type = parse_type;
        self
    }
}
