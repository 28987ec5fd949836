//! Express-style path pattern matching.
//!
//! # Responsibilities
//! - Compile `/:collection/:id` style patterns once, at registration time
//! - Match a request path segment by segment
//! - Extract named captures in declaration order
//!
//! # Design Decisions
//! - Literal segments are case-sensitive
//! - Captures match exactly one non-empty segment, values are not decoded
//! - `/a/` and `/a` are distinct unless the pattern ends with `/?`
//! - A final `:name?` capture is optional
//! - No regex, matching is O(segments)

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Errors raised while compiling a route pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("route pattern `{0}` must start with `/`")]
    MissingLeadingSlash(String),

    #[error("route pattern `{pattern}` has an unnamed capture in segment {index}")]
    EmptyParamName { pattern: String, index: usize },

    #[error("route pattern `{pattern}` has an invalid capture name `{name}`")]
    InvalidParamName { pattern: String, name: String },

    #[error("route pattern `{pattern}` declares `{name}` more than once")]
    DuplicateParam { pattern: String, name: String },

    #[error("route pattern `{pattern}`: optional capture `{name}` must be the last segment")]
    OptionalNotLast { pattern: String, name: String },
}

/// How a trailing `/` on the request path is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailingSlash {
    /// `/a/` and `/a` are different paths.
    #[default]
    Strict,
    /// A single trailing `/` on the path is ignored.
    Optional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param { name: String, optional: bool },
}

/// Named captures extracted from a matched path, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Value captured for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    segments: Vec<Segment>,
    trailing_slash: TrailingSlash,
}

impl PathMatcher {
    /// Compile an express-style pattern such as `/:collection/:id`.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if !pattern.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(pattern.to_string()));
        }

        let (body, trailing_slash) = match pattern.strip_suffix("/?") {
            Some(rest) if !rest.is_empty() => (rest, TrailingSlash::Optional),
            _ => (pattern, TrailingSlash::Strict),
        };

        let raw: Vec<&str> = body[1..].split('/').collect();
        let last = raw.len() - 1;
        let mut segments = Vec::with_capacity(raw.len());

        for (index, part) in raw.iter().enumerate() {
            let Some(capture) = part.strip_prefix(':') else {
                segments.push(Segment::Literal((*part).to_string()));
                continue;
            };

            let (name, optional) = match capture.strip_suffix('?') {
                Some(name) => (name, true),
                None => (capture, false),
            };

            if name.is_empty() {
                return Err(PatternError::EmptyParamName {
                    pattern: pattern.to_string(),
                    index,
                });
            }
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(PatternError::InvalidParamName {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                });
            }
            let duplicate = segments
                .iter()
                .any(|s| matches!(s, Segment::Param { name: existing, .. } if existing == name));
            if duplicate {
                return Err(PatternError::DuplicateParam {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                });
            }
            if optional && index != last {
                return Err(PatternError::OptionalNotLast {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                });
            }

            segments.push(Segment::Param {
                name: name.to_string(),
                optional,
            });
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
            trailing_slash,
        })
    }

    /// The source pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn trailing_slash(&self) -> TrailingSlash {
        self.trailing_slash
    }

    /// Capture names in declaration order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Match `path` and return its captures.
    ///
    /// Anything from the first `?` on is ignored, so a raw request target
    /// can be passed directly.
    pub fn match_path(&self, path: &str) -> Option<Params> {
        let path = path.split_once('?').map_or(path, |(p, _)| p);
        let rest = path.strip_prefix('/')?;

        let mut parts: Vec<&str> = rest.split('/').collect();
        if self.trailing_slash == TrailingSlash::Optional
            && parts.len() > 1
            && parts.last() == Some(&"")
        {
            parts.pop();
        }

        let optional_tail = matches!(
            self.segments.last(),
            Some(Segment::Param { optional: true, .. })
        );
        if optional_tail && parts.len() == self.segments.len() && parts.last() == Some(&"") {
            parts.pop();
        }

        let full = parts.len() == self.segments.len();
        let short = optional_tail && parts.len() + 1 == self.segments.len();
        if !full && !short {
            return None;
        }

        let mut params = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts.iter()) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param { .. } if part.is_empty() => return None,
                Segment::Param { name, .. } => params.push((name.clone(), (*part).to_string())),
            }
        }

        Some(Params(params))
    }
}
