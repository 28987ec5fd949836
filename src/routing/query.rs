//! Request target splitting.
//!
//! Splits `/path?key=value` into the path and a decoded query map. Repeated
//! keys collapse into a list, in arrival order.

use std::collections::BTreeMap;

use serde::Serialize;

/// A query value: one string, or a list when the key was repeated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Multiple(Vec<String>),
}

impl QueryValue {
    /// The first value for the key.
    pub fn first(&self) -> &str {
        match self {
            QueryValue::Single(value) => value,
            QueryValue::Multiple(values) => values.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// Every value for the key.
    pub fn all(&self) -> Vec<&str> {
        match self {
            QueryValue::Single(value) => vec![value.as_str()],
            QueryValue::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(existing) => {
                let first = std::mem::take(existing);
                *self = QueryValue::Multiple(vec![first, value]);
            }
            QueryValue::Multiple(values) => values.push(value),
        }
    }
}

/// Decoded query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Query(BTreeMap<String, QueryValue>);

impl Query {
    /// Parse a raw query string (without the leading `?`).
    pub fn parse(raw: &str) -> Self {
        let mut map: BTreeMap<String, QueryValue> = BTreeMap::new();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let value = value.into_owned();
            match map.get_mut(key.as_ref()) {
                Some(existing) => existing.push(value),
                None => {
                    map.insert(key.into_owned(), QueryValue::Single(value));
                }
            }
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.0.get(key)
    }

    /// First value for `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(QueryValue::first)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Split a request target into its path and query.
pub fn split_target(target: &str) -> (String, Query) {
    let target = target.split_once('#').map_or(target, |(t, _)| t);
    match target.split_once('?') {
        Some((path, raw)) => (path.to_string(), Query::parse(raw)),
        None => (target.to_string(), Query::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_without_query() {
        let (path, query) = split_target("/users/42");
        assert_eq!(path, "/users/42");
        assert!(query.is_empty());
    }

    #[test]
    fn test_split_with_query() {
        let (path, query) = split_target("/users/42?expand=posts&limit=10");
        assert_eq!(path, "/users/42");
        assert_eq!(query.first("expand"), Some("posts"));
        assert_eq!(query.first("limit"), Some("10"));
        assert_eq!(query.len(), 2);
    }

    #[test]
    fn test_repeated_keys_become_a_list() {
        let (_, query) = split_target("/search?tag=a&tag=b&tag=c&q=x");
        assert_eq!(
            query.get("tag"),
            Some(&QueryValue::Multiple(vec!["a".into(), "b".into(), "c".into()]))
        );
        assert_eq!(query.get("q"), Some(&QueryValue::Single("x".into())));
        assert_eq!(query.get("tag").unwrap().all(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_values_are_decoded() {
        let (_, query) = split_target("/s?name=John+Smith&city=S%C3%A3o%20Paulo&flag");
        assert_eq!(query.first("name"), Some("John Smith"));
        assert_eq!(query.first("city"), Some("São Paulo"));
        assert_eq!(query.first("flag"), Some(""));
    }

    #[test]
    fn test_query_serializes_as_object() {
        let (_, query) = split_target("/s?a=1&b=2&b=3");
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value, serde_json::json!({"a": "1", "b": ["2", "3"]}));
    }

    #[test]
    fn test_fragment_is_ignored() {
        let (path, query) = split_target("/page?x=1#section");
        assert_eq!(path, "/page");
        assert_eq!(query.first("x"), Some("1"));
    }
}
