//! Cache key derivation.
//!
//! The key is the request line sent to the registry: the method plus the path
//! and query string. Parameter order and presence are part of the identity, so
//! two requests for the same list with different filters are cached apart.

use std::fmt;

use axum::http::Method;
use url::form_urlencoded;

/// Upstream request path with an ordered query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamPath {
    path: String,
    params: Vec<(String, String)>,
}

impl UpstreamPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    /// Append `name` only when a non-empty value is present.
    pub fn optional_param(self, name: &str, value: Option<impl fmt::Display>) -> Self {
        match value.map(|value| value.to_string()) {
            Some(value) if !value.is_empty() => self.param(name, value),
            _ => self,
        }
    }

    /// Render `path?k=v&...` with form-urlencoded values.
    pub fn render(&self) -> String {
        if self.params.is_empty() {
            return self.path.clone();
        }

        let mut query = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.params {
            query.append_pair(name, value);
        }
        format!("{}?{}", self.path, query.finish())
    }
}

impl fmt::Display for UpstreamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Deterministic cache identity, rendered as `METHOD:/path?query`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(method: &Method, upstream_path: &str) -> Self {
        Self(format!("{method}:{upstream_path}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn news_path(page: u32, search: Option<&str>) -> String {
        UpstreamPath::new("/api/news")
            .param("page", page)
            .param("limit", 10)
            .param("sort_by", "timestamp")
            .param("order", "desc")
            .optional_param("search", search)
            .render()
    }

    #[test]
    fn derivation_is_idempotent() {
        let first = CacheKey::derive(&Method::GET, &news_path(1, Some("lũ")));
        let second = CacheKey::derive(&Method::GET, &news_path(1, Some("lũ")));
        assert_eq!(first, second);
    }

    #[test]
    fn differing_values_produce_differing_keys() {
        let page_one = CacheKey::derive(&Method::GET, &news_path(1, None));
        let page_two = CacheKey::derive(&Method::GET, &news_path(2, None));
        let filtered = CacheKey::derive(&Method::GET, &news_path(1, Some("mưa")));

        assert_ne!(page_one, page_two);
        assert_ne!(page_one, filtered);
    }

    #[test]
    fn parameter_order_is_part_of_the_identity() {
        let forward = UpstreamPath::new("/api/phones")
            .param("page", 1)
            .param("limit", 5)
            .render();
        let reversed = UpstreamPath::new("/api/phones")
            .param("limit", 5)
            .param("page", 1)
            .render();

        assert_ne!(
            CacheKey::derive(&Method::GET, &forward),
            CacheKey::derive(&Method::GET, &reversed)
        );
    }

    #[test]
    fn method_is_part_of_the_identity() {
        let path = news_path(1, None);
        assert_ne!(
            CacheKey::derive(&Method::GET, &path),
            CacheKey::derive(&Method::HEAD, &path)
        );
    }

    #[test]
    fn renders_request_line_key() {
        let path = UpstreamPath::new("/api/requests")
            .param("page", 1)
            .param("limit", 25)
            .param("sort_by", "default")
            .param("order", "desc")
            .optional_param("status", None::<&str>)
            .optional_param("region", Some("Huế"));

        assert_eq!(
            CacheKey::derive(&Method::GET, &path.render()).as_str(),
            "GET:/api/requests?page=1&limit=25&sort_by=default&order=desc&region=Hu%E1%BA%BF"
        );
    }

    #[test]
    fn empty_optional_values_are_omitted() {
        let path = UpstreamPath::new("/api/news").optional_param("search", Some(""));
        assert_eq!(path.render(), "/api/news");
    }
}
