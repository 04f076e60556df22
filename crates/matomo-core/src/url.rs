use regex::Regex;
use ::url::form_urlencoded;

/// True when `url` matches at least one of `patterns`.
pub fn matches_any_pattern(url: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|p| p.is_match(url))
}

/// Drops everything from the first `#`.
pub fn strip_hash(url: &str) -> &str {
    match url.split_once('#') {
        Some((before, _)) => before,
        None => url,
    }
}

/// Path without query string or fragment: cut at the first `?`, then at the
/// first `#`.
pub fn clean_url_path(url: &str) -> &str {
    let before_query = url.split('?').next().unwrap_or(url);
    strip_hash(before_query)
}

/// `pathname` joined with `query` when the query is non-empty.
pub fn join_url(pathname: &str, query: &str) -> String {
    let query = query.trim_start_matches('?');
    if query.is_empty() {
        pathname.to_string()
    } else {
        format!("{pathname}?{query}")
    }
}

/// Splits a raw route into path and query, ignoring the fragment.
pub fn split_route(route: &str) -> (&str, &str) {
    let without_hash = strip_hash(route);
    match without_hash.split_once('?') {
        Some((path, query)) => (path, query),
        None => (without_hash, ""),
    }
}

/// How a raw route is turned into the URL reported to the collector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlPolicy {
    pub clean_url: bool,
    pub search_routes: Vec<String>,
}

impl UrlPolicy {
    pub fn new(clean_url: bool, search_routes: Vec<String>) -> Self {
        Self {
            clean_url,
            search_routes,
        }
    }

    pub fn is_search_route(&self, path: &str) -> bool {
        self.search_routes
            .iter()
            .any(|route| path.starts_with(route.as_str()))
    }

    /// Search routes keep their query so the keyword survives; everything
    /// else loses the query only when `clean_url` is on. The fragment never
    /// survives.
    pub fn effective_url<'a>(&self, raw: &'a str) -> &'a str {
        if self.clean_url && !self.is_search_route(raw) {
            clean_url_path(raw)
        } else {
            strip_hash(raw)
        }
    }
}

/// Ordered, decoded query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `a=1&b=two`, with or without a leading `?`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim_start_matches('?');
        Self {
            pairs: form_urlencoded::parse(raw.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Form-encoded rendering without the leading `?`.
    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.pairs {
            serializer.append_pair(k, v);
        }
        serializer.finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
