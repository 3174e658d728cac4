//! Upstream target resolution
//!
//! Turns the configured base URL plus the inbound path segments and query
//! into the absolute URL the request is forwarded to.

use url::Url;

use crate::proxy::error::ForwardError;

/// Where the upstream base URL comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSource {
    /// A value fixed for the lifetime of the handler
    Fixed(String),
    /// An environment variable, re-read on every request
    Env(String),
}

impl TargetSource {
    /// The base URL as currently configured, or `None` when unset or blank.
    pub fn current(&self) -> Option<String> {
        let value = match self {
            TargetSource::Fixed(url) => url.clone(),
            TargetSource::Env(var) => std::env::var(var).ok()?,
        };

        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }
}

/// Strip trailing slashes and the reserved suffix from a base URL.
///
/// The base is parsed first and only its path is touched, so the host is
/// never mistaken for a path segment. A suffix given without a leading slash
/// is treated as if it had one, so `"api"` and `"/api"` behave alike; an
/// empty suffix disables stripping. Any query or fragment on the base is
/// dropped. The result has no trailing slash.
pub fn normalize_base(raw: &str, reserved_suffix: &str) -> Result<String, ForwardError> {
    let raw = raw.trim();
    let mut url = Url::parse(raw).map_err(|e| ForwardError::InvalidTarget {
        target: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ForwardError::InvalidTarget {
            target: raw.to_string(),
            reason: "base URL must be an absolute http(s) URL".to_string(),
        });
    }

    let mut path = url.path().trim_end_matches('/');
    let suffix = reserved_suffix.trim_matches('/');
    if !suffix.is_empty() {
        if let Some(stripped) = path
            .strip_suffix(suffix)
            .and_then(|rest| rest.strip_suffix('/'))
        {
            path = stripped.trim_end_matches('/');
        }
    }

    let path = path.to_string();
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Join path segments with single slashes, dropping empty segments.
pub fn join_segments<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| s.as_ref().trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reject segments a URL parser would resolve or split: `.` and `..` in any
/// spelling, and backslashes, which http(s) URLs treat as `/`.
fn check_segment(segment: &str) -> Result<(), ForwardError> {
    let decoded = segment.replace("%2e", ".").replace("%2E", ".");
    if decoded == "." || decoded == ".." || segment.contains('\\') {
        return Err(ForwardError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

/// Build `<base>/<segments><query>` for a configured base URL.
///
/// `query` is appended unchanged and is expected to carry its leading `?`.
/// The returned URL always stays below the normalized base.
pub fn resolve_target<S: AsRef<str>>(
    base: &str,
    reserved_suffix: &str,
    segments: &[S],
    query: &str,
) -> Result<String, ForwardError> {
    if base.trim().is_empty() {
        return Err(ForwardError::MissingBaseUrl);
    }

    let base = normalize_base(base, reserved_suffix)?;

    for part in segments.iter().flat_map(|s| s.as_ref().split('/')) {
        check_segment(part)?;
    }

    let target = format!("{}/{}{}", base, join_segments(segments), query);

    let url = Url::parse(&target).map_err(|e| ForwardError::InvalidTarget {
        target: target.clone(),
        reason: e.to_string(),
    })?;

    let url = String::from(url);
    if !url.starts_with(&format!("{}/", base)) {
        return Err(ForwardError::InvalidSegment(join_segments(segments)));
    }

    Ok(url)
}
