//! Header rewriting between caller and upstream

use crate::http::headers::Headers;

/// Removed from the caller's request; the transport sets its own values.
pub const STRIPPED_REQUEST_HEADERS: [&str; 4] =
    ["host", "connection", "content-length", "accept-encoding"];

/// Removed from the upstream response; the body is re-streamed already decoded.
pub const STRIPPED_RESPONSE_HEADERS: [&str; 2] = ["content-encoding", "transfer-encoding"];

pub fn outbound_request_headers(inbound: &Headers) -> Headers {
    strip(inbound, &STRIPPED_REQUEST_HEADERS)
}

pub fn relayed_response_headers(upstream: &Headers) -> Headers {
    strip(upstream, &STRIPPED_RESPONSE_HEADERS)
}

fn strip(headers: &Headers, names: &[&str]) -> Headers {
    headers
        .iter()
        .filter(|(k, _)| !names.iter().any(|n| k.eq_ignore_ascii_case(n)))
        .collect()
}
