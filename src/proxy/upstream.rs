//! Upstream transport
//!
//! The proxy talks to the upstream through the [`Upstream`] trait so the
//! forwarding rules can be exercised without a network. [`HttpUpstream`] is
//! the real transport, built on a pooled reqwest client.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt, stream};
use reqwest::header::{HeaderName, HeaderValue};
use std::time::Duration;
use tokio::time::timeout;

use crate::http::headers::Headers;
use crate::http::request::Method;
use crate::http::response::{Body, StatusCode};
use crate::proxy::error::ForwardError;

/// Exactly what is sent upstream.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Absolute target URL
    pub url: String,
    pub headers: Headers,
    /// `None` both when the method carries no body and when the caller's
    /// body was empty.
    pub body: Option<Bytes>,
}

/// Upstream status line and headers, with the body still in flight.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Body,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send one request; resolves once the upstream has answered with headers.
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, ForwardError>;
}

/// reqwest-backed transport.
///
/// gzip, brotli, zstd and deflate response bodies are decoded by the client,
/// which is why the relayed response drops `content-encoding`. The client
/// advertises exactly those codings upstream in place of the caller's
/// `Accept-Encoding`.
pub struct HttpUpstream {
    client: reqwest::Client,

    /// Time allowed until the upstream response headers arrive
    request_timeout: Duration,
}

impl HttpUpstream {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            request_timeout,
        })
    }

    fn to_reqwest_method(method: Method) -> reqwest::Method {
        match method {
            Method::GET => reqwest::Method::GET,
            Method::HEAD => reqwest::Method::HEAD,
            Method::POST => reqwest::Method::POST,
            Method::PUT => reqwest::Method::PUT,
            Method::PATCH => reqwest::Method::PATCH,
            Method::DELETE => reqwest::Method::DELETE,
            Method::OPTIONS => reqwest::Method::OPTIONS,
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, ForwardError> {
        let method = request.method;
        let mut builder = self
            .client
            .request(Self::to_reqwest_method(request.method), &request.url);

        for (name, value) in request.headers.iter() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => tracing::warn!(header = %name, "Skipping header that cannot be forwarded"),
            }
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = timeout(self.request_timeout, builder.send())
            .await
            .map_err(|_| ForwardError::Timeout)??;

        let status = StatusCode::from_u16(response.status().as_u16())
            .ok_or_else(|| ForwardError::Transport("invalid upstream status".to_string()))?;

        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| match value.to_str() {
                Ok(v) => Some((name.as_str().to_string(), v.to_string())),
                Err(_) => {
                    tracing::debug!(header = %name, "Dropping non-text upstream header");
                    None
                }
            })
            .collect();

        if method != Method::HEAD && !status.forbids_body() {
            if let Some(coding) = undecoded_coding(&headers) {
                return Err(ForwardError::Transport(format!(
                    "upstream answered with unsupported content-encoding {:?}",
                    coding
                )));
            }
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);

        Ok(UpstreamResponse {
            status,
            headers,
            body: Body::Stream(Box::pin(stream)),
        })
    }
}

/// A content coding still applied to the body after the client's decoding.
fn undecoded_coding(headers: &Headers) -> Option<&str> {
    headers
        .get_all("Content-Encoding")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .find(|c| !c.is_empty() && !c.eq_ignore_ascii_case("identity"))
}

/// End a streamed body with a `TimedOut` error once the upstream has sent
/// nothing for `idle`.
pub fn with_idle_timeout(body: Body, idle: Duration) -> Body {
    let chunks = match body {
        Body::Stream(chunks) => chunks,
        other => return other,
    };

    let limited = stream::unfold(Some(chunks), move |state| async move {
        let Some(mut chunks) = state else {
            return None;
        };
        match timeout(idle, chunks.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(chunks))),
            Ok(None) => None,
            Err(_) => {
                let stalled = std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "upstream body stalled",
                );
                Some((Err(stalled), None))
            }
        }
    });

    Body::Stream(Box::pin(limited))
}
