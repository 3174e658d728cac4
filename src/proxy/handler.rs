//! Request routing and forwarding
//!
//! [`ProxyHandler`] routes inbound requests: `/health` is answered locally,
//! paths under the mount point are forwarded upstream, anything else is 404.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, UpstreamConfig};
use crate::http::headers::Headers;
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::proxy::error::ForwardError;
use crate::proxy::headers::{outbound_request_headers, relayed_response_headers};
use crate::proxy::target::{TargetSource, resolve_target};
use crate::proxy::upstream::{HttpUpstream, OutboundRequest, Upstream, with_idle_timeout};

/// One inbound call, reduced to what forwarding needs.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// Path below the mount point, split on `/`
    pub segments: Vec<String>,
    /// Raw query string including its leading `?`, or empty
    pub query: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl ForwardRequest {
    pub fn new(segments: Vec<String>) -> Self {
        Self {
            segments,
            query: String::new(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Settings the handler is constructed with.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub source: TargetSource,
    pub reserved_suffix: String,
}

impl From<&UpstreamConfig> for UpstreamSettings {
    fn from(cfg: &UpstreamConfig) -> Self {
        Self {
            source: cfg.target_source(),
            reserved_suffix: cfg.reserved_suffix.clone(),
        }
    }
}

/// Forwards requests to the configured upstream.
///
/// Holds no per-request state, so one instance is shared by every connection.
pub struct ProxyHandler {
    settings: UpstreamSettings,
    upstream: Arc<dyn Upstream>,
    mount_path: String,
    /// Longest silence tolerated between upstream body chunks
    body_idle_timeout: Duration,
}

impl ProxyHandler {
    pub fn new(settings: UpstreamSettings, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            settings,
            upstream,
            mount_path: "/api/proxy".to_string(),
            body_idle_timeout: Duration::from_secs(30),
        }
    }

    /// Build a handler with the reqwest transport from full configuration.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let upstream = HttpUpstream::new(
            cfg.upstream.connect_timeout(),
            cfg.upstream.request_timeout(),
        )?;

        Ok(Self::new(UpstreamSettings::from(&cfg.upstream), Arc::new(upstream))
            .with_mount_path(&cfg.server.mount_path)
            .with_body_idle_timeout(cfg.upstream.body_idle_timeout()))
    }

    pub fn with_mount_path(mut self, mount_path: &str) -> Self {
        self.mount_path = format!("/{}", mount_path.trim_matches('/'));
        self
    }

    pub fn with_body_idle_timeout(mut self, idle: Duration) -> Self {
        self.body_idle_timeout = idle;
        self
    }

    /// Route an inbound request.
    pub async fn handle(&self, request: Request) -> Response {
        let path = request.path();

        if path == "/health" && matches!(request.method, Method::GET | Method::HEAD) {
            return Response::ok("OK");
        }

        let Some(segments) = self.mounted_segments(path) else {
            tracing::debug!(method = %request.method, path = %path, "No route");
            return Response::not_found();
        };

        let forward = ForwardRequest {
            segments,
            query: request.query().to_string(),
            headers: request.headers,
            body: request.body,
        };

        self.dispatch(request.method, forward).await
    }

    /// Segments below the mount point; `None` if the path is not under it
    /// or names no segment at all.
    fn mounted_segments(&self, path: &str) -> Option<Vec<String>> {
        let rest = path.strip_prefix(self.mount_path.as_str())?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }

        let segments: Vec<String> = rest
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        (!segments.is_empty()).then_some(segments)
    }

    pub async fn dispatch(&self, method: Method, request: ForwardRequest) -> Response {
        match method {
            Method::GET => self.get(request).await,
            Method::HEAD => self.head(request).await,
            Method::POST => self.post(request).await,
            Method::PUT => self.put(request).await,
            Method::PATCH => self.patch(request).await,
            Method::DELETE => self.delete(request).await,
            Method::OPTIONS => self.options(request).await,
        }
    }

    pub async fn get(&self, request: ForwardRequest) -> Response {
        self.forward(Method::GET, request).await
    }

    pub async fn head(&self, request: ForwardRequest) -> Response {
        self.forward(Method::HEAD, request).await
    }

    pub async fn post(&self, request: ForwardRequest) -> Response {
        self.forward(Method::POST, request).await
    }

    pub async fn put(&self, request: ForwardRequest) -> Response {
        self.forward(Method::PUT, request).await
    }

    pub async fn patch(&self, request: ForwardRequest) -> Response {
        self.forward(Method::PATCH, request).await
    }

    pub async fn delete(&self, request: ForwardRequest) -> Response {
        self.forward(Method::DELETE, request).await
    }

    pub async fn options(&self, request: ForwardRequest) -> Response {
        self.forward(Method::OPTIONS, request).await
    }

    /// Forward one request and relay whatever the upstream answers.
    ///
    /// Errors never escape: they become `{"detail": ...}` responses.
    pub async fn forward(&self, method: Method, request: ForwardRequest) -> Response {
        match self.try_forward(method, request).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_config() {
                    tracing::error!(method = %method, error = %e, "Cannot forward request");
                } else {
                    tracing::warn!(method = %method, error = %e, "Upstream request failed");
                }
                e.into_response()
            }
        }
    }

    async fn try_forward(
        &self,
        method: Method,
        request: ForwardRequest,
    ) -> Result<Response, ForwardError> {
        let outbound = self.prepare(method, request)?;
        let url = outbound.url.clone();

        tracing::debug!(method = %method, target = %url, "Forwarding request");

        let upstream = self.upstream.send(outbound).await?;

        tracing::info!(
            method = %method,
            target = %url,
            status = upstream.status.as_u16(),
            "Request forwarded"
        );

        Ok(Response {
            status: upstream.status,
            headers: relayed_response_headers(&upstream.headers),
            body: with_idle_timeout(upstream.body, self.body_idle_timeout),
        })
    }

    /// Build the outbound request without touching the network.
    pub fn prepare(
        &self,
        method: Method,
        request: ForwardRequest,
    ) -> Result<OutboundRequest, ForwardError> {
        let base = self
            .settings
            .source
            .current()
            .ok_or(ForwardError::MissingBaseUrl)?;

        let url = resolve_target(
            &base,
            &self.settings.reserved_suffix,
            &request.segments,
            &request.query,
        )?;

        // Zero-length and absent bodies are equivalent upstream.
        let body = if method.permits_body() && !request.body.is_empty() {
            Some(request.body)
        } else {
            None
        };

        Ok(OutboundRequest {
            method,
            url,
            headers: outbound_request_headers(&request.headers),
            body,
        })
    }
}

impl std::fmt::Debug for ProxyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyHandler")
            .field("settings", &self.settings)
            .field("mount_path", &self.mount_path)
            .field("body_idle_timeout", &self.body_idle_timeout)
            .finish()
    }
}
