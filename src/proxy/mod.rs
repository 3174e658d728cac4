//! Forwarding proxy
//!
//! Resolves the upstream target for each request, rewrites headers and body,
//! sends it through an [`Upstream`] transport and relays the answer.

pub mod error;
pub mod handler;
pub mod headers;
pub mod target;
pub mod upstream;

pub use error::ForwardError;
pub use handler::{ForwardRequest, ProxyHandler, UpstreamSettings};
pub use target::TargetSource;
pub use upstream::{HttpUpstream, OutboundRequest, Upstream, UpstreamResponse};
