//! Courier - API forwarding proxy
//!
//! Forwards requests under a local mount point to a configurable upstream
//! base URL and streams the upstream responses back.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
