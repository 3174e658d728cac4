//! HTTP/1.1 protocol implementation.
//!
//! This module implements the caller-facing side of the proxy: an HTTP/1.1
//! server with keep-alive connections and streamed response bodies.
//!
//! # Architecture
//!
//! - **`connection`**: The per-connection request-response state machine
//! - **`parser`**: Parses request heads and de-frames bodies (Content-Length, chunked)
//! - **`headers`**: Case-insensitive, multi-valued header collection
//! - **`request`**: HTTP request representation and target helpers
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes response heads and streams bodies to the caller
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for a complete request (head + body)
//!        └──────┬──────┘
//!               │ Request received          (malformed → 4xx, close)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Forward upstream, watch for caller disconnect
//!        └──────┬───────────┘
//!               │ Response head ready       (caller gone → Closed)
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Stream the response to the caller
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
