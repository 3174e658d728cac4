//! Connection state machine tests over in-memory streams

use async_trait::async_trait;
use bytes::Bytes;
use courier::http::connection::Connection;
use courier::proxy::{
    ForwardError, OutboundRequest, ProxyHandler, TargetSource, Upstream, UpstreamResponse,
    UpstreamSettings,
};
use courier::http::response::{Body, StatusCode};
use futures_util::{StreamExt, stream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const MAX_BODY: usize = 1024;

/// Answers every request with a fixed streamed body and records what it got.
struct EchoUpstream {
    calls: AtomicUsize,
    bodies: Mutex<Vec<Option<Bytes>>>,
    content_length: Option<&'static str>,
}

impl EchoUpstream {
    fn new(content_length: Option<&'static str>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
            content_length,
        }
    }
}

#[async_trait]
impl Upstream for EchoUpstream {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, ForwardError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().unwrap().push(request.body);

        let chunks = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"chunk-1;")),
            Ok(Bytes::from_static(b"chunk-2")),
        ]);

        let mut headers: courier::http::headers::Headers =
            [("Content-Type", "text/plain")].into_iter().collect();
        if let Some(len) = self.content_length {
            headers.append("Content-Length", len);
        }

        Ok(UpstreamResponse {
            status: StatusCode::OK,
            headers,
            body: Body::Stream(Box::pin(chunks)),
        })
    }
}

/// Never answers; flags when its in-flight call is dropped.
struct HangingUpstream {
    started: AtomicBool,
    abandoned: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Upstream for HangingUpstream {
    async fn send(&self, _request: OutboundRequest) -> Result<UpstreamResponse, ForwardError> {
        let _flag = DropFlag(self.abandoned.clone());
        self.started.store(true, Ordering::SeqCst);
        std::future::pending::<()>().await;
        unreachable!()
    }
}

fn handler(upstream: Arc<dyn Upstream>) -> Arc<ProxyHandler> {
    let settings = UpstreamSettings {
        source: TargetSource::Fixed("http://upstream.test/api".to_string()),
        reserved_suffix: "/api".to_string(),
    };
    Arc::new(ProxyHandler::new(settings, upstream))
}

fn spawn_connection(
    handler: Arc<ProxyHandler>,
) -> (DuplexStream, tokio::task::JoinHandle<anyhow::Result<()>>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(async move {
        let mut conn = Connection::new(server, handler, MAX_BODY);
        conn.run().await
    });
    (client, task)
}

async fn exchange(handler: Arc<ProxyHandler>, request: &[u8]) -> String {
    let (mut client, task) = spawn_connection(handler);
    client.write_all(request).await.unwrap();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut out))
        .await
        .expect("connection did not close")
        .unwrap();

    drop(client);
    let _ = task.await;
    String::from_utf8_lossy(&out).into_owned()
}

#[tokio::test]
async fn test_streams_upstream_body_until_close() {
    let upstream = Arc::new(EchoUpstream::new(None));
    let out = exchange(
        handler(upstream.clone()),
        b"GET /api/proxy/orders HTTP/1.1\r\nHost: admin\r\n\r\n",
    )
    .await;

    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.contains("Connection: close\r\n"));
    assert!(out.ends_with("\r\n\r\nchunk-1;chunk-2"));
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_keep_alive_serves_pipelined_requests() {
    let upstream = Arc::new(EchoUpstream::new(Some("15")));
    let out = exchange(
        handler(upstream.clone()),
        b"GET /api/proxy/a HTTP/1.1\r\n\r\nGET /api/proxy/b HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    assert_eq!(out.matches("chunk-1;chunk-2").count(), 2);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_head_response_has_no_body() {
    let upstream = Arc::new(EchoUpstream::new(Some("15")));
    let out = exchange(
        handler(upstream),
        b"HEAD /api/proxy/orders HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(out.contains("Content-Length: 15\r\n"));
    assert!(out.ends_with("\r\n\r\n"));
}

#[tokio::test]
async fn test_chunked_request_body_is_decoded() {
    let upstream = Arc::new(EchoUpstream::new(Some("15")));
    exchange(
        handler(upstream.clone()),
        b"POST /api/proxy/orders HTTP/1.1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n4\r\n{\"a\"\r\n3\r\n:1}\r\n0\r\n\r\n",
    )
    .await;

    let bodies = upstream.bodies.lock().unwrap();
    assert_eq!(bodies[0].as_deref(), Some(&b"{\"a\":1}"[..]));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let upstream = Arc::new(EchoUpstream::new(None));
    let out = exchange(
        handler(upstream.clone()),
        b"POST /api/proxy/orders HTTP/1.1\r\nContent-Length: 4096\r\n\r\n",
    )
    .await;

    assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    assert!(out.contains("\"detail\""));
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_request_is_rejected() {
    let upstream = Arc::new(EchoUpstream::new(None));
    let out = exchange(handler(upstream.clone()), b"GET /pot SPDY/3\r\n\r\n").await;

    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_method_is_not_implemented() {
    let upstream = Arc::new(EchoUpstream::new(None));

    for request in [
        &b"TRACE /api/proxy/orders HTTP/1.1\r\n\r\n"[..],
        &b"CONNECT upstream.test:443 HTTP/1.1\r\n\r\n"[..],
    ] {
        let out = exchange(handler(upstream.clone()), request).await;
        assert!(out.starts_with("HTTP/1.1 501 Not Implemented\r\n"), "{out}");
        assert!(out.contains("\"detail\""));
    }

    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_chunked_request_body_arriving_in_pieces() {
    let upstream = Arc::new(EchoUpstream::new(Some("15")));
    let (mut client, task) = spawn_connection(handler(upstream.clone()));

    client
        .write_all(b"POST /api/proxy/upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut expected = Vec::new();
    for i in 0..64u8 {
        let piece = vec![b'a' + i % 26; 8];
        expected.extend_from_slice(&piece);
        client
            .write_all(format!("{:x}\r\n", piece.len()).as_bytes())
            .await
            .unwrap();
        client.write_all(&piece).await.unwrap();
        client.write_all(b"\r\n").await.unwrap();
        tokio::task::yield_now().await;
    }
    client.write_all(b"0\r\n\r\n").await.unwrap();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut out))
        .await
        .expect("connection did not close")
        .unwrap();
    assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.1 200 OK\r\n"));

    drop(client);
    let _ = task.await;
    assert_eq!(
        upstream.bodies.lock().unwrap()[0].as_deref(),
        Some(&expected[..])
    );
}

#[tokio::test]
async fn test_expect_continue_gets_interim_response() {
    let upstream = Arc::new(EchoUpstream::new(Some("15")));
    let (mut client, task) = spawn_connection(handler(upstream.clone()));

    client
        .write_all(b"PUT /api/proxy/users/1 HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut interim = [0u8; 25];
    client.read_exact(&mut interim).await.unwrap();
    assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");

    client.write_all(b"{}").await.unwrap();

    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.1 200 OK\r\n"));

    drop(client);
    let _ = task.await;
    assert_eq!(
        upstream.bodies.lock().unwrap()[0].as_deref(),
        Some(&b"{}"[..])
    );
}

#[tokio::test]
async fn test_caller_disconnect_abandons_upstream_call() {
    let abandoned = Arc::new(AtomicBool::new(false));
    let upstream = Arc::new(HangingUpstream {
        started: AtomicBool::new(false),
        abandoned: abandoned.clone(),
    });
    let (mut client, task) = spawn_connection(handler(upstream.clone()));

    client
        .write_all(b"GET /api/proxy/slow HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    // Wait until the request has reached the upstream
    for _ in 0..100 {
        if upstream.started.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(upstream.started.load(Ordering::SeqCst));

    drop(client);

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("connection kept waiting on upstream")
        .unwrap();

    assert!(result.is_ok());
    assert!(abandoned.load(Ordering::SeqCst));
}

/// Sends its headers and a first chunk, then goes silent.
struct StallingUpstream;

#[async_trait]
impl Upstream for StallingUpstream {
    async fn send(&self, _request: OutboundRequest) -> Result<UpstreamResponse, ForwardError> {
        let chunks = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"partial"))])
            .chain(stream::pending());

        Ok(UpstreamResponse {
            status: StatusCode::OK,
            headers: [("Content-Length", "100")].into_iter().collect(),
            body: Body::Stream(Box::pin(chunks)),
        })
    }
}

#[tokio::test]
async fn test_stalled_upstream_body_releases_caller() {
    let settings = UpstreamSettings {
        source: TargetSource::Fixed("http://upstream.test".to_string()),
        reserved_suffix: "/api".to_string(),
    };
    let handler = Arc::new(
        ProxyHandler::new(settings, Arc::new(StallingUpstream))
            .with_body_idle_timeout(Duration::from_millis(50)),
    );

    let (mut client, task) = spawn_connection(handler);
    client
        .write_all(b"GET /api/proxy/export HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut out))
        .await
        .expect("caller left hanging on a stalled upstream")
        .unwrap();

    let out = String::from_utf8_lossy(&out);
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.ends_with("\r\n\r\npartial"));

    let result = task.await.unwrap();
    assert!(result.is_err());
}
