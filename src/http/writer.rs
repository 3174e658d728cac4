use anyhow::Context;
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::headers::Headers;
use crate::http::response::{Body, Response, StatusCode};

const HTTP_VERSION: &str = "HTTP/1.1";

/// How many body bytes follow the head on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// No body bytes are written (HEAD, 1xx, 204, 304)
    Suppressed,
    Length(u64),
    /// Body runs until the connection closes
    UntilClose,
}

fn serialize_head(status: StatusCode, headers: &Headers) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    for (k, v) in headers.iter() {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    buf
}

/// Serializes a response head and streams its body to the caller.
///
/// The writer owns connection-level headers: any `Connection`/`Keep-Alive`
/// values on the response are replaced by what this hop actually does.
/// Bodies without a declared length are close-delimited; no
/// transfer-encoding is ever added.
pub struct ResponseWriter {
    head: Vec<u8>,
    body: Body,
    framing: Framing,
    keep_alive: bool,
}

impl ResponseWriter {
    /// `head_only` is set for responses to HEAD requests.
    pub fn new(response: Response, head_only: bool, keep_alive: bool) -> Self {
        let Response {
            status,
            mut headers,
            body,
        } = response;

        headers.remove("Connection");
        headers.remove("Keep-Alive");

        let declared = headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok());

        let framing = if head_only || status.forbids_body() {
            Framing::Suppressed
        } else if let Some(len) = declared {
            Framing::Length(len)
        } else {
            match &body {
                Body::Empty => {
                    headers.insert("Content-Length", "0");
                    Framing::Length(0)
                }
                Body::Full(bytes) => {
                    headers.insert("Content-Length", bytes.len().to_string());
                    Framing::Length(bytes.len() as u64)
                }
                Body::Stream(_) => Framing::UntilClose,
            }
        };

        let keep_alive = keep_alive && framing != Framing::UntilClose;
        if !keep_alive {
            headers.insert("Connection", "close");
        }

        Self {
            head: serialize_head(status, &headers),
            body,
            framing,
            keep_alive,
        }
    }

    /// Whether the connection can serve another request afterwards.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Write the head, then relay the body one chunk at a time.
    ///
    /// Each chunk is fully written before the next one is pulled, so a slow
    /// caller throttles the upstream instead of growing a buffer.
    pub async fn write_to_stream<W>(self, stream: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        stream
            .write_all(&self.head)
            .await
            .context("connection closed while writing head")?;

        let remaining = match self.framing {
            Framing::Suppressed => {
                stream.flush().await?;
                return Ok(());
            }
            Framing::Length(n) => Some(n),
            Framing::UntilClose => None,
        };

        match self.body {
            Body::Empty => {}
            Body::Full(bytes) => {
                let len = remaining.map_or(bytes.len(), |n| bytes.len().min(n as usize));
                stream.write_all(&bytes[..len]).await?;
            }
            Body::Stream(mut chunks) => {
                let mut remaining = remaining;

                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk.context("upstream body interrupted")?;
                    let take = match remaining {
                        Some(0) => break,
                        Some(n) => chunk.len().min(n as usize),
                        None => chunk.len(),
                    };

                    stream
                        .write_all(&chunk[..take])
                        .await
                        .context("caller went away while streaming")?;

                    if let Some(n) = remaining.as_mut() {
                        *n -= take as u64;
                    }
                }

                if let Some(short) = remaining.filter(|n| *n > 0) {
                    anyhow::bail!("upstream body ended {} bytes short", short);
                }
            }
        }

        stream.flush().await?;
        Ok(())
    }
}

/// Interim response sent before reading a body announced with `Expect: 100-continue`.
pub async fn write_continue<W>(stream: &mut W) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
    stream.flush().await?;
    Ok(())
}
