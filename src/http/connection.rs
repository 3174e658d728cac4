use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::http::parser::{
    BodyFraming, ChunkedDecoder, ParseError, RequestHead, body_framing, parse_request_head,
};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{ResponseWriter, write_continue};
use crate::proxy::ProxyHandler;

/// Pipelined bytes buffered while a request is in flight before we stop
/// watching the caller socket.
const MAX_PIPELINED: usize = 64 * 1024;

pub struct Connection<S = TcpStream> {
    stream: S,
    buffer: BytesMut,
    state: ConnectionState,
    handler: Arc<ProxyHandler>,
    max_body: usize,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter),
    Closed,
}

/// Outcome of reading from the caller.
enum Incoming {
    Request(Request),
    Rejected(ParseError),
    Closed,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, handler: Arc<ProxyHandler>, max_body: usize) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Reading,
            handler,
            max_body,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        Incoming::Request(req) => ConnectionState::Processing(req),
                        Incoming::Rejected(e) => {
                            tracing::debug!(error = ?e, "Rejecting malformed request");
                            let writer = ResponseWriter::new(rejection(e), false, false);
                            ConnectionState::Writing(writer)
                        }
                        Incoming::Closed => ConnectionState::Closed,
                    };
                }

                ConnectionState::Processing(req) => {
                    let keep_alive = req.keep_alive();
                    let head_only = req.method == Method::HEAD;

                    self.state = match self.process(req).await {
                        Some(response) => ConnectionState::Writing(ResponseWriter::new(
                            response, head_only, keep_alive,
                        )),
                        None => ConnectionState::Closed,
                    };
                }

                ConnectionState::Writing(writer) => {
                    let keep_alive = writer.keep_alive();
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        self.state = ConnectionState::Reading;
                    } else {
                        let _ = self.stream.shutdown().await;
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run the handler while watching the caller socket.
    ///
    /// Returns `None` if the caller disconnected first; the in-flight
    /// upstream call is dropped with the handler future.
    async fn process(&mut self, req: Request) -> Option<Response> {
        let handler = self.handler.clone();
        let response = handler.handle(req);
        tokio::pin!(response);

        let mut watching = true;
        loop {
            tokio::select! {
                response = &mut response => return Some(response),
                read = self.stream.read_buf(&mut self.buffer), if watching => match read {
                    Ok(0) | Err(_) => {
                        tracing::warn!("Caller disconnected, abandoning upstream request");
                        return None;
                    }
                    Ok(_) => {
                        // Pipelined data is kept for the next request
                        if self.buffer.len() > MAX_PIPELINED {
                            watching = false;
                        }
                    }
                },
            }
        }
    }

    async fn read_request(&mut self) -> anyhow::Result<Incoming> {
        let head = loop {
            match parse_request_head(&self.buffer) {
                Ok((head, consumed)) => {
                    self.buffer.advance(consumed);
                    break head;
                }
                Err(ParseError::Incomplete) => {}
                Err(e) => return Ok(Incoming::Rejected(e)),
            }

            if !self.fill().await? {
                return Ok(Incoming::Closed);
            }
        };

        let framing = match body_framing(&head.headers, self.max_body) {
            Ok(framing) => framing,
            Err(e) => return Ok(Incoming::Rejected(e)),
        };

        if framing != BodyFraming::None && self.buffer.is_empty() && head.expects_continue() {
            write_continue(&mut self.stream).await?;
        }

        self.read_body(head, framing).await
    }

    async fn read_body(
        &mut self,
        head: RequestHead,
        framing: BodyFraming,
    ) -> anyhow::Result<Incoming> {
        let body = match framing {
            BodyFraming::None => Bytes::new(),
            BodyFraming::Length(n) => {
                if self.buffer.len() < n {
                    self.buffer.reserve(n - self.buffer.len());
                }
                while self.buffer.len() < n {
                    if !self.fill().await? {
                        return Ok(Incoming::Closed);
                    }
                }
                self.buffer.split_to(n).freeze()
            }
            BodyFraming::Chunked => {
                let mut decoder = ChunkedDecoder::new(self.max_body);
                loop {
                    match decoder.decode(&mut self.buffer) {
                        Ok(Some(body)) => break body,
                        Ok(None) => {}
                        Err(e) => return Ok(Incoming::Rejected(e)),
                    }

                    if !self.fill().await? {
                        return Ok(Incoming::Closed);
                    }
                }
            }
        };

        Ok(Incoming::Request(head.into_request(body)))
    }

    /// Read more bytes from the caller; `false` once the caller has closed.
    async fn fill(&mut self) -> anyhow::Result<bool> {
        let n = self.stream.read_buf(&mut self.buffer).await?;
        Ok(n > 0)
    }
}

fn rejection(e: ParseError) -> Response {
    match e {
        ParseError::PayloadTooLarge => {
            Response::detail(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
        }
        ParseError::HeadersTooLarge => Response::detail(
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            "Request header section too large",
        ),
        ParseError::UnsupportedTransferEncoding => Response::detail(
            StatusCode::NOT_IMPLEMENTED,
            "Unsupported transfer encoding",
        ),
        ParseError::InvalidMethod => {
            Response::detail(StatusCode::NOT_IMPLEMENTED, "Method not implemented")
        }
        other => Response::detail(
            StatusCode::BAD_REQUEST,
            &format!("Malformed request: {:?}", other),
        ),
    }
}
