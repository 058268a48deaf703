//! Transport seam between the driver and the store.
//!
//! The driver only needs three things from a transport: simple GET queries,
//! one-shot POST of a binary message, and a long-poll exchange that writes
//! successive messages and reads back framed response chunks over a single
//! kept-open request. Everything else about HTTP is out of scope here.

use std::io;
use std::pin::Pin as StdPin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::debug;

use pindb_proto::SegmentCodec;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection not open")]
    NotOpen,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("unexpected status: {0}")]
    Status(u16),

    #[error("stream closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Store endpoints. Query text goes through `/db` as a GET; binary messages
/// go through the streaming endpoint.
pub mod endpoints {
    pub const QUERY: &str = "/db";
    pub const STREAM: &str = "/db/?i=proto&o=proto";
}

/// Transport to a PinDB store.
#[async_trait]
pub trait StoreTransport: Send + Sync {
    /// GET against the store; `path_query` is a path with query string,
    /// e.g. the output of [`query_path`].
    async fn get(&self, path_query: &str) -> TransportResult<Bytes>;

    /// POST one binary message to the streaming endpoint and return the
    /// full response body.
    async fn post(&self, body: Bytes) -> TransportResult<Bytes>;

    /// Open a long-poll exchange against the streaming endpoint.
    async fn open_stream(&self) -> TransportResult<Box<dyn SegmentStream>>;
}

/// One long-poll exchange: a single kept-open request/response pair through
/// which successive messages are written and framed response chunks read
/// back.
#[async_trait]
pub trait SegmentStream: Send {
    /// Write one message (a concatenation of framed segments).
    async fn send(&mut self, message: Bytes) -> TransportResult<()>;

    /// Block until one complete framed response chunk is available, or the
    /// exchange fails. Closing the transport unblocks this with an error.
    async fn recv_chunk(&mut self) -> TransportResult<Bytes>;

    /// Terminate the exchange.
    async fn finish(&mut self) -> TransportResult<()>;
}

/// Build the `/db` query path for a piece of opaque query text.
pub fn query_path(
    q: &str,
    output: &str,
    count: bool,
    limit: Option<u32>,
    offset: Option<u32>,
) -> String {
    let mut path = format!("{}?q={}&i=pathsql&o={}", endpoints::QUERY, percent_encode(q), output);
    if count {
        path.push_str("&type=count");
    }
    if let Some(limit) = limit {
        path.push_str(&format!("&limit={limit}"));
    }
    if let Some(offset) = offset {
        path.push_str(&format!("&offset={offset}"));
    }
    path
}

pub(crate) fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

pub(crate) fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(b) => {
                        out.push(b);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Connection options for [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct HttpOptions {
    pub host: String,
    pub port: u16,
    pub owner: String,
    pub password: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 4560,
            owner: "rusttests".into(),
            password: None,
        }
    }
}

/// HTTP transport over a keep-alive reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
    base: String,
    owner: String,
    password: Option<String>,
}

impl HttpTransport {
    pub fn new(options: HttpOptions) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base: format!("http://{}:{}", options.host, options.port),
            owner: options.owner,
            password: options.password,
        })
    }

    fn url(&self, path_query: &str) -> String {
        format!("{}{}", self.base, path_query)
    }
}

#[async_trait]
impl StoreTransport for HttpTransport {
    async fn get(&self, path_query: &str) -> TransportResult<Bytes> {
        let response = self
            .client
            .get(self.url(path_query))
            .basic_auth(&self.owner, self.password.as_deref())
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }

    async fn post(&self, body: Bytes) -> TransportResult<Bytes> {
        debug!(bytes = body.len(), "posting binary message");
        let response = self
            .client
            .post(self.url(endpoints::STREAM))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .basic_auth(&self.owner, self.password.as_deref())
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }

    async fn open_stream(&self) -> TransportResult<Box<dyn SegmentStream>> {
        let (sender, receiver) = mpsc::unbounded::<Result<Bytes, io::Error>>();
        let request = self
            .client
            .post(self.url(endpoints::STREAM))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .basic_auth(&self.owner, self.password.as_deref())
            .body(reqwest::Body::wrap_stream(receiver));
        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = response_tx.send(request.send().await);
        });
        Ok(Box::new(HttpSegmentStream {
            sender: Some(sender),
            response: ResponseState::Pending(response_rx),
            buf: BytesMut::new(),
        }))
    }
}

type ChunkStream = StdPin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

enum ResponseState {
    Pending(tokio::sync::oneshot::Receiver<reqwest::Result<reqwest::Response>>),
    Streaming(ChunkStream),
    Done,
}

struct HttpSegmentStream {
    sender: Option<mpsc::UnboundedSender<Result<Bytes, io::Error>>>,
    response: ResponseState,
    buf: BytesMut,
}

impl HttpSegmentStream {
    async fn ensure_streaming(&mut self) -> TransportResult<()> {
        if let ResponseState::Pending(_) = self.response {
            let ResponseState::Pending(rx) = std::mem::replace(&mut self.response, ResponseState::Done)
            else {
                unreachable!()
            };
            let response = rx
                .await
                .map_err(|_| TransportError::Closed)?
                .map_err(|e| TransportError::Http(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status(status.as_u16()));
            }
            debug!(status = status.as_u16(), "long-poll response headers received");
            self.response = ResponseState::Streaming(Box::pin(response.bytes_stream()));
        }
        Ok(())
    }
}

#[async_trait]
impl SegmentStream for HttpSegmentStream {
    async fn send(&mut self, message: Bytes) -> TransportResult<()> {
        let sender = self.sender.as_ref().ok_or(TransportError::Closed)?;
        sender
            .unbounded_send(Ok(message))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_chunk(&mut self) -> TransportResult<Bytes> {
        loop {
            if let Some(total) = SegmentCodec::chunk_len(&self.buf) {
                if self.buf.len() >= total {
                    return Ok(self.buf.split_to(total).freeze());
                }
            }
            self.ensure_streaming().await?;
            let ResponseState::Streaming(stream) = &mut self.response else {
                return Err(TransportError::Closed);
            };
            match stream.next().await {
                Some(Ok(bytes)) => self.buf.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(TransportError::Http(e.to_string())),
                None => return Err(TransportError::Closed),
            }
        }
    }

    async fn finish(&mut self) -> TransportResult<()> {
        self.sender.take();
        self.response = ResponseState::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_path_escapes_and_orders_params() {
        let path = query_path("SELECT * WHERE EXISTS(age);", "proto", false, Some(10), Some(2));
        assert!(path.starts_with("/db?q=SELECT%20%2A%20WHERE%20EXISTS%28age%29%3B"));
        assert!(path.contains("&i=pathsql&o=proto"));
        assert!(path.ends_with("&limit=10&offset=2"));
    }

    #[test]
    fn query_path_count_flag() {
        let path = query_path("SELECT *;", "json", true, None, None);
        assert!(path.contains("&type=count"));
        assert!(!path.contains("limit"));
    }

    #[test]
    fn percent_roundtrip() {
        let original = "SELECT * FROM @1a2b WHERE x='a b&c';";
        assert_eq!(percent_decode(&percent_encode(original)), original);
    }

    #[test]
    fn percent_decode_tolerates_bad_escapes() {
        assert_eq!(percent_decode("a%zzb"), "a%zzb");
        assert_eq!(percent_decode("a+b"), "a b");
    }

    #[test]
    fn default_options() {
        let options = HttpOptions::default();
        assert_eq!(options.host, "localhost");
        assert_eq!(options.port, 4560);
        assert!(options.password.is_none());
    }
}
