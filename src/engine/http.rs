//! Minimal HTTP/1.1 client for the engine and store endpoints.
//!
//! Sends one request per connection over TCP or a Unix domain socket and
//! reads the response using Content-Length or chunked framing, falling
//! back to read-until-close. Connections are short-lived; the orchestrator
//! issues strictly sequential requests, so pooling buys nothing.

use crate::constants::CONNECT_TIMEOUT;
use crate::error::{Error, Result};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};
use tracing::trace;

// =============================================================================
// Endpoints
// =============================================================================

/// Where an HTTP service lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `host:port` over TCP.
    Tcp(String),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Parses endpoint specs like `tcp://host:2375`, `http://host:4001`,
    /// or `unix:///var/run/docker.sock`.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if let Some(rest) = spec.strip_prefix("unix://") {
            return Ok(Endpoint::Unix(PathBuf::from(rest)));
        }
        for scheme in ["tcp://", "http://"] {
            if let Some(rest) = spec.strip_prefix(scheme) {
                return Ok(Endpoint::Tcp(rest.trim_end_matches('/').to_string()));
            }
        }
        Err(Error::Config(format!(
            "can't understand endpoint '{spec}', expected tcp://host:port or unix:///path"
        )))
    }

    /// The host part of a TCP endpoint, if any.
    pub fn host(&self) -> Option<&str> {
        match self {
            Endpoint::Tcp(addr) => Some(addr.split(':').next().unwrap_or(addr)),
            Endpoint::Unix(_) => None,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// A fully-read HTTP response.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one request and reads the whole response. Status codes are not
/// interpreted here; callers map them per operation.
pub async fn request(
    endpoint: &Endpoint,
    method: &str,
    path: &str,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Response> {
    trace!("http {} {} ({} byte body)", method, path, body.len());
    let mut head = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    if let Some(ct) = content_type {
        head.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = connect_timed(TcpStream::connect(addr.clone()), endpoint).await?;
            roundtrip(stream, head.as_bytes(), body).await
        }
        Endpoint::Unix(path) => {
            let stream = connect_timed(UnixStream::connect(path.clone()), endpoint).await?;
            roundtrip(stream, head.as_bytes(), body).await
        }
    }
}

async fn connect_timed<S, F>(connect: F, endpoint: &Endpoint) -> Result<S>
where
    F: std::future::Future<Output = std::io::Result<S>>,
{
    tokio::time::timeout(CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| Error::Timeout {
            operation: format!("connect to {endpoint}"),
            duration: CONNECT_TIMEOUT,
        })?
        .map_err(Error::Io)
}

async fn roundtrip<S: AsyncRead + AsyncWrite + Unpin>(
    mut stream: S,
    head: &[u8],
    body: &[u8],
) -> Result<Response> {
    stream.write_all(head).await?;
    if !body.is_empty() {
        stream.write_all(body).await?;
    }
    stream.flush().await?;

    let mut reader = BufReader::new(stream);
    read_response(&mut reader).await
}

/// Reads status line, headers, and body from a buffered stream.
async fn read_response<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Response> {
    let mut status_line = String::new();
    reader.read_line(&mut status_line).await?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Internal(format!("bad HTTP status line: {status_line:?}")))?;

    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().ok();
        } else if let Some(value) = lower.strip_prefix("transfer-encoding:") {
            chunked = value.trim() == "chunked";
        }
    }

    let body = if chunked {
        read_chunked(reader).await?
    } else if let Some(len) = content_length {
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        buf
    } else {
        // No framing headers: the body runs until the peer closes.
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        buf
    };

    trace!("http response: status {} ({} byte body)", status, body.len());
    Ok(Response { status, body })
}

/// Decodes a chunked transfer-encoded body.
async fn read_chunked<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line).await?;
        let size_str = size_line.trim().split(';').next().unwrap_or("").trim();
        if size_str.is_empty() {
            continue;
        }
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| Error::Internal(format!("bad chunk size: {size_str:?}")))?;
        if size == 0 {
            // Trailing headers, if any, run to a blank line.
            loop {
                let mut line = String::new();
                let n = reader.read_line(&mut line).await?;
                if n == 0 || line == "\r\n" || line == "\n" {
                    break;
                }
            }
            break;
        }
        let mut chunk = vec![0u8; size];
        reader.read_exact(&mut chunk).await?;
        body.extend_from_slice(&chunk);
        // CRLF after each chunk
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_content_length_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 7\r\n\r\n{\"a\":1}";
        let mut reader = BufReader::new(&raw[..]);
        let resp = read_response(&mut reader).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body_text(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn parses_chunked_response() {
        let raw =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let resp = read_response(&mut reader).await.unwrap();
        assert_eq!(resp.body, b"Wikipedia");
    }

    #[tokio::test]
    async fn parses_body_until_close() {
        let raw = b"HTTP/1.1 404 Not Found\r\n\r\nno such image";
        let mut reader = BufReader::new(&raw[..]);
        let resp = read_response(&mut reader).await.unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body_text(), "no such image");
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!(
            Endpoint::parse("tcp://10.0.0.2:2375").unwrap(),
            Endpoint::Tcp("10.0.0.2:2375".to_string())
        );
        assert_eq!(
            Endpoint::parse("unix:///var/run/docker.sock").unwrap(),
            Endpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert!(Endpoint::parse("gopher://x").is_err());
        assert_eq!(
            Endpoint::parse("tcp://10.0.0.2:2375").unwrap().host(),
            Some("10.0.0.2")
        );
    }
}
