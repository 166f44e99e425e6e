//! Plain HTTP on the signaling port
//!
//! Every connection starts with an HTTP request head. The head is peeked
//! first; upgrade requests are left on the socket for the WebSocket
//! handshake, everything else is consumed here and gets a one-shot
//! response: health and stats probes, or files from the optional static
//! directory.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::SignalError;

/// Largest request head we are willing to buffer
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Parsed request line and headers
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse the bytes up to (not including) the blank line
    pub fn parse(head: &str) -> Result<Self, SignalError> {
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();

        let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
            return Err(SignalError::Handshake(format!(
                "bad request line: {:?}",
                request_line
            )));
        };

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
        })
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }
}

/// Pause between peeks while the rest of a head is still in flight
const PEEK_RETRY: Duration = Duration::from_millis(10);

/// Parse the request head without taking it off the socket
pub async fn peek_request_head(stream: &TcpStream) -> Result<RequestHead, SignalError> {
    let mut buf = vec![0u8; MAX_HEAD_BYTES];
    let mut seen = 0;

    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Err(SignalError::Handshake("connection closed before request".into()));
        }
        if let Some(end) = find_head_end(&buf[..n]) {
            let head = String::from_utf8_lossy(&buf[..end]);
            return RequestHead::parse(&head);
        }
        if n == buf.len() {
            return Err(SignalError::Handshake("request head too large".into()));
        }
        // peek returns at once while the buffered bytes are unchanged
        if n == seen {
            tokio::time::sleep(PEEK_RETRY).await;
        }
        seen = n;
    }
}

/// Read a request head off the stream
///
/// Bytes past the blank line are discarded; clients wait for our response
/// before sending anything else.
pub async fn read_request_head<S>(stream: &mut S) -> Result<RequestHead, SignalError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(SignalError::Handshake("connection closed before request".into()));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_head_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..end]);
            return RequestHead::parse(&head);
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(SignalError::Handshake("request head too large".into()));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Counters reported on /health and /stats
#[derive(Debug, Clone, Copy)]
pub struct ServerStats {
    pub peers: usize,
    pub blocks: usize,
}

/// Answer a non-upgrade request and close
pub async fn respond<S>(
    stream: &mut S,
    head: &RequestHead,
    stats: ServerStats,
    static_dir: Option<&Path>,
) -> Result<(), SignalError>
where
    S: AsyncWrite + Unpin,
{
    let (status, content_type, body) = route(head, stats, static_dir).await;
    debug!(method = %head.method, path = %head.path, status, "HTTP request");

    let header = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );

    stream.write_all(header.as_bytes()).await?;
    if head.method != "HEAD" {
        stream.write_all(&body).await?;
    }
    stream.flush().await?;
    Ok(())
}

async fn route(
    head: &RequestHead,
    stats: ServerStats,
    static_dir: Option<&Path>,
) -> (&'static str, &'static str, Vec<u8>) {
    const JSON: &str = "application/json";

    if head.method != "GET" && head.method != "HEAD" {
        return ("405 Method Not Allowed", JSON, br#"{"error":"method not allowed"}"#.to_vec());
    }

    // Ignore query strings
    let path = head.path.split('?').next().unwrap_or("/");

    match path {
        "/health" => (
            "200 OK",
            JSON,
            serde_json::json!({
                "status": "healthy",
                "peers": stats.peers,
                "blocks": stats.blocks,
            })
            .to_string()
            .into_bytes(),
        ),
        "/stats" => (
            "200 OK",
            JSON,
            serde_json::json!({
                "peers": stats.peers,
                "blocks": stats.blocks,
            })
            .to_string()
            .into_bytes(),
        ),
        _ => {
            let Some(dir) = static_dir else {
                return ("404 Not Found", JSON, br#"{"error":"not found"}"#.to_vec());
            };
            let Some(file) = resolve_static(dir, path) else {
                return ("403 Forbidden", JSON, br#"{"error":"forbidden"}"#.to_vec());
            };
            match tokio::fs::read(&file).await {
                Ok(bytes) => ("200 OK", content_type_for(&file), bytes),
                Err(_) => ("404 Not Found", JSON, br#"{"error":"not found"}"#.to_vec()),
            }
        }
    }
}

/// Map a URL path onto the static directory, refusing anything that
/// would escape it
fn resolve_static(root: &Path, url_path: &str) -> Option<PathBuf> {
    let relative = Path::new(url_path.trim_start_matches('/'));
    let mut resolved = root.to_path_buf();

    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if url_path.ends_with('/') || resolved == root {
        resolved.push("index.html");
    }
    Some(resolved)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
