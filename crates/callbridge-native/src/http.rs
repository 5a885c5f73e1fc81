// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal HTTP/1.1 framing for the loopback bridge.
//
// Only what the bridge needs: a request line or status line, headers, and a
// body delimited by Content-Length.  One request per connection, always
// `Connection: close`.

use tokio::io::{AsyncRead, AsyncReadExt};

use callbridge_core::error::{BridgeError, Result};

/// Upper bound on the header block regardless of the body limit.
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// A parsed inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Request target, including any query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A parsed response, as seen by the loopback client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Read one request from `reader`, refusing anything over `max_bytes`.
pub async fn read_request<R>(reader: &mut R, max_bytes: usize) -> Result<HttpRequest>
where
    R: AsyncRead + Unpin,
{
    let (start_line, headers, body) = read_message(reader, max_bytes).await?;

    let mut parts = start_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_ascii_uppercase();
    let path = parts.next().unwrap_or_default().to_owned();
    if method.is_empty() || path.is_empty() {
        return Err(BridgeError::Decode(format!("bad request line `{start_line}`")));
    }

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

/// Read one response from `reader`.
pub async fn read_response<R>(reader: &mut R, max_bytes: usize) -> Result<HttpResponse>
where
    R: AsyncRead + Unpin,
{
    let (start_line, headers, body) = read_message(reader, max_bytes).await?;

    let status = start_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| BridgeError::Transport(format!("bad status line `{start_line}`")))?;

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Serialize a response with a plain-text body.
pub fn format_response(status: u16, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\
         \r\n",
        reason_phrase(status),
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

/// Serialize a `POST` request with a JSON body.
pub fn format_request(host: &str, path: &str, origin: Option<&str>, body: &[u8]) -> Vec<u8> {
    let mut head = format!(
        "POST /{} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n",
        path.trim_start_matches('/'),
        body.len()
    );
    if let Some(origin) = origin {
        head.push_str(&format!("Origin: {origin}\r\n"));
    }
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Read a start line, headers and a Content-Length body.
async fn read_message<R>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<(String, Vec<(String, String)>, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES.min(max_bytes) {
            return Err(BridgeError::Decode("header block too large".into()));
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(BridgeError::Decode(format!(
                "connection closed after {} bytes without a complete header",
                buf.len()
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let start_line = lines.next().unwrap_or_default().to_owned();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
        .collect();

    let content_length = match find_header(&headers, "content-length") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| BridgeError::Decode(format!("bad Content-Length `{raw}`")))?,
        None => 0,
    };
    if content_length > max_bytes {
        return Err(BridgeError::Decode(format!(
            "body of {content_length} bytes exceeds limit of {max_bytes}"
        )));
    }

    let mut body = buf.split_off(header_end + 4);
    if body.len() < content_length {
        let missing = content_length - body.len();
        let mut rest = vec![0u8; missing];
        reader.read_exact(&mut rest).await?;
        body.extend_from_slice(&rest);
    }
    body.truncate(content_length);

    Ok((start_line, headers, body))
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_request_with_body() {
        let raw = format_request("127.0.0.1:8472", "Device/getInfo?callbackId=Device0", Some("file://"), b"[1,2]");
        let mut reader = &raw[..];

        let request = read_request(&mut reader, 1024).await.expect("parse");
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/Device/getInfo?callbackId=Device0");
        assert_eq!(request.header("origin"), Some("file://"));
        assert_eq!(request.body, b"[1,2]");
    }

    #[tokio::test]
    async fn request_without_body_has_empty_body() {
        let raw = b"GET /Echo/echo?args=%5B%5D HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut reader = &raw[..];

        let request = read_request(&mut reader, 1024).await.expect("parse");
        assert_eq!(request.method, "GET");
        assert!(request.body.is_empty());
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let raw = b"POST /a/b HTTP/1.1\r\nContent-Length: 999999\r\n\r\n";
        let mut reader = &raw[..];

        let err = read_request(&mut reader, 1024).await.expect_err("too large");
        assert!(matches!(err, BridgeError::Decode(_)));
    }

    #[tokio::test]
    async fn truncated_header_is_rejected() {
        let raw = b"POST /a/b HTTP/1.1\r\nContent-Le";
        let mut reader = &raw[..];
        assert!(read_request(&mut reader, 1024).await.is_err());
    }

    #[tokio::test]
    async fn response_round_trip() {
        let raw = format_response(404, b"%7B%7D");
        let mut reader = &raw[..];

        let response = read_response(&mut reader, 1024).await.expect("parse");
        assert_eq!(response.status, 404);
        assert_eq!(response.body, b"%7B%7D");
    }

    #[test]
    fn find_subsequence_crlf() {
        let data = b"POST / HTTP/1.1\r\n\r\nbody";
        assert_eq!(find_subsequence(data, b"\r\n\r\n"), Some(15));
        assert_eq!(find_subsequence(b"no", b"\r\n\r\n"), None);
    }
}
