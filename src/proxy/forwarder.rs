//! Upstream connection and request forwarding
//!
//! This module connects to the selected backend, sends it the rewritten request
//! and streams the backend's response back to the client as it arrives.

use crate::http::request::{comma_tokens, Request};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::proxy::backend::Backend;
use anyhow::{Context, Result};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default buffer size for reading the response head
const BUFFER_SIZE: usize = 8192;

/// Largest response head accepted from a backend
const MAX_RESPONSE_HEAD: usize = 64 * 1024;

/// Headers that only apply to a single hop and are never relayed.
const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "TE",
    "Trailer",
    "Transfer-Encoding",
    "Upgrade",
];

/// Same as [`HOP_BY_HOP`] minus `Transfer-Encoding`: the response body is
/// relayed with its original framing, so its encoding header must survive.
const HOP_BY_HOP_RESPONSE: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "TE",
    "Trailer",
    "Upgrade",
];

/// What happened to a relayed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The backend response was streamed to the client with this status.
    Relayed { status: u16, bytes: u64 },
    /// The backend could not be reached; a 502 was sent instead.
    BadGateway,
}

/// Relays requests to a backend and streams the response back.
#[derive(Debug, Clone, Default)]
pub struct Forwarder;

impl Forwarder {
    pub fn new() -> Self {
        Self
    }

    /// Forward `request` to `backend` and stream the answer into `client`.
    ///
    /// `client_ip` is appended to `X-Forwarded-For`. Errors returned from here
    /// mean the client connection itself failed, after which it cannot be reused.
    pub async fn relay<W>(
        &self,
        backend: &Backend,
        request: &Request,
        client_ip: &str,
        client: &mut W,
    ) -> Result<RelayOutcome>
    where
        W: AsyncWrite + Unpin,
    {
        let (mut upstream, head, leftover) = match self.open_exchange(backend, request, client_ip).await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(
                    backend = backend.display_name(),
                    error = %e,
                    method = request.method.as_str(),
                    path = %request.path,
                    "Failed to proxy request to backend"
                );

                let mut writer = ResponseWriter::new(&Response::bad_gateway().closing());
                writer.write_to_stream(client).await?;
                return Ok(RelayOutcome::BadGateway);
            }
        };

        client.write_all(&head.bytes).await?;
        client.write_all(&leftover).await?;
        let streamed = tokio::io::copy(&mut upstream, client)
            .await
            .context("Failed while streaming backend response")?;
        client.flush().await?;

        tracing::debug!(
            backend = backend.display_name(),
            status = head.status,
            "Response relayed"
        );

        Ok(RelayOutcome::Relayed {
            status: head.status,
            bytes: leftover.len() as u64 + streamed,
        })
    }

    /// Connect, send the request and read the response head.
    ///
    /// Nothing has been written to the client when this fails.
    async fn open_exchange(
        &self,
        backend: &Backend,
        request: &Request,
        client_ip: &str,
    ) -> Result<(TcpStream, ResponseHead, BytesMut)> {
        let mut stream = TcpStream::connect(backend.socket_addr())
            .await
            .context("Failed to connect to backend")?;

        tracing::trace!(backend = backend.display_name(), "Connected to backend");

        let request_bytes = self.build_http_request(request, backend, client_ip);
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        let (head, leftover) = read_response_head(&mut stream).await?;
        Ok((stream, head, leftover))
    }

    /// Build HTTP request bytes to send to a backend
    ///
    /// Public for tests.
    pub fn build_http_request(&self, request: &Request, backend: &Backend, client_ip: &str) -> Vec<u8> {
        let mut buffer = Vec::new();

        let target = join_target(backend.url.path(), &request.path);
        buffer.extend_from_slice(
            format!("{} {} {}\r\n", request.method.as_str(), target, request.version).as_bytes()
        );

        // Headers named by Connection are hop-by-hop as well
        let named = request.connection_tokens();

        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .filter(|(k, _)| !is_listed(k, HOP_BY_HOP))
            .filter(|(k, _)| !named.iter().any(|n| k.eq_ignore_ascii_case(n)))
            .filter(|(k, _)| {
                !["Host", "Content-Length", "X-Forwarded-Host", "X-Forwarded-For"]
                    .iter()
                    .any(|h| k.eq_ignore_ascii_case(h))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        headers.push(("Host".to_string(), backend.authority()));

        if let Some(host) = request.host() {
            headers.push(("X-Forwarded-Host".to_string(), host.to_string()));
        }

        let prior: Vec<&str> = request
            .header_values("X-Forwarded-For")
            .filter(|v| !v.is_empty())
            .collect();
        let forwarded_for = if prior.is_empty() {
            client_ip.to_string()
        } else {
            format!("{}, {}", prior.join(", "), client_ip)
        };
        headers.push(("X-Forwarded-For".to_string(), forwarded_for));

        if !request.body.is_empty() || request.header("Content-Length").is_some() {
            headers.push(("Content-Length".to_string(), request.body.len().to_string()));
        }

        // One exchange per backend connection; EOF delimits the response
        headers.push(("Connection".to_string(), "close".to_string()));

        for (key, value) in &headers {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(&request.body);

        buffer
    }
}

/// A backend response head, re-serialized for the client.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: u16,
    pub bytes: Vec<u8>,
}

/// Read until the end of the response head.
///
/// Returns the head rewritten for the client and any body bytes read past it.
async fn read_response_head<R>(stream: &mut R) -> Result<(ResponseHead, BytesMut)>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        let n = stream.read_buf(&mut buffer).await?;

        if n == 0 {
            anyhow::bail!("Connection closed before complete response received");
        }

        if let Some(headers_end) = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
        {
            let head_bytes = buffer.split_to(headers_end + 4);
            let head = rewrite_response_head(&head_bytes)?;
            return Ok((head, buffer));
        }

        if buffer.len() > MAX_RESPONSE_HEAD {
            anyhow::bail!("Response headers too large");
        }
    }
}

/// Parse a raw response head and rebuild it without hop-by-hop headers.
pub fn rewrite_response_head(raw: &[u8]) -> Result<ResponseHead> {
    let text = std::str::from_utf8(raw).context("Invalid UTF-8 in response headers")?;
    let mut lines = text.split("\r\n");

    let status_line = lines.next().context("Empty response")?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        anyhow::bail!("Invalid status line: {}", status_line);
    }

    let status: u16 = parts
        .next()
        .context("Missing status code")?
        .parse()
        .context("Invalid status code")?;

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let Some((key, value)) = line.split_once(':') else {
            anyhow::bail!("Invalid response header: {}", line);
        };
        headers.push((key.trim(), value.trim()));
    }

    // Transfer-Encoding still frames the relayed body, so it stays even if named
    let named: Vec<String> = comma_tokens(
        headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("Connection"))
            .map(|(_, v)| *v),
    )
    .into_iter()
    .filter(|t| t != "transfer-encoding")
    .collect();

    let mut out = Vec::with_capacity(raw.len());
    out.extend_from_slice(status_line.as_bytes());
    out.extend_from_slice(b"\r\n");

    for (key, value) in headers {
        if is_listed(key, HOP_BY_HOP_RESPONSE) || named.iter().any(|n| key.eq_ignore_ascii_case(n)) {
            continue;
        }
        out.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
    }

    out.extend_from_slice(b"Connection: close\r\n\r\n");

    Ok(ResponseHead { status, bytes: out })
}

fn is_listed(name: &str, list: &[&str]) -> bool {
    list.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Join the backend base path with the request target, keeping one slash at the seam.
pub fn join_target(base: &str, target: &str) -> String {
    let target = if target.is_empty() { "/" } else { target };

    // Absolute-form targets are reduced to their path and query
    let target = match target.find("://") {
        Some(scheme_end) => {
            let rest = &target[scheme_end + 3..];
            rest.find('/').map_or("/", |i| &rest[i..])
        }
        None => target,
    };

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (target, None),
    };

    let joined = match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    };

    match query {
        Some(q) => format!("{}?{}", joined, q),
        None => joined,
    }
}
