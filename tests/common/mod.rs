//! Shared helpers for end-to-end tests: mock backends and a raw HTTP client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use gatehouse::proxy::{Backend, BackendPool, Proxy, ProxySettings};
use gatehouse::server::listener;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// A backend that answers every request with a fixed body.
pub struct MockBackend {
    pub addr: SocketAddr,
    /// Raw request heads received, in arrival order.
    pub requests: mpsc::UnboundedReceiver<String>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

pub async fn mock_backend(body: &'static str) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();

            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockBackend { addr, requests: rx }
}

/// Address on which nothing is listening.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn pool(urls: &[String]) -> BackendPool {
    let backends = urls
        .iter()
        .enumerate()
        .map(|(i, u)| Backend::parse(u, Some(format!("backend{}", i + 1))).unwrap())
        .collect();
    BackendPool::new(backends).unwrap()
}

/// Start the proxy on an ephemeral port.
pub async fn start_proxy(urls: &[String], settings: ProxySettings) -> (SocketAddr, Arc<Proxy>) {
    let proxy = Arc::new(Proxy::with_settings(pool(urls), settings));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(listener::serve(listener, Arc::clone(&proxy)));

    (addr, proxy)
}

/// A parsed response as seen by the client.
#[derive(Debug)]
pub struct ClientResponse {
    pub status: u16,
    pub head: String,
    pub body: String,
}

/// Send raw bytes and read until the proxy closes the connection.
pub async fn send_raw(addr: SocketAddr, raw: &[u8]) -> ClientResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    parse_response(&buf)
}

pub async fn get(addr: SocketAddr, path: &str) -> ClientResponse {
    let raw = format!("GET {path} HTTP/1.1\r\nHost: front.example\r\nConnection: close\r\n\r\n");
    send_raw(addr, raw.as_bytes()).await
}

pub fn parse_response(buf: &[u8]) -> ClientResponse {
    let text = String::from_utf8_lossy(buf).into_owned();
    let (head, body) = text.split_once("\r\n\r\n").unwrap_or((text.as_str(), ""));
    let status = head
        .split(' ')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    ClientResponse {
        status,
        head: head.to_string(),
        body: body.to_string(),
    }
}
