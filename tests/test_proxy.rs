//! End-to-end tests: client -> proxy -> mock backends

mod common;

use std::time::Duration;

use common::{closed_port, get, mock_backend, send_raw, start_proxy};
use gatehouse::config::Config;
use gatehouse::error::ProxyError;
use gatehouse::http::request::{Method, RequestBuilder};
use gatehouse::proxy::{Disposition, Proxy, ProxySettings};

#[tokio::test]
async fn test_round_robin_across_backends() {
    let b1 = mock_backend("backend1").await;
    let b2 = mock_backend("backend2").await;
    let b3 = mock_backend("backend3").await;
    let (addr, _proxy) = start_proxy(&[b1.url(), b2.url(), b3.url()], ProxySettings::default()).await;

    for expected in ["backend1", "backend2", "backend3"] {
        let response = get(addr, "/").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, expected);
    }
}

#[tokio::test]
async fn test_fifth_rapid_request_is_rate_limited() {
    let b1 = mock_backend("ok").await;
    let (addr, _proxy) = start_proxy(&[b1.url()], ProxySettings::default()).await;

    for _ in 0..4 {
        assert_eq!(get(addr, "/").await.status, 200);
    }

    let response = get(addr, "/").await;
    assert_eq!(response.status, 429);
    assert_eq!(response.body, "rate limit exceeded");
}

#[tokio::test]
async fn test_rate_limit_recovers_after_refill() {
    let b1 = mock_backend("ok").await;
    let (addr, _proxy) = start_proxy(&[b1.url()], ProxySettings::default()).await;

    for _ in 0..4 {
        get(addr, "/").await;
    }
    assert_eq!(get(addr, "/").await.status, 429);

    tokio::time::sleep(Duration::from_millis(550)).await;
    assert_eq!(get(addr, "/").await.status, 200);
}

#[tokio::test]
async fn test_forwarded_host_reaches_backend() {
    let mut b1 = mock_backend("ok").await;
    let (addr, _proxy) = start_proxy(&[b1.url()], ProxySettings::default()).await;

    get(addr, "/items?id=7").await;

    let head = b1.requests.recv().await.unwrap();
    assert!(head.starts_with("GET /items?id=7 HTTP/1.1\r\n"));
    assert!(head.contains("X-Forwarded-Host: front.example\r\n"));
    assert!(head.contains(&format!("Host: {}\r\n", b1.addr)));
    assert!(head.contains("X-Forwarded-For: 127.0.0.1\r\n"));
}

#[tokio::test]
async fn test_request_body_is_forwarded() {
    let mut b1 = mock_backend("ok").await;
    let (addr, _proxy) = start_proxy(&[b1.url()], ProxySettings::default()).await;

    let raw = b"POST /submit HTTP/1.1\r\nHost: front\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello";
    let response = send_raw(addr, raw).await;
    assert_eq!(response.status, 200);

    let head = b1.requests.recv().await.unwrap();
    assert!(head.starts_with("POST /submit HTTP/1.1\r\n"));
    assert!(head.contains("Content-Length: 5\r\n"));
}

#[tokio::test]
async fn test_extension_method_is_forwarded() {
    let mut b1 = mock_backend("ok").await;
    let (addr, _proxy) = start_proxy(&[b1.url()], ProxySettings::default()).await;

    let raw = b"PROPFIND /dav HTTP/1.1\r\nHost: front\r\nDepth: 1\r\nConnection: close\r\n\r\n";
    let response = send_raw(addr, raw).await;
    assert_eq!(response.status, 200);

    let head = b1.requests.recv().await.unwrap();
    assert!(head.starts_with("PROPFIND /dav HTTP/1.1\r\n"));
    assert!(head.contains("Depth: 1\r\n"));
}

#[tokio::test]
async fn test_repeated_headers_reach_backend() {
    let mut b1 = mock_backend("ok").await;
    let (addr, _proxy) = start_proxy(&[b1.url()], ProxySettings::default()).await;

    let raw = b"GET / HTTP/1.1\r\nHost: front\r\nX-Tag: one\r\nX-Tag: two\r\nConnection: close\r\n\r\n";
    assert_eq!(send_raw(addr, raw).await.status, 200);

    let head = b1.requests.recv().await.unwrap();
    let one = head.find("X-Tag: one\r\n").unwrap();
    let two = head.find("X-Tag: two\r\n").unwrap();
    assert!(one < two);
}

#[tokio::test]
async fn test_oversized_body_is_refused_before_buffering() {
    let b1 = mock_backend("ok").await;
    let (addr, proxy) = start_proxy(&[b1.url()], ProxySettings::default()).await;

    let raw = b"POST /upload HTTP/1.1\r\nHost: front\r\nContent-Length: 10000000000\r\n\r\n";
    let response = send_raw(addr, raw).await;

    assert_eq!(response.status, 413);
    // Refused while parsing, so no rate-limit state was created
    assert!(proxy.clients().is_empty());
}

#[tokio::test]
async fn test_unreachable_backend_returns_bad_gateway() {
    let dead = closed_port().await;
    let (addr, _proxy) = start_proxy(&[format!("http://{dead}")], ProxySettings::default()).await;

    let response = get(addr, "/").await;

    assert_eq!(response.status, 502);
    assert_eq!(response.body, "");
    assert!(response.head.contains("Content-Length: 0"));
}

#[tokio::test]
async fn test_dead_backend_does_not_break_rotation() {
    let dead = closed_port().await;
    let b2 = mock_backend("alive").await;
    let (addr, _proxy) = start_proxy(&[format!("http://{dead}"), b2.url()], ProxySettings::default()).await;

    assert_eq!(get(addr, "/").await.status, 502);
    assert_eq!(get(addr, "/").await.body, "alive");
}

#[tokio::test]
async fn test_malformed_request_gets_bad_request() {
    let b1 = mock_backend("ok").await;
    let (addr, _proxy) = start_proxy(&[b1.url()], ProxySettings::default()).await;

    let response = send_raw(addr, b"NONSENSE\r\n\r\n").await;

    assert_eq!(response.status, 400);
}

#[tokio::test]
async fn test_chunked_request_is_not_implemented() {
    let b1 = mock_backend("ok").await;
    let (addr, _proxy) = start_proxy(&[b1.url()], ProxySettings::default()).await;

    let raw = b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n";
    let response = send_raw(addr, raw).await;

    assert_eq!(response.status, 501);
}

#[tokio::test]
async fn test_rejected_request_keeps_connection_alive() {
    let b1 = mock_backend("ok").await;
    let (addr, proxy) = start_proxy(&[b1.url()], ProxySettings::default()).await;

    for _ in 0..4 {
        proxy.clients().allow("127.0.0.1");
    }

    // Two pipelined requests on one connection; both are rejected
    let raw = b"GET / HTTP/1.1\r\nHost: a\r\n\r\nGET / HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n";
    let response = send_raw(addr, raw).await;

    assert_eq!(response.status, 429);
    assert_eq!(response.body.matches("HTTP/1.1 429").count(), 1);
}

#[tokio::test]
async fn test_idle_client_is_evicted_and_starts_fresh() {
    let b1 = mock_backend("ok").await;
    let settings = ProxySettings {
        idle_timeout: Duration::from_millis(100),
        sweep_interval: Duration::from_millis(20),
        ..ProxySettings::default()
    };
    let (addr, proxy) = start_proxy(&[b1.url()], settings).await;

    for _ in 0..4 {
        assert_eq!(get(addr, "/").await.status, 200);
    }
    assert_eq!(get(addr, "/").await.status, 429);

    // Refill alone would only give back ~0.6 tokens
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(proxy.clients().is_empty());

    for _ in 0..4 {
        assert_eq!(get(addr, "/").await.status, 200);
    }
}

#[tokio::test]
async fn test_distinct_clients_have_independent_quotas() {
    let b1 = mock_backend("ok").await;
    let proxy = Proxy::with_settings(common::pool(&[b1.url()]), ProxySettings::default());
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .header("Host", "front")
        .build()
        .unwrap();

    for _ in 0..4 {
        for client in ["10.0.0.1:5000", "10.0.0.2:5000"] {
            let mut out = Vec::new();
            let disposition = proxy.handle(&request, client, &mut out).await.unwrap();
            assert_eq!(disposition, Disposition::Forwarded { status: 200 });
        }
    }

    let mut out = Vec::new();
    assert_eq!(
        proxy.handle(&request, "10.0.0.1:5001", &mut out).await.unwrap(),
        Disposition::Rejected
    );
    assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 429 Too Many Requests\r\n"));

    assert!(!proxy.allow("10.0.0.2:5000"));
    assert!(proxy.allow("10.0.0.3:5000"));
}

#[tokio::test]
async fn test_unparsable_remote_address_is_rejected() {
    let b1 = mock_backend("ok").await;
    let proxy = Proxy::with_settings(common::pool(&[b1.url()]), ProxySettings::default());
    let request = RequestBuilder::new().method(Method::GET).path("/").build().unwrap();

    let mut out = Vec::new();
    let disposition = proxy.handle(&request, "10.0.0.1", &mut out).await.unwrap();

    assert_eq!(disposition, Disposition::Rejected);
    let response = common::parse_response(&out);
    assert_eq!(response.status, 429);
    assert_eq!(response.body, "rate limit exceeded");
    assert!(proxy.clients().is_empty());
    assert_eq!(proxy.pool().cursor(), 0);
}

#[tokio::test]
async fn test_proxy_from_config() {
    let cfg = Config::from_yaml(
        "server: {host: 127.0.0.1, port: 0}\nclient_duration: 1\nresources:\n  - {name: a, endpoint: /, destination_url: 'http://127.0.0.1:9001'}\n  - {name: b, endpoint: /, destination_url: 'http://127.0.0.1:9002'}\n",
    )
    .unwrap();

    let proxy = Proxy::new(&cfg).unwrap();

    assert_eq!(proxy.pool().len(), 2);
    assert_eq!(proxy.next_backend().display_name(), "a");
    assert_eq!(proxy.next_backend().display_name(), "b");
    assert!(proxy.reaper().is_running());

    proxy.shutdown().await;
    proxy.shutdown().await;
    assert!(!proxy.reaper().is_running());
}

#[tokio::test]
async fn test_proxy_rejects_invalid_destination() {
    let cfg = Config::from_yaml(
        "server: {host: 127.0.0.1, port: 0}\nresources:\n  - {name: a, destination_url: 'http://127.0.0.1:9001'}\n  - {name: b, destination_url: 'https://secure.example'}\n",
    )
    .unwrap();

    assert!(matches!(Proxy::new(&cfg), Err(ProxyError::UnsupportedScheme { .. })));
}
