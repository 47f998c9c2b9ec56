//! End-to-end request handling against a mock store.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

use kv_http_gateway::config::ListenerConfig;
use kv_http_gateway::net::Listener;
use kv_http_gateway::{GatewayServer, Shutdown};

mod common;
use common::*;

#[tokio::test]
async fn found_key_returns_value() {
    let store = start_mock_store(&[("foo", "bar")]).await;
    let gateway = start_gateway(gateway_config(&store.addr.to_string(), 100)).await;
    wait_until_connected(gateway.addr).await;

    let response = get(gateway.addr, "foo").await;
    assert_eq!(
        response,
        b"HTTP/1.0 200 OK\r\nConnection: close\r\nContent-Length: 3\r\n\r\nbar".to_vec()
    );
}

#[tokio::test]
async fn missing_key_returns_not_found() {
    let store = start_mock_store(&[]).await;
    let gateway = start_gateway(gateway_config(&store.addr.to_string(), 100)).await;
    wait_until_connected(gateway.addr).await;

    let response = get(gateway.addr, "missing").await;
    assert_eq!(status_of(&response), 404);
    assert_eq!(body_of(&response), b"Not Found");
}

#[tokio::test]
async fn binary_values_pass_through_unchanged() {
    let store = start_mock_store(&[]).await;
    store.set("blob", b"\x00\r\n\xffdata");
    let gateway = start_gateway(gateway_config(&store.addr.to_string(), 100)).await;
    wait_until_connected(gateway.addr).await;

    let response = get(gateway.addr, "blob").await;
    assert_eq!(status_of(&response), 200);
    assert_eq!(body_of(&response), b"\x00\r\n\xffdata");
}

#[tokio::test]
async fn non_get_method_is_rejected_without_lookup() {
    let store = start_mock_store(&[("foo", "bar")]).await;
    let gateway = start_gateway(gateway_config(&store.addr.to_string(), 100)).await;
    wait_until_connected(gateway.addr).await;
    let before = store.commands();

    let response = send_raw(gateway.addr, b"POST /foo HTTP/1.0\r\n\r\n").await;
    assert_eq!(status_of(&response), 400);
    assert_eq!(body_of(&response), b"Bad Request");

    // GETX shares the GET prefix but is a different method.
    let response = send_raw(gateway.addr, b"GETX /foo HTTP/1.0\r\n\r\n").await;
    assert_eq!(status_of(&response), 400);

    assert_eq!(store.commands(), before);
}

#[tokio::test]
async fn empty_key_is_rejected() {
    let store = start_mock_store(&[]).await;
    let gateway = start_gateway(gateway_config(&store.addr.to_string(), 100)).await;
    wait_until_connected(gateway.addr).await;

    let response = send_raw(gateway.addr, b"GET / HTTP/1.0\r\n\r\n").await;
    assert_eq!(status_of(&response), 400);
}

#[tokio::test]
async fn malformed_request_is_rejected() {
    let store = start_mock_store(&[]).await;
    let gateway = start_gateway(gateway_config(&store.addr.to_string(), 100)).await;
    wait_until_connected(gateway.addr).await;

    let response = send_raw(gateway.addr, b"\x01\x02 garbage\r\n\r\n").await;
    assert_eq!(status_of(&response), 400);
}

#[tokio::test]
async fn request_delivered_one_byte_at_a_time() {
    let store = start_mock_store(&[("foo", "bar")]).await;
    let gateway = start_gateway(gateway_config(&store.addr.to_string(), 100)).await;
    wait_until_connected(gateway.addr).await;

    let mut stream = TcpStream::connect(gateway.addr).await.unwrap();
    for byte in b"GET /foo HTTP/1.0\r\nHost: x\r\n\r\n" {
        stream.write_all(&[*byte]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let response = read_until_close(&mut stream).await;
    assert_eq!(status_of(&response), 200);
    assert_eq!(body_of(&response), b"bar");
}

#[tokio::test]
async fn client_half_close_after_request_still_gets_response() {
    let store = start_mock_store(&[("foo", "bar")]).await;
    let gateway = start_gateway(gateway_config(&store.addr.to_string(), 100)).await;
    wait_until_connected(gateway.addr).await;

    store.set_paused(true);
    let before = store.commands();
    let mut stream = TcpStream::connect(gateway.addr).await.unwrap();
    stream.write_all(b"GET /foo HTTP/1.0\r\n\r\n").await.unwrap();
    stream.shutdown().await.unwrap();

    let dispatched = eventually(Duration::from_secs(5), || store.commands() > before).await;
    assert!(dispatched);
    store.set_paused(false);

    let response = read_until_close(&mut stream).await;
    assert_eq!(status_of(&response), 200);
    assert_eq!(body_of(&response), b"bar");
}

#[tokio::test]
async fn conventional_http_client_reads_value() {
    let store = start_mock_store(&[("greeting", "hello")]).await;
    let gateway = start_gateway(gateway_config(&store.addr.to_string(), 100)).await;
    wait_until_connected(gateway.addr).await;

    let client = reqwest::Client::new();
    let res = client
        .get(format!("http://{}/greeting", gateway.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "hello");

    let res = client
        .get(format!("http://{}/nope", gateway.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn serves_over_unix_socket_and_removes_it_on_exit() {
    let store = start_mock_store(&[("foo", "bar")]).await;
    let path = std::env::temp_dir()
        .join(format!("kv-http-gateway-it-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let listener = Listener::bind(&ListenerConfig {
        address: format!("unix:{}", path.display()),
        inherit_env: "KV_HTTP_GATEWAY_IT_NO_INHERIT".to_string(),
        ..ListenerConfig::default()
    })
    .await
    .unwrap();

    let server = GatewayServer::new(gateway_config(&store.addr.to_string(), 100));
    let shutdown = Shutdown::new();
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let mut response = Vec::new();
    for _ in 0..500 {
        if let Ok(mut stream) = UnixStream::connect(&path).await {
            stream.write_all(b"GET /foo HTTP/1.0\r\n\r\n").await.unwrap();
            response.clear();
            let _ = stream.read_to_end(&mut response).await;
            if status_of(&response) == 200 {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status_of(&response), 200);
    assert_eq!(body_of(&response), b"bar");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!path.exists());
}
