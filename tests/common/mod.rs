//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use kv_http_gateway::backend::protocol::{self, RespValue};
use kv_http_gateway::net::{ConnectionRegistry, Listener};
use kv_http_gateway::{GatewayConfig, GatewayServer, Shutdown};

/// An in-process RESP store answering `GET` from a map.
pub struct MockStore {
    pub addr: SocketAddr,
    data: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
    accepts: Arc<AtomicUsize>,
    open_sessions: Arc<AtomicUsize>,
    commands: Arc<AtomicUsize>,
    paused: watch::Sender<bool>,
    kill: watch::Sender<u64>,
}

impl MockStore {
    pub fn set(&self, key: &str, value: &[u8]) {
        self.data
            .lock()
            .unwrap()
            .insert(key.as_bytes().to_vec(), value.to_vec());
    }

    /// Number of sessions ever accepted.
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Number of commands received across all sessions.
    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    /// Hold replies until unpaused.
    pub fn set_paused(&self, paused: bool) {
        self.paused.send_replace(paused);
    }

    /// Drop every open session.
    pub fn kill_sessions(&self) {
        self.kill.send_modify(|generation| *generation += 1);
    }
}

/// Start a mock store on an ephemeral port.
pub async fn start_mock_store(entries: &[(&str, &str)]) -> MockStore {
    start_mock_store_on("127.0.0.1:0".parse().unwrap(), entries).await
}

/// Start a mock store on a fixed address.
pub async fn start_mock_store_on(addr: SocketAddr, entries: &[(&str, &str)]) -> MockStore {
    let listener = TcpListener::bind(addr).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let data: HashMap<Vec<u8>, Vec<u8>> = entries
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect();
    let (paused, _) = watch::channel(false);
    let (kill, _) = watch::channel(0u64);

    let store = MockStore {
        addr,
        data: Arc::new(Mutex::new(data)),
        accepts: Arc::new(AtomicUsize::new(0)),
        open_sessions: Arc::new(AtomicUsize::new(0)),
        commands: Arc::new(AtomicUsize::new(0)),
        paused,
        kill,
    };

    let data = store.data.clone();
    let accepts = store.accepts.clone();
    let open_sessions = store.open_sessions.clone();
    let commands = store.commands.clone();
    let paused = store.paused.subscribe();
    let kill = store.kill.subscribe();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            accepts.fetch_add(1, Ordering::SeqCst);
            open_sessions.fetch_add(1, Ordering::SeqCst);

            let data = data.clone();
            let open_sessions = open_sessions.clone();
            let commands = commands.clone();
            let paused = paused.clone();
            let mut kill = kill.clone();
            kill.mark_unchanged();
            tokio::spawn(async move {
                tokio::select! {
                    _ = serve_session(socket, data, commands, paused) => {}
                    _ = kill.changed() => {}
                }
                open_sessions.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });

    store
}

async fn serve_session(
    mut socket: TcpStream,
    data: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
    commands: Arc<AtomicUsize>,
    mut paused: watch::Receiver<bool>,
) {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        while let Ok(Some(command)) = protocol::decode(&mut buf) {
            commands.fetch_add(1, Ordering::SeqCst);
            let _ = paused.wait_for(|paused| !*paused).await;

            let reply = match command {
                RespValue::Array(args) if args.len() == 2 => match (&args[0], &args[1]) {
                    (RespValue::Bulk(cmd), RespValue::Bulk(key)) if &cmd[..] == b"GET" => {
                        let value = data.lock().unwrap().get(&key[..]).cloned();
                        match value {
                            Some(value) => {
                                let mut out = format!("${}\r\n", value.len()).into_bytes();
                                out.extend_from_slice(&value);
                                out.extend_from_slice(b"\r\n");
                                out
                            }
                            None => b"$-1\r\n".to_vec(),
                        }
                    }
                    _ => b"-ERR unknown command\r\n".to_vec(),
                },
                _ => b"-ERR protocol error\r\n".to_vec(),
            };
            if socket.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

/// An address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A running gateway on an ephemeral port.
pub struct Gateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub registry: ConnectionRegistry,
    pub task: JoinHandle<io::Result<()>>,
}

pub fn gateway_config(backend: &str, reconnect_delay_ms: u64) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.backend.address = backend.to_string();
    config.backend.reconnect_delay_ms = reconnect_delay_ms;
    config.backend.connect_timeout_ms = 500;
    config
}

pub async fn start_gateway(config: GatewayConfig) -> Gateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = GatewayServer::new(config);
    let registry = server.registry();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(server.run(Listener::from_tcp(listener), shutdown.subscribe()));

    Gateway {
        addr,
        shutdown,
        registry,
        task,
    }
}

/// Send raw request bytes and read until the gateway closes the connection.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    read_until_close(&mut stream).await
}

/// Read until EOF; a reset counts as EOF.
pub async fn read_until_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let _ = stream.read_to_end(&mut out).await;
    out
}

pub async fn get(addr: SocketAddr, key: &str) -> Vec<u8> {
    send_raw(addr, format!("GET /{} HTTP/1.0\r\n\r\n", key).as_bytes()).await
}

/// Status code of a raw response, or 0 when nothing was written.
pub fn status_of(response: &[u8]) -> u16 {
    response
        .get(9..12)
        .and_then(|code| std::str::from_utf8(code).ok())
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

pub fn body_of(response: &[u8]) -> &[u8] {
    response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| &response[pos + 4..])
        .unwrap_or(&[])
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the gateway answers lookups instead of 502.
pub async fn wait_until_connected(addr: SocketAddr) {
    for _ in 0..500 {
        if status_of(&get(addr, "__probe__").await) == 404 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("gateway never connected to the backend");
}
