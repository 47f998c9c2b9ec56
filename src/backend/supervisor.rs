//! Backend supervisor: owns the single session to the key-value store.
//!
//! # Responsibilities
//! - Connect to the configured endpoint (TCP or Unix socket)
//! - Pipeline lookups over the session and match replies in order
//! - Detect disconnects and reconnect after a fixed delay
//! - Stop reconnecting once draining, and close the session on terminate
//!
//! # Status transitions
//! ```text
//! Disconnected → Connecting → Connected → Disconnected → ...
//!          any → Terminated (absorbing)
//! ```
//!
//! Callers never touch the session. They hold a [`BackendHandle`], which
//! sends `(key, reply channel)` pairs to the supervisor task; a dropped reply
//! channel is how a caller learns its call failed.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::backend::protocol::{self, RespValue};
use crate::config::{BackendConfig, Endpoint};
use crate::observability::metrics;

/// Connectivity of the backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Disconnected,
    Connecting,
    Connected,
    Terminated,
}

/// Successful outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The key holds this value.
    Found(Bytes),
    /// The key does not exist.
    Missing,
}

/// Why a lookup produced no value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The call reached the supervisor while no session was connected.
    #[error("backend is not connected")]
    Unavailable,

    /// The session went away before the reply arrived.
    #[error("backend session dropped before the call completed")]
    CallDropped,

    /// The store answered with an error reply.
    #[error("backend error reply: {0}")]
    Reply(String),

    /// The store answered with something that is not a lookup result.
    #[error("unexpected reply to lookup: {0}")]
    UnexpectedReply(String),
}

impl BackendError {
    /// True when the call never got an answer from the store.
    pub fn is_call_failure(&self) -> bool {
        matches!(self, BackendError::Unavailable | BackendError::CallDropped)
    }
}

pub type LookupResult = Result<Lookup, BackendError>;

/// A lookup travelling from a connection to the supervisor.
#[derive(Debug)]
pub struct LookupRequest {
    pub key: Bytes,
    pub reply: oneshot::Sender<LookupResult>,
}

/// Cheap, cloneable access to the supervisor for connections.
#[derive(Debug, Clone)]
pub struct BackendHandle {
    requests: mpsc::UnboundedSender<LookupRequest>,
    status: watch::Receiver<BackendStatus>,
}

impl BackendHandle {
    /// Current session status.
    pub fn status(&self) -> BackendStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == BackendStatus::Connected
    }

    /// Issue a lookup. Returns immediately; the result arrives through the
    /// returned future.
    pub fn lookup(&self, key: Bytes) -> PendingLookup {
        let (reply, rx) = oneshot::channel();
        // A closed channel drops `reply`, which resolves `rx` as a failed call.
        let _ = self.requests.send(LookupRequest { key, reply });
        PendingLookup { rx }
    }

    /// A handle wired to the caller instead of a supervisor task.
    ///
    /// The caller plays the store: it decides the reported status and
    /// answers (or drops) each [`LookupRequest`].
    pub fn detached(
        status: BackendStatus,
    ) -> (
        Self,
        watch::Sender<BackendStatus>,
        mpsc::UnboundedReceiver<LookupRequest>,
    ) {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(status);
        (Self { requests, status }, status_tx, requests_rx)
    }
}

/// Future resolving to the result of one lookup.
#[derive(Debug)]
pub struct PendingLookup {
    rx: oneshot::Receiver<LookupResult>,
}

impl Future for PendingLookup {
    type Output = LookupResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(BackendError::CallDropped)))
    }
}

/// Lifecycle commands from the server to the supervisor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    /// Keep the current session for in-flight calls, but never reconnect.
    Draining,
    Terminate,
}

/// Owner of the supervisor task.
pub struct BackendSupervisor {
    control: watch::Sender<Control>,
    task: JoinHandle<()>,
}

impl BackendSupervisor {
    /// Start the supervisor task. The first connect attempt begins
    /// immediately.
    pub fn spawn(endpoint: Endpoint, config: &BackendConfig) -> (Self, BackendHandle) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(BackendStatus::Disconnected);
        let (control_tx, control_rx) = watch::channel(Control::Run);

        let task = SupervisorTask {
            endpoint,
            reconnect_delay: config.reconnect_delay(),
            connect_timeout: config.connect_timeout(),
            requests: requests_rx,
            status: status_tx,
            control: control_rx,
        };
        let task = tokio::spawn(task.run());

        let handle = BackendHandle {
            requests: requests_tx,
            status: status_rx,
        };
        let supervisor = Self {
            control: control_tx,
            task,
        };
        (supervisor, handle)
    }

    /// Stop scheduling reconnects. An established session stays up so
    /// in-flight calls can complete.
    pub fn begin_drain(&self) {
        self.control.send_if_modified(|control| {
            if *control == Control::Run {
                *control = Control::Draining;
                true
            } else {
                false
            }
        });
    }

    /// Close the session, cancel any pending reconnect and wait for the
    /// task to finish.
    pub async fn terminate(self) {
        let _ = self.control.send(Control::Terminate);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Backend supervisor task failed");
        }
    }
}

enum BackendStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// How a session ended.
enum SessionEnd {
    Terminated,
    Lost(String),
}

struct SupervisorTask {
    endpoint: Endpoint,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    requests: mpsc::UnboundedReceiver<LookupRequest>,
    status: watch::Sender<BackendStatus>,
    control: watch::Receiver<Control>,
}

impl SupervisorTask {
    async fn run(mut self) {
        while self.control() == Control::Run {
            self.set_status(BackendStatus::Connecting);

            let attempt = tokio::select! {
                attempt = connect(&self.endpoint, self.connect_timeout) => Some(attempt),
                _ = terminated(&mut self.control) => None,
            };

            match attempt {
                None => break,
                Some(Ok(stream)) => {
                    self.set_status(BackendStatus::Connected);
                    tracing::info!(endpoint = %self.endpoint, "Connected to backend");

                    let end = match stream {
                        BackendStream::Tcp(s) => self.serve(s).await,
                        BackendStream::Unix(s) => self.serve(s).await,
                    };
                    match end {
                        SessionEnd::Terminated => break,
                        SessionEnd::Lost(reason) => {
                            self.set_status(BackendStatus::Disconnected);
                            tracing::warn!(
                                endpoint = %self.endpoint,
                                reason = %reason,
                                "Disconnected from backend"
                            );
                            self.fail_queued();
                        }
                    }
                }
                Some(Err(e)) => {
                    self.set_status(BackendStatus::Disconnected);
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "Backend connect failed");
                }
            }

            if self.control() != Control::Run {
                break;
            }
            tracing::info!(
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "Backend reconnect scheduled"
            );
            if !self.wait_reconnect_delay().await {
                break;
            }
            metrics::backend_reconnect();
        }

        if self.status() != BackendStatus::Terminated && self.control() != Control::Terminate {
            self.set_status(BackendStatus::Disconnected);
            self.idle_until_terminated().await;
        }
        self.set_status(BackendStatus::Terminated);
        self.requests.close();
        self.fail_queued();
        tracing::info!("Backend supervisor terminated");
    }

    /// Drive one session until it is lost or the supervisor terminates.
    async fn serve<S>(&mut self, stream: S) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut in_flight: VecDeque<oneshot::Sender<LookupResult>> = VecDeque::new();
        let mut read_buf = BytesMut::with_capacity(4096);
        let mut write_buf = BytesMut::with_capacity(256);

        loop {
            tokio::select! {
                changed = self.control.changed() => {
                    if changed.is_err() || *self.control.borrow() == Control::Terminate {
                        return SessionEnd::Terminated;
                    }
                }
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        return SessionEnd::Terminated;
                    };
                    write_buf.clear();
                    protocol::encode_get(&request.key, &mut write_buf);
                    if let Err(e) = writer.write_all(&write_buf).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                    in_flight.push_back(request.reply);
                }
                read = reader.read_buf(&mut read_buf) => {
                    match read {
                        Ok(0) => return SessionEnd::Lost("connection closed by backend".into()),
                        Ok(_) => {}
                        Err(e) => return SessionEnd::Lost(e.to_string()),
                    }
                    loop {
                        match protocol::decode(&mut read_buf) {
                            Ok(Some(value)) => {
                                let Some(reply) = in_flight.pop_front() else {
                                    return SessionEnd::Lost("reply without a pending call".into());
                                };
                                let _ = reply.send(lookup_result(value));
                            }
                            Ok(None) => break,
                            Err(e) => return SessionEnd::Lost(e.to_string()),
                        }
                    }
                }
            }
        }
    }

    /// Sleep out the reconnect delay. Returns false if the supervisor was
    /// told to stop reconnecting in the meantime.
    async fn wait_reconnect_delay(&mut self) -> bool {
        let delay = tokio::time::sleep(self.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return true,
                changed = self.control.changed() => {
                    if changed.is_err() || *self.control.borrow() != Control::Run {
                        return false;
                    }
                }
                request = self.requests.recv() => match request {
                    Some(request) => reject(request),
                    None => return false,
                },
            }
        }
    }

    async fn idle_until_terminated(&mut self) {
        loop {
            tokio::select! {
                changed = self.control.changed() => {
                    if changed.is_err() || *self.control.borrow() == Control::Terminate {
                        return;
                    }
                }
                request = self.requests.recv() => match request {
                    Some(request) => reject(request),
                    None => return,
                },
            }
        }
    }

    /// Fail calls that were queued against a session that no longer exists.
    fn fail_queued(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            let _ = request.reply.send(Err(BackendError::CallDropped));
        }
    }

    fn control(&self) -> Control {
        *self.control.borrow()
    }

    fn status(&self) -> BackendStatus {
        *self.status.borrow()
    }

    /// Terminated is absorbing: once set, later transitions are ignored.
    fn set_status(&self, next: BackendStatus) {
        let mut previous = next;
        let changed = self.status.send_if_modified(|status| {
            previous = *status;
            if *status == BackendStatus::Terminated || *status == next {
                return false;
            }
            *status = next;
            true
        });
        if changed {
            tracing::debug!(from = ?previous, to = ?next, "Backend status changed");
            metrics::backend_connected(next == BackendStatus::Connected);
        }
    }
}

async fn terminated(control: &mut watch::Receiver<Control>) {
    let _ = control.wait_for(|c| *c == Control::Terminate).await;
}

fn reject(request: LookupRequest) {
    let _ = request.reply.send(Err(BackendError::Unavailable));
}

async fn connect(endpoint: &Endpoint, timeout: Duration) -> io::Result<BackendStream> {
    let attempt = async {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(BackendStream::Tcp(stream))
            }
            Endpoint::Unix(path) => Ok(BackendStream::Unix(UnixStream::connect(path).await?)),
        }
    };
    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "backend connect timed out"))?
}

/// Map a reply to a `GET` onto a lookup outcome.
pub fn lookup_result(value: RespValue) -> LookupResult {
    match value {
        RespValue::Bulk(bytes) => Ok(Lookup::Found(bytes)),
        RespValue::Null => Ok(Lookup::Missing),
        RespValue::Simple(s) => Ok(Lookup::Found(Bytes::from(s))),
        RespValue::Integer(n) => Ok(Lookup::Found(Bytes::from(n.to_string()))),
        RespValue::Error(message) => Err(BackendError::Reply(message)),
        RespValue::Array(items) => Err(BackendError::UnexpectedReply(format!(
            "array of {} elements",
            items.len()
        ))),
    }
}
