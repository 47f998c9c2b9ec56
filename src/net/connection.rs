//! Per-connection state machine.
//!
//! # States
//! ```text
//! Reading ──complete GET, backend up──▶ AwaitingBackend ──reply──▶ Closed
//!    │                                  (socket no longer read)
//!    ├─ incomplete: keep reading
//!    ├─ malformed / bad method / empty key: 400
//!    ├─ backend down: 502
//!    └─ EOF / read error ──────────────────────────────────────────▶ Closed
//! ```
//!
//! A connection owns both its socket and its pending lookup, so it can only
//! be torn down after the lookup resolves. Registry removal happens when the
//! connection (and with it the [`ConnectionGuard`]) is dropped.
//!
//! End-of-stream while reading means the request will never complete. Once
//! the lookup is dispatched the socket is only written, so a client that
//! half-closes after its request still receives the response.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::backend::BackendHandle;
use crate::config::LimitsConfig;
use crate::http::request::{parse_request, ParseOutcome};
use crate::http::response::Response;
use crate::net::registry::{ConnectionGuard, ConnectionId};
use crate::observability::metrics;

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accumulating request bytes.
    Reading,
    /// One lookup is outstanding; nothing else happens until it resolves.
    AwaitingBackend,
    /// Socket shut down, buffer released.
    Closed,
}

/// What the reading phase decided.
#[derive(Debug)]
enum ReadOutcome {
    Dispatch(Bytes),
    Reject(Response),
    Close,
}

/// One accepted client socket.
pub struct Connection<S> {
    stream: S,
    read_buffer: BytesMut,
    state: ConnectionState,
    /// The socket already failed; skip the orderly shutdown.
    had_error: bool,
    backend: BackendHandle,
    limits: LimitsConfig,
    guard: ConnectionGuard,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        guard: ConnectionGuard,
        backend: BackendHandle,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            stream,
            read_buffer: BytesMut::with_capacity(limits.read_chunk_bytes),
            state: ConnectionState::Reading,
            had_error: false,
            backend,
            limits,
            guard,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    /// Drive the connection from first read to close.
    pub async fn run(mut self) {
        match self.read_request().await {
            ReadOutcome::Dispatch(key) => self.await_backend(key).await,
            ReadOutcome::Reject(response) => {
                tracing::debug!(
                    connection_id = %self.id(),
                    status = response.status(),
                    "Request rejected"
                );
                self.write_response(response).await;
            }
            ReadOutcome::Close => {}
        }
        self.close().await;
    }

    async fn read_request(&mut self) -> ReadOutcome {
        loop {
            if self.read_buffer.len() >= self.limits.max_request_bytes {
                tracing::debug!(
                    connection_id = %self.id(),
                    buffered = self.read_buffer.len(),
                    "Request exceeds size limit"
                );
                return ReadOutcome::Reject(Response::BadRequest);
            }

            let chunk = self.limits.read_chunk_bytes;
            self.read_buffer.reserve(chunk);
            let read = {
                let mut limited = (&mut self.read_buffer).limit(chunk);
                self.stream.read_buf(&mut limited).await
            };

            match read {
                Ok(0) => {
                    tracing::debug!(connection_id = %self.id(), "Connection closed by peer");
                    self.had_error = true;
                    return ReadOutcome::Close;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    tracing::debug!(connection_id = %self.id(), error = %e, "Read failed");
                    self.had_error = true;
                    return ReadOutcome::Close;
                }
            }

            let line = match parse_request(&self.read_buffer, self.limits.max_headers) {
                ParseOutcome::Incomplete => continue,
                ParseOutcome::Malformed => return ReadOutcome::Reject(Response::BadRequest),
                ParseOutcome::Complete(line) => line,
            };

            let key = match line.lookup_key() {
                Ok(key) => key,
                Err(rejection) => {
                    tracing::debug!(
                        connection_id = %self.id(),
                        method = %line.method,
                        path = %line.path,
                        reason = ?rejection,
                        "Unsupported request"
                    );
                    return ReadOutcome::Reject(Response::BadRequest);
                }
            };

            if !self.backend.is_connected() {
                return ReadOutcome::Reject(Response::BadGateway);
            }
            return ReadOutcome::Dispatch(key);
        }
    }

    /// Issue the lookup and wait for it. The socket is not read again: a
    /// peer that half-closed after its request still gets the response, and
    /// a peer that is really gone shows up as a failed write.
    async fn await_backend(&mut self, key: Bytes) {
        tracing::debug!(connection_id = %self.id(), key = ?key, "Dispatching lookup");
        self.state = ConnectionState::AwaitingBackend;
        let result = self.backend.lookup(key).await;

        match Response::from_lookup(result) {
            Some(response) => self.write_response(response).await,
            None => {
                tracing::debug!(
                    connection_id = %self.id(),
                    "Backend call failed; closing without response"
                );
            }
        }
    }

    async fn write_response(&mut self, response: Response) {
        let status = response.status();
        let mut buf = response.into_buf();
        match self.stream.write_all_buf(&mut buf).await {
            Ok(()) => metrics::record_response(status),
            Err(e) => {
                tracing::debug!(connection_id = %self.id(), error = %e, "Response write failed");
                self.had_error = true;
            }
        }
    }

    async fn close(mut self) {
        if !self.had_error {
            // Fails harmlessly when the peer is already gone.
            let _ = self.stream.shutdown().await;
        }
        tracing::debug!(
            connection_id = %self.id(),
            from = ?self.state,
            had_error = self.had_error,
            "Connection closed"
        );
        self.state = ConnectionState::Closed;
    }
}
