//! Listening socket: TCP or Unix, bound here or inherited.
//!
//! # Responsibilities
//! - Bind to the configured endpoint with `SO_REUSEADDR` and the configured backlog
//! - Or adopt an already-bound descriptor announced by a supervising process
//! - Accept incoming connections
//! - Unlink Unix socket files this process created when released

use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

use tokio::net::{TcpListener, TcpSocket, TcpStream, UnixListener, UnixStream};

use crate::config::{Endpoint, ListenerConfig};
use crate::net::inherit::{self, InheritError};

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// The inherited-socket announcement could not be used.
    Inherit(InheritError),
    /// Failed to adopt an inherited descriptor.
    Adopt(RawFd, std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Inherit(e) => write!(f, "Failed to inherit socket: {}", e),
            ListenerError::Adopt(fd, e) => write!(f, "Failed to adopt descriptor {}: {}", fd, e),
        }
    }
}

impl std::error::Error for ListenerError {}

enum Inner {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// An accepted client socket.
#[derive(Debug)]
pub enum ClientStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// The accept socket.
pub struct Listener {
    inner: Inner,
    /// Socket file to remove on drop; only set when this process bound it.
    unlink: Option<PathBuf>,
}

impl Listener {
    /// Bind to the configured endpoint, preferring an inherited descriptor.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let endpoint: Endpoint = config
            .address
            .parse()
            .map_err(|e| ListenerError::Bind(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        if let Some(fd) =
            inherit::from_env(&config.inherit_env, &config.address).map_err(ListenerError::Inherit)?
        {
            let listener = Self::from_inherited(&endpoint, fd)?;
            tracing::info!(address = %endpoint, fd, "Adopted inherited listener");
            return Ok(listener);
        }

        let listener = match &endpoint {
            Endpoint::Tcp(addr) => Self::bind_tcp(addr, config.backlog).await?,
            Endpoint::Unix(path) => Self {
                inner: Inner::Unix(UnixListener::bind(path).map_err(ListenerError::Bind)?),
                unlink: Some(path.clone()),
            },
        };

        tracing::info!(
            address = %listener.local_addr().unwrap_or_else(|_| endpoint.to_string()),
            backlog = config.backlog,
            "Listener bound"
        );
        Ok(listener)
    }

    /// Wrap an already-bound tokio TCP listener.
    pub fn from_tcp(listener: TcpListener) -> Self {
        Self {
            inner: Inner::Tcp(listener),
            unlink: None,
        }
    }

    /// Wrap an already-bound tokio Unix listener. The socket file is left in
    /// place on drop.
    pub fn from_unix(listener: UnixListener) -> Self {
        Self {
            inner: Inner::Unix(listener),
            unlink: None,
        }
    }

    async fn bind_tcp(addr: &str, backlog: u32) -> Result<Self, ListenerError> {
        let mut last_error = None;
        for resolved in tokio::net::lookup_host(addr).await.map_err(ListenerError::Bind)? {
            let socket = if resolved.is_ipv4() {
                TcpSocket::new_v4()
            } else {
                TcpSocket::new_v6()
            };
            let attempt = socket.and_then(|socket| {
                socket.set_reuseaddr(true)?;
                socket.bind(resolved)?;
                socket.listen(backlog)
            });
            match attempt {
                Ok(listener) => return Ok(Self::from_tcp(listener)),
                Err(e) => last_error = Some(e),
            }
        }
        Err(ListenerError::Bind(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("{addr} did not resolve"))
        })))
    }

    fn from_inherited(endpoint: &Endpoint, fd: RawFd) -> Result<Self, ListenerError> {
        // SAFETY: the supervising process hands this descriptor to us and
        // does not use it afterwards; we take sole ownership here. Standard
        // streams are refused while parsing the announcement.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        let adopt = |e| ListenerError::Adopt(fd, e);

        match endpoint {
            Endpoint::Tcp(_) => {
                let std_listener = std::net::TcpListener::from(owned);
                // getsockname fails with ENOTSOCK for anything but a socket.
                std_listener.local_addr().map_err(adopt)?;
                std_listener.set_nonblocking(true).map_err(adopt)?;
                Ok(Self::from_tcp(TcpListener::from_std(std_listener).map_err(adopt)?))
            }
            Endpoint::Unix(_) => {
                let std_listener = std::os::unix::net::UnixListener::from(owned);
                std_listener.local_addr().map_err(adopt)?;
                std_listener.set_nonblocking(true).map_err(adopt)?;
                Ok(Self::from_unix(UnixListener::from_std(std_listener).map_err(adopt)?))
            }
        }
    }

    /// Accept one connection. Returns the stream and a peer description.
    pub async fn accept(&self) -> io::Result<(ClientStream, String)> {
        match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((ClientStream::Tcp(stream), peer.to_string()))
            }
            Inner::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((ClientStream::Unix(stream), "unix".to_string()))
            }
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<String> {
        match &self.inner {
            Inner::Tcp(listener) => Ok(listener.local_addr()?.to_string()),
            Inner::Unix(listener) => {
                let addr = listener.local_addr()?;
                Ok(match addr.as_pathname() {
                    Some(path) => format!("unix:{}", path.display()),
                    None => "unix:(unnamed)".to_string(),
                })
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(path) = self.unlink.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}
