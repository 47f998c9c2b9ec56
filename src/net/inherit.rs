//! Inherited listening sockets.
//!
//! A supervising process (e.g. a hot-restart wrapper) can bind the
//! listening socket itself and pass it down. The descriptors are announced
//! in an environment variable as `;`-separated `address=fd` entries:
//!
//! ```text
//! SERVER_STARTER_PORT="0.0.0.0:9999=3;/run/gw.sock=4;8080=5"
//! ```

use std::os::fd::RawFd;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InheritError {
    #[error("malformed inherited socket entry {0:?} (expected address=fd)")]
    Malformed(String),
}

/// Lowest descriptor accepted; 0-2 are the standard streams.
const FIRST_INHERITABLE_FD: RawFd = 3;

/// One `address=fd` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedSocket {
    pub address: String,
    pub fd: RawFd,
}

pub fn parse_inherited(value: &str) -> Result<Vec<InheritedSocket>, InheritError> {
    value
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (address, fd) = entry
                .rsplit_once('=')
                .ok_or_else(|| InheritError::Malformed(entry.to_string()))?;
            let fd = fd
                .parse::<RawFd>()
                .ok()
                .filter(|fd| *fd >= FIRST_INHERITABLE_FD)
                .ok_or_else(|| InheritError::Malformed(entry.to_string()))?;
            if address.is_empty() {
                return Err(InheritError::Malformed(entry.to_string()));
            }
            Ok(InheritedSocket {
                address: address.to_string(),
                fd,
            })
        })
        .collect()
}

/// Find the descriptor announced for `address`.
///
/// Matches the exact address string, a `unix:` address against its bare
/// path, or a port-only entry against any `host:port` with that port.
pub fn find_inherited(entries: &[InheritedSocket], address: &str) -> Option<RawFd> {
    let bare = address.strip_prefix("unix:").unwrap_or(address);
    let port = address.rsplit_once(':').map(|(_, port)| port);

    entries
        .iter()
        .find(|entry| {
            entry.address == address
                || entry.address == bare
                || (entry.address.bytes().all(|b| b.is_ascii_digit())
                    && Some(entry.address.as_str()) == port)
        })
        .map(|entry| entry.fd)
}

/// Look up `address` in the environment variable `var`.
pub fn from_env(var: &str, address: &str) -> Result<Option<RawFd>, InheritError> {
    match std::env::var(var) {
        Ok(value) => Ok(find_inherited(&parse_inherited(&value)?, address)),
        Err(_) => Ok(None),
    }
}
