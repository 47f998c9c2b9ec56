//! Response assembly.
//!
//! # Responsibilities
//! - Map a lookup outcome (or a request-level failure) to a status
//! - Produce the exact HTTP/1.0 bytes written to the client
//!
//! # Design Decisions
//! - Every response is HTTP/1.0 with `Connection: close`
//! - Error bodies are fixed plain text; value bodies are the stored bytes
//! - Header and body are kept as separate buffers and written as one chain

use bytes::{Buf, Bytes};

use crate::backend::{BackendError, Lookup, LookupResult};

const BAD_REQUEST: &[u8] = b"HTTP/1.0 400 Bad Request\r\n\
Content-Type: text/plain\r\n\
Content-Length: 11\r\n\
Connection: close\r\n\
\r\n\
Bad Request";

const NOT_FOUND: &[u8] = b"HTTP/1.0 404 Not Found\r\n\
Content-Type: text/plain\r\n\
Content-Length: 9\r\n\
Connection: close\r\n\
\r\n\
Not Found";

const BAD_GATEWAY: &[u8] = b"HTTP/1.0 502 Bad Gateway\r\n\
Content-Type: text/plain\r\n\
Content-Length: 11\r\n\
Connection: close\r\n\
\r\n\
Bad Gateway";

const OK_HEAD: &str = "HTTP/1.0 200 OK\r\nConnection: close\r\n";

/// A response ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// 200 with the stored value as body.
    Value(Bytes),
    NotFound,
    BadRequest,
    BadGateway,
}

impl Response {
    /// The response for a completed lookup, or `None` when the call never
    /// got an answer and the connection should close without a reply.
    pub fn from_lookup(result: LookupResult) -> Option<Response> {
        match result {
            Ok(Lookup::Found(value)) => Some(Response::Value(value)),
            Ok(Lookup::Missing) => Some(Response::NotFound),
            Err(e) if e.is_call_failure() => None,
            Err(BackendError::Reply(message)) => {
                tracing::debug!(error = %message, "Backend refused lookup");
                Some(Response::BadGateway)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Backend returned unusable reply");
                Some(Response::BadGateway)
            }
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Response::Value(_) => 200,
            Response::NotFound => 404,
            Response::BadRequest => 400,
            Response::BadGateway => 502,
        }
    }

    /// Serialize into the bytes sent on the wire: head first, then body.
    pub fn into_buf(self) -> impl Buf {
        let (head, body) = match self {
            Response::Value(value) => {
                let head = format!("{}Content-Length: {}\r\n\r\n", OK_HEAD, value.len());
                (Bytes::from(head), value)
            }
            Response::NotFound => (Bytes::from_static(NOT_FOUND), Bytes::new()),
            Response::BadRequest => (Bytes::from_static(BAD_REQUEST), Bytes::new()),
            Response::BadGateway => (Bytes::from_static(BAD_GATEWAY), Bytes::new()),
        };
        head.chain(body)
    }
}
