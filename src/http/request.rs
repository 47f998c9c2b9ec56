//! Request-line tokenizing and validation.
//!
//! # Responsibilities
//! - Run the accumulated read buffer through `httparse`
//! - Report incomplete / malformed / complete
//! - Turn a complete request into a lookup key, or reject it
//!
//! The key is the request path minus its leading `/`, used verbatim: no
//! percent-decoding and no query stripping.

use bytes::Bytes;

/// Outcome of one parse attempt over the whole buffer so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// More bytes are needed.
    Incomplete,
    /// The bytes can never form a valid request.
    Malformed,
    Complete(RequestLine),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
}

/// Why a complete request cannot be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    UnsupportedMethod,
    EmptyKey,
}

pub fn parse_request(buf: &[u8], max_headers: usize) -> ParseOutcome {
    let mut headers = vec![httparse::EMPTY_HEADER; max_headers];
    let mut request = httparse::Request::new(&mut headers);

    match request.parse(buf) {
        Ok(httparse::Status::Complete(_)) => match (request.method, request.path) {
            (Some(method), Some(path)) => ParseOutcome::Complete(RequestLine {
                method: method.to_string(),
                path: path.to_string(),
            }),
            _ => ParseOutcome::Malformed,
        },
        Ok(httparse::Status::Partial) => ParseOutcome::Incomplete,
        Err(_) => ParseOutcome::Malformed,
    }
}

impl RequestLine {
    /// The backend key this request addresses.
    pub fn lookup_key(&self) -> Result<Bytes, Rejection> {
        if self.method != "GET" {
            return Err(Rejection::UnsupportedMethod);
        }
        match self.path.strip_prefix('/') {
            Some(key) if !key.is_empty() => Ok(Bytes::copy_from_slice(key.as_bytes())),
            _ => Err(Rejection::EmptyKey),
        }
    }
}
