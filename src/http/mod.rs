//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted socket
//!     → server.rs (accept loop, spawns a connection task)
//!     → request.rs (tokenize request line, derive lookup key)
//!     → [backend lookup]
//!     → response.rs (status mapping, exact response bytes)
//!     → Send to client, close
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{parse_request, ParseOutcome, Rejection, RequestLine};
pub use response::Response;
pub use server::GatewayServer;
