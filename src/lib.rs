//! HTTP gateway for a key-value store.
//!
//! Serves `GET /<key>` by looking `<key>` up in a RESP-speaking store and
//! returning the value. Read-only, one request per connection, HTTP/1.0.

pub mod backend;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use backend::{BackendHandle, BackendStatus, BackendSupervisor};
pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
