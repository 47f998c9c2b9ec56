//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming connection (TCP or Unix)
//!     → listener.rs (bound here, or inherited via inherit.rs)
//!     → registry.rs (registration; refused once shutdown begins)
//!     → connection.rs (read → parse → dispatch → respond → close)
//! ```
//!
//! # Design Decisions
//! - One task per connection; the task owns socket, buffer and pending lookup
//! - Registry membership is a drop guard, so release happens exactly once
//! - Shutdown completes only when the registry is closing and empty

pub mod connection;
pub mod inherit;
pub mod listener;
pub mod registry;

pub use connection::{Connection, ConnectionState};
pub use listener::{ClientStream, Listener, ListenerError};
pub use registry::{ConnectionGuard, ConnectionId, ConnectionRegistry};
