//! Backend store subsystem.
//!
//! # Data Flow
//! ```text
//! Connection (AWAITING_BACKEND)
//!     → BackendHandle::lookup(key)          (channel-per-call)
//!     → supervisor.rs (single session, pipelined, FIFO reply matching)
//!     → protocol.rs (RESP2 encode GET / decode reply)
//!     → reply channel resolves PendingLookup
//! ```
//!
//! # Design Decisions
//! - One session, never shared or cloned outside the supervisor task
//! - Fixed reconnect delay; the store is expected to be co-located
//! - A lost session fails every call it owned by dropping its reply channel

pub mod protocol;
pub mod supervisor;

pub use supervisor::{
    BackendError, BackendHandle, BackendStatus, BackendSupervisor, Lookup, LookupRequest,
    LookupResult, PendingLookup,
};
