//! Relay Core - Shared types for the relay chat daemon
//!
//! This crate provides the domain types shared between the wire
//! protocol (relay-protocol) and the daemon (relayd).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod identity;
pub mod message;
pub mod mode;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use identity::{ConnectionId, Identity, ANONYMOUS_PREFIX, MAX_IDENTITY_LEN};
pub use message::{ChatMessage, MessageId};
pub use mode::RoutingMode;
