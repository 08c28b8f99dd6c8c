//! Relay Daemon - Connection hub and WebSocket chat server
//!
//! This crate provides the core infrastructure for the relay daemon:
//! - `hub` - Actor owning the membership table and routing policy
//! - `server` - axum server, per-connection reader/writer paths
//! - `store` - Message persistence and the background recorder
//! - `config` - Layered configuration
//! - `cli` - The `relayd` command line
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       relayd daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │  RelayServer    │────▶│         HubActor            │    │
//! │  │ (axum, /ws)     │     │  (membership table owner)   │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │                             │                   │
//! │           │ connections                 │ try_send          │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │ConnectionHandler│◀────│   per-connection mailbox    │    │
//! │  │ (reader/writer) │     │   (bounded mpsc)            │    │
//! │  └────────┬────────┘     └─────────────────────────────┘    │
//! │           │ submit                                          │
//! │           ▼                                                 │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │    Recorder     │────▶│  MessageStore (memory/sql)  │    │
//! │  └─────────────────┘     └─────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod cli;
pub mod config;
pub mod hub;
pub mod server;
pub mod store;
