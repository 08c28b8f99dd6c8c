//! Relay Protocol - Wire protocol for WebSocket chat clients
//!
//! This crate provides the JSON message shape exchanged with browser
//! clients, the decoding of inbound frames, and the response bodies of
//! the history/chats query surface.

pub mod message;
pub mod parse;

pub use message::{ChatSummary, PeerNotice, WireMessage};
pub use parse::{
    decode_inbound, encode_message, encode_notice, InboundMessage, ProtocolError, MAX_FRAME_SIZE,
};
