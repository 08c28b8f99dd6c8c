//! Decoding inbound frames and encoding outbound ones.

use relay_core::{ChatMessage, DomainError, Identity};
use thiserror::Error;

use crate::message::{PeerNotice, WireMessage};

/// Maximum accepted inbound frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// A decoded client frame, before the server stamps the sender.
///
/// Any `sender`, `id` or `timestamp` the client put on the wire is
/// discarded here; the reader path supplies the authoritative values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub recipient: Option<Identity>,
    pub content: String,
}

impl InboundMessage {
    /// Stamps the sender and turns the frame into a routable message.
    pub fn into_message(self, sender: Identity) -> ChatMessage {
        ChatMessage::new(sender, self.recipient, self.content)
    }
}

/// Errors produced while decoding or encoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(#[from] DomainError),
}

/// Decodes one inbound frame.
///
/// An empty or whitespace-only `recipient` is treated as absent.
pub fn decode_inbound(bytes: &[u8]) -> Result<InboundMessage, ProtocolError> {
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    let wire: WireMessage = serde_json::from_str(text)?;

    let recipient = match wire.recipient.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(Identity::parse(raw)?),
    };

    Ok(InboundMessage {
        recipient,
        content: wire.content.unwrap_or_default(),
    })
}

/// Serializes a message for delivery to clients.
pub fn encode_message(msg: &ChatMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&WireMessage::from(msg))?)
}

/// Serializes a membership notice for delivery to clients.
pub fn encode_notice(notice: &PeerNotice) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&notice.to_wire())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_direct_message() {
        let inbound = decode_inbound(br#"{"recipient":"bob","content":"hi"}"#).unwrap();
        assert_eq!(inbound.recipient, Some(Identity::new("bob")));
        assert_eq!(inbound.content, "hi");
    }

    #[test]
    fn test_decode_ignores_client_sender() {
        let inbound =
            decode_inbound(br#"{"sender":"mallory","recipient":"bob","content":"hi"}"#).unwrap();
        let msg = inbound.into_message(Identity::new("alice"));
        assert_eq!(msg.sender, Identity::new("alice"));
    }

    #[test]
    fn test_decode_empty_recipient_is_none() {
        let inbound = decode_inbound(br#"{"recipient":"  ","content":"hello room"}"#).unwrap();
        assert_eq!(inbound.recipient, None);

        let inbound = decode_inbound(br#"{"content":"hello room"}"#).unwrap();
        assert_eq!(inbound.recipient, None);
    }

    #[test]
    fn test_decode_missing_content_defaults_to_empty() {
        let inbound = decode_inbound(br#"{"recipient":"bob"}"#).unwrap();
        assert_eq!(inbound.content, "");
    }

    #[test]
    fn test_decode_malformed_json() {
        assert!(matches!(
            decode_inbound(b"{not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_inbound(br#""just a string""#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        assert!(matches!(
            decode_inbound(&[0xff, 0xfe, 0x7b]),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_decode_frame_too_large() {
        let big = vec![b' '; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            decode_inbound(&big),
            Err(ProtocolError::FrameTooLarge { max: MAX_FRAME_SIZE, .. })
        ));
    }

    #[test]
    fn test_decode_invalid_recipient() {
        let frame = format!(r#"{{"recipient":"{}","content":"x"}}"#, "r".repeat(100));
        assert!(matches!(
            decode_inbound(frame.as_bytes()),
            Err(ProtocolError::InvalidRecipient(DomainError::IdentityTooLong { .. }))
        ));
    }

    #[test]
    fn test_encode_message() {
        let msg = ChatMessage::new(Identity::new("alice"), Some(Identity::new("bob")), "hi");
        let json = encode_message(&msg).unwrap();
        assert_eq!(json, r#"{"sender":"alice","recipient":"bob","content":"hi"}"#);
    }

    #[test]
    fn test_encode_notice() {
        let json = encode_notice(&PeerNotice::Left(Identity::new("erin"))).unwrap();
        assert_eq!(json, r#"{"content":"erin left"}"#);
    }
}
