//! Participant and connection identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Maximum length of an identity in bytes.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Prefix used for identities generated for clients that did not name themselves.
pub const ANONYMOUS_PREFIX: &str = "anon-";

/// Identity of a chat participant.
///
/// Chosen by the client at connect time (`?username=`) or generated by the
/// server. Uniqueness is not enforced beyond last-registration-wins in
/// direct mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Creates an identity without validation.
    ///
    /// Use [`Identity::parse`] for values that come from a client.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses and validates a client-supplied identity.
    ///
    /// Surrounding whitespace is trimmed. The result must be non-empty,
    /// at most [`MAX_IDENTITY_LEN`] bytes, and free of control characters.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(DomainError::EmptyIdentity);
        }

        if trimmed.len() > MAX_IDENTITY_LEN {
            return Err(DomainError::IdentityTooLong {
                len: trimmed.len(),
                max: MAX_IDENTITY_LEN,
            });
        }

        if trimmed.chars().any(char::is_control) {
            return Err(DomainError::InvalidIdentity(trimmed.to_string()));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Generates an opaque identity for an unnamed connection.
    pub fn anonymous(connection: ConnectionId) -> Self {
        Self(format!("{ANONYMOUS_PREFIX}{}", connection.get()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Server-assigned identifier of one physical connection.
///
/// Several connections may share an identity (broadcast mode, or briefly
/// during a direct-mode replacement), so the hub tracks connections by
/// this id and treats the identity as a routing key only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
