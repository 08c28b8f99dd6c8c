//! Deployment routing mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;

/// How the hub routes inbound messages. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// One-to-one chat: each message goes to its named recipient only.
    /// Connections are keyed by identity.
    #[default]
    Direct,

    /// Open room: each message goes to every other connection.
    /// Connections are anonymous members of a set.
    Broadcast,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "broadcast" => Ok(Self::Broadcast),
            other => Err(DomainError::UnknownMode(other.to_string())),
        }
    }
}
