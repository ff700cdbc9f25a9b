//! Type-safe identifier of a connected WebSocket client.
//!
//! [`ClientId`] is a newtype wrapper around [`uuid::Uuid`] (v4) so client
//! identifiers cannot be confused with other UUIDs in payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one live socket in the broadcaster's client set.
///
/// Generated on accept and discarded on close; carries no session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    /// Creates a new random `ClientId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for ClientId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn display_matches_uuid() {
        let id = ClientId::new();
        assert_eq!(id.to_string(), id.as_uuid().to_string());
    }

    #[test]
    fn serializes_transparently() {
        let uuid = uuid::Uuid::new_v4();
        let id = ClientId::from(uuid);
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, format!("\"{uuid}\""));
    }
}
