//! Type-safe game identifier.
//!
//! [`GameId`] is a newtype around the server's compact 8-character
//! alphanumeric game id, providing type safety so game ids cannot be
//! confused with other string identifiers (user ids, tournament ids).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Length of a server-issued game id.
const GAME_ID_LEN: usize = 8;

/// Unique identifier for a game.
///
/// Issued by the server at game creation and immutable thereafter. Used
/// as the socket URL component, the offline snapshot key, and the REST
/// lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    /// Parses a game id, validating the server format.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedEvent`] if the input is not exactly
    /// eight ASCII alphanumeric characters.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        if raw.len() == GAME_ID_LEN && raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(SyncError::MalformedEvent(format!("bad game id: {raw:?}")))
        }
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the offline snapshot for this game is stored.
    #[must_use]
    pub fn snapshot_key(&self) -> String {
        format!("game.{}", self.0)
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GameId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
