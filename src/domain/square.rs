//! Board coordinates and move encoding.
//!
//! [`Square`] is a validated `a1`..`h8` coordinate; [`Uci`] is the
//! origin/destination/promotion encoding moves travel the wire in.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::game::Role;
use crate::error::SyncError;

/// A square on the 8×8 board, stored as zero-based file and rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    /// Builds a square from zero-based file (`0` = a) and rank (`0` = 1).
    /// Returns `None` when either coordinate is off the board.
    #[must_use]
    pub const fn new(file: u8, rank: u8) -> Option<Self> {
        if file < 8 && rank < 8 {
            Some(Self { file, rank })
        } else {
            None
        }
    }

    /// Zero-based file, `0` = a-file.
    #[must_use]
    pub const fn file(self) -> u8 {
        self.file
    }

    /// Zero-based rank, `0` = first rank.
    #[must_use]
    pub const fn rank(self) -> u8 {
        self.rank
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = char::from(b'a' + self.file);
        let rank = char::from(b'1' + self.rank);
        write!(f, "{file}{rank}")
    }
}

impl FromStr for Square {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let (Some(f), Some(r), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(SyncError::MalformedEvent(format!("bad square: {s:?}")));
        };
        if !f.is_ascii_lowercase() || !r.is_ascii_digit() {
            return Err(SyncError::MalformedEvent(format!("bad square: {s:?}")));
        }
        let file = (f as u8).wrapping_sub(b'a');
        let rank = (r as u8).wrapping_sub(b'1');
        Self::new(file, rank).ok_or_else(|| SyncError::MalformedEvent(format!("bad square: {s:?}")))
    }
}

impl Serialize for Square {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Square {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// A move in UCI notation: origin square, destination square, optional
/// promotion role (`e7e8q`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uci {
    /// Origin square.
    pub from: Square,
    /// Destination square.
    pub to: Square,
    /// Promotion role, when the move promotes.
    pub promotion: Option<Role>,
}

impl fmt::Display for Uci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(role) = self.promotion {
            write!(f, "{}", role.uci_char())?;
        }
        Ok(())
    }
}

impl FromStr for Uci {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < 4 || s.len() > 5 {
            return Err(SyncError::MalformedEvent(format!("bad uci: {s:?}")));
        }
        let from = s.get(0..2).unwrap_or_default().parse()?;
        let to = s.get(2..4).unwrap_or_default().parse()?;
        let promotion = match s.get(4..5) {
            None | Some("") => None,
            Some(p) => Some(
                Role::from_uci_char(p)
                    .ok_or_else(|| SyncError::MalformedEvent(format!("bad promotion: {s:?}")))?,
            ),
        };
        Ok(Self {
            from,
            to,
            promotion,
        })
    }
}

impl Serialize for Uci {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Uci {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn square_round_trip() {
        for name in ["a1", "e4", "h8"] {
            let Ok(sq) = name.parse::<Square>() else {
                panic!("{name} should parse");
            };
            assert_eq!(sq.to_string(), name);
        }
    }

    #[test]
    fn square_rejects_off_board() {
        assert!("i1".parse::<Square>().is_err());
        assert!("a9".parse::<Square>().is_err());
        assert!("a0".parse::<Square>().is_err());
        assert!("e44".parse::<Square>().is_err());
        assert!("".parse::<Square>().is_err());
    }

    #[test]
    fn uci_plain_move() {
        let Ok(uci) = "e2e4".parse::<Uci>() else {
            panic!("e2e4 should parse");
        };
        assert_eq!(uci.from.to_string(), "e2");
        assert_eq!(uci.to.to_string(), "e4");
        assert!(uci.promotion.is_none());
        assert_eq!(uci.to_string(), "e2e4");
    }

    #[test]
    fn uci_promotion() {
        let Ok(uci) = "e7e8q".parse::<Uci>() else {
            panic!("e7e8q should parse");
        };
        assert_eq!(uci.promotion, Some(Role::Queen));
        assert_eq!(uci.to_string(), "e7e8q");
    }

    #[test]
    fn uci_rejects_bad_lengths() {
        assert!("e2".parse::<Uci>().is_err());
        assert!("e2e4qq".parse::<Uci>().is_err());
    }

    #[test]
    fn square_serde_is_string() {
        let Ok(sq) = "c6".parse::<Square>() else {
            panic!("valid square");
        };
        let Ok(json) = serde_json::to_string(&sq) else {
            panic!("serialize");
        };
        assert_eq!(json, "\"c6\"");
    }
}
