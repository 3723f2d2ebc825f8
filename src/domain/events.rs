//! Inbound server event catalog.
//!
//! Every application message arrives as a `{t, d, v}` envelope; the `t`
//! name selects a [`ServerEvent`] variant and `d` carries the payload.
//! Modeling the catalog as a tagged enum gives the controller an
//! exhaustive match instead of a stringly-typed handler table; names
//! outside the catalog fail to decode and are logged at `debug` then
//! dropped by the session layer.

use std::collections::HashMap;

use serde::Deserialize;

use crate::domain::game::{Color, GameStatus, Role};
use crate::domain::square::{Square, Uci};

/// A decoded server → client application event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t", content = "d")]
pub enum ServerEvent {
    /// Full list of online followed users.
    #[serde(rename = "following_onlines")]
    FollowingOnlines(Vec<String>),

    /// A followed user came online.
    #[serde(rename = "following_enters")]
    FollowingEnters(String),

    /// A followed user went offline.
    #[serde(rename = "following_leaves")]
    FollowingLeaves(String),

    /// Current pending-challenge list.
    #[serde(rename = "challenges")]
    Challenges(Vec<ChallengeNotice>),

    /// A move was played (the reconciliation workhorse).
    #[serde(rename = "move")]
    Move(Box<MoveEvent>),

    /// The game ended; payload is the winning side, if any.
    #[serde(rename = "end")]
    End(Option<Color>),

    /// Presence update: who is at the board, how many watch.
    #[serde(rename = "crowd")]
    Crowd(CrowdUpdate),

    /// Standalone clock correction outside a move.
    #[serde(rename = "clock")]
    Clock(ClockUpdate),

    /// The server confirmed an ackable client message.
    #[serde(rename = "ack")]
    Ack(u64),

    /// The server demands a full state resynchronization.
    #[serde(rename = "resync")]
    Resync,
}

impl ServerEvent {
    /// Wire name of this event, matching the envelope's `t` field.
    #[must_use]
    pub const fn wire_name(&self) -> &'static str {
        match self {
            Self::FollowingOnlines(_) => "following_onlines",
            Self::FollowingEnters(_) => "following_enters",
            Self::FollowingLeaves(_) => "following_leaves",
            Self::Challenges(_) => "challenges",
            Self::Move(_) => "move",
            Self::End(_) => "end",
            Self::Crowd(_) => "crowd",
            Self::Clock(_) => "clock",
            Self::Ack(_) => "ack",
            Self::Resync => "resync",
        }
    }

    /// Every wire name the catalog understands; used as the default
    /// registered-events set for a game session.
    #[must_use]
    pub const fn catalog() -> &'static [&'static str] {
        &[
            "following_onlines",
            "following_enters",
            "following_leaves",
            "challenges",
            "move",
            "end",
            "crowd",
            "clock",
            "ack",
            "resync",
        ]
    }
}

/// One entry of the pending-challenge list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeNotice {
    /// Challenge id.
    pub id: String,
    /// Challenger user id, absent for open challenges.
    #[serde(default)]
    pub challenger: Option<String>,
}

/// Presence counts for the game.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CrowdUpdate {
    /// White is present at the board.
    #[serde(default)]
    pub white: bool,
    /// Black is present at the board.
    #[serde(default)]
    pub black: bool,
    /// Spectator count.
    #[serde(default)]
    pub watchers: u32,
}

/// Remaining seconds per side.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClockUpdate {
    /// White's remaining seconds.
    pub white: f64,
    /// Black's remaining seconds.
    pub black: f64,
}

/// Both squares a castling piece travels between.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CastleMove {
    /// King origin and destination.
    pub king: [Square; 2],
    /// Rook origin and destination.
    pub rook: [Square; 2],
    /// Side that castled.
    pub color: Color,
}

/// En-passant capture: the square whose occupant is removed.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EnpassantCapture {
    /// Square of the captured pawn (not the move destination).
    pub key: Square,
    /// Color of the captured pawn.
    pub color: Color,
}

/// Promotion: the destination square swaps its piece role.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRoleSwap {
    /// Promotion square.
    pub key: Square,
    /// Role the pawn became.
    pub piece_class: Role,
}

/// Payload of a `move` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveEvent {
    /// Ply this move lands on.
    pub ply: u32,
    /// The move in UCI encoding.
    pub uci: Uci,
    /// The move in standard algebraic notation.
    pub san: String,
    /// Position after the move, in FEN.
    pub fen: String,
    /// Status change, when the move ended the game.
    #[serde(default)]
    pub status: Option<GameStatus>,
    /// White currently offers a draw.
    #[serde(default, rename = "wDraw")]
    pub w_draw: bool,
    /// Black currently offers a draw.
    #[serde(default, rename = "bDraw")]
    pub b_draw: bool,
    /// Legal destinations for the side now to move, origin →
    /// concatenated destination squares.
    #[serde(default)]
    pub dests: Option<HashMap<String, String>>,
    /// Clock correction accompanying the move.
    #[serde(default)]
    pub clock: Option<ClockUpdate>,
    /// Castling piece relocation, when the move castled.
    #[serde(default)]
    pub castle: Option<CastleMove>,
    /// En-passant capture square, when the move captured in passing.
    #[serde(default)]
    pub enpassant: Option<EnpassantCapture>,
    /// Promotion role swap, when the move promoted.
    #[serde(default)]
    pub promotion: Option<PromotionRoleSwap>,
    /// Side to move is in check.
    #[serde(default)]
    pub check: bool,
    /// Threefold repetition is claimable.
    #[serde(default)]
    pub threefold: bool,
    /// Winner, when the move ended the game.
    #[serde(default)]
    pub winner: Option<Color>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn decodes_move_event() {
        let json = r#"{
            "t": "move",
            "d": {
                "ply": 11,
                "uci": "e2e4",
                "san": "e4",
                "fen": "some-fen",
                "wDraw": false,
                "bDraw": true,
                "dests": {"e7": "e6e5"},
                "clock": {"white": 120.5, "black": 115.0},
                "check": false
            }
        }"#;
        let Ok(event) = serde_json::from_str::<ServerEvent>(json) else {
            panic!("move event should decode");
        };
        let ServerEvent::Move(mv) = event else {
            panic!("wrong variant");
        };
        assert_eq!(mv.ply, 11);
        assert_eq!(mv.san, "e4");
        assert!(mv.b_draw);
        assert!(!mv.w_draw);
        assert!(mv.clock.is_some());
        assert!(mv.castle.is_none());
    }

    #[test]
    fn decodes_castle_and_promotion() {
        let json = r#"{
            "t": "move",
            "d": {
                "ply": 12,
                "uci": "e7e8q",
                "san": "e8=Q+",
                "fen": "f",
                "check": true,
                "castle": {"king": ["e1", "g1"], "rook": ["h1", "f1"], "color": "white"},
                "promotion": {"key": "e8", "pieceClass": "queen"}
            }
        }"#;
        let Ok(ServerEvent::Move(mv)) = serde_json::from_str::<ServerEvent>(json) else {
            panic!("move event should decode");
        };
        let Some(castle) = mv.castle else {
            panic!("castle present");
        };
        assert_eq!(castle.king[1].to_string(), "g1");
        let Some(promotion) = mv.promotion else {
            panic!("promotion present");
        };
        assert_eq!(promotion.piece_class, Role::Queen);
        assert!(mv.check);
    }

    #[test]
    fn decodes_presence_events() {
        let Ok(ev) =
            serde_json::from_str::<ServerEvent>(r#"{"t": "following_onlines", "d": ["ana", "bo"]}"#)
        else {
            panic!("presence list should decode");
        };
        let ServerEvent::FollowingOnlines(names) = ev else {
            panic!("wrong variant");
        };
        assert_eq!(names.len(), 2);

        let Ok(ev) = serde_json::from_str::<ServerEvent>(r#"{"t": "following_enters", "d": "cy"}"#)
        else {
            panic!("enter should decode");
        };
        assert_eq!(ev.wire_name(), "following_enters");
    }

    #[test]
    fn decodes_unit_resync_without_payload() {
        let Ok(ev) = serde_json::from_str::<ServerEvent>(r#"{"t": "resync"}"#) else {
            panic!("resync should decode");
        };
        assert_eq!(ev.wire_name(), "resync");
    }

    #[test]
    fn decodes_end_with_and_without_winner() {
        let Ok(ServerEvent::End(winner)) =
            serde_json::from_str::<ServerEvent>(r#"{"t": "end", "d": "black"}"#)
        else {
            panic!("end should decode");
        };
        assert_eq!(winner, Some(Color::Black));
        let Ok(ServerEvent::End(winner)) =
            serde_json::from_str::<ServerEvent>(r#"{"t": "end", "d": null}"#)
        else {
            panic!("end with null should decode");
        };
        assert!(winner.is_none());
    }

    #[test]
    fn unknown_event_name_is_an_error() {
        assert!(serde_json::from_str::<ServerEvent>(r#"{"t": "mystery", "d": 1}"#).is_err());
    }

    #[test]
    fn catalog_matches_wire_names() {
        let ev = ServerEvent::Resync;
        assert!(ServerEvent::catalog().contains(&ev.wire_name()));
    }
}
