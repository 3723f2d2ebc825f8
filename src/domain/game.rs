//! Game state vocabulary: sides, statuses, speeds, variants, and the
//! server snapshot shape.
//!
//! [`GameSnapshot`] mirrors the JSON configuration the server sends on
//! context entry and on every full reload; [`GameData`] is the mutable
//! per-game state the controller keeps between events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::game_id::GameId;
use crate::domain::square::Square;
use crate::domain::step::Step;
use crate::error::SyncError;

/// One side of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// The white pieces.
    White,
    /// The black pieces.
    Black,
}

impl Color {
    /// The side to move at the given ply. Parity convention fixed for
    /// the life of the game: even ply → white to move.
    #[must_use]
    pub const fn to_move_at(ply: u32) -> Self {
        if ply % 2 == 0 { Self::White } else { Self::Black }
    }

    /// The side that produced the move landing on the given ply.
    #[must_use]
    pub const fn played_at(ply: u32) -> Self {
        Self::to_move_at(ply).opposite()
    }

    /// The other side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

/// Piece role, as named on the wire (`"queen"`, `"knight"`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Pawn.
    Pawn,
    /// Knight.
    Knight,
    /// Bishop.
    Bishop,
    /// Rook.
    Rook,
    /// Queen.
    Queen,
    /// King.
    King,
}

impl Role {
    /// Single-letter UCI promotion suffix.
    #[must_use]
    pub const fn uci_char(self) -> char {
        match self {
            Self::Pawn => 'p',
            Self::Knight => 'n',
            Self::Bishop => 'b',
            Self::Rook => 'r',
            Self::Queen => 'q',
            Self::King => 'k',
        }
    }

    /// Parses a UCI promotion suffix.
    #[must_use]
    pub fn from_uci_char(s: &str) -> Option<Self> {
        match s {
            "p" => Some(Self::Pawn),
            "n" => Some(Self::Knight),
            "b" => Some(Self::Bishop),
            "r" => Some(Self::Rook),
            "q" => Some(Self::Queen),
            "k" => Some(Self::King),
            _ => None,
        }
    }
}

/// Game pacing. Selects which clock flavour is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    /// Sub-minute games.
    Bullet,
    /// A few minutes per side.
    Blitz,
    /// Longer live games.
    Classical,
    /// Asynchronous play over hours or days.
    Correspondence,
}

impl Speed {
    /// `true` for day-granularity asynchronous games.
    #[must_use]
    pub const fn is_correspondence(self) -> bool {
        matches!(self, Self::Correspondence)
    }
}

/// Rules variant of the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawVariant")]
pub enum Variant {
    /// Standard rules.
    Standard,
    /// Random back-rank start.
    Chess960,
    /// Captures explode the surrounding pieces.
    Atomic,
    /// Win by walking the king to the center.
    KingOfTheHill,
    /// Win by giving three checks.
    ThreeCheck,
}

/// Wire shape: either a bare key string or a `{key, name}` object.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawVariant {
    Key(String),
    Object {
        key: String,
    },
}

impl From<RawVariant> for Variant {
    fn from(raw: RawVariant) -> Self {
        let key = match raw {
            RawVariant::Key(k) | RawVariant::Object { key: k } => k,
        };
        match key.as_str() {
            "chess960" => Self::Chess960,
            "atomic" => Self::Atomic,
            "kingOfTheHill" => Self::KingOfTheHill,
            "threeCheck" => Self::ThreeCheck,
            _ => Self::Standard,
        }
    }
}

impl Variant {
    /// `true` for the exploding-captures variant.
    #[must_use]
    pub const fn is_atomic(self) -> bool {
        matches!(self, Self::Atomic)
    }
}

/// Enumerated game status, id-coded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawStatus")]
pub enum GameStatus {
    /// Challenge issued, game not yet begun.
    Created,
    /// Game in progress.
    Started,
    /// Canceled before either side completed a move.
    Aborted,
    /// Checkmate.
    Mate,
    /// A side resigned.
    Resign,
    /// Stalemate draw.
    Stalemate,
    /// A side let the clock run out without the opponent claiming.
    Timeout,
    /// Agreed or rule-based draw.
    Draw,
    /// Flag fell and the win was claimed.
    Outoftime,
    /// Terminated by fair-play enforcement.
    Cheat,
    /// A side never showed up.
    NoStart,
    /// Finished for a reason the client does not model.
    UnknownFinish,
    /// Variant-specific end (explosion, hill, third check).
    VariantEnd,
}

/// Wire shape: a bare id, a `{id, name}` object, or the camelCase name
/// this enum serializes to.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawStatus {
    Id(u8),
    Object { id: u8 },
    Name(String),
}

impl From<RawStatus> for GameStatus {
    fn from(raw: RawStatus) -> Self {
        match raw {
            RawStatus::Id(id) | RawStatus::Object { id } => Self::from_id(id),
            RawStatus::Name(name) => Self::from_name(&name),
        }
    }
}

impl GameStatus {
    /// Maps a server status id to a variant. Unknown ids at or past the
    /// finished range collapse to [`GameStatus::UnknownFinish`]; earlier
    /// unknown ids are treated as in-progress.
    #[must_use]
    pub const fn from_id(id: u8) -> Self {
        match id {
            10 => Self::Created,
            20 => Self::Started,
            25 => Self::Aborted,
            30 => Self::Mate,
            31 => Self::Resign,
            32 => Self::Stalemate,
            33 => Self::Timeout,
            34 => Self::Draw,
            35 => Self::Outoftime,
            36 => Self::Cheat,
            37 => Self::NoStart,
            60 => Self::VariantEnd,
            id if id >= 30 => Self::UnknownFinish,
            _ => Self::Started,
        }
    }

    /// Maps a camelCase status name (the form this enum serializes to)
    /// back to a variant.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "created" => Self::Created,
            "aborted" => Self::Aborted,
            "mate" => Self::Mate,
            "resign" => Self::Resign,
            "stalemate" => Self::Stalemate,
            "timeout" => Self::Timeout,
            "draw" => Self::Draw,
            "outoftime" => Self::Outoftime,
            "cheat" => Self::Cheat,
            "noStart" => Self::NoStart,
            "unknownFinish" => Self::UnknownFinish,
            "variantEnd" => Self::VariantEnd,
            _ => Self::Started,
        }
    }

    /// The server id for this status.
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::Created => 10,
            Self::Started => 20,
            Self::Aborted => 25,
            Self::Mate => 30,
            Self::Resign => 31,
            Self::Stalemate => 32,
            Self::Timeout => 33,
            Self::Draw => 34,
            Self::Outoftime => 35,
            Self::Cheat => 36,
            Self::NoStart => 37,
            Self::UnknownFinish => 38,
            Self::VariantEnd => 60,
        }
    }

    /// Game has begun (moves may exist).
    #[must_use]
    pub const fn is_started(self) -> bool {
        self.id() >= 20 && !self.is_finished() && !self.is_aborted()
    }

    /// Game reached a terminal result.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        self.id() >= 30
    }

    /// Game was canceled before it really began.
    #[must_use]
    pub const fn is_aborted(self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Moves may still be submitted.
    #[must_use]
    pub const fn is_playable(self) -> bool {
        matches!(self, Self::Created | Self::Started)
    }
}

/// One side's participant data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Which pieces this participant plays.
    pub color: Color,
    /// User id, absent for anonymous players and engines.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Whether the local viewer is only spectating this side's game.
    #[serde(default)]
    pub spectator: bool,
    /// Socket resume cursor issued to this participant.
    #[serde(default)]
    pub version: u64,
    /// Whether this side currently offers a draw.
    #[serde(default)]
    pub offering_draw: bool,
    /// Presence bookkeeping: side is present at the board.
    #[serde(default)]
    pub on_game: bool,
}

/// Client preferences that alter the move submission flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prefs {
    /// When set, moves are held for explicit confirmation before being
    /// sent.
    #[serde(default)]
    pub submit_move: bool,
    /// Board animation duration in milliseconds; the pending-move
    /// recording is deferred by this much for UI feedback.
    #[serde(default)]
    pub animation_duration: u64,
}

/// Live clock configuration, seconds per side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Initial time per side.
    pub initial: f64,
    /// Increment per move.
    #[serde(default)]
    pub increment: f64,
    /// White's remaining seconds.
    pub white: f64,
    /// Black's remaining seconds.
    pub black: f64,
    /// Whether the clock is already counting down.
    #[serde(default)]
    pub running: bool,
}

/// Correspondence clock configuration, seconds per side at day
/// granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrespondenceConfig {
    /// White's remaining seconds.
    pub white: f64,
    /// Black's remaining seconds.
    pub black: f64,
    /// Seconds granted per completed move.
    #[serde(default)]
    pub increment: f64,
}

/// Core game record inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    /// Server-issued game id.
    pub id: GameId,
    /// Rules variant.
    pub variant: Variant,
    /// Pacing, selects the clock flavour.
    pub speed: Speed,
    /// Current status.
    pub status: GameStatus,
    /// Number of plies played.
    #[serde(default)]
    pub turns: u32,
    /// Ply count at which the clock started mattering.
    #[serde(default)]
    pub started_at_turn: u32,
    /// Side to move.
    pub player: Color,
    /// Current position in FEN.
    pub fen: String,
    /// Threefold repetition is claimable.
    #[serde(default)]
    pub threefold: bool,
}

/// Socket and REST endpoints for this game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameUrls {
    /// Socket URL path (versioned resume endpoint).
    pub socket: String,
    /// REST path for snapshot fetches and the auth probe.
    pub round: String,
}

/// Tournament linkage carried on snapshots for tournament games.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentInfo {
    /// Tournament id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// Full configuration snapshot the server sends on context entry and on
/// every reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    /// Core game record.
    pub game: GameInfo,
    /// The local participant (or the observed side when spectating).
    pub player: Player,
    /// The other side.
    pub opponent: Player,
    /// Step list, oldest first.
    pub steps: Vec<Step>,
    /// Live clock, when the game has one.
    #[serde(default)]
    pub clock: Option<ClockConfig>,
    /// Correspondence clock, when the game has one.
    #[serde(default)]
    pub correspondence: Option<CorrespondenceConfig>,
    /// Legal destinations for the side to move, origin → concatenated
    /// destination squares.
    #[serde(default)]
    pub possible_moves: Option<HashMap<String, String>>,
    /// Endpoints for this game.
    pub url: GameUrls,
    /// Move-confirmation preferences.
    #[serde(default)]
    pub pref: Prefs,
    /// TV channel name when the snapshot comes from TV mode. Omitted by
    /// reload payloads; copied forward from the previous configuration.
    #[serde(default)]
    pub tv: Option<String>,
    /// Tournament linkage. Omitted by reload payloads; copied forward.
    #[serde(default)]
    pub tournament: Option<TournamentInfo>,
}

/// Mutable per-game state owned by the controller (snapshot minus the
/// step list, which lives in the timeline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameData {
    /// Core game record.
    pub game: GameInfo,
    /// The local participant.
    pub player: Player,
    /// The other side.
    pub opponent: Player,
    /// Live clock configuration.
    pub clock: Option<ClockConfig>,
    /// Correspondence clock configuration.
    pub correspondence: Option<CorrespondenceConfig>,
    /// Parsed legal destinations for the local player, when it is their
    /// turn.
    pub possible_moves: Option<HashMap<Square, Vec<Square>>>,
    /// Endpoints for this game.
    pub url: GameUrls,
    /// Move-confirmation preferences.
    pub pref: Prefs,
    /// TV channel, preserved across reloads.
    pub tv: Option<String>,
    /// Tournament linkage, preserved across reloads.
    pub tournament: Option<TournamentInfo>,
}

impl GameData {
    /// Builds runtime state from a snapshot (step list handled
    /// separately by the caller).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedEvent`] when the snapshot's
    /// possible-moves table does not parse as squares.
    pub fn from_snapshot(snapshot: &GameSnapshot) -> Result<Self, SyncError> {
        let possible_moves = snapshot
            .possible_moves
            .as_ref()
            .map(|raw| parse_possible_moves(raw))
            .transpose()?;
        Ok(Self {
            game: snapshot.game.clone(),
            player: snapshot.player.clone(),
            opponent: snapshot.opponent.clone(),
            clock: snapshot.clock.clone(),
            correspondence: snapshot.correspondence.clone(),
            possible_moves,
            url: snapshot.url.clone(),
            pref: snapshot.pref.clone(),
            tv: snapshot.tv.clone(),
            tournament: snapshot.tournament.clone(),
        })
    }

    /// `true` when the local viewer is an active participant in a game
    /// that still accepts moves.
    #[must_use]
    pub fn is_player_playing(&self) -> bool {
        !self.player.spectator && self.game.status.is_playable()
    }

    /// The participant record for the given side.
    #[must_use]
    pub fn side(&self, color: Color) -> &Player {
        if self.player.color == color {
            &self.player
        } else {
            &self.opponent
        }
    }

    /// Mutable participant record for the given side.
    pub fn side_mut(&mut self, color: Color) -> &mut Player {
        if self.player.color == color {
            &mut self.player
        } else {
            &mut self.opponent
        }
    }

    /// Marks a side present (or absent) at the board.
    pub fn set_on_game(&mut self, color: Color, on_game: bool) {
        self.side_mut(color).on_game = on_game;
    }
}

/// Parses the wire possible-moves table: origin → concatenated 2-char
/// destination squares (`"e2": "e3e4"`).
///
/// # Errors
///
/// Returns [`SyncError::MalformedEvent`] on any unparseable square.
pub fn parse_possible_moves(
    raw: &HashMap<String, String>,
) -> Result<HashMap<Square, Vec<Square>>, SyncError> {
    let mut parsed = HashMap::with_capacity(raw.len());
    for (origin, dests) in raw {
        let from: Square = origin.parse()?;
        if dests.len() % 2 != 0 {
            return Err(SyncError::MalformedEvent(format!(
                "odd destination string for {origin}: {dests:?}"
            )));
        }
        let mut targets = Vec::with_capacity(dests.len() / 2);
        let mut rest = dests.as_str();
        while !rest.is_empty() {
            let chunk = rest.get(..2).ok_or_else(|| {
                SyncError::MalformedEvent(format!("bad destination string: {dests:?}"))
            })?;
            targets.push(chunk.parse()?);
            rest = rest.get(2..).unwrap_or_default();
        }
        parsed.insert(from, targets);
    }
    Ok(parsed)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parity_convention() {
        assert_eq!(Color::to_move_at(0), Color::White);
        assert_eq!(Color::to_move_at(1), Color::Black);
        assert_eq!(Color::played_at(1), Color::White);
        assert_eq!(Color::played_at(2), Color::Black);
    }

    #[test]
    fn status_id_round_trip() {
        for id in [10u8, 20, 25, 30, 31, 32, 33, 34, 35, 36, 37, 60] {
            assert_eq!(GameStatus::from_id(id).id(), id);
        }
    }

    #[test]
    fn unknown_finished_id_collapses() {
        assert_eq!(GameStatus::from_id(45), GameStatus::UnknownFinish);
        assert!(GameStatus::from_id(45).is_finished());
    }

    #[test]
    fn status_predicates() {
        assert!(GameStatus::Started.is_playable());
        assert!(!GameStatus::Mate.is_playable());
        assert!(GameStatus::Mate.is_finished());
        assert!(GameStatus::Aborted.is_aborted());
        assert!(!GameStatus::Aborted.is_finished());
    }

    #[test]
    fn status_deserializes_from_object_and_id() {
        let Ok(from_obj) = serde_json::from_str::<GameStatus>(r#"{"id":31,"name":"resign"}"#)
        else {
            panic!("object form");
        };
        assert_eq!(from_obj, GameStatus::Resign);
        let Ok(from_id) = serde_json::from_str::<GameStatus>("20") else {
            panic!("id form");
        };
        assert_eq!(from_id, GameStatus::Started);
    }

    #[test]
    fn status_serde_round_trip() {
        let Ok(json) = serde_json::to_string(&GameStatus::Outoftime) else {
            panic!("serialize");
        };
        let Ok(back) = serde_json::from_str::<GameStatus>(&json) else {
            panic!("deserialize");
        };
        assert_eq!(back, GameStatus::Outoftime);
    }

    #[test]
    fn variant_deserializes_from_key_object() {
        let Ok(v) = serde_json::from_str::<Variant>(r#"{"key":"atomic","name":"Atomic"}"#) else {
            panic!("variant object");
        };
        assert!(v.is_atomic());
    }

    #[test]
    fn possible_moves_parse() {
        let mut raw = HashMap::new();
        raw.insert("e2".to_string(), "e3e4".to_string());
        let Ok(parsed) = parse_possible_moves(&raw) else {
            panic!("valid table");
        };
        let Ok(e2) = "e2".parse::<Square>() else {
            panic!("square");
        };
        let Some(dests) = parsed.get(&e2) else {
            panic!("origin present");
        };
        assert_eq!(dests.len(), 2);
    }

    #[test]
    fn possible_moves_reject_odd_string() {
        let mut raw = HashMap::new();
        raw.insert("e2".to_string(), "e3e".to_string());
        assert!(parse_possible_moves(&raw).is_err());
    }

    #[test]
    fn snapshot_deserializes() {
        let json = r#"{
            "game": {
                "id": "abcd1234",
                "variant": {"key": "standard", "name": "Standard"},
                "speed": "blitz",
                "status": {"id": 20, "name": "started"},
                "turns": 2,
                "startedAtTurn": 0,
                "player": "white",
                "fen": "rnbqkbnr/pp1ppppp/8/2p5/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2"
            },
            "player": {"color": "white", "version": 7},
            "opponent": {"color": "black", "onGame": true},
            "steps": [
                {"ply": 0, "fen": "start-fen", "san": null, "uci": null},
                {"ply": 1, "fen": "after-e4", "san": "e4", "uci": "e2e4"},
                {"ply": 2, "fen": "after-c5", "san": "c5", "uci": "c7c5"}
            ],
            "clock": {"initial": 300, "increment": 2, "white": 290.5, "black": 288.0, "running": true},
            "possibleMoves": {"g1": "f3h3"},
            "url": {"socket": "/play/abcd1234/socket/v2", "round": "/abcd1234"},
            "pref": {"submitMove": false, "animationDuration": 250}
        }"#;
        let Ok(snapshot) = serde_json::from_str::<GameSnapshot>(json) else {
            panic!("snapshot should deserialize");
        };
        assert_eq!(snapshot.game.turns, 2);
        assert_eq!(snapshot.steps.len(), 3);
        assert_eq!(snapshot.player.version, 7);
        let Ok(data) = GameData::from_snapshot(&snapshot) else {
            panic!("runtime state should build");
        };
        assert!(data.is_player_playing());
        assert!(data.possible_moves.is_some());
    }

    #[test]
    fn set_on_game_routes_by_color() {
        let json = r#"{
            "game": {
                "id": "abcd1234",
                "variant": "standard",
                "speed": "classical",
                "status": 20,
                "player": "white",
                "fen": "f"
            },
            "player": {"color": "black"},
            "opponent": {"color": "white"},
            "steps": [{"ply": 0, "fen": "f"}],
            "url": {"socket": "/s", "round": "/r"}
        }"#;
        let Ok(snapshot) = serde_json::from_str::<GameSnapshot>(json) else {
            panic!("snapshot should deserialize");
        };
        let Ok(mut data) = GameData::from_snapshot(&snapshot) else {
            panic!("runtime state should build");
        };
        data.set_on_game(Color::White, true);
        assert!(data.opponent.on_game);
        assert!(!data.player.on_game);
    }
}
