//! Interfaces to out-of-scope collaborators.
//!
//! The protocol core consumes rendering, storage, HTTP, i18n, and
//! feedback facilities through these narrow traits; implementations
//! live in the host application. Everything here is intentionally small
//! enough to fake in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::game::{Color, Role};
use crate::domain::game_id::GameId;
use crate::domain::{GameSnapshot, Square};
use crate::error::SyncError;

/// Network reachability query.
pub trait Reachability: Send + Sync + std::fmt::Debug {
    /// `true` when the device believes it has network access. Used to
    /// tell "proxy blackholes the socket" from "no network at all".
    fn has_network(&self) -> bool;
}

/// Persistent key-value store owned by the host platform.
///
/// Holds the one-shot "do not warn about proxy failure again" flag and
/// offline game snapshots.
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Reads a value, `None` when absent.
    fn get(&self, key: &str) -> Option<Value>;

    /// Writes a value, overwriting any previous one.
    fn set(&self, key: &str, value: Value);
}

/// Public user profile fragment returned by the mini-profile endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MiniProfile {
    /// Display username.
    pub username: String,
    /// Whether the user is currently online.
    #[serde(default)]
    pub online: bool,
    /// Title, when the user holds one.
    #[serde(default)]
    pub title: Option<String>,
    /// Rating in the current game's speed.
    #[serde(default)]
    pub rating: Option<u32>,
}

/// One-shot REST calls used around the realtime session.
#[async_trait]
pub trait RestApi: Send + Sync + std::fmt::Debug {
    /// Fetches the full game snapshot. Doubles as the diagnostic probe
    /// after a socket error: implementations must map HTTP 401 to
    /// [`SyncError::Unauthorized`].
    async fn game_snapshot(&self, id: &GameId) -> Result<GameSnapshot, SyncError>;

    /// Fetches a user's mini profile.
    async fn mini_profile(&self, user_id: &str) -> Result<MiniProfile, SyncError>;

    /// Toggles the bookmark flag on a game.
    async fn toggle_bookmark(&self, id: &GameId) -> Result<(), SyncError>;

    /// Refreshes the login session heartbeat (correspondence games keep
    /// it alive between rare moves).
    async fn refresh_session(&self) -> Result<(), SyncError>;
}

/// Localized text lookup.
pub trait Translator: Send + Sync + std::fmt::Debug {
    /// Resolves a message key with positional arguments.
    fn translate(&self, key: &str, args: &[&str]) -> String;
}

/// Fire-and-forget user feedback: sounds, vibration, toasts.
pub trait Feedback: Send + Sync + std::fmt::Debug {
    /// A quiet move landed on the board.
    fn move_played(&self);

    /// A capture landed on the board.
    fn capture(&self);

    /// An atomic explosion resolved.
    fn explosion(&self);

    /// The opponent raised a draw offer.
    fn draw_offered(&self);

    /// Transient text message.
    fn toast(&self, message: &str);
}

/// A piece placement edit accompanying a move: `None` removes the
/// occupant, `Some` places a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceEdit {
    /// Square being edited.
    pub square: Square,
    /// New occupant, or `None` to clear the square.
    pub piece: Option<(Color, Role)>,
}

/// Movability state pushed to the board alongside a position.
#[derive(Debug, Clone, Default)]
pub struct MovableState {
    /// Side allowed to move pieces, `None` for view-only.
    pub color: Option<Color>,
    /// Legal destinations per origin square.
    pub dests: HashMap<Square, Vec<Square>>,
}

/// Full board reconfiguration (jump, reload).
#[derive(Debug, Clone)]
pub struct BoardUpdate {
    /// Position to display, in FEN.
    pub fen: String,
    /// Origin and destination of the last move, for highlighting.
    pub last_move: Option<(Square, Square)>,
    /// Side to move is in check.
    pub check: bool,
    /// Side to move.
    pub turn_color: Color,
    /// Movability, `None` to leave the current setting.
    pub movable: Option<MovableState>,
    /// Board orientation, `None` to leave unchanged.
    pub orientation: Option<Color>,
}

/// Incremental metadata accompanying [`BoardView::apply_move`].
#[derive(Debug, Clone)]
pub struct MoveMeta {
    /// Side to move after the move.
    pub turn_color: Color,
    /// Legal destinations for the local player, empty for spectators.
    pub dests: HashMap<Square, Vec<Square>>,
    /// Side to move is in check.
    pub check: bool,
}

/// The board widget boundary.
///
/// The widget owns rendering, animation, and premove capture; the
/// controller owns truth. User move intents flow back to the controller
/// as messages, not through this trait.
pub trait BoardView: Send + Sync + std::fmt::Debug {
    /// Reconfigures the displayed position wholesale.
    fn set(&self, update: BoardUpdate);

    /// Applies a single move with optional extra piece edits (castling
    /// relocation, en-passant removal, explosions).
    fn apply_move(&self, from: Square, to: Square, edits: &[PieceEdit], meta: MoveMeta);

    /// Swaps the piece role on a promotion square.
    fn promote(&self, square: Square, role: Role);

    /// `true` when the widget computes castling rook moves itself.
    fn auto_castles(&self) -> bool;

    /// `true` when a premove is currently registered.
    fn has_premove(&self) -> bool;

    /// Executes the registered premove, if any.
    fn play_premove(&self);

    /// Halts move input (entering replay mode).
    fn stop(&self);
}

/// Back-navigation stack: lets a back gesture cancel an in-progress
/// interaction before leaving the screen.
pub trait BackStack: Send + Sync + std::fmt::Debug {
    /// Registers an entry; returns a token for removal.
    fn push(&self, label: &str) -> u64;

    /// Removes a previously pushed entry.
    fn pop(&self, token: u64);
}
