//! The round controller and its satellites: clocks and atomic
//! explosion geometry.

pub mod atomic;
pub mod clock;
pub mod controller;

pub use clock::{CorrespondenceClock, GameClock, LiveClock};
pub use controller::{ExitReason, MoveCommand, RoundController, RoundDeps, Side, UserAction};
