//! # round-sync
//!
//! Real-time session synchronization layer for turn-based game clients.
//!
//! This crate keeps a client's view of an ongoing game consistent with
//! the server's authoritative state over an unreliable connection: one
//! logical socket session per context with versioned, ordered event
//! delivery; and a round controller that reconciles server move events
//! with local optimistic actions (moves awaiting confirmation, premoves,
//! replay navigation). Rendering, storage, HTTP, and i18n are consumed
//! through the narrow traits in [`ports`].
//!
//! ## Architecture
//!
//! ```text
//! Host application (board widget, storage, REST, i18n)
//!     │  ports::{BoardView, KvStore, RestApi, …}
//!     │
//!     ├── RoundController (round/)    timeline, clock, pending move
//!     │        │  SessionSignal / UserAction mailboxes
//!     │
//!     ├── Session front-end (ws/session)   dispatch, probe, monitor
//!     │        │  command mailbox / transport signals
//!     │
//!     └── SocketWorker (ws/worker)    connect, ping, version gate,
//!                                     reconnect backoff, ack replay
//! ```
//!
//! The worker owns the physical connection on its own task; everything
//! crosses the boundary as messages, never shared mutable state.

pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod round;
pub mod ws;
