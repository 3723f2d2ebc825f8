//! Session transport: the WebSocket layer beneath the round controller.
//!
//! The physical connection lives on a background worker task
//! ([`worker`]); callers hold a [`session::SessionHandle`] command
//! surface and consume [`session::SessionSignal`]s. Versioned delivery
//! ([`version`]), latency measurement ([`lag`]), and disconnect grace
//! windows ([`monitor`]) are factored into small synchronous pieces.

pub mod lag;
pub mod messages;
pub mod monitor;
pub mod session;
pub mod version;
pub(crate) mod worker;

pub use messages::{ClientMessage, SendOpts, SessionOptions, SessionState, SocketEnvelope};
pub use monitor::{ConnectionMonitor, MonitorEvent};
pub use session::{PresenceRoster, Session, SessionHandle, SessionSignal};
pub use version::{VersionCheck, VersionGate};
