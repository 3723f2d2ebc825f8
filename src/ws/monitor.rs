//! Per-session connection health monitor.
//!
//! Two timers start when the socket drops. A short debounce keeps
//! sub-second blips from flickering the connection indicator; a long
//! grace window catches proxies and firewalls that accept the network
//! but silently blackhole WebSocket traffic. The proxy warning fires at
//! most once per session lifetime and is suppressed forever once the
//! persisted opt-out flag is set.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::ports::{KvStore, Reachability};

/// Persisted opt-out flag for the proxy-failure warning.
pub const PROXY_WARNING_FLAG: &str = "donotshowproxyfailwarning";

/// Events produced by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Debounced connection status for cosmetic display.
    StatusChanged(bool),
    /// The disconnect outlived the grace window with the network
    /// otherwise reachable: a proxy or firewall likely blocks the
    /// tunnel.
    ProxyFailWarning,
}

/// Connection monitor state machine.
///
/// Deliberately synchronous: the owner supplies `now`, asks for the
/// next deadline, and fires due timers. This keeps every transition
/// testable without a runtime.
#[derive(Debug)]
pub struct ConnectionMonitor {
    connected: bool,
    already_warned: bool,
    debounce: std::time::Duration,
    grace: std::time::Duration,
    status_at: Option<Instant>,
    proxy_check_at: Option<Instant>,
    net: Arc<dyn Reachability>,
    kv: Arc<dyn KvStore>,
}

impl ConnectionMonitor {
    /// Builds a monitor; starts optimistic (connected).
    #[must_use]
    pub fn new(cfg: &SyncConfig, net: Arc<dyn Reachability>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            connected: true,
            already_warned: false,
            debounce: cfg.disconnect_debounce,
            grace: cfg.proxy_fail_grace,
            status_at: None,
            proxy_check_at: None,
            net,
            kv,
        }
    }

    /// Current (undebounced) connection flag.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// The socket opened. Cancels pending timers; reports the recovery
    /// when the disconnect had already been surfaced.
    pub fn on_connected(&mut self) -> Option<MonitorEvent> {
        let was_off = !self.connected;
        self.connected = true;
        self.status_at = None;
        self.proxy_check_at = None;
        was_off.then_some(MonitorEvent::StatusChanged(true))
    }

    /// The socket dropped. Arms the debounce and, when eligible, the
    /// proxy grace window.
    pub fn on_disconnected(&mut self, now: Instant) {
        let was_on = self.connected;
        self.connected = false;
        if !was_on {
            return;
        }
        self.status_at = Some(now + self.debounce);
        if !self.already_warned && !self.opted_out() {
            self.proxy_check_at = Some(now + self.grace);
        }
    }

    /// Earliest pending timer, `None` when idle.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.status_at, self.proxy_check_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Fires every timer due at `now`.
    pub fn fire_due(&mut self, now: Instant) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        if self.status_at.is_some_and(|at| at <= now) {
            self.status_at = None;
            if !self.connected {
                events.push(MonitorEvent::StatusChanged(false));
            }
        }
        if self.proxy_check_at.is_some_and(|at| at <= now) {
            self.proxy_check_at = None;
            // Still down, network otherwise fine: suspect the proxy.
            if !self.connected && self.net.has_network() && !self.already_warned {
                self.already_warned = true;
                self.kv.set(PROXY_WARNING_FLAG, Value::Bool(true));
                events.push(MonitorEvent::ProxyFailWarning);
            }
        }
        events
    }

    fn opted_out(&self) -> bool {
        matches!(self.kv.get(PROXY_WARNING_FLAG), Some(Value::Bool(true)))
    }
}
