//! Tunables loaded from environment variables.
//!
//! Follows 12-factor style: every knob comes from an environment
//! variable (or a `.env` file via `dotenvy`) and falls back to the
//! defaults the original client shipped with. Timing values that were
//! empirically tuned (premove delays, grace windows) are deliberately
//! configurable rather than hard invariants.

use std::time::Duration;

/// Top-level synchronization configuration.
///
/// Loaded once at startup via [`SyncConfig::from_env`], or built with
/// [`SyncConfig::default`] in tests.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between liveness pings on a game session.
    pub ping_delay: Duration,

    /// Debounce before a disconnect is surfaced as a cosmetic status
    /// change (sub-second blips stay invisible).
    pub disconnect_debounce: Duration,

    /// Grace window after which a persisting disconnect with the network
    /// otherwise reachable is reported as a suspected proxy failure.
    pub proxy_fail_grace: Duration,

    /// Delay before a queued premove is executed after the opponent's
    /// move lands.
    pub premove_delay: Duration,

    /// Premove delay for the atomic variant (longer, so deferred capture
    /// explosions settle first).
    pub premove_delay_atomic: Duration,

    /// Minimum spacing between `outoftime` claims.
    pub outoftime_throttle: Duration,

    /// Tick cadence for a live per-move clock.
    pub live_clock_tick: Duration,

    /// Tick cadence for a correspondence clock.
    pub correspondence_clock_tick: Duration,

    /// Initial reconnect backoff after a dropped connection.
    pub reconnect_base: Duration,

    /// Backoff ceiling; doubling stops here.
    pub reconnect_max: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ping_delay: Duration::from_millis(1000),
            disconnect_debounce: Duration::from_secs(2),
            proxy_fail_grace: Duration::from_secs(20),
            premove_delay: Duration::from_millis(10),
            premove_delay_atomic: Duration::from_millis(100),
            outoftime_throttle: Duration::from_millis(500),
            live_clock_tick: Duration::from_millis(100),
            correspondence_clock_tick: Duration::from_secs(6),
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(8),
        }
    }
}

impl SyncConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the defaults above when a variable is not set or
    /// fails to parse. Calls `dotenvy::dotenv().ok()` to optionally load
    /// a `.env` file.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            ping_delay: parse_env_ms("ROUND_SYNC_PING_DELAY_MS", defaults.ping_delay),
            disconnect_debounce: parse_env_ms(
                "ROUND_SYNC_DISCONNECT_DEBOUNCE_MS",
                defaults.disconnect_debounce,
            ),
            proxy_fail_grace: parse_env_ms(
                "ROUND_SYNC_PROXY_FAIL_GRACE_MS",
                defaults.proxy_fail_grace,
            ),
            premove_delay: parse_env_ms("ROUND_SYNC_PREMOVE_DELAY_MS", defaults.premove_delay),
            premove_delay_atomic: parse_env_ms(
                "ROUND_SYNC_PREMOVE_DELAY_ATOMIC_MS",
                defaults.premove_delay_atomic,
            ),
            outoftime_throttle: parse_env_ms(
                "ROUND_SYNC_OUTOFTIME_THROTTLE_MS",
                defaults.outoftime_throttle,
            ),
            live_clock_tick: parse_env_ms(
                "ROUND_SYNC_LIVE_CLOCK_TICK_MS",
                defaults.live_clock_tick,
            ),
            correspondence_clock_tick: parse_env_ms(
                "ROUND_SYNC_CORRESPONDENCE_CLOCK_TICK_MS",
                defaults.correspondence_clock_tick,
            ),
            reconnect_base: parse_env_ms("ROUND_SYNC_RECONNECT_BASE_MS", defaults.reconnect_base),
            reconnect_max: parse_env_ms("ROUND_SYNC_RECONNECT_MAX_MS", defaults.reconnect_max),
        }
    }

    /// Premove delay for the given variant flavour.
    #[must_use]
    pub const fn premove_delay_for(&self, atomic: bool) -> Duration {
        if atomic {
            self.premove_delay_atomic
        } else {
            self.premove_delay
        }
    }
}

/// Parses an environment variable as milliseconds, returning `default`
/// on missing or invalid values.
fn parse_env_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
