//! Game clocks: live per-move countdown and correspondence.
//!
//! Exactly one flavour is attached per game, selected by game speed at
//! construction. Ticks are driven by the controller's cadence timer;
//! server clock events overwrite both sides wholesale.

use std::time::Duration;

use crate::config::SyncConfig;
use crate::domain::game::{ClockConfig, Color, CorrespondenceConfig, Speed};

/// Seconds → `Duration`, clamping negatives the server occasionally
/// produces around lag compensation.
fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

/// Live per-move countdown clock.
#[derive(Debug, Clone)]
pub struct LiveClock {
    white: Duration,
    black: Duration,
    running: bool,
}

impl LiveClock {
    /// Builds from a snapshot's clock configuration.
    #[must_use]
    pub fn from_config(config: &ClockConfig) -> Self {
        Self {
            white: secs(config.white),
            black: secs(config.black),
            running: config.running,
        }
    }

    /// Overwrites both sides from a server clock event and starts the
    /// countdown.
    pub fn update(&mut self, white: f64, black: f64) {
        self.white = secs(white);
        self.black = secs(black);
        self.running = true;
    }

    /// Decrements the given side's remaining time.
    pub fn tick(&mut self, color: Color, dt: Duration) {
        let side = self.side_mut(color);
        *side = side.saturating_sub(dt);
    }

    /// Remaining time for a side.
    #[must_use]
    pub const fn remaining(&self, color: Color) -> Duration {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    /// A side's flag fell.
    #[must_use]
    pub const fn flagged(&self, color: Color) -> bool {
        self.remaining(color).is_zero()
    }

    /// Whether the countdown has started.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    fn side_mut(&mut self, color: Color) -> &mut Duration {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }
}

/// Day-granularity correspondence clock, ticked far less frequently.
#[derive(Debug, Clone)]
pub struct CorrespondenceClock {
    white: Duration,
    black: Duration,
}

impl CorrespondenceClock {
    /// Builds from a snapshot's correspondence configuration.
    #[must_use]
    pub fn from_config(config: &CorrespondenceConfig) -> Self {
        Self {
            white: secs(config.white),
            black: secs(config.black),
        }
    }

    /// Overwrites both sides from a server clock event.
    pub fn update(&mut self, white: f64, black: f64) {
        self.white = secs(white);
        self.black = secs(black);
    }

    /// Decrements the given side's remaining time.
    pub fn tick(&mut self, color: Color, dt: Duration) {
        let side = match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        };
        *side = side.saturating_sub(dt);
    }

    /// Remaining time for a side.
    #[must_use]
    pub const fn remaining(&self, color: Color) -> Duration {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    /// Remaining whole days for a side, rounded up.
    #[must_use]
    pub fn remaining_days(&self, color: Color) -> u64 {
        self.remaining(color).as_secs().div_ceil(86_400)
    }

    /// A side's flag fell.
    #[must_use]
    pub const fn flagged(&self, color: Color) -> bool {
        self.remaining(color).is_zero()
    }
}

/// The single clock attached to a game.
#[derive(Debug, Clone)]
pub enum GameClock {
    /// Live per-move countdown.
    Live(LiveClock),
    /// Day-granularity correspondence clock.
    Correspondence(CorrespondenceClock),
}

impl GameClock {
    /// Selects and builds the clock flavour for a game. Correspondence
    /// speed takes the correspondence configuration; everything else
    /// takes the live configuration. Never both.
    #[must_use]
    pub fn from_snapshot(
        speed: Speed,
        clock: Option<&ClockConfig>,
        correspondence: Option<&CorrespondenceConfig>,
    ) -> Option<Self> {
        if speed.is_correspondence() {
            correspondence
                .map(CorrespondenceClock::from_config)
                .map(Self::Correspondence)
        } else {
            clock.map(LiveClock::from_config).map(Self::Live)
        }
    }

    /// Forwards a server clock event to whichever flavour is attached.
    pub fn update(&mut self, white: f64, black: f64) {
        match self {
            Self::Live(c) => c.update(white, black),
            Self::Correspondence(c) => c.update(white, black),
        }
    }

    /// Decrements the given side's remaining time.
    pub fn tick(&mut self, color: Color, dt: Duration) {
        match self {
            Self::Live(c) => c.tick(color, dt),
            Self::Correspondence(c) => c.tick(color, dt),
        }
    }

    /// A side's flag fell.
    #[must_use]
    pub const fn flagged(&self, color: Color) -> bool {
        match self {
            Self::Live(c) => c.flagged(color),
            Self::Correspondence(c) => c.flagged(color),
        }
    }

    /// Tick cadence for this flavour.
    #[must_use]
    pub const fn cadence(&self, cfg: &SyncConfig) -> Duration {
        match self {
            Self::Live(_) => cfg.live_clock_tick,
            Self::Correspondence(_) => cfg.correspondence_clock_tick,
        }
    }
}
