//! Round-trip latency measurement over liveness pings.

use std::collections::VecDeque;
use std::time::Duration;

/// Number of round-trip samples retained.
const DEFAULT_WINDOW: usize = 10;

/// Sliding-window average of ping round-trip times.
///
/// Fed by the connection worker on every pong; queried through the
/// session's `average_lag` command to decorate outbound moves with the
/// client's current latency.
#[derive(Debug, Clone)]
pub struct LagMeter {
    samples: VecDeque<Duration>,
    window: usize,
}

impl Default for LagMeter {
    fn default() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }
}

impl LagMeter {
    /// A meter retaining the last `window` samples (minimum one).
    #[must_use]
    pub fn with_window(window: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window: window.max(1),
        }
    }

    /// Records one round-trip sample, evicting the oldest beyond the
    /// window.
    pub fn record(&mut self, rtt: Duration) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt);
    }

    /// Mean of the retained samples, `None` before the first pong.
    #[must_use]
    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        let count = u32::try_from(self.samples.len()).unwrap_or(u32::MAX);
        Some(total / count)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn empty_meter_answers_none() {
        let meter = LagMeter::default();
        assert!(meter.average().is_none());
    }

    #[test]
    fn average_of_samples() {
        let mut meter = LagMeter::default();
        meter.record(Duration::from_millis(10));
        meter.record(Duration::from_millis(30));
        assert_eq!(meter.average(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn window_evicts_oldest() {
        let mut meter = LagMeter::with_window(2);
        meter.record(Duration::from_millis(100));
        meter.record(Duration::from_millis(20));
        meter.record(Duration::from_millis(40));
        assert_eq!(meter.average(), Some(Duration::from_millis(30)));
    }
}
