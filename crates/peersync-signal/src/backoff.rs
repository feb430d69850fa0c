//! Adaptive poll backoff
//!
//! The signaling poll loop paces itself with a fixed delay ladder, capped
//! at the last step. A non-empty poll batch or an external wake event
//! resets the ladder; empty polls climb it. The ladder never resets on an
//! empty poll, so an idle folder settles at the two-minute cap.

use std::time::Duration;

/// Fixed delay ladder in milliseconds
const POLL_DELAYS_MS: [u64; 15] = [
    50, 50, 100, 100, 200, 400, 600, 1000, 2000, 4000, 8000, 15000, 30000, 60000, 120000,
];

/// Step counter over the poll delay ladder
#[derive(Debug, Default)]
pub struct PollBackoff {
    step: usize,
}

impl PollBackoff {
    /// Starts at the fastest step
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delay for the current step
    pub fn current_delay(&self) -> Duration {
        let index = self.step.min(POLL_DELAYS_MS.len() - 1);
        Duration::from_millis(POLL_DELAYS_MS[index])
    }

    /// Climbs one step, saturating at the cap
    pub fn advance(&mut self) {
        if self.step < POLL_DELAYS_MS.len() - 1 {
            self.step += 1;
        }
    }

    /// Drops back to the fastest step
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Current step index
    pub fn step(&self) -> usize {
        self.step
    }
}
