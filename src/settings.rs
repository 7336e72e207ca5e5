//! Debounced persistence of gateway settings.

use std::time::{Duration, Instant};

/// Coalesces bursts of setting changes into a single flush once no change
/// has happened for `quiet`.
#[derive(Clone, Debug)]
pub struct SettingsFlush {
    quiet: Duration,
    dirty_since: Option<Instant>,
}

impl SettingsFlush {
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, dirty_since: None }
    }

    /// Note a change; restarts the quiet period
    pub fn mark_dirty(&mut self, now: Instant) {
        self.dirty_since = Some(now);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    /// Returns true exactly once per burst, when the settings should be written
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.dirty_since {
            Some(t) if now.saturating_duration_since(t) >= self.quiet => {
                self.dirty_since = None;
                true
            }
            _ => false,
        }
    }
}
