//! Per-cycle input monitors. All values are in internal units and all timers
//! count control cycles.

use crate::config::Range;
use serde::{Deserialize, Serialize};

/// Range validator: boundary values are accepted.
pub fn validate_range(range: &Range, command: i32) -> Option<i32> {
    range.contains(command).then_some(command)
}

/// Debounced command/feedback comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlausibilityMonitor {
    count: u16,
}

impl PlausibilityMonitor {
    /// Feed one sample. Returns `true` once `|command - feedback| > threshold`
    /// has held for `debounce_cycles` consecutive samples.
    pub fn check(&mut self, command: i32, feedback: i32, threshold: i32, debounce_cycles: u16) -> bool {
        let delta = command.abs_diff(feedback);
        if delta > threshold.unsigned_abs() {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = 0;
        }
        self.count >= debounce_cycles
    }

    pub fn count(&self) -> u16 {
        self.count
    }
}

/// Unchanged-command detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessMonitor {
    last_command: Option<i32>,
    count: u16,
}

impl StalenessMonitor {
    /// Feed an accepted command. The cycle that introduces a new value counts
    /// as the first of its run.
    pub fn observe(&mut self, command: i32) {
        if self.last_command == Some(command) {
            self.count = self.count.saturating_add(1);
        } else {
            self.last_command = Some(command);
            self.count = 1;
        }
    }

    pub fn is_stale(&self, timeout_cycles: u16) -> bool {
        self.count >= timeout_cycles
    }

    pub fn last_command(&self) -> Option<i32> {
        self.last_command
    }

    pub fn count(&self) -> u16 {
        self.count
    }
}

/// Asymmetric slew limit around `safe`. Moving away from the safe value is
/// bounded to `limit` per cycle; moving toward it is applied in full.
pub fn rate_limit(position: i32, target: i32, safe: i32, limit: i32) -> i32 {
    let current = position.abs_diff(safe);
    let requested = target.abs_diff(safe);
    if requested <= current {
        return target;
    }
    let position = i64::from(position);
    let limit = i64::from(limit);
    let step = (i64::from(target) - position).clamp(-limit, limit);
    // Lands between position and target, so it fits back in i32
    (position + step) as i32
}

/// One step of the return-to-safe ramp, never overshooting `safe`.
pub fn ramp_toward(position: i32, safe: i32, rate: i32) -> i32 {
    if position > safe {
        position.saturating_sub(rate).max(safe)
    } else if position < safe {
        position.saturating_add(rate).min(safe)
    } else {
        safe
    }
}
