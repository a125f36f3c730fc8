//! Per-key submission readiness tracking.

use ahash::AHashMap;

use crate::definitions::DefinitionRegistry;

/// Tracks when each key was last submitted, against its configured period.
///
/// A key is ready when it has never been submitted, or when its period has elapsed since its last submission.
/// Advancement is drift-free: a key that already has a timestamp advances by exactly its period rather than
/// resetting to the current time, so polling granularity does not accumulate into schedule drift.
#[derive(Debug, Default)]
pub struct ReadinessTracker {
    last_submitted: AHashMap<String, u64>,
}

impl ReadinessTracker {
    /// Returns whether the given key is ready at `now_ms`.
    pub fn is_ready(&self, key: &str, registry: &DefinitionRegistry, now_ms: u64) -> bool {
        match self.last_submitted.get(key) {
            None => true,
            Some(last) => now_ms.saturating_sub(*last) >= registry.resolve(key).period().as_millis() as u64,
        }
    }

    /// Returns the subset of the given keys that are ready at `now_ms`.
    pub fn ready_keys(&self, keys: &[String], registry: &DefinitionRegistry, now_ms: u64) -> Vec<String> {
        keys.iter()
            .filter(|key| self.is_ready(key, registry, now_ms))
            .cloned()
            .collect()
    }

    /// Advances the schedule for every key included in a completed flush cycle.
    ///
    /// Keys with a prior timestamp advance by exactly their period; keys submitted for the first time are stamped
    /// with `now_ms`.
    pub fn advance(&mut self, keys: &[String], registry: &DefinitionRegistry, now_ms: u64) {
        for key in keys {
            let period_ms = registry.resolve(key).period().as_millis() as u64;
            self.last_submitted
                .entry(key.clone())
                .and_modify(|last| *last += period_ms)
                .or_insert(now_ms);
        }
    }

    /// Returns the last-submitted timestamp for the given key, if it has ever been submitted.
    pub fn last_submitted(&self, key: &str) -> Option<u64> {
        self.last_submitted.get(key).copied()
    }

    /// Overrides the last-submitted timestamp for the given key.
    #[cfg(test)]
    pub(crate) fn set_last_submitted(&mut self, key: &str, timestamp_ms: u64) {
        self.last_submitted.insert(key.to_string(), timestamp_ms);
    }
}
