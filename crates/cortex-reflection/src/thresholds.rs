use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::warn;

/// Consumes implicit-feedback events (submit_feedback ratings) and maintains
/// EMA-smoothed routing complexity thresholds, with a safety-floor rollback
/// to defaults if feedback turns sharply negative (spec §4.12, §9
/// "Adaptive-threshold rollback").
pub struct AdaptiveThresholds {
    values: Mutex<HashMap<String, f32>>,
    feedback_window: Mutex<VecDeque<i8>>,
    defaults: HashMap<String, f32>,
    alpha: f32,
    window_size: usize,
    rollback_negative_fraction: f32,
}

impl AdaptiveThresholds {
    pub fn new(defaults: HashMap<String, f32>, alpha: f32, window_size: usize, rollback_negative_fraction: f32) -> Self {
        Self {
            values: Mutex::new(defaults.clone()),
            feedback_window: Mutex::new(VecDeque::with_capacity(window_size)),
            defaults,
            alpha,
            window_size,
            rollback_negative_fraction,
        }
    }

    pub fn get(&self, key: &str) -> f32 {
        let values = self.values.lock().unwrap();
        values.get(key).copied().unwrap_or(0.5)
    }

    /// EMA-updates `key` toward `observed`. Call when a request's outcome
    /// gives fresh evidence about where the complexity boundary should sit.
    pub fn ema_update(&self, key: &str, observed: f32) -> f32 {
        let mut values = self.values.lock().unwrap();
        let prev = values.get(key).copied().unwrap_or(observed);
        let updated = self.alpha * observed + (1.0 - self.alpha) * prev;
        values.insert(key.to_string(), updated);
        updated
    }

    /// Records one implicit-feedback signal (`+1` positive, `-1` negative).
    /// If the trailing window's negative fraction crosses the configured
    /// trip point, thresholds reset to defaults and the window clears.
    pub fn record_feedback(&self, rating: i8) {
        let mut window = self.feedback_window.lock().unwrap();
        if window.len() >= self.window_size {
            window.pop_front();
        }
        window.push_back(rating);

        if window.len() < self.window_size {
            return;
        }
        let negative = window.iter().filter(|r| **r < 0).count();
        let negative_fraction = negative as f32 / window.len() as f32;
        if negative_fraction >= self.rollback_negative_fraction {
            warn!(
                negative_fraction,
                window_size = window.len(),
                "adaptive threshold rollback: resetting routing thresholds to defaults"
            );
            let mut values = self.values.lock().unwrap();
            *values = self.defaults.clone();
            window.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> AdaptiveThresholds {
        let mut defaults = HashMap::new();
        defaults.insert("reasoning_min_confidence".to_string(), 0.5);
        AdaptiveThresholds::new(defaults, 0.2, 20, 0.5)
    }

    #[test]
    fn ema_update_moves_toward_observed_value() {
        let t = thresholds();
        let v1 = t.ema_update("reasoning_min_confidence", 1.0);
        assert!(v1 > 0.5 && v1 < 1.0);
    }

    #[test]
    fn rollback_triggers_when_half_the_window_is_negative() {
        let t = thresholds();
        t.ema_update("reasoning_min_confidence", 0.9);
        for _ in 0..10 {
            t.record_feedback(-1);
        }
        for _ in 0..10 {
            t.record_feedback(1);
        }
        assert_eq!(t.get("reasoning_min_confidence"), 0.5);
    }

    #[test]
    fn no_rollback_when_feedback_stays_mostly_positive() {
        let t = thresholds();
        t.ema_update("reasoning_min_confidence", 0.9);
        for _ in 0..20 {
            t.record_feedback(1);
        }
        assert!(t.get("reasoning_min_confidence") > 0.5);
    }
}
