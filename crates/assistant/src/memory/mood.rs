//! The valence/arousal mood model.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BASELINE_AROUSAL, DEFAULT_BASELINE_VALENCE, MOOD_DECAY_K_PER_HOUR};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Mood {
    #[serde(default)]
    pub valence: f64,
    #[serde(default)]
    pub arousal: f64,
}

impl Mood {
    pub fn baseline() -> Mood {
        Mood { valence: DEFAULT_BASELINE_VALENCE, arousal: DEFAULT_BASELINE_AROUSAL }
    }

    pub fn is_zero(&self) -> bool {
        self.valence == 0.0 && self.arousal == 0.0
    }
}

/// Session-start mood: the previous final mood decayed toward baseline,
/// componentwise `baseline + (final - baseline) * exp(-k * hours)`.
pub fn compute_initial_mood(baseline: Mood, last_final: Mood, since_last: Duration) -> Mood {
    let hours = (since_last.num_milliseconds() as f64 / 3_600_000.0).max(0.0);
    let decay = (-MOOD_DECAY_K_PER_HOUR * hours).exp();
    Mood {
        valence: baseline.valence + (last_final.valence - baseline.valence) * decay,
        arousal: baseline.arousal + (last_final.arousal - baseline.arousal) * decay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_hour_decay_matches_model() {
        let baseline = Mood { valence: 0.2, arousal: 0.1 };
        let last_final = Mood { valence: 0.9, arousal: 0.9 };
        let initial = compute_initial_mood(baseline, last_final, Duration::hours(4));
        // k = 0.25/h, 4h => e^-1
        assert!((initial.valence - (0.2 + 0.7 * (-1.0f64).exp())).abs() < 1e-3);
        assert!((initial.arousal - (0.1 + 0.8 * (-1.0f64).exp())).abs() < 1e-3);
    }

    #[test]
    fn zero_elapsed_returns_final() {
        let baseline = Mood::baseline();
        let last_final = Mood { valence: 0.6, arousal: 0.4 };
        let initial = compute_initial_mood(baseline, last_final, Duration::zero());
        assert!((initial.valence - 0.6).abs() < 1e-9);
        assert!((initial.arousal - 0.4).abs() < 1e-9);
    }

    #[test]
    fn negative_elapsed_clamps_to_zero() {
        let baseline = Mood::baseline();
        let last_final = Mood { valence: 0.6, arousal: 0.4 };
        let initial = compute_initial_mood(baseline, last_final, Duration::hours(-3));
        assert!((initial.valence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn long_gap_converges_to_baseline() {
        let baseline = Mood::baseline();
        let last_final = Mood { valence: 1.0, arousal: 1.0 };
        let initial = compute_initial_mood(baseline, last_final, Duration::days(30));
        assert!((initial.valence - baseline.valence).abs() < 1e-6);
        assert!((initial.arousal - baseline.arousal).abs() < 1e-6);
    }
}
