//! Device timing: free milliseconds or tempo-synced step lengths

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const MIN_BPM: u32 = 20;
pub const MAX_BPM: u32 = 999;
pub const MIN_FREE_MS: u32 = 1;
pub const MAX_FREE_MS: u32 = 30_000;

/// Tempo-synced length, a power-of-two fraction of a 4/4 bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StepLength {
    OneTwentyEighth,
    SixtyFourth,
    ThirtySecond,
    #[default]
    Sixteenth,
    Eighth,
    Quarter,
    Half,
    Bar,
    TwoBars,
    FourBars,
}

impl StepLength {
    /// Length in quarter-note beats.
    pub fn beats(self) -> f64 {
        match self {
            Self::OneTwentyEighth => 1.0 / 32.0,
            Self::SixtyFourth => 1.0 / 16.0,
            Self::ThirtySecond => 1.0 / 8.0,
            Self::Sixteenth => 0.25,
            Self::Eighth => 0.5,
            Self::Quarter => 1.0,
            Self::Half => 2.0,
            Self::Bar => 4.0,
            Self::TwoBars => 8.0,
            Self::FourBars => 16.0,
        }
    }
}

/// Base duration of a time-based device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimeValue {
    Free(u32),
    Steps(StepLength),
}

impl Default for TimeValue {
    fn default() -> Self {
        Self::Free(500)
    }
}

impl TimeValue {
    /// Validated constructor for free time; out-of-range values clamp.
    pub fn free(ms: u32) -> Self {
        Self::Free(ms.clamp(MIN_FREE_MS, MAX_FREE_MS))
    }

    /// Milliseconds for one unit of this time at `bpm`, before gating.
    pub fn millis(&self, bpm: u32) -> f64 {
        match *self {
            Self::Free(ms) => ms.clamp(MIN_FREE_MS, MAX_FREE_MS) as f64,
            Self::Steps(length) => {
                let bpm = bpm.clamp(MIN_BPM, MAX_BPM) as f64;
                length.beats() * 60_000.0 / bpm
            }
        }
    }

    /// Gated duration at `bpm`.
    pub fn resolve(&self, bpm: u32, gate: Gate) -> Duration {
        Duration::from_secs_f64(self.millis(bpm) * gate.value() / 1000.0)
    }
}

/// Multiplier applied to a device's base time, 0.01..=4.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Gate(f64);

impl Gate {
    pub const MIN: f64 = 0.01;
    pub const MAX: f64 = 4.0;

    pub fn new(value: f64) -> Self {
        if value.is_finite() {
            Self(value.clamp(Self::MIN, Self::MAX))
        } else {
            Self::default()
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self(1.0)
    }
}

impl From<f64> for Gate {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<Gate> for f64 {
    fn from(gate: Gate) -> Self {
        gate.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_time_resolves_with_gate() {
        let t = TimeValue::free(500);
        assert_eq!(t.resolve(120, Gate::new(1.0)), Duration::from_millis(500));
        assert_eq!(t.resolve(120, Gate::new(0.5)), Duration::from_millis(250));
    }

    #[test]
    fn test_steps_follow_tempo() {
        let t = TimeValue::Steps(StepLength::Quarter);
        assert!((t.millis(120) - 500.0).abs() < 1e-9);
        assert!((TimeValue::Steps(StepLength::Sixteenth).millis(60) - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_values_clamp() {
        assert_eq!(Gate::new(10.0).value(), Gate::MAX);
        assert_eq!(Gate::new(-1.0).value(), Gate::MIN);
        assert_eq!(Gate::new(f64::NAN).value(), 1.0);
        assert_eq!(TimeValue::free(0), TimeValue::Free(MIN_FREE_MS));
    }
}
