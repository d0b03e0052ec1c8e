//! Fade parameters and ramp precomputation

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::time::{Gate, TimeValue};

/// Color at a relative position (0.0..=1.0) of the fade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub color: Color,
    pub position: f64,
}

impl ColorStop {
    pub fn new(color: Color, position: f64) -> Self {
        Self { color, position }
    }
}

/// Shape of the transition between two neighboring stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FadeKind {
    #[default]
    Linear,
    Smooth,
    Sharp,
    Fast,
    Slow,
    Hold,
}

impl FadeKind {
    /// Map linear progress to color progress.
    pub fn shape(self, p: f64) -> f64 {
        let p = p.clamp(0.0, 1.0);
        match self {
            Self::Linear => p,
            Self::Smooth => (1.0 - (PI * p).cos()) / 2.0,
            Self::Sharp => {
                if p < 0.5 {
                    (p / 2.0).sqrt()
                } else {
                    1.0 - ((1.0 - p) / 2.0).sqrt()
                }
            }
            Self::Fast => 1.0 - (1.0 - p).powi(2),
            Self::Slow => p.powi(2),
            Self::Hold => {
                if p >= 1.0 { 1.0 } else { 0.0 }
            }
        }
    }
}

/// How overlapping activations of one pad interact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FadePlayback {
    /// A new press replaces the running ramp of the same pad
    #[default]
    Mono,
    /// Ramps overlap freely
    Poly,
    /// The ramp restarts while the pad is held
    Loop,
}

/// One quantized color change of a precomputed ramp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampStep {
    pub color: Color,
    /// Relative time, 0.0..=1.0
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FadeParams {
    pub time: TimeValue,
    pub gate: Gate,
    pub playback: FadePlayback,
    stops: Vec<ColorStop>,
    kinds: Vec<FadeKind>,
}

impl Default for FadeParams {
    fn default() -> Self {
        Self {
            time: TimeValue::default(),
            gate: Gate::default(),
            playback: FadePlayback::Mono,
            stops: vec![ColorStop::new(Color::WHITE, 0.0), ColorStop::new(Color::OFF, 1.0)],
            kinds: vec![FadeKind::Linear],
        }
    }
}

impl FadeParams {
    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    pub fn kinds(&self) -> &[FadeKind] {
        &self.kinds
    }

    /// Replace the color stops. Fewer than two stops is rejected; positions
    /// are clamped, sorted and pinned to 0.0 and 1.0 at the ends.
    pub fn set_stops(&mut self, stops: Vec<ColorStop>) {
        if stops.len() < 2 {
            return;
        }
        self.stops = stops;
        self.sanitize();
    }

    /// Set the shape of segment `index` (between stop `index` and `index + 1`).
    pub fn set_kind(&mut self, index: usize, kind: FadeKind) {
        if let Some(k) = self.kinds.get_mut(index) {
            *k = kind;
        }
    }

    pub fn sanitize(&mut self) {
        if self.stops.len() < 2 {
            *self = Self { time: self.time, gate: self.gate, playback: self.playback, ..Self::default() };
            return;
        }
        for stop in &mut self.stops {
            stop.position = if stop.position.is_finite() { stop.position.clamp(0.0, 1.0) } else { 0.0 };
            stop.color = Color::new(stop.color.red, stop.color.green, stop.color.blue);
        }
        self.stops.sort_by(|a, b| a.position.total_cmp(&b.position));
        if let Some(first) = self.stops.first_mut() {
            first.position = 0.0;
        }
        if let Some(last) = self.stops.last_mut() {
            last.position = 1.0;
        }
        self.kinds.resize(self.stops.len() - 1, FadeKind::Linear);
        self.gate = Gate::new(self.gate.value());
        if let TimeValue::Free(ms) = self.time {
            self.time = TimeValue::free(ms);
        }
    }

    /// Quantized ramp: one step per unit of channel change within each
    /// segment, consecutive duplicates removed, ending on the last stop.
    pub fn ramp(&self) -> Vec<RampStep> {
        let mut ramp: Vec<RampStep> = Vec::new();
        let push = |ramp: &mut Vec<RampStep>, color: Color, position: f64| {
            if ramp.last().map(|s| s.color) != Some(color) {
                ramp.push(RampStep { color, position });
            }
        };

        for (i, pair) in self.stops.windows(2).enumerate() {
            let (a, b) = (pair[0], pair[1]);
            let kind = self.kinds.get(i).copied().unwrap_or_default();
            let steps = a.color.max_channel_delta(&b.color).max(1) as usize;
            for j in 0..steps {
                let progress = j as f64 / steps as f64;
                let color = a.color.mix(&b.color, kind.shape(progress));
                push(&mut ramp, color, a.position + (b.position - a.position) * progress);
            }
        }
        if let Some(last) = self.stops.last() {
            push(&mut ramp, last.color, last.position);
        }
        ramp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ramp_is_quantized() {
        let ramp = FadeParams::default().ramp();
        // White to off: one step per channel unit, 64 distinct colors.
        assert_eq!(ramp.len(), 64);
        assert_eq!(ramp.first().unwrap().color, Color::WHITE);
        assert_eq!(ramp.last().unwrap().color, Color::OFF);
        assert_eq!(ramp.last().unwrap().position, 1.0);
        assert!(ramp.windows(2).all(|w| w[0].position <= w[1].position));
        assert!(ramp.windows(2).all(|w| w[0].color != w[1].color));
    }

    #[test]
    fn test_hold_segment_jumps_at_end() {
        let mut params = FadeParams::default();
        params.set_stops(vec![
            ColorStop::new(Color::new(63, 0, 0), 0.0),
            ColorStop::new(Color::new(0, 63, 0), 1.0),
        ]);
        params.set_kind(0, FadeKind::Hold);
        let ramp = params.ramp();
        assert_eq!(ramp.len(), 2);
        assert_eq!(ramp[1].position, 1.0);
    }

    #[test]
    fn test_set_stops_sanitizes() {
        let mut params = FadeParams::default();
        params.set_stops(vec![ColorStop::new(Color::WHITE, 0.0)]);
        assert_eq!(params.stops().len(), 2);

        params.set_stops(vec![
            ColorStop::new(Color::OFF, 0.7),
            ColorStop::new(Color::WHITE, 0.2),
            ColorStop::new(Color::new(10, 0, 0), 0.5),
        ]);
        let positions: Vec<f64> = params.stops().iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0.0, 0.5, 1.0]);
        assert_eq!(params.kinds().len(), 2);
    }
}
