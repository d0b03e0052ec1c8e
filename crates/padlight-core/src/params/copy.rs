//! Copy parameters: offset targets, interpolated paths and pinch timing

use serde::{Deserialize, Serialize};

use crate::grid::{self, GridMode, Offset};
use crate::time::{Gate, TimeValue};

pub const MAX_PINCH: f64 = 2.0;
pub const MAX_ANGLE: i32 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CopyMode {
    /// All targets light at once
    #[default]
    Static,
    /// A light travels across the offset targets
    Animate,
    /// A light travels along the interpolated path between targets
    Interpolate,
    /// One random target per press
    RandomSingle,
    /// A new random target every tick while held
    RandomLoop,
}

impl CopyMode {
    pub fn is_sweep(self) -> bool {
        matches!(self, Self::Animate | Self::Interpolate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyParams {
    pub rate: TimeValue,
    pub gate: Gate,
    pub mode: CopyMode,
    pub grid: GridMode,
    pub wrap: bool,
    pub bilateral: bool,
    pub reverse: bool,
    pub infinite: bool,
    pinch: f64,
    offsets: Vec<Offset>,
    angles: Vec<i32>,
}

impl Default for CopyParams {
    fn default() -> Self {
        Self {
            rate: TimeValue::Free(200),
            gate: Gate::default(),
            mode: CopyMode::Static,
            grid: GridMode::Full,
            wrap: false,
            bilateral: false,
            reverse: false,
            infinite: false,
            pinch: 0.0,
            offsets: Vec::new(),
            angles: Vec::new(),
        }
    }
}

impl CopyParams {
    pub fn pinch(&self) -> f64 {
        self.pinch
    }

    pub fn set_pinch(&mut self, pinch: f64) {
        if pinch.is_finite() {
            self.pinch = pinch.clamp(-MAX_PINCH, MAX_PINCH);
        }
    }

    pub fn offsets(&self) -> &[Offset] {
        &self.offsets
    }

    pub fn angles(&self) -> &[i32] {
        &self.angles
    }

    pub fn add_offset(&mut self, offset: Offset, angle: i32) {
        self.offsets.push(offset.clamped());
        self.angles.push(angle.clamp(-MAX_ANGLE, MAX_ANGLE));
    }

    pub fn remove_offset(&mut self, index: usize) {
        if index < self.offsets.len() {
            self.offsets.remove(index);
            self.angles.remove(index);
        }
    }

    pub fn set_angle(&mut self, index: usize, angle: i32) {
        if let Some(a) = self.angles.get_mut(index) {
            *a = angle.clamp(-MAX_ANGLE, MAX_ANGLE);
        }
    }

    pub fn sanitize(&mut self) {
        self.set_pinch(if self.pinch.is_finite() { self.pinch } else { 0.0 });
        self.angles.resize(self.offsets.len(), 0);
        for o in &mut self.offsets {
            *o = o.clamped();
        }
        for a in &mut self.angles {
            *a = (*a).clamp(-MAX_ANGLE, MAX_ANGLE);
        }
        self.gate = Gate::new(self.gate.value());
        if let TimeValue::Free(ms) = self.rate {
            self.rate = TimeValue::free(ms);
        }
    }

    /// Walk the offsets cumulatively from `index`, yielding each leg as
    /// `(from, to, angle)`. Off-grid positions are kept so later offsets can
    /// walk back onto the grid.
    fn walk(&self, index: u8) -> Vec<((i32, i32), (i32, i32), i32)> {
        let mut from = grid::coords(index);
        let mut legs = Vec::with_capacity(self.offsets.len());
        for (i, offset) in self.offsets.iter().enumerate() {
            let (x, y) = if self.wrap {
                offset
                    .apply(from.0, from.1, self.grid, true)
                    .unwrap_or((from.0.saturating_add(offset.x), from.1.saturating_add(offset.y)))
            } else {
                (from.0.saturating_add(offset.x), from.1.saturating_add(offset.y))
            };
            let angle = self.angles.get(i).copied().unwrap_or(0);
            legs.push((from, (x, y), angle));
            from = (x, y);
        }
        legs
    }

    /// Source pad followed by every offset target that lands on the grid.
    pub fn targets(&self, index: u8) -> Vec<u8> {
        let mut targets = vec![index];
        for (_, (x, y), _) in self.walk(index) {
            if let Some(target) = grid::index_at(x, y, self.grid) {
                targets.push(target);
            }
        }
        targets
    }

    /// Source pad followed by every pad on the straight or curved path
    /// through the offset targets.
    pub fn interpolated(&self, index: u8) -> Vec<u8> {
        let mut path = vec![index];
        for (from, to, angle) in self.walk(index) {
            for (x, y) in grid::arc(from, to, angle) {
                if let Some(pad) = grid::index_at(x, y, self.grid) {
                    if path.last() != Some(&pad) {
                        path.push(pad);
                    }
                }
            }
        }
        path
    }

    /// Pads visited by a sweep in order, honoring `reverse`.
    pub fn sweep(&self, index: u8) -> Vec<u8> {
        let mut pads = match self.mode {
            CopyMode::Interpolate => self.interpolated(index),
            _ => self.targets(index),
        };
        if self.reverse {
            pads.reverse();
        }
        pads
    }

    /// Pinch curve applied to linear progress `x` in 0.0..=1.0.
    ///
    /// Positive pinch front-loads the steps, negative pinch back-loads
    /// them. Bilateral mirrors the curve around the midpoint.
    pub fn pinch_curve(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        let exponent = 2f64.powf(-self.pinch);
        let curve = |v: f64| v.powf(exponent);
        if self.bilateral {
            if x < 0.5 {
                curve(2.0 * x) / 2.0
            } else {
                1.0 - curve(2.0 * (1.0 - x)) / 2.0
            }
        } else {
            curve(x)
        }
    }

    /// Relative times (0.0..=1.0) for transitions `0..=count`.
    pub fn step_fractions(&self, count: usize) -> Vec<f64> {
        if count == 0 {
            return vec![0.0];
        }
        (0..=count).map(|i| self.pinch_curve(i as f64 / count as f64)).collect()
    }
}
