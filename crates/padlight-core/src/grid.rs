//! Pad geometry on the 10x10 controller grid
//!
//! Pads are addressed as `y * 10 + x`. Row and column 0 and 9 hold the edge
//! buttons; the inner 8x8 square is the main pad area.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

pub const GRID_SIZE: i32 = 10;

/// Largest displacement on either axis that can still land on the grid
pub const MAX_OFFSET: i32 = GRID_SIZE - 1;

/// Which part of the grid a transform is allowed to land on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GridMode {
    /// Edge buttons included (0..=9 on both axes)
    #[default]
    Full,
    /// Inner 8x8 pads only (1..=8 on both axes)
    Square,
}

impl GridMode {
    fn bounds(self) -> (i32, i32) {
        match self {
            Self::Full => (0, GRID_SIZE - 1),
            Self::Square => (1, GRID_SIZE - 2),
        }
    }

    pub fn contains(self, x: i32, y: i32) -> bool {
        let (lo, hi) = self.bounds();
        (lo..=hi).contains(&x) && (lo..=hi).contains(&y)
    }

    fn wrap(self, v: i32) -> i32 {
        let (lo, hi) = self.bounds();
        let span = hi - lo + 1;
        (v - lo).rem_euclid(span) + lo
    }
}

pub fn coords(index: u8) -> (i32, i32) {
    (index as i32 % GRID_SIZE, index as i32 / GRID_SIZE)
}

/// Pad index for a coordinate, `None` when it falls outside `grid`.
pub fn index_at(x: i32, y: i32, grid: GridMode) -> Option<u8> {
    grid.contains(x, y).then(|| (y * GRID_SIZE + x) as u8)
}

/// Relative pad displacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Offset {
    pub x: i32,
    pub y: i32,
}

impl Offset {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Both axes limited to `-MAX_OFFSET..=MAX_OFFSET`.
    pub fn clamped(self) -> Self {
        Self::new(self.x.clamp(-MAX_OFFSET, MAX_OFFSET), self.y.clamp(-MAX_OFFSET, MAX_OFFSET))
    }

    /// Displace a coordinate. With `wrap` the result folds back into the
    /// grid; otherwise off-grid results are `None`.
    pub fn apply(&self, x: i32, y: i32, grid: GridMode, wrap: bool) -> Option<(i32, i32)> {
        let (mut nx, mut ny) = (x.saturating_add(self.x), y.saturating_add(self.y));
        if wrap {
            nx = grid.wrap(nx);
            ny = grid.wrap(ny);
        }
        grid.contains(nx, ny).then_some((nx, ny))
    }
}

/// Mirror axis for the Flip device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlipMode {
    #[default]
    Horizontal,
    Vertical,
    Diagonal1,
    Diagonal2,
}

pub fn flip(index: u8, mode: FlipMode) -> u8 {
    let (x, y) = coords(index);
    let last = GRID_SIZE - 1;
    let (nx, ny) = match mode {
        FlipMode::Horizontal => (last - x, y),
        FlipMode::Vertical => (x, last - y),
        FlipMode::Diagonal1 => (y, x),
        FlipMode::Diagonal2 => (last - y, last - x),
    };
    (ny * GRID_SIZE + nx) as u8
}

/// Clockwise rotation for the Rotate device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RotateMode {
    #[default]
    D90,
    D180,
    D270,
}

pub fn rotate(index: u8, mode: RotateMode) -> u8 {
    let (x, y) = coords(index);
    let last = GRID_SIZE - 1;
    let (nx, ny) = match mode {
        RotateMode::D90 => (last - y, x),
        RotateMode::D180 => (last - x, last - y),
        RotateMode::D270 => (y, last - x),
    };
    (ny * GRID_SIZE + nx) as u8
}

/// Pads on the straight line from `from` to `to`, excluding `from`.
pub fn line(from: (i32, i32), to: (i32, i32)) -> Vec<(i32, i32)> {
    let (dx, dy) = (to.0.saturating_sub(from.0), to.1.saturating_sub(from.1));
    let steps = dx.saturating_abs().max(dy.saturating_abs());
    (1..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            (
                from.0 + (dx as f64 * t).round() as i32,
                from.1 + (dy as f64 * t).round() as i32,
            )
        })
        .collect()
}

/// Pads on a circular arc from `from` to `to` sweeping `angle` degrees,
/// excluding `from`. Falls back to a straight line for a zero angle or a
/// zero-length chord.
pub fn arc(from: (i32, i32), to: (i32, i32), angle: i32) -> Vec<(i32, i32)> {
    let (dx, dy) = ((to.0 - from.0) as f64, (to.1 - from.1) as f64);
    let chord = (dx * dx + dy * dy).sqrt();
    if angle == 0 || chord == 0.0 {
        return line(from, to);
    }

    let theta = (angle as f64).to_radians();
    let radius = chord / (2.0 * (theta / 2.0).sin()).abs();

    // Center sits on the chord's perpendicular bisector, on the side that
    // makes the sweep go in the requested direction.
    let (mx, my) = (from.0 as f64 + dx / 2.0, from.1 as f64 + dy / 2.0);
    let apothem = (radius * radius - (chord / 2.0).powi(2)).max(0.0).sqrt();
    let (nx, ny) = (-dy / chord, dx / chord);
    let side = if angle > 0 { 1.0 } else { -1.0 };
    let (cx, cy) = (mx + nx * apothem * side, my + ny * apothem * side);

    let start = (from.1 as f64 - cy).atan2(from.0 as f64 - cx);
    let end = (to.1 as f64 - cy).atan2(to.0 as f64 - cx);
    let mut sweep = end - start;
    if sweep > PI {
        sweep -= 2.0 * PI;
    } else if sweep < -PI {
        sweep += 2.0 * PI;
    }
    let samples = ((radius * theta.abs()).ceil() as usize * 2).max(2);

    let mut points: Vec<(i32, i32)> = Vec::new();
    for i in 1..=samples {
        let a = start + sweep * i as f64 / samples as f64;
        let p = (
            (cx + radius * a.cos()).round() as i32,
            (cy + radius * a.sin()).round() as i32,
        );
        if p != from && points.last() != Some(&p) {
            points.push(p);
        }
    }
    if points.last() != Some(&to) {
        points.push(to);
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coords_roundtrip() {
        assert_eq!(coords(33), (3, 3));
        assert_eq!(coords(81), (1, 8));
        assert_eq!(index_at(4, 3, GridMode::Full), Some(34));
        assert_eq!(index_at(0, 3, GridMode::Square), None);
    }

    #[test]
    fn test_offset_wrap() {
        let o = Offset::new(2, 0);
        assert_eq!(o.apply(8, 5, GridMode::Square, false), None);
        assert_eq!(o.apply(8, 5, GridMode::Square, true), Some((2, 5)));
        assert_eq!(o.apply(8, 5, GridMode::Full, true), Some((0, 5)));
    }

    #[test]
    fn test_extreme_offset_does_not_overflow() {
        let o = Offset::new(i32::MAX, i32::MIN);
        assert_eq!(o.apply(9, 0, GridMode::Full, false), None);
        assert!(o.apply(9, 0, GridMode::Full, true).is_some());
        assert_eq!(o.clamped(), Offset::new(MAX_OFFSET, -MAX_OFFSET));
        assert_eq!(Offset::new(-3, 4).clamped(), Offset::new(-3, 4));
    }

    #[test]
    fn test_flip_and_rotate() {
        assert_eq!(flip(31, FlipMode::Horizontal), 38);
        assert_eq!(flip(31, FlipMode::Vertical), 61);
        assert_eq!(flip(31, FlipMode::Diagonal1), 13);
        assert_eq!(rotate(rotate(31, RotateMode::D90), RotateMode::D270), 31);
        assert_eq!(rotate(rotate(31, RotateMode::D90), RotateMode::D90), rotate(31, RotateMode::D180));
    }

    #[test]
    fn test_line_excludes_start() {
        assert_eq!(line((1, 1), (4, 1)), vec![(2, 1), (3, 1), (4, 1)]);
        assert!(line((2, 2), (2, 2)).is_empty());
    }

    #[test]
    fn test_arc_ends_on_target() {
        let points = arc((1, 1), (5, 1), 90);
        assert_eq!(points.last(), Some(&(5, 1)));
        assert!(!points.contains(&(1, 1)));
        // A curved path bows away from the straight chord.
        assert!(points.iter().any(|&(_, y)| y != 1));
        assert_eq!(arc((3, 3), (3, 3), 90), Vec::<(i32, i32)>::new());
    }
}
