//! Stateless transforms: position, color and layer rewrites

use std::sync::RwLock;

use padlight_core::grid::{self, coords};
use padlight_core::params::{FlipParams, LayerParams, MoveParams, PaintParams, RotateParams};
use padlight_core::Signal;

use super::{read, DeviceIo, Process};

/// Shared shape of Flip and Rotate: remap the pad, optionally keeping the
/// original alongside.
fn remap(signals: Vec<Signal>, bypass: bool, map: impl Fn(u8) -> u8) -> Vec<Signal> {
    let mut out = Vec::with_capacity(signals.len() * 2);
    for signal in signals {
        if signal.is_clear() {
            out.push(signal);
            continue;
        }
        let index = map(signal.index);
        if bypass && index != signal.index {
            out.push(signal.clone());
        }
        out.push(signal.with_index(index));
    }
    out
}

pub(crate) struct Flip {
    params: RwLock<FlipParams>,
}

impl Flip {
    pub fn new(params: FlipParams) -> Self {
        Self { params: RwLock::new(params) }
    }
}

impl Process for Flip {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let FlipParams { mode, bypass } = read(&self.params).clone();
        io.emit(remap(signals, bypass, |index| grid::flip(index, mode)));
    }

    params_accessors!(Flip);
}

pub(crate) struct Rotate {
    params: RwLock<RotateParams>,
}

impl Rotate {
    pub fn new(params: RotateParams) -> Self {
        Self { params: RwLock::new(params) }
    }
}

impl Process for Rotate {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let RotateParams { mode, bypass } = read(&self.params).clone();
        io.emit(remap(signals, bypass, |index| grid::rotate(index, mode)));
    }

    params_accessors!(Rotate);
}

pub(crate) struct Move {
    params: RwLock<MoveParams>,
}

impl Move {
    pub fn new(params: MoveParams) -> Self {
        Self { params: RwLock::new(params) }
    }
}

impl Process for Move {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let params = read(&self.params).clone();
        let moved = signals
            .into_iter()
            .filter_map(|signal| {
                if signal.is_clear() {
                    return Some(signal);
                }
                let (x, y) = coords(signal.index);
                let (nx, ny) = params.offset.apply(x, y, params.grid, params.wrap)?;
                grid::index_at(nx, ny, params.grid).map(|index| signal.with_index(index))
            })
            .collect();
        io.emit(moved);
    }

    params_accessors!(Move);
}

pub(crate) struct Paint {
    params: RwLock<PaintParams>,
}

impl Paint {
    pub fn new(params: PaintParams) -> Self {
        Self { params: RwLock::new(params) }
    }
}

impl Process for Paint {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let color = read(&self.params).color;
        let painted = signals
            .into_iter()
            .map(|s| if s.lit() { s.with_color(color) } else { s })
            .collect();
        io.emit(painted);
    }

    params_accessors!(Paint);
}

pub(crate) struct Layer {
    params: RwLock<LayerParams>,
}

impl Layer {
    pub fn new(params: LayerParams) -> Self {
        Self { params: RwLock::new(params) }
    }
}

impl Process for Layer {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let params = read(&self.params).clone();
        let layered = signals
            .into_iter()
            .map(|mut s| {
                s.layer = params.target;
                s.blending = params.blending;
                s.blending_range = params.range;
                s
            })
            .collect();
        io.emit(layered);
    }

    params_accessors!(Layer);
}

#[cfg(test)]
mod tests {
    use padlight_core::{BlendingMode, Color, DeviceKindParams, FlipMode, GridMode, Offset, RotateMode};

    use crate::device::testing::*;

    use super::*;

    #[test]
    fn test_flip_with_bypass_keeps_original() {
        let (_context, device, rx) = wired(DeviceKindParams::Flip(FlipParams {
            mode: FlipMode::Horizontal,
            bypass: true,
        }));
        device.enter(vec![Signal::new(31, Color::WHITE)]);
        let indices: Vec<u8> = next(&rx).iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![31, 38]);
    }

    #[test]
    fn test_rotate_quarter_turn() {
        let (_context, device, rx) = wired(DeviceKindParams::Rotate(RotateParams {
            mode: RotateMode::D90,
            bypass: false,
        }));
        // (1, 0) -> (9, 1)
        device.enter(vec![Signal::new(1, Color::WHITE)]);
        assert_eq!(next(&rx)[0].index, 19);
    }

    #[test]
    fn test_move_drops_off_grid_and_wraps() {
        let (_context, device, rx) = wired(DeviceKindParams::Move(MoveParams {
            offset: Offset::new(2, 0),
            grid: GridMode::Square,
            wrap: false,
        }));
        device.enter(vec![Signal::new(11, Color::WHITE), Signal::new(18, Color::WHITE)]);
        let out = next(&rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].index, 13);

        device.set_params(padlight_core::DeviceParams::new(DeviceKindParams::Move(MoveParams {
            offset: Offset::new(2, 0),
            grid: GridMode::Square,
            wrap: true,
        })));
        device.enter(vec![Signal::new(18, Color::WHITE)]);
        assert_eq!(next(&rx)[0].index, 12);
    }

    #[test]
    fn test_paint_leaves_offs_alone() {
        let red = Color::new(63, 0, 0);
        let (_context, device, rx) = wired(DeviceKindParams::Paint(PaintParams { color: red }));
        device.enter(vec![Signal::new(1, Color::WHITE), Signal::new(2, Color::OFF)]);
        let out = next(&rx);
        assert_eq!(out[0].color, red);
        assert_eq!(out[1].color, Color::OFF);
    }

    #[test]
    fn test_layer_sets_blending() {
        let (_context, device, rx) = wired(DeviceKindParams::Layer(LayerParams {
            target: 4,
            blending: BlendingMode::Multiply,
            range: 10,
        }));
        device.enter(vec![Signal::new(1, Color::WHITE)]);
        let out = next(&rx);
        assert_eq!((out[0].layer, out[0].blending, out[0].blending_range), (4, BlendingMode::Multiply, 10));
    }
}
