//! Pad controllers and the per-track screen that drives them

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use padlight_core::{BlendingMode, Color, ControllerId, Signal, CLEAR_INDEX};
use tracing::{debug, trace};

use crate::device::lock;

const PAD_COUNT: usize = CLEAR_INDEX as usize;

/// Frames a [`VirtualController`] keeps before dropping the oldest
pub const FRAME_HISTORY: usize = 4096;

/// Output side of a grid controller
pub trait Controller: Send + Sync {
    fn id(&self) -> ControllerId;
    fn name(&self) -> &str;
    fn available(&self) -> bool;
    /// Light `index` with `color`. Sends to an unavailable controller are dropped.
    fn send(&self, index: u8, color: Color);
}

/// One pad update delivered to a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub index: u8,
    pub color: Color,
}

/// In-memory controller that records the most recent frames sent to it
pub struct VirtualController {
    id: ControllerId,
    name: String,
    available: AtomicBool,
    pads: Mutex<Vec<Color>>,
    frames: Mutex<VecDeque<Frame>>,
    subscribers: Mutex<Vec<Sender<Frame>>>,
}

impl VirtualController {
    pub fn new(id: ControllerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            available: AtomicBool::new(true),
            pads: Mutex::new(vec![Color::OFF; PAD_COUNT]),
            frames: Mutex::new(VecDeque::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Live feed of every frame sent from now on.
    pub fn subscribe(&self) -> Receiver<Frame> {
        let (tx, rx) = unbounded();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Color currently shown on `index`.
    pub fn pad(&self, index: u8) -> Color {
        lock(&self.pads).get(index as usize).copied().unwrap_or(Color::OFF)
    }

    /// Recorded frames, oldest first, at most [`FRAME_HISTORY`] of them.
    pub fn frames(&self) -> Vec<Frame> {
        lock(&self.frames).iter().copied().collect()
    }

    /// Take the recorded frames, leaving the history empty.
    pub fn drain_frames(&self) -> Vec<Frame> {
        lock(&self.frames).drain(..).collect()
    }

    pub fn lit_pads(&self) -> Vec<u8> {
        lock(&self.pads)
            .iter()
            .enumerate()
            .filter(|(_, c)| c.lit())
            .map(|(i, _)| i as u8)
            .collect()
    }
}

impl Controller for VirtualController {
    fn id(&self) -> ControllerId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn send(&self, index: u8, color: Color) {
        if !self.available() {
            return;
        }
        if let Some(pad) = lock(&self.pads).get_mut(index as usize) {
            *pad = color;
        }
        let frame = Frame { index, color };
        {
            let mut frames = lock(&self.frames);
            if frames.len() == FRAME_HISTORY {
                frames.pop_front();
            }
            frames.push_back(frame);
        }
        lock(&self.subscribers).retain(|tx| tx.send(frame).is_ok());
    }
}

struct Layer {
    color: Color,
    blending: BlendingMode,
}

struct ScreenState {
    layers: Vec<BTreeMap<i32, Layer>>,
    visible: Vec<Color>,
}

/// Composites the layers a track has lit on each pad.
///
/// Higher layers sit on top. `Normal` hides everything below, `Screen`
/// brightens and `Multiply` darkens the composite beneath, and `Mask`
/// turns the pad off while it is lit.
pub struct Screen {
    state: Mutex<ScreenState>,
}

impl Default for Screen {
    fn default() -> Self {
        Self::new()
    }
}

impl Screen {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScreenState {
                layers: (0..PAD_COUNT).map(|_| BTreeMap::new()).collect(),
                visible: vec![Color::OFF; PAD_COUNT],
            }),
        }
    }

    /// Apply one signal and return the pads whose visible color changed.
    pub fn apply(&self, signal: &Signal) -> Vec<Frame> {
        let mut state = lock(&self.state);
        if signal.is_clear() {
            return reset(&mut state);
        }
        let index = signal.index as usize;
        let Some(layers) = state.layers.get_mut(index) else { return Vec::new() };
        if signal.lit() {
            layers.insert(signal.layer, Layer { color: signal.color, blending: signal.blending });
        } else {
            layers.remove(&signal.layer);
        }
        let color = composite(layers);
        if state.visible[index] == color {
            return Vec::new();
        }
        state.visible[index] = color;
        vec![Frame { index: signal.index, color }]
    }

    /// Drop every layer and return the pads that were lit.
    pub fn clear(&self) -> Vec<Frame> {
        reset(&mut lock(&self.state))
    }

    pub fn visible(&self, index: u8) -> Color {
        lock(&self.state).visible.get(index as usize).copied().unwrap_or(Color::OFF)
    }
}

fn reset(state: &mut ScreenState) -> Vec<Frame> {
    for layers in &mut state.layers {
        layers.clear();
    }
    let frames: Vec<Frame> = state
        .visible
        .iter_mut()
        .enumerate()
        .filter(|(_, c)| c.lit())
        .map(|(i, c)| {
            *c = Color::OFF;
            Frame { index: i as u8, color: Color::OFF }
        })
        .collect();
    trace!(count = frames.len(), "Screen cleared");
    frames
}

fn composite(layers: &BTreeMap<i32, Layer>) -> Color {
    let mut color = Color::OFF;
    for layer in layers.values() {
        color = match layer.blending {
            BlendingMode::Normal => layer.color,
            BlendingMode::Screen => screen(color, layer.color),
            BlendingMode::Multiply => multiply(color, layer.color),
            BlendingMode::Mask => Color::OFF,
        };
    }
    color
}

fn channel(f: impl Fn(f64, f64) -> f64, a: u8, b: u8) -> u8 {
    let max = f64::from(padlight_core::MAX_CHANNEL);
    (f(f64::from(a) / max, f64::from(b) / max) * max).round() as u8
}

fn screen(below: Color, above: Color) -> Color {
    let op = |a: f64, b: f64| 1.0 - (1.0 - a) * (1.0 - b);
    Color::new(
        channel(op, below.red, above.red),
        channel(op, below.green, above.green),
        channel(op, below.blue, above.blue),
    )
}

fn multiply(below: Color, above: Color) -> Color {
    let op = |a: f64, b: f64| a * b;
    Color::new(
        channel(op, below.red, above.red),
        channel(op, below.green, above.green),
        channel(op, below.blue, above.blue),
    )
}

/// Forward screen changes to a controller, if one is attached and online.
pub(crate) fn deliver(controller: Option<&dyn Controller>, frames: Vec<Frame>) {
    let Some(controller) = controller else { return };
    if !controller.available() {
        debug!(controller = controller.name(), "Controller unavailable, frames dropped");
        return;
    }
    for frame in frames {
        controller.send(frame.index, frame.color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_layer_wins() {
        let screen = Screen::new();
        let red = Color::new(63, 0, 0);
        let blue = Color::new(0, 0, 63);
        assert_eq!(screen.apply(&Signal::new(5, red)), vec![Frame { index: 5, color: red }]);
        assert_eq!(screen.apply(&Signal::new(5, blue).with_layer(2)).len(), 1);
        assert_eq!(screen.visible(5), blue);

        // Lighting underneath the top layer changes nothing visible.
        assert!(screen.apply(&Signal::new(5, Color::WHITE)).is_empty());

        let frames = screen.apply(&Signal::new(5, Color::OFF).with_layer(2));
        assert_eq!(frames, vec![Frame { index: 5, color: Color::WHITE }]);
    }

    #[test]
    fn test_clear_resets_lit_pads() {
        let screen = Screen::new();
        screen.apply(&Signal::new(1, Color::WHITE));
        screen.apply(&Signal::new(2, Color::WHITE).with_layer(3));
        let frames = screen.apply(&Signal::clear());
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| !f.color.lit()));
        assert!(screen.apply(&Signal::new(1, Color::OFF)).is_empty());
    }

    #[test]
    fn test_mask_and_multiply() {
        let screen = Screen::new();
        screen.apply(&Signal::new(7, Color::WHITE));
        let mut mask = Signal::new(7, Color::WHITE).with_layer(1);
        mask.blending = BlendingMode::Mask;
        screen.apply(&mask);
        assert_eq!(screen.visible(7), Color::OFF);

        let mut tint = Signal::new(7, Color::new(63, 0, 0)).with_layer(1);
        tint.blending = BlendingMode::Multiply;
        screen.apply(&tint);
        assert_eq!(screen.visible(7), Color::new(63, 0, 0));
    }

    #[test]
    fn test_virtual_controller_records() {
        let controller = VirtualController::new(ControllerId(1), "virtual");
        let rx = controller.subscribe();
        controller.send(3, Color::WHITE);
        assert_eq!(rx.try_recv().unwrap(), Frame { index: 3, color: Color::WHITE });
        assert_eq!(controller.lit_pads(), vec![3]);

        controller.set_available(false);
        deliver(Some(&controller), vec![Frame { index: 4, color: Color::WHITE }]);
        assert_eq!(controller.frames().len(), 1);
    }

    #[test]
    fn test_frame_history_is_bounded() {
        let controller = VirtualController::new(ControllerId(1), "virtual");
        for i in 0..FRAME_HISTORY + 10 {
            controller.send((i % 100) as u8, Color::WHITE);
        }
        let frames = controller.frames();
        assert_eq!(frames.len(), FRAME_HISTORY);
        assert_eq!(frames[0].index, 10);

        assert_eq!(controller.drain_frames().len(), FRAME_HISTORY);
        assert!(controller.frames().is_empty());
        controller.send(1, Color::OFF);
        assert_eq!(controller.drain_frames(), vec![Frame { index: 1, color: Color::OFF }]);
    }
}
