//! Pad events flowing through the device graph

use serde::{Deserialize, Serialize};

use crate::color::Color;

/// Pad index reserved for "clear every pad".
pub const CLEAR_INDEX: u8 = 100;

/// Highest playable pad index.
pub const MAX_PAD: u8 = 99;

/// Number of macro slots carried by every signal.
pub const MACRO_COUNT: usize = 4;

/// Identifies a controller (physical or virtual) attached to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControllerId(pub u32);

/// How a layer combines with the layers below it on a screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendingMode {
    #[default]
    Normal,
    Screen,
    Multiply,
    Mask,
}

/// One pad press or release with its color payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub index: u8,
    pub color: Color,
    pub layer: i32,
    pub blending: BlendingMode,
    pub blending_range: i32,
    pub source: Option<ControllerId>,
    pub target: Option<ControllerId>,
    pub macros: [u8; MACRO_COUNT],
    /// Branch indices pushed by fan-out devices, popped when the branch exits.
    pub multi_target: Vec<usize>,
}

/// Identity of a signal with its color stripped.
///
/// Press and release of the same pad share a key, which is how per-key
/// state machines (Copy, Hold, Fade, Multi) correlate them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub index: u8,
    pub layer: i32,
    pub source: Option<ControllerId>,
    pub target: Option<ControllerId>,
    pub multi_target: Vec<usize>,
}

impl Signal {
    pub fn new(index: u8, color: Color) -> Self {
        Self {
            index: index.min(CLEAR_INDEX),
            color,
            layer: 0,
            blending: BlendingMode::Normal,
            blending_range: 200,
            source: None,
            target: None,
            macros: [1; MACRO_COUNT],
            multi_target: Vec::new(),
        }
    }

    /// The "clear every pad" sentinel.
    pub fn clear() -> Self {
        Self::new(CLEAR_INDEX, Color::OFF)
    }

    pub fn with_source(mut self, source: ControllerId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_color(&self, color: Color) -> Self {
        Self { color, ..self.clone() }
    }

    pub fn with_index(&self, index: u8) -> Self {
        Self { index, ..self.clone() }
    }

    /// Unlit copy of this signal.
    pub fn off(&self) -> Self {
        self.with_color(Color::OFF)
    }

    pub fn lit(&self) -> bool {
        self.color.lit()
    }

    pub fn is_clear(&self) -> bool {
        self.index == CLEAR_INDEX
    }

    pub fn key(&self) -> SignalKey {
        SignalKey {
            index: self.index,
            layer: self.layer,
            source: self.source,
            target: self.target,
            multi_target: self.multi_target.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_key_ignores_color() {
        let press = Signal::new(33, Color::WHITE).with_source(ControllerId(1));
        let release = press.off();
        assert_eq!(press.key(), release.key());
        assert_ne!(press, release);

        let mut state = HashMap::new();
        state.insert(press.key(), "pressed");
        assert_eq!(state.remove(&release.key()), Some("pressed"));
    }

    #[test]
    fn test_key_distinguishes_branch_and_source() {
        let a = Signal::new(33, Color::WHITE).with_source(ControllerId(1));
        let b = a.clone().with_source(ControllerId(2));
        assert_ne!(a.key(), b.key());

        let mut c = a.clone();
        c.multi_target.push(1);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_index_clamped_to_clear() {
        assert!(Signal::new(250, Color::OFF).is_clear());
        assert!(Signal::clear().is_clear());
    }
}
