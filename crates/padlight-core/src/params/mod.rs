//! Serializable device, chain, track and project parameters
//!
//! Everything here is plain data: it is what gets cloned onto the
//! clipboard, stored in undo entries and written to project files. Live
//! devices are built from these in `padlight-services`.

mod copy;
mod fade;

pub use copy::{CopyMode, CopyParams, MAX_ANGLE, MAX_PINCH};
pub use fade::{ColorStop, FadeKind, FadeParams, FadePlayback, RampStep};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::grid::{FlipMode, GridMode, Offset, RotateMode};
use crate::macros::{MAX_MACRO, MIN_MACRO};
use crate::signal::{BlendingMode, CLEAR_INDEX, MACRO_COUNT};
use crate::time::{Gate, MAX_BPM, MIN_BPM, TimeValue};

pub const MAX_LOOP_REPEATS: u32 = 128;
pub const MAX_CHOKE_TARGET: u8 = 16;

/// Set of pad indices (0..=100)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PadSet(BTreeSet<u8>);

impl PadSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, index: u8) -> bool {
        self.0.contains(&index)
    }

    pub fn insert(&mut self, index: u8) {
        if index <= CLEAR_INDEX {
            self.0.insert(index);
        }
    }

    pub fn remove(&mut self, index: u8) {
        self.0.remove(&index);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<u8> for PadSet {
    fn from_iter<T: IntoIterator<Item = u8>>(iter: T) -> Self {
        let mut set = PadSet::new();
        for index in iter {
            set.insert(index);
        }
        set
    }
}

// ============================================================================
// Time-based devices
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DelayParams {
    pub time: TimeValue,
    pub gate: Gate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HoldMode {
    /// Release a fixed time after the press
    #[default]
    Trigger,
    /// Release at the later of the pad release and the fixed time
    Minimum,
    /// Never release
    Infinite,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HoldParams {
    pub time: TimeValue,
    pub gate: Gate,
    pub mode: HoldMode,
    /// Trigger on the pad release instead of the press
    pub release: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopParams {
    pub rate: TimeValue,
    pub gate: Gate,
    /// Repeat count when not holding, 1..=128
    pub repeats: u32,
    /// Repeat for as long as the pad is held
    pub hold: bool,
}

impl Default for LoopParams {
    fn default() -> Self {
        Self { rate: TimeValue::Free(250), gate: Gate::default(), repeats: 2, hold: false }
    }
}

// ============================================================================
// Branching devices
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupParams {
    pub chains: Vec<ChainParams>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MultiMode {
    #[default]
    Forward,
    Backward,
    Random,
    /// Random, never repeating the previous pick
    RandomPlus,
    /// Every branch whose filter holds the pad
    Key,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiParams {
    pub mode: MultiMode,
    pub preprocess: ChainParams,
    pub chains: Vec<ChainParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChokeParams {
    /// Choke group, 1..=16
    pub target: u8,
    pub chain: ChainParams,
}

impl Default for ChokeParams {
    fn default() -> Self {
        Self { target: 1, chain: ChainParams::default() }
    }
}

// ============================================================================
// Filters and transforms
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyFilterParams {
    pub pads: PadSet,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayerFilterParams {
    pub target: i32,
    pub range: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroFilterParams {
    /// Macro slot, 0..=3
    pub slot: usize,
    pub values: BTreeSet<u8>,
}

impl Default for MacroFilterParams {
    fn default() -> Self {
        Self { slot: 0, values: BTreeSet::from([MIN_MACRO]) }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlipParams {
    pub mode: FlipMode,
    /// Also pass the unflipped signal
    pub bypass: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RotateParams {
    pub mode: RotateMode,
    pub bypass: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveParams {
    pub offset: Offset,
    pub grid: GridMode,
    pub wrap: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaintParams {
    pub color: Color,
}

impl Default for PaintParams {
    fn default() -> Self {
        Self { color: Color::WHITE }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerParams {
    pub target: i32,
    pub blending: BlendingMode,
    pub range: i32,
}

impl Default for LayerParams {
    fn default() -> Self {
        Self { target: 0, blending: BlendingMode::Normal, range: 200 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchParams {
    pub slot: usize,
    pub value: u8,
}

impl Default for SwitchParams {
    fn default() -> Self {
        Self { slot: 0, value: MIN_MACRO }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RefreshParams {
    pub slots: [bool; MACRO_COUNT],
}

// ============================================================================
// Device, chain, track, project
// ============================================================================

/// Parameters of one device kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeviceKindParams {
    Group(GroupParams),
    Multi(MultiParams),
    Choke(ChokeParams),
    Delay(DelayParams),
    Hold(HoldParams),
    Fade(FadeParams),
    Loop(LoopParams),
    Copy(CopyParams),
    KeyFilter(KeyFilterParams),
    LayerFilter(LayerFilterParams),
    MacroFilter(MacroFilterParams),
    Flip(FlipParams),
    Rotate(RotateParams),
    Move(MoveParams),
    Paint(PaintParams),
    Layer(LayerParams),
    Switch(SwitchParams),
    Refresh(RefreshParams),
    Clear,
}

impl DeviceKindParams {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Group(_) => "Group",
            Self::Multi(_) => "Multi",
            Self::Choke(_) => "Choke",
            Self::Delay(_) => "Delay",
            Self::Hold(_) => "Hold",
            Self::Fade(_) => "Fade",
            Self::Loop(_) => "Loop",
            Self::Copy(_) => "Copy",
            Self::KeyFilter(_) => "Key Filter",
            Self::LayerFilter(_) => "Layer Filter",
            Self::MacroFilter(_) => "Macro Filter",
            Self::Flip(_) => "Flip",
            Self::Rotate(_) => "Rotate",
            Self::Move(_) => "Move",
            Self::Paint(_) => "Paint",
            Self::Layer(_) => "Layer",
            Self::Switch(_) => "Switch",
            Self::Refresh(_) => "Refresh",
            Self::Clear => "Clear",
        }
    }

    /// Clamp every field into its valid range, recursing into sub-chains.
    pub fn sanitize(&mut self) {
        match self {
            Self::Group(p) => p.chains.iter_mut().for_each(ChainParams::sanitize),
            Self::Multi(p) => {
                p.preprocess.sanitize();
                p.chains.iter_mut().for_each(ChainParams::sanitize);
            }
            Self::Choke(p) => {
                p.target = p.target.clamp(1, MAX_CHOKE_TARGET);
                p.chain.sanitize();
            }
            Self::Delay(p) => {
                p.time = sanitize_time(p.time);
                p.gate = Gate::new(p.gate.value());
            }
            Self::Hold(p) => {
                p.time = sanitize_time(p.time);
                p.gate = Gate::new(p.gate.value());
            }
            Self::Fade(p) => p.sanitize(),
            Self::Loop(p) => {
                p.rate = sanitize_time(p.rate);
                p.gate = Gate::new(p.gate.value());
                p.repeats = p.repeats.clamp(1, MAX_LOOP_REPEATS);
            }
            Self::Copy(p) => p.sanitize(),
            Self::MacroFilter(p) => {
                p.slot = p.slot.min(MACRO_COUNT - 1);
                p.values.retain(|v| (MIN_MACRO..=MAX_MACRO).contains(v));
            }
            Self::LayerFilter(p) => p.range = p.range.max(0),
            Self::Layer(p) => p.range = p.range.max(0),
            Self::Paint(p) => p.color = Color::new(p.color.red, p.color.green, p.color.blue),
            Self::Switch(p) => {
                p.slot = p.slot.min(MACRO_COUNT - 1);
                p.value = p.value.clamp(MIN_MACRO, MAX_MACRO);
            }
            Self::Move(p) => p.offset = p.offset.clamped(),
            Self::KeyFilter(_)
            | Self::Flip(_)
            | Self::Rotate(_)
            | Self::Refresh(_)
            | Self::Clear => {}
        }
    }
}

fn sanitize_time(time: TimeValue) -> TimeValue {
    match time {
        TimeValue::Free(ms) => TimeValue::free(ms),
        steps => steps,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceParams {
    pub enabled: bool,
    /// Presentation only, carried through clones and undo
    pub collapsed: bool,
    pub kind: DeviceKindParams,
}

impl DeviceParams {
    pub fn new(kind: DeviceKindParams) -> Self {
        let mut params = Self { enabled: true, collapsed: false, kind };
        params.kind.sanitize();
        params
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

impl From<DeviceKindParams> for DeviceParams {
    fn from(kind: DeviceKindParams) -> Self {
        Self::new(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainParams {
    pub name: String,
    pub enabled: bool,
    /// Pads routed to this chain by a Key-mode Multi or a filtered Group
    pub filter: PadSet,
    pub devices: Vec<DeviceParams>,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self { name: "Chain".to_string(), enabled: true, filter: PadSet::new(), devices: Vec::new() }
    }
}

impl ChainParams {
    pub fn with_devices(devices: Vec<DeviceParams>) -> Self {
        Self { devices, ..Self::default() }
    }

    pub fn sanitize(&mut self) {
        for device in &mut self.devices {
            device.kind.sanitize();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackParams {
    pub name: String,
    pub chain: ChainParams,
}

impl Default for TrackParams {
    fn default() -> Self {
        Self { name: "Track".to_string(), chain: ChainParams::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectParams {
    pub bpm: u32,
    pub macros: [u8; MACRO_COUNT],
    pub tracks: Vec<TrackParams>,
}

impl Default for ProjectParams {
    fn default() -> Self {
        Self { bpm: 150, macros: [MIN_MACRO; MACRO_COUNT], tracks: Vec::new() }
    }
}

impl ProjectParams {
    pub fn sanitize(&mut self) {
        self.bpm = self.bpm.clamp(MIN_BPM, MAX_BPM);
        for m in &mut self.macros {
            *m = (*m).clamp(MIN_MACRO, MAX_MACRO);
        }
        for track in &mut self.tracks {
            track.chain.sanitize();
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        let mut params: Self = serde_json::from_str(json)?;
        params.sanitize();
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::StepLength;

    #[test]
    fn test_device_params_sanitized_on_construction() {
        let params = DeviceParams::new(DeviceKindParams::Loop(LoopParams {
            rate: TimeValue::Free(0),
            gate: Gate::new(1.0),
            repeats: 1000,
            hold: false,
        }));
        let DeviceKindParams::Loop(p) = params.kind else { panic!("expected loop") };
        assert_eq!(p.repeats, MAX_LOOP_REPEATS);
        assert_eq!(p.rate, TimeValue::free(1));
    }

    #[test]
    fn test_project_json_preserves_tree() {
        let mut fade = FadeParams::default();
        fade.time = TimeValue::Steps(StepLength::Eighth);
        let inner = ChainParams::with_devices(vec![DeviceKindParams::Fade(fade).into()]);
        let project = ProjectParams {
            tracks: vec![TrackParams {
                name: "Main".to_string(),
                chain: ChainParams::with_devices(vec![
                    DeviceKindParams::Group(GroupParams { chains: vec![inner] }).into(),
                    DeviceKindParams::Clear.into(),
                ]),
            }],
            ..ProjectParams::default()
        };
        let json = project.to_json().unwrap();
        assert!(json.contains("\"type\": \"Group\""));
        assert_eq!(ProjectParams::from_json(&json).unwrap(), project);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(ProjectParams::from_json("{\"bpm\": ").is_err());
    }

    #[test]
    fn test_pad_set_rejects_out_of_range() {
        let set: PadSet = [11, 12, 200].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(12));
        assert!(!set.contains(200));
    }
}
