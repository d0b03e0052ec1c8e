//! padlight-core: Domain types for the padlight light-show engine

mod color;
mod error;
pub mod grid;
mod macros;
pub mod params;
mod path;
mod signal;
pub mod time;

pub use color::{Color, MAX_CHANNEL};
pub use error::{PadlightError, Result};
pub use grid::{FlipMode, GridMode, Offset, RotateMode};
pub use macros::{MacroStore, MAX_MACRO, MIN_MACRO};
pub use params::{
    ChainParams, DeviceKindParams, DeviceParams, PadSet, ProjectParams, TrackParams,
};
pub use path::{Path, PREPROCESS};
pub use signal::{
    BlendingMode, ControllerId, Signal, SignalKey, CLEAR_INDEX, MACRO_COUNT, MAX_PAD,
};
pub use time::{Gate, StepLength, TimeValue};
