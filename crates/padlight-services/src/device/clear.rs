//! Batch-level clear: any lit signal in a batch becomes one clear sentinel

use padlight_core::{DeviceKindParams, Signal};

use super::{DeviceIo, Process};

pub(crate) struct Clear;

impl Process for Clear {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        if signals.iter().any(|s| s.lit()) {
            io.emit_one(Signal::clear());
        }
    }

    fn params(&self) -> DeviceKindParams {
        DeviceKindParams::Clear
    }

    fn set_params(&self, _io: &DeviceIo, params: DeviceKindParams) -> bool {
        matches!(params, DeviceKindParams::Clear)
    }
}
