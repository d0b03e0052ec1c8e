//! Delay: re-emit each batch after a fixed time

use std::sync::RwLock;

use padlight_core::params::DelayParams;
use padlight_core::Signal;
use tracing::trace;

use super::{read, DeviceIo, Process};

pub(crate) struct Delay {
    params: RwLock<DelayParams>,
}

impl Delay {
    pub fn new(params: DelayParams) -> Self {
        Self { params: RwLock::new(params) }
    }
}

impl Process for Delay {
    /// Every batch gets its own task; later input never cancels earlier
    /// echoes, only disposal does.
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let delay = {
            let params = read(&self.params);
            io.duration(params.time, params.gate)
        };
        trace!(?delay, count = signals.len(), "Delaying batch");
        let out = io.clone();
        let mut batch = Some(signals);
        io.schedule(delay, move || {
            if let Some(signals) = batch.take() {
                out.emit(signals);
            }
        });
    }

    params_accessors!(Delay);
}
