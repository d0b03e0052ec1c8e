//! Signal filters: pass or drop, never modify

use std::sync::RwLock;

use padlight_core::params::{KeyFilterParams, LayerFilterParams, MacroFilterParams};
use padlight_core::Signal;

use super::{read, DeviceIo, Process};

pub(crate) struct KeyFilter {
    params: RwLock<KeyFilterParams>,
}

impl KeyFilter {
    pub fn new(params: KeyFilterParams) -> Self {
        Self { params: RwLock::new(params) }
    }
}

impl Process for KeyFilter {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let passed: Vec<Signal> = {
            let params = read(&self.params);
            signals.into_iter().filter(|s| params.pads.contains(s.index)).collect()
        };
        io.emit(passed);
    }

    params_accessors!(KeyFilter);
}

pub(crate) struct LayerFilter {
    params: RwLock<LayerFilterParams>,
}

impl LayerFilter {
    pub fn new(params: LayerFilterParams) -> Self {
        Self { params: RwLock::new(params) }
    }
}

impl Process for LayerFilter {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let passed: Vec<Signal> = {
            let params = read(&self.params);
            signals
                .into_iter()
                .filter(|s| s.is_clear() || (s.layer - params.target).abs() <= params.range)
                .collect()
        };
        io.emit(passed);
    }

    params_accessors!(LayerFilter);
}

pub(crate) struct MacroFilter {
    params: RwLock<MacroFilterParams>,
}

impl MacroFilter {
    pub fn new(params: MacroFilterParams) -> Self {
        Self { params: RwLock::new(params) }
    }
}

impl Process for MacroFilter {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let passed: Vec<Signal> = {
            let params = read(&self.params);
            signals
                .into_iter()
                .filter(|s| {
                    s.is_clear() || s.macros.get(params.slot).is_some_and(|v| params.values.contains(v))
                })
                .collect()
        };
        io.emit(passed);
    }

    params_accessors!(MacroFilter);
}
