//! Macro devices: Switch writes the shared store, Refresh re-reads it

use std::sync::RwLock;

use padlight_core::params::{RefreshParams, SwitchParams};
use padlight_core::Signal;
use tracing::trace;

use super::{read, DeviceIo, Process};

pub(crate) struct Switch {
    params: RwLock<SwitchParams>,
}

impl Switch {
    pub fn new(params: SwitchParams) -> Self {
        Self { params: RwLock::new(params) }
    }
}

impl Process for Switch {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        if signals.iter().any(|s| s.lit()) {
            let SwitchParams { slot, value } = read(&self.params).clone();
            io.context().macros().set(slot, value);
            trace!(slot, value, "Macro switched");
        }
        io.emit(signals);
    }

    params_accessors!(Switch);
}

pub(crate) struct Refresh {
    params: RwLock<RefreshParams>,
}

impl Refresh {
    pub fn new(params: RefreshParams) -> Self {
        Self { params: RwLock::new(params) }
    }
}

impl Process for Refresh {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let slots = read(&self.params).slots;
        let store = io.context().macros().snapshot();
        let refreshed = signals
            .into_iter()
            .map(|mut s| {
                for (slot, refresh) in slots.iter().enumerate() {
                    if *refresh {
                        s.macros[slot] = store[slot];
                    }
                }
                s
            })
            .collect();
        io.emit(refreshed);
    }

    params_accessors!(Refresh);
}

#[cfg(test)]
mod tests {
    use padlight_core::{Color, DeviceKindParams};

    use crate::device::testing::*;

    use super::*;

    #[test]
    fn test_switch_sets_store_on_press_only() {
        let (context, device, rx) = wired(DeviceKindParams::Switch(SwitchParams { slot: 2, value: 40 }));
        device.enter(vec![Signal::new(1, Color::OFF)]);
        next(&rx);
        assert_eq!(context.macros().get(2), Some(1));
        device.enter(vec![Signal::new(1, Color::WHITE)]);
        next(&rx);
        assert_eq!(context.macros().get(2), Some(40));
    }

    #[test]
    fn test_refresh_retags_selected_slots() {
        let (context, device, rx) =
            wired(DeviceKindParams::Refresh(RefreshParams { slots: [false, true, false, false] }));
        context.macros().set(0, 9);
        context.macros().set(1, 7);
        device.enter(vec![Signal::new(1, Color::WHITE)]);
        assert_eq!(next(&rx)[0].macros, [1, 7, 1, 1]);
    }
}
