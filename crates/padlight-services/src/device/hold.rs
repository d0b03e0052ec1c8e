//! Hold: sustain a press for a fixed time regardless of the pad release

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use padlight_core::params::{HoldMode, HoldParams};
use padlight_core::{Color, Signal, SignalKey};

use crate::courier::TaskHandle;

use super::{lock, read, DeviceIo, Outbox, Process, Timeline};

/// A Minimum-mode press waiting for both its deadline and its release
struct Sustain {
    token: u64,
    handle: Option<TaskHandle>,
    signal: Signal,
    released: bool,
    expired: bool,
}

#[derive(Default)]
struct HoldState {
    /// Press colors waiting for their release to trigger
    armed: HashMap<SignalKey, Color>,
    sustained: HashMap<SignalKey, Sustain>,
    next_token: u64,
}

pub(crate) struct Hold {
    params: RwLock<HoldParams>,
    state: Arc<Mutex<HoldState>>,
}

impl Hold {
    pub fn new(params: HoldParams) -> Self {
        Self { params: RwLock::new(params), state: Arc::default() }
    }

    fn trigger(
        &self,
        io: &DeviceIo,
        out: &mut Outbox,
        timeline: &mut Timeline,
        state: &mut HoldState,
        params: &HoldParams,
        signal: Signal,
    ) {
        let duration = io.duration(params.time, params.gate);
        out.push_one(signal.clone());
        match params.mode {
            HoldMode::Infinite => {}
            HoldMode::Minimum if !params.release => {
                let key = signal.key();
                if let Some(previous) = state.sustained.remove(&key) {
                    io.cancel_all(previous.handle);
                }
                state.next_token += 1;
                let token = state.next_token;
                let (sink, shared, watched) = (io.clone(), self.state.clone(), key.clone());
                let handle = io.schedule(duration, move || {
                    let off = {
                        let mut state = lock(&shared);
                        let Some(sustain) = state.sustained.get_mut(&watched) else { return };
                        if sustain.token != token {
                            return;
                        }
                        if !sustain.released {
                            sustain.expired = true;
                            return;
                        }
                        let off = sustain.signal.off();
                        state.sustained.remove(&watched);
                        off
                    };
                    sink.emit_one(off);
                });
                state.sustained.insert(key, Sustain { token, handle, signal, released: false, expired: false });
            }
            HoldMode::Trigger | HoldMode::Minimum => {
                let sink = io.clone();
                let off = signal.off();
                timeline.at(duration, move || sink.emit_one(off.clone()));
            }
        }
    }

    fn release(&self, out: &mut Outbox, state: &mut HoldState, signal: &Signal) {
        let key = signal.key();
        let Some(sustain) = state.sustained.get_mut(&key) else { return };
        if sustain.expired {
            let off = sustain.signal.off();
            state.sustained.remove(&key);
            out.push_one(off);
        } else {
            sustain.released = true;
        }
    }
}

impl Process for Hold {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let params = read(&self.params).clone();
        let mut out = Outbox::default();
        let mut timeline = Timeline::default();
        {
            let mut state = lock(&self.state);
            for signal in signals {
                if signal.is_clear() {
                    out.push_one(signal);
                    continue;
                }
                if params.release {
                    if signal.lit() {
                        state.armed.insert(signal.key(), signal.color);
                    } else if let Some(color) = state.armed.remove(&signal.key()) {
                        self.trigger(io, &mut out, &mut timeline, &mut state, &params, signal.with_color(color));
                    }
                } else if signal.lit() {
                    self.trigger(io, &mut out, &mut timeline, &mut state, &params, signal);
                } else if params.mode == HoldMode::Minimum {
                    self.release(&mut out, &mut state, &signal);
                }
            }
        }
        out.send(io);
        timeline.arm(io);
    }

    params_accessors!(Hold);
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use padlight_core::{DeviceKindParams, TimeValue};

    use crate::device::testing::*;

    use super::*;

    fn hold(mode: HoldMode, release: bool) -> DeviceKindParams {
        DeviceKindParams::Hold(HoldParams { time: TimeValue::free(50), mode, release, ..Default::default() })
    }

    #[test]
    fn test_trigger_pairs_press_with_timed_off() {
        let (_context, device, rx) = wired(hold(HoldMode::Trigger, false));
        let start = Instant::now();
        device.enter(vec![Signal::new(7, Color::WHITE)]);
        device.enter(vec![Signal::new(7, Color::OFF)]);
        assert!(next(&rx)[0].lit());
        let off = next(&rx);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(off[0].index, 7);
        assert!(!off[0].lit());
        assert!(quiet(&rx, Duration::from_millis(80)));
    }

    #[test]
    fn test_minimum_waits_for_release() {
        let (_context, device, rx) = wired(hold(HoldMode::Minimum, false));
        device.enter(vec![Signal::new(7, Color::WHITE)]);
        assert!(next(&rx)[0].lit());
        assert!(quiet(&rx, Duration::from_millis(90)));
        device.enter(vec![Signal::new(7, Color::OFF)]);
        assert!(!next(&rx)[0].lit());
    }

    #[test]
    fn test_minimum_early_release_waits_for_deadline() {
        let (_context, device, rx) = wired(hold(HoldMode::Minimum, false));
        let start = Instant::now();
        device.enter(vec![Signal::new(7, Color::WHITE)]);
        device.enter(vec![Signal::new(7, Color::OFF)]);
        next(&rx);
        assert!(!next(&rx)[0].lit());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_infinite_never_releases() {
        let (_context, device, rx) = wired(hold(HoldMode::Infinite, false));
        device.enter(vec![Signal::new(7, Color::WHITE)]);
        device.enter(vec![Signal::new(7, Color::OFF)]);
        assert!(next(&rx)[0].lit());
        assert!(quiet(&rx, Duration::from_millis(100)));
    }

    #[test]
    fn test_release_mode_fires_on_release_with_press_color() {
        let red = Color::new(63, 0, 0);
        let (_context, device, rx) = wired(hold(HoldMode::Trigger, true));
        device.enter(vec![Signal::new(7, red)]);
        assert!(quiet(&rx, Duration::from_millis(20)));
        device.enter(vec![Signal::new(7, Color::OFF)]);
        assert_eq!(next(&rx)[0].color, red);
        assert!(!next(&rx)[0].lit());
    }
}
