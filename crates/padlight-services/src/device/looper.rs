//! Loop: repeat input a fixed number of times, or for as long as it is held

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use padlight_core::params::LoopParams;
use padlight_core::{Signal, SignalKey};
use tracing::trace;

use crate::courier::TaskHandle;

use super::{lock, read, DeviceIo, Process, Timeline};

struct Held {
    token: u64,
    handle: Option<TaskHandle>,
    releasing: bool,
}

#[derive(Default)]
struct LoopState {
    held: HashMap<SignalKey, Held>,
    next_token: u64,
}

pub(crate) struct Looper {
    params: RwLock<LoopParams>,
    state: Arc<Mutex<LoopState>>,
}

impl Looper {
    pub fn new(params: LoopParams) -> Self {
        Self { params: RwLock::new(params), state: Arc::default() }
    }

    fn count(&self, io: &DeviceIo, params: &LoopParams, signals: Vec<Signal>) {
        let interval = io.duration(params.rate, params.gate);
        io.emit(signals.clone());
        for repeat in 1..=params.repeats {
            let sink = io.clone();
            let batch = signals.clone();
            io.schedule(interval * repeat, move || sink.emit(batch.clone()));
        }
    }

    fn hold(&self, io: &DeviceIo, params: &LoopParams, signals: Vec<Signal>) {
        let interval = io.duration(params.rate, params.gate);
        let mut plans = Vec::new();
        let passed = {
            let mut state = lock(&self.state);
            let mut passed = Vec::new();
            for signal in signals {
                let key = signal.key();
                if signal.is_clear() {
                    passed.push(signal);
                } else if signal.lit() {
                    if let Some(previous) = state.held.remove(&key) {
                        io.cancel_all(previous.handle);
                    }
                    state.next_token += 1;
                    let token = state.next_token;
                    let (sink, shared, watched) = (io.clone(), self.state.clone(), key.clone());
                    let lit = signal.clone();
                    let mut ticks = Timeline::default();
                    ticks.every(interval, move || {
                        let tick = {
                            let mut state = lock(&shared);
                            let Some(held) = state.held.get(&watched).filter(|h| h.token == token) else { return };
                            if held.releasing {
                                let handle = held.handle;
                                state.held.remove(&watched);
                                sink.cancel_all(handle);
                                lit.off()
                            } else {
                                lit.clone()
                            }
                        };
                        sink.emit_one(tick);
                    });
                    state.held.insert(key.clone(), Held { token, handle: None, releasing: false });
                    plans.push((key, token, ticks));
                    passed.push(signal);
                } else if let Some(held) = state.held.get_mut(&key) {
                    trace!(index = signal.index, "Loop release deferred to next tick");
                    held.releasing = true;
                } else {
                    passed.push(signal);
                }
            }
            passed
        };
        io.emit(passed);

        for (key, token, ticks) in plans {
            let handle = ticks.arm(io).into_iter().next();
            let mut state = lock(&self.state);
            match state.held.get_mut(&key).filter(|h| h.token == token) {
                Some(held) => held.handle = handle,
                None => io.cancel_all(handle),
            }
        }
    }
}

impl Process for Looper {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let params = read(&self.params).clone();
        if params.hold {
            self.hold(io, &params, signals);
        } else {
            self.count(io, &params, signals);
        }
    }

    params_accessors!(Loop);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use padlight_core::{Color, DeviceKindParams, TimeValue};

    use crate::device::testing::*;

    use super::*;

    #[test]
    fn test_count_mode_repeats_every_event() {
        let (_context, device, rx) = wired(DeviceKindParams::Loop(LoopParams {
            rate: TimeValue::free(20),
            repeats: 3,
            ..Default::default()
        }));
        device.enter(vec![Signal::new(4, Color::WHITE)]);
        device.enter(vec![Signal::new(4, Color::OFF)]);
        let lit: Vec<bool> = (0..8).map(|_| next(&rx)[0].lit()).collect();
        assert_eq!(lit.iter().filter(|l| **l).count(), 4);
        assert!(quiet(&rx, Duration::from_millis(60)));
    }

    #[test]
    fn test_hold_mode_repeats_until_release_tick() {
        let (_context, device, rx) = wired(DeviceKindParams::Loop(LoopParams {
            rate: TimeValue::free(20),
            hold: true,
            ..Default::default()
        }));
        device.enter(vec![Signal::new(4, Color::WHITE)]);
        for _ in 0..4 {
            assert!(next(&rx)[0].lit());
        }
        device.enter(vec![Signal::new(4, Color::OFF)]);
        let mut last = next(&rx);
        while let Ok(batch) = rx.recv_timeout(Duration::from_millis(60)) {
            last = batch;
        }
        assert!(!last[0].lit());
        assert_eq!(device.pending_tasks(), 0);
    }

    #[test]
    fn test_hold_mode_passes_unheld_release() {
        let (_context, device, rx) = wired(DeviceKindParams::Loop(LoopParams { hold: true, ..Default::default() }));
        device.enter(vec![Signal::new(4, Color::OFF)]);
        assert!(!next(&rx)[0].lit());
    }
}
