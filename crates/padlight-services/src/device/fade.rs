//! Fade: play a quantized color ramp for each press

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use padlight_core::params::{FadeParams, FadePlayback, RampStep};
use padlight_core::{DeviceKindParams, Signal, SignalKey};
use tracing::trace;

use crate::courier::TaskHandle;

use super::{lock, read, write, DeviceIo, Outbox, Process, Timeline};

struct Ramp {
    token: u64,
    handles: Vec<TaskHandle>,
    cycle: Option<TaskHandle>,
}

#[derive(Default)]
struct FadeState {
    ramps: HashMap<SignalKey, Ramp>,
    next_token: u64,
}

/// Ties scheduled steps to the press that created them
#[derive(Clone)]
struct Owner {
    state: Arc<Mutex<FadeState>>,
    key: SignalKey,
    token: u64,
}

impl Owner {
    fn is_current(&self, state: &FadeState) -> bool {
        state.ramps.get(&self.key).is_some_and(|r| r.token == self.token)
    }

    /// Hand freshly armed handles to the ramp, or cancel them when the press
    /// was superseded while they were being scheduled.
    fn adopt(&self, io: &DeviceIo, steps: Vec<TaskHandle>, cycle: Vec<TaskHandle>) {
        let mut state = lock(&self.state);
        match state.ramps.get_mut(&self.key).filter(|r| r.token == self.token) {
            Some(ramp) => {
                ramp.handles = steps;
                if !cycle.is_empty() {
                    ramp.cycle = cycle.into_iter().next();
                }
            }
            None => io.cancel_all(steps.into_iter().chain(cycle)),
        }
    }
}

/// Ramp steps and restart cycle of one Mono or Loop press
struct Plan {
    owner: Owner,
    steps: Timeline,
    cycle: Timeline,
}

pub(crate) struct Fade {
    params: RwLock<FadeParams>,
    ramp: RwLock<Arc<Vec<RampStep>>>,
    state: Arc<Mutex<FadeState>>,
}

impl Fade {
    pub fn new(params: FadeParams) -> Self {
        let ramp = Arc::new(params.ramp());
        Self { params: RwLock::new(params), ramp: RwLock::new(ramp), state: Arc::default() }
    }
}

/// Queue the first ramp color and plan every later step against the same
/// base time. With an owner, steps re-check that their press is still
/// current before emitting; the last step of a one-shot ramp retires it.
#[allow(clippy::too_many_arguments)]
fn play(
    io: &DeviceIo,
    out: &mut Outbox,
    timeline: &mut Timeline,
    signal: &Signal,
    ramp: &Arc<Vec<RampStep>>,
    total: Duration,
    owner: Option<Owner>,
    retire: bool,
) {
    let Some(first) = ramp.first() else { return };
    out.push_one(signal.with_color(first.color));

    let last = ramp.len() - 1;
    for (i, step) in ramp.iter().enumerate().skip(1) {
        let sink = io.clone();
        let emitted = signal.with_color(step.color);
        let owner = owner.clone();
        timeline.at(total.mul_f64(step.position), move || {
            if let Some(owner) = &owner {
                let mut state = lock(&owner.state);
                if !owner.is_current(&state) {
                    return;
                }
                if retire && i == last {
                    state.ramps.remove(&owner.key);
                }
            }
            sink.emit_one(emitted.clone());
        });
    }
}

impl Process for Fade {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let (playback, total) = {
            let params = read(&self.params);
            (params.playback, io.duration(params.time, params.gate))
        };
        let ramp = read(&self.ramp).clone();
        let mut out = Outbox::default();
        let mut overlapping = Timeline::default();
        let mut plans = Vec::new();

        {
            let mut state = lock(&self.state);
            for signal in signals {
                if signal.is_clear() {
                    out.push_one(signal);
                    continue;
                }
                let key = signal.key();
                match (playback, signal.lit()) {
                    (FadePlayback::Poly, true) => {
                        play(io, &mut out, &mut overlapping, &signal, &ramp, total, None, false);
                    }
                    (FadePlayback::Mono | FadePlayback::Poly, false) => {}
                    (FadePlayback::Loop, false) => {
                        if let Some(previous) = state.ramps.remove(&key) {
                            io.cancel_all(previous.handles.into_iter().chain(previous.cycle));
                            out.push_one(signal.off());
                        }
                    }
                    (FadePlayback::Mono | FadePlayback::Loop, true) => {
                        if let Some(previous) = state.ramps.remove(&key) {
                            io.cancel_all(previous.handles.into_iter().chain(previous.cycle));
                        }
                        state.next_token += 1;
                        let owner = Owner { state: self.state.clone(), key: key.clone(), token: state.next_token };
                        let looping = playback == FadePlayback::Loop;
                        let mut plan = Plan { owner: owner.clone(), steps: Timeline::default(), cycle: Timeline::default() };
                        play(io, &mut out, &mut plan.steps, &signal, &ramp, total, Some(owner.clone()), !looping);
                        if looping {
                            restart_every(io, &mut plan.cycle, &signal, &ramp, total, owner.clone());
                        }
                        trace!(index = signal.index, steps = ramp.len(), "Fade started");
                        state.ramps.insert(key, Ramp { token: owner.token, handles: Vec::new(), cycle: None });
                        plans.push(plan);
                    }
                }
            }
        }

        out.send(io);
        overlapping.arm(io);
        for plan in plans {
            let steps = plan.steps.arm(io);
            let cycle = plan.cycle.arm(io);
            plan.owner.adopt(io, steps, cycle);
        }
    }

    fn params(&self) -> DeviceKindParams {
        DeviceKindParams::Fade(read(&self.params).clone())
    }

    fn set_params(&self, _io: &DeviceIo, params: DeviceKindParams) -> bool {
        let DeviceKindParams::Fade(params) = params else { return false };
        *write(&self.ramp) = Arc::new(params.ramp());
        *write(&self.params) = params;
        true
    }
}

/// Loop playback: replay the whole ramp every `total` while the key is held.
fn restart_every(
    io: &DeviceIo,
    cycle: &mut Timeline,
    signal: &Signal,
    ramp: &Arc<Vec<RampStep>>,
    total: Duration,
    owner: Owner,
) {
    let sink = io.clone();
    let signal = signal.clone();
    let ramp = ramp.clone();
    cycle.every(total, move || {
        if !owner.is_current(&lock(&owner.state)) {
            return;
        }
        let mut out = Outbox::default();
        let mut steps = Timeline::default();
        play(&sink, &mut out, &mut steps, &signal, &ramp, total, Some(owner.clone()), false);
        out.send(&sink);
        let handles = steps.arm(&sink);
        owner.adopt(&sink, handles, Vec::new());
    });
}
