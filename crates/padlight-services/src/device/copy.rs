//! Copy: replicate a press onto offset pads, statically or as a moving light
//!
//! Every press owns one entry keyed by its [`SignalKey`]. The entry records
//! the pads the press currently has lit and every task it scheduled, so a
//! release (or a newer press of the same key) unwinds exactly what that
//! press created.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use padlight_core::params::{CopyMode, CopyParams};
use padlight_core::{Signal, SignalKey};
use tracing::trace;

use crate::courier::TaskHandle;

use super::{lock, read, DeviceIo, Outbox, Process, Timeline};

struct Press {
    token: u64,
    signal: Signal,
    lit: Vec<u8>,
    handles: Vec<TaskHandle>,
    /// Sweep step length and when the last pad lights
    sweep: Option<(Duration, Instant)>,
    /// Infinite sweeps: the final off is withheld until release
    final_step: Option<u8>,
}

#[derive(Default)]
struct CopyState {
    presses: HashMap<SignalKey, Press>,
    next_token: u64,
}

type Shared = Arc<Mutex<CopyState>>;

/// Steps of one press, armed after its first batch went out
struct Plan {
    key: SignalKey,
    token: u64,
    timeline: Timeline,
}

pub(crate) struct Copier {
    params: RwLock<CopyParams>,
    state: Shared,
}

impl Copier {
    pub fn new(params: CopyParams) -> Self {
        Self { params: RwLock::new(params), state: Arc::default() }
    }

    fn press(
        &self,
        io: &DeviceIo,
        out: &mut Outbox,
        plans: &mut Vec<Plan>,
        state: &mut CopyState,
        params: &CopyParams,
        signal: Signal,
    ) {
        let key = signal.key();
        if let Some(previous) = state.presses.remove(&key) {
            unwind(io, out, previous);
        }
        state.next_token += 1;
        let token = state.next_token;
        let step = io.duration(params.rate, params.gate);

        let mut press =
            Press { token, signal: signal.clone(), lit: Vec::new(), handles: Vec::new(), sweep: None, final_step: None };
        let mut timeline = Timeline::default();
        match params.mode {
            CopyMode::Static => {
                let targets = params.targets(signal.index);
                out.push(targets.iter().map(|&pad| signal.with_index(pad)).collect());
                press.lit = targets;
            }
            CopyMode::RandomSingle => {
                let targets = params.targets(signal.index);
                let pick = targets[fastrand::usize(..targets.len())];
                out.push_one(signal.with_index(pick));
                press.lit = vec![pick];
            }
            CopyMode::RandomLoop => {
                let targets = params.targets(signal.index);
                let pick = targets[fastrand::usize(..targets.len())];
                out.push_one(signal.with_index(pick));
                press.lit = vec![pick];
                let (sink, shared, watched) = (io.clone(), self.state.clone(), key.clone());
                timeline.every(step, move || {
                    let batch = {
                        let mut state = lock(&shared);
                        let Some(press) = current(&mut state, &watched, token) else { return };
                        let previous = press.lit.first().copied();
                        let pick = repick(&targets, previous);
                        let mut batch: Vec<Signal> =
                            previous.map(|p| press.signal.with_index(p).off()).into_iter().collect();
                        batch.push(press.signal.with_index(pick));
                        press.lit = vec![pick];
                        batch
                    };
                    sink.emit(batch);
                });
            }
            CopyMode::Animate | CopyMode::Interpolate => {
                self.sweep(io, out, &mut timeline, params, &mut press, key.clone(), step);
            }
        }
        trace!(index = signal.index, mode = ?params.mode, "Copy press");
        if !timeline.is_empty() {
            plans.push(Plan { key: key.clone(), token, timeline });
        }
        state.presses.insert(key, press);
    }

    /// Moving light across the sweep pads. Step `i` lights pad `i` and turns
    /// off pad `i - 1`; the step after the last pad turns it off.
    #[allow(clippy::too_many_arguments)]
    fn sweep(
        &self,
        io: &DeviceIo,
        out: &mut Outbox,
        timeline: &mut Timeline,
        params: &CopyParams,
        press: &mut Press,
        key: SignalKey,
        step: Duration,
    ) {
        let pads = params.sweep(press.signal.index);
        let count = pads.len();
        let total = step * count as u32;
        let times: Vec<Duration> = params.step_fractions(count).iter().map(|f| total.mul_f64(*f)).collect();

        out.push_one(press.signal.with_index(pads[0]));
        press.lit = vec![pads[0]];
        let now = Instant::now();
        press.sweep = Some((step, now + times[count - 1]));

        for i in 1..=count {
            if i == count && params.infinite {
                press.final_step = Some(pads[count - 1]);
                break;
            }
            let (sink, shared, watched, token) = (io.clone(), self.state.clone(), key.clone(), press.token);
            let previous = pads[i - 1];
            let lighting = pads.get(i).copied();
            timeline.at(times[i], move || {
                let batch = {
                    let mut state = lock(&shared);
                    let Some(press) = current(&mut state, &watched, token) else { return };
                    let mut batch = vec![press.signal.with_index(previous).off()];
                    press.lit.retain(|p| *p != previous);
                    if let Some(pad) = lighting {
                        batch.push(press.signal.with_index(pad));
                        press.lit.push(pad);
                    } else {
                        state.presses.remove(&watched);
                    }
                    batch
                };
                sink.emit(batch);
            });
        }
    }

    /// Schedule planned steps and hand their handles to presses that are
    /// still current; a press released meanwhile gets its steps cancelled.
    fn arm(&self, io: &DeviceIo, plans: Vec<Plan>) {
        if plans.is_empty() {
            return;
        }
        let armed: Vec<(SignalKey, u64, Vec<TaskHandle>)> =
            plans.into_iter().map(|plan| (plan.key, plan.token, plan.timeline.arm(io))).collect();
        let mut state = lock(&self.state);
        for (key, token, handles) in armed {
            match current(&mut state, &key, token) {
                Some(press) => press.handles.extend(handles),
                None => io.cancel_all(handles),
            }
        }
    }

    fn release(&self, io: &DeviceIo, out: &mut Outbox, state: &mut CopyState, params: &CopyParams, signal: Signal) {
        let key = signal.key();
        let Some(mut press) = state.presses.remove(&key) else {
            if params.mode == CopyMode::Static {
                out.push(params.targets(signal.index).into_iter().map(|pad| signal.with_index(pad)).collect());
            }
            return;
        };

        // Infinite sweep: let the remaining steps play, then turn off the
        // last pad one step after the later of now and the last lighting.
        if let (Some(pad), Some((step, last_light))) = (press.final_step.take(), press.sweep) {
            let at = last_light.max(Instant::now()) + step;
            let (sink, shared, watched, token) = (io.clone(), self.state.clone(), key.clone(), press.token);
            let handle = io.schedule(at.saturating_duration_since(Instant::now()), move || {
                let offs = {
                    let mut state = lock(&shared);
                    let Some(press) = current(&mut state, &watched, token) else { return };
                    let offs: Vec<Signal> =
                        press.lit.iter().chain([&pad]).map(|p| press.signal.with_index(*p).off()).collect();
                    state.presses.remove(&watched);
                    offs
                };
                sink.emit(dedup(offs));
            });
            press.handles.extend(handle);
            state.presses.insert(key, press);
            return;
        }
        unwind(io, out, press);
    }
}

/// Cancel a press's pending work and queue offs for what it lit.
fn unwind(io: &DeviceIo, out: &mut Outbox, press: Press) {
    io.cancel_all(press.handles);
    out.push(press.lit.iter().map(|p| press.signal.with_index(*p).off()).collect());
}

fn current<'a>(state: &'a mut CopyState, key: &SignalKey, token: u64) -> Option<&'a mut Press> {
    state.presses.get_mut(key).filter(|p| p.token == token)
}

/// Random target, avoiding the previous pick when there is a choice.
fn repick(targets: &[u8], previous: Option<u8>) -> u8 {
    let others: Vec<u8> = targets.iter().copied().filter(|t| Some(*t) != previous).collect();
    if others.is_empty() {
        targets[fastrand::usize(..targets.len())]
    } else {
        others[fastrand::usize(..others.len())]
    }
}

fn dedup(mut signals: Vec<Signal>) -> Vec<Signal> {
    let mut seen = Vec::new();
    signals.retain(|s| {
        if seen.contains(&s.index) {
            false
        } else {
            seen.push(s.index);
            true
        }
    });
    signals
}

impl Process for Copier {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let params = read(&self.params).clone();
        let mut out = Outbox::default();
        let mut plans = Vec::new();
        {
            let mut state = lock(&self.state);
            for signal in signals {
                if signal.is_clear() {
                    out.push_one(signal);
                } else if signal.lit() {
                    self.press(io, &mut out, &mut plans, &mut state, &params, signal);
                } else {
                    self.release(io, &mut out, &mut state, &params, signal);
                }
            }
        }
        out.send(io);
        self.arm(io, plans);
    }

    params_accessors!(Copy);
}
