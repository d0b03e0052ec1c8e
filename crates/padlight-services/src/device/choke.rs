//! Choke: mutually exclusive sub-chains
//!
//! A lit signal entering a Choke silences every other Choke with the same
//! group number: they turn off whatever they currently have lit and stay
//! muted until their own next press.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use padlight_core::params::ChokeParams;
use padlight_core::{DeviceKindParams, Signal, SignalKey};
use tracing::{debug, trace};

use crate::chain::Chain;
use crate::context::Context;

use super::{lock, read, write, DeviceIo, Outlet, Process};

#[derive(Default)]
struct GateState {
    muted: bool,
    lit: HashMap<SignalKey, Signal>,
}

/// Output side of a Choke, shared with the bus
pub(crate) struct ChokeGate {
    target: AtomicU8,
    state: Mutex<GateState>,
    outlet: Arc<Outlet>,
}

impl ChokeGate {
    fn pass(&self, signals: Vec<Signal>) {
        let passed = {
            let mut state = lock(&self.state);
            if state.muted {
                return;
            }
            for signal in &signals {
                if signal.is_clear() {
                    state.lit.clear();
                } else if signal.lit() {
                    state.lit.insert(signal.key(), signal.clone());
                } else {
                    state.lit.remove(&signal.key());
                }
            }
            signals
        };
        self.outlet.emit(passed);
    }

    fn choke(&self) {
        let offs: Vec<Signal> = {
            let mut state = lock(&self.state);
            state.muted = true;
            state.lit.drain().map(|(_, s)| s.off()).collect()
        };
        trace!(count = offs.len(), "Choked");
        self.outlet.emit(offs);
    }

    fn unmute(&self) {
        lock(&self.state).muted = false;
    }
}

/// Registry of live Chokes in a project
#[derive(Default)]
pub(crate) struct ChokeBus {
    members: Mutex<Vec<Weak<ChokeGate>>>,
}

impl ChokeBus {
    fn register(&self, gate: &Arc<ChokeGate>) {
        lock(&self.members).push(Arc::downgrade(gate));
    }

    fn unregister(&self, gate: &Arc<ChokeGate>) {
        let target = Arc::downgrade(gate);
        lock(&self.members).retain(|m| m.strong_count() > 0 && !m.ptr_eq(&target));
    }

    /// Choke every member of `target` except `from`. Members are collected
    /// first so no bus lock is held while they emit.
    fn choke(&self, target: u8, from: &Arc<ChokeGate>) {
        let victims: Vec<Arc<ChokeGate>> = {
            let mut members = lock(&self.members);
            members.retain(|m| m.strong_count() > 0);
            members
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|g| !Arc::ptr_eq(g, from) && g.target.load(Ordering::Relaxed) == target)
                .collect()
        };
        if !victims.is_empty() {
            debug!(target, count = victims.len(), "Choke group silenced");
        }
        for gate in victims {
            gate.choke();
        }
    }
}

pub(crate) struct Choke {
    gate: Arc<ChokeGate>,
    chain: RwLock<Arc<Chain>>,
    context: Weak<Context>,
}

impl Choke {
    pub fn new(params: ChokeParams, io: &DeviceIo) -> Self {
        let gate = Arc::new(ChokeGate {
            target: AtomicU8::new(params.target),
            state: Mutex::default(),
            outlet: io.outlet().clone(),
        });
        io.context().chokes().register(&gate);
        let chain = gated_chain(&params, &gate, io);
        Self { gate, chain: RwLock::new(chain), context: Arc::downgrade(io.context()) }
    }
}

fn gated_chain(params: &ChokeParams, gate: &Arc<ChokeGate>, io: &DeviceIo) -> Arc<Chain> {
    let chain = Chain::from_params(&params.chain, io.context());
    let gate = gate.clone();
    chain.outlet().connect(move |signals| gate.pass(signals));
    chain
}

impl Process for Choke {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        if signals.iter().any(|s| s.lit() && !s.is_clear()) {
            let target = self.gate.target.load(Ordering::Relaxed);
            io.context().chokes().choke(target, &self.gate);
            self.gate.unmute();
        }
        let chain = read(&self.chain).clone();
        chain.enter(signals);
    }

    fn params(&self) -> DeviceKindParams {
        DeviceKindParams::Choke(ChokeParams {
            target: self.gate.target.load(Ordering::Relaxed),
            chain: read(&self.chain).params(),
        })
    }

    fn set_params(&self, io: &DeviceIo, params: DeviceKindParams) -> bool {
        let DeviceKindParams::Choke(params) = params else { return false };
        self.gate.target.store(params.target, Ordering::Relaxed);
        let mut chain = write(&self.chain);
        if chain.params() != params.chain {
            chain.dispose();
            *chain = gated_chain(&params, &self.gate, io);
        }
        true
    }

    fn branches(&self) -> Vec<Arc<Chain>> {
        vec![read(&self.chain).clone()]
    }

    fn dispose(&self) {
        read(&self.chain).dispose();
        if let Some(context) = self.context.upgrade() {
            context.chokes().unregister(&self.gate);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use padlight_core::{Color, DeviceParams};

    use crate::context::Context;
    use crate::device::testing::*;
    use crate::device::Device;

    use super::*;

    fn choke(target: u8) -> DeviceKindParams {
        DeviceKindParams::Choke(ChokeParams { target, ..Default::default() })
    }

    fn attach(device: &Device) -> crossbeam_channel::Receiver<Vec<Signal>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        device.outlet().connect(move |s| {
            let _ = tx.send(s);
        });
        rx
    }

    #[test]
    fn test_press_chokes_same_group_only() {
        let context = Context::standalone();
        let a = Device::new(DeviceParams::new(choke(1)), &context);
        let b = Device::new(DeviceParams::new(choke(1)), &context);
        let c = Device::new(DeviceParams::new(choke(2)), &context);
        let (rx_a, rx_b, rx_c) = (attach(&a), attach(&b), attach(&c));

        a.enter(vec![Signal::new(11, Color::WHITE)]);
        c.enter(vec![Signal::new(13, Color::WHITE)]);
        assert!(next(&rx_a)[0].lit());
        next(&rx_c);

        b.enter(vec![Signal::new(12, Color::WHITE)]);
        let off = next(&rx_a);
        assert_eq!((off[0].index, off[0].lit()), (11, false));
        assert!(next(&rx_b)[0].lit());
        assert!(quiet(&rx_c, Duration::from_millis(20)));

        // A stays muted until its own next press.
        a.enter(vec![Signal::new(11, Color::OFF)]);
        assert!(quiet(&rx_a, Duration::from_millis(20)));
        a.enter(vec![Signal::new(11, Color::WHITE)]);
        assert!(next(&rx_a)[0].lit());
        assert!(!next(&rx_b)[0].lit());
    }

    #[test]
    fn test_disposed_choke_leaves_bus() {
        let (context, a, _rx) = wired(choke(1));
        let b = Device::new(DeviceParams::new(choke(1)), &context);
        a.dispose();
        assert_eq!(lock(&context.chokes().members).len(), 1);
        b.enter(vec![Signal::new(1, Color::WHITE)]);
    }
}
