//! Group: run every branch in parallel

use std::sync::{Arc, RwLock};

use padlight_core::params::GroupParams;
use padlight_core::{ChainParams, DeviceKindParams, Signal};
use tracing::debug;

use crate::chain::Chain;

use super::{read, write, DeviceIo, Process};

/// Connects a branch's outlet to whatever its parent does with branch output
pub(super) type Wire = Arc<dyn Fn(&Chain) + Send + Sync>;

/// Branch chains of a Group or Multi.
pub(super) struct Branches {
    chains: RwLock<Vec<Arc<Chain>>>,
    wire: Wire,
}

impl Branches {
    pub fn build(params: &[ChainParams], io: &DeviceIo, wire: Wire) -> Self {
        let chains = params
            .iter()
            .map(|p| {
                let chain = Chain::from_params(p, io.context());
                wire(&chain);
                chain
            })
            .collect();
        Self { chains: RwLock::new(chains), wire }
    }

    pub fn snapshot(&self) -> Vec<Arc<Chain>> {
        read(&self.chains).clone()
    }

    pub fn params(&self) -> Vec<ChainParams> {
        read(&self.chains).iter().map(|c| c.params()).collect()
    }

    pub fn insert(&self, index: usize, chain: Arc<Chain>) -> bool {
        let mut chains = write(&self.chains);
        if index > chains.len() {
            return false;
        }
        (self.wire)(&chain);
        chains.insert(index, chain);
        debug!(index, branches = chains.len(), "Branch inserted");
        true
    }

    /// Unlink the branch at `index`, then dispose it.
    pub fn remove(&self, index: usize) -> Option<Arc<Chain>> {
        let chain = {
            let mut chains = write(&self.chains);
            if index >= chains.len() {
                return None;
            }
            let chain = chains.remove(index);
            debug!(index, branches = chains.len(), "Branch removed");
            chain
        };
        chain.dispose();
        Some(chain)
    }

    /// Rebuild every branch unless the parameters are unchanged.
    pub fn replace(&self, io: &DeviceIo, params: &[ChainParams]) {
        if self.params() == params {
            return;
        }
        let rebuilt = Branches::build(params, io, self.wire.clone()).snapshot();
        let previous = std::mem::replace(&mut *write(&self.chains), rebuilt);
        for chain in previous {
            chain.dispose();
        }
    }

    pub fn dispose(&self) {
        for chain in read(&self.chains).iter() {
            chain.dispose();
        }
    }
}

/// Branch output pops its branch index and leaves through the parent's outlet.
pub(super) fn to_outlet(io: &DeviceIo) -> Wire {
    let outlet = io.outlet().clone();
    Arc::new(move |chain: &Chain| {
        let outlet = outlet.clone();
        chain.outlet().connect(move |mut signals| {
            for signal in &mut signals {
                signal.multi_target.pop();
            }
            outlet.emit(signals);
        });
    })
}

/// Copy of `signal` tagged with the branch it is routed into.
pub(super) fn routed(signal: &Signal, branch: usize) -> Signal {
    let mut routed = signal.clone();
    routed.multi_target.push(branch);
    routed
}

pub(crate) struct Group {
    branches: Branches,
}

impl Group {
    pub fn new(params: GroupParams, io: &DeviceIo) -> Self {
        Self { branches: Branches::build(&params.chains, io, to_outlet(io)) }
    }
}

impl Process for Group {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>) {
        let chains = self.branches.snapshot();
        if chains.is_empty() {
            io.emit(signals);
            return;
        }
        for (i, chain) in chains.iter().enumerate() {
            let batch: Vec<Signal> = signals
                .iter()
                .filter(|s| s.is_clear() || chain.accepts(s.index))
                .map(|s| routed(s, i))
                .collect();
            chain.enter(batch);
        }
    }

    fn params(&self) -> DeviceKindParams {
        DeviceKindParams::Group(GroupParams { chains: self.branches.params() })
    }

    fn set_params(&self, io: &DeviceIo, params: DeviceKindParams) -> bool {
        let DeviceKindParams::Group(params) = params else { return false };
        self.branches.replace(io, &params.chains);
        true
    }

    fn branches(&self) -> Vec<Arc<Chain>> {
        self.branches.snapshot()
    }

    fn insert_branch(&self, _io: &DeviceIo, index: usize, chain: Arc<Chain>) -> bool {
        self.branches.insert(index, chain)
    }

    fn remove_branch(&self, index: usize) -> Option<Arc<Chain>> {
        self.branches.remove(index)
    }

    fn dispose(&self) {
        self.branches.dispose();
    }
}
