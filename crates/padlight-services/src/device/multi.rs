//! Multi: route each press into one selected branch
//!
//! The branch a press was sent to is remembered per key by the branch's
//! chain id, so the release follows its press even when branches are
//! reordered, inserted or removed in between. What the branches emit while
//! a batch is being routed is gathered per branch and forwarded once, in
//! branch order; later output (timers inside a branch) passes straight
//! through.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, ThreadId};

use padlight_core::params::{MultiMode, MultiParams};
use padlight_core::{ChainParams, DeviceKindParams, Signal, SignalKey};
use tracing::trace;

use crate::chain::{Chain, ChainId};

use super::group::{routed, Branches, Wire};
use super::{lock, read, write, DeviceIo, Process};

#[derive(Debug, Clone, Copy)]
struct Binding {
    chain: ChainId,
    /// Branch index at press time, carried on the multi-target stack
    index: usize,
}

#[derive(Default)]
struct MultiState {
    bound: HashMap<SignalKey, Vec<Binding>>,
    current: Option<usize>,
}

/// Branch output gathered during one `route` call
struct Frame {
    order: Vec<ChainId>,
    outputs: BTreeMap<usize, Vec<Signal>>,
}

struct Router {
    branches: Branches,
    mode: RwLock<MultiMode>,
    state: Mutex<MultiState>,
    /// Open frames per routing thread; nested when routing re-enters
    frames: Mutex<HashMap<ThreadId, Vec<Frame>>>,
    io: DeviceIo,
}

impl Router {
    fn select(&self, state: &mut MultiState, chains: &[Arc<Chain>], index: u8) -> Vec<usize> {
        let len = chains.len();
        let pick = match *read(&self.mode) {
            MultiMode::Key => {
                return chains
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.filter().contains(index))
                    .map(|(i, _)| i)
                    .collect();
            }
            MultiMode::Forward => state.current.map_or(0, |c| (c + 1) % len),
            MultiMode::Backward => state.current.map_or(len - 1, |c| (c % len + len - 1) % len),
            MultiMode::Random => fastrand::usize(..len),
            MultiMode::RandomPlus => match state.current {
                Some(previous) if len > 1 => {
                    let pick = fastrand::usize(..len - 1);
                    if pick >= previous % len { pick + 1 } else { pick }
                }
                _ => fastrand::usize(..len),
            },
        };
        state.current = Some(pick);
        vec![pick]
    }

    /// Output of the preprocess chain.
    fn route(&self, signals: Vec<Signal>) {
        let chains = self.branches.snapshot();
        if chains.is_empty() {
            self.io.emit(signals);
            return;
        }

        let mut batches: BTreeMap<usize, Vec<Signal>> = BTreeMap::new();
        let position = |binding: &Binding| chains.iter().position(|c| c.id() == binding.chain);
        {
            let mut state = lock(&self.state);
            for signal in signals {
                if signal.is_clear() {
                    for i in 0..chains.len() {
                        batches.entry(i).or_default().push(routed(&signal, i));
                    }
                    continue;
                }
                let key = signal.key();
                if signal.lit() {
                    let picks = self.select(&mut state, &chains, signal.index);
                    let bindings: Vec<Binding> =
                        picks.iter().map(|&i| Binding { chain: chains[i].id(), index: i }).collect();

                    // A repeated press of a held key releases branches the new press skips.
                    if let Some(previous) = state.bound.remove(&key) {
                        for old in previous.iter().filter(|b| !picks.contains(&b.index)) {
                            if let Some(pos) = position(old) {
                                batches.entry(pos).or_default().push(routed(&signal.off(), old.index));
                            }
                        }
                    }
                    for &i in &picks {
                        batches.entry(i).or_default().push(routed(&signal, i));
                    }
                    if !bindings.is_empty() {
                        trace!(index = signal.index, branches = ?picks, "Multi press bound");
                        state.bound.insert(key, bindings);
                    }
                } else if let Some(bindings) = state.bound.remove(&key) {
                    for binding in bindings {
                        if let Some(pos) = position(&binding) {
                            batches.entry(pos).or_default().push(routed(&signal, binding.index));
                        }
                    }
                }
            }
        }
        if batches.is_empty() {
            return;
        }

        let me = thread::current().id();
        let frame = Frame { order: chains.iter().map(|c| c.id()).collect(), outputs: BTreeMap::new() };
        lock(&self.frames).entry(me).or_default().push(frame);
        for (pos, batch) in batches {
            chains[pos].enter(batch);
        }
        let frame = {
            let mut frames = lock(&self.frames);
            let frame = frames.get_mut(&me).and_then(Vec::pop);
            if frames.get(&me).is_some_and(Vec::is_empty) {
                frames.remove(&me);
            }
            frame
        };
        if let Some(frame) = frame {
            self.io.emit(frame.outputs.into_values().flatten().collect());
        }
    }

    /// Output of branch `chain`: held for the routing call in progress on
    /// this thread, otherwise forwarded at once.
    fn collect(&self, chain: ChainId, signals: Vec<Signal>) {
        {
            let mut frames = lock(&self.frames);
            if let Some(frame) = frames.get_mut(&thread::current().id()).and_then(|f| f.last_mut()) {
                let slot = frame.order.iter().position(|c| *c == chain).unwrap_or(frame.order.len());
                frame.outputs.entry(slot).or_default().extend(signals);
                return;
            }
        }
        self.io.emit(signals);
    }
}

/// Branch output pops its branch index and goes back through the router.
fn to_router(router: Weak<Router>) -> Wire {
    Arc::new(move |chain: &Chain| {
        let (router, id) = (router.clone(), chain.id());
        chain.outlet().connect(move |mut signals| {
            for signal in &mut signals {
                signal.multi_target.pop();
            }
            if let Some(router) = router.upgrade() {
                router.collect(id, signals);
            }
        });
    })
}

pub(crate) struct Multi {
    preprocess: RwLock<Arc<Chain>>,
    router: Arc<Router>,
}

impl Multi {
    pub fn new(params: MultiParams, io: &DeviceIo) -> Self {
        let router = Arc::new_cyclic(|router| Router {
            branches: Branches::build(&params.chains, io, to_router(router.clone())),
            mode: RwLock::new(params.mode),
            state: Mutex::default(),
            frames: Mutex::default(),
            io: io.clone(),
        });
        let preprocess = preprocess_chain(&params.preprocess, &router, io);
        Self { preprocess: RwLock::new(preprocess), router }
    }
}

fn preprocess_chain(params: &ChainParams, router: &Arc<Router>, io: &DeviceIo) -> Arc<Chain> {
    let chain = Chain::from_params(params, io.context());
    let router = router.clone();
    chain.outlet().connect(move |signals| router.route(signals));
    chain
}

impl Process for Multi {
    fn process(&self, _io: &DeviceIo, signals: Vec<Signal>) {
        let preprocess = read(&self.preprocess).clone();
        preprocess.enter(signals);
    }

    fn params(&self) -> DeviceKindParams {
        DeviceKindParams::Multi(MultiParams {
            mode: *read(&self.router.mode),
            preprocess: read(&self.preprocess).params(),
            chains: self.router.branches.params(),
        })
    }

    fn set_params(&self, io: &DeviceIo, params: DeviceKindParams) -> bool {
        let DeviceKindParams::Multi(params) = params else { return false };
        *write(&self.router.mode) = params.mode;
        let mut preprocess = write(&self.preprocess);
        if preprocess.params() != params.preprocess {
            preprocess.dispose();
            *preprocess = preprocess_chain(&params.preprocess, &self.router, io);
        }
        drop(preprocess);
        self.router.branches.replace(io, &params.chains);
        true
    }

    fn branches(&self) -> Vec<Arc<Chain>> {
        self.router.branches.snapshot()
    }

    fn preprocess(&self) -> Option<Arc<Chain>> {
        Some(read(&self.preprocess).clone())
    }

    fn insert_branch(&self, _io: &DeviceIo, index: usize, chain: Arc<Chain>) -> bool {
        self.router.branches.insert(index, chain)
    }

    fn remove_branch(&self, index: usize) -> Option<Arc<Chain>> {
        self.router.branches.remove(index)
    }

    fn dispose(&self) {
        read(&self.preprocess).dispose();
        self.router.branches.dispose();
    }
}
