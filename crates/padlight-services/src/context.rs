//! Per-project shared runtime: courier, tempo, macros and choke bus

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use padlight_core::time::{MAX_BPM, MIN_BPM};
use padlight_core::{Gate, MacroStore, TimeValue};
use tracing::debug;

use crate::courier::{Courier, Scheduler};
use crate::device::ChokeBus;

pub const DEFAULT_BPM: u32 = 150;

pub struct Context {
    courier: Courier,
    bpm: AtomicU32,
    macros: MacroStore,
    chokes: ChokeBus,
}

impl Context {
    pub fn new(courier: Courier) -> Arc<Self> {
        Arc::new(Self {
            courier,
            bpm: AtomicU32::new(DEFAULT_BPM),
            macros: MacroStore::default(),
            chokes: ChokeBus::default(),
        })
    }

    /// Context with its own courier thread.
    pub fn standalone() -> Arc<Self> {
        Self::new(Courier::new())
    }

    pub fn courier(&self) -> &Courier {
        &self.courier
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.courier.scheduler()
    }

    pub fn bpm(&self) -> u32 {
        self.bpm.load(Ordering::Relaxed)
    }

    pub fn set_bpm(&self, bpm: u32) {
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        self.bpm.store(bpm, Ordering::Relaxed);
        debug!(bpm, "Tempo changed");
    }

    /// Resolve a device time against the current tempo.
    pub fn duration(&self, time: TimeValue, gate: Gate) -> Duration {
        time.resolve(self.bpm(), gate)
    }

    pub fn macros(&self) -> &MacroStore {
        &self.macros
    }

    pub(crate) fn chokes(&self) -> &ChokeBus {
        &self.chokes
    }
}
