//! Live devices: the processing nodes of a chain
//!
//! A [`Device`] wraps one concrete processor behind the closed
//! [`DeviceKind`] enum. Every device owns an [`Outlet`] (its exit hook, set
//! by the owning chain and swappable at any time) and a [`Timers`] group
//! through which all of its delayed work is scheduled.

/// `params`/`set_params` for processors that keep their parameters in a
/// `params: RwLock<_>` field.
macro_rules! params_accessors {
    ($variant:ident) => {
        fn params(&self) -> padlight_core::DeviceKindParams {
            padlight_core::DeviceKindParams::$variant(crate::device::read(&self.params).clone())
        }

        fn set_params(&self, _io: &crate::device::DeviceIo, params: padlight_core::DeviceKindParams) -> bool {
            let padlight_core::DeviceKindParams::$variant(params) = params else {
                return false;
            };
            *crate::device::write(&self.params) = params;
            true
        }
    };
}

mod choke;
mod clear;
mod copy;
mod delay;
mod fade;
mod filters;
mod group;
mod hold;
mod looper;
mod multi;
mod switch;
mod transforms;

pub(crate) use choke::ChokeBus;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use padlight_core::{DeviceKindParams, DeviceParams, Gate, Signal, TimeValue};
use tracing::{debug, trace};

use crate::chain::Chain;
use crate::context::Context;
use crate::courier::{TaskHandle, Timers};

pub type DeviceId = u64;

static NEXT_DEVICE: AtomicU64 = AtomicU64::new(1);

struct Hook(Box<dyn Fn(Vec<Signal>) + Send + Sync>);

/// Replaceable exit hook.
///
/// The hook is loaded on every emit, so a device (or a timer callback
/// holding the outlet) always delivers to whatever the owning chain wired
/// last. An unconnected outlet drops its input.
#[derive(Default)]
pub struct Outlet {
    hook: ArcSwapOption<Hook>,
}

impl Outlet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect(&self, hook: impl Fn(Vec<Signal>) + Send + Sync + 'static) {
        self.hook.store(Some(Arc::new(Hook(Box::new(hook)))));
    }

    pub fn disconnect(&self) {
        self.hook.store(None);
    }

    pub fn is_connected(&self) -> bool {
        self.hook.load().is_some()
    }

    pub fn emit(&self, signals: Vec<Signal>) {
        if signals.is_empty() {
            return;
        }
        match self.hook.load_full() {
            Some(hook) => (hook.0)(signals),
            None => trace!(count = signals.len(), "Outlet not connected, signals dropped"),
        }
    }
}

/// Everything a processor needs to emit and schedule. Cloned into timer
/// callbacks in place of the device itself.
#[derive(Clone)]
pub(crate) struct DeviceIo {
    outlet: Arc<Outlet>,
    timers: Timers,
    context: Arc<Context>,
}

impl DeviceIo {
    pub(crate) fn emit(&self, signals: Vec<Signal>) {
        self.outlet.emit(signals);
    }

    pub(crate) fn emit_one(&self, signal: Signal) {
        self.outlet.emit(vec![signal]);
    }

    pub(crate) fn outlet(&self) -> &Arc<Outlet> {
        &self.outlet
    }

    pub(crate) fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub(crate) fn duration(&self, time: TimeValue, gate: Gate) -> Duration {
        self.context.duration(time, gate)
    }

    pub(crate) fn schedule(&self, delay: Duration, callback: impl FnMut() + Send + 'static) -> Option<TaskHandle> {
        self.timers.schedule(delay, callback)
    }

    pub(crate) fn repeat(&self, interval: Duration, callback: impl FnMut() + Send + 'static) -> Option<TaskHandle> {
        self.timers.repeat(interval, callback)
    }

    pub(crate) fn cancel(&self, handle: TaskHandle) {
        self.timers.cancel(handle);
    }

    pub(crate) fn cancel_all(&self, handles: impl IntoIterator<Item = TaskHandle>) {
        for handle in handles {
            self.timers.cancel(handle);
        }
    }
}

/// Batches decided while a device holds its state lock.
///
/// Output can re-enter the same device synchronously (a Choke further down
/// silencing one upstream), so nothing is emitted until the guard is gone:
/// collect here, drop the guard, then [`Outbox::send`].
#[derive(Default)]
#[must_use = "batches are only emitted by send"]
pub(crate) struct Outbox(Vec<Vec<Signal>>);

impl Outbox {
    pub(crate) fn push(&mut self, signals: Vec<Signal>) {
        if !signals.is_empty() {
            self.0.push(signals);
        }
    }

    pub(crate) fn push_one(&mut self, signal: Signal) {
        self.0.push(vec![signal]);
    }

    pub(crate) fn send(self, io: &DeviceIo) {
        for batch in self.0 {
            io.emit(batch);
        }
    }
}

type Callback = Box<dyn FnMut() + Send>;

/// Tasks planned under a state lock and scheduled only after the batches
/// they follow were sent, so a short step can never overtake the signal it
/// continues. Callbacks re-check their press under the lock when they fire.
#[derive(Default)]
pub(crate) struct Timeline(Vec<(Duration, bool, Callback)>);

impl Timeline {
    pub(crate) fn at(&mut self, delay: Duration, callback: impl FnMut() + Send + 'static) {
        self.0.push((delay, false, Box::new(callback)));
    }

    pub(crate) fn every(&mut self, interval: Duration, callback: impl FnMut() + Send + 'static) {
        self.0.push((interval, true, Box::new(callback)));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn arm(self, io: &DeviceIo) -> Vec<TaskHandle> {
        self.0
            .into_iter()
            .filter_map(|(delay, repeating, callback)| {
                if repeating { io.repeat(delay, callback) } else { io.schedule(delay, callback) }
            })
            .collect()
    }
}

/// Behavior shared by every concrete processor
pub(crate) trait Process: Send + Sync {
    fn process(&self, io: &DeviceIo, signals: Vec<Signal>);
    fn params(&self) -> DeviceKindParams;
    /// Returns false when `params` belong to another kind.
    fn set_params(&self, io: &DeviceIo, params: DeviceKindParams) -> bool;

    /// Child chains addressed by branch index.
    fn branches(&self) -> Vec<Arc<Chain>> {
        Vec::new()
    }

    fn preprocess(&self) -> Option<Arc<Chain>> {
        None
    }

    fn insert_branch(&self, _io: &DeviceIo, _index: usize, _chain: Arc<Chain>) -> bool {
        false
    }

    fn remove_branch(&self, _index: usize) -> Option<Arc<Chain>> {
        None
    }

    fn dispose(&self) {}
}

pub(crate) enum DeviceKind {
    Group(group::Group),
    Multi(multi::Multi),
    Choke(choke::Choke),
    Delay(delay::Delay),
    Hold(hold::Hold),
    Fade(fade::Fade),
    Loop(looper::Looper),
    Copy(copy::Copier),
    KeyFilter(filters::KeyFilter),
    LayerFilter(filters::LayerFilter),
    MacroFilter(filters::MacroFilter),
    Flip(transforms::Flip),
    Rotate(transforms::Rotate),
    Move(transforms::Move),
    Paint(transforms::Paint),
    Layer(transforms::Layer),
    Switch(switch::Switch),
    Refresh(switch::Refresh),
    Clear(clear::Clear),
}

macro_rules! dispatch {
    ($kind:expr, $p:ident => $body:expr) => {
        match $kind {
            DeviceKind::Group($p) => $body,
            DeviceKind::Multi($p) => $body,
            DeviceKind::Choke($p) => $body,
            DeviceKind::Delay($p) => $body,
            DeviceKind::Hold($p) => $body,
            DeviceKind::Fade($p) => $body,
            DeviceKind::Loop($p) => $body,
            DeviceKind::Copy($p) => $body,
            DeviceKind::KeyFilter($p) => $body,
            DeviceKind::LayerFilter($p) => $body,
            DeviceKind::MacroFilter($p) => $body,
            DeviceKind::Flip($p) => $body,
            DeviceKind::Rotate($p) => $body,
            DeviceKind::Move($p) => $body,
            DeviceKind::Paint($p) => $body,
            DeviceKind::Layer($p) => $body,
            DeviceKind::Switch($p) => $body,
            DeviceKind::Refresh($p) => $body,
            DeviceKind::Clear($p) => $body,
        }
    };
}

impl DeviceKind {
    fn build(params: DeviceKindParams, io: &DeviceIo) -> Self {
        match params {
            DeviceKindParams::Group(p) => Self::Group(group::Group::new(p, io)),
            DeviceKindParams::Multi(p) => Self::Multi(multi::Multi::new(p, io)),
            DeviceKindParams::Choke(p) => Self::Choke(choke::Choke::new(p, io)),
            DeviceKindParams::Delay(p) => Self::Delay(delay::Delay::new(p)),
            DeviceKindParams::Hold(p) => Self::Hold(hold::Hold::new(p)),
            DeviceKindParams::Fade(p) => Self::Fade(fade::Fade::new(p)),
            DeviceKindParams::Loop(p) => Self::Loop(looper::Looper::new(p)),
            DeviceKindParams::Copy(p) => Self::Copy(copy::Copier::new(p)),
            DeviceKindParams::KeyFilter(p) => Self::KeyFilter(filters::KeyFilter::new(p)),
            DeviceKindParams::LayerFilter(p) => Self::LayerFilter(filters::LayerFilter::new(p)),
            DeviceKindParams::MacroFilter(p) => Self::MacroFilter(filters::MacroFilter::new(p)),
            DeviceKindParams::Flip(p) => Self::Flip(transforms::Flip::new(p)),
            DeviceKindParams::Rotate(p) => Self::Rotate(transforms::Rotate::new(p)),
            DeviceKindParams::Move(p) => Self::Move(transforms::Move::new(p)),
            DeviceKindParams::Paint(p) => Self::Paint(transforms::Paint::new(p)),
            DeviceKindParams::Layer(p) => Self::Layer(transforms::Layer::new(p)),
            DeviceKindParams::Switch(p) => Self::Switch(switch::Switch::new(p)),
            DeviceKindParams::Refresh(p) => Self::Refresh(switch::Refresh::new(p)),
            DeviceKindParams::Clear => Self::Clear(clear::Clear),
        }
    }

    fn processor(&self) -> &dyn Process {
        dispatch!(self, p => p as &dyn Process)
    }
}

/// Shared processing node
pub struct Device {
    id: DeviceId,
    name: &'static str,
    enabled: AtomicBool,
    collapsed: AtomicBool,
    disposed: AtomicBool,
    io: DeviceIo,
    kind: DeviceKind,
}

impl Device {
    pub fn new(params: DeviceParams, context: &Arc<Context>) -> Arc<Self> {
        let mut params = params;
        params.kind.sanitize();
        let io = DeviceIo {
            outlet: Outlet::new(),
            timers: Timers::new(context.scheduler()),
            context: context.clone(),
        };
        let id = NEXT_DEVICE.fetch_add(1, Ordering::Relaxed);
        let name = params.kind.name();
        let kind = DeviceKind::build(params.kind, &io);
        trace!(id, name, "Device created");
        Arc::new(Self {
            id,
            name,
            enabled: AtomicBool::new(params.enabled),
            collapsed: AtomicBool::new(params.collapsed),
            disposed: AtomicBool::new(false),
            io,
            kind,
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Deliver a batch of simultaneous signals.
    pub fn enter(&self, signals: Vec<Signal>) {
        if signals.is_empty() || self.disposed.load(Ordering::Acquire) {
            return;
        }
        if !self.enabled.load(Ordering::Acquire) {
            self.io.emit(signals);
            return;
        }
        self.kind.processor().process(&self.io, signals);
    }

    pub fn outlet(&self) -> &Arc<Outlet> {
        &self.io.outlet
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed.load(Ordering::Relaxed)
    }

    pub fn set_collapsed(&self, collapsed: bool) {
        self.collapsed.store(collapsed, Ordering::Relaxed);
    }

    pub fn params(&self) -> DeviceParams {
        DeviceParams {
            enabled: self.is_enabled(),
            collapsed: self.is_collapsed(),
            kind: self.kind.processor().params(),
        }
    }

    /// Replace every parameter. Out-of-range values are clamped; params of
    /// another device kind are rejected and leave the device untouched.
    pub fn set_params(&self, params: DeviceParams) -> bool {
        let mut kind = params.kind;
        kind.sanitize();
        if !self.kind.processor().set_params(&self.io, kind) {
            debug!(id = self.id, name = self.name, "Rejected parameters of another device kind");
            return false;
        }
        self.set_enabled(params.enabled);
        self.set_collapsed(params.collapsed);
        true
    }

    /// Deep copy of parameters and sub-chains. Scheduled work stays behind.
    pub fn clone_device(&self) -> Arc<Device> {
        Device::new(self.params(), &self.io.context)
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, DeviceKind::Group(_) | DeviceKind::Multi(_) | DeviceKind::Choke(_))
    }

    pub fn branches(&self) -> Vec<Arc<Chain>> {
        self.kind.processor().branches()
    }

    /// Branch by path index; `PREPROCESS` addresses a Multi's preprocess chain.
    pub fn branch(&self, index: i32) -> Option<Arc<Chain>> {
        if index == padlight_core::PREPROCESS {
            return self.kind.processor().preprocess();
        }
        let index = usize::try_from(index).ok()?;
        self.branches().get(index).cloned()
    }

    pub fn preprocess(&self) -> Option<Arc<Chain>> {
        self.kind.processor().preprocess()
    }

    pub fn insert_branch(&self, index: usize, chain: Arc<Chain>) -> bool {
        self.kind.processor().insert_branch(&self.io, index, chain)
    }

    pub fn remove_branch(&self, index: usize) -> Option<Arc<Chain>> {
        self.kind.processor().remove_branch(index)
    }

    /// Number of tasks this device still has scheduled or running.
    pub fn pending_tasks(&self) -> usize {
        self.io.timers.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Cancel all scheduled work and dispose sub-chains. Idempotent; once
    /// this returns no callback of the device runs again.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.io.timers.close();
        self.kind.processor().dispose();
        self.io.outlet.disconnect();
        trace!(id = self.id, name = self.name, "Device disposed");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
