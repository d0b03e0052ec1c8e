//! Ordered device lists
//!
//! A chain owns its devices and wires each device's outlet to the next
//! device's `enter`; the last device feeds the chain's own outlet. Linkage
//! changes take the write lock, delivery takes the read lock, so a batch
//! never observes a half-rewired chain.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use padlight_core::{ChainParams, PadSet, PadlightError, Result, Signal};
use tracing::{debug, trace};

use crate::context::Context;
use crate::device::{read, write, Device, Outlet};

pub type ChainId = u64;

static NEXT_CHAIN: AtomicU64 = AtomicU64::new(1);

pub struct Chain {
    id: ChainId,
    name: RwLock<String>,
    enabled: AtomicBool,
    filter: RwLock<PadSet>,
    devices: RwLock<Vec<Arc<Device>>>,
    outlet: Arc<Outlet>,
    context: Arc<Context>,
    disposed: AtomicBool,
}

impl Chain {
    pub fn new(context: &Arc<Context>) -> Arc<Self> {
        Self::from_params(&ChainParams::default(), context)
    }

    pub fn from_params(params: &ChainParams, context: &Arc<Context>) -> Arc<Self> {
        let devices: Vec<Arc<Device>> =
            params.devices.iter().map(|p| Device::new(p.clone(), context)).collect();
        let chain = Arc::new(Self {
            id: NEXT_CHAIN.fetch_add(1, Ordering::Relaxed),
            name: RwLock::new(params.name.clone()),
            enabled: AtomicBool::new(params.enabled),
            filter: RwLock::new(params.filter.clone()),
            devices: RwLock::new(Vec::new()),
            outlet: Outlet::new(),
            context: context.clone(),
            disposed: AtomicBool::new(false),
        });
        {
            let mut slot = write(&chain.devices);
            *slot = devices;
            chain.rewire(&slot);
        }
        chain
    }

    /// Stable identity, survives reordering among siblings.
    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn enter(&self, signals: Vec<Signal>) {
        if signals.is_empty() || self.disposed.load(Ordering::Acquire) {
            return;
        }
        if !self.is_enabled() {
            self.outlet.emit(signals);
            return;
        }
        let devices = read(&self.devices);
        match devices.first() {
            Some(first) => first.enter(signals),
            None => self.outlet.emit(signals),
        }
    }

    pub fn outlet(&self) -> &Arc<Outlet> {
        &self.outlet
    }

    /// Point every device at its successor, last to first, so a device is
    /// always connected before anything upstream can reach it.
    fn rewire(&self, devices: &[Arc<Device>]) {
        for (i, device) in devices.iter().enumerate().rev() {
            match devices.get(i + 1) {
                Some(next) => {
                    let next = next.clone();
                    device.outlet().connect(move |signals| next.enter(signals));
                }
                None => {
                    let outlet = self.outlet.clone();
                    device.outlet().connect(move |signals| outlet.emit(signals));
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        read(&self.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn device(&self, index: usize) -> Option<Arc<Device>> {
        read(&self.devices).get(index).cloned()
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        read(&self.devices).clone()
    }

    pub fn index_of(&self, device: &Arc<Device>) -> Option<usize> {
        read(&self.devices).iter().position(|d| Arc::ptr_eq(d, device))
    }

    pub fn insert(&self, index: usize, device: Arc<Device>) -> Result<()> {
        let mut devices = write(&self.devices);
        if index > devices.len() {
            return Err(PadlightError::IndexOutOfRange { index, len: devices.len() });
        }
        debug!(chain = self.id, index, device = device.name(), "Device inserted");
        devices.insert(index, device);
        self.rewire(&devices);
        Ok(())
    }

    pub fn push(&self, device: Arc<Device>) {
        let mut devices = write(&self.devices);
        devices.push(device);
        self.rewire(&devices);
    }

    /// Unlink the device at `index`, then dispose it. Output already on its
    /// way into the removed device still reaches the successor, because the
    /// removed device's outlet stays connected until disposal.
    pub fn remove(&self, index: usize) -> Result<Arc<Device>> {
        let device = {
            let mut devices = write(&self.devices);
            if index >= devices.len() {
                return Err(PadlightError::IndexOutOfRange { index, len: devices.len() });
            }
            let device = devices.remove(index);
            self.rewire(&devices);
            device
        };
        device.dispose();
        debug!(chain = self.id, index, device = device.name(), "Device removed");
        Ok(device)
    }

    /// Move a device so that it ends up at `to`.
    pub fn move_device(&self, from: usize, to: usize) -> Result<()> {
        let mut devices = write(&self.devices);
        let len = devices.len();
        if from >= len {
            return Err(PadlightError::IndexOutOfRange { index: from, len });
        }
        if to >= len {
            return Err(PadlightError::IndexOutOfRange { index: to, len });
        }
        if from == to {
            return Ok(());
        }
        let device = devices.remove(from);
        devices.insert(to, device);
        self.rewire(&devices);
        trace!(chain = self.id, from, to, "Device moved");
        Ok(())
    }

    pub fn name(&self) -> String {
        read(&self.name).clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *write(&self.name) = name.into();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn filter(&self) -> PadSet {
        read(&self.filter).clone()
    }

    /// True when the chain has no filter or the filter holds `index`.
    pub fn accepts(&self, index: u8) -> bool {
        let filter = read(&self.filter);
        filter.is_empty() || filter.contains(index)
    }

    pub fn set_filter(&self, filter: PadSet) {
        *write(&self.filter) = filter;
    }

    pub fn params(&self) -> ChainParams {
        ChainParams {
            name: self.name(),
            enabled: self.is_enabled(),
            filter: self.filter(),
            devices: read(&self.devices).iter().map(|d| d.params()).collect(),
        }
    }

    pub fn clone_chain(&self) -> Arc<Chain> {
        Chain::from_params(&self.params(), &self.context)
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for device in read(&self.devices).iter() {
            device.dispose();
        }
        self.outlet.disconnect();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("devices", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Receiver};
    use padlight_core::params::{DelayParams, LayerParams, MoveParams, PaintParams};
    use padlight_core::{Color, DeviceKindParams, DeviceParams, Offset, TimeValue};

    use super::*;

    fn wired(params: ChainParams) -> (Arc<Chain>, Receiver<Vec<Signal>>) {
        let context = Context::standalone();
        let chain = Chain::from_params(&params, &context);
        let (tx, rx) = unbounded();
        chain.outlet().connect(move |signals| {
            let _ = tx.send(signals);
        });
        (chain, rx)
    }

    fn paint(color: Color) -> DeviceParams {
        DeviceParams::new(DeviceKindParams::Paint(PaintParams { color }))
    }

    fn shift(x: i32, y: i32) -> DeviceParams {
        DeviceParams::new(DeviceKindParams::Move(MoveParams { offset: Offset::new(x, y), ..Default::default() }))
    }

    fn recv(rx: &Receiver<Vec<Signal>>) -> Vec<Signal> {
        rx.recv_timeout(Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let (chain, rx) = wired(ChainParams::default());
        let signal = Signal::new(44, Color::WHITE);
        chain.enter(vec![signal.clone()]);
        assert_eq!(recv(&rx), vec![signal]);
    }

    #[test]
    fn test_devices_run_in_order() {
        let red = Color::new(63, 0, 0);
        let (chain, rx) = wired(ChainParams::with_devices(vec![shift(1, 0), paint(red), shift(1, 0)]));
        chain.enter(vec![Signal::new(33, Color::WHITE)]);
        let out = recv(&rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].index, 35);
        assert_eq!(out[0].color, red);
    }

    #[test]
    fn test_disabled_device_is_skipped() {
        let red = Color::new(63, 0, 0);
        let (chain, rx) = wired(ChainParams::with_devices(vec![paint(red), shift(1, 0)]));
        chain.device(0).unwrap().set_enabled(false);
        chain.enter(vec![Signal::new(33, Color::WHITE)]);
        let out = recv(&rx);
        assert_eq!(out[0].color, Color::WHITE);
        assert_eq!(out[0].index, 34);
    }

    #[test]
    fn test_insert_remove_move_rewire() {
        let (chain, rx) = wired(ChainParams::default());
        let context = chain.context().clone();
        chain.insert(0, Device::new(shift(1, 0), &context)).unwrap();
        chain.insert(1, Device::new(shift(0, 1), &context)).unwrap();
        chain.enter(vec![Signal::new(0, Color::WHITE)]);
        assert_eq!(recv(&rx)[0].index, 11);

        let layer = DeviceParams::new(DeviceKindParams::Layer(LayerParams { target: 3, ..Default::default() }));
        chain.insert(2, Device::new(layer, &context)).unwrap();
        chain.move_device(2, 0).unwrap();
        assert_eq!(chain.device(0).unwrap().name(), "Layer");

        let removed = chain.remove(1).unwrap();
        assert!(removed.is_disposed());
        chain.enter(vec![Signal::new(0, Color::WHITE)]);
        let out = recv(&rx);
        assert_eq!(out[0].index, 10);
        assert_eq!(out[0].layer, 3);
    }

    #[test]
    fn test_out_of_range_is_error() {
        let (chain, _rx) = wired(ChainParams::default());
        assert!(chain.remove(0).is_err());
        assert!(chain.move_device(0, 1).is_err());
        let context = chain.context().clone();
        assert!(chain.insert(3, Device::new(shift(1, 0), &context)).is_err());
    }

    #[test]
    fn test_clone_is_deep() {
        let (chain, _rx) = wired(ChainParams::with_devices(vec![shift(1, 0)]));
        chain.set_name("Lead");
        let copy = chain.clone_chain();
        assert_eq!(copy.params(), chain.params());
        assert_ne!(copy.id(), chain.id());
        assert!(!Arc::ptr_eq(&copy.device(0).unwrap(), &chain.device(0).unwrap()));
    }

    #[test]
    fn test_disabled_chain_passes_through() {
        let (chain, rx) = wired(ChainParams::with_devices(vec![shift(1, 0)]));
        chain.set_enabled(false);
        chain.enter(vec![Signal::new(5, Color::WHITE)]);
        assert_eq!(recv(&rx)[0].index, 5);
    }

    #[test]
    fn test_pending_echo_skips_removed_device() {
        let delay = DeviceParams::new(DeviceKindParams::Delay(DelayParams {
            time: TimeValue::free(80),
            ..Default::default()
        }));
        let (chain, rx) = wired(ChainParams::with_devices(vec![delay, shift(1, 0), shift(0, 1)]));
        chain.enter(vec![Signal::new(0, Color::WHITE)]);
        let removed = chain.remove(1).unwrap();
        assert!(removed.is_disposed());

        let out = recv(&rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].index, 10);
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }
}
