//! Tracks: a root chain between a controller's input and its screen

use std::sync::{Arc, RwLock};

use padlight_core::{ControllerId, Signal, TrackParams};
use tracing::{debug, info};

use crate::chain::Chain;
use crate::context::Context;
use crate::controller::{deliver, Controller, Screen};
use crate::device::{read, write};

type Output = Arc<RwLock<Option<Arc<dyn Controller>>>>;

pub struct Track {
    name: RwLock<String>,
    chain: Arc<Chain>,
    screen: Arc<Screen>,
    output: Output,
    context: Arc<Context>,
}

impl Track {
    pub fn new(name: impl Into<String>, context: &Arc<Context>) -> Arc<Self> {
        Self::from_params(&TrackParams { name: name.into(), ..Default::default() }, context)
    }

    pub fn from_params(params: &TrackParams, context: &Arc<Context>) -> Arc<Self> {
        let chain = Chain::from_params(&params.chain, context);
        let screen = Arc::new(Screen::new());
        let output: Output = Arc::new(RwLock::new(None));

        let (to_screen, to_output) = (screen.clone(), output.clone());
        chain.outlet().connect(move |signals| {
            let controller = read(&to_output).clone();
            let target = controller.as_ref().map(|c| c.id());
            for signal in signals.iter().filter(|s| s.target.is_none() || s.target == target) {
                deliver(controller.as_deref(), to_screen.apply(signal));
            }
        });

        Arc::new(Self {
            name: RwLock::new(params.name.clone()),
            chain,
            screen,
            output,
            context: context.clone(),
        })
    }

    pub fn name(&self) -> String {
        read(&self.name).clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *write(&self.name) = name.into();
    }

    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn controller(&self) -> Option<Arc<dyn Controller>> {
        read(&self.output).clone()
    }

    /// Attach a controller. The previous one is blanked first.
    pub fn set_controller(&self, controller: Option<Arc<dyn Controller>>) {
        let mut output = write(&self.output);
        deliver(output.as_deref(), self.screen.clear());
        if let Some(controller) = &controller {
            info!(track = %self.name(), controller = controller.name(), "Controller attached");
        }
        *output = controller;
    }

    /// Entry point for pad input from this track's controller.
    pub fn on_input(&self, mut signal: Signal) {
        signal.macros = self.context.macros().snapshot();
        if signal.source.is_none() {
            signal.source = read(&self.output).as_ref().map(|c| c.id());
        }
        self.chain.enter(vec![signal]);
    }

    /// Convenience for a press or release of `index` from `source`.
    pub fn press(&self, index: u8, color: padlight_core::Color, source: Option<ControllerId>) {
        let mut signal = Signal::new(index, color);
        signal.source = source;
        self.on_input(signal);
    }

    pub fn params(&self) -> TrackParams {
        TrackParams { name: self.name(), chain: self.chain.params() }
    }

    pub fn dispose(&self) {
        self.chain.dispose();
        deliver(read(&self.output).as_deref(), self.screen.clear());
        debug!(track = %self.name(), "Track disposed");
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track").field("name", &self.name()).field("devices", &self.chain.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use padlight_core::params::{MacroFilterParams, PaintParams};
    use padlight_core::{ChainParams, Color, DeviceKindParams, DeviceParams};

    use crate::controller::VirtualController;

    use super::*;

    fn track_with(devices: Vec<DeviceParams>) -> (Arc<Track>, Arc<VirtualController>) {
        let context = Context::standalone();
        let track = Track::from_params(
            &TrackParams { name: "t".into(), chain: ChainParams::with_devices(devices) },
            &context,
        );
        let controller = Arc::new(VirtualController::new(ControllerId(7), "virtual"));
        track.set_controller(Some(controller.clone()));
        (track, controller)
    }

    #[test]
    fn test_input_reaches_controller() {
        let red = Color::new(63, 0, 0);
        let (track, controller) =
            track_with(vec![DeviceParams::new(DeviceKindParams::Paint(PaintParams { color: red }))]);
        track.press(12, Color::WHITE, None);
        assert_eq!(controller.pad(12), red);
        track.press(12, Color::OFF, None);
        assert_eq!(controller.pad(12), Color::OFF);
        assert_eq!(controller.frames().len(), 2);
    }

    #[test]
    fn test_macros_stamped_on_input() {
        let (track, controller) = track_with(vec![DeviceParams::new(DeviceKindParams::MacroFilter(
            MacroFilterParams { slot: 0, values: [3].into_iter().collect() },
        ))]);
        track.press(1, Color::WHITE, None);
        assert!(controller.lit_pads().is_empty());
        track.context.macros().set(0, 3);
        track.press(1, Color::WHITE, None);
        assert_eq!(controller.lit_pads(), vec![1]);
    }

    #[test]
    fn test_signal_for_other_controller_skipped() {
        let (track, controller) = track_with(Vec::new());
        let mut signal = Signal::new(4, Color::WHITE);
        signal.target = Some(ControllerId(99));
        track.on_input(signal);
        assert!(controller.frames().is_empty());
    }

    #[test]
    fn test_dispose_blanks_controller() {
        let (track, controller) = track_with(Vec::new());
        track.press(4, Color::WHITE, None);
        track.dispose();
        assert_eq!(controller.pad(4), Color::OFF);
        assert!(track.chain().is_disposed());
    }
}
