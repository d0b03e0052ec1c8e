//! Demo project written by `padlight new`

use padlight_core::params::{
    ChokeParams, ColorStop, CopyMode, CopyParams, FadeKind, FadeParams, FadePlayback, GroupParams, HoldMode, HoldParams,
    KeyFilterParams, LayerParams, MultiMode, MultiParams, PaintParams,
};
use padlight_core::{
    ChainParams, Color, DeviceKindParams, DeviceParams, Offset, PadSet, ProjectParams, StepLength, TimeValue,
    TrackParams,
};

fn device(kind: DeviceKindParams) -> DeviceParams {
    DeviceParams::new(kind)
}

fn paint(red: u8, green: u8, blue: u8) -> DeviceParams {
    device(DeviceKindParams::Paint(PaintParams { color: Color::new(red, green, blue) }))
}

fn fade_out(time: TimeValue) -> DeviceParams {
    let mut fade = FadeParams::default();
    fade.time = time;
    fade.playback = FadePlayback::Mono;
    fade.set_stops(vec![ColorStop::new(Color::WHITE, 0.0), ColorStop::new(Color::OFF, 1.0)]);
    fade.set_kind(0, FadeKind::Smooth);
    device(DeviceKindParams::Fade(fade))
}

/// Lower half: a cross that sweeps outward and fades.
fn ripple() -> ChainParams {
    let mut copy = CopyParams::default();
    copy.mode = CopyMode::Animate;
    copy.rate = TimeValue::Steps(StepLength::ThirtySecond);
    for offset in [Offset::new(1, 0), Offset::new(1, 0), Offset::new(1, 0)] {
        copy.add_offset(offset, 0);
    }
    let mut chain = ChainParams::with_devices(vec![
        device(DeviceKindParams::Copy(copy)),
        fade_out(TimeValue::Steps(StepLength::Eighth)),
    ]);
    chain.name = "Ripple".into();
    chain.filter = (0..50).collect::<PadSet>();
    chain
}

/// Upper half: each press picks the next color, held pads choke each other.
fn stabs() -> ChainParams {
    let branches = [(63, 0, 0), (0, 63, 0), (0, 0, 63), (63, 40, 0)]
        .into_iter()
        .map(|(r, g, b)| ChainParams::with_devices(vec![paint(r, g, b)]))
        .collect();
    let multi = device(DeviceKindParams::Multi(MultiParams {
        mode: MultiMode::Forward,
        preprocess: ChainParams::default(),
        chains: branches,
    }));
    let hold = device(DeviceKindParams::Hold(HoldParams {
        time: TimeValue::Steps(StepLength::Quarter),
        mode: HoldMode::Minimum,
        ..Default::default()
    }));
    let choke = device(DeviceKindParams::Choke(ChokeParams {
        target: 1,
        chain: ChainParams::with_devices(vec![multi, hold]),
    }));
    let layer = device(DeviceKindParams::Layer(LayerParams { target: 1, ..Default::default() }));
    let mut chain = ChainParams::with_devices(vec![choke, layer]);
    chain.name = "Stabs".into();
    chain.filter = (50..100).collect::<PadSet>();
    chain
}

pub fn demo_project(bpm: u32) -> ProjectParams {
    let filter = device(DeviceKindParams::KeyFilter(KeyFilterParams { pads: (1..99).collect::<PadSet>() }));
    let group = device(DeviceKindParams::Group(GroupParams { chains: vec![ripple(), stabs()] }));
    let mut params = ProjectParams {
        bpm,
        tracks: vec![TrackParams { name: "Demo".into(), chain: ChainParams::with_devices(vec![filter, group]) }],
        ..Default::default()
    };
    params.sanitize();
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_round_trips_through_json() {
        let params = demo_project(128);
        let json = params.to_json().unwrap();
        assert_eq!(ProjectParams::from_json(&json).unwrap(), params);
    }
}
