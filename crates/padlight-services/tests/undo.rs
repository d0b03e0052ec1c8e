//! Undo/redo round trips over a mixed edit sequence

use padlight_core::params::{DelayParams, GroupParams, MultiParams, PaintParams};
use padlight_core::{
    ChainParams, Color, DeviceKindParams, DeviceParams, Path, ProjectParams, TimeValue, TrackParams, PREPROCESS,
};
use padlight_services::{resolve_chain, Context, Project, UndoEntry, UndoManager};

fn delay(ms: u32) -> DeviceParams {
    DeviceParams::new(DeviceKindParams::Delay(DelayParams { time: TimeValue::free(ms), ..Default::default() }))
}

fn paint(red: u8) -> DeviceParams {
    DeviceParams::new(DeviceKindParams::Paint(PaintParams { color: Color::new(red, 0, 0) }))
}

fn seed() -> ProjectParams {
    let group = DeviceParams::new(DeviceKindParams::Group(GroupParams {
        chains: vec![ChainParams::with_devices(vec![delay(10), paint(1)]), ChainParams::default()],
    }));
    let multi = DeviceParams::new(DeviceKindParams::Multi(MultiParams {
        preprocess: ChainParams::with_devices(vec![paint(2)]),
        chains: vec![ChainParams::with_devices(vec![delay(20)])],
        ..Default::default()
    }));
    ProjectParams {
        tracks: vec![
            TrackParams { name: "one".into(), chain: ChainParams::with_devices(vec![group, multi]) },
            TrackParams { name: "two".into(), chain: ChainParams::with_devices(vec![delay(30)]) },
        ],
        ..Default::default()
    }
}

#[test]
fn undo_all_restores_and_redo_all_replays() {
    let mut project = Project::from_params(&seed(), &Context::standalone());
    let mut undo = UndoManager::new();
    let before = project.params();

    // Each edit addresses the tree as the previous edits left it.
    let edits: Vec<Box<dyn Fn(&Project) -> UndoEntry>> = vec![
        Box::new(|_| UndoEntry::insert_device(Path::track(1), 1, paint(9))),
        Box::new(|p| UndoEntry::set_device_params(p, Path::from(vec![0, 0, 0, 0]), delay(77)).unwrap()),
        Box::new(|p| UndoEntry::remove_device(p, Path::from(vec![0, 0, 0]), 1).unwrap()),
        Box::new(|_| UndoEntry::move_device(Path::track(0), 0, 1)),
        Box::new(|p| UndoEntry::set_enabled(p, Path::from(vec![0, 1]), false).unwrap()),
        Box::new(|_| UndoEntry::insert_device(Path::from(vec![0, 0, PREPROCESS]), 0, delay(5))),
        Box::new(|p| UndoEntry::remove_branch(p, Path::from(vec![0, 1]), 1).unwrap()),
        Box::new(|p| UndoEntry::set_chain_name(p, Path::from(vec![0, 0, 0]), "renamed").unwrap()),
        Box::new(|p| UndoEntry::remove_track(p, 1).unwrap()),
        Box::new(|_| UndoEntry::insert_track(0, TrackParams::default())),
        Box::new(|p| UndoEntry::set_bpm(p, 97)),
    ];

    for edit in &edits {
        let entry = edit(&project);
        undo.add_and_execute(&mut project, entry).unwrap();
    }
    let after = project.params();
    assert_ne!(before, after);

    for _ in 0..edits.len() {
        assert!(undo.undo(&mut project));
    }
    assert_eq!(project.params(), before);
    assert!(!undo.undo(&mut project));

    for _ in 0..edits.len() {
        assert!(undo.redo(&mut project));
    }
    assert_eq!(project.params(), after);
    assert!(!undo.redo(&mut project));

    // Jumping around the history lands on the same states.
    undo.select(&mut project, 0);
    assert_eq!(project.params(), before);
    undo.select(&mut project, edits.len());
    assert_eq!(project.params(), after);
}

#[test]
fn removed_subtree_is_rebuilt_from_its_snapshot() {
    let mut project = Project::from_params(&seed(), &Context::standalone());
    let mut undo = UndoManager::new();
    let branch = Path::from(vec![0, 0, 0]);
    let original = resolve_chain(&project, &branch).unwrap();

    let entry = UndoEntry::remove_device(&project, Path::track(0), 0).unwrap();
    undo.add_and_execute(&mut project, entry).unwrap();
    assert!(original.is_disposed());

    undo.undo(&mut project);
    let rebuilt = resolve_chain(&project, &branch).unwrap();
    assert!(!std::sync::Arc::ptr_eq(&original, &rebuilt));
    assert_eq!(rebuilt.params(), original.params());
}
