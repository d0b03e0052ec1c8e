//! Path-addressed undo/redo history
//!
//! Entries never hold live nodes. Each one stores the [`Path`] of its
//! target and a plain-data [`Command`]; applying it re-resolves the path
//! against the current tree, so entries survive nodes being rebuilt by
//! earlier undo/redo steps. Removals keep a parameter snapshot of the
//! removed subtree, which owns no timers and needs no disposal when the
//! entry is truncated away.

use std::fmt;
use std::sync::Arc;

use padlight_core::{ChainParams, DeviceParams, PadSet, PadlightError, Path, TrackParams};
use thiserror::Error;
use tracing::{debug, error};

use crate::chain::Chain;
use crate::device::Device;
use crate::project::{resolve_chain, resolve_device, Project};

#[derive(Debug, Error)]
pub enum UndoError {
    #[error("Path {0} does not resolve to a {1}")]
    Dangling(Path, &'static str),
    #[error("Device at {0} rejected the change")]
    Rejected(Path),
    #[error(transparent)]
    Tree(#[from] PadlightError),
}

/// One reversible edit, as plain data.
///
/// The path addresses a device for `SetDeviceParams`, `SetEnabled` and the
/// branch commands, a chain for the device-list commands and the
/// `SetChain*` commands, and is ignored for track and tempo commands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetDeviceParams { before: DeviceParams, after: DeviceParams },
    SetEnabled { before: bool, after: bool },
    InsertDevice { index: usize, device: DeviceParams },
    RemoveDevice { index: usize, device: DeviceParams },
    MoveDevice { from: usize, to: usize },
    InsertBranch { index: usize, chain: ChainParams },
    RemoveBranch { index: usize, chain: ChainParams },
    SetChainName { before: String, after: String },
    SetChainEnabled { before: bool, after: bool },
    SetChainFilter { before: PadSet, after: PadSet },
    InsertTrack { index: usize, track: TrackParams },
    RemoveTrack { index: usize, track: TrackParams },
    MoveTrack { from: usize, to: usize },
    SetBpm { before: u32, after: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

impl Command {
    fn apply(&self, project: &mut Project, path: &Path, direction: Direction) -> Result<(), UndoError> {
        let forward = direction == Direction::Forward;
        match self {
            Command::SetDeviceParams { before, after } => {
                let device = device_at(project, path)?;
                if !device.set_params(pick(forward, before, after).clone()) {
                    return Err(UndoError::Rejected(path.clone()));
                }
            }
            Command::SetEnabled { before, after } => {
                device_at(project, path)?.set_enabled(*pick(forward, before, after));
            }
            Command::InsertDevice { index, device } => {
                toggle_device(project, path, *index, device, forward)?;
            }
            Command::RemoveDevice { index, device } => {
                toggle_device(project, path, *index, device, !forward)?;
            }
            Command::MoveDevice { from, to } => {
                let (from, to) = if forward { (*from, *to) } else { (*to, *from) };
                chain_at(project, path)?.move_device(from, to)?;
            }
            Command::InsertBranch { index, chain } => {
                toggle_branch(project, path, *index, chain, forward)?;
            }
            Command::RemoveBranch { index, chain } => {
                toggle_branch(project, path, *index, chain, !forward)?;
            }
            Command::SetChainName { before, after } => {
                chain_at(project, path)?.set_name(pick(forward, before, after).clone());
            }
            Command::SetChainEnabled { before, after } => {
                chain_at(project, path)?.set_enabled(*pick(forward, before, after));
            }
            Command::SetChainFilter { before, after } => {
                chain_at(project, path)?.set_filter(pick(forward, before, after).clone());
            }
            Command::InsertTrack { index, track } => {
                toggle_track(project, *index, track, forward)?;
            }
            Command::RemoveTrack { index, track } => {
                toggle_track(project, *index, track, !forward)?;
            }
            Command::MoveTrack { from, to } => {
                let (from, to) = if forward { (*from, *to) } else { (*to, *from) };
                project.move_track(from, to)?;
            }
            Command::SetBpm { before, after } => project.set_bpm(*pick(forward, before, after)),
        }
        Ok(())
    }
}

fn pick<T>(forward: bool, before: T, after: T) -> T {
    if forward { after } else { before }
}

fn device_at(project: &Project, path: &Path) -> Result<Arc<Device>, UndoError> {
    resolve_device(project, path).ok_or_else(|| UndoError::Dangling(path.clone(), "device"))
}

fn chain_at(project: &Project, path: &Path) -> Result<Arc<Chain>, UndoError> {
    resolve_chain(project, path).ok_or_else(|| UndoError::Dangling(path.clone(), "chain"))
}

fn toggle_device(
    project: &Project,
    path: &Path,
    index: usize,
    params: &DeviceParams,
    insert: bool,
) -> Result<(), UndoError> {
    let chain = chain_at(project, path)?;
    if insert {
        chain.insert(index, Device::new(params.clone(), chain.context()))?;
    } else {
        chain.remove(index)?;
    }
    Ok(())
}

fn toggle_branch(
    project: &Project,
    path: &Path,
    index: usize,
    params: &ChainParams,
    insert: bool,
) -> Result<(), UndoError> {
    let device = device_at(project, path)?;
    let applied = if insert {
        device.insert_branch(index, Chain::from_params(params, project.context()))
    } else {
        device.remove_branch(index).is_some()
    };
    if applied { Ok(()) } else { Err(UndoError::Rejected(path.clone())) }
}

fn toggle_track(project: &mut Project, index: usize, params: &TrackParams, insert: bool) -> Result<(), UndoError> {
    if insert {
        project.insert_track_params(index, params)?;
    } else {
        project.remove_track(index)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    pub description: String,
    pub path: Path,
    pub command: Command,
}

impl UndoEntry {
    pub fn new(description: impl Into<String>, path: Path, command: Command) -> Self {
        Self { description: description.into(), path, command }
    }

    /// Replace the parameters of the device at `path`, capturing the current ones.
    pub fn set_device_params(project: &Project, path: Path, after: DeviceParams) -> Option<Self> {
        let device = resolve_device(project, &path)?;
        let description = format!("{} changed", device.name());
        Some(Self::new(description, path, Command::SetDeviceParams { before: device.params(), after }))
    }

    pub fn set_enabled(project: &Project, path: Path, after: bool) -> Option<Self> {
        let device = resolve_device(project, &path)?;
        let verb = if after { "enabled" } else { "disabled" };
        let description = format!("{} {verb}", device.name());
        Some(Self::new(description, path, Command::SetEnabled { before: device.is_enabled(), after }))
    }

    pub fn insert_device(path: Path, index: usize, device: DeviceParams) -> Self {
        let description = format!("{} added", device.name());
        Self::new(description, path, Command::InsertDevice { index, device })
    }

    /// Remove device `index` of the chain at `path`, snapshotting it.
    pub fn remove_device(project: &Project, path: Path, index: usize) -> Option<Self> {
        let device = resolve_chain(project, &path)?.device(index)?.params();
        let description = format!("{} removed", device.name());
        Some(Self::new(description, path, Command::RemoveDevice { index, device }))
    }

    pub fn move_device(path: Path, from: usize, to: usize) -> Self {
        Self::new("Device moved", path, Command::MoveDevice { from, to })
    }

    pub fn insert_branch(path: Path, index: usize, chain: ChainParams) -> Self {
        Self::new("Branch added", path, Command::InsertBranch { index, chain })
    }

    pub fn remove_branch(project: &Project, path: Path, index: usize) -> Option<Self> {
        let chain = resolve_device(project, &path)?.branches().get(index)?.params();
        Some(Self::new("Branch removed", path, Command::RemoveBranch { index, chain }))
    }

    pub fn set_chain_name(project: &Project, path: Path, after: impl Into<String>) -> Option<Self> {
        let before = resolve_chain(project, &path)?.name();
        let after = after.into();
        let description = format!("Renamed to {after}");
        Some(Self::new(description, path, Command::SetChainName { before, after }))
    }

    pub fn set_chain_enabled(project: &Project, path: Path, after: bool) -> Option<Self> {
        let chain = resolve_chain(project, &path)?;
        let verb = if after { "enabled" } else { "disabled" };
        let description = format!("Chain {} {verb}", chain.name());
        Some(Self::new(description, path, Command::SetChainEnabled { before: chain.is_enabled(), after }))
    }

    /// Replace the pad filter of the chain at `path`, capturing the current one.
    pub fn set_chain_filter(project: &Project, path: Path, after: PadSet) -> Option<Self> {
        let before = resolve_chain(project, &path)?.filter();
        Some(Self::new("Filter changed", path, Command::SetChainFilter { before, after }))
    }

    pub fn insert_track(index: usize, track: TrackParams) -> Self {
        Self::new(format!("Track {} added", track.name), Path::root(), Command::InsertTrack { index, track })
    }

    pub fn remove_track(project: &Project, index: usize) -> Option<Self> {
        let track = project.track(index)?.params();
        let description = format!("Track {} removed", track.name);
        Some(Self::new(description, Path::root(), Command::RemoveTrack { index, track }))
    }

    pub fn move_track(from: usize, to: usize) -> Self {
        Self::new("Track moved", Path::root(), Command::MoveTrack { from, to })
    }

    pub fn set_bpm(project: &Project, after: u32) -> Self {
        let before = project.bpm();
        Self::new(format!("Tempo {after}"), Path::root(), Command::SetBpm { before, after })
    }
}

impl fmt::Display for UndoEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description, self.path)
    }
}

/// Linear history with a cursor: `position` entries are applied.
#[derive(Debug)]
pub struct UndoManager {
    history: Vec<UndoEntry>,
    position: usize,
    saved: Option<usize>,
    limit: Option<usize>,
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoManager {
    pub fn new() -> Self {
        Self { history: Vec::new(), position: 0, saved: Some(0), limit: None }
    }

    /// Keep at most `limit` entries, dropping the oldest.
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit.max(1)), ..Self::new() }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn history(&self) -> &[UndoEntry] {
        &self.history
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn can_undo(&self) -> bool {
        self.position > 0
    }

    pub fn can_redo(&self) -> bool {
        self.position < self.history.len()
    }

    /// Record an edit that has already been applied.
    pub fn add(&mut self, entry: UndoEntry) {
        if self.saved.is_some_and(|s| s > self.position) {
            self.saved = None;
        }
        self.history.truncate(self.position);
        debug!(entry = %entry, "Undo entry added");
        self.history.push(entry);
        self.position += 1;

        if let Some(limit) = self.limit {
            let excess = self.history.len().saturating_sub(limit);
            if excess > 0 {
                self.history.drain(..excess);
                self.position -= excess;
                self.saved = self.saved.and_then(|s| s.checked_sub(excess));
            }
        }
    }

    /// Apply `entry` to `project`, recording it only if it succeeds.
    pub fn add_and_execute(&mut self, project: &mut Project, entry: UndoEntry) -> Result<(), UndoError> {
        entry.command.apply(project, &entry.path, Direction::Forward)?;
        self.add(entry);
        Ok(())
    }

    /// Step back one entry. Returns false at the start of history.
    pub fn undo(&mut self, project: &mut Project) -> bool {
        if self.position == 0 {
            return false;
        }
        self.position -= 1;
        replay(project, &self.history[self.position], Direction::Backward);
        true
    }

    /// Step forward one entry. Returns false at the end of history.
    pub fn redo(&mut self, project: &mut Project) -> bool {
        if self.position >= self.history.len() {
            return false;
        }
        replay(project, &self.history[self.position], Direction::Forward);
        self.position += 1;
        true
    }

    /// Undo or redo until `position` entries are applied.
    pub fn select(&mut self, project: &mut Project, position: usize) {
        let position = position.min(self.history.len());
        while self.position > position && self.undo(project) {}
        while self.position < position && self.redo(project) {}
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.position = 0;
        self.saved = Some(0);
    }

    pub fn mark_saved(&mut self) {
        self.saved = Some(self.position);
    }

    pub fn is_dirty(&self) -> bool {
        self.saved != Some(self.position)
    }
}

/// A recorded entry that no longer applies means a structural edit was
/// made without its matching entry.
fn replay(project: &mut Project, entry: &UndoEntry, direction: Direction) {
    if let Err(err) = entry.command.apply(project, &entry.path, direction) {
        error!(entry = %entry, ?direction, %err, "Undo history does not match the project");
        debug_assert!(false, "undo entry {entry} failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use padlight_core::params::{DelayParams, GroupParams};
    use padlight_core::{DeviceKindParams, ProjectParams, TimeValue};

    use crate::context::Context;

    use super::*;

    fn delay(ms: u32) -> DeviceParams {
        DeviceParams::new(DeviceKindParams::Delay(DelayParams { time: TimeValue::free(ms), ..Default::default() }))
    }

    fn project() -> Project {
        let group = DeviceParams::new(DeviceKindParams::Group(GroupParams {
            chains: vec![ChainParams::with_devices(vec![delay(10)])],
        }));
        Project::from_params(
            &ProjectParams {
                tracks: vec![TrackParams {
                    chain: ChainParams::with_devices(vec![delay(1), group]),
                    ..Default::default()
                }],
                ..Default::default()
            },
            &Context::standalone(),
        )
    }

    #[test]
    fn test_cursor_and_truncation() {
        let mut project = project();
        let mut undo = UndoManager::new();
        assert!(!undo.undo(&mut project));
        for ms in [5, 6, 7] {
            let entry = UndoEntry::insert_device(Path::track(0), 0, delay(ms));
            undo.add_and_execute(&mut project, entry).unwrap();
        }
        assert_eq!(project.track(0).unwrap().chain().len(), 5);
        assert!(undo.undo(&mut project));
        assert!(undo.undo(&mut project));
        assert_eq!(undo.position(), 1);

        let entry = UndoEntry::set_bpm(&project, 90);

        undo.add_and_execute(&mut project, entry).unwrap();
        assert_eq!(undo.history().len(), 2);
        assert!(!undo.redo(&mut project));
        assert_eq!(project.bpm(), 90);
    }

    #[test]
    fn test_entry_survives_rebuilt_nodes() {
        let mut project = project();
        let mut undo = UndoManager::new();
        let inner = Path::from(vec![0, 1, 0, 0]);

        let after = delay(99);
        let entry = UndoEntry::set_device_params(&project, inner.clone(), after.clone()).unwrap();
        undo.add_and_execute(&mut project, entry).unwrap();

        // Removing and restoring the group rebuilds the targeted device.
        let remove = UndoEntry::remove_device(&project, Path::track(0), 1).unwrap();
        undo.add_and_execute(&mut project, remove).unwrap();
        undo.undo(&mut project);
        undo.undo(&mut project);
        assert_eq!(resolve_device(&project, &inner).unwrap().params(), delay(10));
        undo.redo(&mut project);
        assert_eq!(resolve_device(&project, &inner).unwrap().params(), after);
    }

    #[test]
    fn test_branch_and_name_commands() {
        let mut project = project();
        let mut undo = UndoManager::new();
        let group = Path::from(vec![0, 1]);
        let before = project.params();

        undo.add_and_execute(&mut project, UndoEntry::insert_branch(group.clone(), 1, ChainParams::default()))
            .unwrap();
        let rename = UndoEntry::set_chain_name(&project, group.child(1), "second").unwrap();
        undo.add_and_execute(&mut project, rename).unwrap();
        let remove = UndoEntry::remove_branch(&project, group.clone(), 0).unwrap();
        undo.add_and_execute(&mut project, remove).unwrap();
        assert_eq!(resolve_chain(&project, &group.child(0)).unwrap().name(), "second");

        undo.select(&mut project, 0);
        assert_eq!(project.params(), before);
    }

    #[test]
    fn test_failed_execute_is_not_recorded() {
        let mut project = project();
        let mut undo = UndoManager::new();
        let entry = UndoEntry::insert_device(Path::track(0), 9, delay(1));
        assert!(matches!(undo.add_and_execute(&mut project, entry), Err(UndoError::Tree(_))));
        let entry = UndoEntry::move_device(Path::from(vec![4]), 0, 1);
        assert!(matches!(undo.add_and_execute(&mut project, entry), Err(UndoError::Dangling(..))));
        assert!(undo.history().is_empty());
    }

    #[test]
    fn test_dirty_tracking() {
        let mut project = project();
        let mut undo = UndoManager::new();
        assert!(!undo.is_dirty());
        let entry = UndoEntry::set_bpm(&project, 100);
        undo.add_and_execute(&mut project, entry).unwrap();
        assert!(undo.is_dirty());
        undo.mark_saved();
        assert!(!undo.is_dirty());
        undo.undo(&mut project);
        assert!(undo.is_dirty());
        undo.redo(&mut project);
        assert!(!undo.is_dirty());

        // The saved state is unreachable once its entry is truncated away.
        undo.undo(&mut project);
        let entry = UndoEntry::set_bpm(&project, 110);
        undo.add_and_execute(&mut project, entry).unwrap();
        undo.undo(&mut project);
        assert!(undo.is_dirty());
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut project = project();
        let mut undo = UndoManager::with_limit(2);
        for bpm in [100, 110, 120] {
            let entry = UndoEntry::set_bpm(&project, bpm);
            undo.add_and_execute(&mut project, entry).unwrap();
        }
        assert_eq!(undo.history().len(), 2);
        undo.select(&mut project, 0);
        assert_eq!(project.bpm(), 100);
        assert!(undo.is_dirty());
    }

    #[test]
    fn test_track_commands() {
        let mut project = project();
        let mut undo = UndoManager::new();
        let remove = UndoEntry::remove_track(&project, 0).unwrap();
        undo.add_and_execute(&mut project, remove).unwrap();
        assert!(project.is_empty());
        undo.add_and_execute(&mut project, UndoEntry::insert_track(0, TrackParams::default())).unwrap();
        undo.undo(&mut project);
        undo.undo(&mut project);
        assert_eq!(project.len(), 1);
        assert_eq!(project.track(0).unwrap().chain().len(), 2);
    }

    #[test]
    fn test_chain_enabled_and_filter_commands() {
        let mut project = project();
        let mut undo = UndoManager::new();
        let branch = Path::from(vec![0, 1, 0]);
        let mut filter = PadSet::new();
        filter.insert(11);
        filter.insert(12);

        let disable = UndoEntry::set_chain_enabled(&project, branch.clone(), false).unwrap();
        undo.add_and_execute(&mut project, disable).unwrap();
        let narrow = UndoEntry::set_chain_filter(&project, branch.clone(), filter.clone()).unwrap();
        undo.add_and_execute(&mut project, narrow).unwrap();
        let chain = resolve_chain(&project, &branch).unwrap();
        assert!(!chain.is_enabled());
        assert!(chain.accepts(12) && !chain.accepts(13));

        undo.undo(&mut project);
        assert!(chain.accepts(13));
        undo.undo(&mut project);
        assert!(chain.is_enabled());
        undo.select(&mut project, 2);
        assert_eq!(chain.filter(), filter);
        assert!(!chain.is_enabled());
    }

    #[test]
    fn test_move_track_command() {
        let mut project = project();
        let mut undo = UndoManager::new();
        let second = TrackParams { name: "second".into(), ..Default::default() };
        undo.add_and_execute(&mut project, UndoEntry::insert_track(1, second)).unwrap();
        undo.add_and_execute(&mut project, UndoEntry::move_track(1, 0)).unwrap();
        assert_eq!(project.track(0).unwrap().name(), "second");

        undo.undo(&mut project);
        assert_eq!(project.track(1).unwrap().name(), "second");
        assert_eq!(project.track(0).unwrap().chain().len(), 2);

        let entry = UndoEntry::move_track(0, 5);
        assert!(matches!(undo.add_and_execute(&mut project, entry), Err(UndoError::Tree(_))));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "undo entry")]
    fn test_dangling_replay_asserts() {
        let mut project = project();
        let mut undo = UndoManager::new();
        undo.add(UndoEntry::move_device(Path::from(vec![3]), 0, 1));
        undo.undo(&mut project);
    }
}
