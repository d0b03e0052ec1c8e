//! Project tree: tracks, path resolution and persistence

use std::fs;
use std::sync::Arc;

use padlight_core::{PadlightError, Path, ProjectParams, Result, TrackParams, PREPROCESS};
use tracing::{debug, info};

use crate::chain::Chain;
use crate::context::Context;
use crate::device::Device;
use crate::track::Track;

pub struct Project {
    context: Arc<Context>,
    tracks: Vec<Arc<Track>>,
}

impl Project {
    pub fn new(context: &Arc<Context>) -> Self {
        Self { context: context.clone(), tracks: Vec::new() }
    }

    pub fn from_params(params: &ProjectParams, context: &Arc<Context>) -> Self {
        let mut params = params.clone();
        params.sanitize();
        context.set_bpm(params.bpm);
        for (slot, value) in params.macros.iter().enumerate() {
            context.macros().set(slot, *value);
        }
        let tracks = params.tracks.iter().map(|t| Track::from_params(t, context)).collect();
        Self { context: context.clone(), tracks }
    }

    pub fn params(&self) -> ProjectParams {
        ProjectParams {
            bpm: self.context.bpm(),
            macros: self.context.macros().snapshot(),
            tracks: self.tracks.iter().map(|t| t.params()).collect(),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn tracks(&self) -> &[Arc<Track>] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Arc<Track>> {
        self.tracks.get(index)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn bpm(&self) -> u32 {
        self.context.bpm()
    }

    pub fn set_bpm(&self, bpm: u32) {
        self.context.set_bpm(bpm);
    }

    pub fn insert_track(&mut self, index: usize, track: Arc<Track>) -> Result<()> {
        if index > self.tracks.len() {
            return Err(PadlightError::IndexOutOfRange { index, len: self.tracks.len() });
        }
        debug!(index, name = %track.name(), "Track inserted");
        self.tracks.insert(index, track);
        Ok(())
    }

    /// Build a track from `params` and insert it.
    pub fn insert_track_params(&mut self, index: usize, params: &TrackParams) -> Result<Arc<Track>> {
        let track = Track::from_params(params, &self.context);
        self.insert_track(index, track.clone())?;
        Ok(track)
    }

    pub fn push_track(&mut self, track: Arc<Track>) {
        self.tracks.push(track);
    }

    /// Remove and dispose the track at `index`.
    pub fn remove_track(&mut self, index: usize) -> Result<Arc<Track>> {
        if index >= self.tracks.len() {
            return Err(PadlightError::IndexOutOfRange { index, len: self.tracks.len() });
        }
        let track = self.tracks.remove(index);
        track.dispose();
        debug!(index, name = %track.name(), "Track removed");
        Ok(track)
    }

    pub fn move_track(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.tracks.len();
        if from >= len || to >= len {
            return Err(PadlightError::IndexOutOfRange { index: from.max(to), len });
        }
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.params().to_json()?)?;
        info!(path = %path.display(), tracks = self.tracks.len(), "Project saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<std::path::Path>, context: &Arc<Context>) -> Result<Self> {
        let path = path.as_ref();
        let params = ProjectParams::from_json(&fs::read_to_string(path)?)?;
        info!(path = %path.display(), tracks = params.tracks.len(), "Project loaded");
        Ok(Self::from_params(&params, context))
    }

    pub fn dispose(&self) {
        for track in &self.tracks {
            track.dispose();
        }
    }
}

impl Drop for Project {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A node addressed by a [`Path`]
#[derive(Clone)]
pub enum Node {
    Project,
    Track(Arc<Track>),
    Chain(Arc<Chain>),
    Device(Arc<Device>),
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Project => write!(f, "Project"),
            Node::Track(t) => write!(f, "Track({})", t.name()),
            Node::Chain(c) => write!(f, "Chain({})", c.id()),
            Node::Device(d) => write!(f, "Device({}:{})", d.name(), d.id()),
        }
    }
}

/// Walk `path` down from the project root.
///
/// `[t]` is track `t`, `[t, d]` device `d` of its root chain, `[t, d, b]`
/// branch `b` of that device (`PREPROCESS` for a Multi's preprocess
/// chain), continuing device/branch below.
pub fn traverse_path(project: &Project, path: &Path) -> Option<Node> {
    let Some((&first, mut rest)) = path.indices().split_first() else {
        return Some(Node::Project);
    };
    let track = project.track(usize::try_from(first).ok()?)?;
    if rest.is_empty() {
        return Some(Node::Track(track.clone()));
    }
    let mut chain = track.chain().clone();
    loop {
        let (&d, tail) = rest.split_first()?;
        let device = chain.device(usize::try_from(d).ok()?)?;
        let Some((&b, tail)) = tail.split_first() else {
            return Some(Node::Device(device));
        };
        chain = device.branch(b)?;
        if tail.is_empty() {
            return Some(Node::Chain(chain));
        }
        rest = tail;
    }
}

/// Chain at `path`. A track path resolves to the track's root chain.
pub fn resolve_chain(project: &Project, path: &Path) -> Option<Arc<Chain>> {
    match traverse_path(project, path)? {
        Node::Track(track) => Some(track.chain().clone()),
        Node::Chain(chain) => Some(chain),
        _ => None,
    }
}

pub fn resolve_device(project: &Project, path: &Path) -> Option<Arc<Device>> {
    match traverse_path(project, path)? {
        Node::Device(device) => Some(device),
        _ => None,
    }
}

/// Path of `node`, found by identity.
pub fn find_path(project: &Project, node: &Node) -> Option<Path> {
    if matches!(node, Node::Project) {
        return Some(Path::root());
    }
    project.tracks().iter().enumerate().find_map(|(i, track)| {
        let path = Path::track(i);
        if matches!(node, Node::Track(t) if Arc::ptr_eq(t, track)) {
            return Some(path);
        }
        search(track.chain(), path, node)
    })
}

fn search(chain: &Arc<Chain>, path: Path, node: &Node) -> Option<Path> {
    if matches!(node, Node::Chain(c) if Arc::ptr_eq(c, chain)) {
        return Some(path);
    }
    for (i, device) in chain.devices().iter().enumerate() {
        let device_path = path.child(i as i32);
        if matches!(node, Node::Device(d) if Arc::ptr_eq(d, device)) {
            return Some(device_path);
        }
        let preprocess = device.preprocess().map(|c| (PREPROCESS, c));
        let branches = device.branches().into_iter().enumerate().map(|(b, c)| (b as i32, c));
        for (b, branch) in preprocess.into_iter().chain(branches) {
            if let Some(found) = search(&branch, device_path.child(b), node) {
                return Some(found);
            }
        }
    }
    None
}
