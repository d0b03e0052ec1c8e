//! padlight-services: Courier scheduler, device graph, tracks and undo

pub mod chain;
pub mod context;
pub mod controller;
pub mod courier;
pub mod device;
pub mod project;
pub mod track;
pub mod undo;

pub use chain::{Chain, ChainId};
pub use context::{Context, DEFAULT_BPM};
pub use controller::{Controller, Frame, Screen, VirtualController, FRAME_HISTORY};
pub use courier::{Courier, GroupId, Scheduler, TaskHandle, Timers};
pub use device::{Device, DeviceId, Outlet};
pub use project::{find_path, resolve_chain, resolve_device, traverse_path, Node, Project};
pub use track::Track;
pub use undo::{Command, UndoEntry, UndoError, UndoManager};
