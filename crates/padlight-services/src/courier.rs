//! Courier: cancellable one-shot and repeating delayed callbacks
//!
//! A single timer thread owns a heap of deadlines. Tasks live in a slot
//! arena addressed by `(slot, generation)` handles, so a stale handle can
//! never cancel or observe a newer task that reused its slot. Callbacks run
//! on the timer thread with the arena unlocked.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, trace};

pub type Callback = Box<dyn FnMut() + Send + 'static>;

/// Handle to a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    slot: usize,
    generation: u64,
}

/// Identifies a set of tasks that are cancelled together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(u64);

enum SlotState {
    Free,
    Pending {
        callback: Callback,
        group: Option<GroupId>,
        interval: Option<Duration>,
        deadline: Instant,
    },
    Firing {
        thread: ThreadId,
        group: Option<GroupId>,
        interval: Option<Duration>,
        deadline: Instant,
        cancelled: bool,
    },
}

struct Slot {
    generation: u64,
    state: SlotState,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    queue: BinaryHeap<Reverse<(Instant, u64, usize, u64)>>,
    next_seq: u64,
    groups: HashMap<GroupId, HashSet<usize>>,
    stopped: bool,
}

impl Arena {
    fn allocate(&mut self) -> usize {
        if let Some(slot) = self.free.pop() {
            return slot;
        }
        self.slots.push(Slot { generation: 0, state: SlotState::Free });
        self.slots.len() - 1
    }

    fn push_deadline(&mut self, deadline: Instant, slot: usize) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let generation = self.slots[slot].generation;
        self.queue.push(Reverse((deadline, seq, slot, generation)));
    }

    /// Release a slot. The caller drops the returned callback after
    /// unlocking, since dropping it may re-enter the courier.
    fn release(&mut self, slot: usize) -> Option<Callback> {
        let entry = &mut self.slots[slot];
        let state = std::mem::replace(&mut entry.state, SlotState::Free);
        entry.generation += 1;
        self.free.push(slot);
        let (callback, group) = match state {
            SlotState::Pending { callback, group, .. } => (Some(callback), group),
            SlotState::Firing { group, .. } => (None, group),
            SlotState::Free => (None, None),
        };
        if let Some(group) = group {
            if let Some(tasks) = self.groups.get_mut(&group) {
                tasks.remove(&slot);
            }
        }
        callback
    }

    fn is_live(&self, handle: TaskHandle) -> bool {
        self.slots
            .get(handle.slot)
            .is_some_and(|s| s.generation == handle.generation && !matches!(s.state, SlotState::Free))
    }
}

struct Shared {
    arena: Mutex<Arena>,
    finished: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Control {
    Wake,
    Shutdown,
}

/// Scheduling half of the courier, cheap to clone into devices and callbacks.
///
/// Holding a `Scheduler` does not keep the timer thread alive; the thread
/// stops when the last [`Courier`] is dropped.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    control: Sender<Control>,
}

impl Scheduler {
    fn insert(
        &self,
        delay: Duration,
        interval: Option<Duration>,
        group: Option<GroupId>,
        callback: Callback,
    ) -> Option<TaskHandle> {
        let handle = {
            let mut arena = self.shared.lock();
            if arena.stopped {
                return None;
            }
            if let Some(group) = group {
                if !arena.groups.contains_key(&group) {
                    return None;
                }
            }
            let deadline = Instant::now() + delay;
            let slot = arena.allocate();
            arena.slots[slot].state = SlotState::Pending { callback, group, interval, deadline };
            if let Some(group) = group {
                arena.groups.entry(group).or_default().insert(slot);
            }
            arena.push_deadline(deadline, slot);
            TaskHandle { slot, generation: arena.slots[slot].generation }
        };
        trace!(slot = handle.slot, ?delay, "Task scheduled");
        let _ = self.control.send(Control::Wake);
        Some(handle)
    }

    /// Run `callback` once after `delay`.
    pub fn schedule(&self, delay: Duration, callback: impl FnMut() + Send + 'static) -> Option<TaskHandle> {
        self.insert(delay, None, None, Box::new(callback))
    }

    /// Run `callback` every `interval`, first after one interval.
    pub fn repeat(&self, interval: Duration, callback: impl FnMut() + Send + 'static) -> Option<TaskHandle> {
        let interval = interval.max(Duration::from_millis(1));
        self.insert(interval, Some(interval), None, Box::new(callback))
    }

    /// Cancel a task. A pending task never fires after this returns; a
    /// repeating task that is mid-callback is not re-armed. Returns whether
    /// the handle was still live.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let dropped = {
            let mut arena = self.shared.lock();
            if !arena.is_live(handle) {
                return false;
            }
            match &mut arena.slots[handle.slot].state {
                SlotState::Pending { .. } => arena.release(handle.slot),
                SlotState::Firing { cancelled, .. } => {
                    *cancelled = true;
                    None
                }
                SlotState::Free => None,
            }
        };
        drop(dropped);
        true
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.shared.lock().is_live(handle)
    }

    pub fn open_group(&self) -> GroupId {
        static NEXT_GROUP: AtomicU64 = AtomicU64::new(1);
        let id = GroupId(NEXT_GROUP.fetch_add(1, Ordering::Relaxed));
        self.shared.lock().groups.insert(id, HashSet::new());
        id
    }

    /// Cancel every task of `group` and refuse new ones. Waits for a
    /// callback of the group that is running on another thread, so once
    /// this returns no callback of the group is executing or will execute.
    pub fn close_group(&self, group: GroupId) {
        let mut dropped = Vec::new();
        let mut arena = self.shared.lock();
        let Some(slots) = arena.groups.remove(&group) else { return };
        let current = thread::current().id();
        let mut waiting: Vec<TaskHandle> = Vec::new();
        for slot in slots {
            let generation = arena.slots[slot].generation;
            if let SlotState::Firing { thread, cancelled, .. } = &mut arena.slots[slot].state {
                *cancelled = true;
                if *thread != current {
                    waiting.push(TaskHandle { slot, generation });
                }
            } else if let Some(callback) = arena.release(slot) {
                dropped.push(callback);
            }
        }
        while waiting.iter().any(|h| arena.is_live(*h)) {
            arena = self.shared.finished.wait(arena).unwrap_or_else(PoisonError::into_inner);
        }
        drop(arena);
        debug!(cancelled = dropped.len(), "Task group closed");
        drop(dropped);
    }

    pub fn group_len(&self, group: GroupId) -> usize {
        self.shared.lock().groups.get(&group).map_or(0, HashSet::len)
    }
}

/// Owner of the timer thread
#[derive(Clone)]
pub struct Courier {
    scheduler: Scheduler,
    _owner: Arc<CourierThread>,
}

struct CourierThread {
    scheduler: Scheduler,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for CourierThread {
    fn drop(&mut self) {
        let dropped: Vec<Callback> = {
            let mut arena = self.scheduler.shared.lock();
            arena.stopped = true;
            arena.queue.clear();
            arena.groups.clear();
            let live: Vec<usize> = (0..arena.slots.len()).collect();
            live.into_iter().filter_map(|slot| arena.release(slot)).collect()
        };
        drop(dropped);
        let _ = self.scheduler.control.send(Control::Shutdown);
        let handle = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        debug!("Courier stopped");
    }
}

impl Default for Courier {
    fn default() -> Self {
        Self::new()
    }
}

impl Courier {
    pub fn new() -> Self {
        let (control, rx) = unbounded();
        let shared = Arc::new(Shared { arena: Mutex::new(Arena::default()), finished: Condvar::new() });
        let scheduler = Scheduler { shared: shared.clone(), control };

        let thread = thread::Builder::new()
            .name("padlight-courier".to_string())
            .spawn(move || run(shared, rx))
            .map_err(|e| error!("Failed to spawn courier thread: {}", e))
            .ok();

        Self {
            scheduler: scheduler.clone(),
            _owner: Arc::new(CourierThread { scheduler, thread: Mutex::new(thread) }),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn schedule(&self, delay: Duration, callback: impl FnMut() + Send + 'static) -> Option<TaskHandle> {
        self.scheduler.schedule(delay, callback)
    }

    pub fn repeat(&self, interval: Duration, callback: impl FnMut() + Send + 'static) -> Option<TaskHandle> {
        self.scheduler.repeat(interval, callback)
    }

    pub fn cancel(&self, handle: TaskHandle) -> bool {
        self.scheduler.cancel(handle)
    }
}

fn run(shared: Arc<Shared>, rx: Receiver<Control>) {
    debug!("Courier thread started");
    loop {
        let timeout = {
            let mut arena = shared.lock();
            if arena.stopped {
                return;
            }
            let now = Instant::now();
            match arena.queue.peek().copied() {
                Some(Reverse((deadline, _, slot, generation))) if deadline <= now => {
                    arena.queue.pop();
                    let live = arena.is_live(TaskHandle { slot, generation });
                    let taken = if live {
                        let state = std::mem::replace(&mut arena.slots[slot].state, SlotState::Free);
                        match state {
                            SlotState::Pending { callback, group, interval, deadline } => {
                                arena.slots[slot].state = SlotState::Firing {
                                    thread: thread::current().id(),
                                    group,
                                    interval,
                                    deadline,
                                    cancelled: false,
                                };
                                Some(callback)
                            }
                            other => {
                                arena.slots[slot].state = other;
                                None
                            }
                        }
                    } else {
                        None
                    };
                    drop(arena);
                    if let Some(callback) = taken {
                        fire(&shared, slot, callback);
                    }
                    continue;
                }
                Some(Reverse((deadline, ..))) => Some(deadline - now),
                None => None,
            }
        };

        let received = match timeout {
            Some(t) => rx.recv_timeout(t),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(Control::Wake) | Err(RecvTimeoutError::Timeout) => {}
            Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn fire(shared: &Shared, slot: usize, mut callback: Callback) {
    trace!(slot, "Task firing");
    if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
        error!(slot, "Courier callback panicked");
    }

    let leftover = {
        let mut arena = shared.lock();
        let rearm = match &arena.slots[slot].state {
            SlotState::Firing { interval: Some(interval), cancelled: false, group, deadline, .. } => {
                let group_open = group.is_none_or(|g| arena.groups.contains_key(&g));
                (group_open && !arena.stopped).then_some((*interval, *group, *deadline))
            }
            _ => None,
        };
        let leftover = match rearm {
            Some((interval, group, deadline)) => {
                let next = deadline + interval;
                arena.slots[slot].state = SlotState::Pending { callback, group, interval: Some(interval), deadline: next };
                arena.push_deadline(next, slot);
                None
            }
            None => {
                arena.release(slot);
                Some(callback)
            }
        };
        shared.finished.notify_all();
        leftover
    };
    drop(leftover);
}

/// Per-device task group.
///
/// Every task a device schedules goes through its `Timers`; closing them is
/// how disposal guarantees that no callback of the device runs afterwards.
#[derive(Clone)]
pub struct Timers {
    scheduler: Scheduler,
    group: GroupId,
}

impl Timers {
    pub fn new(scheduler: &Scheduler) -> Self {
        Self { scheduler: scheduler.clone(), group: scheduler.open_group() }
    }

    pub fn schedule(&self, delay: Duration, callback: impl FnMut() + Send + 'static) -> Option<TaskHandle> {
        self.scheduler.insert(delay, None, Some(self.group), Box::new(callback))
    }

    pub fn repeat(&self, interval: Duration, callback: impl FnMut() + Send + 'static) -> Option<TaskHandle> {
        let interval = interval.max(Duration::from_millis(1));
        self.scheduler.insert(interval, Some(interval), Some(self.group), Box::new(callback))
    }

    pub fn cancel(&self, handle: TaskHandle) -> bool {
        self.scheduler.cancel(handle)
    }

    /// Number of tasks still scheduled or running.
    pub fn len(&self) -> usize {
        self.scheduler.group_len(self.group)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel everything and refuse further scheduling. Idempotent.
    pub fn close(&self) {
        self.scheduler.close_group(self.group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_schedule_fires_after_delay() {
        let courier = Courier::new();
        let (tx, rx) = unbounded();
        let start = Instant::now();
        courier.schedule(Duration::from_millis(30), move || {
            let _ = tx.send(Instant::now());
        });
        let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(fired - start >= Duration::from_millis(30));
    }

    #[test]
    fn test_cancel_prevents_fire() {
        let courier = Courier::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = courier
            .schedule(Duration::from_millis(40), move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(courier.cancel(handle));
        assert!(!courier.cancel(handle));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_equal_deadlines_fire_in_order() {
        let courier = Courier::new();
        let (tx, rx) = unbounded();
        for i in 0..20 {
            let tx = tx.clone();
            courier.schedule(Duration::from_millis(20), move || {
                let _ = tx.send(i);
            });
        }
        let order: Vec<i32> = (0..20).map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap()).collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_repeat_until_cancelled() {
        let courier = Courier::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = courier
            .repeat(Duration::from_millis(10), move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        thread::sleep(Duration::from_millis(80));
        courier.cancel(handle);
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 3);
        thread::sleep(Duration::from_millis(50));
        assert!(count.load(Ordering::SeqCst) <= after_cancel + 1);
    }

    #[test]
    fn test_closed_group_refuses_and_cancels() {
        let courier = Courier::new();
        let timers = Timers::new(courier.scheduler());
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = count.clone();
            timers.schedule(Duration::from_millis(30), move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(timers.len(), 10);
        timers.close();
        timers.close();
        assert!(timers.schedule(Duration::ZERO, || {}).is_none());
        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_close_waits_for_running_callback() {
        let courier = Courier::new();
        let timers = Timers::new(courier.scheduler());
        let (started_tx, started_rx) = unbounded();
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        timers.schedule(Duration::ZERO, move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(50));
            d.fetch_add(1, Ordering::SeqCst);
        });
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        timers.close();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_does_not_kill_thread() {
        let courier = Courier::new();
        courier.schedule(Duration::ZERO, || panic!("boom"));
        let (tx, rx) = unbounded();
        courier.schedule(Duration::from_millis(10), move || {
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
