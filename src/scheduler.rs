//! The microtask-coalesced scheduler.
//!
//! Writes to a [`Source`](crate::source::Source) mark direct observers dirty immediately and
//! enqueue them here. Nothing is recomputed at enqueue time: derivations are recomputed lazily,
//! the next time something reads them (pull-on-read); the scheduler's job is only to guarantee
//! that nodes nobody reads directly — chiefly [`effect`](crate::effect::effect) bodies — still
//! get a chance to run, once per coalesced batch of writes.

use std::cell::{Cell, RefCell};

use indexmap::IndexSet;

use crate::node::NodeId;
use crate::root::Root;

type Spawner = Box<dyn Fn(Box<dyn FnOnce()>)>;

thread_local! {
    static MICROTASK_SPAWNER: RefCell<Option<Spawner>> = const { RefCell::new(None) };
}

/// Registers the host's microtask primitive. Once set, `enqueue` schedules a flush on it
/// whenever the pending set transitions from empty to non-empty. Without a registered spawner,
/// enqueued work still accumulates but is only drained by an explicit [`tick`](crate::tick) or
/// [`Scheduler::flush`] call — the mode every test in this crate runs in.
pub fn set_microtask_spawner(spawner: impl Fn(Box<dyn FnOnce()>) + 'static) {
    MICROTASK_SPAWNER.with(|s| *s.borrow_mut() = Some(Box::new(spawner)));
}

/// Clears a previously registered microtask spawner.
pub fn clear_microtask_spawner() {
    MICROTASK_SPAWNER.with(|s| *s.borrow_mut() = None);
}

fn spawn_flush(root: &'static Root) {
    MICROTASK_SPAWNER.with(|s| {
        if let Some(spawner) = s.borrow().as_ref() {
            spawner(Box::new(move || {
                root.scheduler.flush(root);
            }));
        }
    });
}

/// Scheduler-private state, owned by [`Root`].
pub(crate) struct SchedulerState {
    pending: RefCell<IndexSet<NodeId>>,
    flush_scheduled: Cell<bool>,
    tick: Cell<u64>,
    served: RefCell<IndexSet<NodeId>>,
    on_flush_hooks: RefCell<Vec<Box<dyn FnMut()>>>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            pending: RefCell::new(IndexSet::new()),
            flush_scheduled: Cell::new(false),
            tick: Cell::new(0),
            served: RefCell::new(IndexSet::new()),
            on_flush_hooks: RefCell::new(Vec::new()),
        }
    }
}

impl SchedulerState {
    /// Adds `node` to the pending set, preserving first-insertion order and deduplicating
    /// repeated enqueues within the same coalescing window. Schedules a flush on the host
    /// microtask queue if one isn't already pending.
    pub fn enqueue(&self, root: &'static Root, node: NodeId) {
        self.pending.borrow_mut().insert(node);
        if root.batching.get() {
            return;
        }
        if !self.flush_scheduled.replace(true) {
            spawn_flush(root);
        }
    }

    /// Synchronously drains the pending set, in enqueue order. Nodes enqueued while draining
    /// (because a recomputation notified further observers) are processed within this same
    /// flush. Returns the tick counter after the flush.
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self, root)))]
    pub fn flush(&self, root: &'static Root) -> u64 {
        self.flush_scheduled.set(false);
        self.tick.set(self.tick.get() + 1);
        self.served.borrow_mut().clear();
        loop {
            let next = {
                let mut pending = self.pending.borrow_mut();
                pending.shift_remove_index(0)
            };
            let Some(node) = next else { break };
            self.served.borrow_mut().insert(node);
            root.ensure_fresh(node);
        }
        for hook in self.on_flush_hooks.borrow_mut().iter_mut() {
            hook();
        }
        self.tick.get()
    }

    /// Whether `node` was enqueued in the current or most recently completed flush.
    pub fn served(&self, node: NodeId) -> bool {
        self.served.borrow().contains(&node)
    }

    /// Registers a hook run after every flush completes.
    pub fn on_flush(&self, hook: impl FnMut() + 'static) {
        self.on_flush_hooks.borrow_mut().push(Box::new(hook));
    }

    pub fn current_tick(&self) -> u64 {
        self.tick.get()
    }

    /// Whether the pending set is empty. Exposed for tests of §8's "after `tick()` completes, the
    /// pending set is empty" invariant; ordinary callers don't need it.
    pub fn is_idle(&self) -> bool {
        self.pending.borrow().is_empty()
    }
}

/// A handle to the scheduler of the current root. Obtained via
/// [`get_scheduler`](crate::get_scheduler).
#[derive(Clone, Copy)]
pub struct Scheduler {
    pub(crate) root: &'static Root,
}

impl Scheduler {
    /// Adds `node` to the pending set. Exposed for advanced use; normal code never needs to call
    /// this directly, sources and derivations do it themselves on write/invalidation.
    pub(crate) fn enqueue(&self, node: NodeId) {
        self.root.scheduler.enqueue(self.root, node);
    }

    /// Synchronously flushes the pending set and returns the resulting tick counter.
    pub fn flush(&self) -> u64 {
        self.root.scheduler.flush(self.root)
    }

    /// Synchronous flush, returning the tick counter. Callers typically await this so the host
    /// has also drained its own microtask queue before continuing; the runtime itself performs
    /// the flush synchronously since it has no asynchrony of its own.
    pub fn tick(&self) -> u64 {
        self.flush()
    }

    /// Whether `node` was enqueued in the current or most recently completed flush.
    pub fn served(&self, node: NodeId) -> bool {
        self.root.scheduler.served(node)
    }

    /// Registers a post-flush hook.
    pub fn on_flush(&self, hook: impl FnMut() + 'static) {
        self.root.scheduler.on_flush(hook);
    }

    /// Whether the pending set is currently empty.
    pub fn is_idle(&self) -> bool {
        self.root.scheduler.is_idle()
    }
}

/// Accesses the scheduler of the current root.
pub fn get_scheduler() -> Scheduler {
    Scheduler {
        root: Root::global(),
    }
}

/// Synchronously flushes the scheduler's pending set and returns the resulting tick counter.
pub fn tick() -> u64 {
    get_scheduler().tick()
}

/// Suppresses flush-on-enqueue for the duration of `f`, then flushes once when `f` returns. The
/// scheduler is already microtask-coalescing on its own; `batch` is a *synchronous* escape hatch
/// for callers that cannot wait for the host's next microtask to see the coalesced result. Not
/// reentrant: a nested `batch` call flushes (and un-batches) as soon as its own closure returns.
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    let root = Root::global();
    root.start_batch();
    let ret = f();
    root.end_batch();
    ret
}
