//! [`Root`]: the per-program reactive state, and the ambient tracking context.

use std::cell::{Cell, RefCell};
use std::panic::AssertUnwindSafe;

use indexmap::IndexSet;
use slotmap::{Key, SlotMap};

use crate::error::ReactiveError;
use crate::node::{Node, NodeId, NodeKind};
use crate::scheduler::SchedulerState;

/// The struct managing the state of the reactive system. One is created per call to
/// [`root`](crate::scope::root) and leaked to obtain a `&'static Root`; the `dispose` callback
/// passed into that call's body reclaims every resource allocated in it, while the leaked
/// allocation itself lives for the remaining life of the program.
pub struct Root {
    /// All nodes created in this root.
    pub(crate) nodes: RefCell<SlotMap<NodeId, Node>>,
    /// The top-level scope node. Its `scope_parent` is the null key.
    pub(crate) root_node: Cell<NodeId>,
    /// The scope that owns whatever is created next (ambient "current scope" slot).
    pub(crate) current_scope: Cell<NodeId>,
    /// The derivation whose dependencies are being recorded (ambient "current observer" slot).
    /// Null key when nothing is being tracked.
    pub(crate) current_observer: Cell<NodeId>,
    /// If `Some`, reads are being tracked and accesses are recorded here.
    pub(crate) tracker: RefCell<Option<DependencyTracker>>,
    /// Derivations currently being recomputed, innermost last. Re-entering a node already on
    /// this stack is a cyclic dependency.
    pub(crate) compute_stack: RefCell<Vec<NodeId>>,
    /// Scheduler state: pending queue, tick counter, flush hooks.
    pub(crate) scheduler: SchedulerState,
    /// True while inside `batch`; writes still mark dependents dirty immediately but do not
    /// trigger a flush until the batch ends.
    pub(crate) batching: Cell<bool>,
    /// Monotonic counter handed out by [`next_seq`](Self::next_seq); stamps every node's
    /// `created_at` with its creation order in this root.
    pub(crate) node_seq: Cell<u64>,
}

thread_local! {
    static GLOBAL_ROOT: Cell<Option<&'static Root>> = const { Cell::new(None) };
}

impl Root {
    /// Returns the current reactive root. Panics if none is active.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn global() -> &'static Root {
        GLOBAL_ROOT
            .with(|root| root.get())
            .expect("no reactive root is active; call this inside `root(...)`")
    }

    /// Sets the current reactive root, returning the previous one.
    pub fn set_global(root: Option<&'static Root>) -> Option<&'static Root> {
        GLOBAL_ROOT.with(|r| r.replace(root))
    }

    /// Allocates a new root and leaks it to obtain a `&'static` reference.
    pub fn new_static() -> &'static Self {
        let this = Self {
            nodes: RefCell::new(SlotMap::default()),
            root_node: Cell::new(NodeId::null()),
            current_scope: Cell::new(NodeId::null()),
            current_observer: Cell::new(NodeId::null()),
            tracker: RefCell::new(None),
            compute_stack: RefCell::new(Vec::new()),
            scheduler: SchedulerState::default(),
            batching: Cell::new(false),
            node_seq: Cell::new(0),
        };
        let this = Box::leak(Box::new(this));
        let prev = Root::set_global(Some(this));
        let seq = this.next_seq();
        let root_node = this.nodes.borrow_mut().insert(Node::new_scope(NodeId::null(), seq));
        this.root_node.set(root_node);
        this.current_scope.set(root_node);
        Root::set_global(prev);
        this
    }

    /// Disposes every node owned by this root, including the root scope itself.
    pub fn dispose_all(&'static self) {
        let root_node = self.root_node.get();
        if !root_node.is_null() {
            self.dispose(root_node);
        }
    }

    /// Hands out the next creation-order sequence number, for stamping a new node's `created_at`.
    pub fn next_seq(&self) -> u64 {
        let seq = self.node_seq.get();
        self.node_seq.set(seq + 1);
        seq
    }

    /// Creates a new child scope under the current scope and runs `f` with it installed as
    /// current. Returns the new scope's id.
    pub fn create_child_scope(&'static self, f: impl FnOnce()) -> NodeId {
        let parent = self.current_scope.get();
        let seq = self.next_seq();
        let node = self.nodes.borrow_mut().insert(Node::new_scope(parent, seq));
        if !parent.is_null() {
            self.nodes.borrow_mut()[parent].children.push(node);
        }
        self.compute(node, NodeId::null(), f);
        node
    }

    /// Runs `body` with `scope` and `observer` installed as current, restoring the previous
    /// slots on every exit path (including unwinding). This is the only place dependency edges
    /// and scope-ownership edges are created.
    pub fn compute<T>(&'static self, scope: NodeId, observer: NodeId, body: impl FnOnce() -> T) -> T {
        let prev_scope = self.current_scope.replace(scope);
        let prev_observer = self.current_observer.replace(observer);
        struct Restore {
            root: &'static Root,
            prev_scope: NodeId,
            prev_observer: NodeId,
        }
        impl Drop for Restore {
            fn drop(&mut self) {
                self.root.current_scope.set(self.prev_scope);
                self.root.current_observer.set(self.prev_observer);
            }
        }
        let _restore = Restore {
            root: self,
            prev_scope,
            prev_observer,
        };
        body()
    }

    /// Runs `f` recording every node read during it. Returns `f`'s result and the tracker.
    pub fn tracked_scope<T>(&self, f: impl FnOnce() -> T) -> (T, DependencyTracker) {
        let prev = self.tracker.replace(Some(DependencyTracker::default()));
        let ret = f();
        (ret, self.tracker.replace(prev).unwrap())
    }

    /// Records a read of `id` against the current observer, if any.
    pub fn track_read(&self, id: NodeId) {
        let observer = self.current_observer.get();
        if observer.is_null() {
            return;
        }
        if let Some(tracker) = self.tracker.borrow_mut().as_mut() {
            tracker.reads.insert(id);
        }
    }

    /// Marks `id`'s direct observers dirty and enqueues them on the scheduler, snapshotting the
    /// observer list first so a recomputation triggered mid-iteration cannot corrupt it.
    pub fn notify_observers(&'static self, id: NodeId) {
        let observers = self.nodes.borrow()[id].observers.clone();
        for observer in observers {
            if self.nodes.borrow().get(observer).is_none() {
                continue;
            }
            if self.nodes.borrow()[observer].disposed {
                continue;
            }
            self.nodes.borrow_mut()[observer].dirty = true;
            self.scheduler.enqueue(self, observer);
        }
    }

    /// Reads a derivation, recomputing it first if it is dirty. Also used by the scheduler to
    /// force effects to run even though nothing reads their value.
    pub fn ensure_fresh(&'static self, id: NodeId) {
        let is_dirty = match self.nodes.borrow().get(id) {
            Some(node) => node.dirty && !node.disposed,
            None => false,
        };
        if is_dirty {
            self.recompute(id);
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    fn recompute(&'static self, id: NodeId) {
        if self.compute_stack.borrow().contains(&id) {
            let trail: Vec<String> = self
                .compute_stack
                .borrow()
                .iter()
                .map(|n| {
                    let node = &self.nodes.borrow()[*n];
                    node.id
                        .clone()
                        .unwrap_or_else(|| format!("#{}", node.created_at))
                })
                .collect();
            panic!("{}", ReactiveError::CyclicDependency { trail });
        }

        // Sever old dependency edges; they are rebuilt from scratch below.
        let old_deps = std::mem::take(&mut self.nodes.borrow_mut()[id].dependencies);
        for dep in &old_deps {
            if let Some(dep_node) = self.nodes.borrow_mut().get_mut(*dep) {
                dep_node.observers.retain(|&o| o != id);
            }
        }

        // Dispose children created during the previous run and clear its own cleanups/handlers.
        self.dispose_children(id);
        let cleanups = std::mem::take(&mut self.nodes.borrow_mut()[id].cleanups);
        for cleanup in cleanups {
            if let Some(f) = cleanup.borrow_mut().take() {
                f();
            }
        }
        self.nodes.borrow_mut()[id].error_handlers.clear();

        let compute = self.nodes.borrow_mut()[id].compute.take();
        let Some(mut compute) = compute else {
            // Not a derivation (shouldn't happen: only derivations are ever marked dirty).
            self.nodes.borrow_mut()[id].dirty = false;
            return;
        };

        self.compute_stack.borrow_mut().push(id);
        let old_value = std::mem::take(&mut self.nodes.borrow_mut()[id].value);
        let prev_global = Root::set_global(Some(self));
        let (outcome, tracker, mut compute, old_value) = self.compute(id, id, move || {
            let (outcome, tracker) = self
                .tracked_scope(|| std::panic::catch_unwind(AssertUnwindSafe(|| compute(&old_value))));
            (outcome, tracker, compute, old_value)
        });
        Root::set_global(prev_global);
        self.compute_stack.borrow_mut().pop();

        tracker.create_links(self, id);

        match outcome {
            Ok((new_value, changed)) => {
                self.nodes.borrow_mut()[id].compute = Some(compute);
                self.nodes.borrow_mut()[id].value = Some(new_value);
                self.nodes.borrow_mut()[id].dirty = false;
                if changed {
                    self.notify_observers(id);
                }
            }
            Err(payload) => {
                self.nodes.borrow_mut()[id].compute = Some(compute);
                let handled = self.route_error(id, payload.as_ref());
                self.nodes.borrow_mut()[id].dirty = false;
                // The stored value is repaired the same way whether or not a handler caught the
                // error: on the very first run there is no previous value to fall back to, so the
                // fallback (if any) is used; every later run simply keeps the last good value
                // (§4.3 point 5). This runs before the possible resume_unwind below so that a read
                // which occurs after the panic has propagated past an outer `catch_unwind` still
                // observes a sane value instead of a permanently empty node.
                if old_value.is_none() {
                    let fallback = self.nodes.borrow()[id].fallback.as_ref().map(|f| f());
                    self.nodes.borrow_mut()[id].value = fallback;
                } else {
                    self.nodes.borrow_mut()[id].value = old_value;
                }
                if !handled {
                    std::panic::resume_unwind(payload);
                }
            }
        }
    }

    /// Walks `id` and its scope-parent chain looking for error handlers, invoking every handler
    /// found on the first scope that has any. Returns whether the error was handled.
    pub(crate) fn route_error(&'static self, id: NodeId, payload: &(dyn std::any::Any + 'static)) -> bool {
        let mut current = id;
        loop {
            let handlers = self
                .nodes
                .borrow()
                .get(current)
                .map(|n| n.error_handlers.clone())
                .unwrap_or_default();
            if !handlers.is_empty() {
                let ok = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    for handler in &handlers {
                        handler(payload);
                    }
                }))
                .is_ok();
                if ok {
                    return true;
                }
            }
            let parent = self.nodes.borrow().get(current).map(|n| n.scope_parent);
            match parent {
                Some(p) if !p.is_null() => current = p,
                _ => return false,
            }
        }
    }

    /// Disposes `id`'s children (captured first so reciprocal cleanup cannot mutate the list
    /// while iterating), without disposing `id` itself.
    pub fn dispose_children(&'static self, id: NodeId) {
        let children = match self.nodes.borrow_mut().get_mut(id) {
            Some(node) => std::mem::take(&mut node.children),
            None => return,
        };
        for child in children {
            self.dispose(child);
        }
    }

    /// Disposes `id`: children first, then its own cleanups, then severs it from the graph.
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub fn dispose(&'static self, id: NodeId) {
        if self.nodes.borrow().get(id).map(|n| n.disposed).unwrap_or(true) {
            return; // Already disposed or never existed: idempotent no-op.
        }
        self.dispose_children(id);

        let cleanups = match self.nodes.borrow_mut().get_mut(id) {
            Some(node) => std::mem::take(&mut node.cleanups),
            None => Vec::new(),
        };
        for cleanup in cleanups {
            if let Some(f) = cleanup.borrow_mut().take() {
                f();
            }
        }

        let (parent, deps) = match self.nodes.borrow_mut().get_mut(id) {
            Some(node) => {
                node.disposed = true;
                node.observers.clear();
                let deps = std::mem::take(&mut node.dependencies);
                (node.scope_parent, deps)
            }
            None => return,
        };
        for dep in deps {
            if let Some(dep_node) = self.nodes.borrow_mut().get_mut(dep) {
                dep_node.observers.retain(|&o| o != id);
            }
        }
        if !parent.is_null() {
            if let Some(parent_node) = self.nodes.borrow_mut().get_mut(parent) {
                parent_node.children.retain(|&c| c != id);
            }
        }
    }

    pub fn start_batch(&self) {
        self.batching.set(true);
    }

    pub fn end_batch(&'static self) {
        self.batching.set(false);
        self.scheduler.flush(self);
    }
}

/// Records nodes read during a tracked execution.
#[derive(Default)]
pub(crate) struct DependencyTracker {
    pub reads: IndexSet<NodeId>,
}

impl DependencyTracker {
    /// Materializes `dependent`'s dependency set from the recorded reads, and adds `dependent`
    /// to each dependency's observer set.
    pub fn create_links(self, root: &Root, dependent: NodeId) {
        for &dep in &self.reads {
            if let Some(dep_node) = root.nodes.borrow_mut().get_mut(dep) {
                if !dep_node.observers.contains(&dependent) {
                    dep_node.observers.push(dependent);
                }
            }
        }
        root.nodes.borrow_mut()[dependent].dependencies = self.reads.into_iter().collect();
    }
}

/// Runs `f` with tracking suppressed (current observer cleared, scope unchanged). Reads inside
/// `f` register no dependencies; nodes created inside `f` are still owned by the enclosing scope.
pub fn peek<T>(f: impl FnOnce() -> T) -> T {
    let root = Root::global();
    let prev = root.current_observer.replace(NodeId::null());
    let ret = f();
    root.current_observer.set(prev);
    ret
}

/// Runs `f` with both tracking and scope ownership suppressed: reads register no dependencies
/// and nodes created inside `f` are not owned by the enclosing scope.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let root = Root::global();
    let prev_observer = root.current_observer.replace(NodeId::null());
    let prev_scope = root.current_scope.replace(NodeId::null());
    let ret = f();
    root.current_scope.set(prev_scope);
    root.current_observer.set(prev_observer);
    ret
}

#[cfg(test)]
mod tests {
    use crate::computed::computed;
    use crate::node::AnyNode;
    use crate::scope::root as reactive_root;
    use crate::source::source;

    #[test]
    fn created_at_is_monotonic_within_a_root() {
        reactive_root(|_| {
            let a = source(0);
            let b = source(0);
            let c = computed(move || a.get() + b.get());
            let root = crate::root::Root::global();
            let nodes = root.nodes.borrow();
            let a_seq = nodes[a.node_id()].created_at;
            let b_seq = nodes[b.node_id()].created_at;
            let c_seq = nodes[c.node_id()].created_at;
            assert!(a_seq < b_seq);
            assert!(b_seq < c_seq);
        });
    }

    #[test]
    fn cyclic_trail_falls_back_to_creation_sequence_when_unidentified() {
        reactive_root(|_| {
            let b_cell: std::rc::Rc<std::cell::Cell<Option<crate::computed::Computed<i32>>>> =
                std::rc::Rc::new(std::cell::Cell::new(None));
            let b_cell2 = b_cell.clone();
            let a = computed(move || b_cell2.get().unwrap().get());
            let b = computed(move || a.get());
            b_cell.set(Some(b));

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| b.get()));
            let message = *result.unwrap_err().downcast::<String>().unwrap();
            assert!(message.contains('#'), "expected a `#<seq>` fallback id, got: {message}");
        });
    }
}
