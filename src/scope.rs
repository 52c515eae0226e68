//! The scope tree: ownership, disposal, and the [`root`] entry point.
//!
//! Every reactive node (source, derivation or plain ownership scope) records the scope that was
//! current when it was created and is added to that scope's children (§4.6 of the design). Scopes
//! nest into a forest; disposing one disposes every descendant first (§3 invariant 6).

use std::cell::RefCell;
use std::rc::Rc;

use slotmap::Key;

use crate::node::{AnyNode, Node, NodeId};
use crate::root::Root;

/// A handle to a node considered purely as an ownership point: something that can be disposed and
/// that carries context and error handlers. Returned by [`get_scope`]/[`get_scope_of`] and by
/// [`root`]'s `dispose` callback is backed by the same mechanism, just without a handle.
#[derive(Clone, Copy)]
pub struct Scope {
    pub(crate) id: NodeId,
    pub(crate) root: &'static Root,
}

impl Scope {
    /// Disposes this scope and every node created under it, running disposal callbacks
    /// depth-first (children before parent).
    pub fn dispose(self) {
        self.root.dispose(self.id);
    }
}

impl AnyNode for Scope {
    fn node_id(&self) -> NodeId {
        self.id
    }
    fn node_root(&self) -> &'static Root {
        self.root
    }
}

/// Creates a detached root scope, runs `init` under it with a `dispose` callback, and returns
/// `init`'s return value. Nothing is reclaimed automatically: the caller is responsible for
/// invoking the `dispose` callback (immediately, or after holding on to it) to free every node
/// created under this root.
///
/// ```
/// use fine_reactive::*;
///
/// let sum = root(|dispose| {
///     let a = source(1);
///     let b = source(2);
///     let c = computed(move || a.get() + b.get());
///     let sum = c.get();
///     dispose();
///     sum
/// });
/// assert_eq!(sum, 3);
/// ```
pub fn root<T>(init: impl FnOnce(Box<dyn FnOnce()>) -> T) -> T {
    let new_root = Root::new_static();
    let prev = Root::set_global(Some(new_root));

    struct Restore(Option<&'static Root>);
    impl Drop for Restore {
        fn drop(&mut self) {
            Root::set_global(self.0);
        }
    }
    let _restore = Restore(prev);

    let dispose: Box<dyn FnOnce()> = Box::new(move || new_root.dispose_all());
    init(dispose)
}

/// Creates a child scope under the current scope, runs `f` under it, and returns a [`Scope`]
/// handle that can later dispose it. Exposed for callers that want an ownership boundary without
/// a derivation attached to it (derivations and effects already create one implicitly).
pub fn create_child_scope(f: impl FnOnce()) -> Scope {
    let root = Root::global();
    let id = root.create_child_scope(f);
    Scope { id, root }
}

/// The scope that owns whatever is created right now: the current scope installed by the
/// innermost surrounding [`root`], [`create_child_scope`], [`computed`](crate::computed::computed)
/// or [`effect`](crate::effect::effect) body.
pub fn get_scope() -> Scope {
    let root = Root::global();
    Scope {
        id: root.current_scope.get(),
        root,
    }
}

/// The scope that owns `x`: the scope that was current when `x` was created.
pub fn get_scope_of(x: impl AnyNode) -> Scope {
    let root = x.node_root();
    let parent = root.nodes.borrow()[x.node_id()].scope_parent;
    Scope { id: parent, root }
}

/// Disposes `x` and every node created under it. Idempotent: disposing an already-disposed node
/// is a silent no-op.
pub fn dispose(x: impl AnyNode) {
    x.node_root().dispose(x.node_id());
}

/// A handle returned by [`on_dispose`]. Invoking it runs the callback immediately (if it hasn't
/// already run, e.g. as part of the owning scope's own disposal) and removes it from the scope's
/// disposal set, so it will not run a second time when the scope is later disposed.
pub struct DisposeHandle {
    cell: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl DisposeHandle {
    /// Runs the callback now, if it hasn't already run.
    pub fn dispose(self) {
        if let Some(f) = self.cell.borrow_mut().take() {
            f();
        }
    }
}

/// Registers `f` to run when the current scope is invalidated (if a derivation, on every re-run)
/// or disposed. Returns a handle that can run it early and deregister it.
pub fn on_dispose(f: impl FnOnce() + 'static) -> DisposeHandle {
    let root = Root::global();
    let scope = root.current_scope.get();
    let cell: Rc<RefCell<Option<Box<dyn FnOnce()>>>> = Rc::new(RefCell::new(Some(Box::new(f))));
    if !scope.is_null() {
        root.nodes.borrow_mut()[scope].cleanups.push(cell.clone());
    }
    DisposeHandle { cell }
}

/// Registers `handler` as an error handler on the current scope. When a derivation's body
/// (transitively, not just the current scope's own) throws, the engine walks parent scopes
/// looking for handlers and invokes every handler on the first scope that has any (§4.6).
pub fn on_error(handler: impl Fn(&(dyn std::any::Any + 'static)) + 'static) {
    let root = Root::global();
    let scope = root.current_scope.get();
    if scope.is_null() {
        return;
    }
    root.nodes.borrow_mut()[scope]
        .error_handlers
        .push(Rc::new(handler));
}

/// Returns a wrapper that re-enters the scope current at the time `scope` was called every time
/// it is invoked, so context and error handlers registered on that scope remain reachable, without
/// itself being a reactive derivation (it creates no dependency links and is never enqueued).
/// If `f` panics, the panic is routed through the captured scope's error handler chain instead of
/// propagating, and the wrapper returns `None`.
pub fn scope<T>(f: impl Fn() -> T + 'static) -> impl Fn() -> Option<T> {
    let root = Root::global();
    let captured = root.current_scope.get();
    move || {
        let prev_root = Root::set_global(Some(root));
        let prev_scope = root.current_scope.replace(captured);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(&f));
        root.current_scope.set(prev_scope);
        Root::set_global(prev_root);
        match outcome {
            Ok(value) => Some(value),
            Err(payload) => {
                root.route_error(captured, payload.as_ref());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{computed, source};

    #[test]
    fn dispose_runs_cleanup() {
        root(|_| {
            let called = source(false);
            let child = create_child_scope(|| {
                on_dispose(move || called.set(true));
            });
            assert!(!called.get());
            child.dispose();
            assert!(called.get());
        });
    }

    #[test]
    fn dispose_is_idempotent() {
        root(|_| {
            let child = create_child_scope(|| {});
            child.dispose();
            child.dispose(); // second call is a no-op, not a panic
        });
    }

    #[test]
    fn on_dispose_handle_runs_early_and_only_once() {
        root(|_| {
            let count = source(0);
            let handle = on_dispose(move || count.next(|v| v + 1));
            handle.dispose();
            assert_eq!(count.get(), 1);
            get_scope().dispose(); // the owning scope's own cleanups must not re-run it
            assert_eq!(count.get(), 1);
        });
    }

    #[test]
    fn dispose_severs_reactivity() {
        root(|_| {
            let a = source(10);
            let b = computed(move || a.get() * 2);
            assert_eq!(b.get(), 20);
            dispose(a);
            a.set(100); // no-op: disposed source ignores writes
            assert_eq!(b.get(), 20);
        });
    }

    #[test]
    fn scope_wrapper_reenters_captured_scope() {
        root(|_| {
            let seen = source(String::new());
            create_child_scope(|| {
                on_error(move |_| seen.set("handled".into()));
                let wrapper = scope(|| panic!("boom"));
                let result = wrapper();
                assert!(result.is_none());
            });
            assert_eq!(seen.get(), "handled");
        });
    }
}
