//! Side effects: derivations whose value is unused but whose body runs on every invalidation.

use slotmap::Key;

use crate::node::{AnyNode, Node, NodeId, NodeKind};
use crate::root::Root;

/// A handle returned by [`effect`]. Dropping it does *not* stop the effect — reactive nodes are
/// owned by the scope tree, not by this handle — call [`stop`](Self::stop) (or
/// [`dispose`](crate::scope::dispose)) explicitly.
#[derive(Clone, Copy)]
pub struct EffectHandle {
    id: NodeId,
    root: &'static Root,
}

impl EffectHandle {
    /// Disposes the effect: its own cleanup (and transitively any children and disposal
    /// callbacks) runs synchronously and immediately, and it will never run again.
    pub fn stop(self) {
        self.root.dispose(self.id);
    }
}

impl AnyNode for EffectHandle {
    fn node_id(&self) -> NodeId {
        self.id
    }
    fn node_root(&self) -> &'static Root {
        self.root
    }
}

/// Runs `body` once synchronously (priming), then again every time one of the reactive values it
/// read during its last run changes. If `body` returns `Some(cleanup)`, `cleanup` is registered on
/// the effect's own scope through the same mechanism as [`on_dispose`](crate::scope::on_dispose),
/// so it runs immediately before the next re-run and, finally, when the effect is stopped — never
/// propagated to an outer scope (this is the resolved behavior from the Design Notes' open
/// question: the two source variants disagreed on whether cleanup belongs to the effect or the
/// enclosing scope; the stable contract ties it to the effect itself). A body that always returns
/// `None` can instead call [`on_dispose`](crate::scope::on_dispose) directly; both land on the same
/// cleanup slot.
///
/// Returns a [`EffectHandle`] whose [`stop`](EffectHandle::stop) disposes it.
///
/// ```
/// use fine_reactive::*;
///
/// root(|_| {
///     let a = source(1);
///     let runs = source(0);
///     let handle = effect(move || {
///         a.get();
///         runs.next(|v| v + 1);
///         None
///     });
///     assert_eq!(runs.get(), 1); // primed synchronously
///     a.set(2);
///     tick();
///     assert_eq!(runs.get(), 2);
///     handle.stop();
///     a.set(3);
///     tick();
///     assert_eq!(runs.get(), 2); // stopped: no further runs
/// });
/// ```
pub fn effect(body: impl FnMut() -> Option<Box<dyn FnOnce()>> + 'static) -> EffectHandle {
    effect_with_options(body, EffectOptions::default())
}

/// Options for [`effect_with_options`].
#[derive(Default)]
pub struct EffectOptions {
    /// Diagnostic identifier surfaced in panic messages and `trace` spans.
    pub id: Option<String>,
}

/// Creates an effect with custom options.
pub fn effect_with_options(
    mut body: impl FnMut() -> Option<Box<dyn FnOnce()>> + 'static,
    options: EffectOptions,
) -> EffectHandle {
    let root = Root::global();
    let scope = root.current_scope.get();
    let mut node = Node::new_scope(scope, root.next_seq());
    node.kind = NodeKind::Derivation { effect: true };
    node.dirty = true;
    node.id = options.id;
    node.compute = Some(Box::new(move |_old| {
        if let Some(cleanup) = body() {
            crate::scope::on_dispose(cleanup);
        }
        // Effects have no externally observable value; always report "unchanged" so reading an
        // effect node (which nothing does, by convention) never cascades further invalidation.
        (Box::new(()) as Box<dyn std::any::Any>, false)
    }));

    let id = root.nodes.borrow_mut().insert(node);
    if !scope.is_null() {
        root.nodes.borrow_mut()[scope].children.push(id);
    }
    root.ensure_fresh(id); // prime: run synchronously once, right now

    EffectHandle { id, root }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computed::computed;
    use crate::scope::{create_child_scope, on_dispose, root};
    use crate::source::source;

    #[test]
    fn primed_once_at_creation() {
        root(|_| {
            let runs = source(0);
            effect(move || {
                runs.next(|v| v + 1);
                None
            });
            assert_eq!(runs.get(), 1);
        });
    }

    #[test]
    fn batches_multiple_writes_into_one_rerun() {
        root(|_| {
            let a = source(10);
            let runs = source(0);
            effect(move || {
                runs.next(|v| v + 1);
                a.get();
                None
            });
            assert_eq!(runs.get(), 1);
            a.set(20);
            a.set(30);
            a.set(40);
            crate::tick();
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn stop_disposes_and_prevents_future_runs() {
        root(|_| {
            let a = source(1);
            let runs = source(0);
            let handle = effect(move || {
                a.get();
                runs.next(|v| v + 1);
                None
            });
            assert_eq!(runs.get(), 1);
            handle.stop();
            a.set(2);
            crate::tick();
            assert_eq!(runs.get(), 1);
        });
    }

    #[test]
    fn cleanup_returned_from_body_runs_on_rerun_and_on_stop() {
        root(|_| {
            let a = source(0);
            let cleanups = source(0);
            let handle = effect(move || {
                a.get();
                Some(Box::new(move || cleanups.next(|v| v + 1)) as Box<dyn FnOnce()>)
            });
            assert_eq!(cleanups.get(), 0); // priming run: no cleanup yet
            a.set(1);
            crate::tick();
            assert_eq!(cleanups.get(), 1); // cleanup from the primed run, before the rerun
            a.set(2);
            crate::tick();
            assert_eq!(cleanups.get(), 2);
            handle.stop();
            assert_eq!(cleanups.get(), 3); // final stop
        });
    }

    #[test]
    fn cleanup_via_on_dispose_runs_on_rerun_and_on_stop() {
        root(|_| {
            let a = source(0);
            let cleanups = source(0);
            let handle = effect(move || {
                a.get();
                on_dispose(move || cleanups.next(|v| v + 1));
                None
            });
            assert_eq!(cleanups.get(), 0); // priming run: no cleanup yet
            a.set(1);
            crate::tick();
            assert_eq!(cleanups.get(), 1); // cleanup from the primed run, before the rerun
            a.set(2);
            crate::tick();
            assert_eq!(cleanups.get(), 2);
            handle.stop();
            assert_eq!(cleanups.get(), 3); // final stop
        });
    }

    #[test]
    fn depends_on_computed() {
        root(|_| {
            let a = source(1);
            let doubled = computed(move || a.get() * 2);
            let seen = source(0);
            effect(move || {
                seen.set(doubled.get());
                None
            });
            assert_eq!(seen.get(), 2);
            a.set(5);
            crate::tick();
            assert_eq!(seen.get(), 10);
        });
    }

    #[test]
    fn disposing_enclosing_scope_stops_effect() {
        root(|_| {
            let a = source(0);
            let runs = source(0);
            let scope = create_child_scope(|| {
                effect(move || {
                    a.get();
                    runs.next(|v| v + 1);
                    None
                });
            });
            assert_eq!(runs.get(), 1);
            scope.dispose();
            a.set(1);
            crate::tick();
            assert_eq!(runs.get(), 1);
        });
    }
}
