//! Derivations: memoised, lazily recomputed functions of other reactive values.

use std::any::Any;
use std::marker::PhantomData;

use slotmap::Key;

use crate::node::{AnyNode, Node, NodeId, NodeKind};
use crate::observable::{IntoReadonly, Readonly};
use crate::root::Root;

/// Options for [`computed_with_options`].
pub struct ComputedOptions<T> {
    /// Equality deciding whether a freshly computed value counts as a change against the
    /// previous one. Returns `true` when `new` should be treated as equal (no invalidation of
    /// observers). [`computed`] fills this in with `PartialEq::eq`; callers of
    /// [`computed_with_options`] directly must supply one themselves since `T` there carries no
    /// `PartialEq` bound.
    pub dirty: Box<dyn Fn(&T, &T) -> bool>,
    /// Diagnostic identifier surfaced in panic messages and `trace` spans.
    pub id: Option<String>,
    /// Value returned the very first time this derivation's body throws. Ignored on later runs,
    /// where the previous value is kept instead (§4.3).
    pub fallback: Option<Box<dyn Fn() -> T>>,
}

impl<T> ComputedOptions<T> {
    /// Starts from the given equality predicate with no id and no fallback.
    pub fn new(dirty: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            dirty: Box::new(dirty),
            id: None,
            fallback: None,
        }
    }
}

/// A read-only, memoised function of other reactive values.
///
/// Dependencies are rediscovered on every recomputation: reading a [`Source`](crate::source::Source)
/// or another `Computed` inside the body registers it, and only the branches actually taken during
/// the last run stay linked (§4.3). A `Computed` is read lazily — pull-on-read — so it only
/// recomputes the next time something actually reads it, not eagerly when a dependency changes.
pub struct Computed<T> {
    pub(crate) id: NodeId,
    pub(crate) root: &'static Root,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Computed<T> {}

impl<T: Clone + 'static> Computed<T> {
    /// Returns the current value, recomputing first if dirty, and registering a dependency if
    /// called during a tracked execution.
    pub fn get(self) -> T {
        self.root.track_read(self.id);
        self.get_untracked()
    }

    /// Like [`get`](Self::get) but registers no dependency.
    pub fn get_untracked(self) -> T {
        self.root.ensure_fresh(self.id);
        let nodes = self.root.nodes.borrow();
        let node = nodes.get(self.id).expect("computed read with a dangling id");
        node.value
            .as_ref()
            .expect("computed has no value yet")
            .downcast_ref::<T>()
            .expect("computed type mismatch")
            .clone()
    }

    /// Adds this value as a dependency of the current tracked execution without reading it.
    pub fn track(self) {
        self.root.track_read(self.id);
    }
}

impl<T> AnyNode for Computed<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }
    fn node_root(&self) -> &'static Root {
        self.root
    }
}

impl<T: Clone + 'static> IntoReadonly<T> for Computed<T> {
    fn readonly(self) -> Readonly<T> {
        Readonly {
            id: self.id,
            root: self.root,
            _marker: PhantomData,
        }
    }
}

/// Creates a memoised derivation from `body`, using `PartialEq` to decide whether a freshly
/// computed value counts as a change.
///
/// ```
/// use fine_reactive::*;
///
/// root(|_| {
///     let a = source(10);
///     let b = source(10);
///     let c = computed(move || a.get() + b.get());
///     assert_eq!(c.get(), 20);
///     a.set(20);
///     assert_eq!(c.get(), 30); // recomputed on read, no tick() needed
/// });
/// ```
pub fn computed<T: Clone + PartialEq + 'static>(body: impl FnMut() -> T + 'static) -> Computed<T> {
    computed_with_options(body, ComputedOptions::new(PartialEq::eq))
}

/// Creates a derivation with custom options (equality predicate, diagnostic id, first-run
/// fallback). Unlike [`computed`], `T` carries no implicit `PartialEq` bound, so callers must
/// supply [`ComputedOptions::dirty`] themselves (use `|_, _| false` to always invalidate).
pub fn computed_with_options<T: Clone + 'static>(
    mut body: impl FnMut() -> T + 'static,
    options: ComputedOptions<T>,
) -> Computed<T> {
    let root = Root::global();
    let scope = root.current_scope.get();
    let mut node = Node::new_scope(scope, root.next_seq());
    node.kind = NodeKind::Derivation { effect: false };
    node.dirty = true;
    node.id = options.id;

    let equals = options.dirty;
    node.compute = Some(Box::new(move |old: &Option<Box<dyn Any>>| -> (Box<dyn Any>, bool) {
        let new = body();
        let changed = match old {
            Some(old) => {
                let old = old.downcast_ref::<T>().expect("computed type mismatch");
                !equals(old, &new)
            }
            None => true,
        };
        (Box::new(new) as Box<dyn Any>, changed)
    }));
    node.fallback = options
        .fallback
        .map(|f| -> Box<dyn Fn() -> Box<dyn Any>> { Box::new(move || Box::new(f()) as Box<dyn Any>) });

    let id = root.nodes.borrow_mut().insert(node);
    if !scope.is_null() {
        root.nodes.borrow_mut()[scope].children.push(id);
    }
    Computed {
        id,
        root,
        _marker: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::root;
    use crate::source::source;

    #[test]
    fn recomputes_on_read_without_tick() {
        root(|_| {
            let a = source(10);
            let b = source(10);
            let c = computed(move || a.get() + b.get());
            assert_eq!(c.get(), 20);
            a.set(20);
            assert_eq!(c.get(), 30);
        });
    }

    #[test]
    fn memoises_between_reads() {
        root(|_| {
            let calls = source(0);
            let a = source(1);
            let c = computed(move || {
                calls.next(|v| v + 1);
                a.get() * 2
            });
            c.get();
            c.get();
            c.get();
            assert_eq!(calls.get_untracked(), 1);
        });
    }

    #[test]
    fn only_dependents_of_changed_source_recompute() {
        root(|_| {
            let a = source(1);
            let b = source(1);
            let c_calls = source(0);
            let d_calls = source(0);
            let c = computed(move || {
                c_calls.next(|v| v + 1);
                a.get()
            });
            let d = computed(move || {
                d_calls.next(|v| v + 1);
                b.get()
            });
            let e = computed(move || c.get() + d.get());
            assert_eq!(e.get(), 2);
            a.set(20);
            crate::tick();
            assert_eq!(e.get(), 21);
            assert_eq!(c_calls.get_untracked(), 2);
            assert_eq!(d_calls.get_untracked(), 1);
        });
    }

    #[test]
    fn cyclic_dependency_panics() {
        root(|_| {
            // Build the cycle through a layer of indirection since `computed` closures must be
            // constructed before either side can reference the other.
            let b_cell: std::rc::Rc<std::cell::Cell<Option<Computed<i32>>>> =
                std::rc::Rc::new(std::cell::Cell::new(None));
            let b_cell2 = b_cell.clone();
            let a = computed(move || {
                let b = b_cell2.get().unwrap();
                b.get()
            });
            let b = computed(move || a.get());
            b_cell.set(Some(b));

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| b.get()));
            assert!(result.is_err());
        });
    }

    #[test]
    fn first_run_error_returns_fallback() {
        root(|_| {
            let should_fail = source(true);
            let mut options = ComputedOptions::new(i32::eq);
            options.fallback = Some(Box::new(|| -1));
            let c = computed_with_options(
                move || {
                    if should_fail.get_untracked() {
                        panic!("boom");
                    }
                    42
                },
                options,
            );
            // Unhandled errors resume-unwind from the triggering read (§4.3 point 5 / §7.1):
            // with no `onError` handler registered, the fallback only protects the stored value,
            // not the read that discovered the error.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.get()));
            assert!(result.is_err());
            assert_eq!(c.get_untracked(), -1);
        });
    }
}
