//! Writable reactive values.

use std::any::Any;
use std::marker::PhantomData;

use slotmap::Key;

use crate::node::{AnyNode, Node, NodeId, NodeKind};
use crate::observable::{IntoReadonly, Readonly, Writable};
use crate::root::Root;

/// Options for [`source_with_options`].
pub struct SourceOptions<T> {
    /// Custom equality used to decide whether a write counts as a change. Returns `true` when
    /// `new` should be treated as equal to `old` (no invalidation). Defaults to `old != new`.
    pub dirty: Option<Box<dyn Fn(&T, &T) -> bool>>,
    /// Diagnostic identifier surfaced in panic messages and `trace` spans.
    pub id: Option<String>,
}

impl<T> Default for SourceOptions<T> {
    fn default() -> Self {
        Self {
            dirty: None,
            id: None,
        }
    }
}

/// A writable reactive value: the ground truth that reads observe.
///
/// Reading a source inside a tracked execution (a [`computed`](crate::computed::computed) or
/// [`effect`](crate::effect::effect) body) registers the current observer as a dependent; the
/// next [`set`](Source::set) that changes the value will invalidate it.
pub struct Source<T> {
    pub(crate) id: NodeId,
    pub(crate) root: &'static Root,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Source<T> {}

impl<T: Clone + PartialEq + 'static> Source<T> {
    /// Returns the current value, registering a dependency if called during a tracked execution.
    #[track_caller]
    pub fn get(self) -> T {
        self.root.track_read(self.id);
        self.get_untracked()
    }

    /// Returns the current value without registering a dependency.
    #[track_caller]
    pub fn get_untracked(self) -> T {
        let nodes = self.root.nodes.borrow();
        let node = nodes.get(self.id).expect("source read with a dangling id");
        node.value
            .as_ref()
            .expect("source has no value")
            .downcast_ref::<T>()
            .expect("source type mismatch")
            .clone()
    }

    /// Stores `next`, comparing against the current value with the dirty predicate. If they
    /// differ, direct observers are marked dirty and enqueued on the scheduler. A write to a
    /// disposed source is a silent no-op.
    #[track_caller]
    pub fn set(self, next: T) {
        let changed = {
            let mut nodes = self.root.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(self.id) else {
                return;
            };
            if node.disposed {
                return;
            }
            let equal = match node.value.as_deref() {
                Some(old) => {
                    let old = old.downcast_ref::<T>().expect("source type mismatch");
                    match &node.equals {
                        Some(predicate) => {
                            predicate_eq(predicate, old, &next)
                        }
                        None => *old == next,
                    }
                }
                None => false,
            };
            if equal {
                false
            } else {
                node.value = Some(Box::new(next));
                true
            }
        };
        if changed {
            self.root.notify_observers(self.id);
        }
    }

    /// `set(f(current))`.
    pub fn next(self, f: impl FnOnce(T) -> T) {
        let current = self.get_untracked();
        self.set(f(current));
    }

    /// Adds this source as a dependency of the current tracked execution without reading its
    /// value (sugar for call sites that only care about invalidation, not the value).
    pub fn track(self) {
        self.root.track_read(self.id);
    }
}

impl<T> AnyNode for Source<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }
    fn node_root(&self) -> &'static Root {
        self.root
    }
}

impl<T> Writable for Source<T> {}

impl<T: Clone + 'static> IntoReadonly<T> for Source<T> {
    fn readonly(self) -> Readonly<T> {
        Readonly {
            id: self.id,
            root: self.root,
            _marker: PhantomData,
        }
    }
}

fn predicate_eq<T>(predicate: &dyn Fn(&dyn Any, &dyn Any) -> bool, old: &T, new: &T) -> bool
where
    T: 'static,
{
    predicate(old as &dyn Any, new as &dyn Any)
}

/// Creates a new source with the given initial value, owned by the current scope.
#[track_caller]
pub fn source<T: Clone + PartialEq + 'static>(initial: T) -> Source<T> {
    source_with_options(initial, SourceOptions::default())
}

/// Creates a new source with custom options.
#[track_caller]
pub fn source_with_options<T: Clone + PartialEq + 'static>(
    initial: T,
    options: SourceOptions<T>,
) -> Source<T> {
    let root = Root::global();
    let scope = root.current_scope.get();
    let mut node = Node::new_scope(scope, root.next_seq());
    node.kind = NodeKind::Source;
    node.value = Some(Box::new(initial));
    node.id = options.id;
    node.equals = options.dirty.map(|predicate| -> Box<dyn Fn(&dyn Any, &dyn Any) -> bool> {
        Box::new(move |old, new| {
            let old = old.downcast_ref::<T>().expect("source type mismatch");
            let new = new.downcast_ref::<T>().expect("source type mismatch");
            predicate(old, new)
        })
    });
    let id = root.nodes.borrow_mut().insert(node);
    if !scope.is_null() {
        root.nodes.borrow_mut()[scope].children.push(id);
    }
    Source {
        id,
        root,
        _marker: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use crate::scope::root;

    use super::*;

    #[test]
    fn get_set() {
        root(|_| {
            let s = source(0);
            assert_eq!(s.get(), 0);
            s.set(1);
            assert_eq!(s.get(), 1);
        });
    }

    #[test]
    fn next_updates_from_current() {
        root(|_| {
            let s = source(1);
            s.next(|v| v + 1);
            assert_eq!(s.get(), 2);
        });
    }

    #[test]
    fn write_to_disposed_source_is_noop() {
        root(|_| {
            let mut s = None;
            let handle = crate::scope::create_child_scope(|| {
                s = Some(source(0));
            });
            let s = s.unwrap();
            handle.dispose();
            s.set(100); // silent no-op, does not panic
            assert_eq!(s.get_untracked(), 0);
        });
    }
}
