//! The read-only capability shared by every reactive value, and the [`readonly`] wrapper.
//!
//! The design notes call out that `isObservable`/`isSubject` are dynamic-typing conveniences: "a
//! non-structurally-typed language exposes separate Readable and Writable capabilities" instead.
//! That's what [`AnyNode`] (readable) and [`Writable`] (also writable) are here — the capability
//! split the design notes point to, expressed as trait bounds rather than a runtime check.

use std::marker::PhantomData;

use crate::node::{AnyNode, NodeId};
use crate::root::Root;

/// A read-only reactive value obtained from [`readonly`]. Forwards reads to the node it wraps
/// (the same [`NodeId`] as the [`Source`](crate::source::Source) or
/// [`Computed`](crate::computed::Computed) it was built from) without exposing any write
/// capability.
pub struct Readonly<T> {
    pub(crate) id: NodeId,
    pub(crate) root: &'static Root,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Readonly<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Readonly<T> {}

impl<T: Clone + 'static> Readonly<T> {
    /// Returns the current value, registering a dependency if called during a tracked execution.
    /// Recomputes first if the wrapped node is a dirty derivation.
    pub fn get(self) -> T {
        self.root.track_read(self.id);
        self.get_untracked()
    }

    /// Returns the current value without registering a dependency.
    pub fn get_untracked(self) -> T {
        self.root.ensure_fresh(self.id);
        let nodes = self.root.nodes.borrow();
        let node = nodes.get(self.id).expect("readonly read with a dangling id");
        node.value
            .as_ref()
            .expect("node has no value yet")
            .downcast_ref::<T>()
            .expect("readonly type mismatch")
            .clone()
    }

    /// Adds this value as a dependency of the current tracked execution without reading it.
    pub fn track(self) {
        self.root.track_read(self.id);
    }
}

impl<T> AnyNode for Readonly<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }
    fn node_root(&self) -> &'static Root {
        self.root
    }
}

/// Implemented by [`Source`](crate::source::Source), the only handle whose underlying node can be
/// written to. See the module docs for why this exists instead of a runtime `isSubject` check.
pub trait Writable: AnyNode {}

/// Converts a [`Source`] or [`Computed`] into a [`Readonly`] view over the same node, discarding
/// write access.
pub trait IntoReadonly<T> {
    /// Performs the conversion.
    fn readonly(self) -> Readonly<T>;
}

/// Returns a read-only callable that forwards reads to `o` and reports as a readable reactive
/// value, without exposing `o`'s write operations (if any).
pub fn readonly<T, O: IntoReadonly<T>>(o: O) -> Readonly<T> {
    o.readonly()
}

/// True iff `x` is a reactive, readable value (a [`Source`], [`Computed`] or [`Readonly`]). Since
/// Rust enforces this statically for every [`AnyNode`] implementor, the check is only interesting
/// for generic code written against the trait bound rather than a concrete type; it is provided so
/// that bound exists as a predicate one can call, mirroring the host-language contract.
pub fn is_observable(_x: &impl AnyNode) -> bool {
    true
}

/// True iff `x` is a writable [`Source`]. See [`Writable`] for why a [`Readonly`] or
/// [`Computed`] simply cannot be passed here rather than returning `false` at runtime.
pub fn is_subject(_x: &impl Writable) -> bool {
    true
}
