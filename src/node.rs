//! Reactive nodes: the single polymorphic record backing sources, derivations and scopes.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use slotmap::new_key_type;

new_key_type! {
    /// A stable identifier for a node inside a [`Root`](crate::root::Root)'s arena.
    pub struct NodeId;
}

/// What role a node plays in the graph. Scopes created purely for ownership (via
/// [`root`](crate::scope::root) or [`create_child_scope`](crate::scope::create_child_scope)) carry
/// no value and no compute body.
pub(crate) enum NodeKind {
    /// A plain ownership scope: no value, no compute body, never dirtied.
    Scope,
    /// A writable source. Has a value but no compute body.
    Source,
    /// A derivation. `effect` is true if this derivation is primed at creation and re-run on
    /// every invalidation regardless of whether anyone reads it.
    Derivation { effect: bool },
}

/// A reactive node inside the graph.
pub(crate) struct Node {
    pub kind: NodeKind,
    /// Value of the node, if any. Sources and derivations have one once first written/computed.
    pub value: Option<Box<dyn Any>>,
    /// Compute body. Only present for derivations. Returns whether the produced value counts as
    /// changed against the previous one (per the node's dirty predicate).
    pub compute: Option<Box<dyn FnMut(&Option<Box<dyn Any>>) -> (Box<dyn Any>, bool)>>,
    /// Producer for the fallback value returned the first time a derivation's body fails.
    pub fallback: Option<Box<dyn Fn() -> Box<dyn Any>>>,
    /// True when the next read must recompute (derivations only).
    pub dirty: bool,
    /// True once this node has been disposed. Permanently inert afterwards.
    pub disposed: bool,
    /// Nodes that read this node during their last tracked execution.
    pub observers: Vec<NodeId>,
    /// Nodes this node read during its own last tracked execution.
    pub dependencies: Vec<NodeId>,
    /// The node under whose tracked execution this node was created. Null key at the root.
    pub scope_parent: NodeId,
    /// Nodes created under this node's tracked execution; owned, disposed before this node.
    pub children: Vec<NodeId>,
    /// Cleanup callbacks run when this node is invalidated (derivations, on re-run) or disposed.
    /// Each slot is individually removable: [`onDispose`](crate::scope::on_dispose) hands the
    /// caller back a handle sharing this `Rc`, so running it early just empties the slot and
    /// the bulk drain below skips it.
    pub cleanups: Vec<Rc<RefCell<Option<Box<dyn FnOnce()>>>>>,
    /// Context values provided on this node, looked up by type.
    pub context: Vec<Box<dyn Any>>,
    /// Error handlers registered on this node via `onError`. Kept as its own field rather than
    /// folded into `context`, since it is never looked up by type.
    pub error_handlers: Vec<Rc<dyn Fn(&(dyn Any + 'static))>>,
    /// Diagnostic id supplied via `{ id: ... }` options, if any.
    pub id: Option<String>,
    /// Monotonic creation order within this node's [`Root`](crate::root::Root), assigned once by
    /// [`Root::next_seq`](crate::root::Root::next_seq) at insertion time. No wall-clock timestamp
    /// is recorded (this crate has no persistence or replay story to date it against); the
    /// sequence number is what `trace`-feature spans and panic messages use to tell nodes created
    /// at the same point in a read apart, the same role `sycamore-reactive`'s own creation-order
    /// bookkeeping plays in its debug plumbing.
    pub created_at: u64,
    /// The dirty predicate for a source: returns `true` if `new` counts as equal to `old` (no
    /// change, so no invalidation). Derivations compare inside their own `compute` closure
    /// instead, since only there is `T` still in scope.
    pub equals: Option<Box<dyn Fn(&dyn Any, &dyn Any) -> bool>>,
}

impl Node {
    pub fn new_scope(scope_parent: NodeId, created_at: u64) -> Self {
        Self {
            kind: NodeKind::Scope,
            value: None,
            compute: None,
            fallback: None,
            dirty: false,
            disposed: false,
            observers: Vec::new(),
            dependencies: Vec::new(),
            scope_parent,
            children: Vec::new(),
            cleanups: Vec::new(),
            context: Vec::new(),
            error_handlers: Vec::new(),
            id: None,
            equals: None,
            created_at,
        }
    }
}

/// Implemented by every handle that identifies a single node in the graph: [`Scope`],
/// [`Source`], [`Computed`], [`Readonly`] and [`EffectHandle`]. Lets [`dispose`], the `getScope`
/// family, and the observable-kind queries in [`observable`](crate::observable) work generically
/// over "some node" without a trait object.
///
/// [`Scope`]: crate::scope::Scope
/// [`Source`]: crate::source::Source
/// [`Computed`]: crate::computed::Computed
/// [`Readonly`]: crate::observable::Readonly
/// [`EffectHandle`]: crate::effect::EffectHandle
pub trait AnyNode: Copy {
    #[doc(hidden)]
    fn node_id(&self) -> NodeId;
    #[doc(hidden)]
    fn node_root(&self) -> &'static crate::root::Root;
}
