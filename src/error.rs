//! Error types for the reactive graph.

use thiserror::Error;

/// Errors the graph engine itself can raise. User body errors are not represented here: they are
/// caught as panics at the recompute boundary and handed to `onError` handlers as `&dyn Any`; see
/// the crate-level error handling notes in `root::Root::recompute`.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A derivation was re-entered while already on the compute stack.
    #[error("cyclic dependency detected: {}", trail.join(" -> "))]
    CyclicDependency {
        /// Identifiers of the derivations on the compute stack, outermost first, at the point
        /// the cycle was detected.
        trail: Vec<String>,
    },
}
