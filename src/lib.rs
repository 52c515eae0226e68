//! A fine-grained reactive runtime: writable sources, memoised derivations, effects, and the
//! scope tree that owns and disposes them.
//!
//! ```rust
//! use fine_reactive::*;
//!
//! root(|_| {
//!     let greeting = source("Hello");
//!     let name = source("World");
//!
//!     let display_text = computed(move || format!("{} {}!", greeting.get(), name.get()));
//!     assert_eq!(display_text.get(), "Hello World!");
//!
//!     name.set("fine-reactive");
//!     assert_eq!(display_text.get(), "Hello fine-reactive!");
//! });
//! ```
//!
//! Dependencies are rediscovered on every read: a [`computed`] or [`effect`] body tracks whatever
//! it actually reads during its last run, so branches it didn't take stay unlinked. Writing to a
//! [`source`] enqueues its observers on a microtask-coalesced scheduler (see [`get_scheduler`]);
//! derivations recompute lazily, the next time something reads them, while effects are forced to
//! run once per flush regardless of whether anyone reads their (nonexistent) value. Everything a
//! program creates is owned by the scope that was current when it was created (see [`get_scope`]),
//! so disposing a scope tears down every source, derivation and nested scope beneath it.

mod computed;
mod context;
mod effect;
mod error;
mod observable;
mod scheduler;
mod scope;
mod source;
mod sugar;

/// Internal node/root representation. Public only so [`AnyNode`]'s methods typecheck across crate
/// boundaries; not meant to be named directly.
#[doc(hidden)]
pub mod node;
#[doc(hidden)]
pub mod root;

pub use computed::{computed, computed_with_options, Computed, ComputedOptions};
pub use context::{expect_context, get_context, set_context};
pub use effect::{effect, effect_with_options, EffectHandle, EffectOptions};
pub use error::ReactiveError;
pub use node::AnyNode;
pub use observable::{is_observable, is_subject, readonly, IntoReadonly, Readonly, Writable};
pub use root::{peek, untrack};
pub use scheduler::{batch, clear_microtask_spawner, get_scheduler, set_microtask_spawner, tick, Scheduler};
pub use scope::{create_child_scope, dispose, get_scope, get_scope_of, on_dispose, on_error, root, scope, DisposeHandle, Scope};
pub use source::{source, source_with_options, Source, SourceOptions};
pub use sugar::{on, Trackable};

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn cleanup() {
        root(|_| {
            let cleanup_called = source(false);
            let scope = create_child_scope(|| {
                on_dispose(move || {
                    cleanup_called.set(true);
                });
            });
            assert!(!cleanup_called.get());
            scope.dispose();
            assert!(cleanup_called.get());
        });
    }

    #[test]
    fn cleanup_in_effect() {
        root(|_| {
            let trigger = source(0);
            let counter = source(0);

            effect(move || {
                trigger.track();
                on_dispose(move || {
                    counter.next(|v| v + 1);
                });
                None
            });

            assert_eq!(counter.get(), 0);

            trigger.set(1);
            tick();
            assert_eq!(counter.get(), 1);

            trigger.set(2);
            tick();
            assert_eq!(counter.get(), 2);
        });
    }

    #[test]
    fn cleanup_is_untracked() {
        root(|_| {
            let trigger = source(0);
            let counter = source(0);

            effect(move || {
                counter.set(counter.get_untracked() + 1);
                on_dispose(move || {
                    trigger.track(); // trigger should not become a dependency of this effect
                });
                None
            });

            assert_eq!(counter.get(), 1);

            trigger.set(1);
            tick();
            assert_eq!(counter.get(), 1);
        });
    }

    #[test]
    fn batch_updates_effects_at_end() {
        root(|_| {
            let state1 = source(1);
            let state2 = source(2);
            let counter = source(0);
            effect(move || {
                counter.next(|v| v + 1);
                let _ = state1.get() + state2.get();
                None
            });
            assert_eq!(counter.get(), 1);
            state1.set(2);
            state2.set(3);
            tick();
            assert_eq!(counter.get(), 2);
            batch(|| {
                state1.set(3);
                state2.set(4);
            });
            assert_eq!(counter.get(), 3);
        });
    }
}
