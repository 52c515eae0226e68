//! Small sugar layered on top of the core primitives; introduces no new engine semantics.

use crate::computed::Computed;
use crate::observable::Readonly;
use crate::root::untrack;
use crate::source::Source;

/// Implemented by every reactive value so it can be named in [`on`]'s explicit dependency list.
pub trait Trackable {
    /// Adds this value as a dependency of the current tracked execution without reading it.
    fn track_dep(&self);
}

impl<T> Trackable for Source<T> {
    fn track_dep(&self) {
        self.track();
    }
}
impl<T: Clone + 'static> Trackable for Computed<T> {
    fn track_dep(&self) {
        self.track();
    }
}
impl<T: Clone + 'static> Trackable for Readonly<T> {
    fn track_dep(&self) {
        self.track();
    }
}

/// Wraps `f` so that only `dependencies` are tracked, regardless of what `f` itself reads — a
/// helper for making an [`effect`](crate::effect::effect)'s dependencies explicit rather than
/// implicit in its body.
///
/// `dependencies` are boxed trait objects (not references) because every reactive handle this
/// runtime hands out is `'static` — owned by a leaked [`Root`](crate::root::Root) arena, not by a
/// borrowed scope — so there is no borrow to take a reference to in the first place; `effect`'s
/// and `computed`'s own `'static` bound on the body would reject a borrowed dependency list anyway.
///
/// ```
/// use fine_reactive::*;
///
/// root(|_| {
///     let a = source(0);
///     let b = source(0);
///     let runs = source(0);
///     effect(on([Box::new(a)], move || {
///         // `b` is read here but, because it wasn't listed in `on`'s dependency array, does
///         // not cause a re-run when it changes.
///         runs.next(|v| v + 1);
///         let _ = b.get_untracked();
///         None
///     }));
///     assert_eq!(runs.get(), 1);
///     b.set(1);
///     tick();
///     assert_eq!(runs.get(), 1);
///     a.set(1);
///     tick();
///     assert_eq!(runs.get(), 2);
/// });
/// ```
pub fn on<U, const N: usize>(
    dependencies: [Box<dyn Trackable>; N],
    mut f: impl FnMut() -> U + 'static,
) -> impl FnMut() -> U + 'static {
    move || {
        for dep in &dependencies {
            dep.track_dep();
        }
        untrack(|| f())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::effect;
    use crate::scope::root;
    use crate::source::source;

    #[test]
    fn only_listed_dependencies_trigger_rerun() {
        root(|_| {
            let a = source(0);
            let b = source(0);
            let runs = source(0);
            effect(on([Box::new(a)], move || {
                runs.next(|v| v + 1);
                let _ = b.get_untracked();
                None
            }));
            assert_eq!(runs.get(), 1);
            b.set(1);
            crate::tick();
            assert_eq!(runs.get(), 1);
            a.set(1);
            crate::tick();
            assert_eq!(runs.get(), 2);
        });
    }
}
