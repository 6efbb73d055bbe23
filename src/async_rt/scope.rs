//! Cancellation scopes: a parent-linked tree, implemented as an implicit
//! parameter carried through a linear handler rather than threaded
//! explicitly through every async call (spec §4.5.3).

use std::cell::Cell;
use std::rc::Rc;

struct ScopeInner {
    parent: Option<CancellationScope>,
    cancelled: Cell<bool>,
    reason: std::cell::RefCell<Option<String>>,
}

/// A node in the cancellation tree. Cloning is cheap (`Rc`) and shares
/// identity — cancelling a scope is visible through every clone and every
/// descendant scope created from it.
#[derive(Clone)]
pub struct CancellationScope(Rc<ScopeInner>);

impl CancellationScope {
    pub fn root() -> Self {
        Self(Rc::new(ScopeInner {
            parent: None,
            cancelled: Cell::new(false),
            reason: std::cell::RefCell::new(None),
        }))
    }

    pub fn child(&self) -> Self {
        Self(Rc::new(ScopeInner {
            parent: Some(self.clone()),
            cancelled: Cell::new(false),
            reason: std::cell::RefCell::new(None),
        }))
    }

    /// Mark this scope cancelled. Does not touch the parent; cancellation
    /// only ever flows down the tree (checked on read, not pushed on
    /// write — see [`Self::is_cancelled`]).
    pub fn cancel(&self, reason: impl Into<String>) {
        self.0.cancelled.set(true);
        *self.0.reason.borrow_mut() = Some(reason.into());
    }

    /// Whether this scope or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        let mut cur = Some(self.clone());
        while let Some(scope) = cur {
            if scope.0.cancelled.get() {
                return true;
            }
            cur = scope.0.parent.clone();
        }
        false
    }

    pub fn cancellation_reason(&self) -> Option<String> {
        let mut cur = Some(self.clone());
        while let Some(scope) = cur {
            if scope.0.cancelled.get() {
                return scope.0.reason.borrow().clone();
            }
            cur = scope.0.parent.clone();
        }
        None
    }
}

thread_local! {
    static CURRENT: std::cell::RefCell<CancellationScope> =
        std::cell::RefCell::new(CancellationScope::root());
}

/// The cancellation scope in effect for the calling strand.
pub fn current() -> CancellationScope {
    CURRENT.with(|c| c.borrow().clone())
}

/// Run `body` with a fresh child of the current scope as the active
/// scope, restoring the previous one once it returns normally. Bodies that
/// leave via a `throw`/`NoResume` unwind should restore the previous scope
/// from their own [`crate::effect::linear::defer`] instead — a plain
/// post-call restore here would be skipped by that jump.
pub fn with_scope<R>(scope: &CancellationScope, body: impl FnOnce() -> R) -> R {
    let previous = current();
    CURRENT.with(|c| *c.borrow_mut() = scope.clone());
    let result = body();
    CURRENT.with(|c| *c.borrow_mut() = previous);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_propagates_to_children() {
        let root = CancellationScope::root();
        let child = root.child();
        assert!(!child.is_cancelled());
        root.cancel("shutdown");
        assert!(child.is_cancelled());
        assert_eq!(child.cancellation_reason().as_deref(), Some("shutdown"));
    }

    #[test]
    fn cancelling_a_child_does_not_affect_parent() {
        let root = CancellationScope::root();
        let child = root.child();
        child.cancel("local failure");
        assert!(!root.is_cancelled());
        assert!(child.is_cancelled());
    }
}
