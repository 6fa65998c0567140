//! Pre-render gate
//!
//! Browsers may render a page speculatively before the user ever sees it.
//! Tracking calls made during that phase wait for the first visibility
//! change instead of counting a view that never happened.

use std::cell::RefCell;

use beacon_core::VisibilityState;

/// Holds calls made while the page is pre-rendered
#[derive(Debug)]
pub struct PrerenderGate<T> {
    deferred: RefCell<Vec<T>>,
}

impl<T> Default for PrerenderGate<T> {
    fn default() -> Self {
        Self {
            deferred: RefCell::new(Vec::new()),
        }
    }
}

impl<T> PrerenderGate<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass `call` through, or keep it until [`PrerenderGate::release`] when
    /// the page is pre-rendered and pre-rendered views are not counted.
    pub fn admit(&self, state: Option<VisibilityState>, count_pre_rendered: bool, call: T) -> Option<T> {
        if !count_pre_rendered && state == Some(VisibilityState::Prerender) {
            self.deferred.borrow_mut().push(call);
            tracing::debug!(pending = self.pending(), "page is pre-rendered, call deferred");
            return None;
        }
        Some(call)
    }

    /// Visibility changed: hand back every deferred call in order
    pub fn release(&self) -> Vec<T> {
        std::mem::take(&mut *self.deferred.borrow_mut())
    }

    pub fn pending(&self) -> usize {
        self.deferred.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerendered_calls_wait() {
        let gate = PrerenderGate::new();
        assert_eq!(gate.admit(Some(VisibilityState::Prerender), false, 1), None);
        assert_eq!(gate.admit(Some(VisibilityState::Prerender), false, 2), None);
        assert_eq!(gate.pending(), 2);

        assert_eq!(gate.release(), vec![1, 2]);
        assert!(gate.release().is_empty());
    }

    #[test]
    fn test_visible_or_unknown_pass_through() {
        let gate = PrerenderGate::new();
        assert_eq!(gate.admit(Some(VisibilityState::Visible), false, 1), Some(1));
        assert_eq!(gate.admit(None, false, 2), Some(2));
        assert_eq!(gate.admit(Some(VisibilityState::Prerender), true, 3), Some(3));
        assert_eq!(gate.pending(), 0);
    }
}
