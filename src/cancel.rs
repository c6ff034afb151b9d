//! Run-level cancellation signal.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Cloneable cancellation flag shared by every task of a run.
///
/// Cancelling a token cancels all of its children; cancelling a child leaves
/// the parent untouched.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<TokenState>,
    cvar: Condvar,
}

#[derive(Default)]
struct TokenState {
    cancelled: bool,
    children: Vec<Weak<Inner>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> CancellationToken {
        let child = CancellationToken::new();
        let mut state = self.inner.state.lock();
        if state.cancelled {
            child.inner.state.lock().cancelled = true;
        } else {
            state.children.retain(|weak| weak.strong_count() > 0);
            state.children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    pub fn cancel(&self) {
        Inner::cancel(&self.inner);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` when the
    /// sleep was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            return false;
        }
        self.inner
            .cvar
            .wait_while_for(&mut state, |state| !state.cancelled, duration);
        !state.cancelled
    }
}

impl Inner {
    fn cancel(inner: &Arc<Inner>) {
        let children = {
            let mut state = inner.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            inner.cvar.notify_all();
            std::mem::take(&mut state.children)
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            Inner::cancel(&child);
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
