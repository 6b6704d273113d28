// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::{self, Error};
use crate::signal::Signal;
use crate::{dispatch, task::Id};
use core::fmt;
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// A cooperative cancellation capability.
///
/// Tasks check a token right before they dispatch work and again right before a body runs. A body
/// that is already running is never interrupted, so cancellation is best-effort.
///
/// Tokens form a tree: cancelling a token cancels every token derived from it through
/// [`CancelToken::child`], with the same cause.
#[derive(Clone)]
pub struct CancelToken(Arc<Inner>);

struct Inner {
    signal: Signal,
    state: Mutex<TokenState>,
}

struct TokenState {
    cause: Option<Error>,
    children: Vec<Weak<Inner>>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            signal: Signal::new(),
            state: Mutex::new(TokenState {
                cause: None,
                children: Vec::new(),
            }),
        }))
    }

    /// Returns a token that cancels itself with [`DeadlineExceeded`](error::DeadlineExceeded) once
    /// `timeout` elapses.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let token = Self::new();
        token.arm_deadline(timeout);
        token
    }

    /// Derives a token that is cancelled whenever `self` is.
    ///
    /// Cancelling the child leaves the parent untouched.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();

        let inherited = {
            let mut state = self.0.state.lock();
            match &state.cause {
                Some(cause) => Some(cause.clone()),
                None => {
                    state.children.retain(|child| child.strong_count() > 0);
                    state.children.push(Arc::downgrade(&child.0));
                    None
                }
            }
        };

        if let Some(cause) = inherited {
            child.cancel(cause);
        }
        child
    }

    /// Derives a child token that additionally cancels itself once `timeout` elapses.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let child = self.child();
        child.arm_deadline(timeout);
        child
    }

    /// Cancels this token and every token derived from it.
    ///
    /// `None` cancels with the generic [`Canceled`](error::Canceled) cause. Returns `false` if the
    /// token was already cancelled, the original cause is kept in that case.
    pub fn cancel(&self, cause: impl Into<Option<Error>>) -> bool {
        let cause = cause.into().unwrap_or_else(error::canceled);

        let children = {
            let mut state = self.0.state.lock();
            if state.cause.is_some() {
                return false;
            }
            state.cause = Some(cause.clone());
            core::mem::take(&mut state.children)
        };

        tracing::trace!(token = ?self, %cause, children = children.len(), "CancelToken::cancel");
        self.0.signal.close();

        for child in children.iter().filter_map(Weak::upgrade) {
            CancelToken(child).cancel(cause.clone());
        }

        true
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.signal.is_closed()
    }

    /// The cause this token was cancelled with, `None` while it is not cancelled.
    pub fn cause(&self) -> Option<Error> {
        self.0.state.lock().cause.clone()
    }

    /// The signal closed when this token is cancelled.
    pub fn signal(&self) -> &Signal {
        &self.0.signal
    }

    fn arm_deadline(&self, timeout: Duration) {
        let signal = self.0.signal.clone();
        let token = Arc::downgrade(&self.0);

        let res = dispatch::spawn("deadline", Id::stub(), move || {
            if !signal.wait_timeout(timeout) {
                if let Some(token) = token.upgrade() {
                    CancelToken(token).cancel(error::deadline_exceeded());
                }
            }
        });

        if let Err(err) = res {
            tracing::error!(%err, "failed to arm cancellation deadline");
            self.cancel(Error::from(err));
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("addr", &Arc::as_ptr(&self.0))
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::error::{Canceled, DeadlineExceeded};
    use std::time::Instant;

    #[test]
    fn cancel_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cause().is_none());

        assert!(token.cancel(None));
        assert!(!token.cancel(Error::msg("second")));
        assert!(token.is_cancelled());
        assert!(token.signal().is_closed());
        assert!(token.cause().unwrap().is::<Canceled>());
    }

    #[test]
    fn children_follow_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        let grandchild = child.child();

        child.cancel(Error::msg("child only"));
        assert!(!parent.is_cancelled());
        assert!(grandchild.is_cancelled());

        let sibling = parent.child();
        parent.cancel(Error::msg("shutdown"));
        assert!(sibling.is_cancelled());
        assert_eq!(sibling.cause().unwrap().to_string(), "shutdown");
        // the earlier cause sticks
        assert_eq!(child.cause().unwrap().to_string(), "child only");

        let late = parent.child();
        assert!(late.is_cancelled());
        assert_eq!(late.cause().unwrap().to_string(), "shutdown");
    }

    #[test]
    fn deadline_fires() {
        let start = Instant::now();
        let token = CancelToken::with_timeout(Duration::from_millis(20));
        token.signal().wait();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(token.cause().unwrap().is::<DeadlineExceeded>());
    }

    #[test]
    fn explicit_cancel_beats_deadline() {
        let parent = CancelToken::new();
        let token = parent.child_with_timeout(Duration::from_secs(60));
        parent.cancel(None);
        assert!(token.cause().unwrap().is::<Canceled>());
    }
}
