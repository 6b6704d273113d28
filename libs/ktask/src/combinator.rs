// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Waiting on several tasks at once.

use crate::cancel::CancelToken;
use crate::signal::{self, Signal};
use crate::task::Task;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts down notifications and closes its signal when the count hits zero.
///
/// Counting down is non-blocking and saturates at zero, so surplus notifications are dropped.
struct Latch {
    remaining: AtomicUsize,
    signal: Signal,
}

impl Latch {
    fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            signal: Signal::new(),
        }
    }

    fn count_down(&self) {
        let res = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if res == Ok(1) {
            self.signal.close();
        }
    }

    /// Blocks until the latch opens or `token` is cancelled.
    fn wait(&self, token: Option<&CancelToken>) {
        match token {
            Some(token) => {
                signal::select(&[&self.signal, token.signal()], None);
            }
            None => self.signal.wait(),
        }
    }
}

/// Blocks until every task in `tasks` has settled or `token` is cancelled.
///
/// Tasks that are already settled are not waited on, if all of them are this returns without
/// registering anything.
pub fn wait_all(tasks: &[Task], token: Option<&CancelToken>) {
    let pending: Vec<&Task> = tasks.iter().filter(|task| !task.is_done()).collect();
    if pending.is_empty() {
        return;
    }

    tracing::trace!(tasks = tasks.len(), pending = pending.len(), "wait_all");

    let latch = Arc::new(Latch::new(pending.len()));
    for task in pending {
        let latch = latch.clone();
        task.continue_with(
            move |_| {
                latch.count_down();
                Ok(None)
            },
            token,
        );
    }

    latch.wait(token);
}

/// Blocks until any task in `tasks` has settled or `token` is cancelled.
///
/// Returns immediately if one of the tasks is already settled, or if `tasks` is empty.
///
/// The continuations registered on the tasks that did not settle first are not removed. They are
/// bound to a token derived from `token` which is cancelled on return, so once their task settles
/// they are dropped without running.
pub fn wait_any(tasks: &[Task], token: Option<&CancelToken>) {
    if tasks.is_empty() || tasks.iter().any(Task::is_done) {
        return;
    }

    tracing::trace!(tasks = tasks.len(), "wait_any");

    let child = token.map_or_else(CancelToken::new, CancelToken::child);
    let latch = Arc::new(Latch::new(1));
    for task in tasks {
        let latch = latch.clone();
        task.continue_with(
            move |_| {
                latch.count_down();
                Ok(None)
            },
            Some(&child),
        );
    }

    latch.wait(Some(&child));
    child.cancel(None);
}
