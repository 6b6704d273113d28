// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::cancel::CancelToken;
use crate::dispatch;
use crate::error::Error;
use crate::pool::{Pool, Recycle};
use crate::signal;
use crate::task::Task;
use crate::task::caller::FollowCaller;
use core::panic::AssertUnwindSafe;
use std::panic;

lazy_static::lazy_static! {
    static ref FOLLOWERS: Pool<Follower> = Pool::new(Pool::<Follower>::DEFAULT_CAPACITY);
}

/// A continuation registered on a pending task.
///
/// Followers form an intrusive LIFO list hanging off the task record. The record is pooled: the
/// job is moved out and the empty record released in a single step by [`Follower::into_job`].
#[derive(Default)]
pub(crate) struct Follower {
    job: Option<FollowJob>,
    next: Option<Box<Follower>>,
}

struct FollowJob {
    /// The task settled with the continuation's outcome.
    dependent: Task,
    token: Option<CancelToken>,
    caller: Box<dyn FollowCaller>,
}

impl Follower {
    fn assign(job: FollowJob) -> Box<Self> {
        let mut follower = FOLLOWERS.take();
        follower.job = Some(job);
        follower
    }

    pub(crate) fn link(&mut self, next: Option<Box<Follower>>) {
        self.next = next;
    }

    fn into_job(mut self: Box<Self>) -> Option<FollowJob> {
        debug_assert!(self.next.is_none(), "follower released while still linked");
        let job = self.job.take();
        FOLLOWERS.give(self);
        job
    }
}

impl Recycle for Follower {
    fn reset(&mut self) {
        self.job = None;
        self.next = None;
    }
}

/// Registers `caller` on `upstream` and returns the dependent task.
///
/// If `upstream` is already settled the continuation is dispatched right away.
pub(crate) fn follow(
    upstream: &Task,
    caller: Box<dyn FollowCaller>,
    token: Option<&CancelToken>,
) -> Task {
    let dependent = Task::pending();
    let follower = Follower::assign(FollowJob {
        dependent: dependent.clone(),
        token: token.cloned(),
        caller,
    });

    if let Err(follower) = upstream.push_follower(follower) {
        tracing::trace!(
            task.tid = upstream.id().as_u64(),
            "follow; upstream already settled"
        );
        dispatch_follower(follower, upstream, false);
    }

    dependent
}

/// Blocks until `upstream` settles or `token` is cancelled, then runs `caller` on this thread.
pub(crate) fn follow_await(
    upstream: &Task,
    caller: Box<dyn FollowCaller>,
    token: Option<&CancelToken>,
) -> Task {
    let dependent = Task::pending();
    let done = upstream.done();

    let settled = match token {
        Some(token) => signal::select(&[&done, token.signal()], None) == Some(0),
        None => {
            done.wait();
            true
        }
    };

    if settled {
        exec(&dependent, caller, upstream);
    } else {
        dependent.cancel_with(token.and_then(CancelToken::cause));
    }

    dependent
}

/// Dispatches every follower of the chain starting at `head`. Called once, by the thread that
/// settled `upstream`.
pub(crate) fn wake_all(mut head: Option<Box<Follower>>, upstream: &Task) {
    while let Some(mut follower) = head {
        head = follower.next.take();
        dispatch_follower(follower, upstream, true);
    }
}

/// Returns a chain that will never run to the pool.
///
/// Dependents only kept alive by the chain are torn down here too: their own chains go onto the
/// work list instead of being released by a nested `Record::drop`, so the stack depth does not
/// grow with the length of the task graph.
pub(crate) fn release_chain(head: Option<Box<Follower>>) {
    let Some(head) = head else {
        return;
    };

    let mut chains = vec![head];
    while let Some(mut follower) = chains.pop() {
        if let Some(next) = follower.next.take() {
            chains.push(next);
        }
        if let Some(mut job) = follower.job.take() {
            if let Some(chain) = job.dependent.take_followers_if_unique() {
                chains.push(chain);
            }
        }
        FOLLOWERS.give(follower);
    }
}

fn dispatch_follower(follower: Box<Follower>, upstream: &Task, check_token: bool) {
    let Some(FollowJob {
        dependent,
        token,
        caller,
    }) = follower.into_job()
    else {
        return;
    };

    if check_token {
        if let Some(token) = token.as_ref().filter(|token| token.is_cancelled()) {
            dependent.cancel_with(token.cause());
            return;
        }
    }

    let upstream = upstream.clone();
    let res = dispatch::spawn("follower", dependent.id(), {
        let dependent = dependent.clone();
        move || {
            // the token may have been cancelled while the unit was queued
            if let Some(token) = token.filter(CancelToken::is_cancelled) {
                dependent.cancel_with(token.cause());
                return;
            }
            exec(&dependent, caller, &upstream);
        }
    });

    if let Err(err) = res {
        dependent.reject_with(Some(Error::from(err)));
    }
}

/// Runs `caller` against the settled `upstream` and settles `dependent` with the outcome.
///
/// A panicking continuation faults `dependent`, unless the panic carries the force-propagation
/// marker, which keeps unwinding.
fn exec(dependent: &Task, caller: Box<dyn FollowCaller>, upstream: &Task) {
    match panic::catch_unwind(AssertUnwindSafe(|| caller.try_call(upstream))) {
        Ok(Some(output)) => dependent.settle(output),
        Ok(None) => dependent.pass_through(upstream),
        Err(payload) => dependent.reject_with(Some(Error::from_panic(payload))),
    }
}

#[cfg(feature = "counters")]
pub(crate) fn pool_counters() -> crate::pool::PoolCounters {
    FOLLOWERS.counters()
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::task::caller::ContinueCaller;
    use crate::task::caller::Output;

    fn noop() -> Box<dyn FollowCaller> {
        Box::new(ContinueCaller(|_: &Task| -> Output { Ok(None) }))
    }

    #[test]
    fn dropped_pending_task_releases_followers() {
        let upstream = Task::pending();
        let dependents: Vec<_> = (0..3).map(|_| follow(&upstream, noop(), None)).collect();

        drop(upstream);
        for dependent in dependents {
            // the chain was released without running anything
            assert!(!dependent.is_done());
        }
    }

    #[test]
    fn chain_is_lifo() {
        let upstream = Task::pending();
        let first = follow(&upstream, noop(), None);
        let second = follow(&upstream, noop(), None);

        upstream.0.followers.with(|ptr| {
            // Safety: no concurrent access in this test
            let head = unsafe { (*ptr).as_ref() }.unwrap();
            let job = head.job.as_ref().unwrap();
            assert!(job.dependent.ptr_eq(&second));
            let next = head.next.as_ref().unwrap();
            assert!(next.job.as_ref().unwrap().dependent.ptr_eq(&first));
            assert!(next.next.is_none());
        });
    }

    #[test]
    fn cancelled_token_skips_dispatch() {
        let upstream = Task::pending();
        let token = CancelToken::new();
        let dependent = follow(&upstream, noop(), Some(&token));

        token.cancel(Error::msg("stop"));
        let before = dispatch::tests::spawned_on_current_thread();
        upstream.resolve_with(None);

        assert!(dependent.is_canceled());
        assert_eq!(dependent.error().unwrap().to_string(), "stop");
        assert_eq!(dispatch::tests::spawned_on_current_thread(), before);
    }
}
