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
use crate::task::Task;
use crate::task::caller::Output;
use crate::task::factory::{Rejecter, Resolver};
use core::panic::AssertUnwindSafe;
use core::time::Duration;
use std::{panic, thread};

lazy_static::lazy_static! {
    static ref STARTERS: Pool<Starter> = Pool::new(Pool::<Starter>::DEFAULT_CAPACITY);
}

/// The first body of a task graph.
pub(crate) trait StartCaller: Send {
    fn call(self: Box<Self>, task: &Task);
}

/// Pooled record carrying a body to the unit of work that runs it.
#[derive(Default)]
pub(crate) struct Starter {
    job: Option<StartJob>,
}

struct StartJob {
    task: Task,
    token: Option<CancelToken>,
    body: Box<dyn StartCaller>,
}

/// `run`: the body returns the outcome.
pub(crate) struct RunBody<F>(pub(crate) F);

/// `start`: the body settles the task through a resolver/rejecter pair.
pub(crate) struct StartBody<F>(pub(crate) F);

/// `delay`: completes after a timeout, unless the token is cancelled first.
pub(crate) struct DelayBody {
    pub(crate) timeout: Duration,
    pub(crate) token: Option<CancelToken>,
}

impl Starter {
    fn into_job(mut self: Box<Self>) -> Option<StartJob> {
        let job = self.job.take();
        STARTERS.give(self);
        job
    }
}

impl Recycle for Starter {
    fn reset(&mut self) {
        self.job = None;
    }
}

/// Creates a pending task and dispatches `body` to settle it.
pub(crate) fn start(body: Box<dyn StartCaller>, token: Option<&CancelToken>) -> Task {
    let task = Task::pending();

    let mut starter = STARTERS.take();
    starter.job = Some(StartJob {
        task: task.clone(),
        token: token.cloned(),
        body,
    });

    if let Err(err) = dispatch::spawn("starter", task.id(), move || run(starter)) {
        task.reject_with(Some(Error::from(err)));
    }

    task
}

fn run(starter: Box<Starter>) {
    let Some(StartJob { task, token, body }) = starter.into_job() else {
        return;
    };

    if let Some(token) = token.filter(CancelToken::is_cancelled) {
        task.cancel_with(token.cause());
        return;
    }

    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body.call(&task))) {
        task.reject_with(Some(Error::from_panic(payload)));
    }
}

impl<F> StartCaller for RunBody<F>
where
    F: FnOnce() -> Output + Send,
{
    fn call(self: Box<Self>, task: &Task) {
        let Self(f) = *self;
        task.settle(f());
    }
}

impl<F> StartCaller for StartBody<F>
where
    F: FnOnce(Resolver, Rejecter) + Send,
{
    fn call(self: Box<Self>, task: &Task) {
        let Self(f) = *self;
        f(Resolver(task.clone()), Rejecter(task.clone()));
    }
}

impl StartCaller for DelayBody {
    fn call(self: Box<Self>, task: &Task) {
        match self.token {
            Some(token) => {
                if token.signal().wait_timeout(self.timeout) {
                    task.cancel_with(token.cause());
                } else {
                    task.resolve_with(None);
                }
            }
            None => {
                thread::sleep(self.timeout);
                task.resolve_with(None);
            }
        }
    }
}

#[cfg(feature = "counters")]
pub(crate) fn pool_counters() -> crate::pool::PoolCounters {
    STARTERS.counters()
}
