// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::cancel::CancelToken;
use crate::error::{self, Canceled, DeadlineExceeded, Error, Rejected};
use crate::task::caller::Output;
use crate::task::starter::{self, DelayBody, RunBody, StartBody};
use crate::task::state::{CANCELED, COMPLETED, FAULTED};
use crate::task::{Data, Task};
use crate::value::Value;
use core::fmt;
use core::time::Duration;

crate::loom::lazy_static! {
    static ref RESOLVED: Task = Task::settled(COMPLETED, Data::Value(None));
    static ref REJECTED: Task = Task::settled(FAULTED, Data::Error(Some(error::rejected())));
    static ref CANCELED_TASK: Task = Task::settled(CANCELED, Data::Error(Some(error::canceled())));
    static ref DEADLINE_EXCEEDED_TASK: Task =
        Task::settled(CANCELED, Data::Error(Some(error::deadline_exceeded())));
}

/// Completes a task through [`Resolver::resolve`].
#[derive(Clone)]
pub struct Resolver(pub(crate) Task);

/// Faults a task through [`Rejecter::reject`].
#[derive(Clone)]
pub struct Rejecter(pub(crate) Task);

/// Returns a completed task.
///
/// `resolve(None)` returns a shared task without allocating. Resolving with a [`Value`] holding a
/// [`Task`] blocks until that task settles and returns a task with the same outcome.
///
/// # Panics
///
/// Panics with a [`ForcePanic`](crate::ForcePanic) payload if the inner task is faulted with the
/// force-propagation marker.
pub fn resolve(value: impl Into<Option<Value>>) -> Task {
    match value.into() {
        None => RESOLVED.clone(),
        Some(value) => {
            let task = Task::pending();
            task.resolve_with(Some(value));
            task
        }
    }
}

/// Returns a faulted task.
///
/// `reject(None)` returns a shared task faulted with the [`Rejected`] error, without allocating.
///
/// # Panics
///
/// Rejecting with the force-propagation marker ([`Error::force`]) panics with its
/// [`ForcePanic`](crate::ForcePanic) payload instead of returning a task.
pub fn reject(error: impl Into<Option<Error>>) -> Task {
    match error.into() {
        None => REJECTED.clone(),
        Some(error) if error.is::<Rejected>() => REJECTED.clone(),
        Some(error) => {
            let task = Task::pending();
            task.reject_with(Some(error));
            task
        }
    }
}

/// Returns a canceled task.
///
/// `cancel(None)` cancels with the generic [`Canceled`] cause. Tasks canceled with the generic
/// cause or with [`DeadlineExceeded`] are shared and do not allocate.
pub fn cancel(cause: impl Into<Option<Error>>) -> Task {
    match cause.into() {
        None => CANCELED_TASK.clone(),
        Some(cause) if cause.is::<Canceled>() => CANCELED_TASK.clone(),
        Some(cause) if cause.is::<DeadlineExceeded>() => DEADLINE_EXCEEDED_TASK.clone(),
        Some(cause) => {
            let task = Task::pending();
            task.cancel_with(Some(cause));
            task
        }
    }
}

/// Returns a pending task together with the handles that settle it.
pub fn new() -> (Task, Resolver, Rejecter) {
    let task = Task::pending();
    (task.clone(), Resolver(task.clone()), Rejecter(task))
}

/// Runs `body` as an independent unit of work, passing it the handles that settle the returned
/// task.
///
/// The task faults if `body` panics. If `token` is already cancelled, `body` is never dispatched
/// and the returned task is canceled with the token's cause.
pub fn start<F>(body: F, token: Option<&CancelToken>) -> Task
where
    F: FnOnce(Resolver, Rejecter) + Send + 'static,
{
    if let Some(canceled) = canceled_by(token) {
        return canceled;
    }
    starter::start(Box::new(StartBody(body)), token)
}

/// Runs `body` as an independent unit of work and settles the returned task with its output.
///
/// The task faults if `body` panics. If `token` is already cancelled, `body` is never dispatched
/// and the returned task is canceled with the token's cause.
pub fn run<F>(body: F, token: Option<&CancelToken>) -> Task
where
    F: FnOnce() -> Output + Send + 'static,
{
    if let Some(canceled) = canceled_by(token) {
        return canceled;
    }
    starter::start(Box::new(RunBody(body)), token)
}

/// Returns a task that completes without a value after `timeout`.
///
/// If `token` is cancelled first, the task is canceled with the token's cause instead.
pub fn delay(timeout: Duration, token: Option<&CancelToken>) -> Task {
    if let Some(canceled) = canceled_by(token) {
        return canceled;
    }
    starter::start(
        Box::new(DelayBody {
            timeout,
            token: token.cloned(),
        }),
        token,
    )
}

/// Returns a canceled task if `token` is already cancelled.
pub(crate) fn canceled_by(token: Option<&CancelToken>) -> Option<Task> {
    let token = token.filter(|token| token.is_cancelled())?;
    Some(cancel(token.cause()))
}

// === impl Resolver ===

impl Resolver {
    /// Completes the task with `value`, a no-op if it is already settled.
    ///
    /// # Panics
    ///
    /// Panics with a [`ForcePanic`](crate::ForcePanic) payload when resolving a task with itself.
    pub fn resolve(&self, value: impl Into<Option<Value>>) {
        self.0.resolve_with(value.into());
    }

    pub fn task(&self) -> &Task {
        &self.0
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Resolver").field(&self.0).finish()
    }
}

// === impl Rejecter ===

impl Rejecter {
    /// Faults the task with `error`, a no-op if it is already settled.
    ///
    /// `reject(None)` faults the task with the shared [`Rejected`] error.
    ///
    /// # Panics
    ///
    /// Rejecting with the force-propagation marker ([`Error::force`]) panics with its
    /// [`ForcePanic`](crate::ForcePanic) payload.
    pub fn reject(&self, error: impl Into<Option<Error>>) {
        self.0.reject_with(error.into());
    }

    pub fn task(&self) -> &Task {
        &self.0
    }
}

impl fmt::Debug for Rejecter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rejecter").field(&self.0).finish()
    }
}
