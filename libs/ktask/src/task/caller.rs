// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::Error;
use crate::task::Task;
use crate::value::Value;

/// The outcome of a task body or continuation.
///
/// `Ok` completes the task with the value (a [`Value`] holding a [`Task`] makes the task adopt that
/// task's outcome), `Err` faults it with the error.
pub type Output = Result<Option<Value>, Error>;

/// A continuation body that may decline to handle the upstream outcome.
pub(crate) trait FollowCaller: Send {
    /// Runs the continuation against the settled `upstream` task.
    ///
    /// Returns `None` if the continuation does not apply to the upstream outcome, which is then
    /// passed on to the dependent task unchanged.
    fn try_call(self: Box<Self>, upstream: &Task) -> Option<Output>;
}

/// Runs for every outcome.
pub(crate) struct ContinueCaller<F>(pub(crate) F);

/// Runs only if upstream completed.
pub(crate) struct ThenCaller<F>(pub(crate) F);

/// Runs only if upstream faulted.
pub(crate) struct CatchCaller<F>(pub(crate) F);

impl<F> FollowCaller for ContinueCaller<F>
where
    F: FnOnce(&Task) -> Output + Send,
{
    fn try_call(self: Box<Self>, upstream: &Task) -> Option<Output> {
        let Self(f) = *self;
        Some(f(upstream))
    }
}

impl<F> FollowCaller for ThenCaller<F>
where
    F: FnOnce(Option<Value>) -> Output + Send,
{
    fn try_call(self: Box<Self>, upstream: &Task) -> Option<Output> {
        if !upstream.is_completed() {
            return None;
        }
        let Self(f) = *self;
        Some(f(upstream.result()))
    }
}

impl<F> FollowCaller for CatchCaller<F>
where
    F: FnOnce(Option<Error>) -> Output + Send,
{
    fn try_call(self: Box<Self>, upstream: &Task) -> Option<Output> {
        if !upstream.is_faulted() {
            return None;
        }
        let Self(f) = *self;
        Some(f(upstream.error()))
    }
}
