// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod caller;
mod factory;
mod follower;
mod id;
mod starter;
mod state;
#[cfg(all(test, not(loom)))]
mod tests;

use crate::cancel::CancelToken;
use crate::error::{self, Error};
use crate::loom::cell::UnsafeCell;
use crate::loom::sync::atomic::Ordering;
use crate::signal::{self, Signal};
use crate::value::Value;
use caller::{CatchCaller, ContinueCaller, ThenCaller};
use core::fmt;
use core::time::Duration;
use follower::Follower;
use state::{
    CANCELED, COMPLETED, DONE, FAULTED, LOCK_FOLLOWERS, LOCK_SIGNAL, LOCK_STATE, State, WAIT_SUB,
};
use std::sync::Arc;
use std::time::Instant;

pub use caller::Output;
pub use factory::{Rejecter, Resolver, cancel, delay, new, reject, resolve, run, start};
pub use id::Id;
pub use state::TaskState;

#[cfg(feature = "counters")]
pub(crate) use follower::pool_counters as follower_counters;
#[cfg(feature = "counters")]
pub(crate) use starter::pool_counters as starter_counters;

/// A handle to a computation that settles exactly once.
///
/// A task is either *pending* or has settled into one of three terminal states: *completed* with an
/// optional [`Value`], *faulted* with an [`Error`], or *canceled* with a cause. Settling is
/// linearizable: when several threads race to resolve, reject and cancel the same task, the first
/// one wins and all others are no-ops.
///
/// `Task` is a cheap reference-counted handle, clones refer to the same task.
///
/// # Continuations
///
/// [`Task::continue_with`], [`Task::then`] and [`Task::catch`] register a continuation that runs as
/// an independent unit of work once the task settles, and return a new task settled with the
/// continuation's outcome. The `*_await` flavours block the calling thread until the task settles
/// and run the continuation inline instead.
#[derive(Clone)]
pub struct Task(Arc<Record>);

struct Record {
    state: State,
    id: Id,
    /// Written once, under `LOCK_STATE`, before the terminal state is published.
    data: UnsafeCell<Data>,
    /// Head of the follower chain. Guarded by `LOCK_FOLLOWERS`.
    followers: UnsafeCell<Option<Box<Follower>>>,
    /// Lazily created completion signal. Guarded by `LOCK_SIGNAL`.
    signal: UnsafeCell<Option<Signal>>,
}

// Safety: all cells are accessed either while holding the corresponding lock bit of the status
// word, or read-only after the terminal state has been published.
unsafe impl Sync for Record {}

enum Data {
    Empty,
    Value(Option<Value>),
    Error(Option<Error>),
}

// === impl Task ===

impl Task {
    pub(crate) fn pending() -> Self {
        Self::from_parts(Id::next(), State::new(), Data::Empty, None)
    }

    /// A task that is settled from the start.
    fn settled(state: u32, data: Data) -> Self {
        Self::from_parts(
            Id::stub(),
            State::settled(state),
            data,
            Some(Signal::closed()),
        )
    }

    fn from_parts(id: Id, state: State, data: Data, signal: Option<Signal>) -> Self {
        Self(Arc::new(Record {
            state,
            id,
            data: UnsafeCell::new(data),
            followers: UnsafeCell::new(None),
            signal: UnsafeCell::new(signal),
        }))
    }

    pub fn id(&self) -> Id {
        self.0.id
    }

    pub fn state(&self) -> TaskState {
        self.0.state.load(Ordering::Acquire).task_state()
    }

    pub fn is_done(&self) -> bool {
        self.0.state.load(Ordering::Acquire).is_done()
    }

    pub fn is_completed(&self) -> bool {
        self.0.state.check(COMPLETED)
    }

    pub fn is_faulted(&self) -> bool {
        self.0.state.check(FAULTED)
    }

    pub fn is_canceled(&self) -> bool {
        self.0.state.check(CANCELED)
    }

    /// Returns `true` if both handles refer to the same task.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Blocks until the task is settled and returns its value.
    ///
    /// Returns `None` if the task was not completed or completed without a value.
    pub fn result(&self) -> Option<Value> {
        self.block_until_done();
        self.with_data(|data| match data {
            Data::Value(value) => value.clone(),
            _ => None,
        })
    }

    /// Blocks until the task is settled and returns its error or cancellation cause.
    ///
    /// Returns `None` for completed tasks.
    pub fn error(&self) -> Option<Error> {
        self.block_until_done();
        self.with_data(|data| match data {
            Data::Error(error) => error.clone(),
            _ => None,
        })
    }

    /// Blocks until the task is settled and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns the error or cancellation cause of a faulted or canceled task.
    pub fn output(&self) -> Result<Option<Value>, Option<Error>> {
        self.block_until_done();
        self.with_data(|data| match data {
            Data::Value(value) => Ok(value.clone()),
            Data::Error(error) => Err(error.clone()),
            Data::Empty => Err(None),
        })
    }

    /// Returns the signal that is closed once this task settles.
    ///
    /// The signal is created on first use, every caller gets the same signal. Settled tasks return a
    /// shared, already closed signal without allocating.
    pub fn done(&self) -> Signal {
        let record = &*self.0;
        if !record.state.lock_if_not(LOCK_SIGNAL, DONE) {
            return Signal::closed();
        }

        let signal = record.signal.with_mut(|ptr| {
            // Safety: we hold `LOCK_SIGNAL`
            let slot = unsafe { &mut *ptr };
            slot.get_or_insert_with(Signal::new).clone()
        });
        record.state.unlock_and_set(LOCK_SIGNAL, None);

        signal
    }

    /// Blocks until this task settles or `token` is cancelled.
    pub fn wait(&self, token: Option<&CancelToken>) -> &Self {
        if self.is_done() {
            return self;
        }

        let done = self.done();
        match token {
            Some(token) => {
                signal::select(&[&done, token.signal()], None);
            }
            None => done.wait(),
        }
        self
    }

    /// Blocks until this task settles, `token` is cancelled or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration, token: Option<&CancelToken>) -> &Self {
        if self.is_done() {
            return self;
        }

        let done = self.done();
        let deadline = Some(Instant::now() + timeout);
        match token {
            Some(token) => signal::select(&[&done, token.signal()], deadline),
            None => signal::select(&[&done], deadline),
        };
        self
    }

    /// Runs `f` with this task once it settles, whatever the outcome.
    pub fn continue_with<F>(&self, f: F, token: Option<&CancelToken>) -> Task
    where
        F: FnOnce(&Task) -> Output + Send + 'static,
    {
        if let Some(canceled) = factory::canceled_by(token) {
            return canceled;
        }
        follower::follow(self, Box::new(ContinueCaller(f)), token)
    }

    /// Blocking flavour of [`Task::continue_with`].
    pub fn continue_await<F>(&self, f: F, token: Option<&CancelToken>) -> Task
    where
        F: FnOnce(&Task) -> Output + Send + 'static,
    {
        if let Some(canceled) = factory::canceled_by(token) {
            return canceled;
        }
        follower::follow_await(self, Box::new(ContinueCaller(f)), token)
    }

    /// Runs `f` with this task's value once it completes.
    ///
    /// If this task faults or is canceled, `f` is not called and the returned task settles with the
    /// same outcome.
    pub fn then<F>(&self, f: F, token: Option<&CancelToken>) -> Task
    where
        F: FnOnce(Option<Value>) -> Output + Send + 'static,
    {
        if let Some(canceled) = factory::canceled_by(token) {
            return canceled;
        }
        follower::follow(self, Box::new(ThenCaller(f)), token)
    }

    /// Blocking flavour of [`Task::then`].
    pub fn then_await<F>(&self, f: F, token: Option<&CancelToken>) -> Task
    where
        F: FnOnce(Option<Value>) -> Output + Send + 'static,
    {
        if let Some(canceled) = factory::canceled_by(token) {
            return canceled;
        }
        follower::follow_await(self, Box::new(ThenCaller(f)), token)
    }

    /// Runs `f` with this task's error once it faults.
    ///
    /// If this task completes or is canceled, `f` is not called and the returned task settles with
    /// the same outcome. Cancellation is not an error and is never caught.
    pub fn catch<F>(&self, f: F, token: Option<&CancelToken>) -> Task
    where
        F: FnOnce(Option<Error>) -> Output + Send + 'static,
    {
        if let Some(canceled) = factory::canceled_by(token) {
            return canceled;
        }
        follower::follow(self, Box::new(CatchCaller(f)), token)
    }

    /// Blocking flavour of [`Task::catch`].
    pub fn catch_await<F>(&self, f: F, token: Option<&CancelToken>) -> Task
    where
        F: FnOnce(Option<Error>) -> Output + Send + 'static,
    {
        if let Some(canceled) = factory::canceled_by(token) {
            return canceled;
        }
        follower::follow_await(self, Box::new(CatchCaller(f)), token)
    }

    // === settling ===

    /// Settles the task with `data`, publishing `state`.
    ///
    /// Returns `false` if the task was already settled.
    fn terminate(&self, state: u32, data: Data) -> bool {
        let record = &*self.0;
        if !record.state.lock_if_not(LOCK_STATE, DONE) {
            tracing::trace!(task.tid = record.id.as_u64(), "Task::terminate; already settled");
            return false;
        }

        record.data.with_mut(|ptr| {
            // Safety: we hold `LOCK_STATE` and the task is not settled, nobody reads the payload
            // until the state is published below.
            unsafe { *ptr = data };
        });
        let signal = record.signal.with_mut(|ptr| {
            // Safety: we hold `LOCK_SIGNAL`
            unsafe { (*ptr).replace(Signal::closed()) }
        });
        let followers = record.followers.with_mut(|ptr| {
            // Safety: we hold `LOCK_FOLLOWERS`, once the state is published no follower is
            // appended anymore.
            unsafe { (*ptr).take() }
        });

        record.state.unlock_and_set(LOCK_STATE, Some(state));
        tracing::debug!(task.tid = record.id.as_u64(), state = %self.state(), "Task::terminate");

        if let Some(signal) = signal {
            signal.close();
        }
        follower::wake_all(followers, self);

        true
    }

    /// Completes the task with `value`.
    ///
    /// If `value` holds a task, this task waits for it and adopts its outcome instead.
    pub(crate) fn resolve_with(&self, value: Option<Value>) {
        let sub = value.as_ref().and_then(Value::as_task).cloned();
        let Some(sub) = sub else {
            self.terminate(COMPLETED, Data::Value(value));
            return;
        };

        if !self.0.state.set_if_not(WAIT_SUB, DONE | WAIT_SUB) {
            return;
        }
        if sub.ptr_eq(self) {
            error::internal_panic_force("a task cannot be resolved with itself");
        }

        tracing::trace!(
            task.tid = self.0.id.as_u64(),
            sub.tid = sub.id().as_u64(),
            "Task::resolve_with; waiting on sub-task"
        );
        sub.wait(None);
        match sub.state() {
            TaskState::Completed => self.resolve_with(sub.result()),
            TaskState::Canceled => self.cancel_with(sub.error()),
            _ => self.reject_with(sub.error()),
        }
    }

    /// Faults the task with `error`, or with the shared [`Rejected`](error::Rejected) error if
    /// there is none.
    ///
    /// The force-propagation marker is never stored: it resumes unwinding instead.
    pub(crate) fn reject_with(&self, error: Option<Error>) {
        let error = error.unwrap_or_else(error::rejected);
        if let Some(force) = error.as_force() {
            force.clone().resume();
        }
        self.terminate(FAULTED, Data::Error(Some(error)));
    }

    pub(crate) fn cancel_with(&self, cause: Option<Error>) {
        self.terminate(CANCELED, Data::Error(cause));
    }

    /// Settles the task with the outcome of a user body.
    pub(crate) fn settle(&self, output: Output) {
        match output {
            Ok(value) => self.resolve_with(value),
            Err(error) => self.reject_with(Some(error)),
        }
    }

    /// Settles the task with the outcome of the settled `upstream` task.
    pub(crate) fn pass_through(&self, upstream: &Task) {
        match upstream.state() {
            TaskState::Completed => self.resolve_with(upstream.result()),
            TaskState::Canceled => self.cancel_with(upstream.error()),
            _ => self.reject_with(upstream.error()),
        }
    }

    /// Appends `follower` to the follower chain.
    ///
    /// # Errors
    ///
    /// Returns the follower back if the task is already settled.
    fn push_follower(&self, mut follower: Box<Follower>) -> Result<(), Box<Follower>> {
        let record = &*self.0;
        if !record.state.lock_if_not(LOCK_FOLLOWERS, DONE) {
            return Err(follower);
        }

        record.followers.with_mut(|ptr| {
            // Safety: we hold `LOCK_FOLLOWERS`
            let head = unsafe { &mut *ptr };
            follower.link(head.take());
            *head = Some(follower);
        });
        record.state.unlock_and_set(LOCK_FOLLOWERS, None);

        tracing::trace!(task.tid = record.id.as_u64(), "Task::push_follower");
        Ok(())
    }

    /// Takes the follower chain of a record no other handle refers to.
    fn take_followers_if_unique(&mut self) -> Option<Box<Follower>> {
        let record = Arc::get_mut(&mut self.0)?;
        record.followers.with_mut(|ptr| {
            // Safety: this is the only handle to the record
            unsafe { (*ptr).take() }
        })
    }

        fn block_until_done(&self) {
        if !self.is_done() {
            self.done().wait();
        }
    }

    /// Reads the payload of a settled task.
    fn with_data<R>(&self, f: impl FnOnce(&Data) -> R) -> R {
        debug_assert!(self.is_done());
        self.0.data.with(|ptr| {
            // Safety: the payload is written once before the terminal state is published and the
            // caller observed that state.
            f(unsafe { &*ptr })
        })
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.0.id)
            .field("state", &self.0.state)
            .finish_non_exhaustive()
    }
}

// === impl Record ===

impl Drop for Record {
    fn drop(&mut self) {
        let head = self.followers.with_mut(|ptr| {
            // Safety: `&mut self`, no other handle to this record exists anymore
            unsafe { (*ptr).take() }
        });
        follower::release_chain(head);
    }
}

#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use crate::dispatch::{self, Job};
    use crate::error::SpawnError;
    use crate::loom::sync::atomic::AtomicUsize;
    use crate::loom::thread;

    /// Runs dispatched units inline so they stay on modeled threads.
    fn run_units_inline() {
        let _ = dispatch::set_spawner(|job: Job| -> Result<(), SpawnError> {
            job();
            Ok(())
        });
    }

    #[test]
    fn terminate_has_a_single_winner() {
        let _trace = crate::test_util::trace_init();
        crate::loom::model(|| {
            let task = Task::pending();

            let other = thread::spawn({
                let task = task.clone();
                move || task.terminate(COMPLETED, Data::Value(Some(Value::new(1_u32))))
            });

            let signal = task.done();
            let won = task.terminate(FAULTED, Data::Error(None));
            let other_won = other.join().unwrap();

            assert!(won ^ other_won);
            assert!(signal.is_closed());
            match task.state() {
                TaskState::Completed => assert!(other_won),
                TaskState::Faulted => assert!(won),
                state => panic!("unexpected state {state}"),
            }
        });
    }

    #[test]
    fn terminate_clears_wait_sub() {
        let _trace = crate::test_util::trace_init();
        crate::loom::model(|| {
            let task = Task::pending();

            let other = thread::spawn({
                let task = task.clone();
                move || task.0.state.set_if_not(WAIT_SUB, DONE | WAIT_SUB)
            });

            assert!(task.terminate(CANCELED, Data::Error(None)));
            other.join().unwrap();

            assert!(task.is_canceled());
            assert!(!task.0.state.check(WAIT_SUB));
        });
    }

    #[test]
    fn follower_races_terminate() {
        let _trace = crate::test_util::trace_init();
        run_units_inline();

        crate::loom::model(|| {
            let task = Task::pending();
            let calls = Arc::new(AtomicUsize::new(0));

            let other = thread::spawn({
                let task = task.clone();
                let calls = calls.clone();
                move || {
                    follower::follow(
                        &task,
                        Box::new(ContinueCaller(move |_: &Task| -> Output {
                            calls.fetch_add(1, Ordering::Relaxed);
                            Ok(None)
                        })),
                        None,
                    )
                }
            });

            assert!(task.terminate(COMPLETED, Data::Value(None)));
            let dependent = other.join().unwrap();

            // drained by `terminate` or dispatched on registration, never both, never lost
            assert_eq!(calls.load(Ordering::Relaxed), 1);
            assert!(dependent.is_completed());
            assert!(!task.0.state.check(LOCK_STATE));
        });
    }
}
