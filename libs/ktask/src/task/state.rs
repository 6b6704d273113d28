// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::backoff::Backoff;
use crate::loom::sync::atomic::{AtomicU32, Ordering};
use core::fmt;

/// Task status word. Every task stores its terminal state and its two locks in a single atomic
/// `u32` so that each transition is one compare-and-swap:
///
/// ```text
/// | 31     16 | 15    14 |      13     |       12       | 11    4 |     3    |    2     |    1    |     0     |
/// |  options  | reserved | lock signal | lock followers | reserved | wait sub | canceled | faulted | completed |
/// ```
///
/// The low twelve bits form the *state region*, which is replaced wholesale when a new state is
/// published. The lock bits guard the follower chain and the completion signal slot respectively,
/// terminating a task takes both. The option bits are not interpreted by the task protocol.
pub(crate) struct State {
    val: AtomicU32,
}

mycelium_bitfield::bitfield! {
    /// A snapshot of a task's status word.
    #[derive(PartialEq, Eq)]
    pub(crate) struct Snapshot<u32> {
        /// The task completed with a value.
        pub(crate) const COMPLETED: bool;
        /// The task failed with an error.
        pub(crate) const FAULTED: bool;
        /// The task was cancelled.
        pub(crate) const CANCELED: bool;
        /// The task was resolved with another task and is waiting for it to settle.
        pub(crate) const WAIT_SUB: bool;
        const _RESERVED_STATE = 8;
        /// Held while the follower chain is mutated.
        pub(crate) const LOCK_FOLLOWERS: bool;
        /// Held while the completion signal slot is mutated.
        pub(crate) const LOCK_SIGNAL: bool;
        const _RESERVED_LOCK = 2;
        pub(crate) const OPTIONS = 16;
    }
}

pub(crate) const COMPLETED: u32 = Snapshot::COMPLETED.raw_mask();
pub(crate) const FAULTED: u32 = Snapshot::FAULTED.raw_mask();
pub(crate) const CANCELED: u32 = Snapshot::CANCELED.raw_mask();
pub(crate) const WAIT_SUB: u32 = Snapshot::WAIT_SUB.raw_mask();
/// Any of the terminal states.
pub(crate) const DONE: u32 = COMPLETED | FAULTED | CANCELED;
pub(crate) const STATE_MASK: u32 = Snapshot::LOCK_FOLLOWERS.first_bit() - 1;

pub(crate) const LOCK_FOLLOWERS: u32 = Snapshot::LOCK_FOLLOWERS.raw_mask();
pub(crate) const LOCK_SIGNAL: u32 = Snapshot::LOCK_SIGNAL.raw_mask();
/// Both locks, held while a task terminates.
pub(crate) const LOCK_STATE: u32 = LOCK_FOLLOWERS | LOCK_SIGNAL;

/// The observable state of a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TaskState {
    Pending,
    Completed,
    Faulted,
    Canceled,
}

impl State {
    pub(crate) fn new() -> Self {
        Self::settled(0)
    }

    /// A status word that is already in the given state.
    pub(crate) fn settled(state: u32) -> Self {
        debug_assert_eq!(state & !STATE_MASK, 0);
        Self {
            val: AtomicU32::new(state),
        }
    }

    pub(crate) fn load(&self, ordering: Ordering) -> Snapshot {
        Snapshot(self.val.load(ordering))
    }

    /// Returns `true` if any of `flags` is set.
    #[inline]
    pub(crate) fn check(&self, flags: u32) -> bool {
        self.val.load(Ordering::Acquire) & flags != 0
    }

    /// Replace the state region with `state`, unless any of `guard` is set.
    pub(crate) fn set_if_not(&self, state: u32, guard: u32) -> bool {
        let mut current = self.val.load(Ordering::Acquire);
        loop {
            if current & guard != 0 {
                return false;
            }

            let next = (current & !STATE_MASK) | state;
            match self.val.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::trace!(current = ?Snapshot(current), next = ?Snapshot(next), "State::set_if_not");
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Acquire the `lock` bits, unless any of `guard` is set.
    ///
    /// Spins, and eventually yields, while another thread holds any of the `lock` bits. The guard
    /// is re-checked on every iteration, so a task that terminates while we wait is never locked.
    pub(crate) fn lock_if_not(&self, lock: u32, guard: u32) -> bool {
        let mut backoff = Backoff::new();
        let mut current = self.val.load(Ordering::Acquire);
        loop {
            if current & guard != 0 {
                return false;
            }

            if current & lock != 0 {
                backoff.spin();
                current = self.val.load(Ordering::Acquire);
                continue;
            }

            match self.val.compare_exchange_weak(
                current,
                current | lock,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Release the `lock` bits. If `state` is given the state region is replaced with it in the same
    /// step, publishing everything written under the lock.
    pub(crate) fn unlock_and_set(&self, lock: u32, state: Option<u32>) {
        let clear = match state {
            Some(_) => lock | STATE_MASK,
            None => lock,
        };
        let set = state.unwrap_or(0);

        let mut current = self.val.load(Ordering::Relaxed);
        loop {
            debug_assert_eq!(current & lock, lock, "unlocking a lock that is not held");
            let next = (current & !clear) | set;
            match self.val.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(Ordering::Relaxed), f)
    }
}

impl Snapshot {
    pub(crate) fn task_state(self) -> TaskState {
        match self.0 & STATE_MASK {
            COMPLETED => TaskState::Completed,
            FAULTED => TaskState::Faulted,
            CANCELED => TaskState::Canceled,
            _ => TaskState::Pending,
        }
    }

    pub(crate) fn is_done(self) -> bool {
        self.0 & DONE != 0
    }
}

// === impl TaskState ===

impl TaskState {
    pub fn is_done(self) -> bool {
        !matches!(self, TaskState::Pending)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Completed => "completed",
            TaskState::Faulted => "faulted",
            TaskState::Canceled => "canceled",
        };
        f.pad(s)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn layout() {
        assert_eq!(COMPLETED, 0b0001);
        assert_eq!(FAULTED, 0b0010);
        assert_eq!(CANCELED, 0b0100);
        assert_eq!(WAIT_SUB, 0b1000);
        assert_eq!(STATE_MASK, (1 << 12) - 1);
        assert_eq!(LOCK_FOLLOWERS, 1 << 12);
        assert_eq!(LOCK_SIGNAL, 2 << 12);
        assert_eq!(Snapshot::OPTIONS.raw_mask(), 0xffff_0000);
    }

    #[test]
    fn lock_respects_guard() {
        let state = State::new();
        assert!(state.lock_if_not(LOCK_FOLLOWERS, DONE));
        // the other lock domain is independent
        assert!(state.lock_if_not(LOCK_SIGNAL, DONE));
        state.unlock_and_set(LOCK_SIGNAL, None);
        state.unlock_and_set(LOCK_FOLLOWERS, Some(FAULTED));

        assert_eq!(state.load(Ordering::Acquire).task_state(), TaskState::Faulted);
        assert!(state.load(Ordering::Acquire).is_done());
        assert!(!state.lock_if_not(LOCK_STATE, DONE));
        assert!(!state.check(LOCK_STATE));
    }

    #[test]
    fn wait_sub_is_set_once() {
        let state = State::new();
        assert!(state.set_if_not(WAIT_SUB, DONE | WAIT_SUB));
        assert!(!state.set_if_not(WAIT_SUB, DONE | WAIT_SUB));
        assert_eq!(state.load(Ordering::Acquire).task_state(), TaskState::Pending);
        assert!(!state.load(Ordering::Acquire).is_done());

        // publishing a terminal state clears the waiting flag
        assert!(state.lock_if_not(LOCK_STATE, DONE));
        state.unlock_and_set(LOCK_STATE, Some(COMPLETED));
        assert!(!state.check(WAIT_SUB));
        assert!(state.check(COMPLETED));
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Terminate(u32),
        WaitSub,
        Follow,
        Signal,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop_oneof![Just(COMPLETED), Just(FAULTED), Just(CANCELED)].prop_map(Op::Terminate),
            Just(Op::WaitSub),
            Just(Op::Follow),
            Just(Op::Signal),
        ]
    }

    proptest! {
        #[test]
        fn first_terminal_transition_wins(ops in proptest::collection::vec(op(), 0..32)) {
            let state = State::new();
            let mut winner = None;

            for op in ops {
                match op {
                    Op::Terminate(flag) => {
                        if state.lock_if_not(LOCK_STATE, DONE) {
                            prop_assert!(winner.is_none());
                            winner = Some(flag);
                            state.unlock_and_set(LOCK_STATE, Some(flag));
                        } else {
                            prop_assert!(winner.is_some());
                        }
                    }
                    Op::WaitSub => {
                        let _ = state.set_if_not(WAIT_SUB, DONE | WAIT_SUB);
                    }
                    Op::Follow | Op::Signal => {
                        let lock = if matches!(op, Op::Follow) { LOCK_FOLLOWERS } else { LOCK_SIGNAL };
                        if state.lock_if_not(lock, DONE) {
                            prop_assert!(winner.is_none());
                            state.unlock_and_set(lock, None);
                        }
                    }
                }

                prop_assert!(!state.check(LOCK_STATE));
            }

            let snapshot = state.load(Ordering::Acquire);
            match winner {
                Some(flag) => prop_assert_eq!(snapshot.0 & STATE_MASK, flag),
                None => prop_assert_eq!(snapshot.task_state(), TaskState::Pending),
            }
        }
    }
}
