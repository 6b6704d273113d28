// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::park::{Parker, StdPark};
use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// A single-fire event.
///
/// A signal starts out open and is closed exactly once. Closing wakes every thread blocked in
/// [`Signal::wait`] and every pending [`Notified`] future; waiting on a closed signal returns
/// immediately. Clones refer to the same event.
#[derive(Clone)]
pub struct Signal(Arc<Inner>);

struct Inner {
    closed: AtomicBool,
    waiters: Mutex<Waiters>,
}

struct Waiters {
    next_key: u64,
    list: Vec<(u64, Waker)>,
}

/// Future returned by [`Signal::notified`].
#[must_use = "futures do nothing unless `.await`ed or polled"]
pub struct Notified<'a> {
    signal: &'a Signal,
    key: Option<u64>,
}

// === impl Signal ===

impl Signal {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Inner {
            closed: AtomicBool::new(false),
            waiters: Mutex::new(Waiters {
                next_key: 0,
                list: Vec::new(),
            }),
        }))
    }

    /// Returns the process-wide signal that is closed from the start.
    ///
    /// Settled tasks hand this out instead of allocating a fresh signal.
    pub(crate) fn closed() -> Self {
        lazy_static::lazy_static! {
            static ref CLOSED: Signal = {
                let signal = Signal::new();
                signal.close();
                signal
            };
        }
        CLOSED.clone()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// Closes the signal, returning `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let list = core::mem::take(&mut self.0.waiters.lock().list);
        tracing::trace!(signal = ?self, waiters = list.len(), "Signal::close");
        for (_, waker) in list {
            waker.wake();
        }
        true
    }

    /// Blocks the current thread until the signal is closed.
    pub fn wait(&self) {
        select(&[self], None);
    }

    /// Blocks the current thread until the signal is closed or `timeout` elapses.
    ///
    /// Returns `true` if the signal was closed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        select(&[self], Some(Instant::now() + timeout)).is_some()
    }

    /// Returns a future that completes once the signal is closed.
    pub fn notified(&self) -> Notified<'_> {
        Notified {
            signal: self,
            key: None,
        }
    }

    /// Returns `true` if both handles refer to the same event.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Registers `waker` to be woken on close. Returns `None` if the signal is already closed.
    fn register(&self, waker: &Waker) -> Option<u64> {
        let mut waiters = self.0.waiters.lock();
        // checked under the lock, `close` flips the flag before draining the list
        if self.is_closed() {
            return None;
        }

        let key = waiters.next_key;
        waiters.next_key += 1;
        waiters.list.push((key, waker.clone()));
        Some(key)
    }

    fn reregister(&self, key: u64, waker: &Waker) -> bool {
        let mut waiters = self.0.waiters.lock();
        match waiters.list.iter_mut().find(|(k, _)| *k == key) {
            Some((_, registered)) => {
                if !registered.will_wake(waker) {
                    registered.clone_from(waker);
                }
                true
            }
            None => false,
        }
    }

    fn deregister(&self, key: u64) {
        let mut waiters = self.0.waiters.lock();
        if let Some(pos) = waiters.list.iter().position(|(k, _)| *k == key) {
            waiters.list.swap_remove(pos);
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("addr", &Arc::as_ptr(&self.0))
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Blocks the current thread until one of `signals` is closed or `deadline` passes.
///
/// Returns the index of the first closed signal in `signals`, or `None` on timeout. Signals earlier
/// in the slice win when several are closed at once.
pub(crate) fn select(signals: &[&Signal], deadline: Option<Instant>) -> Option<usize> {
    let first_closed = || signals.iter().position(|signal| signal.is_closed());

    if let Some(idx) = first_closed() {
        return Some(idx);
    }

    let parker = Parker::new(StdPark::for_current());
    let waker = parker.clone().into_waker();

    let mut keys = Vec::with_capacity(signals.len());
    for signal in signals {
        keys.push(signal.register(&waker));
    }

    let res = loop {
        if let Some(idx) = first_closed() {
            break Some(idx);
        }

        match deadline {
            None => parker.park(),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    break None;
                }
                parker.park_timeout(deadline - now);
            }
        }
    };

    for (signal, key) in signals.iter().zip(keys) {
        if let Some(key) = key {
            signal.deregister(key);
        }
    }

    res
}

// === impl Notified ===

impl Future for Notified<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.signal.is_closed() {
            return Poll::Ready(());
        }

        let registered = match self.key {
            Some(key) => self.signal.reregister(key, cx.waker()),
            None => false,
        };

        if !registered {
            match self.signal.register(cx.waker()) {
                Some(key) => self.key = Some(key),
                None => return Poll::Ready(()),
            }
        }

        Poll::Pending
    }
}

impl Drop for Notified<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.signal.deregister(key);
        }
    }
}

impl fmt::Debug for Notified<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notified")
            .field("signal", &self.signal)
            .field("key", &self.key)
            .finish()
    }
}
