// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Suspending the calling thread while it waits on a [`Signal`](crate::Signal).

use core::fmt;
use core::task::Waker;
use core::time::Duration;
use std::sync::Arc;
use std::task::Wake;
use std::thread::{self, Thread};

/// Suspends and resumes a single execution context.
///
/// Implementations must tolerate spurious wakeups from [`Park::park`] as well as an
/// [`Park::unpark`] that arrives before the matching `park`.
pub trait Park {
    fn park(&self);
    fn park_timeout(&self, timeout: Duration);
    fn unpark(&self);
}

/// [`Park`] implementation backed by OS thread parking.
pub struct StdPark(Thread);

/// A shareable handle to a [`Park`] implementation that can be turned into a [`Waker`].
pub struct Parker<P>(Arc<Unparker<P>>);

struct Unparker<P>(P);

// === impl StdPark ===

impl StdPark {
    pub fn for_current() -> Self {
        Self(thread::current())
    }
}

impl Park for StdPark {
    fn park(&self) {
        tracing::trace!("parking current thread ({:?})...", self.0.name());
        thread::park();
    }

    fn park_timeout(&self, timeout: Duration) {
        tracing::trace!(?timeout, "parking current thread ({:?})...", self.0.name());
        thread::park_timeout(timeout);
    }

    fn unpark(&self) {
        tracing::trace!("unparking thread {:?}...", self.0.name());
        self.0.unpark();
    }
}

impl fmt::Debug for StdPark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StdPark").field(&self.0.id()).finish()
    }
}

// === impl Parker ===

impl<P> Clone for Parker<P> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<P: Park + Send + Sync + 'static> Parker<P> {
    pub fn new(park_impl: P) -> Self {
        Self(Arc::new(Unparker(park_impl)))
    }

    #[inline]
    pub fn park(&self) {
        self.0.0.park();
    }

    #[inline]
    pub fn park_timeout(&self, timeout: Duration) {
        self.0.0.park_timeout(timeout);
    }

    #[inline]
    pub fn unpark(&self) {
        self.0.0.unpark();
    }

    /// Convert this parker into a `Waker` that unparks the parked context when woken.
    pub fn into_waker(self) -> Waker {
        Waker::from(self.0)
    }
}

impl<P: fmt::Debug> fmt::Debug for Parker<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Parker").field(&self.0.0).finish()
    }
}

impl<P: Park + Send + Sync + 'static> Wake for Unparker<P> {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}
