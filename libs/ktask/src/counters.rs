// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Runtime statistics, enabled by the `counters` feature.

use crate::task;
use core::sync::atomic::{AtomicUsize, Ordering};

pub use crate::pool::PoolCounters;

pub(crate) static SPAWNED: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct Counters {
    /// Units of work handed to the spawner, including those it refused.
    pub spawned: usize,
    pub followers: PoolCounters,
    pub starters: PoolCounters,
}

/// Returns the statistics collected since the process started.
pub fn snapshot() -> Counters {
    Counters {
        spawned: SPAWNED.load(Ordering::Relaxed),
        followers: task::follower_counters(),
        starters: task::starter_counters(),
    }
}
