// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::hint;

/// Exponential backoff for the status word's lock loops.
///
/// Each call to [`Backoff::spin`] issues `2^exp` spin loop hints and bumps the exponent. Once the
/// exponent reaches its ceiling the lock holder is likely descheduled, so further calls give the
/// processor away with [`yield_now`](std::thread::yield_now) instead of burning more cycles.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Backoff {
    exp: u8,
    max: u8,
}

impl Backoff {
    pub(crate) const DEFAULT_MAX_EXPONENT: u8 = 6;

    #[must_use]
    pub(crate) const fn new() -> Self {
        Self {
            exp: 0,
            max: Self::DEFAULT_MAX_EXPONENT,
        }
    }

    #[inline]
    pub(crate) fn spin(&mut self) {
        if self.exp >= self.max {
            crate::loom::thread::yield_now();
            return;
        }

        for _ in 0..(1_u32 << self.exp) {
            // loom needs a yield on every iteration to make progress.
            // See https://github.com/tokio-rs/loom/issues/162#issuecomment-665128979
            #[cfg(loom)]
            crate::loom::thread::yield_now();

            hint::spin_loop();
        }
        self.exp += 1;
    }

    #[cfg(all(test, not(loom)))]
    pub(crate) fn is_yielding(&self) -> bool {
        self.exp >= self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
