// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Lock-free tasks for composing blocking computations.
//!
//! A [`Task`] is a handle to a computation that settles exactly once: it completes with an optional
//! [`Value`], faults with an [`Error`] or is canceled with a cause. Tasks are created
//! already settled ([`resolve`], [`reject`], [`cancel`]), by running a body as an independent unit
//! of work ([`run`], [`start`], [`delay`]) or by chaining a continuation onto another task
//! ([`Task::continue_with`], [`Task::then`], [`Task::catch`]).
//!
//! All coordination happens through a single atomic status word per task. Bodies and continuations
//! run on the process-wide [`Spawn`] implementation, see the [`dispatch`] module.
//!
//! ```no_run
//! use ktask::{Value, run};
//!
//! let sum = run(|| Ok(Some(Value::new(20_u32))), None)
//!     .then(|v| Ok(Some(Value::new(*v.unwrap().downcast_ref::<u32>().unwrap() + 22))), None);
//!
//! let value = sum.wait(None).result().unwrap();
//! assert_eq!(value.downcast_ref::<u32>(), Some(&42));
//! ```

mod backoff;
mod cancel;
mod combinator;
#[cfg(feature = "counters")]
pub mod counters;
pub mod dispatch;
pub mod error;
mod loom;
pub mod park;
mod pool;
mod signal;
mod task;
#[cfg(test)]
mod test_util;
mod value;

pub use cancel::CancelToken;
pub use combinator::{wait_all, wait_any};
pub use dispatch::{Spawn, set_spawner};
pub use error::{Error, ForcePanic, panic_force};
pub use signal::{Notified, Signal};
pub use task::{
    Id, Output, Rejecter, Resolver, Task, TaskState, cancel, delay, new, reject, resolve, run,
    start,
};
pub use value::Value;

static_assertions::assert_impl_all!(Task: Send, Sync, Clone);
static_assertions::assert_impl_all!(CancelToken: Send, Sync, Clone);
static_assertions::assert_impl_all!(Signal: Send, Sync, Clone);
static_assertions::assert_impl_all!(Error: Send, Sync, Clone);
