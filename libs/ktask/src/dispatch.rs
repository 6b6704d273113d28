// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The concurrency substrate task bodies run on.
//!
//! Every starter body, continuation and deadline timer is handed to the installed [`Spawn`]
//! implementation as an independent unit of work. Units must not be queued behind each other: a
//! unit is allowed to block until a sibling unit settles a task, so a substrate with a fixed number
//! of workers can deadlock. No ordering between sibling units is implied.
//!
//! Unless a substrate is installed through [`set_spawner`] or [`Builder::install`], units run on
//! freshly spawned OS threads named `ktask-worker`.

use crate::error::{AlreadyInstalled, SpawnError};
use crate::task::Id;
use core::fmt;
use std::sync::OnceLock;
use std::thread;

/// A unit of work handed to a [`Spawn`] implementation.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs units of work concurrently.
pub trait Spawn: Send + Sync + 'static {
    /// Start running `job` concurrently to the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the job could not be started. The job is dropped without being run in
    /// that case.
    fn spawn(&self, job: Job) -> Result<(), SpawnError>;
}

impl<F> Spawn for F
where
    F: Fn(Job) -> Result<(), SpawnError> + Send + Sync + 'static,
{
    fn spawn(&self, job: Job) -> Result<(), SpawnError> {
        self(job)
    }
}

/// Spawns one OS thread per unit of work.
#[derive(Debug, Clone)]
pub struct ThreadSpawner {
    name: String,
    stack_size: Option<usize>,
}

/// Configures a [`ThreadSpawner`].
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
    stack_size: Option<usize>,
}

static SPAWNER: OnceLock<Box<dyn Spawn>> = OnceLock::new();

/// Installs the process-wide spawner.
///
/// # Errors
///
/// Returns [`AlreadyInstalled`] if a spawner was installed before, or if units of work were already
/// dispatched through the default spawner.
pub fn set_spawner(spawner: impl Spawn) -> Result<(), AlreadyInstalled> {
    SPAWNER
        .set(Box::new(spawner))
        .map_err(|_| AlreadyInstalled(()))
}

fn spawner() -> &'static dyn Spawn {
    SPAWNER
        .get_or_init(|| Box::new(Builder::new().build()))
        .as_ref()
}

/// Dispatch `job` on the installed spawner, wrapped in a span naming the unit and its task.
pub(crate) fn spawn<F>(kind: &'static str, task: Id, job: F) -> Result<(), SpawnError>
where
    F: FnOnce() + Send + 'static,
{
    spawn_on(spawner(), kind, task, job)
}

pub(crate) fn spawn_on<F>(
    spawner: &dyn Spawn,
    kind: &'static str,
    task: Id,
    job: F,
) -> Result<(), SpawnError>
where
    F: FnOnce() + Send + 'static,
{
    let span = tracing::trace_span!("unit", unit.kind = kind, task.tid = task.as_u64());

    #[cfg(test)]
    tests::SPAWNED.with(|spawned| spawned.set(spawned.get() + 1));
    #[cfg(feature = "counters")]
    crate::counters::SPAWNED.fetch_add(1, core::sync::atomic::Ordering::Relaxed);

    spawner
        .spawn(Box::new(move || span.in_scope(job)))
        .inspect_err(|error| {
            tracing::warn!(unit.kind = kind, task.tid = task.as_u64(), %error, "failed to dispatch unit");
        })
}

// === impl ThreadSpawner ===

impl Spawn for ThreadSpawner {
    fn spawn(&self, job: Job) -> Result<(), SpawnError> {
        let mut builder = thread::Builder::new().name(self.name.clone());
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }
        // the join handle is dropped, units settle tasks instead of returning values
        builder.spawn(job)?;
        Ok(())
    }
}

// === impl Builder ===

impl Builder {
    pub const DEFAULT_NAME: &'static str = "ktask-worker";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the threads spawned for units of work.
    ///
    /// By default, threads are named `ktask-worker`.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size of the threads spawned for units of work.
    ///
    /// By default, the standard library's default thread stack size is used.
    #[must_use]
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    #[must_use]
    pub fn build(self) -> ThreadSpawner {
        ThreadSpawner {
            name: self.name.unwrap_or_else(|| Self::DEFAULT_NAME.to_string()),
            stack_size: self.stack_size,
        }
    }

    /// Builds the [`ThreadSpawner`] and installs it as the process-wide spawner.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyInstalled`] if a spawner is already installed.
    pub fn install(self) -> Result<(), AlreadyInstalled> {
        set_spawner(self.build())
    }
}

impl fmt::Display for ThreadSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.name)
    }
}
