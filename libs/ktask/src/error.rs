// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::any::Any;
use core::fmt;
use std::io;
use std::sync::Arc;

/// The error a task settles with when it is Faulted or Canceled.
///
/// `Error` is a cheap, clonable handle: every observer of a task gets a clone of the same underlying
/// error. Ordinary failures wrap an [`anyhow::Error`]. The second kind of error is the
/// *force-propagation* marker created through [`Error::force`] or [`panic_force`]: it is never
/// stored as a task outcome, every task boundary that would convert it into a Faulted state
/// re-raises it as a panic instead.
#[derive(Clone)]
pub struct Error(Repr);

#[derive(Clone)]
enum Repr {
    Error(Arc<anyhow::Error>),
    Force(ForcePanic),
}

/// The payload of a force-propagated panic.
///
/// Task bodies are normally isolated from panics: a panicking continuation just settles its
/// dependent task as Faulted. A `ForcePanic` payload is exempt from that and keeps unwinding
/// through every task boundary until it reaches the top of the thread that runs the body.
#[derive(Clone, Debug)]
pub struct ForcePanic {
    message: Arc<str>,
}

/// The generic cancellation cause.
///
/// Used whenever a task or token is cancelled without a more specific cause.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Canceled(pub(crate) ());

/// The cancellation cause of a token whose deadline has passed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeadlineExceeded(pub(crate) ());

/// The fault of a task rejected without an error.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Rejected(pub(crate) ());

/// A task body panicked.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Panicked {
    message: String,
}

/// The concurrency substrate failed to start a unit of work.
#[derive(Debug)]
#[non_exhaustive]
pub enum SpawnError {
    /// The operating system refused to spawn a thread.
    Io(io::Error),
    /// The installed spawner is no longer accepting work.
    Closed,
}

/// Returned when attempting to install a spawner when one is already installed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AlreadyInstalled(pub(crate) ());

/// Raise a panic that is not turned into a Faulted task.
///
/// Task boundaries re-raise the payload unchanged, so the panic unwinds the thread that runs the
/// surrounding task body.
pub fn panic_force(message: impl fmt::Display) -> ! {
    std::panic::panic_any(ForcePanic::new(message))
}

pub(crate) fn internal_panic_force(message: impl fmt::Display) -> ! {
    panic_force(format_args!("Task: {message}"))
}

/// Returns the shared generic cancellation [`Error`].
#[must_use]
pub fn canceled() -> Error {
    lazy_static::lazy_static! {
        static ref CANCELED: Error = Error::new(Canceled(()));
    }
    CANCELED.clone()
}

/// Returns the shared [`Error`] used when a deadline passes.
#[must_use]
pub fn deadline_exceeded() -> Error {
    lazy_static::lazy_static! {
        static ref DEADLINE_EXCEEDED: Error = Error::new(DeadlineExceeded(()));
    }
    DEADLINE_EXCEEDED.clone()
}

/// Returns the shared [`Error`] a task is faulted with when it is rejected without an error.
#[must_use]
pub fn rejected() -> Error {
    lazy_static::lazy_static! {
        static ref REJECTED: Error = Error::new(Rejected(()));
    }
    REJECTED.clone()
}

// === impl Error ===

impl Error {
    pub fn new<E>(error: E) -> Self
    where
        E: core::error::Error + Send + Sync + 'static,
    {
        Self(Repr::Error(Arc::new(anyhow::Error::new(error))))
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Repr::Error(Arc::new(anyhow::Error::msg(message))))
    }

    /// Creates the force-propagation marker. Rejecting a task with it raises a panic carrying
    /// [`ForcePanic`] instead of settling the task.
    pub fn force(message: impl fmt::Display) -> Self {
        Self(Repr::Force(ForcePanic::new(message)))
    }

    /// Converts a caught panic payload into an error.
    ///
    /// A [`ForcePanic`] payload keeps its identity, everything else becomes [`Panicked`].
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<ForcePanic>() {
            Ok(force) => return Self(Repr::Force(*force)),
            Err(payload) => payload,
        };

        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "Box<dyn Any>".to_string()
        };

        Self::new(Panicked { message })
    }

    pub fn is_force(&self) -> bool {
        matches!(self.0, Repr::Force(_))
    }

    pub fn as_force(&self) -> Option<&ForcePanic> {
        match &self.0 {
            Repr::Force(force) => Some(force),
            Repr::Error(_) => None,
        }
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match &self.0 {
            Repr::Error(error) => error.downcast_ref::<E>(),
            Repr::Force(_) => None,
        }
    }

    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.downcast_ref::<E>().is_some()
    }

    /// Returns `true` if both handles point to the same underlying error.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Repr::Error(a), Repr::Error(b)) => Arc::ptr_eq(a, b),
            (Repr::Force(a), Repr::Force(b)) => Arc::ptr_eq(&a.message, &b.message),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Self(Repr::Error(Arc::new(error)))
    }
}

impl From<ForcePanic> for Error {
    fn from(force: ForcePanic) -> Self {
        Self(Repr::Force(force))
    }
}

impl From<Canceled> for Error {
    fn from(_: Canceled) -> Self {
        canceled()
    }
}

impl From<DeadlineExceeded> for Error {
    fn from(_: DeadlineExceeded) -> Self {
        deadline_exceeded()
    }
}

impl From<Rejected> for Error {
    fn from(_: Rejected) -> Self {
        rejected()
    }
}

impl From<Panicked> for Error {
    fn from(panicked: Panicked) -> Self {
        Self::new(panicked)
    }
}

impl From<SpawnError> for Error {
    fn from(error: SpawnError) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Error(error) => fmt::Display::fmt(error, f),
            Repr::Force(force) => fmt::Display::fmt(force, f),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Error(error) => fmt::Debug::fmt(error, f),
            Repr::Force(force) => fmt::Debug::fmt(force, f),
        }
    }
}

impl core::error::Error for Error {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match &self.0 {
            Repr::Error(error) => error.source(),
            Repr::Force(_) => None,
        }
    }
}

// === impl ForcePanic ===

impl ForcePanic {
    pub(crate) fn new(message: impl fmt::Display) -> Self {
        Self {
            message: Arc::from(message.to_string()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Continues unwinding with this payload without running the panic hook a second time.
    pub(crate) fn resume(self) -> ! {
        std::panic::resume_unwind(Box::new(self))
    }
}

impl fmt::Display for ForcePanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.message)
    }
}

// === impl Canceled ===

impl fmt::Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("task canceled")
    }
}

impl core::error::Error for Canceled {}

impl fmt::Display for DeadlineExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("deadline exceeded")
    }
}

impl core::error::Error for DeadlineExceeded {}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("task rejected")
    }
}

impl core::error::Error for Rejected {}

// === impl Panicked ===

impl Panicked {
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Panicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task body panicked: {}", self.message)
    }
}

impl core::error::Error for Panicked {}

// === impl SpawnError ===

impl From<io::Error> for SpawnError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::Io(error) => write!(f, "failed to spawn worker thread: {error}"),
            SpawnError::Closed => f.write_str("spawner was closed"),
        }
    }
}

impl core::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            SpawnError::Io(error) => Some(error),
            SpawnError::Closed => None,
        }
    }
}

impl fmt::Display for AlreadyInstalled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("a spawner is already installed")
    }
}

impl core::error::Error for AlreadyInstalled {}
