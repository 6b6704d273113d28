// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::task::Task;
use core::any::{Any, type_name};
use core::fmt;
use std::sync::Arc;

/// A type-erased task result.
///
/// Values are shared between every observer of a task, cloning a `Value` only bumps a reference
/// count. A `Value` holding a [`Task`] is special: resolving a task with it makes the task adopt the
/// inner task's outcome once that settles.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Value {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Attempts to take shared ownership of the value as a concrete type.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged if the value is not a `T`.
    pub fn downcast<T: Any + Send + Sync>(self) -> Result<Arc<T>, Self> {
        let type_name = self.type_name;
        self.inner
            .downcast::<T>()
            .map_err(|inner| Self { inner, type_name })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn as_task(&self) -> Option<&Task> {
        self.downcast_ref::<Task>()
    }
}

impl From<Task> for Value {
    fn from(task: Task) -> Self {
        Self::new(task)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn downcasting() {
        let value = Value::new(5_u32);
        assert!(value.is::<u32>());
        assert_eq!(value.downcast_ref::<u32>(), Some(&5));
        assert!(value.downcast_ref::<i64>().is_none());

        let value = value.downcast::<String>().unwrap_err();
        assert_eq!(value.type_name(), "u32");
        assert_eq!(*value.downcast::<u32>().unwrap(), 5);
    }
}
