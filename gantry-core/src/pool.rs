//! Typed object pools.
//!
//! Each pooled object kind (buffer, stream, capture slot, ...) gets its own
//! free stack so steady-state traffic allocates nothing. Pools are
//! single-threaded by design and require no locking: only the scheduler
//! thread touches them.
//!
//! When a pool is at its hard limit, the requester parks its task id on the
//! pool's wait list and fails with a distinct resource error instead of
//! blocking; releases wake the waiters in arrival order.

use crate::error::CoreError;
use crate::sched::TaskId;
use std::collections::VecDeque;

/// Typed free list backing allocations of one object kind.
pub struct Pool<T> {
    name: &'static str,
    free: Vec<T>,
    /// Maximum idle objects kept around; excess releases are dropped.
    quota: usize,
    /// Hard cap on live objects; `None` means unbounded.
    limit: Option<usize>,
    /// Objects currently handed out.
    outstanding: usize,
    waiters: VecDeque<TaskId>,
    make: fn() -> T,
}

impl<T> Pool<T> {
    #[must_use]
    pub fn new(name: &'static str, quota: usize, limit: Option<usize>, make: fn() -> T) -> Self {
        Self {
            name,
            free: Vec::new(),
            quota,
            limit,
            outstanding: 0,
            waiters: VecDeque::new(),
            make,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Objects currently handed out.
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Idle objects ready for reuse.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Take an object, reusing a free one when possible.
    ///
    /// Fails with [`CoreError::Resource`] at the hard limit; the caller
    /// must not retry within the same task step.
    pub fn get(&mut self) -> Result<T, CoreError> {
        if let Some(limit) = self.limit {
            if self.outstanding >= limit && self.free.is_empty() {
                return Err(CoreError::Resource(self.name));
            }
        }
        self.outstanding += 1;
        Ok(self.free.pop().unwrap_or_else(|| (self.make)()))
    }

    /// Return an object. Drains the wait list: the returned task ids must
    /// be woken, in order, by the caller.
    pub fn put(&mut self, obj: T) -> Vec<TaskId> {
        debug_assert!(self.outstanding > 0);
        self.outstanding -= 1;
        if self.free.len() < self.quota {
            self.free.push(obj);
        }
        self.waiters.drain(..).collect()
    }

    /// Park a task until the next release.
    ///
    /// Parking twice is harmless; the task is woken once per release
    /// round anyway.
    pub fn park(&mut self, task: TaskId) {
        if !self.waiters.contains(&task) {
            self.waiters.push_back(task);
        }
    }

    /// Best-effort flush of idle objects, invoked when a frontend stops.
    pub fn flush(&mut self) {
        self.free.clear();
        self.free.shrink_to_fit();
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("idle", &self.free.len())
            .field("outstanding", &self.outstanding)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}
