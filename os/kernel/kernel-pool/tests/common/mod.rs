#![allow(dead_code)]

use kernel_pool::{BufferSink, DrainOrigin, PoolError, UnitSource};
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Unit source handing out sequential ids, optionally with a fixed budget.
#[derive(Default)]
pub struct RecordingSource {
    next: Mutex<u64>,
    budget: Mutex<Option<usize>>,
    fresh: Mutex<Vec<(u32, bool)>>,
    returned: Mutex<Vec<(u64, u32)>>,
}

impl RecordingSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `Exhausted` after `units` more fresh allocations.
    pub fn with_budget(units: usize) -> Self {
        let source = Self::default();
        *source.budget.lock() = Some(units);
        source
    }

    /// `(order, allow_wait)` of every fresh allocation.
    pub fn fresh(&self) -> Vec<(u32, bool)> {
        self.fresh.lock().clone()
    }

    pub fn returned(&self) -> Vec<(u64, u32)> {
        self.returned.lock().clone()
    }
}

impl UnitSource for RecordingSource {
    type Unit = u64;

    fn allocate_fresh_unit(&self, order: u32, allow_wait: bool) -> Result<u64, PoolError> {
        if let Some(left) = self.budget.lock().as_mut() {
            if *left == 0 {
                return Err(PoolError::Exhausted { order });
            }
            *left -= 1;
        }
        self.fresh.lock().push((order, allow_wait));
        let mut next = self.next.lock();
        *next += 1;
        Ok(*next)
    }

    fn return_unit_to_system(&self, unit: u64, order: u32) {
        self.returned.lock().push((unit, order));
    }
}

/// Sink recording destroyed buffers; can wait for a number of them.
#[derive(Default)]
pub struct RecordingSink {
    destroyed: Mutex<Vec<(u32, usize, DrainOrigin)>>,
    changed: Condvar,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destroyed(&self) -> Vec<(u32, usize, DrainOrigin)> {
        self.destroyed.lock().clone()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.destroyed.lock().iter().map(|&(id, _, _)| id).collect()
    }

    /// Block until at least `count` buffers were destroyed.
    pub fn wait_for(&self, count: usize) -> bool {
        let mut destroyed = self.destroyed.lock();
        while destroyed.len() < count {
            if self
                .changed
                .wait_for(&mut destroyed, Duration::from_secs(5))
                .timed_out()
            {
                return destroyed.len() >= count;
            }
        }
        true
    }
}

impl BufferSink for RecordingSink {
    type Buffer = u32;

    fn destroy(&self, buffer: u32, size: usize, origin: DrainOrigin) {
        self.destroyed.lock().push((buffer, size, origin));
        self.changed.notify_all();
    }
}
