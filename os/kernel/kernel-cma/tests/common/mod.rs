#![allow(dead_code)]

use kernel_cma::{BackendError, RangeBackend};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Reserve(u64, usize),
    Withdraw(u64, usize),
    Restore(u64, usize),
}

/// Backend double that records every call and tracks which units are
/// currently withheld from the "general allocator".
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<Call>>,
    withdrawn: Mutex<BTreeSet<u64>>,
    pinned: Mutex<BTreeSet<u64>>,
    broken: Mutex<BTreeSet<u64>>,
    flaky: Mutex<HashMap<u64, usize>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Withdrawing a range containing `unit` reports busy.
    pub fn pin(&self, unit: u64) {
        self.pinned.lock().insert(unit);
    }

    pub fn unpin(&self, unit: u64) {
        self.pinned.lock().remove(&unit);
    }

    /// Withdrawing a range containing `unit` reports busy `times` times.
    pub fn pin_times(&self, unit: u64, times: usize) {
        self.flaky.lock().insert(unit, times);
    }

    /// Withdrawing a range containing `unit` fails hard.
    pub fn break_unit(&self, unit: u64) {
        self.broken.lock().insert(unit);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn withdrawn(&self) -> BTreeSet<u64> {
        self.withdrawn.lock().clone()
    }

    pub fn withdraw_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::Withdraw(..)))
            .count()
    }
}

fn units(base: u64, count: usize) -> impl Iterator<Item = u64> {
    (0..count as u64).map(move |i| base + i)
}

impl RangeBackend for RecordingBackend {
    fn reserve_range(&self, base_unit: u64, unit_count: usize) -> Result<(), BackendError> {
        self.calls.lock().push(Call::Reserve(base_unit, unit_count));
        Ok(())
    }

    fn withdraw_range(&self, base_unit: u64, unit_count: usize) -> Result<(), BackendError> {
        self.calls.lock().push(Call::Withdraw(base_unit, unit_count));
        if units(base_unit, unit_count).any(|u| self.broken.lock().contains(&u)) {
            return Err(BackendError::Failed { code: -22 });
        }
        if units(base_unit, unit_count).any(|u| self.pinned.lock().contains(&u)) {
            return Err(BackendError::Busy);
        }
        {
            let mut flaky = self.flaky.lock();
            let hit = units(base_unit, unit_count)
                .find(|u| flaky.get(u).is_some_and(|&left| left > 0));
            if let Some(u) = hit {
                if let Some(left) = flaky.get_mut(&u) {
                    *left -= 1;
                }
                return Err(BackendError::Busy);
            }
        }
        let mut withdrawn = self.withdrawn.lock();
        for u in units(base_unit, unit_count) {
            assert!(withdrawn.insert(u), "unit {u:#x} withdrawn twice");
        }
        Ok(())
    }

    fn restore_range(&self, base_unit: u64, unit_count: usize) {
        self.calls.lock().push(Call::Restore(base_unit, unit_count));
        let mut withdrawn = self.withdrawn.lock();
        for u in units(base_unit, unit_count) {
            assert!(withdrawn.remove(&u), "unit {u:#x} restored while not withdrawn");
        }
    }
}
