//! The general-purpose allocator as seen by a contiguous region.
//!
//! A region never carves out or returns physical memory itself. It asks the
//! owner of general-purpose memory to do so through this trait, always for an
//! absolute unit range `[base_unit, base_unit + unit_count)`.

use crate::BackendError;
use std::sync::Arc;

/// Collaborator that makes unit ranges (un)available to the general allocator.
///
/// Calls are made while the calling region holds its lock, so implementations
/// may block but must never call back into the same region.
pub trait RangeBackend: Send + Sync {
    /// Arrange that the general allocator never hands out this range on its own.
    ///
    /// Called once per region when it is registered.
    ///
    /// # Errors
    /// Any error aborts the registration.
    fn reserve_range(&self, base_unit: u64, unit_count: usize) -> Result<(), BackendError>;

    /// Remove a sub-range from general-purpose availability.
    ///
    /// # Errors
    /// [`BackendError::Busy`] for transient conflicts the caller may skip,
    /// anything else for hard failures.
    fn withdraw_range(&self, base_unit: u64, unit_count: usize) -> Result<(), BackendError>;

    /// Return a sub-range to general-purpose availability.
    fn restore_range(&self, base_unit: u64, unit_count: usize);
}

impl<T: RangeBackend + ?Sized> RangeBackend for Arc<T> {
    fn reserve_range(&self, base_unit: u64, unit_count: usize) -> Result<(), BackendError> {
        (**self).reserve_range(base_unit, unit_count)
    }

    fn withdraw_range(&self, base_unit: u64, unit_count: usize) -> Result<(), BackendError> {
        (**self).withdraw_range(base_unit, unit_count)
    }

    fn restore_range(&self, base_unit: u64, unit_count: usize) {
        (**self).restore_range(base_unit, unit_count);
    }
}

/// Backend for arenas that are permanently carved out.
///
/// Every call succeeds without side effects. Pair it with
/// [`RegionConfig::start_isolated`](crate::RegionConfig::start_isolated) for
/// memory that is never lent to the general allocator.
#[derive(Debug, Default, Copy, Clone)]
pub struct CarveoutBackend;

impl RangeBackend for CarveoutBackend {
    fn reserve_range(&self, _base_unit: u64, _unit_count: usize) -> Result<(), BackendError> {
        Ok(())
    }

    fn withdraw_range(&self, _base_unit: u64, _unit_count: usize) -> Result<(), BackendError> {
        Ok(())
    }

    fn restore_range(&self, _base_unit: u64, _unit_count: usize) {}
}
