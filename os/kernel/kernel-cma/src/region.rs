//! # Contiguous Region
//!
//! A [`ContiguousRegion`] hands out physically contiguous unit runs from one
//! reserved arena. While unused, the arena may be lent to the general-purpose
//! allocator; a run is withdrawn from it through the [`RangeBackend`] right
//! before it is handed out and restored right after it is freed.
//!
//! ```text
//!            exclusive_from
//!                  │
//!   ┌──────────────▼─────────────────────┐
//!   │ shared with the  │ withheld from    │
//!   │ general allocator│ general allocator│
//!   └──────────────────┴──────────────────┘
//!   0                                 unit_count
//! ```
//!
//! An *isolated* region has `exclusive_from < unit_count`. Fully isolated means
//! `exclusive_from == 0`, in which case allocation and free make no backend
//! calls at all. `deisolate_until(bound)` moves the boundary up to `bound`.
//!
//! All bitmap mutations, isolation transitions and backend calls happen under
//! the region's single lock, so no other operation on the same arena can
//! observe the bitmap out of step with the backend.

use crate::bitmap::UnitBitmap;
use crate::{BackendError, CmaError, RangeBackend};
use core::ops::Range;
use kernel_info::memory::{MAX_ALIGNMENT_ORDER, UNIT_SHIFT, units_to_bytes};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Start the search at `start` for spans larger than `min_span`.
///
/// Keeps the head of the arena free for small allocations when a known
/// large consumer would otherwise fragment it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SearchOffset {
    pub start: usize,
    pub min_span: usize,
}

/// How far the search cursor moves past a run the backend reported busy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BusyStride {
    /// Resume after the end of the busy run.
    #[default]
    SkipRun,
    /// Resume one alignment step after the start of the busy run.
    Alignment,
}

impl BusyStride {
    #[inline]
    const fn next_cursor(self, index: usize, span: usize, align_mask: usize) -> usize {
        match self {
            Self::SkipRun => index + span,
            Self::Alignment => index + align_mask + 1,
        }
    }
}

/// Per-region tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionConfig {
    /// Log2 of the unit size, used for the byte values in [`RegionInfo`].
    pub unit_shift: u32,
    /// Alignment orders above this are clamped.
    pub max_alignment_order: u32,
    pub search_offset: Option<SearchOffset>,
    pub busy_stride: BusyStride,
    /// Give up with [`CmaError::RangeBusy`] after this many busy runs in one
    /// allocation. `None` relies on the finite arena alone.
    pub max_busy_retries: Option<usize>,
    /// Extra attempts for a busy run while isolating before rolling back.
    pub isolate_busy_retries: usize,
    /// The arena is never lent to the general allocator.
    pub start_isolated: bool,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            unit_shift: UNIT_SHIFT,
            max_alignment_order: MAX_ALIGNMENT_ORDER,
            search_offset: None,
            busy_stride: BusyStride::SkipRun,
            max_busy_retries: None,
            isolate_busy_retries: 0,
            start_isolated: false,
        }
    }
}

impl RegionConfig {
    #[must_use]
    pub const fn with_unit_shift(mut self, unit_shift: u32) -> Self {
        self.unit_shift = unit_shift;
        self
    }

    #[must_use]
    pub const fn with_max_alignment_order(mut self, order: u32) -> Self {
        self.max_alignment_order = order;
        self
    }

    #[must_use]
    pub const fn with_search_offset(mut self, start: usize, min_span: usize) -> Self {
        self.search_offset = Some(SearchOffset { start, min_span });
        self
    }

    #[must_use]
    pub const fn with_busy_stride(mut self, stride: BusyStride) -> Self {
        self.busy_stride = stride;
        self
    }

    #[must_use]
    pub const fn with_max_busy_retries(mut self, retries: usize) -> Self {
        self.max_busy_retries = Some(retries);
        self
    }

    #[must_use]
    pub const fn with_isolate_busy_retries(mut self, retries: usize) -> Self {
        self.isolate_busy_retries = retries;
        self
    }

    #[must_use]
    pub const fn with_start_isolated(mut self, isolated: bool) -> Self {
        self.start_isolated = isolated;
        self
    }

    /// Clamp settings an arena of `unit_count` units cannot honor.
    ///
    /// Shift amounts are kept below the width of the value they shift, and a
    /// search offset outside the arena is dropped.
    fn fit_to(mut self, unit_count: usize) -> Self {
        if self.max_alignment_order >= usize::BITS {
            warn!(
                "alignment order {} clamped to {}",
                self.max_alignment_order,
                usize::BITS - 1
            );
            self.max_alignment_order = usize::BITS - 1;
        }
        if self.unit_shift >= u64::BITS {
            warn!("unit shift {} clamped to {}", self.unit_shift, u64::BITS - 1);
            self.unit_shift = u64::BITS - 1;
        }
        if self.search_offset.is_some_and(|o| o.start >= unit_count) {
            warn!("search offset outside of {unit_count} unit(s) ignored");
            self.search_offset = None;
        }
        self
    }

    const fn search_start(&self, span: usize) -> usize {
        match self.search_offset {
            Some(offset) if span > offset.min_span => offset.start,
            _ => 0,
        }
    }
}

/// A successful allocation: `span` units starting at absolute unit `unit`.
///
/// Not `Clone`: it is consumed by [`ContiguousRegion::release`], so a handle
/// can be returned at most once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an allocation leaks unless it is released"]
pub struct Allocation {
    unit: u64,
    span: usize,
}

impl Allocation {
    /// First absolute unit of the allocation.
    #[inline]
    #[must_use]
    pub const fn unit(&self) -> u64 {
        self.unit
    }

    /// Number of units.
    #[inline]
    #[must_use]
    pub const fn span(&self) -> usize {
        self.span
    }

    /// Give up the handle, e.g. to store it in a foreign structure.
    #[inline]
    #[must_use]
    pub const fn into_raw(self) -> (u64, usize) {
        (self.unit, self.span)
    }

    /// Rebuild a handle previously taken apart with [`into_raw`](Self::into_raw).
    ///
    /// A forged handle is caught by the range and double-free checks of
    /// [`ContiguousRegion::release`] only as far as the bitmap allows.
    #[inline]
    pub const fn from_raw(unit: u64, span: usize) -> Self {
        Self { unit, span }
    }
}

/// Consistent snapshot of a region's state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    /// Base address in bytes.
    pub base: u64,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub isolated: bool,
}

struct RegionState {
    bitmap: UnitBitmap,
    free_units: usize,
    /// Units at or above this index are withheld from the general allocator.
    exclusive_from: usize,
}

impl RegionState {
    #[inline]
    const fn is_isolated(&self) -> bool {
        self.exclusive_from < self.bitmap.capacity()
    }

    /// The part of `[index, index + span)` still shared with the general allocator.
    #[inline]
    fn shared_part(&self, index: usize, span: usize) -> Range<usize> {
        let end = (index + span).min(self.exclusive_from);
        index..end.max(index)
    }
}

/// Allocator for contiguous unit runs of one reserved arena.
pub struct ContiguousRegion<B: RangeBackend> {
    backend: Arc<B>,
    base_unit: u64,
    unit_count: usize,
    config: RegionConfig,
    state: Mutex<RegionState>,
}

impl<B: RangeBackend> ContiguousRegion<B> {
    /// Create a fully free region over `[base_unit, base_unit + unit_count)`.
    ///
    /// The arena must already be reserved with the backend; the
    /// [`RegistryBuilder`](crate::RegistryBuilder) takes care of that.
    /// Out-of-range settings in `config` are clamped, see [`config`](Self::config).
    #[must_use]
    pub fn new(backend: Arc<B>, base_unit: u64, unit_count: usize, config: RegionConfig) -> Self {
        let config = config.fit_to(unit_count);
        let exclusive_from = if config.start_isolated { 0 } else { unit_count };
        Self {
            backend,
            base_unit,
            unit_count,
            config,
            state: Mutex::new(RegionState {
                bitmap: UnitBitmap::new(unit_count),
                free_units: unit_count,
                exclusive_from,
            }),
        }
    }

    /// First absolute unit of the arena.
    #[inline]
    #[must_use]
    pub const fn base_unit(&self) -> u64 {
        self.base_unit
    }

    /// Capacity of the arena in units.
    #[inline]
    #[must_use]
    pub const fn unit_count(&self) -> usize {
        self.unit_count
    }

    /// The effective configuration, after clamping.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Units not currently allocated.
    #[must_use]
    pub fn free_units(&self) -> usize {
        self.state.lock().free_units
    }

    #[must_use]
    pub fn is_isolated(&self) -> bool {
        self.state.lock().is_isolated()
    }

    /// Whether the absolute range lies entirely inside this arena.
    #[must_use]
    pub fn contains(&self, unit: u64, span: usize) -> bool {
        self.offset_of(unit, span).is_some()
    }

    /// Copy of the allocation bitmap, taken under the lock.
    #[must_use]
    pub fn bitmap_snapshot(&self) -> UnitBitmap {
        self.state.lock().bitmap.clone()
    }

    /// Consistent `{base, total, free, isolated}` snapshot.
    #[must_use]
    pub fn query(&self) -> RegionInfo {
        let state = self.state.lock();
        let shift = self.config.unit_shift;
        RegionInfo {
            base: units_to_bytes(self.base_unit, shift),
            total_bytes: units_to_bytes(self.unit_count as u64, shift),
            free_bytes: units_to_bytes(state.free_units as u64, shift),
            isolated: state.is_isolated(),
        }
    }

    /// Allocate `span` contiguous units aligned to `1 << alignment_order` units.
    ///
    /// Runs the backend reports busy are skipped and the search continues
    /// behind them until the arena is exhausted.
    ///
    /// # Errors
    /// - [`CmaError::InvalidRange`] for a zero `span`.
    /// - [`CmaError::OutOfSpace`] if no suitable run can be withdrawn.
    /// - [`CmaError::RangeBusy`] if `max_busy_retries` is configured and exceeded.
    /// - [`CmaError::Backend`] for hard backend failures.
    pub fn allocate(&self, span: usize, alignment_order: u32) -> Result<Allocation, CmaError> {
        if span == 0 {
            error!("region {:#x}: zero-length allocation", self.base_unit);
            return Err(CmaError::InvalidRange {
                unit: self.base_unit,
                span,
            });
        }

        let order = alignment_order.min(self.config.max_alignment_order);
        let align_mask = (1usize << order) - 1;

        let mut state = self.state.lock();
        let mut cursor = self.config.search_start(span);
        let mut busy_runs = 0usize;

        debug!(
            "region {:#x}: allocate {span} unit(s), order {order}, from {cursor}",
            self.base_unit
        );

        loop {
            let Some(index) = state.bitmap.find_free_run(cursor, span, align_mask) else {
                debug!(
                    "region {:#x}: no run of {span} unit(s) after {busy_runs} busy run(s)",
                    self.base_unit
                );
                return Err(CmaError::OutOfSpace);
            };

            let shared = state.shared_part(index, span);
            if !shared.is_empty() {
                match self.withdraw(shared.clone()) {
                    Ok(()) => {}
                    Err(e) if e.is_busy() => {
                        busy_runs += 1;
                        debug!(
                            "region {:#x}: units {:#x}+{} busy, retrying",
                            self.base_unit,
                            self.absolute(index),
                            shared.len()
                        );
                        if self.config.max_busy_retries.is_some_and(|max| busy_runs > max) {
                            warn!(
                                "region {:#x}: giving up after {busy_runs} busy run(s)",
                                self.base_unit
                            );
                            return Err(CmaError::RangeBusy);
                        }
                        let next = self.config.busy_stride.next_cursor(index, span, align_mask);
                        if next <= cursor || next >= self.unit_count {
                            return Err(CmaError::OutOfSpace);
                        }
                        cursor = next;
                        continue;
                    }
                    Err(e) => {
                        error!(
                            "region {:#x}: withdrawing {:#x}+{} failed: {e}",
                            self.base_unit,
                            self.absolute(index),
                            shared.len()
                        );
                        return Err(e.into());
                    }
                }
            }

            state.bitmap.set_run(index, span);
            state.free_units -= span;
            let unit = self.absolute(index);
            debug!("region {:#x}: allocated {unit:#x}+{span}", self.base_unit);
            return Ok(Allocation { unit, span });
        }
    }

    /// Return an allocation made by this region.
    ///
    /// # Errors
    /// See [`free`](Self::free).
    pub fn release(&self, allocation: Allocation) -> Result<(), CmaError> {
        let (unit, span) = allocation.into_raw();
        self.free(unit, span)
    }

    /// Free `span` units starting at absolute unit `unit`.
    ///
    /// # Errors
    /// - [`CmaError::InvalidRange`] if the range is empty or leaves the arena.
    /// - [`CmaError::DoubleFree`] if any unit of the range is not allocated;
    ///   nothing is changed in that case.
    pub fn free(&self, unit: u64, span: usize) -> Result<(), CmaError> {
        let Some(offset) = self.offset_of(unit, span) else {
            error!(
                "region {:#x}: free of {unit:#x}+{span} outside of [{:#x}, +{})",
                self.base_unit, self.base_unit, self.unit_count
            );
            return Err(CmaError::InvalidRange { unit, span });
        };

        let mut state = self.state.lock();
        if !state.bitmap.is_run_set(offset, span) {
            error!(
                "region {:#x}: double free of {unit:#x}+{span}",
                self.base_unit
            );
            return Err(CmaError::DoubleFree { unit, span });
        }

        state.bitmap.clear_run(offset, span);
        let shared = state.shared_part(offset, span);
        if !shared.is_empty() {
            self.restore(shared);
        }
        state.free_units += span;
        debug!("region {:#x}: freed {unit:#x}+{span}", self.base_unit);
        Ok(())
    }

    /// Withhold every free unit of the arena from the general allocator.
    ///
    /// Allocated units are already withheld and are skipped. If any free run
    /// cannot be withdrawn, the runs withdrawn so far are restored before the
    /// error is returned, leaving the region as it was.
    ///
    /// # Errors
    /// - [`CmaError::AlreadyIsolated`] if the region is (partly) isolated.
    /// - [`CmaError::RangeBusy`] / [`CmaError::Backend`] from the backend.
    pub fn isolate(&self) -> Result<(), CmaError> {
        let mut state = self.state.lock();
        if self.unit_count == 0 {
            return Ok(());
        }
        if state.is_isolated() {
            warn!("region {:#x}: already isolated", self.base_unit);
            return Err(CmaError::AlreadyIsolated);
        }

        for run in state.bitmap.clear_runs(0, self.unit_count) {
            if let Err(e) = self.withdraw_for_isolation(run.clone()) {
                warn!(
                    "region {:#x}: failed to isolate {:#x}+{}: {e}, rolling back",
                    self.base_unit,
                    self.absolute(run.start),
                    run.len()
                );
                self.restore_clear_runs(&state.bitmap, 0..run.start);
                return Err(e.into());
            }
        }

        state.exclusive_from = 0;
        info!(
            "region {:#x}: isolated, {} of {} unit(s) free",
            self.base_unit, state.free_units, self.unit_count
        );
        Ok(())
    }

    /// Return every free unit of the arena to the general allocator.
    ///
    /// # Errors
    /// [`CmaError::NotIsolated`] if the region is not isolated.
    pub fn deisolate(&self) -> Result<(), CmaError> {
        self.deisolate_until(self.unit_count)
    }

    /// Return the free units below arena offset `bound` to the general allocator.
    ///
    /// The region stays isolated unless `bound` covers the whole arena.
    ///
    /// # Errors
    /// - [`CmaError::InvalidRange`] if `bound` exceeds the arena.
    /// - [`CmaError::NotIsolated`] if the region is not isolated.
    pub fn deisolate_until(&self, bound: usize) -> Result<(), CmaError> {
        if bound > self.unit_count {
            error!(
                "region {:#x}: deisolate bound {bound} exceeds {} unit(s)",
                self.base_unit, self.unit_count
            );
            return Err(CmaError::InvalidRange {
                unit: self.base_unit,
                span: bound,
            });
        }

        let mut state = self.state.lock();
        if !state.is_isolated() {
            error!("region {:#x}: not isolated", self.base_unit);
            return Err(CmaError::NotIsolated);
        }

        let from = state.exclusive_from;
        if bound > from {
            self.restore_clear_runs(&state.bitmap, from..bound);
            state.exclusive_from = bound;
        }

        if state.is_isolated() {
            debug!(
                "region {:#x}: shared below {}",
                self.base_unit, state.exclusive_from
            );
        } else {
            info!("region {:#x}: returned to the general allocator", self.base_unit);
        }
        Ok(())
    }

    /// Arena offset of an absolute range, if it lies inside the arena.
    fn offset_of(&self, unit: u64, span: usize) -> Option<usize> {
        let offset = usize::try_from(unit.checked_sub(self.base_unit)?).ok()?;
        let end = offset.checked_add(span)?;
        (span > 0 && end <= self.unit_count).then_some(offset)
    }

    #[inline]
    const fn absolute(&self, offset: usize) -> u64 {
        self.base_unit + offset as u64
    }

    fn withdraw(&self, run: Range<usize>) -> Result<(), BackendError> {
        self.backend
            .withdraw_range(self.absolute(run.start), run.len())
    }

    fn restore(&self, run: Range<usize>) {
        self.backend.restore_range(self.absolute(run.start), run.len());
    }

    fn withdraw_for_isolation(&self, run: Range<usize>) -> Result<(), BackendError> {
        let mut attempts = 0;
        loop {
            match self.withdraw(run.clone()) {
                Err(e) if e.is_busy() && attempts < self.config.isolate_busy_retries => {
                    attempts += 1;
                    warn!(
                        "region {:#x}: {:#x}+{} busy while isolating, attempt {attempts}",
                        self.base_unit,
                        self.absolute(run.start),
                        run.len()
                    );
                }
                result => return result,
            }
        }
    }

    fn restore_clear_runs(&self, bitmap: &UnitBitmap, within: Range<usize>) {
        for run in bitmap.clear_runs(within.start, within.end) {
            self.restore(run);
        }
    }
}

impl<B: RangeBackend> core::fmt::Debug for ContiguousRegion<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContiguousRegion")
            .field("base_unit", &self.base_unit)
            .field("unit_count", &self.unit_count)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
