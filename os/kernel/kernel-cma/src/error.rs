//! Error taxonomy of the contiguous region allocator.

/// Failure reported by a [`RangeBackend`](crate::RangeBackend) call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The range is transiently in use by another subsystem (e.g. a pinned page).
    #[error("range is busy")]
    Busy,
    /// The backend refused the range for good.
    #[error("backend failure (code {code})")]
    Failed { code: i32 },
}

impl BackendError {
    /// Whether the failure is transient and the caller may try another range.
    #[inline]
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Errors returned by regions and the region registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CmaError {
    /// No free run of the requested length and alignment exists.
    #[error("no free run of sufficient length and alignment")]
    OutOfSpace,
    /// The backend kept reporting the range as busy.
    #[error("contiguous range is busy")]
    RangeBusy,
    /// The range lies (partly) outside the arena or is empty.
    #[error("invalid range: {span} unit(s) at unit {unit:#x}")]
    InvalidRange { unit: u64, span: usize },
    /// Some unit of the range is not currently allocated.
    #[error("double free: {span} unit(s) at unit {unit:#x}")]
    DoubleFree { unit: u64, span: usize },
    /// The region is already withheld from the general allocator.
    #[error("region is already isolated")]
    AlreadyIsolated,
    /// The region is not withheld from the general allocator.
    #[error("region is not isolated")]
    NotIsolated,
    /// The registry bound is exhausted.
    #[error("too many regions (limit {limit})")]
    TooManyRegions { limit: usize },
    /// A region for this owner is already registered.
    #[error("owner already has a region")]
    DuplicateOwner,
    /// The reservation overlaps an already registered region.
    #[error("reservation overlaps an existing region")]
    Overlap,
    /// Hard failure reported by the backend.
    #[error("backend error: {0}")]
    Backend(BackendError),
}

impl From<BackendError> for CmaError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::Busy => Self::RangeBusy,
            e @ BackendError::Failed { .. } => Self::Backend(e),
        }
    }
}
