/// Errors returned by the page pool and its unit source.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool has no bucket for this order.
    #[error("order {order} is not supported by this pool")]
    UnsupportedOrder { order: u32 },
    /// Items of the largest order would not fit in `usize` bytes.
    #[error("unit shift {shift} is too large for order {order}")]
    InvalidUnitShift { shift: u32, order: u32 },
    /// The unit source could not produce a fresh unit.
    #[error("no fresh unit of order {order} available")]
    Exhausted { order: u32 },
}
