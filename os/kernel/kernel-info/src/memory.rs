//! # Unit Geometry

/// Log2 of the size of one allocation unit in bytes.
pub const UNIT_SHIFT: u32 = 12;

/// Size of one allocation unit (one page) in bytes.
pub const UNIT_SIZE: usize = 1 << UNIT_SHIFT;

/// Maximum number of reserved regions the registry accepts.
///
/// This is a deliberate resource bound. Registering more regions is a
/// startup configuration error.
pub const MAX_REGIONS: usize = 8;

/// Largest alignment order honored for contiguous allocations.
///
/// Requests with a larger order are clamped to this value, i.e. no
/// allocation is aligned to more than `1 << MAX_ALIGNMENT_ORDER` units.
pub const MAX_ALIGNMENT_ORDER: u32 = 8;

/// Size classes cached by the page pool, largest first.
pub const DEFAULT_POOL_ORDERS: [u32; 3] = [8, 4, 0];

/// Highest order the page pool accepts.
pub const MAX_POOL_ORDER: u32 = 10;

/// Convert a unit count to bytes for the given unit shift.
#[inline]
#[must_use]
pub const fn units_to_bytes(units: u64, unit_shift: u32) -> u64 {
    units << unit_shift
}

/// Number of order-0 units covered by one item of `order`.
#[inline]
#[must_use]
pub const fn order_units(order: u32) -> usize {
    1 << order
}

const _: () = {
    assert!(UNIT_SIZE.is_power_of_two());
    assert!(MAX_REGIONS > 0);
    assert!(MAX_ALIGNMENT_ORDER < usize::BITS);
    assert!(MAX_POOL_ORDER < usize::BITS);

    let mut i = 0;
    while i < DEFAULT_POOL_ORDERS.len() {
        assert!(DEFAULT_POOL_ORDERS[i] <= MAX_POOL_ORDER);
        if i > 0 {
            assert!(DEFAULT_POOL_ORDERS[i] < DEFAULT_POOL_ORDERS[i - 1]);
        }
        i += 1;
    }
};
