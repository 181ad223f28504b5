//! # Page Pool
//!
//! Caches previously used units that are ready for reuse, bucketed by order
//! (size class) and by [`Tier`]. A miss falls through to the [`UnitSource`];
//! cached units only go back to the source when the pool is shrunk.
//!
//! ```text
//!   order 8 ─┬─ high: [u, u]          ◄── one lock per order
//!            └─ low:  [u]
//!   order 4 ─┬─ high: []
//!            └─ low:  [u, u, u]
//!   order 0 ─┬─ high: [u]
//!            └─ low:  []
//! ```

use crate::PoolError;
use kernel_info::memory::{DEFAULT_POOL_ORDERS, MAX_POOL_ORDER, UNIT_SHIFT, order_units};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Placement class of a pooled unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Tier {
    /// The lower-priority tier, cheaper to reacquire. Shrunk first.
    Low,
    /// The higher-priority tier. Shrunk once `Low` is empty.
    High,
}

impl Tier {
    /// Order in which [`PagePool::shrink`] empties the tiers.
    pub const SHRINK_ORDER: [Self; 2] = [Self::Low, Self::High];
}

/// Which buckets [`PagePool::shrink`] may take from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShrinkScope {
    Order(u32),
    /// Every order, largest first.
    All,
}

/// The general allocator behind the pool.
pub trait UnitSource: Send + Sync {
    type Unit: Send;

    /// Allocate a fresh unit of `order`.
    ///
    /// With `allow_wait` unset the source must not block; it fails with
    /// [`PoolError::Exhausted`] instead.
    ///
    /// # Errors
    /// [`PoolError::Exhausted`] if no unit could be produced.
    fn allocate_fresh_unit(&self, order: u32, allow_wait: bool) -> Result<Self::Unit, PoolError>;

    /// Give a unit of `order` back to the system.
    fn return_unit_to_system(&self, unit: Self::Unit, order: u32);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Orders the pool keeps buckets for.
    pub orders: Vec<u32>,
    /// Log2 of the order-0 unit size in bytes.
    pub unit_shift: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            orders: DEFAULT_POOL_ORDERS.to_vec(),
            unit_shift: UNIT_SHIFT,
        }
    }
}

/// Unit handed out by [`PagePool::acquire`].
#[derive(Debug, PartialEq, Eq)]
pub struct Acquired<U> {
    pub unit: U,
    /// `true` if the unit came from the cache, `false` if it is fresh.
    pub from_pool: bool,
}

struct TierList<U> {
    items: VecDeque<U>,
    count: usize,
}

impl<U> TierList<U> {
    const fn new() -> Self {
        Self {
            items: VecDeque::new(),
            count: 0,
        }
    }

    fn push(&mut self, unit: U) {
        self.items.push_back(unit);
        self.count += 1;
        debug_assert_eq!(self.count, self.items.len());
    }

    fn pop(&mut self) -> Option<U> {
        let unit = self.items.pop_front()?;
        self.count -= 1;
        debug_assert_eq!(self.count, self.items.len());
        Some(unit)
    }
}

struct OrderBuckets<U> {
    high: TierList<U>,
    low: TierList<U>,
}

impl<U> OrderBuckets<U> {
    const fn new() -> Self {
        Self {
            high: TierList::new(),
            low: TierList::new(),
        }
    }

    const fn tier(&mut self, tier: Tier) -> &mut TierList<U> {
        match tier {
            Tier::High => &mut self.high,
            Tier::Low => &mut self.low,
        }
    }

    const fn count(&self, tier: Tier) -> usize {
        match tier {
            Tier::High => self.high.count,
            Tier::Low => self.low.count,
        }
    }
}

/// Cache of ready-for-reuse units in front of a [`UnitSource`].
pub struct PagePool<S: UnitSource> {
    source: S,
    unit_shift: u32,
    /// Sorted by order, largest first.
    buckets: Vec<(u32, Mutex<OrderBuckets<S::Unit>>)>,
}

impl<S: UnitSource> PagePool<S> {
    /// Create an empty pool with one bucket per configured order.
    ///
    /// Duplicate orders are merged.
    ///
    /// # Errors
    /// - [`PoolError::UnsupportedOrder`] for an order above [`MAX_POOL_ORDER`].
    /// - [`PoolError::InvalidUnitShift`] if an item of the largest order does
    ///   not fit in `usize` bytes.
    pub fn new(source: S, config: PoolConfig) -> Result<Self, PoolError> {
        let mut orders = config.orders;
        if let Some(&order) = orders.iter().find(|&&o| o > MAX_POOL_ORDER) {
            return Err(PoolError::UnsupportedOrder { order });
        }
        orders.sort_unstable_by(|a, b| b.cmp(a));
        orders.dedup();

        let largest = orders.first().copied().unwrap_or(0);
        if largest.saturating_add(config.unit_shift) >= usize::BITS {
            return Err(PoolError::InvalidUnitShift {
                shift: config.unit_shift,
                order: largest,
            });
        }

        info!("page pool: orders {orders:?}");
        Ok(Self {
            source,
            unit_shift: config.unit_shift,
            buckets: orders
                .into_iter()
                .map(|o| (o, Mutex::new(OrderBuckets::new())))
                .collect(),
        })
    }

    #[inline]
    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Supported orders, largest first.
    pub fn orders(&self) -> impl Iterator<Item = u32> + '_ {
        self.buckets.iter().map(|(order, _)| *order)
    }

    /// Size of one item of `order` in bytes.
    #[inline]
    #[must_use]
    pub const fn item_bytes(&self, order: u32) -> usize {
        order_units(order) << self.unit_shift
    }

    fn bucket(&self, order: u32) -> Option<&Mutex<OrderBuckets<S::Unit>>> {
        self.buckets
            .iter()
            .find(|(o, _)| *o == order)
            .map(|(_, bucket)| bucket)
    }

    /// Take a unit of `order` from the `tier` bucket, or a fresh one from the
    /// source if the bucket is empty.
    ///
    /// # Errors
    /// - [`PoolError::UnsupportedOrder`] if the pool has no bucket for `order`.
    /// - Whatever the source reports for a fresh allocation.
    pub fn acquire(
        &self,
        order: u32,
        tier: Tier,
        allow_wait: bool,
    ) -> Result<Acquired<S::Unit>, PoolError> {
        let bucket = self
            .bucket(order)
            .ok_or(PoolError::UnsupportedOrder { order })?;

        if let Some(unit) = bucket.lock().tier(tier).pop() {
            return Ok(Acquired {
                unit,
                from_pool: true,
            });
        }

        debug!("page pool: order {order} {tier:?} empty, allocating fresh");
        let unit = self.source.allocate_fresh_unit(order, allow_wait)?;
        Ok(Acquired {
            unit,
            from_pool: false,
        })
    }

    /// Put a unit back into its bucket. Never fails.
    ///
    /// A unit of an order the pool does not cache goes straight back to the
    /// source.
    pub fn release(&self, unit: S::Unit, order: u32, tier: Tier) {
        if let Some(bucket) = self.bucket(order) {
            bucket.lock().tier(tier).push(unit);
        } else {
            warn!("page pool: release of uncached order {order}, returning to system");
            self.source.return_unit_to_system(unit, order);
        }
    }

    /// Fill the `tier` bucket of `order` with up to `count` fresh units.
    ///
    /// Stops early, without error, once the source is exhausted.
    ///
    /// # Errors
    /// [`PoolError::UnsupportedOrder`] if the pool has no bucket for `order`.
    pub fn preload(&self, order: u32, tier: Tier, count: usize) -> Result<usize, PoolError> {
        let bucket = self
            .bucket(order)
            .ok_or(PoolError::UnsupportedOrder { order })?;

        let mut added = 0;
        while added < count {
            match self.source.allocate_fresh_unit(order, false) {
                Ok(unit) => {
                    bucket.lock().tier(tier).push(unit);
                    added += 1;
                }
                Err(e) => {
                    debug!("page pool: preload of order {order} stopped: {e}");
                    break;
                }
            }
        }
        debug!("page pool: preloaded {added}/{count} order {order} {tier:?}");
        Ok(added)
    }

    /// Return up to `count` cached items to the source.
    ///
    /// Within an order the [`Tier::Low`] bucket is emptied before the
    /// [`Tier::High`] one. Returns the number of items actually returned,
    /// never more than `count`. An unsupported order shrinks nothing.
    pub fn shrink(&self, scope: ShrinkScope, count: usize) -> usize {
        let mut remaining = count;
        for (order, bucket) in &self.buckets {
            if remaining == 0 {
                break;
            }
            if matches!(scope, ShrinkScope::Order(o) if o != *order) {
                continue;
            }

            let taken = {
                let mut buckets = bucket.lock();
                let mut taken = Vec::new();
                for tier in Tier::SHRINK_ORDER {
                    let list = buckets.tier(tier);
                    while taken.len() < remaining {
                        match list.pop() {
                            Some(unit) => taken.push(unit),
                            None => break,
                        }
                    }
                }
                taken
            };

            remaining -= taken.len();
            for unit in taken {
                self.source.return_unit_to_system(unit, *order);
            }
        }

        let shrunk = count - remaining;
        if shrunk > 0 {
            debug!("page pool: shrunk {shrunk}/{count} item(s) ({scope:?})");
        }
        shrunk
    }

    /// Cached items in one bucket; zero for unsupported orders.
    #[must_use]
    pub fn count(&self, order: u32, tier: Tier) -> usize {
        self.bucket(order).map_or(0, |b| b.lock().count(tier))
    }

    /// Cached order-0 units across all buckets.
    #[must_use]
    pub fn total_units(&self) -> usize {
        self.buckets
            .iter()
            .map(|(order, bucket)| {
                let b = bucket.lock();
                (b.count(Tier::High) + b.count(Tier::Low)) * order_units(*order)
            })
            .sum()
    }

    /// Cached bytes across all buckets.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_units() << self.unit_shift
    }
}

impl<S: UnitSource> Drop for PagePool<S> {
    fn drop(&mut self) {
        let returned = self.shrink(ShrinkScope::All, usize::MAX);
        if returned > 0 {
            debug!("page pool: returned {returned} cached item(s) on drop");
        }
    }
}

impl<S: UnitSource> core::fmt::Debug for PagePool<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PagePool")
            .field("orders", &self.orders().collect::<Vec<_>>())
            .field("unit_shift", &self.unit_shift)
            .finish_non_exhaustive()
    }
}
