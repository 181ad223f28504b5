//! # Reclaim Coordinator
//!
//! The memory-pressure entry point. The host decides when to call
//! [`Reclaimer::reclaim`]; nothing here registers itself anywhere.

use crate::deferred::{BufferSink, DeferredFreeList, DrainOrigin};
use crate::pool::{PagePool, ShrinkScope, UnitSource};
use log::debug;
use std::sync::Arc;

/// Frees memory held by a deferred free list and a page pool.
pub struct Reclaimer<S: UnitSource, B: BufferSink> {
    deferred: Arc<DeferredFreeList<B>>,
    pool: Arc<PagePool<S>>,
}

impl<S: UnitSource, B: BufferSink> Reclaimer<S, B> {
    #[must_use]
    pub const fn new(deferred: Arc<DeferredFreeList<B>>, pool: Arc<PagePool<S>>) -> Self {
        Self { deferred, pool }
    }

    /// Bytes a full reclaim could free right now.
    #[must_use]
    pub fn reclaimable_bytes(&self) -> usize {
        self.deferred.size() + self.pool.total_bytes()
    }

    /// Free at least `requested_bytes` if possible and return the bytes freed.
    ///
    /// Drains the deferred free list first, then shrinks the pool, largest
    /// order first, for whatever is still missing. Both steps free whole
    /// entries or items, so the result may exceed the request. Never fails.
    pub fn reclaim(&self, requested_bytes: usize) -> usize {
        if requested_bytes == 0 {
            return 0;
        }

        let drained = self.deferred.drain_as(requested_bytes, DrainOrigin::Reclaim);
        let mut freed = drained;

        for order in self.pool.orders() {
            let Some(missing) = requested_bytes.checked_sub(freed).filter(|&m| m > 0) else {
                break;
            };
            let item_bytes = self.pool.item_bytes(order);
            let shrunk = self
                .pool
                .shrink(ShrinkScope::Order(order), missing.div_ceil(item_bytes));
            freed += shrunk * item_bytes;
        }

        debug!(
            "reclaim: {freed} of {requested_bytes} byte(s), {drained} from the deferred list"
        );
        freed
    }
}

impl<S: UnitSource, B: BufferSink> core::fmt::Debug for Reclaimer<S, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reclaimer")
            .field("deferred", &self.deferred)
            .field("pool", &self.pool)
            .finish()
    }
}
