mod common;

use common::RecordingSource;
use kernel_info::memory::UNIT_SIZE;
use kernel_pool::{PagePool, PoolConfig, PoolError, ShrinkScope, Tier};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;

fn pool() -> PagePool<RecordingSource> {
    PagePool::new(RecordingSource::new(), PoolConfig::default()).unwrap()
}

#[test]
fn miss_allocates_fresh_and_hit_reuses() {
    let p = pool();
    let a = p.acquire(0, Tier::Low, true).unwrap();
    assert!(!a.from_pool);
    assert_eq!(p.source().fresh(), [(0, true)]);

    p.release(a.unit, 0, Tier::Low);
    let b = p.acquire(0, Tier::Low, false).unwrap();
    assert!(b.from_pool);
    assert_eq!(b.unit, a.unit);
    assert_eq!(p.source().fresh().len(), 1);
}

#[test]
fn buckets_are_per_order_and_tier() {
    let p = pool();
    p.release(10, 4, Tier::High);

    // Same order, other tier: miss.
    assert!(!p.acquire(4, Tier::Low, false).unwrap().from_pool);
    // Other order, same tier: miss.
    assert!(!p.acquire(0, Tier::High, false).unwrap().from_pool);
    assert_eq!(p.count(4, Tier::High), 1);
}

#[test]
fn buckets_are_fifo() {
    let p = pool();
    for unit in [7, 8, 9] {
        p.release(unit, 8, Tier::Low);
    }
    let order: Vec<u64> = (0..3)
        .map(|_| p.acquire(8, Tier::Low, false).unwrap().unit)
        .collect();
    assert_eq!(order, [7, 8, 9]);
}

#[test]
fn unsupported_order_is_rejected() {
    let p = pool();
    assert_eq!(
        p.acquire(3, Tier::Low, true).unwrap_err(),
        PoolError::UnsupportedOrder { order: 3 }
    );
    assert_eq!(
        p.preload(3, Tier::Low, 1),
        Err(PoolError::UnsupportedOrder { order: 3 })
    );
    assert_eq!(p.shrink(ShrinkScope::Order(3), 5), 0);
    assert_eq!(p.count(3, Tier::Low), 0);
    assert!(p.source().fresh().is_empty());
}

#[test]
fn fresh_failure_propagates() {
    let p = PagePool::new(RecordingSource::with_budget(0), PoolConfig::default()).unwrap();
    assert_eq!(
        p.acquire(4, Tier::High, false).unwrap_err(),
        PoolError::Exhausted { order: 4 }
    );
}

#[test]
fn preload_stops_when_the_source_runs_dry() {
    let p = PagePool::new(RecordingSource::with_budget(3), PoolConfig::default()).unwrap();
    assert_eq!(p.preload(4, Tier::High, 5), Ok(3));
    assert_eq!(p.count(4, Tier::High), 3);
    assert!(p.source().fresh().iter().all(|&(order, wait)| order == 4 && !wait));

    assert!(p.acquire(4, Tier::High, false).unwrap().from_pool);
}

#[test]
fn shrink_takes_low_tier_first() {
    let p = pool();
    p.release(1, 4, Tier::High);
    p.release(2, 4, Tier::Low);
    p.release(3, 4, Tier::Low);

    assert_eq!(p.shrink(ShrinkScope::Order(4), 2), 2);
    assert_eq!(p.source().returned(), [(2, 4), (3, 4)]);
    assert_eq!(p.count(4, Tier::Low), 0);
    assert_eq!(p.count(4, Tier::High), 1);

    assert_eq!(p.shrink(ShrinkScope::Order(4), 5), 1);
    assert_eq!(p.source().returned().last(), Some(&(1, 4)));
}

#[test]
fn shrink_all_goes_largest_order_first() {
    let p = pool();
    p.release(1, 0, Tier::High);
    p.release(2, 8, Tier::Low);
    p.release(3, 4, Tier::High);

    assert_eq!(p.shrink(ShrinkScope::All, 2), 2);
    assert_eq!(p.source().returned(), [(2, 8), (3, 4)]);
    assert_eq!(p.count(0, Tier::High), 1);
}

#[test]
fn totals_count_order_zero_units() {
    let p = pool();
    p.release(1, 8, Tier::High);
    p.release(2, 4, Tier::Low);
    p.release(3, 0, Tier::Low);
    assert_eq!(p.total_units(), 256 + 16 + 1);
    assert_eq!(p.total_bytes(), (256 + 16 + 1) * UNIT_SIZE);
}

#[test]
fn concurrent_release_and_acquire_keep_counts() {
    let threads = 8;
    let rounds = 200;
    let p = Arc::new(pool());
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let p = Arc::clone(&p);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let tier = if t % 2 == 0 { Tier::High } else { Tier::Low };
                start.wait();
                for _ in 0..rounds {
                    let a = p.acquire(4, tier, true).unwrap();
                    p.release(a.unit, 4, tier);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let fresh = p.source().fresh().len();
    assert_eq!(p.count(4, Tier::High) + p.count(4, Tier::Low), fresh);
    assert!(fresh <= threads);
}

proptest! {
    #[test]
    fn shrink_never_exceeds_request(
        high in 0usize..20,
        low in 0usize..20,
        request in 0usize..50,
    ) {
        let p = pool();
        for i in 0..high {
            p.release(i as u64, 4, Tier::High);
        }
        for i in 0..low {
            p.release((100 + i) as u64, 4, Tier::Low);
        }

        let before = p.count(4, Tier::High) + p.count(4, Tier::Low);
        let shrunk = p.shrink(ShrinkScope::Order(4), request);
        let after = p.count(4, Tier::High) + p.count(4, Tier::Low);

        prop_assert!(shrunk <= request);
        prop_assert_eq!(shrunk, request.min(before));
        prop_assert_eq!(after, before - shrunk);
        prop_assert_eq!(p.count(4, Tier::High), high.min(before - shrunk));
        prop_assert_eq!(p.source().returned().len(), shrunk);
    }
}
