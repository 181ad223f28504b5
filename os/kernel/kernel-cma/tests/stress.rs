mod common;

use common::RecordingBackend;
use kernel_cma::{Allocation, CmaError, ContiguousRegion, RegionConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const BASE: u64 = 0x8_0000;
const UNITS: usize = 512;

fn shared_region() -> (Arc<RecordingBackend>, Arc<ContiguousRegion<RecordingBackend>>) {
    let backend = Arc::new(RecordingBackend::new());
    let region = Arc::new(ContiguousRegion::new(
        Arc::clone(&backend),
        BASE,
        UNITS,
        RegionConfig::default(),
    ));
    (backend, region)
}

#[test]
fn racing_allocations_never_overlap() {
    let threads = 8;
    let (backend, region) = shared_region();
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let region = Arc::clone(&region);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let span = 1 + t % 4;
                let mut mine = Vec::new();
                start.wait();
                loop {
                    match region.allocate(span, 0) {
                        Ok(a) => mine.push(a.into_raw()),
                        Err(CmaError::OutOfSpace) => break,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
                mine
            })
        })
        .collect();

    let mut all: Vec<(u64, usize)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();

    let total: usize = all.iter().map(|&(_, span)| span).sum();
    assert!(total <= UNITS);
    for pair in all.windows(2) {
        let (a, a_span) = pair[0];
        let (b, _) = pair[1];
        assert!(a + a_span as u64 <= b, "{a:#x}+{a_span} overlaps {b:#x}");
    }

    let bitmap = region.bitmap_snapshot();
    assert_eq!(bitmap.count_ones(), total);
    assert_eq!(region.free_units(), UNITS - total);
    assert_eq!(backend.withdrawn().len(), total);

    // Release everything concurrently as well.
    let chunks: Vec<Vec<(u64, usize)>> = all.chunks(all.len().div_ceil(threads)).map(<[_]>::to_vec).collect();
    let handles: Vec<_> = chunks
        .into_iter()
        .map(|chunk| {
            let region = Arc::clone(&region);
            thread::spawn(move || {
                for (unit, span) in chunk {
                    region.release(Allocation::from_raw(unit, span)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(region.free_units(), UNITS);
    assert!(backend.withdrawn().is_empty());
}

#[test]
fn churn_with_isolation_toggles_stays_consistent() {
    let workers = 6;
    let rounds = 400;
    let (backend, region) = shared_region();
    let done = Arc::new(AtomicBool::new(false));

    let toggler = {
        let region = Arc::clone(&region);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut isolated = false;
            while !done.load(Ordering::Acquire) {
                if isolated {
                    region.deisolate().unwrap();
                } else {
                    region.isolate().unwrap();
                }
                isolated = !isolated;
                thread::yield_now();
            }
            if isolated {
                region.deisolate().unwrap();
            }
        })
    };

    let handles: Vec<_> = (0..workers)
        .map(|t| {
            let region = Arc::clone(&region);
            thread::spawn(move || {
                let mut held: Vec<Allocation> = Vec::new();
                for i in 0..rounds {
                    let span = 1 + (t + i) % 7;
                    match region.allocate(span, (i % 3) as u32) {
                        Ok(a) => held.push(a),
                        Err(CmaError::OutOfSpace) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                    if i % 3 == 2 {
                        if let Some(a) = held.pop() {
                            region.release(a).unwrap();
                        }
                    }
                }
                for a in held {
                    region.release(a).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    done.store(true, Ordering::Release);
    toggler.join().unwrap();

    assert_eq!(region.free_units(), UNITS);
    assert_eq!(region.bitmap_snapshot().count_ones(), 0);
    assert!(!region.is_isolated());
    assert!(backend.withdrawn().is_empty());
}
