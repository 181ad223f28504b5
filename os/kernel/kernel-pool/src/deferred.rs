//! # Deferred Free List
//!
//! Buffers are queued here instead of being destroyed on the caller's path.
//! The queue is drained oldest first, either synchronously through
//! [`DeferredFreeList::drain`] or by a background worker started with
//! [`DeferredFreeList::spawn_worker`]. Both paths pop from the same queue.
//!
//! ## Drain boundary
//!
//! Entries are never split. A drain stops as soon as the freed total reaches
//! the target, so it may overshoot by at most one entry:
//!
//! ```text
//!   queue: [100, 200, 50]   drain(250)
//!            ^^^  ^^^        freed 300, [50] stays queued
//! ```

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Why a buffer is being destroyed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DrainOrigin {
    /// The background worker.
    Worker,
    /// [`DeferredFreeList::drain`] or [`DeferredFreeList::drain_all`].
    Explicit,
    /// Memory pressure. The sink should bypass any caching of its own.
    Reclaim,
}

/// Final destination of a queued buffer.
pub trait BufferSink: Send + Sync {
    type Buffer: Send;

    fn destroy(&self, buffer: Self::Buffer, size: usize, origin: DrainOrigin);
}

struct Queue<T> {
    entries: VecDeque<(T, usize)>,
    total_bytes: usize,
}

impl<T> Queue<T> {
    fn pop(&mut self) -> Option<(T, usize)> {
        let (buffer, size) = self.entries.pop_front()?;
        self.total_bytes -= size;
        Some((buffer, size))
    }
}

/// FIFO of buffers awaiting destruction.
pub struct DeferredFreeList<S: BufferSink> {
    sink: S,
    queue: Mutex<Queue<S::Buffer>>,
    queued: Condvar,
}

impl<S: BufferSink> DeferredFreeList<S> {
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            queue: Mutex::new(Queue {
                entries: VecDeque::new(),
                total_bytes: 0,
            }),
            queued: Condvar::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Queue `buffer` for destruction and wake the worker, if any.
    pub fn enqueue(&self, buffer: S::Buffer, size: usize) {
        let mut queue = self.queue.lock();
        queue.entries.push_back((buffer, size));
        queue.total_bytes += size;
        drop(queue);
        self.queued.notify_one();
    }

    /// Queued bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.queue.lock().total_bytes
    }

    /// Queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().entries.is_empty()
    }

    /// Destroy queued buffers, oldest first, until at least `target_bytes`
    /// were freed or the queue is empty. Returns the bytes freed.
    pub fn drain(&self, target_bytes: usize) -> usize {
        self.drain_as(target_bytes, DrainOrigin::Explicit)
    }

    /// Destroy every queued buffer. Returns the bytes freed.
    pub fn drain_all(&self) -> usize {
        self.drain_as(usize::MAX, DrainOrigin::Explicit)
    }

    pub(crate) fn drain_as(&self, target_bytes: usize, origin: DrainOrigin) -> usize {
        let mut freed = 0usize;
        while freed < target_bytes {
            // Popped under the lock, destroyed outside of it.
            let Some((buffer, size)) = self.queue.lock().pop() else {
                break;
            };
            self.sink.destroy(buffer, size, origin);
            freed = freed.saturating_add(size);
        }
        debug!("deferred free: drained {freed} byte(s) for {target_bytes} ({origin:?})");
        freed
    }

    /// Pop the oldest entry, sleeping while the queue is empty.
    ///
    /// Returns `None` once `stop` is set, even if entries remain.
    fn next_for_worker(&self, stop: &AtomicBool) -> Option<(S::Buffer, usize)> {
        let mut queue = self.queue.lock();
        loop {
            if stop.load(Ordering::Acquire) {
                return None;
            }
            if let Some(entry) = queue.pop() {
                return Some(entry);
            }
            self.queued.wait(&mut queue);
        }
    }
}

impl<S: BufferSink + 'static> DeferredFreeList<S> {
    /// Start a background thread that destroys buffers as they are queued.
    ///
    /// The worker runs until the returned handle is stopped or dropped.
    /// Entries still queued at that point stay queued.
    ///
    /// # Errors
    /// Fails if the thread cannot be spawned.
    pub fn spawn_worker(self: &Arc<Self>) -> std::io::Result<WorkerHandle<S>> {
        let list = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("deferred-free".into())
            .spawn(move || {
                debug!("deferred free: worker started");
                while let Some((buffer, size)) = list.next_for_worker(&worker_stop) {
                    list.sink.destroy(buffer, size, DrainOrigin::Worker);
                }
                debug!("deferred free: worker stopped");
            })?;

        info!("deferred free: spawned worker");
        Ok(WorkerHandle {
            list: Arc::clone(self),
            stop,
            thread: Some(thread),
        })
    }
}

impl<S: BufferSink> core::fmt::Debug for DeferredFreeList<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("DeferredFreeList")
            .field("len", &queue.entries.len())
            .field("total_bytes", &queue.total_bytes)
            .finish_non_exhaustive()
    }
}

/// Owner of a background drain thread. Dropping it stops and joins the thread.
#[must_use = "dropping the handle stops the worker"]
pub struct WorkerHandle<S: BufferSink> {
    list: Arc<DeferredFreeList<S>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<S: BufferSink> WorkerHandle<S> {
    /// Stop the worker and wait for it to finish its current buffer.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        {
            // Taking the lock orders the store before the worker's next check.
            let _queue = self.list.queue.lock();
            self.list.queued.notify_all();
        }
        if thread.join().is_err() {
            error!("deferred free: worker panicked");
        }
    }
}

impl<S: BufferSink> Drop for WorkerHandle<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
