//! # Pooled Unit Allocation
//!
//! Sits in front of a general-purpose unit allocator and keeps memory that
//! was just given up close at hand:
//!
//! ```text
//!   release ──► PagePool ◄── acquire        (cache path)
//!                  │ shrink
//!   enqueue ──► DeferredFreeList ──► sink   (deferred path)
//!                  ▲        ▲
//!                  │        └── worker thread
//!                  └── Reclaimer::reclaim   (memory pressure)
//! ```
//!
//! ## Core Components
//!
//! ### Page Pool ([`pool`])
//! Buckets of ready-for-reuse units per order and [`Tier`]. Each order has
//! its own lock; a miss allocates fresh from the [`UnitSource`].
//!
//! ### Deferred Free List ([`deferred`])
//! A FIFO of buffers whose destruction was postponed. Drained synchronously
//! or by a background worker that is woken on enqueue.
//!
//! ### Reclaimer ([`reclaim`])
//! Drains the deferred list and then shrinks the pool until a requested
//! number of bytes has been freed.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_pool::{PagePool, PoolConfig, PoolError, Tier, UnitSource};
//!
//! struct Frames;
//!
//! impl UnitSource for Frames {
//!     type Unit = u64;
//!
//!     fn allocate_fresh_unit(&self, order: u32, _allow_wait: bool) -> Result<u64, PoolError> {
//!         Ok(u64::from(order) << 32)
//!     }
//!
//!     fn return_unit_to_system(&self, _unit: u64, _order: u32) {}
//! }
//!
//! let pool = PagePool::new(Frames, PoolConfig::default())?;
//! let first = pool.acquire(4, Tier::High, true)?;
//! assert!(!first.from_pool);
//!
//! pool.release(first.unit, 4, Tier::High);
//! let second = pool.acquire(4, Tier::High, true)?;
//! assert!(second.from_pool);
//! # Ok::<(), PoolError>(())
//! ```

#![deny(unsafe_code)]

pub mod deferred;
mod error;
pub mod pool;
pub mod reclaim;

pub use deferred::{BufferSink, DeferredFreeList, DrainOrigin, WorkerHandle};
pub use error::PoolError;
pub use pool::{Acquired, PagePool, PoolConfig, ShrinkScope, Tier, UnitSource};
pub use reclaim::Reclaimer;
