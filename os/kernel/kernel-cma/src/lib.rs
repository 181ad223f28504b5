//! # Contiguous Memory Allocation
//!
//! This crate manages reserved arenas of physically contiguous units (pages)
//! and hands out contiguous runs of them to devices that cannot scatter-gather.
//! While an arena is not needed it can be lent to the general-purpose page
//! allocator; runs are withdrawn from it on demand.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Region Registry                     │
//! │    • owner key → region, built once at startup      │
//! │    • bounded by MAX_REGIONS                         │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Contiguous Region                      │
//! │    • allocate / free / query                        │
//! │    • isolate / deisolate                            │
//! │    • one lock per arena, busy runs are skipped      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                Unit Bitmap                          │
//! │    • one bit per unit, 1 = allocated                │
//! │    • aligned free-run search                        │
//! └─────────────────────────────────────────────────────┘
//!                   ┆ withdraw / restore
//! ┌─────────────────▼───────────────────────────────────┐
//! │        RangeBackend (general allocator)             │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Unit Bitmap ([`bitmap`])
//! A fixed-length bit vector with word-wise run operations. It has no locking
//! of its own.
//!
//! ### Contiguous Region ([`region`])
//! Owns a bitmap plus the arena geometry and free count. Every bitmap change,
//! isolation transition and backend call happens under the region's lock, so
//! operations on one arena are strictly serialized while different arenas
//! never contend.
//!
//! ### Region Registry ([`registry`])
//! Resolves owner keys to regions. Regions live as long as the registry.
//!
//! ## Usage Patterns
//!
//! ```rust
//! use std::sync::Arc;
//! use kernel_cma::{CarveoutBackend, CmaError, RegistryBuilder};
//!
//! let mut builder = RegistryBuilder::new(Arc::new(CarveoutBackend));
//! builder.register("video", 0x8_0000, 1024)?;
//! let registry = builder.build();
//!
//! let region = registry.lookup("video").expect("registered above");
//! let buffer = region.allocate(16, 4)?;
//! assert_eq!(buffer.unit() % 16, 0);
//! region.release(buffer)?;
//! assert_eq!(region.free_units(), 1024);
//! # Ok::<(), CmaError>(())
//! ```
//!
//! ## Error Handling
//!
//! All failures are returned as [`CmaError`]. The only condition recovered
//! internally is a busy range during allocation, which is skipped. Callers are
//! expected to degrade gracefully on [`CmaError::OutOfSpace`] and to treat
//! [`CmaError::InvalidRange`] and [`CmaError::DoubleFree`] as bugs.

mod backend;
pub mod bitmap;
mod error;
pub mod region;
pub mod registry;

pub use backend::{CarveoutBackend, RangeBackend};
pub use bitmap::UnitBitmap;
pub use error::{BackendError, CmaError};
pub use region::{Allocation, BusyStride, ContiguousRegion, RegionConfig, RegionInfo, SearchOffset};
pub use registry::{RegionHandle, RegionRegistry, RegistryBuilder, Reservation};
