//! # Contiguous Memory Configuration
//!
//! This crate defines the geometry and resource-bound constants shared by the
//! contiguous region allocator (`kernel-cma`) and the page pool / deferred free
//! machinery (`kernel-pool`). It is the single source of truth for the size of
//! one allocation unit, the number of reserved regions the registry accepts and
//! the size classes the page pool caches.
//!
//! ## Overview
//!
//! Both allocator crates hand out memory in fixed-size **units** (pages). A
//! reserved arena is described purely in unit numbers; byte values only appear
//! at the introspection surface:
//!
//! ```text
//! unit number:  base_unit                              base_unit + unit_count
//!                  │                                            │
//!                  ▼                                            ▼
//!                  ┌────┬────┬────┬────┬────┬────┬────┬────┬───┐
//!   arena          │ u0 │ u1 │ u2 │ u3 │ u4 │ u5 │ u6 │ u7 │ … │
//!                  └────┴────┴────┴────┴────┴────┴────┴────┴───┘
//!   bytes:   base_unit << UNIT_SHIFT      (base_unit + unit_count) << UNIT_SHIFT
//! ```
//!
//! ## Configuration Management
//!
//! All values are `const` and validated at compile time. Runtime configuration
//! (per-region search offsets, retry policy) lives in the allocator crates and
//! falls back to the defaults defined here.
//!
//! ```rust
//! use kernel_info::memory::{UNIT_SHIFT, UNIT_SIZE, units_to_bytes};
//!
//! assert_eq!(UNIT_SIZE, 1 << UNIT_SHIFT);
//! assert_eq!(units_to_bytes(4, UNIT_SHIFT), 4 * UNIT_SIZE as u64);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
