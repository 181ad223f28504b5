//! # Region Registry
//!
//! Maps an owner key (typically a device handle or name) to the region
//! reserved for it. The registry is assembled once at startup through a
//! [`RegistryBuilder`] and is immutable afterwards; only the regions'
//! own allocation and isolation state changes at runtime. Share it as an
//! `Arc<RegionRegistry<..>>` with every consumer.

use crate::region::{ContiguousRegion, RegionConfig};
use crate::{CmaError, RangeBackend};
use core::borrow::Borrow;
use core::hash::Hash;
use kernel_info::memory::MAX_REGIONS;
use log::{error, info};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handle to a registered region.
pub type RegionHandle<B> = Arc<ContiguousRegion<B>>;

/// One entry of the static reservation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation<K> {
    pub owner: K,
    pub base_unit: u64,
    pub unit_count: usize,
    pub config: RegionConfig,
}

impl<K> Reservation<K> {
    #[must_use]
    pub fn new(owner: K, base_unit: u64, unit_count: usize) -> Self {
        Self {
            owner,
            base_unit,
            unit_count,
            config: RegionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RegionConfig) -> Self {
        self.config = config;
        self
    }
}

/// Mutable startup phase of the registry.
pub struct RegistryBuilder<K, B: RangeBackend> {
    backend: Arc<B>,
    limit: usize,
    regions: HashMap<K, RegionHandle<B>>,
}

impl<K: Eq + Hash, B: RangeBackend> RegistryBuilder<K, B> {
    /// A builder accepting up to [`MAX_REGIONS`] regions.
    #[must_use]
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            limit: MAX_REGIONS,
            regions: HashMap::new(),
        }
    }

    /// Override the region bound.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Number of regions registered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Register a region with the default [`RegionConfig`].
    ///
    /// # Errors
    /// See [`register_with`](Self::register_with).
    pub fn register(
        &mut self,
        owner: K,
        base_unit: u64,
        unit_count: usize,
    ) -> Result<RegionHandle<B>, CmaError> {
        self.register_with(owner, base_unit, unit_count, RegionConfig::default())
    }

    /// Reserve `[base_unit, base_unit + unit_count)` with the backend and
    /// create a region for `owner`.
    ///
    /// # Errors
    /// - [`CmaError::TooManyRegions`] once the bound is reached.
    /// - [`CmaError::InvalidRange`] for an empty or overflowing range.
    /// - [`CmaError::DuplicateOwner`] if `owner` already has a region.
    /// - [`CmaError::Overlap`] if the range intersects a registered region.
    /// - Backend errors from `reserve_range`.
    pub fn register_with(
        &mut self,
        owner: K,
        base_unit: u64,
        unit_count: usize,
        config: RegionConfig,
    ) -> Result<RegionHandle<B>, CmaError> {
        if self.regions.len() >= self.limit {
            error!("not enough slots for reserved regions (limit {})", self.limit);
            return Err(CmaError::TooManyRegions { limit: self.limit });
        }

        let invalid = CmaError::InvalidRange {
            unit: base_unit,
            span: unit_count,
        };
        if unit_count == 0 {
            return Err(invalid);
        }
        let Some(end) = base_unit.checked_add(unit_count as u64) else {
            return Err(invalid);
        };

        if self.regions.contains_key(&owner) {
            return Err(CmaError::DuplicateOwner);
        }
        let overlaps = self.regions.values().any(|r| {
            let r_end = r.base_unit() + r.unit_count() as u64;
            base_unit < r_end && r.base_unit() < end
        });
        if overlaps {
            error!("reservation {base_unit:#x}+{unit_count} overlaps a registered region");
            return Err(CmaError::Overlap);
        }

        if let Err(e) = self.backend.reserve_range(base_unit, unit_count) {
            error!("failed to reserve {unit_count} unit(s) at {base_unit:#x}: {e}");
            return Err(e.into());
        }

        let region = Arc::new(ContiguousRegion::new(
            Arc::clone(&self.backend),
            base_unit,
            unit_count,
            config,
        ));
        info!("reserved {unit_count} unit(s) at {base_unit:#x}");
        self.regions.insert(owner, Arc::clone(&region));
        Ok(region)
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> RegionRegistry<K, B> {
        RegionRegistry {
            regions: self.regions,
        }
    }
}

/// Immutable owner → region map.
pub struct RegionRegistry<K, B: RangeBackend> {
    regions: HashMap<K, RegionHandle<B>>,
}

impl<K: Eq + Hash, B: RangeBackend> RegionRegistry<K, B> {
    /// Build a registry from a static reservation table.
    ///
    /// # Errors
    /// The first registration error aborts the build.
    pub fn from_reservations(
        backend: Arc<B>,
        reservations: impl IntoIterator<Item = Reservation<K>>,
    ) -> Result<Self, CmaError> {
        let mut builder = RegistryBuilder::new(backend);
        for r in reservations {
            builder.register_with(r.owner, r.base_unit, r.unit_count, r.config)?;
        }
        Ok(builder.build())
    }

    /// Shared handle to the region of `owner`.
    #[must_use]
    pub fn lookup<Q>(&self, owner: &Q) -> Option<RegionHandle<B>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.regions.get(owner).cloned()
    }

    /// Borrowed access to the region of `owner`.
    #[must_use]
    pub fn get<Q>(&self, owner: &Q) -> Option<&ContiguousRegion<B>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.regions.get(owner).map(Arc::as_ref)
    }

    /// The region whose arena contains absolute unit `unit`.
    #[must_use]
    pub fn find_by_unit(&self, unit: u64) -> Option<RegionHandle<B>> {
        self.regions
            .values()
            .find(|r| r.contains(unit, 1))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &ContiguousRegion<B>)> {
        self.regions.iter().map(|(k, r)| (k, r.as_ref()))
    }
}
