// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Capability maps of individual functions, for diagnostics.

use crate::PciAddress;
use crate::ecam::ExtendedConfigSpace;
use crate::io::PciConfigIo;
use crate::port;
use parking_lot::Mutex;
use pci_core::spec::caps::CapabilityId;
use pci_core::spec::ext_caps::ExtendedCapabilityId;
use std::sync::Arc;

/// The standard and extended capabilities of one function, in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityMap {
    /// The function the map describes.
    pub address: PciAddress,
    /// `(id, offset)` of each standard capability.
    pub standard: Vec<(CapabilityId, u16)>,
    /// `(id, offset)` of each extended capability. Empty when extended
    /// configuration space is inaccessible.
    pub extended: Vec<(ExtendedCapabilityId, u16)>,
}

impl CapabilityMap {
    /// Walks both capability lists of the function at `address`.
    pub fn build(
        io: &dyn PciConfigIo,
        extended: Option<&ExtendedConfigSpace<'_>>,
        address: PciAddress,
    ) -> Self {
        let map = Self {
            address,
            standard: port::capabilities(io, address).collect(),
            extended: extended
                .map(|extended| port::extended_capabilities(extended, address).collect())
                .unwrap_or_default(),
        };
        tracing::debug!(
            %address,
            standard = map.standard.len(),
            extended = map.extended.len(),
            "built capability map"
        );
        map
    }

    /// Returns the offset of the first standard capability `id`.
    pub fn find(&self, id: CapabilityId) -> Option<u16> {
        self.standard
            .iter()
            .find(|(cap, _)| *cap == id)
            .map(|&(_, offset)| offset)
    }

    /// Returns the offset of the first extended capability `id`.
    pub fn find_extended(&self, id: ExtendedCapabilityId) -> Option<u16> {
        self.extended
            .iter()
            .find(|(cap, _)| *cap == id)
            .map(|&(_, offset)| offset)
    }
}

/// A capability map built at most once and shared by every caller.
#[derive(Debug, Default)]
pub struct SharedCapabilityMap {
    map: Mutex<Option<Arc<CapabilityMap>>>,
}

impl SharedCapabilityMap {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the map, building it with `build` on first use.
    ///
    /// Callers racing the first build wait for it and get its result.
    pub fn get_or_init(&self, build: impl FnOnce() -> CapabilityMap) -> Arc<CapabilityMap> {
        let mut map = self.map.lock();
        map.get_or_insert_with(|| Arc::new(build())).clone()
    }

    /// Returns the map of `address`, walking its capabilities on first use.
    pub fn get_or_build(
        &self,
        io: &dyn PciConfigIo,
        extended: Option<&ExtendedConfigSpace<'_>>,
        address: PciAddress,
    ) -> Arc<CapabilityMap> {
        self.get_or_init(|| CapabilityMap::build(io, extended, address))
    }

    /// Returns the map if it has been built.
    pub fn get(&self) -> Option<Arc<CapabilityMap>> {
        self.map.lock().clone()
    }

    /// Drops the map so the next caller rebuilds it.
    pub fn reset(&self) {
        *self.map.lock() = None;
    }
}
