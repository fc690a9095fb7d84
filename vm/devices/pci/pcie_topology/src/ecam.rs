// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Registry of enhanced configuration access mechanism (ECAM) windows, and
//! extended configuration space reads through them.

use crate::PciAddress;
use crate::config::DiscoveryConfig;
use crate::firmware;
use crate::firmware::FirmwareTableError;
use crate::io::FirmwareServices;
use crate::io::PciConfigIo;
use crate::io::PhysicalMemory;
use acpi_spec::mcfg::MCFG_SIGNATURE;
use pci_core::spec::cfg_space::EXTENDED_CONFIG_SPACE_SIZE;
use std::collections::BTreeMap;
use std::collections::TryReserveError;
use thiserror::Error;

const ECAM_BUS_SHIFT: u32 = 20;
const ECAM_DEVICE_SHIFT: u32 = 15;
const ECAM_FUNCTION_SHIFT: u32 = 12;

/// Errors updating the registry.
#[derive(Debug, Error)]
pub enum EcamError {
    /// Growing the registry failed.
    #[error("out of memory recording configuration space base")]
    ResourceExhausted(#[from] TryReserveError),
    /// The MCFG table could not be found or is corrupt.
    #[error("mcfg table unavailable")]
    Table(#[from] FirmwareTableError),
}

/// A memory mapped configuration space window for a range of buses in one
/// domain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConfigSpaceBase {
    /// Physical address of bus 0 of the window.
    pub base_address: u64,
    /// PCI segment group.
    pub domain: u32,
    /// First decoded bus.
    pub start_bus: u8,
    /// Last decoded bus, inclusive.
    pub end_bus: u8,
}

impl ConfigSpaceBase {
    /// Returns true if `bus` is decoded by this window.
    pub fn contains(&self, bus: u8) -> bool {
        (self.start_bus..=self.end_bus).contains(&bus)
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.domain == other.domain
            && self.start_bus <= other.end_bus
            && other.start_bus <= self.end_bus
    }
}

/// Returns the physical address of `offset` in the configuration space of
/// `address`, within the window at `base`.
pub fn ecam_address(base: u64, address: PciAddress, offset: u16) -> u64 {
    let offset = (u64::from(address.bus) << ECAM_BUS_SHIFT)
        | (u64::from(address.device) << ECAM_DEVICE_SHIFT)
        | (u64::from(address.function) << ECAM_FUNCTION_SHIFT)
        | u64::from(offset & (EXTENDED_CONFIG_SPACE_SIZE - 1));
    // The base need not be aligned to the size of the bus range.
    base.wrapping_add(offset)
}

/// The authoritative mapping of domain and bus to ECAM base address.
///
/// Within a domain, the most recently inserted window containing a bus wins.
#[derive(Debug, Default)]
pub struct EcamRegistry {
    // per domain, in insertion order
    domains: BTreeMap<u32, Vec<ConfigSpaceBase>>,
}

impl EcamRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a window that takes precedence over older ones.
    pub fn insert(&mut self, base: ConfigSpaceBase) -> Result<(), EcamError> {
        let records = self.domains.entry(base.domain).or_default();
        if let Err(err) = records.try_reserve(1) {
            if records.is_empty() {
                self.domains.remove(&base.domain);
            }
            return Err(err.into());
        }
        records.push(base);
        tracing::info!(
            domain = base.domain,
            start_bus = base.start_bus,
            end_bus = base.end_bus,
            "pcie config base address {:#x}",
            base.base_address
        );
        Ok(())
    }

    /// Returns the base address of the window decoding `bus` in `domain`.
    pub fn lookup(&self, domain: u32, bus: u8) -> Option<u64> {
        self.domains
            .get(&domain)?
            .iter()
            .rev()
            .find(|record| record.contains(bus))
            .map(|record| record.base_address)
    }

    /// Iterates all windows, by domain and then insertion order.
    pub fn records(&self) -> impl Iterator<Item = &ConfigSpaceBase> {
        self.domains.values().flatten()
    }

    /// Number of recorded windows.
    pub fn len(&self) -> usize {
        self.domains.values().map(Vec::len).sum()
    }

    /// Returns true if no window is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all windows.
    pub fn teardown(&mut self) {
        self.domains.clear();
    }

    /// Records `base`, replacing the window of the same domain it overlaps.
    ///
    /// Any other overlapping windows in the domain are dropped, so windows of
    /// one domain never overlap afterwards.
    fn update_or_insert(&mut self, base: ConfigSpaceBase) -> Result<(), EcamError> {
        let Some(records) = self.domains.get_mut(&base.domain) else {
            return self.insert(base);
        };
        let Some(newest) = records.iter().rposition(|record| record.overlaps(&base)) else {
            return self.insert(base);
        };

        if records[newest] != base {
            tracing::info!(
                domain = base.domain,
                old_start = records[newest].start_bus,
                old_end = records[newest].end_bus,
                start_bus = base.start_bus,
                end_bus = base.end_bus,
                "updating pcie config base address to {:#x}",
                base.base_address
            );
            records[newest] = base;
        }

        let mut index = 0;
        records.retain(|record| {
            let keep = index == newest || !record.overlaps(&base);
            index += 1;
            keep
        });
        Ok(())
    }

    /// Records the windows described by an MCFG table.
    ///
    /// Records with `start_bus >= end_bus` are repaired by extending them to
    /// bus 255, which some BIOSes rely on. Returns the number of allocation
    /// records processed.
    pub fn populate_from_mcfg(&mut self, table: &[u8]) -> Result<usize, EcamError> {
        let len = firmware::validate_table(table, MCFG_SIGNATURE)?;
        let Some(records) = acpi_spec::mcfg::records(&table[..len]) else {
            return Ok(0);
        };

        let mut count = 0;
        for record in records {
            let start_bus = record.start_bus;
            let mut end_bus = record.end_bus;
            if start_bus >= end_bus {
                tracing::warn!(
                    segment = record.segment.get(),
                    start_bus,
                    end_bus,
                    "repairing mcfg bus range"
                );
                end_bus = u8::MAX;
            }
            self.update_or_insert(ConfigSpaceBase {
                base_address: record.ecam_base.get(),
                domain: record.segment.get().into(),
                start_bus,
                end_bus,
            })?;
            count += 1;
        }
        Ok(count)
    }

    /// Locates the MCFG table through firmware and records its windows.
    pub fn populate_from_firmware(
        &mut self,
        services: &dyn FirmwareServices,
        config: &DiscoveryConfig,
    ) -> Result<usize, EcamError> {
        let table = firmware::load_mcfg(services, config)?;
        self.populate_from_mcfg(&table)
    }
}

/// Reads of the full 4 KiB configuration space of a function.
///
/// The platform's native path is used when it supports extended reads;
/// otherwise the ECAM window from the registry is read through physical
/// memory.
pub struct ExtendedConfigSpace<'a> {
    io: &'a dyn PciConfigIo,
    memory: &'a dyn PhysicalMemory,
    registry: &'a EcamRegistry,
}

impl<'a> ExtendedConfigSpace<'a> {
    /// Creates an accessor over the given platform interfaces.
    pub fn new(
        io: &'a dyn PciConfigIo,
        memory: &'a dyn PhysicalMemory,
        registry: &'a EcamRegistry,
    ) -> Self {
        Self {
            io,
            memory,
            registry,
        }
    }

    /// Reads the dword at `offset`, which must be dword aligned and below
    /// 0x1000. Returns `None` if the function is unreachable.
    pub fn read_u32(&self, address: PciAddress, offset: u16) -> Option<u32> {
        if offset >= EXTENDED_CONFIG_SPACE_SIZE || offset & 3 != 0 {
            return None;
        }
        if self.io.extended_access_supported(address) {
            return self.io.read_extended_u32(address, offset);
        }
        let base = self.registry.lookup(address.domain, address.bus)?;
        self.memory
            .read_u32(ecam_address(base, address, offset))
            .inspect_err(|err| {
                tracing::debug!(
                    %address,
                    offset,
                    error = err as &dyn std::error::Error,
                    "extended config read failed"
                );
            })
            .ok()
    }

    /// Reads the word at `offset`, which must be word aligned.
    pub fn read_u16(&self, address: PciAddress, offset: u16) -> Option<u16> {
        if offset & 1 != 0 {
            return None;
        }
        let dword = self.read_u32(address, offset & !3)?;
        Some((dword >> ((offset & 2) * 8)) as u16)
    }
}
