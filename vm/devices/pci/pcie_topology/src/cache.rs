// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-domain cache of the functions found by a full bus scan.
//!
//! A domain is scanned once, on the first topology query that needs it, and
//! its entries are then reused until the domain is flushed. Entries of a
//! domain are always invalidated together.

use crate::MAX_BUSES;
use crate::MAX_DEVICES;
use crate::MAX_FUNCTIONS;
use crate::PciAddress;
use crate::io::PciConfigIo;
use pci_core::spec::cfg_space;
use pci_core::spec::cfg_space::CommonHeader;
use pci_core::spec::cfg_space::HeaderType;
use pci_core::spec::cfg_space::HeaderType00;
use pci_core::spec::hwid::ClassCode;
use pci_core::spec::hwid::HardwareIds;
use pci_core::spec::hwid::ProgrammingInterface;
use pci_core::spec::hwid::Subclass;
use pci_core::spec::hwid::is_valid_vendor_id;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::TryReserveError;
use thiserror::Error;

/// Errors building or walking a domain's topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// No root port was found above the bus.
    #[error("no root port above bus {bus:#04x} of domain {domain:#x}")]
    NotFound {
        /// Domain of the walk.
        domain: u32,
        /// Bus the walk started from.
        bus: u8,
    },
    /// The scan could not allocate memory for its entries.
    #[error("out of memory caching topology of domain {domain:#x}")]
    ResourceExhausted {
        /// Domain being scanned.
        domain: u32,
        /// The failed reservation.
        #[source]
        source: TryReserveError,
    },
    /// The hierarchy is inconsistent, e.g. the bridges form a cycle.
    #[error("invalid pci topology at {address}: {reason}")]
    InvalidTopology {
        /// The function where the inconsistency was detected.
        address: PciAddress,
        /// What is wrong.
        reason: &'static str,
    },
}

/// How a function forwards to buses below it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotKind {
    /// Host bridge, PCI-to-PCI bridge, or 3D controller. The secondary bus
    /// number is read from offset 0x19 for all of them.
    Bridge {
        /// Bus number on the downstream side.
        secondary_bus: u8,
    },
    /// Anything else.
    Endpoint,
}

/// One function discovered by a bus scan.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusSlotEntry {
    /// Location of the function.
    pub address: PciAddress,
    /// Identity registers.
    pub ids: HardwareIds,
    /// Bridge or endpoint.
    pub kind: SlotKind,
    /// Whether function 0 of the device advertised multiple functions.
    pub multi_function: bool,
}

impl BusSlotEntry {
    /// Returns the secondary bus of a bridge-like slot.
    pub fn secondary_bus(&self) -> Option<u8> {
        match self.kind {
            SlotKind::Bridge { secondary_bus } => Some(secondary_bus),
            SlotKind::Endpoint => None,
        }
    }

    /// Returns the class and subclass as the 16-bit word at offset 0x0A.
    pub fn class_word(&self) -> u16 {
        u16::from_le_bytes([self.ids.sub_class.0, self.ids.base_class.0])
    }
}

/// Returns true for the classes whose secondary bus number the topology
/// walks follow.
fn is_bridge_like(class: ClassCode, subclass: Subclass) -> bool {
    matches!(
        (class, subclass),
        (ClassCode::BRIDGE, Subclass::BRIDGE_PCI_TO_PCI)
            | (ClassCode::BRIDGE, Subclass::BRIDGE_HOST)
            | (ClassCode::DISPLAY_CONTROLLER, Subclass::DISPLAY_CONTROLLER_3D)
    )
}

/// The scanned functions of one domain.
#[derive(Debug, Default)]
pub struct DomainTopology {
    // sorted by address, since the scan runs in address order
    entries: Vec<BusSlotEntry>,
    // secondary bus -> index of the first bridge above it forwarding to it
    upstream: HashMap<u8, usize>,
}

impl DomainTopology {
    fn push(&mut self, entry: BusSlotEntry) -> Result<(), TryReserveError> {
        self.entries.try_reserve(1)?;
        if let Some(secondary_bus) = entry.secondary_bus() {
            if entry.address.bus < secondary_bus && !self.upstream.contains_key(&secondary_bus) {
                self.upstream.try_reserve(1)?;
                self.upstream.insert(secondary_bus, self.entries.len());
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    /// All entries, in address order.
    pub fn entries(&self) -> &[BusSlotEntry] {
        &self.entries
    }

    /// Returns the entry at `address`.
    pub fn entry(&self, address: PciAddress) -> Option<&BusSlotEntry> {
        self.entries
            .binary_search_by_key(&address, |entry| entry.address)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Returns the bridge-like entry forwarding to `child_bus` from a lower
    /// bus number.
    pub fn upstream_bridge(&self, child_bus: u8) -> Option<&BusSlotEntry> {
        self.upstream.get(&child_bus).map(|&i| &self.entries[i])
    }
}

/// Scan state of a domain.
#[derive(Debug)]
pub enum DomainState {
    /// Not scanned, or flushed.
    Empty,
    /// Scanned.
    Populated(DomainTopology),
}

/// Cache of scanned domains.
#[derive(Debug, Default)]
pub struct BusTopologyCache {
    domains: BTreeMap<u32, DomainState>,
}

impl BusTopologyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans buses `0..bus_limit` of `domain` unless it was already scanned,
    /// and returns the number of cached functions.
    ///
    /// On allocation failure nothing is cached for the domain.
    pub fn store_topology(
        &mut self,
        io: &dyn PciConfigIo,
        domain: u32,
        bus_limit: u16,
    ) -> Result<usize, TopologyError> {
        if let Some(DomainState::Populated(topology)) = self.domains.get(&domain) {
            return Ok(topology.entries.len());
        }

        let topology = match scan_domain(io, domain, bus_limit.min(MAX_BUSES)) {
            Ok(topology) => topology,
            Err(source) => {
                self.flush(domain);
                return Err(TopologyError::ResourceExhausted { domain, source });
            }
        };
        io.scan_completed();

        let count = topology.entries.len();
        tracing::debug!(domain, count, "pci bus scan complete");
        self.domains.insert(domain, DomainState::Populated(topology));
        Ok(count)
    }

    /// Invalidates the entries of `domain`.
    pub fn flush(&mut self, domain: u32) {
        if let Some(state) = self.domains.get_mut(&domain) {
            *state = DomainState::Empty;
        }
    }

    /// Invalidates every domain.
    pub fn flush_all(&mut self) {
        self.domains.clear();
    }

    /// Returns true if `domain` has been scanned.
    pub fn is_populated(&self, domain: u32) -> bool {
        matches!(self.domains.get(&domain), Some(DomainState::Populated(_)))
    }

    /// Returns the scanned topology of `domain`.
    pub fn domain(&self, domain: u32) -> Option<&DomainTopology> {
        match self.domains.get(&domain)? {
            DomainState::Populated(topology) => Some(topology),
            DomainState::Empty => None,
        }
    }

    /// Iterates the entries of `domain`. Empty if not scanned.
    pub fn entries(&self, domain: u32) -> impl Iterator<Item = &BusSlotEntry> {
        self.domain(domain)
            .map(DomainTopology::entries)
            .unwrap_or_default()
            .iter()
    }

    /// Returns the cached entry at `address`.
    pub fn entry(&self, address: PciAddress) -> Option<&BusSlotEntry> {
        self.domain(address.domain)?.entry(address)
    }

    /// Returns the bridge forwarding to `child_bus` in `domain`, from the
    /// cache only.
    pub fn find_upstream_bridge(&self, domain: u32, child_bus: u8) -> Option<&BusSlotEntry> {
        self.domain(domain)?.upstream_bridge(child_bus)
    }
}

fn scan_domain(
    io: &dyn PciConfigIo,
    domain: u32,
    bus_limit: u16,
) -> Result<DomainTopology, TryReserveError> {
    let mut topology = DomainTopology::default();
    for bus in 0..bus_limit {
        let bus = bus as u8;
        for device in 0..MAX_DEVICES {
            let mut multi_function = false;
            for function in 0..MAX_FUNCTIONS {
                let address = PciAddress::new(domain, bus, device, function);
                if !io.is_present(address) {
                    if function == 0 {
                        break;
                    }
                    continue;
                }

                let Some(entry) = read_entry(io, address) else {
                    break;
                };
                if function == 0 {
                    multi_function = entry.multi_function;
                }
                topology.push(BusSlotEntry {
                    multi_function,
                    ..entry
                })?;

                if !multi_function {
                    break;
                }
            }
        }
    }
    Ok(topology)
}

/// Reads the identity of the function at `address`, or `None` if its vendor
/// ID is not valid.
fn read_entry(io: &dyn PciConfigIo, address: PciAddress) -> Option<BusSlotEntry> {
    let id = io.read_u32(address, CommonHeader::DEVICE_VENDOR.0);
    let vendor_id = id as u16;
    if !is_valid_vendor_id(vendor_id) {
        tracing::debug!(%address, vendor_id, "skipping device with invalid vendor id");
        return None;
    }

    let [revision_id, prog_if, sub_class, base_class] = io
        .read_u32(address, CommonHeader::CLASS_REVISION.0)
        .to_le_bytes();
    let header = HeaderType::from_bits(io.read_u8(address, cfg_space::HEADER_TYPE_BYTE));
    let (type0_sub_vendor_id, type0_sub_system_id) = if header.layout() == 0 {
        let subsystem = io.read_u32(address, HeaderType00::SUBSYSTEM_ID.0);
        (subsystem as u16, (subsystem >> 16) as u16)
    } else {
        (0, 0)
    };

    let base_class = ClassCode(base_class);
    let sub_class = Subclass(sub_class);
    let kind = if is_bridge_like(base_class, sub_class) {
        SlotKind::Bridge {
            secondary_bus: io.read_u8(address, cfg_space::SECONDARY_BUS_BYTE),
        }
    } else {
        SlotKind::Endpoint
    };

    Some(BusSlotEntry {
        address,
        ids: HardwareIds {
            vendor_id,
            device_id: (id >> 16) as u16,
            revision_id,
            prog_if: ProgrammingInterface(prog_if),
            sub_class,
            base_class,
            type0_sub_vendor_id,
            type0_sub_system_id,
        },
        kind,
        multi_function: header.multi_function(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::GPU;
    use crate::test_helpers::HOST_BRIDGE;
    use crate::test_helpers::NVIDIA;
    use crate::test_helpers::ROOT_PORT;
    use crate::test_helpers::SWITCH_PORT;
    use crate::test_helpers::TestFunction;
    use crate::test_helpers::TestPciBus;
    use crate::test_helpers::init_tracing;
    use crate::test_helpers::switch_topology;

    #[test]
    fn test_store_topology_idempotent() {
        init_tracing();
        let bus = switch_topology((0x10b5, 0x8747));
        let mut cache = BusTopologyCache::new();
        assert!(!cache.is_populated(0));

        assert_eq!(cache.store_topology(&bus, 0, 256).unwrap(), 4);
        assert!(cache.is_populated(0));
        assert_eq!(bus.scans(), 1);
        let reads = bus.reads();

        assert_eq!(cache.store_topology(&bus, 0, 256).unwrap(), 4);
        assert_eq!(bus.reads(), reads);
        assert_eq!(bus.scans(), 1);

        let addresses: Vec<_> = cache.entries(0).map(|e| e.address).collect();
        assert_eq!(addresses, [HOST_BRIDGE, ROOT_PORT, SWITCH_PORT, GPU]);
        assert_eq!(
            cache.entry(SWITCH_PORT).unwrap().kind,
            SlotKind::Bridge {
                secondary_bus: 0x40
            }
        );
        assert_eq!(cache.entry(GPU).unwrap().kind, SlotKind::Endpoint);
        assert_eq!(cache.entry(GPU).unwrap().ids.vendor_id, NVIDIA);
    }

    #[test]
    fn test_flush_rescans() {
        let bus = switch_topology((0x10b5, 0x8747));
        let mut cache = BusTopologyCache::new();
        cache.store_topology(&bus, 0, 256).unwrap();
        cache.flush(0);
        assert!(!cache.is_populated(0));
        assert_eq!(cache.entries(0).count(), 0);
        assert!(cache.entry(GPU).is_none());

        cache.store_topology(&bus, 0, 256).unwrap();
        assert_eq!(bus.scans(), 2);

        cache.flush_all();
        assert!(!cache.is_populated(0));
    }

    #[test]
    fn test_multi_function() {
        let a = PciAddress::new(0, 1, 3, 0);
        let bus = TestPciBus::new()
            .with_function(a, TestFunction::endpoint(NVIDIA, 0x1).multi_function())
            .with_function(
                PciAddress { function: 2, ..a },
                TestFunction::endpoint(NVIDIA, 0x2),
            )
            .with_function(
                PciAddress { function: 5, ..a },
                TestFunction::endpoint(NVIDIA, 0x5),
            )
            // not multi-function, so function 1 is never probed
            .with_function(PciAddress::new(0, 1, 4, 0), TestFunction::endpoint(NVIDIA, 0x6))
            .with_function(PciAddress::new(0, 1, 4, 1), TestFunction::endpoint(NVIDIA, 0x7))
            // function 0 missing, so the device is skipped
            .with_function(PciAddress::new(0, 1, 5, 1), TestFunction::endpoint(NVIDIA, 0x8));

        let mut cache = BusTopologyCache::new();
        assert_eq!(cache.store_topology(&bus, 0, 2).unwrap(), 4);
        let ids: Vec<_> = cache.entries(0).map(|e| e.ids.device_id).collect();
        assert_eq!(ids, [0x1, 0x2, 0x5, 0x6]);
        assert!(cache.entries(0).take(3).all(|e| e.multi_function));
        assert!(!cache.entry(PciAddress::new(0, 1, 4, 0)).unwrap().multi_function);
    }

    #[test]
    fn test_invalid_vendor_skips_device() {
        let a = PciAddress::new(0, 0, 2, 0);
        let bus = TestPciBus::new()
            .with_function(a, TestFunction::endpoint(NVIDIA, 0x1).multi_function())
            .with_function(PciAddress { function: 1, ..a }, TestFunction::endpoint(0, 0x2))
            .with_function(
                PciAddress { function: 2, ..a },
                TestFunction::endpoint(NVIDIA, 0x3),
            )
            .with_function(PciAddress::new(0, 0, 3, 0), TestFunction::endpoint(0xffff, 0x4))
            .with_function(PciAddress::new(0, 0, 4, 0), TestFunction::endpoint(NVIDIA, 0x5));

        let mut cache = BusTopologyCache::new();
        cache.store_topology(&bus, 0, 1).unwrap();
        let ids: Vec<_> = cache.entries(0).map(|e| e.ids.device_id).collect();
        assert_eq!(ids, [0x1, 0x5]);
    }

    #[test]
    fn test_hidden_function_is_absent() {
        let bus = switch_topology((0x10b5, 0x8747)).with_hidden(SWITCH_PORT);
        let mut cache = BusTopologyCache::new();
        assert_eq!(cache.store_topology(&bus, 0, 256).unwrap(), 3);
        assert!(cache.entry(SWITCH_PORT).is_none());
        assert!(cache.find_upstream_bridge(0, 0x40).is_none());
    }

    #[test]
    fn test_bridge_classification() {
        let gpu_3d = PciAddress::new(0, 0, 5, 0);
        let mut function = TestFunction::new(
            NVIDIA,
            0x20b0,
            ClassCode::DISPLAY_CONTROLLER,
            Subclass::DISPLAY_CONTROLLER_3D,
        );
        function.write_u8(cfg_space::SECONDARY_BUS_BYTE, 0x7);
        let bus = switch_topology((0x10b5, 0x8747)).with_function(gpu_3d, function);

        let mut cache = BusTopologyCache::new();
        cache.store_topology(&bus, 0, 256).unwrap();
        let entry = cache.entry(gpu_3d).unwrap();
        assert_eq!(entry.secondary_bus(), Some(0x7));
        assert_eq!(entry.class_word(), 0x0302);
        assert_eq!(entry.ids.type0_sub_vendor_id, 0);

        let host = cache.entry(HOST_BRIDGE).unwrap();
        assert_eq!(host.class_word(), 0x0600);
        assert_eq!(host.secondary_bus(), Some(0));

        let upstream = |bus| cache.find_upstream_bridge(0, bus).map(|e| e.address);
        assert_eq!(upstream(0x40), Some(SWITCH_PORT));
        assert_eq!(upstream(0x3f), Some(ROOT_PORT));
        assert_eq!(upstream(0x7), Some(gpu_3d));
        // bus 0 has no upstream bridge, even though the host bridge claims it
        assert_eq!(upstream(0), None);
    }

    #[test]
    fn test_subsystem_ids() {
        let a = PciAddress::new(0, 0, 1, 0);
        let mut function = TestFunction::endpoint(NVIDIA, 0x2204);
        function.write_u32(HeaderType00::SUBSYSTEM_ID.0, 0x1467_10de);
        let bus = TestPciBus::new().with_function(a, function);

        let mut cache = BusTopologyCache::new();
        cache.store_topology(&bus, 0, 1).unwrap();
        let ids = cache.entry(a).unwrap().ids;
        assert_eq!(ids.type0_sub_vendor_id, 0x10de);
        assert_eq!(ids.type0_sub_system_id, 0x1467);
    }
}
