// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Locating the bridges above a device: its immediate upstream bridge, the
//! root port of its hierarchy, and the ports of recognized board-level switch
//! silicon.

use crate::MAX_BUSES;
use crate::cache::BusSlotEntry;
use crate::cache::BusTopologyCache;
use crate::cache::TopologyError;
use crate::ecam::ExtendedConfigSpace;
use crate::io::PciConfigIo;
use crate::port::PortDescriptor;
use pci_core::spec::caps::pci_express::DevicePortType;
use std::ops::ControlFlow;

const NVIDIA_VENDOR_ID: u16 = 0x10de;
const NVIDIA_BR03_DEVICE_ID: u16 = 0x01b3;
const NVIDIA_BR04_DEVICE_IDS: std::ops::RangeInclusive<u16> = 0x05b0..=0x05bf;
const PLX_VENDOR_ID: u16 = 0x10b5;
const PLX_DEVICE_FAMILY_MASK: u16 = 0xff00;
const PLX_DEVICE_FAMILIES: [u16; 2] = [0x8700, 0x9700];

/// Returns true if `vendor_id:device_id` is switch silicon found on GPU
/// boards.
pub fn is_recognized_switch(vendor_id: u16, device_id: u16) -> bool {
    match vendor_id {
        NVIDIA_VENDOR_ID => {
            device_id == NVIDIA_BR03_DEVICE_ID || NVIDIA_BR04_DEVICE_IDS.contains(&device_id)
        }
        PLX_VENDOR_ID => PLX_DEVICE_FAMILIES.contains(&(device_id & PLX_DEVICE_FAMILY_MASK)),
        _ => false,
    }
}

/// A bridge visited by an upward walk.
#[derive(Debug, Copy, Clone)]
pub struct Hop {
    /// The cached scan entry of the bridge.
    pub bridge: BusSlotEntry,
    /// The bridge as a port, with conventional capabilities only.
    pub port: PortDescriptor,
}

/// Walks upward from `start_bus`, calling `visit` on each bridge returned by
/// `parent`, until `visit` breaks or no parent exists.
///
/// The walk is bounded by the number of buses in a domain, and fails if a bus
/// is reached twice.
fn walk_chain<T>(
    start_bus: u8,
    mut parent: impl FnMut(u8) -> Option<BusSlotEntry>,
    mut visit: impl FnMut(&BusSlotEntry) -> ControlFlow<T>,
) -> Result<Option<T>, TopologyError> {
    let mut visited = [false; MAX_BUSES as usize];
    let mut bus = start_bus;
    for _ in 0..MAX_BUSES {
        visited[bus as usize] = true;
        let Some(bridge) = parent(bus) else {
            return Ok(None);
        };
        if let ControlFlow::Break(value) = visit(&bridge) {
            return Ok(Some(value));
        }
        bus = bridge.address.bus;
        if visited[bus as usize] {
            return Err(TopologyError::InvalidTopology {
                address: bridge.address,
                reason: "bridge hierarchy forms a cycle",
            });
        }
    }
    Ok(None)
}

/// Bridge lookups over one platform, backed by the topology cache.
pub struct Locator<'a> {
    io: &'a dyn PciConfigIo,
    cache: &'a mut BusTopologyCache,
    extended: Option<ExtendedConfigSpace<'a>>,
    bus_limit: u16,
}

impl<'a> Locator<'a> {
    /// Creates a locator scanning `bus_limit` buses per domain.
    ///
    /// Extended capabilities of located ports are only discovered when
    /// `extended` is given.
    pub fn new(
        io: &'a dyn PciConfigIo,
        cache: &'a mut BusTopologyCache,
        extended: Option<ExtendedConfigSpace<'a>>,
        bus_limit: u16,
    ) -> Self {
        Self {
            io,
            cache,
            extended,
            bus_limit,
        }
    }

    /// The conventional configuration space accessor.
    pub fn io(&self) -> &'a dyn PciConfigIo {
        self.io
    }

    /// The extended configuration space accessor, if extended config space
    /// is accessible.
    pub fn extended(&self) -> Option<&ExtendedConfigSpace<'a>> {
        self.extended.as_ref()
    }

    /// Returns the bridge-like function forwarding to `child_bus` from a lower
    /// bus, scanning `domain` first if needed.
    pub fn find_upstream_bridge(
        &mut self,
        domain: u32,
        child_bus: u8,
    ) -> Result<Option<BusSlotEntry>, TopologyError> {
        self.cache.store_topology(self.io, domain, self.bus_limit)?;
        Ok(self.cache.find_upstream_bridge(domain, child_bus).copied())
    }

    /// Builds the full descriptor of a cached bridge.
    pub fn describe(&self, entry: &BusSlotEntry) -> PortDescriptor {
        PortDescriptor::discover(self.io, entry.address, &entry.ids, self.extended.as_ref())
    }

    /// Returns the port immediately above `bus`.
    pub fn find_upstream_port(
        &mut self,
        domain: u32,
        bus: u8,
    ) -> Result<Option<PortDescriptor>, TopologyError> {
        Ok(self
            .find_upstream_bridge(domain, bus)?
            .map(|bridge| self.describe(&bridge)))
    }

    /// Walks the bridges above `start_bus` towards the root, calling `visit`
    /// on each until it breaks.
    ///
    /// Returns `None` if the chain ended without `visit` breaking.
    pub fn walk_upstream<T>(
        &mut self,
        domain: u32,
        start_bus: u8,
        mut visit: impl FnMut(&Hop) -> ControlFlow<T>,
    ) -> Result<Option<T>, TopologyError> {
        self.cache.store_topology(self.io, domain, self.bus_limit)?;
        let io = self.io;
        let cache = &*self.cache;
        walk_chain(
            start_bus,
            |bus| cache.find_upstream_bridge(domain, bus).copied(),
            |bridge| {
                let hop = Hop {
                    bridge: *bridge,
                    port: PortDescriptor::discover(io, bridge.address, &bridge.ids, None),
                };
                visit(&hop)
            },
        )
    }

    /// Returns the root port of the hierarchy containing `start_bus`.
    ///
    /// Bridges without a PCI Express capability are stepped over.
    pub fn find_root_port(
        &mut self,
        domain: u32,
        start_bus: u8,
    ) -> Result<PortDescriptor, TopologyError> {
        let io = self.io;
        let root = self.walk_upstream(domain, start_bus, |hop| match hop.port.port_type(io) {
            Ok(DevicePortType::ROOT_PORT) => ControlFlow::Break(hop.bridge),
            Ok(port_type) => {
                tracing::debug!(address = %hop.bridge.address, ?port_type, "walking past port");
                ControlFlow::Continue(())
            }
            Err(_) => {
                tracing::debug!(address = %hop.bridge.address, "skipping non-pcie bridge");
                ControlFlow::Continue(())
            }
        })?;

        let root = root.ok_or(TopologyError::NotFound {
            domain,
            bus: start_bus,
        })?;
        tracing::debug!(address = %root.address, start_bus, "found root port");
        Ok(self.describe(&root))
    }

    /// Returns a port of the recognized switch directly above `start_bus`.
    ///
    /// If the immediate upstream bridge is recognized switch silicon, returns
    /// it, or its own upstream bridge when `want_port_above_switch` is set.
    /// Returns `None` when there is no recognized switch.
    pub fn find_board_bridge_port(
        &mut self,
        domain: u32,
        start_bus: u8,
        want_port_above_switch: bool,
    ) -> Result<Option<PortDescriptor>, TopologyError> {
        let Some(bridge) = self.find_upstream_bridge(domain, start_bus)? else {
            return Ok(None);
        };
        if !is_recognized_switch(bridge.ids.vendor_id, bridge.ids.device_id) {
            return Ok(None);
        }
        if !want_port_above_switch {
            return Ok(Some(self.describe(&bridge)));
        }
        self.find_upstream_port(domain, bridge.address.bus)
    }
}
