// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The discovery context owned by a driver: chipset state, the ECAM
//! registry and the topology cache, and the queries built on them.

use crate::PciAddress;
use crate::cache::BusTopologyCache;
use crate::cache::TopologyError;
use crate::caps;
use crate::caps::AspmFeasibility;
use crate::caps::AtomicOpWidths;
use crate::caps::CapabilityError;
use crate::chipset::ChipsetRegistry;
use crate::chipset::ChipsetSetup;
use crate::config::DiscoveryConfig;
use crate::ecam::EcamError;
use crate::ecam::EcamRegistry;
use crate::ecam::ExtendedConfigSpace;
use crate::io::FirmwareServices;
use crate::io::PciConfigIo;
use crate::io::PhysicalMemory;
use crate::locator::Locator;
use crate::port::PortDescriptor;
use pci_core::spec::cfg_space::CommonHeader;
use pci_core::spec::hwid::is_valid_vendor_id;

/// The ports between a device and the root of its hierarchy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceTopology {
    /// The device the topology was resolved for.
    pub device: PciAddress,
    /// The root port of the hierarchy, if one was found.
    pub root_port: Option<PortDescriptor>,
    /// The port immediately above the device, or
    /// [`PortDescriptor::PLACEHOLDER`] if there is none.
    pub upstream_port: PortDescriptor,
    /// The port above the board's switch, or [`Self::upstream_port`] when
    /// the device is not behind a recognized switch.
    pub board_upstream_port: PortDescriptor,
    /// The recognized switch port directly above the device.
    pub board_downstream_port: Option<PortDescriptor>,
    /// The upstream port is not the root port.
    pub behind_bridge: bool,
}

/// Topology discovery state for one platform.
#[derive(Debug)]
pub struct TopologyStore {
    config: DiscoveryConfig,
    chipsets: ChipsetRegistry,
    cache: BusTopologyCache,
    registry: EcamRegistry,
    config_accessible: bool,
    aspm_allowed: AspmFeasibility,
    attached_devices: Option<usize>,
}

impl TopologyStore {
    /// Creates a store using the built-in chipset table.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_chipsets(config, ChipsetRegistry::new())
    }

    /// Creates a store using `chipsets`.
    pub fn with_chipsets(config: DiscoveryConfig, chipsets: ChipsetRegistry) -> Self {
        Self {
            config,
            chipsets,
            cache: BusTopologyCache::new(),
            registry: EcamRegistry::new(),
            config_accessible: false,
            aspm_allowed: AspmFeasibility::ALL,
            attached_devices: None,
        }
    }

    /// The discovery configuration.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// The chipset table.
    pub fn chipsets(&self) -> &ChipsetRegistry {
        &self.chipsets
    }

    /// The topology cache.
    pub fn cache(&self) -> &BusTopologyCache {
        &self.cache
    }

    /// The known ECAM windows.
    pub fn ecam_registry(&self) -> &EcamRegistry {
        &self.registry
    }

    /// Returns true if extended configuration space can be read.
    pub fn config_accessible(&self) -> bool {
        self.config_accessible
    }

    /// Sets up extended configuration space access for the platform whose
    /// first host bridge is `host_bridge`.
    ///
    /// Chipset quirks are applied first, then the MCFG table is consulted.
    /// Failing to find usable windows leaves extended configuration space
    /// inaccessible and is not an error. Windows recorded by an earlier call
    /// are discarded.
    pub fn initialize_chipset(
        &mut self,
        io: &dyn PciConfigIo,
        firmware: &dyn FirmwareServices,
        host_bridge: PciAddress,
    ) -> Result<(), EcamError> {
        self.registry.teardown();
        self.config_accessible = false;

        let mut setup = ChipsetSetup::default();
        let id = io.read_u32(host_bridge, CommonHeader::DEVICE_VENDOR.0);
        let (vendor_id, device_id) = (id as u16, (id >> 16) as u16);
        if !is_valid_vendor_id(vendor_id) {
            tracing::warn!(%host_bridge, "no host bridge found");
        } else if let Some(info) = self.chipsets.find(vendor_id, device_id) {
            tracing::info!(%host_bridge, chipset = info.name, "found chipset");
            if let Err(err) = info.family.setup(&mut setup) {
                tracing::error!(
                    chipset = info.name,
                    error = &err as &dyn std::error::Error,
                    "chipset setup failed"
                );
            }
        } else {
            tracing::warn!(%host_bridge, vendor_id, device_id, "chipset has no definition");
        }

        if !self.config.ecam_mapping_allowed {
            setup.skip_mcfg = true;
            setup.config_accessible = true;
        }

        self.aspm_allowed = setup.aspm_allowed;
        self.config_accessible = setup.config_accessible;
        for base in setup.bases {
            self.registry.insert(base)?;
        }

        if !(setup.config_accessible && setup.skip_mcfg) {
            match self.registry.populate_from_firmware(firmware, &self.config) {
                Ok(count) => tracing::debug!(count, "recorded mcfg windows"),
                Err(err @ EcamError::ResourceExhausted(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(error = &err as &dyn std::error::Error, "mcfg unavailable");
                }
            }
        }
        if !self.registry.is_empty() {
            self.config_accessible = true;
        }

        if self.config_accessible {
            let ecam_id = self
                .extended(io, firmware)
                .and_then(|extended| extended.read_u32(host_bridge, 0));
            if ecam_id != Some(id) {
                tracing::error!(
                    %host_bridge,
                    expected = id,
                    ecam_id = ?ecam_id,
                    "extended config space mismatch, disabling extended access"
                );
                self.config_accessible = false;
                self.registry.teardown();
            }
        }

        tracing::info!(
            config_accessible = self.config_accessible,
            windows = self.registry.len(),
            "chipset initialized"
        );
        Ok(())
    }

    /// Returns an extended configuration space accessor if extended config
    /// space is accessible.
    pub fn extended<'a>(
        &'a self,
        io: &'a dyn PciConfigIo,
        memory: &'a dyn PhysicalMemory,
    ) -> Option<ExtendedConfigSpace<'a>> {
        self.config_accessible.then(|| ExtendedConfigSpace::new(io, memory, &self.registry))
    }

    /// Returns a locator backed by this store's cache.
    pub fn locator<'a>(
        &'a mut self,
        io: &'a dyn PciConfigIo,
        memory: &'a dyn PhysicalMemory,
    ) -> Locator<'a> {
        let extended = self
            .config_accessible
            .then(|| ExtendedConfigSpace::new(io, memory, &self.registry));
        Locator::new(io, &mut self.cache, extended, self.config.scan_bus_limit)
    }

    /// Resolves the ports above `device`.
    pub fn resolve_topology(
        &mut self,
        io: &dyn PciConfigIo,
        memory: &dyn PhysicalMemory,
        device: PciAddress,
    ) -> Result<DeviceTopology, TopologyError> {
        let bare_metal = self.config.bare_metal;
        let config_accessible = self.config_accessible;
        let (domain, bus) = (device.domain, device.bus);
        let mut locator = self.locator(io, memory);

        let mut upstream_port = match locator.find_upstream_port(domain, bus)? {
            Some(port) => port,
            None if bare_metal => {
                tracing::error!(%device, "no upstream port");
                return Err(TopologyError::InvalidTopology {
                    address: device,
                    reason: "no upstream port",
                });
            }
            None => {
                tracing::info!(%device, "no upstream port, using placeholder");
                PortDescriptor::PLACEHOLDER
            }
        };

        let mut root_port = match locator.find_root_port(domain, bus) {
            Ok(port) => Some(port),
            Err(TopologyError::NotFound { .. }) => {
                tracing::info!(%device, "no root port");
                None
            }
            Err(err) => return Err(err),
        };

        let mut board_downstream_port = locator.find_board_bridge_port(domain, bus, false)?;
        let mut board_upstream_port = match board_downstream_port {
            Some(_) => locator
                .find_board_bridge_port(domain, bus, true)?
                .unwrap_or(upstream_port),
            None => upstream_port,
        };

        let behind_bridge = root_port.is_some_and(|root| root.address != upstream_port.address);

        if let Some(root) = root_port.filter(|_| config_accessible) {
            let hidden_aer = self
                .chipsets
                .find(root.vendor_id, root.device_id)
                .and_then(|info| info.family.hidden_aer_offset());
            if let Some(offset) = hidden_aer {
                tracing::debug!(address = %root.address, offset, "using unlisted aer capability");
                let ports = [
                    root_port.as_mut(),
                    Some(&mut upstream_port),
                    Some(&mut board_upstream_port),
                    board_downstream_port.as_mut(),
                ];
                for port in ports.into_iter().flatten() {
                    if port.address == root.address {
                        port.aer = Some(offset);
                    }
                }
            }
        }

        let topology = DeviceTopology {
            device,
            root_port,
            upstream_port,
            board_upstream_port,
            board_downstream_port,
            behind_bridge,
        };
        tracing::info!(
            %device,
            root_port = ?topology.root_port.map(|port| port.address),
            upstream_port = %topology.upstream_port.address,
            board_upstream_port = %topology.board_upstream_port.address,
            board_downstream_port = ?topology.board_downstream_port.map(|port| port.address),
            behind_bridge,
            "resolved device topology"
        );
        Ok(topology)
    }

    /// Records the number of attached devices, flushing the topology cache
    /// when it changes.
    pub fn sync_attached_devices(&mut self, count: usize) {
        match self.attached_devices.replace(count) {
            Some(previous) if previous != count => {
                tracing::debug!(previous, count, "attached devices changed, flushing topology");
                self.cache.flush_all();
            }
            _ => {}
        }
    }

    /// Returns the AtomicOp widths a device on `domain:bus` can use.
    pub fn query_atomics_support(
        &mut self,
        io: &dyn PciConfigIo,
        memory: &dyn PhysicalMemory,
        domain: u32,
        bus: u8,
    ) -> Result<AtomicOpWidths, CapabilityError> {
        caps::query_atomics_support(&mut self.locator(io, memory), domain, bus)
    }

    /// Returns true if LTR is usable by a device on `domain:bus`.
    pub fn query_ltr_support(
        &mut self,
        io: &dyn PciConfigIo,
        memory: &dyn PhysicalMemory,
        domain: u32,
        bus: u8,
    ) -> Result<bool, CapabilityError> {
        caps::query_ltr_support(&mut self.locator(io, memory), domain, bus)
    }

    /// Returns the ASPM states `port`'s link supports and the platform
    /// allows.
    pub fn query_aspm_feasibility(
        &self,
        io: &dyn PciConfigIo,
        port: &PortDescriptor,
    ) -> AspmFeasibility {
        let port_allowed = self
            .chipsets
            .find(port.vendor_id, port.device_id)
            .map_or(AspmFeasibility::ALL, |info| info.family.aspm_allowed());
        caps::query_aspm_feasibility(io, port)
            .restrict(self.aspm_allowed)
            .restrict(port_allowed)
    }

    /// Returns true if legacy VGA cycles reach a device on `domain:bus`.
    pub fn upstream_vga_decode_enabled(
        &mut self,
        io: &dyn PciConfigIo,
        memory: &dyn PhysicalMemory,
        domain: u32,
        bus: u8,
    ) -> Result<bool, TopologyError> {
        caps::upstream_vga_decode_enabled(&mut self.locator(io, memory), domain, bus)
    }

    /// Drops all cached topology and ECAM windows.
    pub fn teardown(&mut self) {
        self.cache.flush_all();
        self.registry.teardown();
        self.config_accessible = false;
        self.attached_devices = None;
    }
}
