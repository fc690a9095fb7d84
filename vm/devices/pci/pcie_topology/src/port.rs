// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bridge ports and the capability structures located in their
//! configuration space.

use crate::PciAddress;
use crate::ecam::ExtendedConfigSpace;
use crate::io::PciConfigIo;
use pci_core::spec::caps::CapabilityId;
use pci_core::spec::caps::MAX_CAPABILITY_ENTRIES;
use pci_core::spec::caps::pci_express::DeviceStatus;
use pci_core::spec::caps::pci_express::DevicePortType;
use pci_core::spec::caps::pci_express::LinkCapabilities;
use pci_core::spec::caps::pci_express::LinkCapabilities2;
use pci_core::spec::caps::pci_express::LinkSpeed;
use pci_core::spec::caps::pci_express::LinkWidth;
use pci_core::spec::caps::pci_express::PCI_EXPRESS_CAPABILITY_SIZE;
use pci_core::spec::caps::pci_express::PciExpressCapabilities;
use pci_core::spec::caps::pci_express::PciExpressCapabilityHeader;
use pci_core::spec::cfg_space;
use pci_core::spec::cfg_space::CommonHeader;
use pci_core::spec::cfg_space::Status;
use pci_core::spec::ext_caps::EXTENDED_CAPABILITIES_START;
use pci_core::spec::ext_caps::ExtendedCapabilityHeader;
use pci_core::spec::ext_caps::ExtendedCapabilityId;
use pci_core::spec::ext_caps::MAX_EXTENDED_CAPABILITY_ENTRIES;
use pci_core::spec::ext_caps::acs::AcsCapabilities;
use pci_core::spec::ext_caps::acs::AcsCapabilityHeader;
use pci_core::spec::ext_caps::aer::AerCapabilityHeader;
use pci_core::spec::ext_caps::aer::HEADER_LOG_DWORDS;
use pci_core::spec::ext_caps::l1ss::L1SubstatesCapabilities;
use pci_core::spec::ext_caps::l1ss::L1SubstatesCapabilityHeader;
use pci_core::spec::ext_caps::l1ss::L1SubstatesControl1;
use pci_core::spec::hwid::HardwareIds;
use thiserror::Error;

/// Standard capabilities live above the predefined header.
const FIRST_CAPABILITY_OFFSET: u16 = 0x40;

/// Errors reading port registers.
#[derive(Debug, Error)]
pub enum PortError {
    /// The capability holding the register was not found on the port.
    #[error("{0} capability not present")]
    CapabilityAbsent(&'static str),
    /// Extended configuration space could not be read.
    #[error("extended configuration space is inaccessible")]
    ConfigSpaceInaccessible,
}

/// Iterator over the standard capability list of a function, yielding
/// `(id, offset)`.
///
/// The walk stops after [`MAX_CAPABILITY_ENTRIES`] entries so a corrupt or
/// cyclic list still terminates.
pub struct Capabilities<'a> {
    io: &'a dyn PciConfigIo,
    address: PciAddress,
    next: u16,
    remaining: usize,
}

impl Iterator for Capabilities<'_> {
    type Item = (CapabilityId, u16);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0
            || self.next < FIRST_CAPABILITY_OFFSET
            || self.next >= cfg_space::CONFIG_SPACE_SIZE
        {
            return None;
        }
        self.remaining -= 1;
        let offset = self.next;
        let header = self.io.read_u32(self.address, offset);
        self.next = u16::from((header >> 8) as u8 & !3);
        Some((CapabilityId(header as u8), offset))
    }
}

/// Returns the standard capabilities of the function at `address`.
pub fn capabilities(io: &dyn PciConfigIo, address: PciAddress) -> Capabilities<'_> {
    let status = Status::from_bits(io.read_u16(address, CommonHeader::STATUS_COMMAND.0 + 2));
    let next = if status.capabilities_list() {
        u16::from(io.read_u8(address, CommonHeader::RESERVED_CAP_PTR.0) & !3)
    } else {
        0
    };
    Capabilities {
        io,
        address,
        next,
        remaining: MAX_CAPABILITY_ENTRIES,
    }
}

/// Returns the offset of the PCI Express capability of the function at
/// `address`.
///
/// A capability too close to the end of config space to hold the whole
/// structure is ignored.
pub fn find_pcie_capability(io: &dyn PciConfigIo, address: PciAddress) -> Option<u16> {
    let (_, offset) =
        capabilities(io, address).find(|(id, _)| *id == CapabilityId::PCI_EXPRESS)?;
    if offset > cfg_space::CONFIG_SPACE_SIZE - PCI_EXPRESS_CAPABILITY_SIZE {
        tracing::debug!(%address, offset, "pcie capability overruns config space");
        return None;
    }
    Some(offset)
}

/// Iterator over the extended capability list of a function, yielding
/// `(id, offset)`.
pub struct ExtendedCapabilities<'a, 'b> {
    extended: &'a ExtendedConfigSpace<'b>,
    address: PciAddress,
    next: u16,
    remaining: usize,
}

impl Iterator for ExtendedCapabilities<'_, '_> {
    type Item = (ExtendedCapabilityId, u16);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.next < EXTENDED_CAPABILITIES_START {
            return None;
        }
        self.remaining -= 1;
        let offset = self.next;
        let header = self.extended.read_u32(self.address, offset)?;
        // an empty list has a zero header, unreachable config space all ones
        if header == 0 || header == !0 {
            return None;
        }
        let header = ExtendedCapabilityHeader::from_bits(header);
        self.next = header.next_offset() & !3;
        Some((header.id(), offset))
    }
}

/// Returns the extended capabilities of the function at `address`.
pub fn extended_capabilities<'a, 'b>(
    extended: &'a ExtendedConfigSpace<'b>,
    address: PciAddress,
) -> ExtendedCapabilities<'a, 'b> {
    ExtendedCapabilities {
        extended,
        address,
        next: EXTENDED_CAPABILITIES_START,
        remaining: MAX_EXTENDED_CAPABILITY_ENTRIES,
    }
}

/// A bridge port and the offsets of the capabilities topology queries use.
///
/// Offsets are resolved once, when the descriptor is created.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    /// Location of the port.
    pub address: PciAddress,
    /// Vendor ID of the port.
    pub vendor_id: u16,
    /// Device ID of the port.
    pub device_id: u16,
    /// PCI Express capability.
    pub pcie_cap: Option<u16>,
    /// Advanced Error Reporting extended capability.
    pub aer: Option<u16>,
    /// Virtual Channel extended capability.
    pub vc: Option<u16>,
    /// L1 PM Substates extended capability.
    pub l1ss: Option<u16>,
    /// Access Control Services extended capability.
    pub acs: Option<u16>,
}

/// Link speed and width advertised in Link Capabilities.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LinkLimits {
    /// Maximum link speed.
    pub speed: LinkSpeed,
    /// Maximum link width.
    pub width: LinkWidth,
}

/// The AER registers of a port.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[expect(missing_docs)] // named after the registers
pub struct AerSnapshot {
    pub uncorrectable_status: u32,
    pub uncorrectable_mask: u32,
    pub uncorrectable_severity: u32,
    pub correctable_status: u32,
    pub correctable_mask: u32,
    pub advanced_caps_ctl: u32,
    pub header_log: [u32; HEADER_LOG_DWORDS],
}

/// The L1 PM Substates registers of a port.
#[derive(Debug, Copy, Clone)]
#[expect(missing_docs)] // named after the registers
pub struct L1SubstatesSnapshot {
    pub caps: L1SubstatesCapabilities,
    pub control_1: L1SubstatesControl1,
    pub control_2: u32,
}

impl PortDescriptor {
    /// Stand-in used when a device's upstream port cannot be located, which
    /// is expected for devices passed through to a virtual machine.
    pub const PLACEHOLDER: Self = Self {
        address: PciAddress::PLACEHOLDER,
        vendor_id: HardwareIds::INVALID.vendor_id,
        device_id: HardwareIds::INVALID.device_id,
        pcie_cap: None,
        aer: None,
        vc: None,
        l1ss: None,
        acs: None,
    };

    /// Builds the descriptor of the port at `address`, locating its
    /// capabilities.
    ///
    /// Extended capabilities are only located when `extended` is given.
    pub fn discover(
        io: &dyn PciConfigIo,
        address: PciAddress,
        ids: &HardwareIds,
        extended: Option<&ExtendedConfigSpace<'_>>,
    ) -> Self {
        let mut port = Self {
            address,
            vendor_id: ids.vendor_id,
            device_id: ids.device_id,
            pcie_cap: find_pcie_capability(io, address),
            aer: None,
            vc: None,
            l1ss: None,
            acs: None,
        };

        if let Some(extended) = extended {
            for (id, offset) in extended_capabilities(extended, address) {
                let slot = match id {
                    ExtendedCapabilityId::ADVANCED_ERROR_REPORTING => &mut port.aer,
                    ExtendedCapabilityId::VIRTUAL_CHANNEL => &mut port.vc,
                    ExtendedCapabilityId::L1_PM_SUBSTATES => &mut port.l1ss,
                    ExtendedCapabilityId::ACCESS_CONTROL_SERVICES => &mut port.acs,
                    _ => continue,
                };
                slot.get_or_insert(offset);
            }
        }

        tracing::debug!(
            %address,
            pcie_cap = ?port.pcie_cap,
            aer = ?port.aer,
            vc = ?port.vc,
            l1ss = ?port.l1ss,
            acs = ?port.acs,
            "discovered port"
        );
        port
    }

    /// Returns true for [`Self::PLACEHOLDER`].
    pub fn is_placeholder(&self) -> bool {
        *self == Self::PLACEHOLDER
    }

    /// Reads the PCI Express capability register dword at `register`.
    pub fn read_pcie_register(
        &self,
        io: &dyn PciConfigIo,
        register: PciExpressCapabilityHeader,
    ) -> Result<u32, PortError> {
        let cap = self.pcie_cap.ok_or(PortError::CapabilityAbsent("pci express"))?;
        Ok(io.read_u32(self.address, cap + register.0))
    }

    /// Returns the Device/Port Type of the port.
    pub fn port_type(&self, io: &dyn PciConfigIo) -> Result<DevicePortType, PortError> {
        let caps = self.read_pcie_register(io, PciExpressCapabilityHeader::PCIE_CAPS)? >> 16;
        Ok(PciExpressCapabilities::from_bits(caps as u16).device_port_type())
    }

    /// Reads the Link Capabilities register.
    pub fn link_capabilities(&self, io: &dyn PciConfigIo) -> Result<LinkCapabilities, PortError> {
        self.read_pcie_register(io, PciExpressCapabilityHeader::LINK_CAPS)
            .map(LinkCapabilities::from_bits)
    }

    /// Reads the Link Capabilities 2 register.
    pub fn link_capabilities_2(
        &self,
        io: &dyn PciConfigIo,
    ) -> Result<LinkCapabilities2, PortError> {
        self.read_pcie_register(io, PciExpressCapabilityHeader::LINK_CAPS_2)
            .map(LinkCapabilities2::from_bits)
    }

    /// Returns the maximum link speed.
    pub fn max_link_speed(&self, io: &dyn PciConfigIo) -> Result<LinkSpeed, PortError> {
        Ok(LinkSpeed(self.link_capabilities(io)?.max_link_speed()))
    }

    /// Returns the maximum link width.
    pub fn max_link_width(&self, io: &dyn PciConfigIo) -> Result<LinkWidth, PortError> {
        Ok(LinkWidth(self.link_capabilities(io)?.max_link_width()))
    }

    /// Returns the maximum link speed and width.
    pub fn link_limits(&self, io: &dyn PciConfigIo) -> Result<LinkLimits, PortError> {
        let caps = self.link_capabilities(io)?;
        Ok(LinkLimits {
            speed: LinkSpeed(caps.max_link_speed()),
            width: LinkWidth(caps.max_link_width()),
        })
    }

    /// Returns true if the port supports clock power management.
    pub fn clock_power_management_supported(
        &self,
        io: &dyn PciConfigIo,
    ) -> Result<bool, PortError> {
        Ok(self.link_capabilities(io)?.clock_power_management())
    }

    /// Reads the Device Status register, which carries the detected error
    /// flags.
    pub fn device_error_status(&self, io: &dyn PciConfigIo) -> Result<DeviceStatus, PortError> {
        let ctl_sts = self.read_pcie_register(io, PciExpressCapabilityHeader::DEVICE_CTL_STS)?;
        Ok(DeviceStatus::from_bits((ctl_sts >> 16) as u16))
    }

    fn read_extended(
        &self,
        extended: &ExtendedConfigSpace<'_>,
        offset: u16,
    ) -> Result<u32, PortError> {
        extended
            .read_u32(self.address, offset)
            .ok_or(PortError::ConfigSpaceInaccessible)
    }

    /// Reads the AER registers.
    pub fn read_aer(&self, extended: &ExtendedConfigSpace<'_>) -> Result<AerSnapshot, PortError> {
        let aer = self.aer.ok_or(PortError::CapabilityAbsent("aer"))?;
        let read = |register: AerCapabilityHeader| self.read_extended(extended, aer + register.0);

        let mut header_log = [0; HEADER_LOG_DWORDS];
        for (i, dword) in header_log.iter_mut().enumerate() {
            *dword = self.read_extended(
                extended,
                aer + AerCapabilityHeader::HEADER_LOG.0 + 4 * i as u16,
            )?;
        }

        Ok(AerSnapshot {
            uncorrectable_status: read(AerCapabilityHeader::UNCORRECTABLE_STATUS)?,
            uncorrectable_mask: read(AerCapabilityHeader::UNCORRECTABLE_MASK)?,
            uncorrectable_severity: read(AerCapabilityHeader::UNCORRECTABLE_SEVERITY)?,
            correctable_status: read(AerCapabilityHeader::CORRECTABLE_STATUS)?,
            correctable_mask: read(AerCapabilityHeader::CORRECTABLE_MASK)?,
            advanced_caps_ctl: read(AerCapabilityHeader::ADVANCED_CAPS_CTL)?,
            header_log,
        })
    }

    /// Reads the L1 PM Substates registers.
    pub fn read_l1_substates(
        &self,
        extended: &ExtendedConfigSpace<'_>,
    ) -> Result<L1SubstatesSnapshot, PortError> {
        let l1ss = self.l1ss.ok_or(PortError::CapabilityAbsent("l1 pm substates"))?;
        let read =
            |register: L1SubstatesCapabilityHeader| self.read_extended(extended, l1ss + register.0);
        Ok(L1SubstatesSnapshot {
            caps: L1SubstatesCapabilities::from_bits(read(L1SubstatesCapabilityHeader::CAPS)?),
            control_1: L1SubstatesControl1::from_bits(read(
                L1SubstatesCapabilityHeader::CONTROL_1,
            )?),
            control_2: read(L1SubstatesCapabilityHeader::CONTROL_2)?,
        })
    }

    /// Returns the ACS features that are both implemented and enabled.
    pub fn acs_redirect_config(
        &self,
        extended: &ExtendedConfigSpace<'_>,
    ) -> Result<AcsCapabilities, PortError> {
        let acs = self.acs.ok_or(PortError::CapabilityAbsent("acs"))?;
        let read = |register: AcsCapabilityHeader| {
            extended
                .read_u16(self.address, acs + register.0)
                .ok_or(PortError::ConfigSpaceInaccessible)
        };
        let caps = read(AcsCapabilityHeader::CAPS)?;
        let control = read(AcsCapabilityHeader::CONTROL)?;
        Ok(AcsCapabilities::from_bits(control & caps))
    }
}
