// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI Express topology discovery and end-to-end capability negotiation.
//!
//! Given the bus address of a device, this crate locates the bridges between
//! the device and its root port, resolves the enhanced configuration space
//! base address of every PCI domain from the ACPI MCFG table, and decides
//! whether a PCIe feature (atomics routing, LTR, ASPM) is usable along the
//! whole path.
//!
//! Discovery is read-only: nothing in this crate writes configuration space.

#![forbid(unsafe_code)]

pub mod cache;
pub mod caps;
pub mod chipset;
pub mod config;
pub mod diag;
pub mod ecam;
pub mod firmware;
pub mod io;
pub mod locator;
pub mod port;
pub mod store;

#[cfg(test)]
mod test_helpers;

pub use config::DiscoveryConfig;
pub use store::DeviceTopology;
pub use store::TopologyStore;

use std::fmt;

/// Number of bus numbers in a PCI domain.
const MAX_BUSES: u16 = 256;
const MAX_DEVICES: u8 = 32;
const MAX_FUNCTIONS: u8 = 8;

/// The location of a PCI function: domain (segment group), bus, device and
/// function number.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciAddress {
    /// PCI segment group.
    pub domain: u32,
    /// Bus number.
    pub bus: u8,
    /// Device number, `0..32`.
    pub device: u8,
    /// Function number, `0..8`.
    pub function: u8,
}

impl PciAddress {
    /// Returns the address of `domain:bus:device.function`.
    pub const fn new(domain: u32, bus: u8, device: u8, function: u8) -> Self {
        Self {
            domain,
            bus,
            device,
            function,
        }
    }

    /// `0000:00:00.0`, used as a stand-in when a port cannot be located.
    pub const PLACEHOLDER: Self = Self::new(0, 0, 0, 0);
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}
