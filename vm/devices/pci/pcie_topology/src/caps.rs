// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end PCI Express feature negotiation.
//!
//! A feature is only usable by a device if every port between the device
//! and its root port supports (and where applicable enables) it. Each query
//! walks the bridges above the device's bus and reduces their registers.

use crate::cache::TopologyError;
use crate::io::PciConfigIo;
use crate::locator::Hop;
use crate::locator::Locator;
use crate::port::PortDescriptor;
use crate::port::PortError;
use bitfield_struct::bitfield;
use pci_core::spec::caps::pci_express::DeviceCapabilities2;
use pci_core::spec::caps::pci_express::DeviceControl2;
use pci_core::spec::caps::pci_express::DevicePortType;
use pci_core::spec::caps::pci_express::PciExpressCapabilityHeader;
use pci_core::spec::cfg_space;
use pci_core::spec::cfg_space::BridgeControl;
use std::ops::ControlFlow;
use thiserror::Error;

/// Errors from capability queries.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Some port on the path does not support the feature.
    #[error("not supported on the path to the root port")]
    NotSupported,
    /// Extended configuration space has not been made accessible.
    #[error("extended configuration space is inaccessible")]
    ConfigSpaceInaccessible,
    /// The topology could not be determined.
    #[error("topology lookup failed")]
    Topology(#[from] TopologyError),
}

/// AtomicOp completer widths supported by the root port, usable by a device
/// when every switch port in between routes AtomicOps.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct AtomicOpWidths {
    /// 32-bit FetchAdd, Swap and CAS.
    pub op32: bool,
    /// 64-bit FetchAdd, Swap and CAS.
    pub op64: bool,
    /// 128-bit CAS.
    pub cas128: bool,
    #[bits(29)]
    _reserved: u32,
}

/// Which ASPM link states the link above a device can enter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct AspmFeasibility {
    /// L0s is supported.
    pub l0s_supported: bool,
    /// L1 is supported.
    pub l1_supported: bool,
}

impl AspmFeasibility {
    /// Both states.
    pub const ALL: Self = Self {
        l0s_supported: true,
        l1_supported: true,
    };

    /// Keeps only the states also present in `allowed`.
    pub fn restrict(self, allowed: Self) -> Self {
        Self {
            l0s_supported: self.l0s_supported && allowed.l0s_supported,
            l1_supported: self.l1_supported && allowed.l1_supported,
        }
    }
}

fn device_caps_2(
    io: &dyn PciConfigIo,
    port: &PortDescriptor,
) -> Result<DeviceCapabilities2, PortError> {
    port.read_pcie_register(io, PciExpressCapabilityHeader::DEVICE_CAPS_2)
        .map(DeviceCapabilities2::from_bits)
}

fn device_control_2(
    io: &dyn PciConfigIo,
    port: &PortDescriptor,
) -> Result<DeviceControl2, PortError> {
    port.read_pcie_register(io, PciExpressCapabilityHeader::DEVICE_CTL_STS_2)
        .map(|ctl_sts| DeviceControl2::from_bits(ctl_sts as u16))
}

/// Checks one hop of the atomics walk. Returns the completer widths once the
/// root port is reached.
fn atomics_hop(io: &dyn PciConfigIo, hop: &Hop) -> Result<Option<AtomicOpWidths>, &'static str> {
    let no_pcie = |_| "no pcie capability";
    let port_type = hop.port.port_type(io).map_err(no_pcie)?;
    let caps = device_caps_2(io, &hop.port).map_err(no_pcie)?;
    match port_type {
        DevicePortType::ROOT_PORT => Ok(Some(
            AtomicOpWidths::new()
                .with_op32(caps.atomic_op_32_bit_completer_supported())
                .with_op64(caps.atomic_op_64_bit_completer_supported())
                .with_cas128(caps.cas_128_bit_completer_supported()),
        )),
        DevicePortType::UPSTREAM_SWITCH_PORT => {
            if !caps.atomic_op_routing_supported() {
                return Err("atomic op routing unsupported");
            }
            if device_control_2(io, &hop.port)
                .map_err(no_pcie)?
                .atomic_op_egress_blocking()
            {
                return Err("atomic op egress blocked");
            }
            Ok(None)
        }
        DevicePortType::DOWNSTREAM_SWITCH_PORT => {
            if !caps.atomic_op_routing_supported() {
                return Err("atomic op routing unsupported");
            }
            Ok(None)
        }
        _ => Err("unexpected port type"),
    }
}

/// Returns the AtomicOp widths a device on `bus` can use.
///
/// Fails with [`CapabilityError::NotSupported`] if any port on the path
/// cannot route AtomicOps, blocks them, or is not a PCI Express port, and
/// when the device has no upstream bridge at all.
pub fn query_atomics_support(
    locator: &mut Locator<'_>,
    domain: u32,
    bus: u8,
) -> Result<AtomicOpWidths, CapabilityError> {
    let io = locator.io();
    let result = locator.walk_upstream(domain, bus, |hop| match atomics_hop(io, hop) {
        Ok(None) => ControlFlow::Continue(()),
        Ok(Some(widths)) => ControlFlow::Break(Ok(widths)),
        Err(reason) => ControlFlow::Break(Err((hop.bridge.address, reason))),
    })?;

    match result {
        Some(Ok(widths)) => Ok(widths),
        Some(Err((address, reason))) => {
            tracing::debug!(%address, reason, "atomic ops unsupported");
            Err(CapabilityError::NotSupported)
        }
        None => {
            tracing::debug!(domain, bus, "atomic ops unsupported, no root port");
            Err(CapabilityError::NotSupported)
        }
    }
}

fn ltr_hop(io: &dyn PciConfigIo, hop: &Hop) -> Result<bool, PortError> {
    Ok(device_caps_2(io, &hop.port)?.ltr_mechanism_supported()
        && device_control_2(io, &hop.port)?.ltr_mechanism_enable())
}

/// Returns true if Latency Tolerance Reporting is supported and enabled on
/// every port from `bus` up to and including the root port.
pub fn query_ltr_support(
    locator: &mut Locator<'_>,
    domain: u32,
    bus: u8,
) -> Result<bool, CapabilityError> {
    if locator.extended().is_none() {
        return Err(CapabilityError::ConfigSpaceInaccessible);
    }

    let io = locator.io();
    let result = locator.walk_upstream(domain, bus, |hop| {
        let enabled = ltr_hop(io, hop).unwrap_or(false);
        if !enabled {
            tracing::debug!(address = %hop.bridge.address, "ltr not enabled");
            return ControlFlow::Break(false);
        }
        match hop.port.port_type(io) {
            Ok(DevicePortType::ROOT_PORT) => ControlFlow::Break(true),
            _ => ControlFlow::Continue(()),
        }
    })?;
    Ok(result.unwrap_or(false))
}

/// Reads which ASPM states the link of `port` supports.
///
/// An unreadable capability reports neither state.
pub fn query_aspm_feasibility(io: &dyn PciConfigIo, port: &PortDescriptor) -> AspmFeasibility {
    match port.link_capabilities(io) {
        Ok(caps) => AspmFeasibility {
            l0s_supported: caps.aspm_l0s_supported(),
            l1_supported: caps.aspm_l1_supported(),
        },
        Err(err) => {
            tracing::debug!(
                address = %port.address,
                error = &err as &dyn std::error::Error,
                "aspm feasibility unknown"
            );
            AspmFeasibility::default()
        }
    }
}

/// Returns true if every bridge above `bus` forwards legacy VGA cycles.
///
/// Bridges without a PCI Express capability are checked and walked past. The
/// walk ends at the root port, or at the top of the hierarchy. A device with
/// no bridge above it does not receive forwarded VGA cycles.
pub fn upstream_vga_decode_enabled(
    locator: &mut Locator<'_>,
    domain: u32,
    bus: u8,
) -> Result<bool, TopologyError> {
    let io = locator.io();
    let mut checked = false;
    let result = locator.walk_upstream(domain, bus, |hop| {
        let control = BridgeControl::from_bits(
            io.read_u16(hop.bridge.address, cfg_space::BRIDGE_CONTROL_WORD),
        );
        if !control.vga_enable() {
            tracing::debug!(address = %hop.bridge.address, "vga decode disabled");
            return ControlFlow::Break(false);
        }
        checked = true;
        match hop.port.port_type(io) {
            Ok(DevicePortType::ROOT_PORT) => ControlFlow::Break(true),
            _ => ControlFlow::Continue(()),
        }
    })?;
    Ok(result.unwrap_or(checked))
}
