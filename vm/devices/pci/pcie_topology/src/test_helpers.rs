// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory PCI fabric and physical memory used by unit tests.

use crate::PciAddress;
use crate::ecam::ecam_address;
use crate::io::FirmwareServices;
use crate::io::MemoryError;
use crate::io::PciConfigIo;
use crate::io::PhysicalMemory;
use acpi_spec::Header;
use acpi_spec::RSDP_SIGNATURE;
use acpi_spec::RSDP_V1_CHECKSUM_LEN;
use acpi_spec::Rsdp;
use acpi_spec::mcfg::MCFG_SIGNATURE;
use acpi_spec::mcfg::McfgSegmentBusRange;
use pci_core::spec::caps::CapabilityId;
use pci_core::spec::caps::pci_express::DeviceCapabilities2;
use pci_core::spec::caps::pci_express::DeviceControl2;
use pci_core::spec::caps::pci_express::DevicePortType;
use pci_core::spec::caps::pci_express::LinkCapabilities;
use pci_core::spec::caps::pci_express::PciExpressCapabilities;
use pci_core::spec::caps::pci_express::PciExpressCapabilityHeader;
use pci_core::spec::cfg_space;
use pci_core::spec::cfg_space::HeaderType;
use pci_core::spec::cfg_space::Status;
use pci_core::spec::ext_caps::ExtendedCapabilityHeader;
use pci_core::spec::ext_caps::ExtendedCapabilityId;
use pci_core::spec::hwid::ClassCode;
use pci_core::spec::hwid::Subclass;
use std::cell::Cell;
use std::collections::BTreeMap;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

pub const NVIDIA: u16 = 0x10de;
pub const INTEL: u16 = 0x8086;

/// Offset of the PCI Express capability in functions built by
/// [`TestFunction::with_pcie`] callers below. A power management capability
/// precedes it so capability walks take more than one step.
pub const PCIE_CAP: u16 = 0x60;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// The 4 KiB configuration space of one function.
#[derive(Clone)]
pub struct TestFunction {
    cfg: Vec<u8>,
    pcie_cap: Option<u16>,
    last_cap: Option<u16>,
    last_ext_cap: Option<u16>,
}

impl TestFunction {
    pub fn new(vendor_id: u16, device_id: u16, class: ClassCode, subclass: Subclass) -> Self {
        let mut function = Self {
            cfg: vec![0; cfg_space::EXTENDED_CONFIG_SPACE_SIZE.into()],
            pcie_cap: None,
            last_cap: None,
            last_ext_cap: None,
        };
        function.write_u16(0x00, vendor_id);
        function.write_u16(0x02, device_id);
        function.write_u8(cfg_space::SUBCLASS_CLASS_WORD, subclass.0);
        function.write_u8(cfg_space::SUBCLASS_CLASS_WORD + 1, class.0);
        function
    }

    /// A VGA controller.
    pub fn endpoint(vendor_id: u16, device_id: u16) -> Self {
        Self::new(
            vendor_id,
            device_id,
            ClassCode::DISPLAY_CONTROLLER,
            Subclass::DISPLAY_CONTROLLER_VGA,
        )
    }

    /// A PCI-to-PCI bridge forwarding to `secondary_bus`.
    pub fn bridge(vendor_id: u16, device_id: u16, primary_bus: u8, secondary_bus: u8) -> Self {
        let mut function = Self::new(
            vendor_id,
            device_id,
            ClassCode::BRIDGE,
            Subclass::BRIDGE_PCI_TO_PCI,
        );
        function.write_u8(
            cfg_space::HEADER_TYPE_BYTE,
            HeaderType::new().with_layout(1).into_bits(),
        );
        function.write_u8(cfg_space::PRIMARY_BUS_BYTE, primary_bus);
        function.write_u8(cfg_space::SECONDARY_BUS_BYTE, secondary_bus);
        function.write_u8(cfg_space::SUBORDINATE_BUS_BYTE, secondary_bus);
        function
    }

    /// A PCIe bridge with a power management capability at 0x40 followed by a
    /// PCI Express capability at [`PCIE_CAP`].
    pub fn pcie_bridge(
        vendor_id: u16,
        device_id: u16,
        primary_bus: u8,
        secondary_bus: u8,
        port_type: DevicePortType,
    ) -> Self {
        Self::bridge(vendor_id, device_id, primary_bus, secondary_bus)
            .with_capability(0x40, CapabilityId::POWER_MANAGEMENT, 0x0003)
            .with_pcie(PCIE_CAP, port_type)
    }

    pub fn multi_function(mut self) -> Self {
        let header = HeaderType::from_bits(self.read_u8(cfg_space::HEADER_TYPE_BYTE));
        self.write_u8(
            cfg_space::HEADER_TYPE_BYTE,
            header.with_multi_function(true).into_bits(),
        );
        self
    }

    /// Appends a standard capability at `offset` with the given upper 16 bits.
    pub fn with_capability(mut self, offset: u16, id: CapabilityId, upper: u16) -> Self {
        let status = Status::from_bits(self.read_u16(0x06)).with_capabilities_list(true);
        self.write_u16(0x06, status.into_bits());
        match self.last_cap {
            None => self.write_u8(0x34, offset as u8),
            Some(last) => self.write_u8(last + 1, offset as u8),
        }
        self.write_u8(offset, id.0);
        self.write_u8(offset + 1, 0);
        self.write_u16(offset + 2, upper);
        self.last_cap = Some(offset);
        self
    }

    pub fn with_pcie(mut self, offset: u16, port_type: DevicePortType) -> Self {
        let caps = PciExpressCapabilities::new()
            .with_capability_version(2)
            .with_device_port_type(port_type);
        self = self.with_capability(offset, CapabilityId::PCI_EXPRESS, caps.into_bits());
        self.pcie_cap = Some(offset);
        self
    }

    fn write_pcie_register(mut self, register: PciExpressCapabilityHeader, value: u32) -> Self {
        let cap = self.pcie_cap.expect("no pcie capability");
        self.write_u32(cap + register.0, value);
        self
    }

    pub fn with_dev_caps2(self, caps: DeviceCapabilities2) -> Self {
        self.write_pcie_register(PciExpressCapabilityHeader::DEVICE_CAPS_2, caps.into_bits())
    }

    pub fn with_dev_ctl2(self, ctl: DeviceControl2) -> Self {
        self.write_pcie_register(
            PciExpressCapabilityHeader::DEVICE_CTL_STS_2,
            ctl.into_bits().into(),
        )
    }

    pub fn with_link_caps(self, caps: LinkCapabilities) -> Self {
        self.write_pcie_register(PciExpressCapabilityHeader::LINK_CAPS, caps.into_bits())
    }

    pub fn with_pcie_register(self, register: PciExpressCapabilityHeader, value: u32) -> Self {
        self.write_pcie_register(register, value)
    }

    /// Appends an extended capability at `offset` whose registers after the
    /// header are `body`.
    pub fn with_extended_capability(
        mut self,
        offset: u16,
        id: ExtendedCapabilityId,
        body: &[u32],
    ) -> Self {
        if let Some(last) = self.last_ext_cap {
            let header = ExtendedCapabilityHeader::from_bits(self.read_u32(last));
            self.write_u32(last, header.with_next_offset(offset).into_bits());
        } else {
            assert_eq!(offset, 0x100, "extended capabilities start at 0x100");
        }
        let header = ExtendedCapabilityHeader::new()
            .with_capability_id(id.0)
            .with_version(1);
        self.write_u32(offset, header.into_bits());
        for (i, value) in body.iter().enumerate() {
            self.write_u32(offset + 4 + 4 * i as u16, *value);
        }
        self.last_ext_cap = Some(offset);
        self
    }

    pub fn write_u8(&mut self, offset: u16, value: u8) {
        self.cfg[offset as usize] = value;
    }

    pub fn write_u16(&mut self, offset: u16, value: u16) {
        self.cfg[offset as usize..][..2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, offset: u16, value: u32) {
        self.cfg[offset as usize..][..4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn read_u8(&self, offset: u16) -> u8 {
        self.cfg[offset as usize]
    }

    pub fn read_u16(&self, offset: u16) -> u16 {
        u16::from_le_bytes([self.cfg[offset as usize], self.cfg[offset as usize + 1]])
    }

    pub fn read_u32(&self, offset: u16) -> u32 {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(&self.cfg[offset as usize..][..4]);
        u32::from_le_bytes(bytes)
    }
}

/// A set of functions reachable through [`PciConfigIo`].
#[derive(Default)]
pub struct TestPciBus {
    functions: BTreeMap<PciAddress, TestFunction>,
    // functions whose handle is missing but whose config space still answers
    hidden: Vec<PciAddress>,
    native_extended_access: bool,
    reads: Cell<usize>,
    scans: Cell<usize>,
}

impl TestPciBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(mut self, address: PciAddress, function: TestFunction) -> Self {
        self.functions.insert(address, function);
        self
    }

    pub fn with_native_extended_access(mut self) -> Self {
        self.native_extended_access = true;
        self
    }

    /// Makes `address` report as absent.
    pub fn with_hidden(mut self, address: PciAddress) -> Self {
        self.hidden.push(address);
        self
    }

    pub fn function_mut(&mut self, address: PciAddress) -> &mut TestFunction {
        self.functions.get_mut(&address).expect("no such function")
    }

    pub fn functions(&self) -> impl Iterator<Item = (&PciAddress, &TestFunction)> {
        self.functions.iter()
    }

    /// Number of conventional config reads issued so far.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    /// Number of completed bus scans.
    pub fn scans(&self) -> usize {
        self.scans.get()
    }
}

impl PciConfigIo for TestPciBus {
    fn is_present(&self, address: PciAddress) -> bool {
        self.functions.contains_key(&address) && !self.hidden.contains(&address)
    }

    fn read_u32(&self, address: PciAddress, offset: u16) -> u32 {
        self.reads.set(self.reads.get() + 1);
        assert_eq!(offset & 3, 0);
        assert!(offset < cfg_space::CONFIG_SPACE_SIZE);
        match self.functions.get(&address) {
            Some(function) if !self.hidden.contains(&address) => function.read_u32(offset),
            _ => !0,
        }
    }

    fn extended_access_supported(&self, _address: PciAddress) -> bool {
        self.native_extended_access
    }

    fn read_extended_u32(&self, address: PciAddress, offset: u16) -> Option<u32> {
        self.functions
            .get(&address)
            .map(|function| function.read_u32(offset))
    }

    fn scan_completed(&self) {
        self.scans.set(self.scans.get() + 1);
    }
}

/// Sparse physical memory made of byte regions.
#[derive(Default)]
pub struct TestPhysicalMemory {
    regions: BTreeMap<u64, Vec<u8>>,
    uefi_rsdp: Option<u64>,
    os_tables: Vec<([u8; 4], Vec<u8>)>,
}

impl TestPhysicalMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, address: u64, bytes: Vec<u8>) -> Self {
        self.regions.insert(address, bytes);
        self
    }

    /// Overwrites bytes inside an existing region.
    pub fn with_bytes(mut self, address: u64, bytes: &[u8]) -> Self {
        let (base, region) = self
            .regions
            .range_mut(..=address)
            .next_back()
            .expect("no region");
        let start = (address - *base) as usize;
        region[start..][..bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn with_uefi_rsdp(mut self, address: u64) -> Self {
        self.uefi_rsdp = Some(address);
        self
    }

    pub fn with_os_table(mut self, signature: [u8; 4], table: Vec<u8>) -> Self {
        self.os_tables.push((signature, table));
        self
    }

    /// Maps the configuration space of every function on `bus` into an ECAM
    /// window at `base`.
    pub fn with_ecam(mut self, base: u64, bus: &TestPciBus) -> Self {
        for (address, function) in bus.functions() {
            self.regions
                .insert(ecam_address(base, *address, 0), function.cfg.clone());
        }
        self
    }
}

impl PhysicalMemory for TestPhysicalMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let err = || MemoryError {
            address,
            len: buf.len(),
        };
        let (base, region) = self.regions.range(..=address).next_back().ok_or_else(err)?;
        let start = (address - base) as usize;
        let bytes = region
            .get(start..)
            .and_then(|rest| rest.get(..buf.len()))
            .ok_or_else(err)?;
        buf.copy_from_slice(bytes);
        Ok(())
    }
}

impl FirmwareServices for TestPhysicalMemory {
    fn uefi_rsdp(&self) -> Option<u64> {
        self.uefi_rsdp
    }

    fn os_acpi_table(&self, signature: [u8; 4]) -> Option<Vec<u8>> {
        self.os_tables
            .iter()
            .find(|(s, _)| *s == signature)
            .map(|(_, table)| table.clone())
    }
}

/// Builds a checksummed ACPI table.
pub fn build_table(signature: [u8; 4], body: &[u8]) -> Vec<u8> {
    let mut header = Header::new_zeroed();
    header.signature = signature;
    header.length = ((Header::SIZE + body.len()) as u32).into();
    header.revision = 1;
    header.oem_id = *b"MSFTVM";
    let mut table = header.as_bytes().to_vec();
    table.extend_from_slice(body);
    table[9] = acpi_spec::checksum(&table);
    table
}

pub fn build_rsdt(entries: &[u32]) -> Vec<u8> {
    let body: Vec<u8> = entries.iter().flat_map(|e| e.to_le_bytes()).collect();
    build_table(*b"RSDT", &body)
}

pub fn build_xsdt(entries: &[u64]) -> Vec<u8> {
    let body: Vec<u8> = entries.iter().flat_map(|e| e.to_le_bytes()).collect();
    build_table(*b"XSDT", &body)
}

pub fn build_mcfg(records: &[McfgSegmentBusRange]) -> Vec<u8> {
    let mut body = vec![0; 8];
    for record in records {
        body.extend_from_slice(record.as_bytes());
    }
    build_table(MCFG_SIGNATURE, &body)
}

/// Builds a 36-byte RSDP with valid checksums.
pub fn build_rsdp(revision: u8, rsdt: u32, xsdt: u64) -> Vec<u8> {
    let mut rsdp = Rsdp::new_zeroed();
    rsdp.signature = RSDP_SIGNATURE;
    rsdp.oem_id = *b"MSFTVM";
    rsdp.revision = revision;
    rsdp.rsdt = rsdt.into();
    rsdp.length = (size_of::<Rsdp>() as u32).into();
    rsdp.xsdt = xsdt.into();
    let mut bytes = rsdp.as_bytes().to_vec();
    bytes[8] = acpi_spec::checksum(&bytes[..RSDP_V1_CHECKSUM_LEN]);
    bytes[32] = acpi_spec::checksum(&bytes);
    bytes
}

pub const HOST_BRIDGE: PciAddress = PciAddress::new(0, 0, 0, 0);
pub const ROOT_PORT: PciAddress = PciAddress::new(0, 0, 1, 0);
pub const SWITCH_PORT: PciAddress = PciAddress::new(0, 0x3f, 0, 0);
pub const GPU: PciAddress = PciAddress::new(0, 0x40, 0, 0);

/// Domain 0 with a GPU at bus 0x40, behind a switch port on bus 0x3f, behind
/// a root port on bus 0.
///
/// The switch port uses `switch_ids`, and every bridge supports and enables
/// LTR and atomics routing. The root port completes 32 and 64-bit atomics.
pub fn switch_topology(switch_ids: (u16, u16)) -> TestPciBus {
    let ltr_caps = DeviceCapabilities2::new()
        .with_ltr_mechanism_supported(true)
        .with_atomic_op_routing_supported(true);
    let ltr_ctl = DeviceControl2::new().with_ltr_mechanism_enable(true);

    TestPciBus::new()
        .with_function(
            HOST_BRIDGE,
            TestFunction::new(INTEL, 0x3e0f, ClassCode::BRIDGE, Subclass::BRIDGE_HOST),
        )
        .with_function(
            ROOT_PORT,
            TestFunction::pcie_bridge(INTEL, 0x1901, 0, 0x3f, DevicePortType::ROOT_PORT)
                .with_dev_caps2(
                    ltr_caps
                        .with_atomic_op_32_bit_completer_supported(true)
                        .with_atomic_op_64_bit_completer_supported(true),
                )
                .with_dev_ctl2(ltr_ctl)
                .with_link_caps(LinkCapabilities::new().with_aspm_support(0b10)),
        )
        .with_function(
            SWITCH_PORT,
            TestFunction::pcie_bridge(
                switch_ids.0,
                switch_ids.1,
                0x3f,
                0x40,
                DevicePortType::DOWNSTREAM_SWITCH_PORT,
            )
            .with_dev_caps2(ltr_caps)
            .with_dev_ctl2(ltr_ctl)
            .with_link_caps(LinkCapabilities::new().with_aspm_support(0b11)),
        )
        .with_function(
            GPU,
            TestFunction::endpoint(NVIDIA, 0x2204).with_pcie(0x60, DevicePortType::ENDPOINT),
        )
}
