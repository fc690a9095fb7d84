// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types and constants specified by the PCI and PCI Express specs.
//!
//! This module MUST NOT contain any vendor-specific constants!

pub mod hwid {
    //! Hardware ID types and constants

    #![expect(missing_docs)] // constants/fields are self-explanatory

    use crate::open_enum::open_enum;
    use core::fmt;

    /// Vendor ID read back from a function that does not exist.
    pub const VENDOR_ID_NONE: u16 = 0xFFFF;

    /// Returns true if `vendor_id` can belong to a present function.
    ///
    /// All-ones is what an unclaimed config read returns, and all-zeros is
    /// never assigned.
    pub const fn is_valid_vendor_id(vendor_id: u16) -> bool {
        vendor_id != VENDOR_ID_NONE && vendor_id != 0
    }

    /// The identity registers of a PCI function, as read from its
    /// configuration space.
    ///
    /// See PCI 2.3 Spec - 6.2.1 for details on each of these fields.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct HardwareIds {
        pub vendor_id: u16,
        pub device_id: u16,
        pub revision_id: u8,
        pub prog_if: ProgrammingInterface,
        pub sub_class: Subclass,
        pub base_class: ClassCode,
        /// Only meaningful for type 0 headers.
        pub type0_sub_vendor_id: u16,
        /// Only meaningful for type 0 headers.
        pub type0_sub_system_id: u16,
    }

    impl HardwareIds {
        /// Placeholder identity used when a port could not be located.
        pub const INVALID: Self = Self {
            vendor_id: VENDOR_ID_NONE,
            device_id: 0xFFFF,
            revision_id: 0,
            prog_if: ProgrammingInterface::NONE,
            sub_class: Subclass::NONE,
            base_class: ClassCode::UNASSIGNED,
            type0_sub_vendor_id: 0,
            type0_sub_system_id: 0,
        };
    }

    open_enum! {
        /// ClassCode identifies the PCI device's type.
        ///
        /// Values pulled from <https://wiki.osdev.org/PCI#Class_Codes>.
        pub enum ClassCode: u8 {
            UNCLASSIFIED = 0x00,
            MASS_STORAGE_CONTROLLER = 0x01,
            NETWORK_CONTROLLER = 0x02,
            DISPLAY_CONTROLLER = 0x03,
            MULTIMEDIA_CONTROLLER = 0x04,
            MEMORY_CONTROLLER = 0x05,
            BRIDGE = 0x06,
            SIMPLE_COMMUNICATION_CONTROLLER = 0x07,
            BASE_SYSTEM_PERIPHERAL = 0x08,
            INPUT_DEVICE_CONTROLLER = 0x09,
            DOCKING_STATION = 0x0A,
            PROCESSOR = 0x0B,
            SERIAL_BUS_CONTROLLER = 0x0C,
            WIRELESS_CONTROLLER = 0x0D,
            INTELLIGENT_CONTROLLER = 0x0E,
            SATELLITE_COMMUNICATION_CONTROLLER = 0x0F,
            ENCRYPTION_CONTROLLER = 0x10,
            SIGNAL_PROCESSING_CONTROLLER = 0x11,
            PROCESSING_ACCELERATOR = 0x12,
            NONESSENTIAL_INSTRUMENTATION = 0x13,
            // 0x14 - 0x3F: Reserved
            CO_PROCESSOR = 0x40,
            // 0x41 - 0xFE: Reserved
            /// Vendor specific
            UNASSIGNED = 0xFF,
        }
    }

    impl ClassCode {
        pub fn is_reserved(&self) -> bool {
            let c = &self.0;
            (0x14..=0x3f).contains(c) || (0x41..=0xfe).contains(c)
        }
    }

    impl fmt::Display for ClassCode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.is_reserved() {
                return write!(f, "RESERVED({:#04x})", self.0);
            }
            fmt::Debug::fmt(self, f)
        }
    }

    impl From<u8> for ClassCode {
        fn from(c: u8) -> Self {
            Self(c)
        }
    }

    impl From<ClassCode> for u8 {
        fn from(c: ClassCode) -> Self {
            c.0
        }
    }

    // Most subclass values don't have names that can easily be made into
    // identifiers, so only the ones the topology code classifies on are here.

    open_enum! {
        /// SubclassCode identifies the PCI device's function.
        ///
        /// Values pulled from <https://wiki.osdev.org/PCI#Class_Codes>.
        pub enum Subclass: u8 {
            NONE = 0x00,

            // Display Controller (Class code: 0x03)
            DISPLAY_CONTROLLER_VGA = 0x00,
            DISPLAY_CONTROLLER_XGA = 0x01,
            DISPLAY_CONTROLLER_3D = 0x02,

            // Bridge (Class code: 0x06)
            // Other values: 0x02 - 0x03, 0x05 - 0x0A
            BRIDGE_HOST = 0x00,
            BRIDGE_ISA = 0x01,
            BRIDGE_PCI_TO_PCI = 0x04,
            BRIDGE_OTHER = 0x80,
        }
    }

    impl From<u8> for Subclass {
        fn from(c: u8) -> Self {
            Self(c)
        }
    }

    impl From<Subclass> for u8 {
        fn from(c: Subclass) -> Self {
            c.0
        }
    }

    open_enum! {
        /// ProgrammingInterface (aka, program interface byte) identifies the PCI device's
        /// register-level programming interface.
        pub enum ProgrammingInterface: u8 {
            NONE = 0x00,
        }
    }

    impl From<u8> for ProgrammingInterface {
        fn from(c: u8) -> Self {
            Self(c)
        }
    }

    impl From<ProgrammingInterface> for u8 {
        fn from(c: ProgrammingInterface) -> Self {
            c.0
        }
    }
}

/// Configuration Space
///
/// Sources: PCI 2.3 Spec - Chapter 6
#[expect(missing_docs)] // primarily enums/structs with self-explanatory variants
pub mod cfg_space {
    use crate::open_enum::open_enum;
    use bitfield_struct::bitfield;
    use zerocopy::FromBytes;
    use zerocopy::Immutable;
    use zerocopy::IntoBytes;
    use zerocopy::KnownLayout;

    /// Size of the conventional configuration space.
    pub const CONFIG_SPACE_SIZE: u16 = 0x100;

    /// Size of the PCI Express extended configuration space of one function.
    pub const EXTENDED_CONFIG_SPACE_SIZE: u16 = 0x1000;

    open_enum! {
        /// Common configuration space header registers shared between Type 0 and Type 1 headers.
        ///
        /// | Offset | Bits 31-24     | Bits 23-16  | Bits 15-8     | Bits 7-0             |
        /// |--------|----------------|-------------|---------------|----------------------|
        /// | 0x0    | Device ID      |             | Vendor ID     |                      |
        /// | 0x4    | Status         |             | Command       |                      |
        /// | 0x8    | Class code     | Subclass    | Prog IF       | Revision ID          |
        /// | 0xC    | BIST           | Header type | Latency Timer | Cache Line Size      |
        /// | 0x34   | Reserved       |             |               | Capabilities Pointer |
        pub enum CommonHeader: u16 {
            DEVICE_VENDOR       = 0x00,
            STATUS_COMMAND      = 0x04,
            CLASS_REVISION      = 0x08,
            BIST_HEADER         = 0x0C,
            RESERVED_CAP_PTR    = 0x34,
        }
    }

    /// Byte offset of the subclass/base class word within `CLASS_REVISION`.
    pub const SUBCLASS_CLASS_WORD: u16 = 0x0A;

    /// Byte offset of the header type byte within `BIST_HEADER`.
    pub const HEADER_TYPE_BYTE: u16 = 0x0E;

    open_enum! {
        /// Offsets into the type 00h configuration space header.
        ///
        /// Table pulled from <https://wiki.osdev.org/PCI>
        ///
        /// | Offset | Bits 31-24                 | Bits 23-16  | Bits 15-8           | Bits 7-0             |
        /// |--------|----------------------------|-------------|---------------------|--------------------- |
        /// | 0x0    | Device ID                  |             | Vendor ID           |                      |
        /// | 0x4    | Status                     |             | Command             |                      |
        /// | 0x8    | Class code                 |             |                     | Revision ID          |
        /// | 0xC    | BIST                       | Header type | Latency Timer       | Cache Line Size      |
        /// | 0x2C   | Subsystem ID               |             | Subsystem Vendor ID |                      |
        /// | 0x34   | Reserved                   |             |                     | Capabilities Pointer |
        pub enum HeaderType00: u16 {
            DEVICE_VENDOR      = 0x00,
            STATUS_COMMAND     = 0x04,
            CLASS_REVISION     = 0x08,
            BIST_HEADER        = 0x0C,
            SUBSYSTEM_ID       = 0x2C,
            RESERVED_CAP_PTR   = 0x34,
        }
    }

    /// Byte offset of the primary bus number of a type 01h header.
    pub const PRIMARY_BUS_BYTE: u16 = 0x18;
    /// Byte offset of the secondary bus number of a type 01h header.
    pub const SECONDARY_BUS_BYTE: u16 = 0x19;
    /// Byte offset of the subordinate bus number of a type 01h header.
    pub const SUBORDINATE_BUS_BYTE: u16 = 0x1A;
    /// Byte offset of the bridge control word of a type 01h header.
    pub const BRIDGE_CONTROL_WORD: u16 = 0x3E;

    /// Header Type register
    #[bitfield(u8)]
    #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
    pub struct HeaderType {
        /// 0 for endpoints, 1 for PCI-to-PCI bridges, 2 for CardBus bridges.
        #[bits(7)]
        pub layout: u8,
        pub multi_function: bool,
    }

    /// Status Register
    #[bitfield(u16)]
    #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
    pub struct Status {
        #[bits(3)]
        _reserved: u16,
        pub interrupt_status: bool,
        pub capabilities_list: bool,
        pub capable_mhz_66: bool,
        _reserved2: bool,
        pub capable_fast_b2b: bool,
        pub err_master_parity: bool,

        #[bits(2)]
        pub devsel: DevSel,

        pub abort_target_signaled: bool,
        pub abort_target_received: bool,
        pub abort_master_received: bool,
        pub err_signaled: bool,
        pub err_detected_parity: bool,
    }

    #[derive(Debug, PartialEq, Eq)]
    #[repr(u16)]
    pub enum DevSel {
        Fast = 0b00,
        Medium = 0b01,
        Slow = 0b10,
        Reserved = 0b11,
    }

    impl DevSel {
        const fn from_bits(bits: u16) -> Self {
            match bits {
                0b00 => DevSel::Fast,
                0b01 => DevSel::Medium,
                0b10 => DevSel::Slow,
                _ => DevSel::Reserved,
            }
        }

        const fn into_bits(self) -> u16 {
            self as u16
        }
    }

    /// Bridge Control Register (type 01h headers only)
    #[bitfield(u16)]
    #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
    pub struct BridgeControl {
        pub parity_error_response_enable: bool,
        pub serr_enable: bool,
        pub isa_enable: bool,
        /// Forward legacy VGA memory and I/O ranges to the secondary bus.
        pub vga_enable: bool,
        pub vga_16_bit_decode: bool,
        pub master_abort_mode: bool,
        pub secondary_bus_reset: bool,
        pub fast_b2b_enable: bool,
        pub primary_discard_timeout: bool,
        pub secondary_discard_timeout: bool,
        pub discard_timer_status: bool,
        pub discard_timer_serr_enable: bool,
        #[bits(4)]
        _reserved: u16,
    }
}

/// Capabilities
pub mod caps {
    use crate::open_enum::open_enum;

    open_enum! {
        /// Capability IDs
        ///
        /// Sources: PCI 2.3 Spec - Appendix H
        ///
        /// NOTE: this is a non-exhaustive list, so don't be afraid to add new
        /// variants on an as-needed basis!
        pub enum CapabilityId: u8 {
            #![expect(missing_docs)] // self explanatory variants
            POWER_MANAGEMENT = 0x01,
            MSI              = 0x05,
            VENDOR_SPECIFIC  = 0x09,
            PCI_BRIDGE_SUBSYSTEM_VID = 0x0D,
            PCI_EXPRESS      = 0x10,
            MSIX             = 0x11,
        }
    }

    /// The standard capability list is terminated well before this many
    /// entries; a longer chain is a loop.
    pub const MAX_CAPABILITY_ENTRIES: usize = 48;

    /// PCI Express
    #[expect(missing_docs)] // primarily enums/structs with self-explanatory variants
    pub mod pci_express {
        use crate::open_enum::open_enum;
        use bitfield_struct::bitfield;
        use zerocopy::FromBytes;
        use zerocopy::Immutable;
        use zerocopy::IntoBytes;
        use zerocopy::KnownLayout;

        open_enum! {
            /// PCIe Link Speed encoding values for the Max Link Speed field
            /// in Link Capabilities Register and similar fields.
            ///
            /// All other encodings are reserved.
            pub enum LinkSpeed: u32 {
                SPEED_2_5_GTS = 0b0001,
                SPEED_5_0_GTS = 0b0010,
                SPEED_8_0_GTS = 0b0011,
                SPEED_16_0_GTS = 0b0100,
                SPEED_32_0_GTS = 0b0101,
                SPEED_64_0_GTS = 0b0110,
            }
        }

        impl LinkSpeed {
            /// The PCIe generation this encoding corresponds to, if known.
            pub fn generation(&self) -> Option<u8> {
                match self.0 {
                    1..=6 => Some(self.0 as u8),
                    _ => None,
                }
            }
        }

        open_enum! {
            /// PCIe Link Width encoding values for the Max Link Width field
            /// in Link Capabilities Register and similar fields.
            pub enum LinkWidth: u32 {
                X1 = 0b000001,
                X2 = 0b000010,
                X4 = 0b000100,
                X8 = 0b001000,
                X12 = 0b001100,
                X16 = 0b010000,
                X32 = 0b100000,
            }
        }

        open_enum! {
            /// Offsets into the PCI Express Capability Header
            ///
            /// Table pulled from PCI Express Base Specification Rev. 3.0
            ///
            /// | Offset    | Bits 31-24       | Bits 23-16       | Bits 15-8        | Bits 7-0             |
            /// |-----------|------------------|----------------- |------------------|----------------------|
            /// | Cap + 0x0 | PCI Express Capabilities Register   | Next Pointer     | Capability ID (0x10) |
            /// | Cap + 0x4 | Device Capabilities Register                                                  |
            /// | Cap + 0x8 | Device Status    | Device Control                                             |
            /// | Cap + 0xC | Link Capabilities Register                                                    |
            /// | Cap + 0x10| Link Status      | Link Control                                               |
            /// | Cap + 0x14| Slot Capabilities Register                                                    |
            /// | Cap + 0x18| Slot Status      | Slot Control                                               |
            /// | Cap + 0x1C| Root Capabilities| Root Control                                               |
            /// | Cap + 0x20| Root Status Register                                                          |
            /// | Cap + 0x24| Device Capabilities 2 Register                                                |
            /// | Cap + 0x28| Device Status 2  | Device Control 2                                           |
            /// | Cap + 0x2C| Link Capabilities 2 Register                                                  |
            /// | Cap + 0x30| Link Status 2    | Link Control 2                                             |
            pub enum PciExpressCapabilityHeader: u16 {
                PCIE_CAPS           = 0x00,
                DEVICE_CAPS         = 0x04,
                DEVICE_CTL_STS      = 0x08,
                LINK_CAPS           = 0x0C,
                LINK_CTL_STS        = 0x10,
                SLOT_CAPS           = 0x14,
                SLOT_CTL_STS        = 0x18,
                ROOT_CTL_CAPS       = 0x1C,
                ROOT_STS            = 0x20,
                DEVICE_CAPS_2       = 0x24,
                DEVICE_CTL_STS_2    = 0x28,
                LINK_CAPS_2         = 0x2C,
                LINK_CTL_STS_2      = 0x30,
            }
        }

        /// Size of the PCI Express capability structure covered by
        /// [`PciExpressCapabilityHeader`].
        pub const PCI_EXPRESS_CAPABILITY_SIZE: u16 = 0x34;

        /// PCI Express Capabilities Register
        #[bitfield(u16)]
        #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
        pub struct PciExpressCapabilities {
            #[bits(4)]
            pub capability_version: u16,
            #[bits(4)]
            pub device_port_type: DevicePortType,
            pub slot_implemented: bool,
            #[bits(5)]
            pub interrupt_message_number: u16,
            pub _undefined: bool,
            pub flit_mode_supported: bool,
        }

        open_enum! {
            /// Device/Port Type field of the PCI Express Capabilities Register.
            pub enum DevicePortType: u16 {
                ENDPOINT = 0b0000,
                LEGACY_ENDPOINT = 0b0001,
                ROOT_PORT = 0b0100,
                UPSTREAM_SWITCH_PORT = 0b0101,
                DOWNSTREAM_SWITCH_PORT = 0b0110,
                PCIE_TO_PCI_BRIDGE = 0b0111,
                PCI_TO_PCIE_BRIDGE = 0b1000,
                ROOT_COMPLEX_INTEGRATED_ENDPOINT = 0b1001,
                ROOT_COMPLEX_EVENT_COLLECTOR = 0b1010,
            }
        }

        impl DevicePortType {
            const fn from_bits(bits: u16) -> Self {
                Self(bits)
            }

            const fn into_bits(self) -> u16 {
                self.0
            }
        }

        /// Device Status Register
        #[bitfield(u16)]
        #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
        pub struct DeviceStatus {
            pub correctable_error_detected: bool,
            pub non_fatal_error_detected: bool,
            pub fatal_error_detected: bool,
            pub unsupported_request_detected: bool,
            pub aux_power_detected: bool,
            pub transactions_pending: bool,
            #[bits(10)]
            _reserved: u16,
        }

        /// Link Capabilities Register
        #[bitfield(u32)]
        #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
        pub struct LinkCapabilities {
            #[bits(4)]
            pub max_link_speed: u32,
            #[bits(6)]
            pub max_link_width: u32,
            #[bits(2)]
            pub aspm_support: u32,
            #[bits(3)]
            pub l0s_exit_latency: u32,
            #[bits(3)]
            pub l1_exit_latency: u32,
            pub clock_power_management: bool,
            pub surprise_down_error_reporting: bool,
            pub data_link_layer_link_active_reporting: bool,
            pub link_bandwidth_notification_capability: bool,
            pub aspm_optionality_compliance: bool,
            #[bits(1)]
            _reserved: u32,
            #[bits(8)]
            pub port_number: u32,
        }

        impl LinkCapabilities {
            /// ASPM Support bit 0: L0s entry is supported.
            pub fn aspm_l0s_supported(&self) -> bool {
                self.aspm_support() & 0b01 != 0
            }

            /// ASPM Support bit 1: L1 entry is supported.
            pub fn aspm_l1_supported(&self) -> bool {
                self.aspm_support() & 0b10 != 0
            }
        }

        /// Device Capabilities 2 Register
        #[bitfield(u32)]
        #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
        pub struct DeviceCapabilities2 {
            #[bits(4)]
            pub completion_timeout_ranges_supported: u32,
            pub completion_timeout_disable_supported: bool,
            pub ari_forwarding_supported: bool,
            pub atomic_op_routing_supported: bool,
            pub atomic_op_32_bit_completer_supported: bool,
            pub atomic_op_64_bit_completer_supported: bool,
            pub cas_128_bit_completer_supported: bool,
            pub no_ro_enabled_pr_pr_passing: bool,
            pub ltr_mechanism_supported: bool,
            #[bits(2)]
            pub tph_completer_supported: u32,
            #[bits(2)]
            _reserved: u32,
            pub ten_bit_tag_completer_supported: bool,
            pub ten_bit_tag_requester_supported: bool,
            #[bits(2)]
            pub obff_supported: u32,
            pub extended_fmt_field_supported: bool,
            pub end_end_tlp_prefix_supported: bool,
            #[bits(2)]
            pub max_end_end_tlp_prefixes: u32,
            #[bits(2)]
            pub emergency_power_reduction_supported: u32,
            pub emergency_power_reduction_init_required: bool,
            #[bits(1)]
            _reserved: u32,
            pub dmwr_completer_supported: bool,
            #[bits(2)]
            pub dmwr_lengths_supported: u32,
            pub frs_supported: bool,
        }

        /// Device Control 2 Register
        #[bitfield(u16)]
        #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
        pub struct DeviceControl2 {
            #[bits(4)]
            pub completion_timeout_value: u16,
            pub completion_timeout_disable: bool,
            pub ari_forwarding_enable: bool,
            pub atomic_op_requester_enable: bool,
            pub atomic_op_egress_blocking: bool,
            pub ido_request_enable: bool,
            pub ido_completion_enable: bool,
            pub ltr_mechanism_enable: bool,
            pub emergency_power_reduction_request: bool,
            pub ten_bit_tag_requester_enable: bool,
            #[bits(2)]
            pub obff_enable: u16,
            pub end_end_tlp_prefix_blocking: bool,
        }

        /// Link Capabilities 2 Register
        #[bitfield(u32)]
        #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
        pub struct LinkCapabilities2 {
            #[bits(1)]
            _reserved: u32,
            #[bits(7)]
            pub supported_link_speeds_vector: u32,
            pub crosslink_supported: bool,
            #[bits(7)]
            pub lower_skp_os_generation_supported_speeds_vector: u32,
            #[bits(7)]
            pub lower_skp_os_reception_supported_speeds_vector: u32,
            pub retimer_presence_detect_supported: bool,
            pub two_retimers_presence_detect_supported: bool,
            #[bits(6)]
            _reserved2: u32,
            pub drs_supported: bool,
        }
    }
}

/// PCI Express Extended Capabilities
///
/// Sources: PCI Express Base Specification Rev. 4.0 - Section 7.6
pub mod ext_caps {
    use crate::open_enum::open_enum;
    use bitfield_struct::bitfield;
    use zerocopy::FromBytes;
    use zerocopy::Immutable;
    use zerocopy::IntoBytes;
    use zerocopy::KnownLayout;

    /// The first extended capability header always lives here.
    pub const EXTENDED_CAPABILITIES_START: u16 = 0x100;

    /// Upper bound on extended capability headers; each occupies at least
    /// one dword of the 0x100..0x1000 region.
    pub const MAX_EXTENDED_CAPABILITY_ENTRIES: usize = (0x1000 - 0x100) / 4;

    open_enum! {
        /// Extended Capability IDs
        ///
        /// NOTE: this is a non-exhaustive list.
        pub enum ExtendedCapabilityId: u16 {
            #![expect(missing_docs)] // self explanatory variants
            NULL                        = 0x0000,
            ADVANCED_ERROR_REPORTING    = 0x0001,
            VIRTUAL_CHANNEL             = 0x0002,
            DEVICE_SERIAL_NUMBER        = 0x0003,
            VENDOR_SPECIFIC             = 0x000B,
            ACCESS_CONTROL_SERVICES     = 0x000D,
            ALTERNATIVE_ROUTING_ID      = 0x000E,
            SINGLE_ROOT_IO_VIRTUALIZATION = 0x0010,
            LATENCY_TOLERANCE_REPORTING = 0x0018,
            L1_PM_SUBSTATES             = 0x001E,
        }
    }

    /// Extended Capability Header
    ///
    /// | Bits 31-20          | Bits 19-16 | Bits 15-0               |
    /// |---------------------|------------|-------------------------|
    /// | Next Capability Ofs | Version    | Extended Capability ID  |
    #[bitfield(u32)]
    #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
    pub struct ExtendedCapabilityHeader {
        /// Raw capability ID, see [`ExtendedCapabilityId`].
        #[bits(16)]
        pub capability_id: u16,
        /// Capability structure version.
        #[bits(4)]
        pub version: u8,
        /// Offset of the next header, or 0 at the end of the list.
        #[bits(12)]
        pub next_offset: u16,
    }

    impl ExtendedCapabilityHeader {
        /// The capability ID as an [`ExtendedCapabilityId`].
        pub fn id(&self) -> ExtendedCapabilityId {
            ExtendedCapabilityId(self.capability_id())
        }
    }

    /// Advanced Error Reporting
    #[expect(missing_docs)] // primarily enums/structs with self-explanatory variants
    pub mod aer {
        use crate::open_enum::open_enum;

        open_enum! {
            /// Offsets into the AER Extended Capability
            ///
            /// | Offset     | Register                                   |
            /// |------------|--------------------------------------------|
            /// | Cap + 0x00 | Extended Capability Header                 |
            /// | Cap + 0x04 | Uncorrectable Error Status                 |
            /// | Cap + 0x08 | Uncorrectable Error Mask                   |
            /// | Cap + 0x0C | Uncorrectable Error Severity               |
            /// | Cap + 0x10 | Correctable Error Status                   |
            /// | Cap + 0x14 | Correctable Error Mask                     |
            /// | Cap + 0x18 | Advanced Error Capabilities and Control    |
            /// | Cap + 0x1C | Header Log (4 dwords)                      |
            pub enum AerCapabilityHeader: u16 {
                HEADER                   = 0x00,
                UNCORRECTABLE_STATUS     = 0x04,
                UNCORRECTABLE_MASK       = 0x08,
                UNCORRECTABLE_SEVERITY   = 0x0C,
                CORRECTABLE_STATUS       = 0x10,
                CORRECTABLE_MASK         = 0x14,
                ADVANCED_CAPS_CTL        = 0x18,
                HEADER_LOG               = 0x1C,
            }
        }

        /// Number of dwords in the header log.
        pub const HEADER_LOG_DWORDS: usize = 4;
    }

    /// L1 PM Substates
    #[expect(missing_docs)] // primarily enums/structs with self-explanatory variants
    pub mod l1ss {
        use crate::open_enum::open_enum;
        use bitfield_struct::bitfield;
        use zerocopy::FromBytes;
        use zerocopy::Immutable;
        use zerocopy::IntoBytes;
        use zerocopy::KnownLayout;

        open_enum! {
            /// Offsets into the L1 PM Substates Extended Capability
            pub enum L1SubstatesCapabilityHeader: u16 {
                HEADER    = 0x00,
                CAPS      = 0x04,
                CONTROL_1 = 0x08,
                CONTROL_2 = 0x0C,
            }
        }

        /// L1 PM Substates Capabilities Register
        #[bitfield(u32)]
        #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
        pub struct L1SubstatesCapabilities {
            pub pci_pm_l1_2_supported: bool,
            pub pci_pm_l1_1_supported: bool,
            pub aspm_l1_2_supported: bool,
            pub aspm_l1_1_supported: bool,
            pub l1_pm_substates_supported: bool,
            pub link_activation_supported: bool,
            #[bits(2)]
            _reserved: u32,
            #[bits(8)]
            pub port_common_mode_restore_time: u32,
            #[bits(2)]
            pub port_t_power_on_scale: u32,
            #[bits(1)]
            _reserved2: u32,
            #[bits(5)]
            pub port_t_power_on_value: u32,
            #[bits(8)]
            _reserved3: u32,
        }

        /// L1 PM Substates Control 1 Register
        #[bitfield(u32)]
        #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
        pub struct L1SubstatesControl1 {
            pub pci_pm_l1_2_enable: bool,
            pub pci_pm_l1_1_enable: bool,
            pub aspm_l1_2_enable: bool,
            pub aspm_l1_1_enable: bool,
            pub link_activation_interrupt_enable: bool,
            pub link_activation_control: bool,
            #[bits(2)]
            _reserved: u32,
            #[bits(8)]
            pub common_mode_restore_time: u32,
            #[bits(10)]
            pub ltr_l1_2_threshold_value: u32,
            #[bits(3)]
            _reserved2: u32,
            #[bits(3)]
            pub ltr_l1_2_threshold_scale: u32,
        }
    }

    /// Access Control Services
    #[expect(missing_docs)] // primarily enums/structs with self-explanatory variants
    pub mod acs {
        use crate::open_enum::open_enum;
        use bitfield_struct::bitfield;
        use zerocopy::FromBytes;
        use zerocopy::Immutable;
        use zerocopy::IntoBytes;
        use zerocopy::KnownLayout;

        open_enum! {
            /// Offsets into the ACS Extended Capability
            ///
            /// | Offset     | Bits 31-16          | Bits 15-0              |
            /// |------------|---------------------|------------------------|
            /// | Cap + 0x00 | Extended Capability Header                   |
            /// | Cap + 0x04 | ACS Control         | ACS Capability         |
            /// | Cap + 0x08 | Egress Control Vector                        |
            pub enum AcsCapabilityHeader: u16 {
                HEADER                = 0x00,
                CAPS                  = 0x04,
                CONTROL               = 0x06,
                EGRESS_CONTROL_VECTOR = 0x08,
            }
        }

        /// ACS Capability Register. The low seven bits of the ACS Control
        /// Register enable the matching features.
        #[bitfield(u16)]
        #[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
        pub struct AcsCapabilities {
            pub source_validation: bool,
            pub translation_blocking: bool,
            pub p2p_request_redirect: bool,
            pub p2p_completion_redirect: bool,
            pub upstream_forwarding: bool,
            pub p2p_egress_control: bool,
            pub direct_translated_p2p: bool,
            pub enhanced_capability: bool,
            #[bits(8)]
            pub egress_control_vector_size: u16,
        }
    }
}
