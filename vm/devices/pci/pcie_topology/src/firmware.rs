// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Locating ACPI tables in physical memory.
//!
//! The RSDP is found through, in order, the address handed over by UEFI, the
//! first KiB of the Extended BIOS Data Area, and the BIOS ROM window. From
//! there the RSDT or XSDT is walked to find a table by signature.

use crate::config::DiscoveryConfig;
use crate::io::FirmwareServices;
use crate::io::MemoryError;
use acpi_spec::ChecksumError;
use acpi_spec::Header;
use acpi_spec::RSDP_ALIGNMENT;
use acpi_spec::RSDP_SIGNATURE;
use acpi_spec::RSDP_V1_CHECKSUM_LEN;
use acpi_spec::RSDT_SIGNATURE;
use acpi_spec::Rsdp;
use acpi_spec::XSDT_SIGNATURE;
use acpi_spec::mcfg::MCFG_SIGNATURE;
use std::fmt;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::little_endian::U32;
use zerocopy::little_endian::U64;

/// Physical address of the real mode segment of the EBDA.
const EBDA_SEGMENT_POINTER: u64 = 0x40E;
/// Only the first KiB of the EBDA may hold the RSDP.
const EBDA_SCAN_LEN: usize = 0x400;
const BIOS_ROM_BASE: u64 = 0xE0000;
const BIOS_ROM_LEN: usize = 0x20000;

/// Tables larger than this are assumed to be garbage.
const MAX_TABLE_LEN: usize = 0x10_0000;

/// A 4-character ACPI table signature.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Signature(pub [u8; 4]);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

/// Errors locating or validating an ACPI table.
#[derive(Debug, Error)]
pub enum FirmwareTableError {
    /// No strategy produced a valid RSDP.
    #[error("root system description pointer not found")]
    RsdpNotFound,
    /// The root table has no entry with the requested signature.
    #[error("table {0} not found")]
    NotFound(Signature),
    /// The table bytes do not sum to zero.
    #[error("table {signature} checksum mismatch")]
    ChecksumMismatch {
        /// The table that failed validation.
        signature: Signature,
        /// The checksum failure.
        #[source]
        source: ChecksumError,
    },
    /// The table at the given address is not the expected one.
    #[error("expected table signature {expected}, got {found}")]
    SignatureMismatch {
        /// The requested signature.
        expected: Signature,
        /// The signature found in memory.
        found: Signature,
    },
    /// The declared table length is implausible.
    #[error("table {signature} has invalid length {length:#x}")]
    InvalidLength {
        /// The offending table.
        signature: Signature,
        /// The declared length.
        length: usize,
    },
    /// Physical memory could not be read.
    #[error("physical memory access failed")]
    Memory(#[from] MemoryError),
}

/// Where an RSDP was searched for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RsdpSource {
    /// Address provided by UEFI.
    Uefi,
    /// Extended BIOS Data Area.
    Ebda,
    /// BIOS read-only memory window.
    BiosRom,
}

/// The root description table an RSDP points at.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RootTable {
    /// Physical address of the table.
    pub address: u64,
    /// True for an XSDT (64-bit entries), false for an RSDT.
    pub extended: bool,
}

impl RootTable {
    fn signature(&self) -> [u8; 4] {
        if self.extended {
            XSDT_SIGNATURE
        } else {
            RSDT_SIGNATURE
        }
    }
}

/// Finds the RSDT or XSDT, trying each RSDP source in order.
///
/// A failing source is logged and the next one is tried.
pub fn locate_root_table(
    firmware: &dyn FirmwareServices,
    config: &DiscoveryConfig,
) -> Result<RootTable, FirmwareTableError> {
    let mut windows = Vec::new();
    if let Some(address) = firmware.uefi_rsdp() {
        windows.push((RsdpSource::Uefi, address, size_of::<Rsdp>()));
    }

    if config.legacy_bios_scan {
        let mut segment = [0; 2];
        match firmware.read(EBDA_SEGMENT_POINTER, &mut segment) {
            Ok(()) => {
                let ebda = u64::from(u16::from_le_bytes(segment)) << 4;
                if ebda != 0 {
                    windows.push((RsdpSource::Ebda, ebda, EBDA_SCAN_LEN));
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "failed to read the EBDA segment"
                );
            }
        }
        windows.push((RsdpSource::BiosRom, BIOS_ROM_BASE, BIOS_ROM_LEN));
    }

    for (source, base, len) in windows {
        match scan_for_rsdp(firmware, base, len) {
            Ok(Some(root)) => {
                tracing::debug!(
                    ?source,
                    address = root.address,
                    extended = root.extended,
                    "found acpi root table"
                );
                return Ok(root);
            }
            Ok(None) => {
                tracing::debug!(?source, base, "no rsdp in window");
            }
            Err(err) => {
                tracing::warn!(
                    ?source,
                    base,
                    error = &err as &dyn std::error::Error,
                    "rsdp scan failed"
                );
            }
        }
    }

    Err(FirmwareTableError::RsdpNotFound)
}

/// Scans `len` bytes at `base` on 16-byte boundaries for a checksummed RSDP.
fn scan_for_rsdp(
    firmware: &dyn FirmwareServices,
    base: u64,
    len: usize,
) -> Result<Option<RootTable>, FirmwareTableError> {
    let mut window = vec![0; len];
    firmware.read(base, &mut window)?;

    let mut offset = 0;
    while offset + RSDP_V1_CHECKSUM_LEN <= len {
        let candidate = &window[offset..];
        if candidate.starts_with(&RSDP_SIGNATURE)
            && acpi_spec::verify_checksum(&candidate[..RSDP_V1_CHECKSUM_LEN]).is_ok()
        {
            // The extended fields may run past the scanned window.
            let mut bytes = [0; size_of::<Rsdp>()];
            firmware.read(base + offset as u64, &mut bytes)?;
            let rsdp = Rsdp::read_from_bytes(&bytes[..]).map_err(|_| MemoryError {
                address: base + offset as u64,
                len: bytes.len(),
            })?;
            let (address, extended) = rsdp.root_table();
            if address != 0 {
                return Ok(Some(RootTable { address, extended }));
            }
            tracing::debug!(
                revision = rsdp.revision,
                "rsdp has no root table address, continuing scan"
            );
        }
        offset += RSDP_ALIGNMENT;
    }

    Ok(None)
}

/// Validates a complete in-memory table: signature, declared length and
/// checksum. Returns the declared length.
pub fn validate_table(table: &[u8], expected: [u8; 4]) -> Result<usize, FirmwareTableError> {
    let (header, _) = Header::read_from_prefix(table).map_err(|_| {
        FirmwareTableError::InvalidLength {
            signature: Signature(expected),
            length: table.len(),
        }
    })?;
    if header.signature != expected {
        return Err(FirmwareTableError::SignatureMismatch {
            expected: Signature(expected),
            found: Signature(header.signature),
        });
    }
    let len = header.len();
    if len < Header::SIZE || len > table.len() {
        return Err(FirmwareTableError::InvalidLength {
            signature: Signature(expected),
            length: len,
        });
    }
    acpi_spec::verify_checksum(&table[..len]).map_err(|source| {
        tracing::warn!(signature = %Signature(expected), "checksum mismatch");
        FirmwareTableError::ChecksumMismatch {
            signature: Signature(expected),
            source,
        }
    })?;
    Ok(len)
}

/// Reads and validates the table with signature `expected` at `address`.
pub fn read_table(
    firmware: &dyn FirmwareServices,
    address: u64,
    expected: [u8; 4],
) -> Result<Vec<u8>, FirmwareTableError> {
    let mut header = [0; Header::SIZE];
    firmware.read(address, &mut header)?;
    let (parsed, _) = Header::read_from_prefix(&header[..]).map_err(|_| {
        FirmwareTableError::InvalidLength {
            signature: Signature(expected),
            length: 0,
        }
    })?;
    if parsed.signature != expected {
        return Err(FirmwareTableError::SignatureMismatch {
            expected: Signature(expected),
            found: Signature(parsed.signature),
        });
    }
    let len = parsed.len();
    if !(Header::SIZE..=MAX_TABLE_LEN).contains(&len) {
        return Err(FirmwareTableError::InvalidLength {
            signature: Signature(expected),
            length: len,
        });
    }

    let mut table = vec![0; len];
    firmware.read(address, &mut table)?;
    validate_table(&table, expected)?;
    Ok(table)
}

/// Returns the child table addresses listed by a root table body.
fn root_table_entries(body: &[u8], extended: bool) -> Vec<u64> {
    if extended {
        body.chunks_exact(size_of::<u64>())
            .filter_map(|entry| U64::read_from_bytes(entry).ok())
            .map(|entry| entry.get())
            .collect()
    } else {
        body.chunks_exact(size_of::<u32>())
            .filter_map(|entry| U32::read_from_bytes(entry).ok())
            .map(|entry| entry.get().into())
            .collect()
    }
}

/// Finds the physical address of the table with `signature` listed by
/// `root`.
///
/// The root table itself must pass checksum validation. Children that cannot
/// be read are skipped.
pub fn locate_table(
    firmware: &dyn FirmwareServices,
    root: RootTable,
    signature: [u8; 4],
) -> Result<u64, FirmwareTableError> {
    let table = read_table(firmware, root.address, root.signature())?;

    for address in root_table_entries(&table[Header::SIZE..], root.extended) {
        if address == 0 {
            continue;
        }
        // signature and length
        let mut prefix = [0; 8];
        if let Err(err) = firmware.read(address, &mut prefix) {
            tracing::debug!(
                address,
                error = &err as &dyn std::error::Error,
                "skipping unreadable acpi table"
            );
            continue;
        }
        if prefix[..4] == signature {
            return Ok(address);
        }
    }

    Err(FirmwareTableError::NotFound(Signature(signature)))
}

/// Loads a validated copy of the MCFG table.
///
/// A copy provided by the OS is preferred. Otherwise the table is located
/// through the RSDP.
pub fn load_mcfg(
    firmware: &dyn FirmwareServices,
    config: &DiscoveryConfig,
) -> Result<Vec<u8>, FirmwareTableError> {
    if let Some(mut table) = firmware.os_acpi_table(MCFG_SIGNATURE) {
        match validate_table(&table, MCFG_SIGNATURE) {
            Ok(len) => {
                table.truncate(len);
                return Ok(table);
            }
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "os provided mcfg is invalid, searching firmware"
                );
            }
        }
    }

    let root = locate_root_table(firmware, config)?;
    let address = locate_table(firmware, root, MCFG_SIGNATURE)?;
    read_table(firmware, address, MCFG_SIGNATURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TestPhysicalMemory;
    use crate::test_helpers::build_mcfg;
    use crate::test_helpers::build_rsdp;
    use crate::test_helpers::build_rsdt;
    use crate::test_helpers::build_table;
    use crate::test_helpers::build_xsdt;
    use crate::test_helpers::init_tracing;
    use acpi_spec::mcfg::McfgSegmentBusRange;

    const RSDT_ADDR: u64 = 0x7fe0_0000;
    const XSDT_ADDR: u64 = 0x7fe1_0000;
    const MCFG_ADDR: u64 = 0x7fe2_0000;
    const FACP_ADDR: u64 = 0x7fe3_0000;

    fn legacy_memory() -> TestPhysicalMemory {
        // BDA, EBDA at 0x9fc00 and the BIOS ROM window, all empty
        TestPhysicalMemory::new()
            .with_region(0x400, vec![0; 0x100])
            .with_region(0x9fc00, vec![0; 0x400])
            .with_region(BIOS_ROM_BASE, vec![0; BIOS_ROM_LEN])
            .with_bytes(EBDA_SEGMENT_POINTER, &0x9fc0u16.to_le_bytes())
    }

    fn with_tables(memory: TestPhysicalMemory) -> TestPhysicalMemory {
        let mcfg = build_mcfg(&[McfgSegmentBusRange::new(0xe000_0000, 0, 0, 0xff)]);
        memory
            .with_region(
                RSDT_ADDR,
                build_rsdt(&[FACP_ADDR as u32, MCFG_ADDR as u32]),
            )
            .with_region(XSDT_ADDR, build_xsdt(&[FACP_ADDR, MCFG_ADDR]))
            .with_region(FACP_ADDR, build_table(*b"FACP", &[0; 16]))
            .with_region(MCFG_ADDR, mcfg)
    }

    #[test]
    fn test_uefi_rsdp_preferred() {
        init_tracing();
        let memory = with_tables(legacy_memory())
            .with_region(0x1000, build_rsdp(2, RSDT_ADDR as u32, XSDT_ADDR))
            .with_uefi_rsdp(0x1000)
            // a second, v1 pointer in the ROM window must be ignored
            .with_bytes(0xe0010, &build_rsdp(0, RSDT_ADDR as u32, 0));

        let root = locate_root_table(&memory, &DiscoveryConfig::default()).unwrap();
        assert_eq!(
            root,
            RootTable {
                address: XSDT_ADDR,
                extended: true
            }
        );
    }

    #[test]
    fn test_ebda_then_rom_scan() {
        init_tracing();
        let config = DiscoveryConfig::default().with_legacy_bios_scan(true);

        let memory =
            with_tables(legacy_memory()).with_bytes(0xf0120, &build_rsdp(0, RSDT_ADDR as u32, 0));
        let root = locate_root_table(&memory, &config).unwrap();
        assert_eq!(
            root,
            RootTable {
                address: RSDT_ADDR,
                extended: false
            }
        );

        // the EBDA wins over the ROM window
        let memory = memory.with_bytes(0x9fc40, &build_rsdp(2, RSDT_ADDR as u32, XSDT_ADDR));
        let root = locate_root_table(&memory, &config).unwrap();
        assert!(root.extended);
    }

    #[test]
    fn test_rsdp_checksum_rejected() {
        init_tracing();
        let mut rsdp = build_rsdp(0, RSDT_ADDR as u32, 0);
        rsdp[RSDP_V1_CHECKSUM_LEN - 1] ^= 0xff;
        let memory = legacy_memory().with_bytes(0xe0000, &rsdp);

        let config = DiscoveryConfig::default().with_legacy_bios_scan(true);
        let err = locate_root_table(&memory, &config).unwrap_err();
        assert!(matches!(err, FirmwareTableError::RsdpNotFound));
    }

    #[test]
    fn test_unaligned_rsdp_ignored() {
        let memory = legacy_memory().with_bytes(0xe0008, &build_rsdp(0, RSDT_ADDR as u32, 0));
        let config = DiscoveryConfig::default().with_legacy_bios_scan(true);
        let err = locate_root_table(&memory, &config).unwrap_err();
        assert!(matches!(err, FirmwareTableError::RsdpNotFound));
    }

    #[test]
    fn test_no_legacy_scan() {
        let memory = legacy_memory().with_bytes(0xe0000, &build_rsdp(0, RSDT_ADDR as u32, 0));
        let err =
            locate_root_table(&memory, &DiscoveryConfig::default().with_legacy_bios_scan(false))
                .unwrap_err();
        assert!(matches!(err, FirmwareTableError::RsdpNotFound));
    }

    #[test]
    fn test_locate_table() {
        init_tracing();
        let memory = with_tables(TestPhysicalMemory::new());
        for root in [
            RootTable {
                address: RSDT_ADDR,
                extended: false,
            },
            RootTable {
                address: XSDT_ADDR,
                extended: true,
            },
        ] {
            assert_eq!(
                locate_table(&memory, root, MCFG_SIGNATURE).unwrap(),
                MCFG_ADDR
            );
            let err = locate_table(&memory, root, *b"SSDT").unwrap_err();
            assert!(matches!(err, FirmwareTableError::NotFound(Signature(s)) if &s == b"SSDT"));
        }
    }

    #[test]
    fn test_locate_table_skips_unreadable_children() {
        let memory = TestPhysicalMemory::new()
            .with_region(RSDT_ADDR, build_rsdt(&[0xdead_0000, MCFG_ADDR as u32]))
            .with_region(
                MCFG_ADDR,
                build_mcfg(&[McfgSegmentBusRange::new(0xe000_0000, 0, 0, 0xff)]),
            );
        let root = RootTable {
            address: RSDT_ADDR,
            extended: false,
        };
        assert_eq!(
            locate_table(&memory, root, MCFG_SIGNATURE).unwrap(),
            MCFG_ADDR
        );
    }

    #[test]
    fn test_root_table_checksum_rejected() {
        init_tracing();
        let mut xsdt = build_xsdt(&[MCFG_ADDR]);
        // corrupt an entry byte, not the checksum field
        let last = xsdt.len() - 1;
        xsdt[last] ^= 0x01;
        let memory = TestPhysicalMemory::new().with_region(XSDT_ADDR, xsdt);
        let root = RootTable {
            address: XSDT_ADDR,
            extended: true,
        };
        let err = locate_table(&memory, root, MCFG_SIGNATURE).unwrap_err();
        assert!(matches!(err, FirmwareTableError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_rsdt_checksum_rejected() {
        init_tracing();
        let mut rsdt = build_rsdt(&[MCFG_ADDR as u32]);
        let last = rsdt.len() - 1;
        rsdt[last] ^= 0x01;
        let memory = TestPhysicalMemory::new()
            .with_region(RSDT_ADDR, rsdt)
            .with_region(
                MCFG_ADDR,
                build_mcfg(&[McfgSegmentBusRange::new(0xe000_0000, 0, 0, 0xff)]),
            );
        let root = RootTable {
            address: RSDT_ADDR,
            extended: false,
        };
        let err = locate_table(&memory, root, MCFG_SIGNATURE).unwrap_err();
        assert!(matches!(
            err,
            FirmwareTableError::ChecksumMismatch { signature: Signature(s), .. } if &s == b"RSDT"
        ));
    }

    #[test]
    fn test_mcfg_checksum_rejected() {
        init_tracing();
        let mut mcfg = build_mcfg(&[McfgSegmentBusRange::new(0xe000_0000, 0, 0, 0xff)]);
        mcfg[50] ^= 0x10;
        let memory = TestPhysicalMemory::new()
            .with_region(RSDT_ADDR, build_rsdt(&[MCFG_ADDR as u32]))
            .with_region(MCFG_ADDR, mcfg)
            .with_region(0x1000, build_rsdp(0, RSDT_ADDR as u32, 0))
            .with_uefi_rsdp(0x1000);
        let root = RootTable {
            address: RSDT_ADDR,
            extended: false,
        };

        // the root table is intact, so the child is still located by signature
        assert_eq!(
            locate_table(&memory, root, MCFG_SIGNATURE).unwrap(),
            MCFG_ADDR
        );
        // but reading it rejects the corrupt copy
        let err = load_mcfg(&memory, &DiscoveryConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            FirmwareTableError::ChecksumMismatch { signature: Signature(s), .. } if &s == b"MCFG"
        ));
    }

    #[test]
    fn test_root_signature_checked() {
        let memory = with_tables(TestPhysicalMemory::new());
        // an RSDT read as an XSDT
        let root = RootTable {
            address: RSDT_ADDR,
            extended: true,
        };
        let err = locate_table(&memory, root, MCFG_SIGNATURE).unwrap_err();
        assert!(matches!(err, FirmwareTableError::SignatureMismatch { .. }));
    }

    #[test]
    fn test_load_mcfg_prefers_os_copy() {
        let os_copy = build_mcfg(&[McfgSegmentBusRange::new(0xc000_0000, 0, 0, 0x7f)]);
        let memory = with_tables(TestPhysicalMemory::new())
            .with_region(0x1000, build_rsdp(2, RSDT_ADDR as u32, XSDT_ADDR))
            .with_uefi_rsdp(0x1000)
            .with_os_table(MCFG_SIGNATURE, os_copy.clone());
        let table = load_mcfg(&memory, &DiscoveryConfig::default()).unwrap();
        assert_eq!(table, os_copy);
    }

    #[test]
    fn test_load_mcfg_falls_back_to_firmware() {
        init_tracing();
        let mut bad_copy = build_mcfg(&[McfgSegmentBusRange::new(0xc000_0000, 0, 0, 0x7f)]);
        bad_copy[50] ^= 0x10;
        let memory = with_tables(TestPhysicalMemory::new())
            .with_region(0x1000, build_rsdp(2, RSDT_ADDR as u32, XSDT_ADDR))
            .with_uefi_rsdp(0x1000)
            .with_os_table(MCFG_SIGNATURE, bad_copy);
        let table = load_mcfg(&memory, &DiscoveryConfig::default()).unwrap();
        let records: Vec<_> = acpi_spec::mcfg::records(&table).unwrap().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ecam_base.get(), 0xe000_0000);
    }

    #[test]
    fn test_signature_display() {
        assert_eq!(Signature(*b"MCFG").to_string(), "MCFG");
        assert_eq!(Signature([b'A', 0, b'C', b'D']).to_string(), "A\\x00CD");
    }
}
