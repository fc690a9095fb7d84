// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Interfaces to the platform consumed by topology discovery.
//!
//! Only reads are expressed here. Discovery never changes hardware state.

use crate::PciAddress;
use thiserror::Error;

/// Conventional (0..0x100) configuration space access, typically through an
/// OS-provided handle per function.
pub trait PciConfigIo {
    /// Returns true if the platform can reach the function at `address`.
    ///
    /// A function without a handle is treated as absent.
    fn is_present(&self, address: PciAddress) -> bool;

    /// Reads the dword at `offset`, which must be dword aligned.
    ///
    /// Reads of absent functions return all ones.
    fn read_u32(&self, address: PciAddress, offset: u16) -> u32;

    /// Reads the word at `offset`.
    fn read_u16(&self, address: PciAddress, offset: u16) -> u16 {
        let dword = self.read_u32(address, offset & !3);
        (dword >> ((offset & 2) * 8)) as u16
    }

    /// Reads the byte at `offset`.
    fn read_u8(&self, address: PciAddress, offset: u16) -> u8 {
        let dword = self.read_u32(address, offset & !3);
        (dword >> ((offset & 3) * 8)) as u8
    }

    /// Returns true if the platform can service extended (0x100..0x1000)
    /// configuration reads for `address` natively, without a memory mapped
    /// window.
    fn extended_access_supported(&self, address: PciAddress) -> bool {
        let _ = address;
        false
    }

    /// Reads an extended configuration dword through the native path.
    ///
    /// Only called when [`Self::extended_access_supported`] returned true.
    fn read_extended_u32(&self, address: PciAddress, offset: u16) -> Option<u32> {
        let _ = (address, offset);
        None
    }

    /// Invoked after a full bus scan, which can take long enough to trip
    /// the platform's cooperative execution timeout.
    fn scan_completed(&self) {}
}

/// Error returned when physical memory cannot be read.
#[derive(Debug, Error)]
#[error("failed to read {len:#x} bytes of physical memory at {address:#x}")]
pub struct MemoryError {
    /// Start of the failed read.
    pub address: u64,
    /// Length of the failed read.
    pub len: usize,
}

/// Read access to physical memory, used for ACPI tables and memory mapped
/// extended configuration space.
pub trait PhysicalMemory {
    /// Fills `buf` with the bytes at physical `address`.
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Reads a little-endian dword at physical `address`.
    fn read_u32(&self, address: u64) -> Result<u32, MemoryError> {
        let mut buf = [0; 4];
        self.read(address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

/// Firmware services used to find ACPI tables.
pub trait FirmwareServices: PhysicalMemory {
    /// The RSDP address handed over by UEFI, if the platform booted that way.
    fn uefi_rsdp(&self) -> Option<u64> {
        None
    }

    /// A copy of the ACPI table with `signature`, if the OS exposes one.
    fn os_acpi_table(&self, signature: [u8; 4]) -> Option<Vec<u8>> {
        let _ = signature;
        None
    }
}
