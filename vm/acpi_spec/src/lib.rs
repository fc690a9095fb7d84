// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Byte layouts of the ACPI tables needed to locate PCIe enhanced
//! configuration space: the RSDP, the common System Description Table header,
//! and the MCFG table.
//!
//! All multi-byte fields are little-endian, as mandated by the ACPI
//! specification.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod mcfg;

use static_assertions::const_assert_eq;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::little_endian::U32;
use zerocopy::little_endian::U64;

/// Signature at the start of the Root System Description Pointer.
pub const RSDP_SIGNATURE: [u8; 8] = *b"RSD PTR ";

/// Number of bytes covered by the ACPI 1.0 RSDP checksum.
pub const RSDP_V1_CHECKSUM_LEN: usize = 20;

/// The RSDP always starts on a 16-byte boundary.
pub const RSDP_ALIGNMENT: usize = 16;

/// Root System Description Table signature.
pub const RSDT_SIGNATURE: [u8; 4] = *b"RSDT";

/// Extended System Description Table signature.
pub const XSDT_SIGNATURE: [u8; 4] = *b"XSDT";

/// Root System Description Pointer.
///
/// The trailing extended fields (`length` onward) are only meaningful when
/// `revision` is greater than 1.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
#[expect(missing_docs)] // fields named as in the ACPI spec
pub struct Rsdp {
    pub signature: [u8; 8],
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub revision: u8,
    pub rsdt: U32,
    pub length: U32,
    pub xsdt: U64,
    pub xchecksum: u8,
    pub rsvd: [u8; 3],
}

const_assert_eq!(size_of::<Rsdp>(), 36);

impl Rsdp {
    /// Revisions above this value carry an XSDT address.
    pub const LAST_RSDT_REVISION: u8 = 1;

    /// Returns the physical address of the root table this pointer selects,
    /// and whether it is an XSDT.
    pub fn root_table(&self) -> (u64, bool) {
        if self.revision > Self::LAST_RSDT_REVISION {
            (self.xsdt.get(), true)
        } else {
            (self.rsdt.get().into(), false)
        }
    }
}

/// Header shared by every System Description Table.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
#[expect(missing_docs)] // fields named as in the ACPI spec
pub struct Header {
    pub signature: [u8; 4],
    pub length: U32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_tableid: [u8; 8],
    pub oem_revision: U32,
    pub creator_id: [u8; 4],
    pub creator_revision: U32,
}

const_assert_eq!(size_of::<Header>(), 36);

impl Header {
    /// Size of the header in bytes.
    pub const SIZE: usize = size_of::<Self>();

    /// The declared length of the whole table, header included.
    pub fn len(&self) -> usize {
        self.length.get() as usize
    }
}

/// Error returned when a table does not sum to zero.
#[derive(Debug, Error)]
#[error("checksum mismatch: bytes sum to {0:#04x}")]
pub struct ChecksumError(pub u8);

/// Returns the 8-bit wrapping sum of `data`.
pub fn byte_sum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Validates that `data` sums to zero modulo 256.
pub fn verify_checksum(data: &[u8]) -> Result<(), ChecksumError> {
    match byte_sum(data) {
        0 => Ok(()),
        sum => Err(ChecksumError(sum)),
    }
}

/// Computes the value that makes `data` sum to zero when stored in its
/// checksum byte, assuming that byte is currently zero.
pub fn checksum(data: &[u8]) -> u8 {
    0u8.wrapping_sub(byte_sum(data))
}
