// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI Express memory mapped configuration space base address description
//! table (MCFG).

use crate::Header;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::little_endian::U16;
use zerocopy::little_endian::U32;
use zerocopy::little_endian::U64;

/// MCFG table signature.
pub const MCFG_SIGNATURE: [u8; 4] = *b"MCFG";

/// The fixed portion of the MCFG table, preceding the allocation records.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct McfgHeader {
    /// Standard description table header.
    pub header: Header,
    /// Reserved, must be zero.
    pub rsvd: [u8; 8],
}

const_assert_eq!(size_of::<McfgHeader>(), 44);

impl McfgHeader {
    /// Offset of the first allocation record.
    pub const SIZE: usize = size_of::<Self>();
}

/// Configuration Space Base Address Allocation Structure.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct McfgSegmentBusRange {
    /// Physical base address of the enhanced configuration space window.
    pub ecam_base: U64,
    /// PCI segment group (domain) number.
    pub segment: U16,
    /// First bus decoded by this window.
    pub start_bus: u8,
    /// Last bus decoded by this window.
    pub end_bus: u8,
    /// Reserved.
    pub rsvd: U32,
}

const_assert_eq!(size_of::<McfgSegmentBusRange>(), 16);

impl McfgSegmentBusRange {
    /// Size of one allocation record.
    pub const SIZE: usize = size_of::<Self>();

    /// Builds a record for `segment` decoding `start_bus..=end_bus`.
    pub fn new(ecam_base: u64, segment: u16, start_bus: u8, end_bus: u8) -> Self {
        Self {
            ecam_base: ecam_base.into(),
            segment: segment.into(),
            start_bus,
            end_bus,
            rsvd: U32::ZERO,
        }
    }
}

/// Iterates the allocation records following the MCFG header.
///
/// `table` is the full table as described by its header length. Trailing
/// bytes too short to hold a record are ignored. Returns `None` if `table` is
/// shorter than the fixed header.
pub fn records(table: &[u8]) -> Option<impl Iterator<Item = McfgSegmentBusRange> + '_> {
    let body = table.get(McfgHeader::SIZE..)?;
    Some(
        body.chunks_exact(McfgSegmentBusRange::SIZE)
            .filter_map(|chunk| McfgSegmentBusRange::read_from_bytes(chunk).ok()),
    )
}
