// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-chipset knowledge that firmware does not describe.
//!
//! Entries are keyed by the vendor and device ID of the function they apply
//! to: the first host bridge at initialization, or a root port once a
//! device's topology is resolved.

use crate::caps::AspmFeasibility;
use crate::ecam::ConfigSpaceBase;
use std::collections::HashMap;
use std::collections::TryReserveError;
use thiserror::Error;

const INTEL_VENDOR_ID: u16 = 0x8086;
const AMD_VENDOR_ID: u16 = 0x1022;

/// Offset of the AER capability Intel 5000 series root ports implement
/// without listing it.
const INTEL_5000_HIDDEN_AER_OFFSET: u16 = 0x1c0;

const L1_ONLY: AspmFeasibility = AspmFeasibility {
    l0s_supported: false,
    l1_supported: true,
};

const NO_ASPM: AspmFeasibility = AspmFeasibility {
    l0s_supported: false,
    l1_supported: false,
};

/// Errors from chipset setup.
#[derive(Debug, Error)]
pub enum ChipsetError {
    /// Recording a hard-coded window failed.
    #[error("out of memory recording chipset configuration space base")]
    ResourceExhausted(#[from] TryReserveError),
}

/// Platform state filled in by chipset setup, before MCFG is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipsetSetup {
    /// Extended configuration space is known to be reachable.
    pub config_accessible: bool,
    /// Do not consult MCFG. Only honored together with
    /// [`Self::config_accessible`].
    pub skip_mcfg: bool,
    /// ECAM windows known without firmware tables.
    pub bases: Vec<ConfigSpaceBase>,
    /// ASPM states validated on this platform.
    pub aspm_allowed: AspmFeasibility,
}

impl Default for ChipsetSetup {
    fn default() -> Self {
        Self {
            config_accessible: false,
            skip_mcfg: false,
            bases: Vec::new(),
            aspm_allowed: AspmFeasibility::ALL,
        }
    }
}

/// What sets a chipset apart from a well behaved one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChipsetFamily {
    /// Nothing beyond what firmware reports.
    Generic,
    /// ASPM is only validated for some link states.
    AspmLimited(AspmFeasibility),
    /// An ECAM window that firmware does not report.
    FixedEcam(ConfigSpaceBase),
    /// A root port implementing AER at a fixed offset without listing it in
    /// its extended capabilities.
    HiddenAer {
        /// Offset of the AER capability.
        offset: u16,
    },
}

impl ChipsetFamily {
    /// Applies the family's platform setup.
    pub fn setup(&self, setup: &mut ChipsetSetup) -> Result<(), ChipsetError> {
        match *self {
            ChipsetFamily::Generic | ChipsetFamily::HiddenAer { .. } => {}
            ChipsetFamily::AspmLimited(allowed) => {
                setup.aspm_allowed = setup.aspm_allowed.restrict(allowed);
            }
            ChipsetFamily::FixedEcam(base) => {
                setup.bases.try_reserve(1)?;
                setup.bases.push(base);
                setup.config_accessible = true;
            }
        }
        Ok(())
    }

    /// The ASPM states a port of this family may use.
    pub fn aspm_allowed(&self) -> AspmFeasibility {
        match *self {
            ChipsetFamily::AspmLimited(allowed) => allowed,
            _ => AspmFeasibility::ALL,
        }
    }

    /// The offset of an unlisted AER capability.
    pub fn hidden_aer_offset(&self) -> Option<u16> {
        match *self {
            ChipsetFamily::HiddenAer { offset } => Some(offset),
            _ => None,
        }
    }
}

/// A known chipset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChipsetInfo {
    /// Vendor ID of the matched function.
    pub vendor_id: u16,
    /// Device ID of the matched function.
    pub device_id: u16,
    /// Marketing name, for logs.
    pub name: &'static str,
    /// The chipset's quirks.
    pub family: ChipsetFamily,
}

impl ChipsetInfo {
    const fn new(
        vendor_id: u16,
        device_id: u16,
        name: &'static str,
        family: ChipsetFamily,
    ) -> Self {
        Self {
            vendor_id,
            device_id,
            name,
            family,
        }
    }
}

const BUILTIN_CHIPSETS: &[ChipsetInfo] = &[
    ChipsetInfo::new(
        INTEL_VENDOR_ID,
        0x1604,
        "Intel Broadwell-U",
        ChipsetFamily::AspmLimited(NO_ASPM),
    ),
    ChipsetInfo::new(INTEL_VENDOR_ID, 0x1614, "Intel Broadwell-H", ChipsetFamily::Generic),
    ChipsetInfo::new(
        INTEL_VENDOR_ID,
        0x1904,
        "Intel Skylake-U",
        ChipsetFamily::AspmLimited(NO_ASPM),
    ),
    ChipsetInfo::new(
        INTEL_VENDOR_ID,
        0x1910,
        "Intel Skylake-H",
        ChipsetFamily::AspmLimited(L1_ONLY),
    ),
    ChipsetInfo::new(
        INTEL_VENDOR_ID,
        0x191f,
        "Intel Skylake-S",
        ChipsetFamily::AspmLimited(L1_ONLY),
    ),
    ChipsetInfo::new(
        INTEL_VENDOR_ID,
        0x5910,
        "Intel Kaby Lake-H",
        ChipsetFamily::AspmLimited(NO_ASPM),
    ),
    ChipsetInfo::new(INTEL_VENDOR_ID, 0x3e0f, "Intel Coffee Lake", ChipsetFamily::Generic),
    ChipsetInfo::new(
        INTEL_VENDOR_ID,
        0x25f7,
        "Intel 5000 root port",
        ChipsetFamily::HiddenAer {
            offset: INTEL_5000_HIDDEN_AER_OFFSET,
        },
    ),
    ChipsetInfo::new(
        INTEL_VENDOR_ID,
        0x25f8,
        "Intel 5000 root port",
        ChipsetFamily::HiddenAer {
            offset: INTEL_5000_HIDDEN_AER_OFFSET,
        },
    ),
    ChipsetInfo::new(
        INTEL_VENDOR_ID,
        0x25f9,
        "Intel 5000 root port",
        ChipsetFamily::HiddenAer {
            offset: INTEL_5000_HIDDEN_AER_OFFSET,
        },
    ),
    ChipsetInfo::new(
        INTEL_VENDOR_ID,
        0x25fa,
        "Intel 5000 root port",
        ChipsetFamily::HiddenAer {
            offset: INTEL_5000_HIDDEN_AER_OFFSET,
        },
    ),
    ChipsetInfo::new(
        AMD_VENDOR_ID,
        0x1480,
        "AMD Starship root complex",
        ChipsetFamily::AspmLimited(L1_ONLY),
    ),
    ChipsetInfo::new(
        AMD_VENDOR_ID,
        0x1483,
        "AMD Starship root port",
        ChipsetFamily::AspmLimited(L1_ONLY),
    ),
    ChipsetInfo::new(
        AMD_VENDOR_ID,
        0x1630,
        "AMD Renoir root complex",
        ChipsetFamily::AspmLimited(L1_ONLY),
    ),
];

/// Known chipsets, indexed by vendor and device ID.
#[derive(Debug, Clone)]
pub struct ChipsetRegistry {
    entries: HashMap<(u16, u16), ChipsetInfo>,
}

impl ChipsetRegistry {
    /// Creates a registry with no entries.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in chipset table.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for info in BUILTIN_CHIPSETS {
            registry.register(*info);
        }
        registry
    }

    /// Adds or replaces an entry, returning the replaced one.
    pub fn register(&mut self, info: ChipsetInfo) -> Option<ChipsetInfo> {
        self.entries.insert((info.vendor_id, info.device_id), info)
    }

    /// Returns the entry for `vendor_id:device_id`.
    pub fn find(&self, vendor_id: u16, device_id: u16) -> Option<&ChipsetInfo> {
        self.entries.get(&(vendor_id, device_id))
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ChipsetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
