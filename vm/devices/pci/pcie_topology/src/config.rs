// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Discovery configuration.

use crate::MAX_BUSES;

/// Knobs controlling topology discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Running without a hypervisor. A device whose upstream port cannot be
    /// found is then a fatal topology error instead of an expected
    /// virtualization artifact.
    pub bare_metal: bool,
    /// Scan the EBDA and the BIOS ROM window for the RSDP when firmware did
    /// not hand one over. Only meaningful on x86.
    pub legacy_bios_scan: bool,
    /// Number of buses enumerated per domain, `1..=256`.
    pub scan_bus_limit: u16,
    /// The OS permits mapping ECAM windows into the driver. When false,
    /// extended configuration space is only reached through the OS and the
    /// MCFG table is not consulted.
    pub ecam_mapping_allowed: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bare_metal: false,
            legacy_bios_scan: cfg!(any(target_arch = "x86", target_arch = "x86_64")),
            scan_bus_limit: MAX_BUSES,
            ecam_mapping_allowed: true,
        }
    }
}

impl DiscoveryConfig {
    /// Sets [`Self::bare_metal`].
    pub fn with_bare_metal(mut self, bare_metal: bool) -> Self {
        self.bare_metal = bare_metal;
        self
    }

    /// Sets [`Self::legacy_bios_scan`].
    pub fn with_legacy_bios_scan(mut self, legacy_bios_scan: bool) -> Self {
        self.legacy_bios_scan = legacy_bios_scan;
        self
    }

    /// Sets [`Self::ecam_mapping_allowed`].
    pub fn with_ecam_mapping_allowed(mut self, allowed: bool) -> Self {
        self.ecam_mapping_allowed = allowed;
        self
    }

    /// Sets [`Self::scan_bus_limit`], clamped to the architectural maximum.
    pub fn with_scan_bus_limit(mut self, limit: u16) -> Self {
        self.scan_bus_limit = limit.min(MAX_BUSES);
        self
    }
}
