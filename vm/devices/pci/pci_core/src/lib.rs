// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Core PCI types and register definitions shared by the PCI Express topology
//! discovery code.

#![forbid(unsafe_code)]

mod open_enum;
pub mod spec;
