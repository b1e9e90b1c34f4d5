// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Indirection over the host network device libraries.
//!
//! Callers look devices up through a provider kept in a process-wide slot
//! instead of calling the libraries directly, so unit tests can install a
//! fake provider and never touch kernel state.

#[macro_use]
extern crate slog;

logging::logger_with_subsystem!(sl, "netdev-utils");

pub mod config;
pub mod vdpa_provider;

pub use config::{PinnedDevice, VdpaConfig};
pub use vdpa_provider::{
    get_vdpa_device_by_pci, get_vdpa_provider, legacy_pinned_devices, pinned_vhost_vdpa_device,
    reset_vdpa_provider, set_vdpa_provider_inst, DefaultVdpaProvider, StaticVdpaProvider,
    VdpaProvider,
};
