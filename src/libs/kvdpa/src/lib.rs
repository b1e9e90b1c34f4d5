// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Discovery of vDPA devices through sysfs.
//!
//! A vDPA device lives on the `vdpa` bus and is backed by a management
//! device (usually a PCI function). Depending on the driver it is bound to,
//! it is exposed to user space either as a vhost-vdpa character device or
//! as a virtio-net interface in the host kernel.

#[macro_use]
extern crate slog;

// Convenience macro to obtain the scoped logger
macro_rules! sl {
    () => {
        slog_scope::logger().new(o!("subsystem" => "kvdpa"))
    };
}

mod device;
mod error;
mod mgmtdev;
mod pci;
mod sysfs;

pub use device::{VdpaDevice, VdpaDriver, VhostVdpa, VirtioNet};
pub use error::{Result, VdpaError};
pub use mgmtdev::{MgmtDev, PCI_BUS_NAME};
pub use pci::PciAddress;
pub use sysfs::{VdpaBus, DEV_ROOT, SYSFS_ROOT};
