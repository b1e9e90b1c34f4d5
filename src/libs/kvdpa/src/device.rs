// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{MgmtDev, VdpaError};

pub const VHOST_VDPA_DRIVER: &str = "vhost_vdpa";
pub const VIRTIO_VDPA_DRIVER: &str = "virtio_vdpa";

/// Bus drivers a vDPA device can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VdpaDriver {
    /// Exposes the device to user space as `/dev/vhost-vdpa-N`.
    #[serde(rename = "vhost_vdpa")]
    VhostVdpa,
    /// Hands the device to the host kernel virtio stack.
    #[serde(rename = "virtio_vdpa")]
    VirtioVdpa,
}

impl VdpaDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            VdpaDriver::VhostVdpa => VHOST_VDPA_DRIVER,
            VdpaDriver::VirtioVdpa => VIRTIO_VDPA_DRIVER,
        }
    }
}

impl FromStr for VdpaDriver {
    type Err = VdpaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            VHOST_VDPA_DRIVER => Ok(VdpaDriver::VhostVdpa),
            VIRTIO_VDPA_DRIVER => Ok(VdpaDriver::VirtioVdpa),
            _ => Err(VdpaError::UnsupportedDriver {
                device: String::new(),
                driver: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for VdpaDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// vhost-vdpa character device, e.g. `vhost-vdpa-0` at `/dev/vhost-vdpa-0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VhostVdpa {
    pub name: String,
    pub path: String,
}

impl VhostVdpa {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// virtio device created by `virtio_vdpa` and the netdev on top of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtioNet {
    pub name: String,
    pub net_dev: String,
}

impl VirtioNet {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn net_dev(&self) -> &str {
        &self.net_dev
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdpaDevice {
    pub name: String,
    pub driver: Option<VdpaDriver>,
    pub mgmt_dev: MgmtDev,
    pub vhost_vdpa: Option<VhostVdpa>,
    pub virtio_net: Option<VirtioNet>,
    pub parent_device_path: String,
}

impl VdpaDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the bound driver, empty if the device is unbound.
    pub fn driver(&self) -> &str {
        self.driver.map(|d| d.as_str()).unwrap_or_default()
    }

    pub fn mgmt_dev(&self) -> &MgmtDev {
        &self.mgmt_dev
    }

    pub fn vhost_vdpa(&self) -> Option<&VhostVdpa> {
        self.vhost_vdpa.as_ref()
    }

    pub fn virtio_net(&self) -> Option<&VirtioNet> {
        self.virtio_net.as_ref()
    }

    pub fn parent_device_path(&self) -> &str {
        &self.parent_device_path
    }
}
