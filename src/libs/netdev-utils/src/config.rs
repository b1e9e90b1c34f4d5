// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use kvdpa::{PciAddress, DEV_ROOT, SYSFS_ROOT};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref VHOST_VDPA_NAME_RE: Regex = Regex::new(r"^vhost-vdpa-[0-9]+$").unwrap();
}

/// A PCI address answered with a fixed vhost-vdpa device, without asking
/// the vdpa library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedDevice {
    pub pci_address: String,
    pub vhost_vdpa: String,
}

impl PinnedDevice {
    pub fn new(pci_address: &str, vhost_vdpa: &str) -> Self {
        PinnedDevice {
            pci_address: pci_address.to_owned(),
            vhost_vdpa: vhost_vdpa.to_owned(),
        }
    }
}

/// Configuration of the vDPA provider.
///
/// ```toml
/// sysfs_root = "/sys"
/// dev_root = "/dev"
///
/// [[pinned_devices]]
/// pci_address = "0000:65:00.2"
/// vhost_vdpa = "vhost-vdpa-0"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VdpaConfig {
    pub sysfs_root: PathBuf,
    pub dev_root: PathBuf,
    pub pinned_devices: Vec<PinnedDevice>,
}

impl Default for VdpaConfig {
    fn default() -> Self {
        VdpaConfig {
            sysfs_root: PathBuf::from(SYSFS_ROOT),
            dev_root: PathBuf::from(DEV_ROOT),
            pinned_devices: vec![],
        }
    }
}

impl VdpaConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("read vdpa config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("load vdpa config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: VdpaConfig = toml::from_str(content).context("parse toml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for pinned in self.pinned_devices.iter() {
            let addr = pinned
                .pci_address
                .parse::<PciAddress>()
                .with_context(|| format!("pinned device {}", pinned.pci_address))?;

            if !VHOST_VDPA_NAME_RE.is_match(&pinned.vhost_vdpa) {
                return Err(anyhow!(
                    "pinned device {}: invalid vhost-vdpa name {:?}",
                    pinned.pci_address,
                    pinned.vhost_vdpa
                ));
            }

            // short and uppercase forms name the same function
            if !seen.insert(addr) {
                return Err(anyhow!(
                    "pinned device {} is configured more than once",
                    pinned.pci_address
                ));
            }
        }

        Ok(())
    }
}
