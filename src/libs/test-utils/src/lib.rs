// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Fake sysfs/devfs trees for unit tests.
//!
//! The layout mirrors what the kernel exposes for vDPA devices:
//!
//! ```text
//! sys/devices/pci0000:00/0000:65:00.2/subsystem -> sys/bus/pci
//! sys/devices/pci0000:00/0000:65:00.2/vdpa0/driver -> sys/bus/vdpa/drivers/vhost_vdpa
//! sys/devices/pci0000:00/0000:65:00.2/vdpa0/vhost-vdpa-0/
//! sys/bus/vdpa/devices/vdpa0 -> sys/devices/pci0000:00/0000:65:00.2/vdpa0
//! ```

use std::fs;
use std::io::Result;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const PCI_ROOT_BRIDGE: &str = "pci0000:00";

pub struct MockSysfs {
    dir: TempDir,
}

impl MockSysfs {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let mock = MockSysfs { dir };

        fs::create_dir_all(mock.vdpa_bus().join("devices"))?;
        fs::create_dir_all(mock.vdpa_bus().join("drivers"))?;
        fs::create_dir_all(mock.sysfs_root().join("bus").join("pci").join("devices"))?;
        fs::create_dir_all(mock.sysfs_root().join("devices"))?;
        fs::create_dir_all(mock.dev_root())?;

        Ok(mock)
    }

    /// Root of the fake tree, canonicalized so it compares equal to
    /// resolved symlink targets.
    pub fn root(&self) -> PathBuf {
        fs::canonicalize(self.dir.path()).unwrap_or_else(|_| self.dir.path().to_path_buf())
    }

    pub fn sysfs_root(&self) -> PathBuf {
        self.root().join("sys")
    }

    pub fn dev_root(&self) -> PathBuf {
        self.root().join("dev")
    }

    fn vdpa_bus(&self) -> PathBuf {
        self.sysfs_root().join("bus").join("vdpa")
    }

    /// Create a PCI function that can act as a management device.
    pub fn add_pci_parent(&self, pci_addr: &str) -> Result<PathBuf> {
        let path = self
            .sysfs_root()
            .join("devices")
            .join(PCI_ROOT_BRIDGE)
            .join(pci_addr);
        fs::create_dir_all(&path)?;
        symlink(self.sysfs_root().join("bus").join("pci"), path.join("subsystem"))?;
        symlink(
            &path,
            self.sysfs_root()
                .join("bus")
                .join("pci")
                .join("devices")
                .join(pci_addr),
        )?;
        Ok(path)
    }

    /// Create a bus-less management device such as `vdpasim_net`.
    pub fn add_virtual_parent(&self, name: &str) -> Result<PathBuf> {
        let path = self.sysfs_root().join("devices").join(name);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Create a vDPA device below `parent` and register it on the vdpa bus.
    pub fn add_vdpa_device(&self, parent: &Path, name: &str, driver: Option<&str>) -> Result<PathBuf> {
        let path = parent.join(name);
        fs::create_dir_all(&path)?;
        symlink(&path, self.vdpa_bus().join("devices").join(name))?;

        if let Some(driver) = driver {
            let driver_path = self.vdpa_bus().join("drivers").join(driver);
            fs::create_dir_all(&driver_path)?;
            symlink(&driver_path, path.join("driver"))?;
        }

        Ok(path)
    }

    /// Add the vhost-vdpa child created by the `vhost_vdpa` driver.
    pub fn add_vhost_vdpa(&self, device: &Path, vhost_name: &str) -> Result<()> {
        fs::create_dir_all(device.join(vhost_name))?;
        fs::write(self.dev_root().join(vhost_name), b"")
    }

    /// Add the virtio child created by the `virtio_vdpa` driver with a netdev.
    pub fn add_virtio_net(&self, device: &Path, virtio_name: &str, net_dev: &str) -> Result<()> {
        fs::create_dir_all(device.join(virtio_name).join("net").join(net_dev))
    }

    /// Drop the vdpa bus, as if the vdpa module was not loaded.
    pub fn remove_vdpa_bus(&self) -> Result<()> {
        fs::remove_dir_all(self.vdpa_bus())
    }
}
