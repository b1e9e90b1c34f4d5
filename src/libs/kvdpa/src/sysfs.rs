// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::device::{VdpaDevice, VdpaDriver, VhostVdpa, VirtioNet};
use crate::{MgmtDev, Result, VdpaError, PCI_BUS_NAME};

pub const SYSFS_ROOT: &str = "/sys";
pub const DEV_ROOT: &str = "/dev";

const VDPA_BUS_DEVICES: &str = "bus/vdpa/devices";
const VHOST_VDPA_PREFIX: &str = "vhost-vdpa-";
const VIRTIO_PREFIX: &str = "virtio";

/// Read-only view of the vdpa bus rooted at a sysfs mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdpaBus {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl Default for VdpaBus {
    fn default() -> Self {
        VdpaBus::new(SYSFS_ROOT, DEV_ROOT)
    }
}

impl VdpaBus {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(sysfs_root: P, dev_root: Q) -> Self {
        VdpaBus {
            sysfs_root: sysfs_root.as_ref().to_path_buf(),
            dev_root: dev_root.as_ref().to_path_buf(),
        }
    }

    pub fn sysfs_root(&self) -> &Path {
        &self.sysfs_root
    }

    pub fn dev_root(&self) -> &Path {
        &self.dev_root
    }

    fn devices_dir(&self) -> PathBuf {
        self.sysfs_root.join(VDPA_BUS_DEVICES)
    }

    /// All devices on the vdpa bus, ordered by name.
    pub fn list_devices(&self) -> Result<Vec<VdpaDevice>> {
        let mut devices = vec![];
        for name in self.device_names()? {
            let path = match self.resolve_device(&name) {
                Ok(path) => path,
                Err(VdpaError::DeviceNotFound(_)) => {
                    warn!(sl!(), "vdpa device removed while scanning"; "name" => &name);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let mgmt_dev = read_mgmt_dev(parent_dir(&path, &name)?)?;
            devices.push(self.describe_device(&name, &path, mgmt_dev)?);
        }
        Ok(devices)
    }

    // sorted entries of the bus directory
    fn device_names(&self) -> Result<Vec<String>> {
        let dir = self.devices_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(VdpaError::BusNotFound(dir));
            }
            Err(e) => return Err(VdpaError::io(dir, e)),
        };

        let mut names = vec![];
        for entry in entries {
            let entry = entry.map_err(|e| VdpaError::io(&dir, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn resolve_device(&self, name: &str) -> Result<PathBuf> {
        let link = self.devices_dir().join(name);
        match fs::canonicalize(&link) {
            Ok(path) => Ok(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(VdpaError::DeviceNotFound(name.to_string()))
            }
            Err(e) => Err(VdpaError::io(link, e)),
        }
    }

    pub fn get_device(&self, name: &str) -> Result<VdpaDevice> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(VdpaError::InvalidDeviceName(name.to_string()));
        }

        let path = self.resolve_device(name)?;
        let mgmt_dev = read_mgmt_dev(parent_dir(&path, name)?)?;
        self.describe_device(name, &path, mgmt_dev)
    }

    fn describe_device(&self, name: &str, path: &Path, mgmt_dev: MgmtDev) -> Result<VdpaDevice> {
        let parent = parent_dir(path, name)?;

        let driver = read_driver(path, name)?;
        let (vhost_vdpa, virtio_net) = match driver {
            Some(VdpaDriver::VhostVdpa) => (self.read_vhost_vdpa(path)?, None),
            Some(VdpaDriver::VirtioVdpa) => (None, read_virtio_net(path)?),
            None => (None, None),
        };

        let device = VdpaDevice {
            name: name.to_string(),
            driver,
            mgmt_dev,
            vhost_vdpa,
            virtio_net,
            parent_device_path: parent.to_string_lossy().into_owned(),
        };
        debug!(sl!(), "found vdpa device"; "name" => name, "mgmtdev" => device.mgmt_dev.name(), "driver" => device.driver());

        Ok(device)
    }

    /// Devices created on `mgmt_dev`, ordered by name.
    ///
    /// Only the devices sitting on `mgmt_dev` are fully described, so a
    /// broken device elsewhere on the bus does not fail the lookup.
    pub fn get_devices_by_mgmt_dev(&self, mgmt_dev: &MgmtDev) -> Result<Vec<VdpaDevice>> {
        let mut devices = vec![];
        for name in self.device_names()? {
            let path = match self.resolve_device(&name) {
                Ok(path) => path,
                Err(VdpaError::DeviceNotFound(_)) => {
                    warn!(sl!(), "vdpa device removed while scanning"; "name" => &name);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let parent = parent_dir(&path, &name)?;
            if file_name(parent) != mgmt_dev.dev_name() {
                continue;
            }
            let parent_mgmt_dev = read_mgmt_dev(parent)?;
            if &parent_mgmt_dev != mgmt_dev {
                continue;
            }

            devices.push(self.describe_device(&name, &path, parent_mgmt_dev)?);
        }
        Ok(devices)
    }

    /// Devices created on the PCI management device `pci/<address>`.
    ///
    /// The bus prefix is mandatory, a bare PCI address is a bus-less
    /// management device name and never matches a PCI function.
    pub fn get_devices_by_pci_address(&self, pci_addr: &str) -> Result<Vec<VdpaDevice>> {
        let mgmt_dev: MgmtDev = pci_addr.parse()?;
        if !mgmt_dev.is_pci() {
            return Err(VdpaError::InvalidMgmtDev(pci_addr.to_string()));
        }
        self.get_devices_by_mgmt_dev(&mgmt_dev)
    }

    fn read_vhost_vdpa(&self, path: &Path) -> Result<Option<VhostVdpa>> {
        Ok(find_child(path, VHOST_VDPA_PREFIX)?.map(|name| VhostVdpa {
            path: self.dev_root.join(&name).to_string_lossy().into_owned(),
            name,
        }))
    }
}

fn parent_dir<'a>(path: &'a Path, name: &str) -> Result<&'a Path> {
    path.parent()
        .ok_or_else(|| VdpaError::DeviceNotFound(name.to_string()))
}

fn read_driver(path: &Path, name: &str) -> Result<Option<VdpaDriver>> {
    let link = path.join("driver");
    let target = match fs::read_link(&link) {
        Ok(target) => target,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(VdpaError::io(link, e)),
    };

    let driver = file_name(&target);
    driver
        .parse::<VdpaDriver>()
        .map(Some)
        .map_err(|_| VdpaError::UnsupportedDriver {
            device: name.to_string(),
            driver,
        })
}

// The management device is the parent of the vdpa device, it is a PCI
// function when its subsystem is the pci bus. No subsystem link means no bus.
fn read_mgmt_dev(parent: &Path) -> Result<MgmtDev> {
    let dev_name = file_name(parent);
    let link = parent.join("subsystem");
    let is_pci = match fs::read_link(&link) {
        Ok(target) => file_name(&target) == PCI_BUS_NAME,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(VdpaError::io(link, e)),
    };

    if is_pci {
        Ok(MgmtDev::new(PCI_BUS_NAME, &dev_name))
    } else {
        Ok(MgmtDev::new("", &dev_name))
    }
}

fn read_virtio_net(path: &Path) -> Result<Option<VirtioNet>> {
    let virtio = match find_child(path, VIRTIO_PREFIX)? {
        Some(virtio) => virtio,
        None => return Ok(None),
    };

    let net_dir = path.join(&virtio).join("net");
    let mut net_devs = match child_names(&net_dir) {
        Ok(names) => names,
        Err(VdpaError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            warn!(sl!(), "virtio device has no netdev"; "virtio" => &virtio);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    net_devs.sort();

    Ok(net_devs.into_iter().next().map(|net_dev| VirtioNet {
        name: virtio,
        net_dev,
    }))
}

// first child entry (by name) starting with `prefix`
fn find_child(path: &Path, prefix: &str) -> Result<Option<String>> {
    let mut names: Vec<String> = child_names(path)?
        .into_iter()
        .filter(|n| n.starts_with(prefix))
        .collect();
    names.sort();
    Ok(names.into_iter().next())
}

fn child_names(path: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(path).map_err(|e| VdpaError::io(path, e))?;
    let mut names = vec![];
    for entry in entries {
        let entry = entry.map_err(|e| VdpaError::io(path, e))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::MockSysfs;

    fn bus(mock: &MockSysfs) -> VdpaBus {
        VdpaBus::new(mock.sysfs_root(), mock.dev_root())
    }

    #[test]
    fn test_get_vhost_vdpa_device() {
        let mock = MockSysfs::new().unwrap();
        let parent = mock.add_pci_parent("0000:65:00.2").unwrap();
        let dev = mock
            .add_vdpa_device(&parent, "vdpa0", Some("vhost_vdpa"))
            .unwrap();
        mock.add_vhost_vdpa(&dev, "vhost-vdpa-0").unwrap();

        let device = bus(&mock).get_device("vdpa0").unwrap();
        assert_eq!(device.name(), "vdpa0");
        assert_eq!(device.driver(), "vhost_vdpa");
        assert_eq!(device.mgmt_dev(), &MgmtDev::new("pci", "0000:65:00.2"));
        assert_eq!(device.parent_device_path(), parent.to_str().unwrap());

        let vhost = device.vhost_vdpa().unwrap();
        assert_eq!(vhost.name(), "vhost-vdpa-0");
        assert_eq!(
            vhost.path(),
            mock.dev_root().join("vhost-vdpa-0").to_str().unwrap()
        );
        assert!(device.virtio_net().is_none());
    }

    #[test]
    fn test_get_virtio_vdpa_device() {
        let mock = MockSysfs::new().unwrap();
        let parent = mock.add_virtual_parent("vdpasim_net").unwrap();
        let dev = mock
            .add_vdpa_device(&parent, "vdpa1", Some("virtio_vdpa"))
            .unwrap();
        mock.add_virtio_net(&dev, "virtio2", "eth3").unwrap();

        let device = bus(&mock).get_device("vdpa1").unwrap();
        assert_eq!(device.driver(), "virtio_vdpa");
        assert_eq!(device.mgmt_dev().name(), "vdpasim_net");
        assert!(device.vhost_vdpa().is_none());

        let virtio = device.virtio_net().unwrap();
        assert_eq!(virtio.name(), "virtio2");
        assert_eq!(virtio.net_dev(), "eth3");
    }

    #[test]
    fn test_get_unbound_and_missing_device() {
        let mock = MockSysfs::new().unwrap();
        let parent = mock.add_pci_parent("0000:65:00.2").unwrap();
        mock.add_vdpa_device(&parent, "vdpa0", None).unwrap();

        let device = bus(&mock).get_device("vdpa0").unwrap();
        assert!(device.driver.is_none());
        assert_eq!(device.driver(), "");
        assert!(device.vhost_vdpa().is_none());

        assert!(matches!(
            bus(&mock).get_device("vdpa9"),
            Err(VdpaError::DeviceNotFound(ref n)) if n == "vdpa9"
        ));
    }

    #[test]
    fn test_unsupported_driver() {
        let mock = MockSysfs::new().unwrap();
        let parent = mock.add_pci_parent("0000:65:00.2").unwrap();
        mock.add_vdpa_device(&parent, "vdpa0", Some("mlx5_vdpa"))
            .unwrap();

        assert!(matches!(
            bus(&mock).get_device("vdpa0"),
            Err(VdpaError::UnsupportedDriver { ref device, ref driver })
                if device == "vdpa0" && driver == "mlx5_vdpa"
        ));
    }

    #[test]
    fn test_get_devices_by_pci_address() {
        let mock = MockSysfs::new().unwrap();
        let pf2 = mock.add_pci_parent("0000:65:00.2").unwrap();
        let pf3 = mock.add_pci_parent("0000:65:00.3").unwrap();
        for (parent, name) in [(&pf2, "vdpa1"), (&pf2, "vdpa0"), (&pf3, "vdpa2")] {
            let dev = mock
                .add_vdpa_device(parent, name, Some("vhost_vdpa"))
                .unwrap();
            mock.add_vhost_vdpa(&dev, &format!("vhost-vdpa-{}", &name[4..]))
                .unwrap();
        }

        let bus = bus(&mock);
        let devices = bus.get_devices_by_pci_address("pci/0000:65:00.2").unwrap();
        let names: Vec<&str> = devices.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["vdpa0", "vdpa1"]);

        let devices = bus.get_devices_by_pci_address("pci/65:00.3").unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].vhost_vdpa().unwrap().name(), "vhost-vdpa-2");

        assert!(bus
            .get_devices_by_pci_address("pci/0000:66:00.0")
            .unwrap()
            .is_empty());

        // the bus prefix is required
        assert!(matches!(
            bus.get_devices_by_pci_address("0000:65:00.2"),
            Err(VdpaError::InvalidMgmtDev(_))
        ));
        assert!(matches!(
            bus.get_devices_by_pci_address("pci/garbage"),
            Err(VdpaError::InvalidMgmtDev(_))
        ));

        assert_eq!(bus.list_devices().unwrap().len(), 3);
    }

    #[test]
    fn test_get_devices_by_mgmt_dev() {
        let mock = MockSysfs::new().unwrap();
        let sim = mock.add_virtual_parent("vdpasim_net").unwrap();
        let pf = mock.add_pci_parent("0000:65:00.2").unwrap();
        mock.add_vdpa_device(&sim, "vdpa1", None).unwrap();
        mock.add_vdpa_device(&sim, "vdpa0", None).unwrap();
        mock.add_vdpa_device(&pf, "vdpa2", None).unwrap();

        let bus = bus(&mock);
        let devices = bus
            .get_devices_by_mgmt_dev(&"vdpasim_net".parse::<MgmtDev>().unwrap())
            .unwrap();
        let names: Vec<&str> = devices.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["vdpa0", "vdpa1"]);
        assert!(devices.iter().all(|d| d.mgmt_dev().bus_name().is_empty()));

        // same device name, different bus
        assert!(bus
            .get_devices_by_mgmt_dev(&MgmtDev::new("pci", "vdpasim_net"))
            .unwrap()
            .is_empty());

        let devices = bus
            .get_devices_by_mgmt_dev(&MgmtDev::new("pci", "0000:65:00.2"))
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name(), "vdpa2");
    }

    #[test]
    fn test_broken_device_on_other_function() {
        let mock = MockSysfs::new().unwrap();
        let pf2 = mock.add_pci_parent("0000:3b:00.2").unwrap();
        let pf3 = mock.add_pci_parent("0000:3b:00.3").unwrap();
        let dev = mock
            .add_vdpa_device(&pf2, "vdpa0", Some("vhost_vdpa"))
            .unwrap();
        mock.add_vhost_vdpa(&dev, "vhost-vdpa-0").unwrap();
        mock.add_vdpa_device(&pf3, "vdpa1", Some("other_drv"))
            .unwrap();
        // dangling bus entry, as if the device went away mid-scan
        std::os::unix::fs::symlink(
            pf2.join("vdpa9"),
            mock.sysfs_root().join("bus/vdpa/devices/vdpa9"),
        )
        .unwrap();

        let bus = bus(&mock);
        let devices = bus.get_devices_by_pci_address("pci/0000:3b:00.2").unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name(), "vdpa0");

        assert!(matches!(
            bus.get_devices_by_pci_address("pci/0000:3b:00.3"),
            Err(VdpaError::UnsupportedDriver { ref driver, .. }) if driver == "other_drv"
        ));
        assert!(matches!(
            bus.list_devices(),
            Err(VdpaError::UnsupportedDriver { .. })
        ));
    }

    #[test]
    fn test_virtio_net_first_netdev() {
        let mock = MockSysfs::new().unwrap();
        let parent = mock.add_virtual_parent("vdpasim_net").unwrap();
        let dev = mock
            .add_vdpa_device(&parent, "vdpa0", Some("virtio_vdpa"))
            .unwrap();
        mock.add_virtio_net(&dev, "virtio1", "eth5").unwrap();
        mock.add_virtio_net(&dev, "virtio1", "eth2").unwrap();

        let device = bus(&mock).get_device("vdpa0").unwrap();
        let virtio = device.virtio_net().unwrap();
        assert_eq!(virtio.name(), "virtio1");
        assert_eq!(virtio.net_dev(), "eth2");
    }

    #[test]
    fn test_virtio_without_netdev() {
        let mock = MockSysfs::new().unwrap();
        let parent = mock.add_virtual_parent("vdpasim_blk").unwrap();
        let dev = mock
            .add_vdpa_device(&parent, "vdpa0", Some("virtio_vdpa"))
            .unwrap();
        fs::create_dir_all(dev.join("virtio0")).unwrap();

        let device = bus(&mock).get_device("vdpa0").unwrap();
        assert_eq!(device.driver(), "virtio_vdpa");
        assert!(device.virtio_net().is_none());
        assert!(device.vhost_vdpa().is_none());
    }

    #[test]
    fn test_unreadable_subsystem_link() {
        let mock = MockSysfs::new().unwrap();
        let parent = mock.add_virtual_parent("vdpasim_net").unwrap();
        mock.add_vdpa_device(&parent, "vdpa0", None).unwrap();
        // a regular file where a link is expected fails read_link with EINVAL
        fs::write(parent.join("subsystem"), b"").unwrap();

        assert!(matches!(
            bus(&mock).get_device("vdpa0"),
            Err(VdpaError::Io { ref path, .. }) if path.ends_with("subsystem")
        ));
    }

    #[test]
    fn test_invalid_device_name() {
        let mock = MockSysfs::new().unwrap();
        let parent = mock.add_pci_parent("0000:65:00.2").unwrap();
        mock.add_vdpa_device(&parent, "vdpa0", None).unwrap();

        let bus = bus(&mock);
        for name in ["", ".", "..", "../../devices/pci0000:00/0000:65:00.2/vdpa0", "vdpa0/"] {
            assert!(
                matches!(bus.get_device(name), Err(VdpaError::InvalidDeviceName(_))),
                "name {:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_missing_vdpa_bus() {
        let mock = MockSysfs::new().unwrap();
        mock.remove_vdpa_bus().unwrap();

        assert!(matches!(
            bus(&mock).list_devices(),
            Err(VdpaError::BusNotFound(_))
        ));
    }
}
