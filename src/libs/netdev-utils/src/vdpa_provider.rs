// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arc_swap::ArcSwap;
use kvdpa::{MgmtDev, PciAddress, VdpaBus, VdpaDevice, VdpaDriver, VhostVdpa, PCI_BUS_NAME};
use lazy_static::lazy_static;

use crate::config::{PinnedDevice, VdpaConfig};

/// Look up the vDPA device created on a PCI function.
pub trait VdpaProvider: Send + Sync {
    fn get_vdpa_device_by_pci(&self, pci_addr: &str) -> Result<VdpaDevice>;
}

lazy_static! {
    static ref VDPA_PROVIDER: ArcSwap<Box<dyn VdpaProvider>> =
        ArcSwap::from_pointee(process_default_provider());
}

fn process_default_provider() -> Box<dyn VdpaProvider> {
    let bus = VdpaBus::default();
    let pinned = legacy_pinned_devices();
    Box::new(DefaultVdpaProvider::new(bus).with_pinned_devices(&pinned))
}

/// Provider used by functions that need the vdpa library.
pub fn get_vdpa_provider() -> Arc<Box<dyn VdpaProvider>> {
    VDPA_PROVIDER.load_full()
}

/// Install `inst` as the process-wide provider, returning the previous one.
///
/// Meant for unit tests in other crates. Holders of the previous provider
/// keep using it until they drop it.
pub fn set_vdpa_provider_inst(inst: Box<dyn VdpaProvider>) -> Arc<Box<dyn VdpaProvider>> {
    VDPA_PROVIDER.swap(Arc::new(inst))
}

/// Reinstall the provider the process starts with.
pub fn reset_vdpa_provider() {
    VDPA_PROVIDER.store(Arc::new(process_default_provider()));
}

pub fn get_vdpa_device_by_pci(pci_addr: &str) -> Result<VdpaDevice> {
    get_vdpa_provider().get_vdpa_device_by_pci(pci_addr)
}

/// The original pair of pinned devices, `0000:65:00.2` and `0000:65:00.3`.
pub fn legacy_pinned_devices() -> Vec<PinnedDevice> {
    vec![
        PinnedDevice::new("0000:65:00.2", "vhost-vdpa-0"),
        PinnedDevice::new("0000:65:00.3", "vhost-vdpa-1"),
    ]
}

/// Fake vhost-vdpa device for `pci_addr`, shaped like the ones pinned by
/// [`DefaultVdpaProvider`]: named `vdpa:<pci_addr>`, created on a bus-less
/// management device named after the PCI address.
pub fn pinned_vhost_vdpa_device(pci_addr: &str, vhost_name: &str, dev_root: &Path) -> VdpaDevice {
    VdpaDevice {
        name: format!("vdpa:{}", pci_addr),
        driver: Some(VdpaDriver::VhostVdpa),
        mgmt_dev: MgmtDev::new("", pci_addr),
        vhost_vdpa: Some(VhostVdpa {
            name: vhost_name.to_string(),
            path: dev_root.join(vhost_name).to_string_lossy().into_owned(),
        }),
        virtio_net: None,
        parent_device_path: pci_addr.to_string(),
    }
}

// Canonical `dddd:bb:ss.f` form of `pci_addr`, or `pci_addr` itself when it
// does not parse.
fn canonical_pci_address(pci_addr: &str) -> String {
    pci_addr
        .parse::<PciAddress>()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| pci_addr.to_string())
}

/// Provider backed by the kvdpa library, with an optional table of pinned
/// devices answered without querying it.
#[derive(Debug)]
pub struct DefaultVdpaProvider {
    bus: VdpaBus,
    pinned: HashMap<String, VdpaDevice>,
}

impl Default for DefaultVdpaProvider {
    fn default() -> Self {
        DefaultVdpaProvider::new(VdpaBus::default())
    }
}

impl DefaultVdpaProvider {
    pub fn new(bus: VdpaBus) -> Self {
        DefaultVdpaProvider {
            bus,
            pinned: HashMap::new(),
        }
    }

    pub fn from_config(config: &VdpaConfig) -> Result<Self> {
        config.validate().context("validate vdpa config")?;

        let bus = VdpaBus::new(&config.sysfs_root, &config.dev_root);
        Ok(DefaultVdpaProvider::new(bus).with_pinned_devices(&config.pinned_devices))
    }

    pub fn with_pinned_devices(mut self, pinned: &[PinnedDevice]) -> Self {
        for p in pinned {
            let pci_addr = canonical_pci_address(&p.pci_address);
            let device = pinned_vhost_vdpa_device(&pci_addr, &p.vhost_vdpa, self.bus.dev_root());
            self.pinned.insert(pci_addr, device);
        }
        self
    }

    pub fn bus(&self) -> &VdpaBus {
        &self.bus
    }
}

impl VdpaProvider for DefaultVdpaProvider {
    fn get_vdpa_device_by_pci(&self, pci_addr: &str) -> Result<VdpaDevice> {
        if let Some(device) = self.pinned.get(&canonical_pci_address(pci_addr)) {
            debug!(sl!(), "use pinned vdpa device"; "pci_address" => pci_addr, "name" => device.name());
            return Ok(device.clone());
        }

        // the vdpa library requires the pci address to include the "pci/" prefix
        let full_pci_addr = format!("{}/{}", PCI_BUS_NAME, pci_addr);
        let mut devices = self
            .bus
            .get_devices_by_pci_address(&full_pci_addr)
            .with_context(|| format!("get vdpa devices by pci address {}", full_pci_addr))?;

        match devices.len() {
            0 => {
                return Err(anyhow!(
                    "no vdpa device associated to pciAddress {}",
                    pci_addr
                ))
            }
            1 => {}
            _ => info!(
                sl!(),
                "More than one vDPA device found for pciAddress {}, returning the first one",
                pci_addr
            ),
        }

        Ok(devices.remove(0))
    }
}

/// Provider answering from an in-memory table, for unit tests of callers.
#[derive(Debug, Default, Clone)]
pub struct StaticVdpaProvider {
    devices: HashMap<String, VdpaDevice>,
}

impl StaticVdpaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, pci_addr: &str, device: VdpaDevice) -> Self {
        self.insert(pci_addr, device);
        self
    }

    pub fn insert(&mut self, pci_addr: &str, device: VdpaDevice) -> Option<VdpaDevice> {
        self.devices.insert(pci_addr.to_string(), device)
    }
}

impl VdpaProvider for StaticVdpaProvider {
    fn get_vdpa_device_by_pci(&self, pci_addr: &str) -> Result<VdpaDevice> {
        self.devices
            .get(pci_addr)
            .cloned()
            .ok_or_else(|| anyhow!("no vdpa device associated to pciAddress {}", pci_addr))
    }
}
