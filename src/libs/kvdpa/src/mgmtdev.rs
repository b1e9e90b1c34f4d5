// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{PciAddress, Result, VdpaError};

pub const PCI_BUS_NAME: &str = "pci";

const MGMTDEV_DELIMITER: char = '/';

/// The device a vDPA device is created on, identified as `[bus/]device`.
///
/// Hardware backed management devices sit on the PCI bus
/// (`pci/0000:65:00.2`), software ones such as `vdpasim_net` have no bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MgmtDev {
    bus_name: String,
    dev_name: String,
}

impl MgmtDev {
    pub fn new(bus_name: &str, dev_name: &str) -> Self {
        MgmtDev {
            bus_name: bus_name.to_owned(),
            dev_name: dev_name.to_owned(),
        }
    }

    pub fn pci(addr: &PciAddress) -> Self {
        MgmtDev::new(PCI_BUS_NAME, &addr.to_string())
    }

    /// Bus name, empty for bus-less management devices.
    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn dev_name(&self) -> &str {
        &self.dev_name
    }

    pub fn name(&self) -> String {
        if self.bus_name.is_empty() {
            self.dev_name.clone()
        } else {
            [self.bus_name.as_str(), self.dev_name.as_str()].join("/")
        }
    }

    pub fn is_pci(&self) -> bool {
        self.bus_name == PCI_BUS_NAME
    }
}

impl FromStr for MgmtDev {
    type Err = VdpaError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || VdpaError::InvalidMgmtDev(s.to_string());

        let parts: Vec<&str> = s.split(MGMTDEV_DELIMITER).collect();
        let (bus_name, dev_name) = match parts.as_slice() {
            [dev] => ("", *dev),
            [bus, dev] if !bus.is_empty() => (*bus, *dev),
            _ => return Err(invalid()),
        };
        if dev_name.is_empty() {
            return Err(invalid());
        }

        if bus_name == PCI_BUS_NAME {
            let addr: PciAddress = dev_name.parse().map_err(|_| invalid())?;
            return Ok(MgmtDev::pci(&addr));
        }

        Ok(MgmtDev::new(bus_name, dev_name))
    }
}

impl fmt::Display for MgmtDev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
