// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Result, VdpaError};

const PCI_MAX_SLOT: u8 = 0x1f;
const PCI_MAX_FUNCTION: u8 = 0x7;

lazy_static! {
    // [domain:]bus:slot.function
    static ref PCI_ADDRESS_RE: Regex = Regex::new(
        r"^(?:(?P<domain>[[:xdigit:]]{4}):)?(?P<bus>[[:xdigit:]]{2}):(?P<slot>[[:xdigit:]]{2})\.(?P<func>[[:xdigit:]])$"
    )
    .unwrap();
}

/// PCI address of a function, e.g. `0000:65:00.2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PciAddress {
    pub domain: u16,
    pub bus: u8,
    pub slot: u8,
    pub function: u8,
}

impl PciAddress {
    pub fn new(domain: u16, bus: u8, slot: u8, function: u8) -> Result<Self> {
        if slot > PCI_MAX_SLOT || function > PCI_MAX_FUNCTION {
            return Err(VdpaError::InvalidPciAddress(format!(
                "{:04x}:{:02x}:{:02x}.{:x}",
                domain, bus, slot, function
            )));
        }
        Ok(PciAddress {
            domain,
            bus,
            slot,
            function,
        })
    }
}

impl FromStr for PciAddress {
    type Err = VdpaError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || VdpaError::InvalidPciAddress(s.to_string());
        let caps = PCI_ADDRESS_RE.captures(s).ok_or_else(invalid)?;

        // the regex guarantees hex digits of bounded width
        let domain = match caps.name("domain") {
            Some(m) => u16::from_str_radix(m.as_str(), 16).map_err(|_| invalid())?,
            None => 0,
        };
        let bus = u8::from_str_radix(&caps["bus"], 16).map_err(|_| invalid())?;
        let slot = u8::from_str_radix(&caps["slot"], 16).map_err(|_| invalid())?;
        let function = u8::from_str_radix(&caps["func"], 16).map_err(|_| invalid())?;

        PciAddress::new(domain, bus, slot, function).map_err(|_| invalid())
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.slot, self.function
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pci_address() {
        let addr: PciAddress = "0000:65:00.2".parse().unwrap();
        assert_eq!(addr, PciAddress::new(0, 0x65, 0, 2).unwrap());
        assert_eq!(addr.to_string(), "0000:65:00.2");

        // short form implies domain 0
        let addr: PciAddress = "3b:1f.7".parse().unwrap();
        assert_eq!(addr.to_string(), "0000:3b:1f.7");

        // upper case digits are canonicalized
        let addr: PciAddress = "00AF:B4:05.1".parse().unwrap();
        assert_eq!(addr.domain, 0xaf);
        assert_eq!(addr.to_string(), "00af:b4:05.1");
    }

    #[test]
    fn test_parse_invalid_pci_address() {
        for s in [
            "",
            "pci/0000:65:00.2",
            "0000:65:00",
            "0000:65:00.8",
            "0000:65:20.0",
            "00000:65:00.2",
            "0000:6g:00.2",
            " 0000:65:00.2",
        ] {
            let err = s.parse::<PciAddress>().unwrap_err();
            assert!(
                matches!(err, VdpaError::InvalidPciAddress(ref a) if a == s),
                "{:?} should be rejected, got {:?}",
                s,
                err
            );
        }
    }

    #[test]
    fn test_new_rejects_out_of_range() {
        assert!(PciAddress::new(0, 0, 0x20, 0).is_err());
        assert!(PciAddress::new(0, 0, 0, 8).is_err());
        assert!(PciAddress::new(0xffff, 0xff, 0x1f, 7).is_ok());
    }
}
