// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VdpaError>;

#[derive(Error, Debug)]
pub enum VdpaError {
    #[error("invalid pci address {0:?}")]
    InvalidPciAddress(String),
    #[error("invalid management device name {0:?}")]
    InvalidMgmtDev(String),
    #[error("vdpa bus not found at {0:?}, is the vdpa module loaded?")]
    BusNotFound(PathBuf),
    #[error("invalid vdpa device name {0:?}")]
    InvalidDeviceName(String),
    #[error("vdpa device {0} not found")]
    DeviceNotFound(String),
    #[error("vdpa device {device} is bound to unsupported driver {driver}")]
    UnsupportedDriver { device: String, driver: String },
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl VdpaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        VdpaError::Io {
            path: path.into(),
            source,
        }
    }
}
