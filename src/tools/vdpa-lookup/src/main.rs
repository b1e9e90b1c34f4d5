// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::exit;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use kvdpa::VdpaBus;
use netdev_utils::{
    get_vdpa_device_by_pci, legacy_pinned_devices, set_vdpa_provider_inst, DefaultVdpaProvider,
    VdpaConfig,
};
use slog::{debug, o};

const NAME: &str = "vdpa-lookup";

logging::logger_with_subsystem!(sl, "cli");

#[derive(Parser, Debug)]
#[clap(name = "vdpa-lookup", version, about = "Look up vDPA devices by PCI address")]
struct Args {
    /// TOML configuration file
    #[clap(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// One of trace, debug, info, warn, error, critical
    #[clap(long, default_value = "info")]
    log_level: String,

    /// Log as JSON instead of human readable text
    #[clap(long)]
    json_log: bool,

    /// Override the sysfs mount point
    #[clap(long, value_name = "DIR")]
    sysfs_root: Option<PathBuf>,

    /// Override the directory holding vhost-vdpa character devices
    #[clap(long, value_name = "DIR")]
    dev_root: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Show the vDPA device created on a PCI function
    Get {
        /// PCI address, e.g. 0000:65:00.2
        pci_address: String,
    },
    /// List every vDPA device on the bus
    List,
}

fn build_config(args: &Args) -> Result<VdpaConfig> {
    let mut config = match &args.config {
        Some(path) => VdpaConfig::load(path)?,
        None => VdpaConfig {
            pinned_devices: legacy_pinned_devices(),
            ..Default::default()
        },
    };

    if let Some(sysfs_root) = &args.sysfs_root {
        config.sysfs_root = sysfs_root.clone();
    }
    if let Some(dev_root) = &args.dev_root {
        config.dev_root = dev_root.clone();
    }

    Ok(config)
}

fn run(args: &Args, out: &mut dyn Write) -> Result<()> {
    let config = build_config(args).context("build config")?;
    debug!(sl!(), "loaded config"; "config" => format!("{:?}", config));

    let provider = DefaultVdpaProvider::from_config(&config).context("create vdpa provider")?;
    set_vdpa_provider_inst(Box::new(provider));

    let output = match &args.command {
        Command::Get { pci_address } => {
            let device = get_vdpa_device_by_pci(pci_address)?;
            serde_json::to_string_pretty(&device)?
        }
        Command::List => {
            let bus = VdpaBus::new(&config.sysfs_root, &config.dev_root);
            let devices = bus.list_devices().context("list vdpa devices")?;
            serde_json::to_string_pretty(&devices)?
        }
    };

    writeln!(out, "{}", output).context("write output")?;
    Ok(())
}

fn real_main() -> Result<()> {
    let args = Args::parse();

    let level = logging::level_name_to_slog_level(&args.log_level).map_err(|e| anyhow!(e))?;
    let (logger, _async_guard) = if args.json_log {
        logging::create_logger(NAME, "cli", level, io::stderr())
    } else {
        logging::create_term_logger(level)
    };
    let logger = logger.new(o!("subsystem" => "cli"));
    let _guard = slog_scope::set_global_logger(logger);

    run(&args, &mut io::stdout())
}

fn main() {
    if let Err(err) = real_main() {
        eprintln!("Error: {:?}", err);
        exit(1);
    }
}
