// ******************************************************************
// forward-ssdp
//    Relays SSDP multicast between network segments, forging the
//    sender address.
//
// Copyright (c) 2026 forward-ssdp contributors
//
// This program is free software; you can redistribute it and/or
// modify it under the terms of the GNU General Public License
// as published by the Free Software Foundation; either version 2
// of the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
// ******************************************************************
//

#![warn(clippy::undocumented_unsafe_blocks)]
#[cfg(not(any(target_os = "freebsd", target_os = "macos", target_os = "linux")))]
compile_error!("unsupported platform");

mod config;
mod listener;
mod netutil;
mod packet;
mod relay;
mod sender;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;

use crate::netutil::{InterfaceQuery, NetInterface};
use crate::relay::Relay;

const HELP_ABOUT: &str = "
This program joins the SSDP multicast group on each given interface and
forwards every discovery packet to the other interfaces, so that UPnP
devices on disjoint network segments can find each other. Packets are
sent such that they appear to have come from the original sender. With
no interfaces given, every private-network interface is used.
";

#[derive(Parser)]
#[command(version, about = HELP_ABOUT, long_about = None)]
struct Cli {
    #[arg(short, long, default_value_t = false, help = "enables debugging")]
    debugging: bool,
    #[arg(
        long,
        value_name = "FILE",
        help = "reads listen/send interface names from a config file"
    )]
    config: Option<PathBuf>,
    #[arg(
        value_name = "IFNAME",
        help = "interfaces to relay between; auto-selected when omitted"
    )]
    interface_names: Vec<String>,
}

fn main() {
    let args = Cli::parse();

    let mut log_builder = env_logger::Builder::from_default_env();
    if args.debugging {
        log_builder.filter_level(log::LevelFilter::Debug);
    }
    log_builder.format_module_path(false);
    log_builder.format_target(false);
    log_builder.init();

    if let Err(e) = run(&args) {
        log::error!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Cli) -> anyhow::Result<()> {
    let cfg = match &args.config {
        Some(path) => config::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => config::Config::default(),
    };

    let (listen_names, send_names) = if args.interface_names.is_empty() {
        (cfg.listen_if_names, cfg.send_if_names)
    } else {
        (args.interface_names.clone(), args.interface_names.clone())
    };

    let listen_ifs = select_interfaces(&listen_names)?;
    let send_ifs = if send_names == listen_names {
        listen_ifs.clone()
    } else {
        select_interfaces(&send_names)?
    };

    for ifi in &listen_ifs {
        log::info!(
            "Listening on {} ({})",
            ifi.name,
            ifi.hardware_addr.as_ref().map(netutil::format_mac).unwrap_or_default()
        );
        log::debug!("{}", ifi.describe());
    }

    let relay = Relay::new(&listen_ifs, &send_ifs).context("setting up relay")?;
    relay.serve()
}

/// Resolves the requested names, or auto-selects private-network
/// interfaces when none were given. Unknown names fail before any relay
/// socket is opened.
fn select_interfaces(names: &[String]) -> anyhow::Result<Vec<NetInterface>> {
    if names.is_empty() {
        let query = InterfaceQuery::new()
            .up(true)
            .loopback(false)
            .has_ipv4(true)
            .has_public_ipv4(false);
        let ifs = netutil::get_interfaces(&query)?;
        if ifs.is_empty() {
            bail!("no suitable interfaces found; name them explicitly");
        }
        log::debug!("auto-selected {} interfaces", ifs.len());
        Ok(ifs)
    } else {
        let query = InterfaceQuery::new().names(names.iter().cloned());
        let ifs = netutil::get_interfaces(&query)?;
        for name in names {
            if !ifs.iter().any(|ifi| ifi.name == *name) {
                bail!("unknown interface: {name}");
            }
        }
        Ok(ifs)
    }
}
