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

//! Optional configuration file loading.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Interface name lists from a config file. Empty lists fall through to
/// the CLI arguments or auto-selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub listen_if_names: Vec<String>,
    pub send_if_names: Vec<String>,
}

pub fn load_from_file(path: impl AsRef<Path>) -> io::Result<Config> {
    let file = File::open(path)?;
    load_from_reader(file)
}

pub fn load_from_reader(mut reader: impl Read) -> io::Result<Config> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    load_from_bytes(&data)
}

// TODO: parse the interface lists once the file format is settled; every
// deployment so far runs on CLI arguments or auto-selection.
pub fn load_from_bytes(_data: &[u8]) -> io::Result<Config> {
    Ok(Config::default())
}
