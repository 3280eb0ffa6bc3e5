// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `ports` command.

use vacbus_core::{PortProvider, SystemPorts};

use crate::cli::{Cli, OutputFormat, PortsArgs};
use crate::error::{BinError, BinResult};

/// Lists the serial ports known to the operating system.
pub fn ports(_cli: &Cli, args: PortsArgs) -> BinResult<()> {
    let ports = SystemPorts::new()
        .available_ports()
        .map_err(|e| BinError::io(format!("failed to enumerate serial ports: {e}")))?;

    match args.format {
        OutputFormat::Text => {
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in &ports {
                println!("{port}");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&ports)?);
        }
    }

    Ok(())
}
