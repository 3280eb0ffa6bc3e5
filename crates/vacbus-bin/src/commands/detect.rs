// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `detect` command.

use std::sync::Arc;
use std::time::Duration;

use vacbus_core::SystemPorts;
use vacbus_detect::{Catalogue, DetectionResult, PortDetector};

use crate::cli::{Cli, DetectArgs, OutputFormat};
use crate::error::BinResult;

/// Runs auto-detection with the built-in catalogue and prints the result.
pub async fn detect(cli: &Cli, args: DetectArgs) -> BinResult<()> {
    let config = super::load_or_default(cli)?;

    let mut options = config.detection.options.clone();
    options.exclude_ports.extend(args.exclude);
    if let Some(ms) = args.timeout_ms {
        options.probe_timeout = Duration::from_millis(ms);
    }

    let detector = Arc::new(PortDetector::new(
        Arc::new(SystemPorts::new()),
        Catalogue::builtin()?,
        options,
        config.bus.clone(),
    ));
    let result = detector.detect_async().await?;

    match args.format {
        OutputFormat::Text => print_text(&result),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }

    Ok(())
}

fn print_text(result: &DetectionResult) {
    if result.assignments.is_empty() {
        println!("No devices detected");
    } else {
        println!("Detected devices:");
        for (port, device) in result.port_to_device() {
            if let Some(found) = result.assignments.get(&device) {
                println!(
                    "  {:<16} {:<24} {} ({})",
                    port, device, found.settings, found.protocol
                );
            }
        }
    }

    if !result.undetected.is_empty() {
        println!();
        println!("Undetected: {}", result.undetected.join(", "));
    }

    println!();
    println!(
        "Scanned {} port(s) in {} ms",
        result.scanned_ports.len(),
        result.elapsed_ms
    );
}
