// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use vacbus_config::ConfigLoader;

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Loads and validates the configuration file.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;

    if !config_path.exists() {
        return Err(BinError::Configuration(format!(
            "Configuration file not found: {}",
            config_path.display()
        )));
    }

    let config = ConfigLoader::new()
        .load(config_path)
        .map_err(|e| BinError::from(e).with_context("Configuration validation failed"))?;

    let mut warnings: Vec<String> = Vec::new();
    if !config.detection.enabled && config.devices.is_empty() {
        warnings.push("Detection is disabled and no devices are bound".to_string());
    }
    for (device, binding) in &config.devices {
        if config.detection.options.exclude_ports.contains(&binding.port) {
            warnings.push(format!(
                "Port {} of {} is also listed in detection.exclude_ports",
                binding.port, device
            ));
        }
    }

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", config_path.display());
            println!();
            println!("Summary:");
            println!("  Static devices:    {}", config.devices.len());
            for (device, binding) in &config.devices {
                println!("    {:<24} {}", device, binding.port);
            }
            println!(
                "  Detection:         {}",
                if config.detection.enabled { "enabled" } else { "disabled" }
            );
            println!("  Failure threshold: {}", config.bus.failure_threshold);
            println!("  Reconnect backoff: {:?}", config.bus.reconnect_backoff);
            println!("  Query lock budget: {:?}", config.priority.query_lock_budget);

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "summary": {
                    "static_devices": config.devices.len(),
                    "detection_enabled": config.detection.enabled,
                },
                "warnings": warnings,
                "config": if args.show_config { Some(&config) } else { None },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
