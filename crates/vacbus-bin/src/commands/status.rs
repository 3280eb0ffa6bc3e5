// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `status` command.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use vacbus_core::SystemPorts;

use crate::cli::{Cli, OutputFormat, StatusArgs};
use crate::error::BinResult;
use crate::runtime::{BusRuntime, StatusReport};
use crate::shutdown::shutdown_signal;

/// Opens every known device's channel and reports its state.
///
/// With `--watch` the report is repeated until the process is interrupted,
/// and connection changes are logged as they happen.
pub async fn status(cli: &Cli, args: StatusArgs) -> BinResult<()> {
    let config = super::load_or_default(cli)?;
    let runtime = BusRuntime::start(&config, Arc::new(SystemPorts::new()), !args.no_detect).await?;
    let mut events = runtime.subscribe();

    print_report(&runtime.report(), args.format)?;

    let Some(secs) = args.watch else {
        runtime.shutdown();
        return Ok(());
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    ticker.tick().await;
    let signal = shutdown_signal();
    tokio::pin!(signal);

    let outcome = loop {
        tokio::select! {
            result = &mut signal => break result,
            _ = ticker.tick() => print_report(&runtime.report(), args.format)?,
            event = events.recv() => match event {
                Ok(event) if event.connected => {
                    info!(port = %event.port, reason = %event.reason, "Connected");
                }
                Ok(event) => {
                    warn!(port = %event.port, reason = %event.reason, "Disconnected");
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Connection events dropped");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    runtime.shutdown();
    outcome
}

fn print_report(report: &StatusReport, format: OutputFormat) -> BinResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            println!(
                "{:<16} {:<12} {:<10} {:>8} {:>10} {:>9} {:>10}",
                "PORT", "SETTINGS", "STATE", "PENDING", "PROCESSED", "FAILURES", "RECONNECTS"
            );
            for channel in &report.channels {
                let state = if channel.connected {
                    "connected"
                } else if channel.disposed {
                    "closed"
                } else {
                    "offline"
                };
                println!(
                    "{:<16} {:<12} {:<10} {:>8} {:>10} {:>9} {:>10}",
                    channel.port,
                    channel.settings.to_string(),
                    state,
                    channel.pending,
                    channel.processed,
                    channel.consecutive_failures,
                    channel.reconnects
                );
            }

            if !report.devices.is_empty() {
                println!();
                println!("Devices:");
                for (device, port) in &report.devices {
                    println!("  {:<24} {}", device, port);
                }
            }
            if !report.undetected.is_empty() {
                println!();
                println!("Undetected: {}", report.undetected.join(", "));
            }
        }
    }
    Ok(())
}
