// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `ports`: List serial ports
//! - `detect`: Run port auto-detection
//! - `status`: Open all channels and report their state (default)
//! - `validate`: Validate configuration file
//! - `version`: Show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// vacbus - serial command bus for vacuum and thermal lab equipment
#[derive(Parser, Debug)]
#[command(
    name = "vacbus",
    author = "Sylvex <contact@sylvex.io>",
    version = crate::VERSION,
    about = "Serial command bus for vacuum and thermal lab equipment",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "vacbus.yaml",
        env = "VACBUS_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        default_value = "info",
        env = "VACBUS_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json, compact)
    #[arg(long, default_value = "text", env = "VACBUS_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Enable quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List the serial ports reported by the operating system
    Ports(PortsArgs),

    /// Probe every port and report which device answers where
    Detect(DetectArgs),

    /// Open all channels and report their state
    ///
    /// This is the default command. Devices come from auto-detection and
    /// the static bindings of the configuration file.
    Status(StatusArgs),

    /// Validate the configuration file
    Validate(ValidateArgs),

    /// Show version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `ports` command.
#[derive(Args, Debug, Default, Clone)]
pub struct PortsArgs {
    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `detect` command.
#[derive(Args, Debug, Default, Clone)]
pub struct DetectArgs {
    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Port to leave alone (repeatable)
    #[arg(short = 'x', long = "exclude")]
    pub exclude: Vec<String>,

    /// Probe response timeout in milliseconds
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,
}

/// Arguments for the `status` command.
#[derive(Args, Debug, Default, Clone)]
pub struct StatusArgs {
    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Keep running, printing the status every N seconds
    #[arg(short, long, value_name = "SECS")]
    pub watch: Option<u64>,

    /// Skip auto-detection and use static bindings only
    #[arg(long)]
    pub no_detect: bool,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Default, Clone)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective command, defaulting to `Status` if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Status(StatusArgs::default()))
    }

    /// Get the effective log level based on flags.
    pub fn effective_log_level(&self) -> &str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
