// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.

mod detect;
mod ports;
mod status;
mod validate;
mod version;

pub use detect::detect;
pub use ports::ports;
pub use status::status;
pub use validate::validate;
pub use version::version;

use tracing::info;
use vacbus_config::{ConfigLoader, VacbusConfig};

use crate::cli::{Cli, Commands};
use crate::error::BinResult;

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.effective_command() {
        Commands::Ports(args) => ports::ports(&cli, args),
        Commands::Detect(args) => detect::detect(&cli, args).await,
        Commands::Status(args) => status::status(&cli, args).await,
        Commands::Validate(args) => validate::validate(&cli, args),
        Commands::Version => version::version(&cli),
    }
}

/// Loads the configuration file, or the defaults when it does not exist.
pub(crate) fn load_or_default(cli: &Cli) -> BinResult<VacbusConfig> {
    if !cli.config.exists() {
        info!(path = %cli.config.display(), "No configuration file; using defaults");
        return Ok(VacbusConfig::default());
    }
    Ok(ConfigLoader::new().load(&cli.config)?)
}
