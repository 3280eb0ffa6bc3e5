// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Waiting for an interrupt.

use tracing::info;

use crate::error::{BinError, BinResult};

/// Resolves on SIGINT or SIGTERM (Ctrl+C on Windows).
pub async fn shutdown_signal() -> BinResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| BinError::io(format!("failed to register SIGTERM handler: {e}")))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| BinError::io(format!("failed to register SIGINT handler: {e}")))?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| BinError::io(format!("failed to register Ctrl+C handler: {e}")))?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
