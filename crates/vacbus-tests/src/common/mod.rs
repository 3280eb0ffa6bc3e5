// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Common Test Utilities
//!
//! - `fixtures`: timing, device responders and prebuilt benches
//! - `mocks`: the simulated serial fabric

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;

use std::sync::Once;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use vacbus_core::{ConnectionEvent, ConnectionReason};

static INIT: Once = Once::new();

/// Initialize test logging. Call this at the start of each test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("warn,vacbus_core=debug,vacbus_detect=debug")),
            )
            .with_test_writer()
            .init();
    });
}

/// Waits for the next event with `reason`, skipping others.
///
/// Returns `None` if none arrives within `wait`.
pub async fn next_event(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    reason: ConnectionReason,
    wait: Duration,
) -> Option<ConnectionEvent> {
    tokio::time::timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(event) if event.reason == reason => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
