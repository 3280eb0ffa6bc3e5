// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vacbus Integration Tests
//!
//! Shared fixtures and a simulated serial fabric for exercising the bus
//! end to end without hardware.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p vacbus-tests
//! cargo test -p vacbus-tests --test integration_channel
//! ```
//!
//! ## Test Suites
//!
//! - `integration_channel.rs`: worker serialization, resolution, fault handling, reconnect
//! - `integration_registry.rs`: channel sharing, adapters, event aggregation
//! - `integration_priority.rs`: execute/query scheduling
//! - `integration_detection.rs`: port auto-detection
//! - `integration_config.rs`: configuration files
//! - `integration_end_to_end.rs`: detection through to device traffic

pub mod common;
