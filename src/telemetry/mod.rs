// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing and metrics infrastructure.
//!
//! Initialize once at startup:
//!
//! ```rust,ignore
//! use vbranch::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Library code logs through `tracing` macros with structured fields
//! (`branch_id`, `conflict_id`, `path`, `strategy`) and times hot operations
//! into [`GLOBAL_METRICS`] when the `telemetry` feature is enabled.

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{Histogram, Metrics, MetricsSnapshot, OperationMetrics, GLOBAL_METRICS};
