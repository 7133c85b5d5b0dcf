// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing subscriber setup.

use std::io;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingSettings;

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level used when neither `RUST_LOG` nor a filter directive is set.
    pub default_level: Level,

    /// Emit span enter/close events.
    pub include_span_events: bool,

    pub include_file_line: bool,

    pub include_target: bool,

    pub ansi_colors: bool,

    pub compact: bool,

    /// Explicit filter directive; wins over `RUST_LOG`.
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            include_span_events: false,
            include_file_line: false,
            include_target: true,
            ansi_colors: true,
            compact: true,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Verbose output for local development.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_span_events: true,
            include_file_line: true,
            compact: false,
            ..Self::default()
        }
    }

    /// Warnings and errors only, no colors.
    pub fn production() -> Self {
        Self {
            default_level: Level::WARN,
            include_target: false,
            ansi_colors: false,
            ..Self::default()
        }
    }

    /// Trace everything this crate logs.
    pub fn testing() -> Self {
        Self {
            default_level: Level::TRACE,
            include_span_events: true,
            include_file_line: true,
            ansi_colors: false,
            compact: false,
            filter_directive: Some("vbranch=trace".to_string()),
            ..Self::default()
        }
    }

    /// Derive a config from resolved logging settings.
    ///
    /// Unknown levels fall back to `info`.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        let level = Level::from_str(&settings.level).unwrap_or(Level::INFO);
        Self::default().with_level(level)
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.default_level.to_string());
        match &self.filter_directive {
            Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Keep alive for the duration of the program.
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber is already installed.
///
/// ```rust,ignore
/// use vbranch::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(&TelemetryConfig::default())?;
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let filter = config.env_filter();

    let span_events = if config.include_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events);

    let result = if config.compact {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.compact())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
    };
    result.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}
