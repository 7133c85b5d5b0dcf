// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metrics for branch and merge operations.
//!
//! Operation latencies are kept in fixed-bucket histograms; conflict
//! resolutions are counted per strategy; AI token usage is summed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::types::ResolutionStrategy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Timings by operation name (`branch.merge`, `merge.resolve`, ...).
    operations: RwLock<HashMap<String, OperationMetrics>>,

    resolutions: ResolutionCounters,

    /// Tokens spent on AI-assisted merges.
    tokens: TokenMetrics,

    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            resolutions: ResolutionCounters::default(),
            tokens: TokenMetrics::default(),
            start_time: Instant::now(),
        }
    }

    /// Record a timed operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        ops.entry(name.to_string())
            .or_insert_with(OperationMetrics::new)
            .record(duration);
    }

    /// Count one conflict resolved with `strategy`.
    pub fn record_resolution(&self, strategy: ResolutionStrategy) {
        self.resolutions.counter(strategy).fetch_add(1, Ordering::Relaxed);
    }

    /// Count one AI attempt that fell through to manual.
    pub fn record_ai_fallback(&self) {
        self.resolutions.ai_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record token usage of one AI call.
    pub fn record_tokens(&self, input: u64, output: u64) {
        self.tokens.input.fetch_add(input, Ordering::Relaxed);
        self.tokens.output.fetch_add(output, Ordering::Relaxed);
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Number of conflicts resolved with `strategy`.
    pub fn resolution_count(&self, strategy: ResolutionStrategy) -> u64 {
        self.resolutions.counter(strategy).load(Ordering::Relaxed)
    }

    /// Get total token counts.
    pub fn token_counts(&self) -> (u64, u64) {
        (
            self.tokens.input.load(Ordering::Relaxed),
            self.tokens.output.load(Ordering::Relaxed),
        )
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let operations = self
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let (input_tokens, output_tokens) = self.token_counts();

        MetricsSnapshot {
            operations,
            auto_resolutions: self.resolution_count(ResolutionStrategy::Auto),
            ai_resolutions: self.resolution_count(ResolutionStrategy::AiAssisted),
            manual_resolutions: self.resolution_count(ResolutionStrategy::Manual),
            ai_fallbacks: self.resolutions.ai_fallbacks.load(Ordering::Relaxed),
            input_tokens,
            output_tokens,
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        for counter in [
            &self.resolutions.auto,
            &self.resolutions.ai_assisted,
            &self.resolutions.manual,
            &self.resolutions.ai_fallbacks,
            &self.tokens.input,
            &self.tokens.output,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct ResolutionCounters {
    auto: AtomicU64,
    ai_assisted: AtomicU64,
    manual: AtomicU64,
    ai_fallbacks: AtomicU64,
}

impl ResolutionCounters {
    fn counter(&self, strategy: ResolutionStrategy) -> &AtomicU64 {
        match strategy {
            ResolutionStrategy::Auto => &self.auto,
            ResolutionStrategy::AiAssisted => &self.ai_assisted,
            ResolutionStrategy::Manual => &self.manual,
        }
    }
}

#[derive(Debug, Default)]
struct TokenMetrics {
    input: AtomicU64,
    output: AtomicU64,
}

/// Timing statistics for one operation name.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    /// Latency distribution.
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Upper bucket bounds in microseconds; one extra overflow bucket follows.
    buckets: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in microseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let idx = self
            .buckets
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.buckets.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Upper bound of the bucket holding the `p`th percentile.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let micros = match self.buckets.get(i) {
                    Some(&bound) => bound,
                    // Overflow bucket.
                    None => self.buckets.last().copied().unwrap_or(0) * 10,
                };
                return Duration::from_micros(micros);
            }
        }

        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // 100us, 1ms, 10ms, 100ms, 1s, 10s, 60s
        Self::with_buckets(vec![
            100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000, 60_000_000,
        ])
    }
}

/// Point-in-time copy of all metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub operations: HashMap<String, OperationMetrics>,
    pub auto_resolutions: u64,
    pub ai_resolutions: u64,
    pub manual_resolutions: u64,
    pub ai_fallbacks: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Merge Metrics ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Resolutions: {} auto, {} ai, {} manual ({} ai fallbacks)\n",
            self.auto_resolutions, self.ai_resolutions, self.manual_resolutions, self.ai_fallbacks
        ));
        report.push_str(&format!(
            "Tokens: {} input, {} output\n",
            self.input_tokens, self.output_tokens
        ));

        if !self.operations.is_empty() {
            let mut names: Vec<&String> = self.operations.keys().collect();
            names.sort();

            report.push_str("\nOperations:\n");
            for name in names {
                let metrics = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
        }

        report
    }
}
