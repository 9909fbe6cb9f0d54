/*!
 * Structured Tracing
 * Subscriber setup and spans for tracker operations
 *
 * Features:
 * - Env-driven filtering (RUST_LOG)
 * - JSON-formatted output for structured parsing
 * - Timed spans around baseline capture
 */

use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Environment variable enabling JSON output
pub const TRACE_JSON_ENV: &str = "NMT_TRACE_JSON";

/// Baseline captures slower than this are reported
const SLOW_BASELINE_MS: u128 = 100;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - NMT_TRACE_JSON: Enable JSON output (default: false)
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(TRACE_JSON_ENV)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured tracing initialized");
    }
    installed
}

/// Timed span around one baseline capture
pub struct BaselineSpan {
    span: tracing::Span,
    start: Instant,
}

impl BaselineSpan {
    pub fn new(summary_only: bool) -> Self {
        let span = span!(
            Level::DEBUG,
            "baseline",
            summary_only = summary_only,
            malloc_sites = tracing::field::Empty,
            regions = tracing::field::Empty,
            result = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    /// Record how much detail was copied
    pub fn record_detail(&self, malloc_sites: usize, regions: usize) {
        self.span.record("malloc_sites", malloc_sites);
        self.span.record("regions", regions);
    }

    pub fn record_result(&self, success: bool) {
        self.span
            .record("result", if success { "success" } else { "error" });
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for BaselineSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();

        if duration.as_millis() > SLOW_BASELINE_MS {
            warn!(duration_ms = duration.as_millis(), slow = true, "slow baseline");
        } else {
            debug!(duration_us = duration.as_micros(), "baseline completed");
        }
    }
}
