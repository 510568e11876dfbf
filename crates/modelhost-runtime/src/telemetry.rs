//! Telemetry hooks for generation performance.
//!
//! Provides:
//! - [`GenerationMetrics`]: time to first fragment, fragments/sec, and a run summary
//! - [`TelemetryHook`] trait: callback interface for real-time reporting
//! - [`GenerationTimer`]: records timestamps and computes metrics
//! - [`NoopTelemetry`] / [`TracingTelemetry`] / [`RecordingTelemetry`]: built-in hooks

use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Aggregate metrics from one generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationMetrics {
    /// Number of prompt tokens after the chat template was applied.
    pub prompt_tokens: usize,
    /// Number of fragments handed to the consumer.
    pub fragments: usize,
    /// Time from start to the first fragment, in milliseconds.
    pub time_to_first_fragment_ms: f64,
    /// Fragment throughput after the first fragment.
    pub fragments_per_sec: f64,
    /// Total wall-clock time in milliseconds.
    pub total_time_ms: f64,
    /// Whether the consumer stopped pulling before the engine finished.
    pub cancelled: bool,
}

/// Callback trait for generation telemetry.
///
/// All methods default to no-ops so hooks can be selective.
pub trait TelemetryHook: Send + Sync {
    /// Called once the conversation has been prepared into model input.
    fn on_prepared(&self, _prompt_tokens: usize, _elapsed_ms: f64) {}

    /// Called after each fragment is produced.
    fn on_fragment(&self, _index: usize, _elapsed_ms: f64) {}

    /// Called when generation stops, for any reason.
    fn on_generation_complete(&self, _metrics: &GenerationMetrics) {}
}

#[derive(Debug, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Logs one `debug!` summary per generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryHook for TracingTelemetry {
    fn on_generation_complete(&self, m: &GenerationMetrics) {
        tracing::debug!(
            prompt_tokens = m.prompt_tokens,
            fragments = m.fragments,
            ttff_ms = m.time_to_first_fragment_ms,
            fragments_per_sec = m.fragments_per_sec,
            total_ms = m.total_time_ms,
            cancelled = m.cancelled,
            "generation finished"
        );
    }
}

/// Keeps the last completed run's metrics for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    last_report: Arc<Mutex<Option<GenerationMetrics>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_metrics(&self) -> Option<GenerationMetrics> {
        self.last_report.lock().ok().and_then(|m| m.clone())
    }
}

impl TelemetryHook for RecordingTelemetry {
    fn on_generation_complete(&self, metrics: &GenerationMetrics) {
        if let Ok(mut last) = self.last_report.lock() {
            *last = Some(metrics.clone());
        }
    }
}

/// Records timestamps during a generation to compute [`GenerationMetrics`].
///
/// Usage:
/// 1. [`GenerationTimer::new`] at generation start
/// 2. [`GenerationTimer::mark_prepared`] once the prompt is ready
/// 3. [`GenerationTimer::mark_fragment`] after each fragment
/// 4. [`GenerationTimer::finish`] to compute final metrics
pub struct GenerationTimer {
    start: Instant,
    prompt_tokens: usize,
    first_fragment: Option<Instant>,
    fragments: usize,
    hook: Arc<dyn TelemetryHook>,
}

impl GenerationTimer {
    pub fn new(hook: Arc<dyn TelemetryHook>) -> Self {
        Self {
            start: Instant::now(),
            prompt_tokens: 0,
            first_fragment: None,
            fragments: 0,
            hook,
        }
    }

    pub fn mark_prepared(&mut self, prompt_tokens: usize) {
        self.prompt_tokens = prompt_tokens;
        self.hook.on_prepared(prompt_tokens, elapsed_ms(self.start));
    }

    pub fn mark_fragment(&mut self) {
        self.fragments += 1;
        if self.first_fragment.is_none() {
            self.first_fragment = Some(Instant::now());
        }
        self.hook.on_fragment(self.fragments, elapsed_ms(self.start));
    }

    /// Finalize and return metrics. Fires `on_generation_complete`.
    pub fn finish(self, cancelled: bool) -> GenerationMetrics {
        let total_time_ms = elapsed_ms(self.start);
        let time_to_first_fragment_ms = self
            .first_fragment
            .map(|t| t.duration_since(self.start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let decode_ms = total_time_ms - time_to_first_fragment_ms;
        let fragments_per_sec = if decode_ms > 0.0 && self.fragments > 1 {
            (self.fragments - 1) as f64 / (decode_ms / 1000.0)
        } else {
            0.0
        };

        let metrics = GenerationMetrics {
            prompt_tokens: self.prompt_tokens,
            fragments: self.fragments,
            time_to_first_fragment_ms,
            fragments_per_sec,
            total_time_ms,
            cancelled,
        };
        self.hook.on_generation_complete(&metrics);
        metrics
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
