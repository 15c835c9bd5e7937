//! Prometheus metrics for reaction handlers.
//!
//! Covers:
//! - Events received and reactions completed, per channel
//! - Reward-call failures and dead letters
//! - Achievement requests
//! - Retry attempts
//!
//! Metrics go through the `metrics` facade, so they are no-ops until a
//! recorder is installed. [`MetricsExporter::install`] installs the
//! Prometheus recorder.
//!
//! # Example
//!
//! ```rust,no_run
//! use greenleaf_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let exporter = MetricsExporter::install()?;
//! println!("{}", exporter.render().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// If another recorder is already installed (typically in tests), the
    /// exporter is returned without a handle and [`render`](Self::render)
    /// yields `None`.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    pub fn install() -> Result<Self, MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                tracing::info!("Prometheus metrics recorder installed");
                Ok(Self {
                    handle: Some(handle),
                })
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(Self { handle: None })
                } else {
                    Err(MetricsError::Install(message))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "greenleaf_events_received_total",
        "Row events delivered to a reaction handler"
    );
    describe_counter!(
        "greenleaf_reactions_completed_total",
        "Reactions that ran to completion, with or without failures"
    );
    describe_histogram!(
        "greenleaf_reaction_duration_seconds",
        "Time from event delivery to reaction completion"
    );
    describe_counter!(
        "greenleaf_event_stream_errors_total",
        "Errors yielded by a subscription's event stream"
    );
    describe_counter!(
        "greenleaf_reward_failures_total",
        "Reward calls that failed after retries"
    );
    describe_counter!(
        "greenleaf_achievements_requested_total",
        "Achievement awards requested by reactions"
    );
    describe_counter!(
        "greenleaf_dead_letters_total",
        "Failed reward requests added to the dead letter queue"
    );
    describe_gauge!(
        "greenleaf_dead_letter_queue_size",
        "Entries currently held in the dead letter queue"
    );
    describe_counter!(
        "greenleaf_retry_attempts_total",
        "Retries of reward calls"
    );
    describe_counter!(
        "greenleaf_retry_exhausted_total",
        "Reward calls that exhausted their retries"
    );
}

/// Handler lifecycle and throughput metrics.
pub struct HandlerMetrics;

impl HandlerMetrics {
    /// Record an event delivered to `channel`.
    pub fn record_received(channel: &'static str) {
        counter!("greenleaf_events_received_total", "channel" => channel).increment(1);
    }

    /// Record a finished reaction.
    pub fn record_completed(channel: &'static str, duration: Duration, failures: usize) {
        let outcome = if failures == 0 { "clean" } else { "partial" };
        counter!("greenleaf_reactions_completed_total", "channel" => channel, "outcome" => outcome)
            .increment(1);
        histogram!("greenleaf_reaction_duration_seconds", "channel" => channel)
            .record(duration.as_secs_f64());
    }

    /// Record an error item on the event stream.
    pub fn record_stream_error(channel: &'static str) {
        counter!("greenleaf_event_stream_errors_total", "channel" => channel).increment(1);
    }
}

/// Reward call metrics.
pub struct RewardMetrics;

impl RewardMetrics {
    /// Record a reward call that failed for good.
    pub fn record_failure(operation: &'static str) {
        counter!("greenleaf_reward_failures_total", "operation" => operation).increment(1);
    }

    /// Record an achievement award request.
    pub fn record_achievement_requested(achievement: &str) {
        counter!("greenleaf_achievements_requested_total", "achievement" => achievement.to_owned())
            .increment(1);
    }

    /// Record a dead-lettered request and the resulting queue size.
    pub fn record_dead_letter(queue_size: usize) {
        counter!("greenleaf_dead_letters_total").increment(1);
        #[allow(clippy::cast_precision_loss)]
        gauge!("greenleaf_dead_letter_queue_size").set(queue_size as f64);
    }

    /// Record the queue size after a drain or eviction.
    pub fn record_dead_letter_queue_size(queue_size: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("greenleaf_dead_letter_queue_size").set(queue_size as f64);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt(operation: &'static str) {
        counter!("greenleaf_retry_attempts_total", "operation" => operation).increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted(operation: &'static str) {
        counter!("greenleaf_retry_exhausted_total", "operation" => operation).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        HandlerMetrics::record_received("plant_additions");
        HandlerMetrics::record_completed("plant_additions", Duration::from_millis(3), 0);
        HandlerMetrics::record_stream_error("plant_additions");
        RewardMetrics::record_failure("add_experience");
        RewardMetrics::record_achievement_requested("first_plant");
        RewardMetrics::record_dead_letter(1);
        RetryMetrics::record_attempt("add_experience");
        RetryMetrics::record_exhausted("add_experience");
    }

    #[test]
    fn install_is_tolerant_of_repeat_calls() {
        let first = MetricsExporter::install();
        assert!(first.is_ok());
        let second = MetricsExporter::install();
        assert!(second.is_ok());
    }
}
