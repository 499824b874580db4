//! Monitoring sinks for external-call telemetry.
//!
//! The envelope reports through two channels: usage records answer "how often
//! and how slow", error records answer "why". Where records end up (a table,
//! a log stream, a crash reporter) is the sink's business.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use std::sync::Arc;

use async_trait::async_trait;

/// Implement this to receive call records.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - Returned errors are logged by the caller and never reach the code that
///   made the external call.
#[async_trait]
pub trait MonitoringSink: Send + Sync + 'static {
    async fn log_usage(&self, record: &CallRecord) -> anyhow::Result<()>;

    async fn log_error(&self, record: &CallRecord) -> anyhow::Result<()>;
}

/// Emits records as structured `tracing` events. Default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl MonitoringSink for TracingSink {
    async fn log_usage(&self, r: &CallRecord) -> anyhow::Result<()> {
        tracing::event!(
            target: TARGET_USAGE,
            tracing::Level::INFO,
            call.service = %r.service_name,
            call.endpoint = %r.endpoint,
            call.user_id = r.user_id.as_deref(),
            call.success = r.success,
            call.status = r.response_status,
            latency.ms = r.response_time_ms,
            tokens.total = r.tokens_used,
            cost.usd = r.cost_usd,
            error.code = r.error_code.map(|c| c.as_str()),
            "external call"
        );
        Ok(())
    }

    async fn log_error(&self, r: &CallRecord) -> anyhow::Result<()> {
        tracing::event!(
            target: TARGET_ERROR,
            tracing::Level::WARN,
            call.service = %r.service_name,
            call.endpoint = %r.endpoint,
            call.user_id = r.user_id.as_deref(),
            call.status = r.response_status,
            latency.ms = r.response_time_ms,
            error.code = r.error_code.map(|c| c.as_str()),
            error.message = r.error_message.as_deref(),
            "external call failed"
        );
        Ok(())
    }
}

/// Drops every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl MonitoringSink for NullSink {
    async fn log_usage(&self, _record: &CallRecord) -> anyhow::Result<()> {
        Ok(())
    }

    async fn log_error(&self, _record: &CallRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Forwards every record to each child sink in order.
///
/// A failing child does not stop delivery to the others; failures are
/// reported together once all children have been tried. Crash reporters and
/// other error trackers attach here rather than inside the envelope.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MonitoringSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn MonitoringSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(mut self, sink: Arc<dyn MonitoringSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

fn join_failures(channel: &str, failures: Vec<anyhow::Error>) -> anyhow::Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    let joined = failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Err(anyhow::anyhow!(
        "{} of the fanout sinks failed on {channel}: {joined}",
        failures.len()
    ))
}

#[async_trait]
impl MonitoringSink for FanoutSink {
    async fn log_usage(&self, record: &CallRecord) -> anyhow::Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.log_usage(record).await {
                failures.push(e);
            }
        }
        join_failures("log_usage", failures)
    }

    async fn log_error(&self, record: &CallRecord) -> anyhow::Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.log_error(record).await {
                failures.push(e);
            }
        }
        join_failures("log_error", failures)
    }
}
