use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::envelope::CallEnvelope;
use crate::telemetry::{CallRecord, MonitoringSink};

/// Sink that keeps every record in memory.
#[derive(Default)]
pub struct RecordingSink {
    usage: Mutex<Vec<CallRecord>>,
    errors: Mutex<Vec<CallRecord>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn usage(&self) -> Vec<CallRecord> {
        self.usage.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<CallRecord> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl MonitoringSink for RecordingSink {
    async fn log_usage(&self, record: &CallRecord) -> anyhow::Result<()> {
        self.usage.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn log_error(&self, record: &CallRecord) -> anyhow::Result<()> {
        self.errors.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Sink whose writes always fail.
pub struct FailingSink;

#[async_trait]
impl MonitoringSink for FailingSink {
    async fn log_usage(&self, _record: &CallRecord) -> anyhow::Result<()> {
        anyhow::bail!("usage table unavailable")
    }

    async fn log_error(&self, _record: &CallRecord) -> anyhow::Result<()> {
        anyhow::bail!("error table unavailable")
    }
}

/// Sink that panics on every write.
pub struct PanickingSink;

#[async_trait]
impl MonitoringSink for PanickingSink {
    async fn log_usage(&self, _record: &CallRecord) -> anyhow::Result<()> {
        panic!("usage sink exploded")
    }

    async fn log_error(&self, _record: &CallRecord) -> anyhow::Result<()> {
        panic!("error sink exploded")
    }
}

/// Envelope reporting into a fresh `RecordingSink`.
pub fn recording_envelope() -> (Arc<CallEnvelope>, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    let envelope = Arc::new(CallEnvelope::new(sink.clone()));
    (envelope, sink)
}
