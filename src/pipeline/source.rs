//! Transport abstraction for telemetry ingestion and report publishing.
//!
//! The engine loop is written against these traits so the same pipeline runs
//! from the MQTT broker in production, from an in-process channel under the
//! digital twin, and from canned sample vectors in tests.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::types::{StatusReport, TelemetrySample};

/// Events produced by a telemetry source.
pub enum SourceEvent {
    /// A decoded telemetry sample.
    Sample(TelemetrySample),
    /// Source reached end of data (closed channel, permanent disconnect).
    Eof,
}

/// Where telemetry samples come from.
///
/// Implementations handle decoding, reconnection, and pacing internally; the
/// engine loop calls [`next_sample`](TelemetrySource::next_sample) in a
/// `select!` with cancellation.
#[async_trait]
pub trait TelemetrySource: Send + 'static {
    async fn next_sample(&mut self) -> anyhow::Result<SourceEvent>;

    /// Human-readable name for logging (e.g. "MQTT", "channel", "replay").
    fn source_name(&self) -> &str;
}

/// Where status reports go.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish_report(&self, report: &StatusReport) -> anyhow::Result<()>;

    fn sink_name(&self) -> &str;
}

// ============================================================================
// In-process channel transport (twin mode, tests)
// ============================================================================

/// Bounded in-process telemetry channel: the twin publishes samples into the
/// sender half and the engine consumes the receiver half.
pub fn telemetry_channel(capacity: usize) -> (mpsc::Sender<TelemetrySample>, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelSource { rx })
}

pub struct ChannelSource {
    rx: mpsc::Receiver<TelemetrySample>,
}

#[async_trait]
impl TelemetrySource for ChannelSource {
    async fn next_sample(&mut self) -> anyhow::Result<SourceEvent> {
        match self.rx.recv().await {
            Some(sample) => Ok(SourceEvent::Sample(sample)),
            None => Ok(SourceEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "channel"
    }
}

/// Broadcast sink: every subscriber (twin shutdown policy, tests) sees every
/// report. Publishing without subscribers is not an error.
pub struct ChannelSink {
    tx: broadcast::Sender<StatusReport>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusReport> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ReportSink for ChannelSink {
    async fn publish_report(&self, report: &StatusReport) -> anyhow::Result<()> {
        // A send error just means nobody is listening right now.
        let _ = self.tx.send(report.clone());
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "channel"
    }
}

// ============================================================================
// Replay source (tests, canned scenarios)
// ============================================================================

/// Replays pre-loaded samples with an optional inter-sample delay.
pub struct ReplaySource {
    samples: std::vec::IntoIter<TelemetrySample>,
    delay_ms: u64,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(samples: Vec<TelemetrySample>, delay_ms: u64) -> Self {
        Self {
            samples: samples.into_iter(),
            delay_ms,
            yielded_first: false,
        }
    }
}

#[async_trait]
impl TelemetrySource for ReplaySource {
    async fn next_sample(&mut self) -> anyhow::Result<SourceEvent> {
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.samples.next() {
            Some(sample) => {
                self.yielded_first = true;
                Ok(SourceEvent::Sample(sample))
            }
            None => Ok(SourceEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}
