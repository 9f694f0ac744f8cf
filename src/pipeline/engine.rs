//! Ingest loop: accumulate the sliding window from a telemetry source and
//! trigger the pipeline at the batch cadence.
//!
//! One loop instance owns the buffer, the runner, and the predictor state;
//! pipeline steps are strictly serialized, so no locking is needed around
//! the smoothing buffers. A watchdog fires a single "no telemetry"
//! notification after the configured silence window; the flag re-arms when
//! messages resume.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::source::{ReportSink, SourceEvent, TelemetrySource};
use super::PipelineRunner;
use crate::config::EngineConfig;
use crate::notifier::Notifier;
use crate::types::TelemetrySample;

/// Control messages accepted by a running engine loop.
#[derive(Debug, Clone, Copy)]
pub enum EngineCommand {
    /// Clear predictor smoothing state and cross-batch feature state.
    ResetSmoothing,
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub samples_ingested: u64,
    pub batches_processed: u64,
    pub reports_published: u64,
}

/// The ingest/pipeline activity: a single-threaded reader with strictly
/// serialized pipeline steps.
pub struct EngineLoop {
    runner: PipelineRunner,
    sink: Arc<dyn ReportSink>,
    buffer: VecDeque<TelemetrySample>,
    window_size: usize,
    batch_size: usize,
    messages_since_run: usize,
    commands: Option<mpsc::Receiver<EngineCommand>>,
    cancel: CancellationToken,
    // Silence watchdog
    notifier: Notifier,
    disconnect_alert: Duration,
    silence_alert_sent: bool,
}

impl EngineLoop {
    pub fn new(
        config: &EngineConfig,
        runner: PipelineRunner,
        sink: Arc<dyn ReportSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runner,
            sink,
            buffer: VecDeque::with_capacity(config.smoothing.feature_window_size),
            window_size: config.smoothing.feature_window_size,
            batch_size: config.mqtt.batch_size,
            messages_since_run: 0,
            commands: None,
            cancel,
            notifier: Notifier::new(&config.notifier),
            disconnect_alert: Duration::from_secs(config.mqtt.disconnect_alert_secs),
            silence_alert_sent: false,
        }
    }

    /// Attach a control channel (used by the digital twin to force smoothing
    /// resets after a shutdown).
    pub fn with_commands(mut self, commands: mpsc::Receiver<EngineCommand>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Override the batch cadence (the twin triggers once per synthesized
    /// window instead of every N broker messages).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Run until the source is exhausted or cancellation. Returns counters.
    pub async fn run<S: TelemetrySource>(mut self, source: &mut S) -> EngineStats {
        let mut stats = EngineStats::default();
        let mut last_message = Instant::now();
        let mut watchdog = tokio::time::interval(Duration::from_secs(5));
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            source = source.source_name(),
            window = self.window_size,
            batch = self.batch_size,
            "Engine loop started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Engine loop: shutdown signal received");
                    break;
                }
                command = recv_command(&mut self.commands) => {
                    match command {
                        Some(EngineCommand::ResetSmoothing) => {
                            info!("Engine loop: smoothing reset requested");
                            self.runner.reset();
                        }
                        // Sender dropped: stop polling the closed channel.
                        None => self.commands = None,
                    }
                }
                _ = watchdog.tick() => {
                    self.check_silence(last_message);
                }
                event = source.next_sample() => {
                    match event {
                        Ok(SourceEvent::Sample(sample)) => {
                            last_message = Instant::now();
                            self.silence_alert_sent = false;
                            stats.samples_ingested += 1;
                            if self.ingest(sample, &mut stats).await {
                                stats.batches_processed += 1;
                            }
                        }
                        Ok(SourceEvent::Eof) => {
                            info!(
                                samples = stats.samples_ingested,
                                "Engine loop: source reached end of data"
                            );
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "Engine loop: source error");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            samples = stats.samples_ingested,
            batches = stats.batches_processed,
            reports = stats.reports_published,
            "Engine loop stopped"
        );
        stats
    }

    /// Append one sample; run the pipeline when the window is full and the
    /// batch cadence is satisfied. Returns true when a pipeline step ran.
    async fn ingest(&mut self, sample: TelemetrySample, stats: &mut EngineStats) -> bool {
        if self.buffer.len() >= self.window_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);
        self.messages_since_run += 1;

        if self.buffer.len() < self.window_size || self.messages_since_run < self.batch_size {
            return false;
        }
        self.messages_since_run = 0;

        let window: Vec<TelemetrySample> = self.buffer.iter().copied().collect();
        let report = self.runner.run_batch(&window).await;

        match self.sink.publish_report(&report).await {
            Ok(()) => stats.reports_published += 1,
            Err(e) => warn!(sink = self.sink.sink_name(), error = %e, "Report publish failed"),
        }
        true
    }

    /// Emit exactly one "no telemetry" notification per silence episode.
    fn check_silence(&mut self, last_message: Instant) {
        if self.silence_alert_sent || last_message.elapsed() < self.disconnect_alert {
            return;
        }
        self.silence_alert_sent = true;
        warn!(
            silence_secs = last_message.elapsed().as_secs(),
            "No telemetry received within the alert window"
        );
        self.notifier.dispatch(format!(
            "No telemetry for {} s — check broker connectivity and sensors.",
            self.disconnect_alert.as_secs()
        ));
    }
}

/// Await a command when a channel is attached; otherwise pend forever so the
/// `select!` arm never fires.
async fn recv_command(
    commands: &mut Option<mpsc::Receiver<EngineCommand>>,
) -> Option<EngineCommand> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::source::{ChannelSink, ReplaySource};
    use crate::predictor::Predictor;
    use crate::storage;
    use crate::types::PumpStatus;

    fn nominal_sample() -> TelemetrySample {
        TelemetrySample {
            vib_rms: Some(2.0),
            vib_crest: Some(3.0),
            vib_kurtosis: Some(3.2),
            current: Some(45.0),
            pressure: Some(6.0),
            temp: Some(38.0),
            cavitation_index: Some(0.05),
            debris_impact: false,
        }
    }

    fn small_config(dir: &std::path::Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.smoothing.feature_window_size = 2;
        config.mqtt.batch_size = 2;
        config.paths.log_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn pipeline_triggers_at_batch_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let cancel = CancellationToken::new();
        let (csv, writer) = storage::csv_log(
            config.telemetry_log_path(),
            config.alerts_log_path(),
            cancel.clone(),
        );
        let writer_task = tokio::spawn(writer.run());

        let predictor = Predictor::with_artifacts(None, &config);
        let runner = PipelineRunner::new(&config, predictor, csv);
        let sink = Arc::new(ChannelSink::new(16));
        let mut reports = sink.subscribe();

        let engine = EngineLoop::new(&config, runner, sink, cancel.clone());
        // 5 samples, window 2, batch 2: pipeline runs after samples 2 and 4
        let mut source = ReplaySource::new(vec![nominal_sample(); 5], 0);
        let stats = engine.run(&mut source).await;

        assert_eq!(stats.samples_ingested, 5);
        assert_eq!(stats.batches_processed, 2);
        assert_eq!(stats.reports_published, 2);

        // Without model artifacts every verdict is UNKNOWN
        let report = reports.recv().await.unwrap();
        assert_eq!(report.status, PumpStatus::Unknown);
        assert_eq!(report.sensor_health, "OK");

        cancel.cancel();
        writer_task.await.unwrap();
    }

    #[tokio::test]
    async fn invalid_batch_publishes_offline() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let cancel = CancellationToken::new();
        let (csv, _writer) = storage::csv_log(
            config.telemetry_log_path(),
            config.alerts_log_path(),
            cancel.clone(),
        );

        let predictor = Predictor::with_artifacts(None, &config);
        let runner = PipelineRunner::new(&config, predictor, csv);
        let sink = Arc::new(ChannelSink::new(16));
        let mut reports = sink.subscribe();

        let engine = EngineLoop::new(&config, runner, sink, cancel.clone());
        let mut bad = nominal_sample();
        bad.temp = Some(150.0);
        let mut source = ReplaySource::new(vec![bad; 2], 0);
        engine.run(&mut source).await;

        let report = reports.recv().await.unwrap();
        assert_eq!(report.status, PumpStatus::Offline);
        assert!(report.sensor_health.starts_with("INVALID_RANGE:TEMP"));
    }
}
