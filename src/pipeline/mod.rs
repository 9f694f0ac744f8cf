//! Online Decision Pipeline
//!
//! ```text
//! raw sample -> validator -> sliding buffer -> (window + cadence satisfied)
//!   -> low-pass conditioning -> feature extraction [+ ISO band RMS]
//!   -> predictor (smoothing, scaler, classifier, base status)
//!   -> rule engine -> final status / reason / trip cause / alarm causes
//!   -> sinks (broker publish, audit CSV, notifier)
//! ```
//!
//! [`BatchProcessor`] turns a validated window into model inputs,
//! [`PipelineRunner`] executes one full step, and [`EngineLoop`] drives the
//! runner from a [`TelemetrySource`] at the configured cadence.

mod engine;
pub mod source;

pub use engine::{EngineCommand, EngineLoop, EngineStats};
pub use source::{
    telemetry_channel, ChannelSink, ChannelSource, ReplaySource, ReportSink, SourceEvent,
    TelemetrySource,
};

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::defaults::{INFERENCE_RETRY_ATTEMPTS, RETRY_BASE_DELAY_MS};
use crate::config::EngineConfig;
use crate::dsp::{self, IirFilter};
use crate::features::FeatureExtractor;
use crate::notifier::Notifier;
use crate::predictor::{PredictOptions, Predictor};
use crate::storage::{AlertRow, CsvLogHandle, TelemetryRow};
use crate::types::{FeatureVector, PumpStatus, StatusReport, TelemetrySample};
use crate::validator::{self, ValidationError};

// ============================================================================
// Batch preparation
// ============================================================================

/// Model inputs produced from one validated telemetry window.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub features: FeatureVector,
    /// 10–1000 Hz band vibration RMS, when the ISO band path is enabled.
    pub iso_vib_rms: Option<f64>,
    /// Newest sample of the window.
    pub latest: TelemetrySample,
    /// True when any sample in the window carried the debris flag.
    pub debris_flag: bool,
}

/// Validation + signal conditioning + feature assembly for one window.
pub struct BatchProcessor {
    config: EngineConfig,
    lowpass: Option<IirFilter>,
    extractor: FeatureExtractor,
}

impl BatchProcessor {
    pub fn new(config: &EngineConfig) -> Self {
        let lowpass = match IirFilter::butter_lowpass(
            config.dsp.butter_order,
            config.dsp.butter_cutoff,
        ) {
            Ok(filter) => Some(filter),
            Err(e) => {
                warn!(error = %e, "Low-pass design failed; vibration features use the raw signal");
                None
            }
        };
        Self {
            config: config.clone(),
            lowpass,
            extractor: FeatureExtractor::new(),
        }
    }

    /// Validate the window and produce model inputs.
    ///
    /// The whole window is rejected on any out-of-range value; fields absent
    /// from every sample are reported as `MISSING_COLUMNS`.
    pub fn prepare_batch(
        &mut self,
        samples: &[TelemetrySample],
    ) -> Result<PreparedBatch, ValidationError> {
        validator::validate_batch(samples, &self.config.telemetry)?;
        self.check_required_columns(samples)?;

        let raw_vib: Vec<f64> = samples.iter().map(TelemetrySample::vib_rms_or_zero).collect();
        let conditioned = match &self.lowpass {
            Some(filter) => filter.filtfilt(&raw_vib).unwrap_or_else(|e| {
                debug!(error = %e, "filtfilt fell back to the raw vibration signal");
                raw_vib.clone()
            }),
            None => raw_vib.clone(),
        };

        let features = self.extractor.extract(&conditioned, samples);

        let iso_vib_rms = if self.config.dsp.use_iso_band_for_zones {
            match dsp::iso_band_rms(
                &raw_vib,
                self.config.dsp.sample_rate_hz,
                self.config.dsp.iso_band_low_hz,
                self.config.dsp.iso_band_high_hz,
            ) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(error = %e, "ISO band RMS unavailable for this window");
                    None
                }
            }
        } else {
            None
        };

        Ok(PreparedBatch {
            features,
            iso_vib_rms,
            latest: samples[samples.len() - 1],
            debris_flag: samples.iter().any(|s| s.debris_impact),
        })
    }

    fn check_required_columns(&self, samples: &[TelemetrySample]) -> Result<(), ValidationError> {
        let required: [(&str, fn(&TelemetrySample) -> bool); 4] = [
            ("vib_rms", |s| s.vib_rms.is_some()),
            ("current", |s| s.current.is_some()),
            ("pressure", |s| s.pressure.is_some()),
            ("temp", |s| s.temp.is_some()),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, present)| !samples.iter().any(present))
            .map(|(name, _)| *name)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::MissingColumns(missing.join(",")))
        }
    }

    /// Forget cross-batch state (previous temperature mean).
    pub fn reset(&mut self) {
        self.extractor.reset();
    }
}

// ============================================================================
// Pipeline runner
// ============================================================================

/// One full decision step: batch preparation, inference with retry, report
/// assembly, audit rows, and notification dispatch.
pub struct PipelineRunner {
    pump_id: String,
    processor: BatchProcessor,
    predictor: Predictor,
    csv: CsvLogHandle,
    notifier: Notifier,
    startup_iterations: usize,
    runs_completed: usize,
}

impl PipelineRunner {
    pub fn new(config: &EngineConfig, predictor: Predictor, csv: CsvLogHandle) -> Self {
        Self {
            pump_id: config.identity.pump_id.clone(),
            processor: BatchProcessor::new(config),
            predictor,
            csv,
            notifier: Notifier::new(&config.notifier),
            startup_iterations: config.smoothing.startup_iterations,
            runs_completed: 0,
        }
    }

    pub fn predictor_mut(&mut self) -> &mut Predictor {
        &mut self.predictor
    }

    /// Clear all cross-batch state (twin restart after shutdown).
    pub fn reset(&mut self) {
        self.processor.reset();
        self.predictor.reset_smoothing();
    }

    /// Execute one pipeline step over the current window.
    pub async fn run_batch(&mut self, samples: &[TelemetrySample]) -> StatusReport {
        let prepared = match self.processor.prepare_batch(samples) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(reason = %e, "Batch rejected; publishing OFFLINE report");
                return StatusReport::offline(&self.pump_id, e.to_string());
            }
        };

        let is_startup = self.runs_completed < self.startup_iterations;
        let verdict = self.predict_with_retry(&prepared, is_startup).await;
        self.runs_completed += 1;

        let report = StatusReport {
            pump_id: self.pump_id.clone(),
            status: verdict.status,
            anomaly_probability: round4(verdict.display_prob),
            sensor_health: "OK".to_string(),
            timestamp: Utc::now(),
            reason: verdict.reason.clone(),
            trip_cause: verdict.trip_cause,
            alarm_causes: verdict.alarm_causes.clone(),
            features: Some(prepared.features),
        };

        self.csv.append_telemetry(TelemetryRow {
            timestamp: report.timestamp,
            risk_score: report.anomaly_probability,
            status: report.status,
            features: prepared.features,
        });

        if report.status.is_alerting() {
            self.csv.append_alert(AlertRow {
                timestamp: report.timestamp,
                pump_id: report.pump_id.clone(),
                status: report.status,
                anomaly_probability: report.anomaly_probability,
                sensor_status: report.sensor_health.clone(),
            });
            let message = format!(
                "Pump: {}\nStatus: {}\nProb: {:.3}\nReason: {}",
                report.pump_id,
                report.status,
                report.anomaly_probability,
                report.reason.as_deref().unwrap_or("n/a"),
            );
            self.notifier.dispatch(message);
            warn!(
                status = %report.status,
                prob = report.anomaly_probability,
                reason = report.reason.as_deref().unwrap_or(""),
                "ALERT"
            );
        }

        report
    }

    /// Inference with bounded exponential-backoff retry on transient errors.
    async fn predict_with_retry(
        &mut self,
        prepared: &PreparedBatch,
        is_startup: bool,
    ) -> crate::predictor::Verdict {
        let mut verdict = self.predictor.predict(
            &prepared.features,
            PredictOptions {
                is_startup,
                latest: Some(&prepared.latest),
                iso_vib_rms: prepared.iso_vib_rms,
                debris_flag: prepared.debris_flag,
            },
        );
        let mut attempt = 0;
        while verdict.status == PumpStatus::Error && attempt + 1 < INFERENCE_RETRY_ATTEMPTS {
            let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
            warn!(attempt = attempt + 1, delay_ms = delay, "Retrying inference");
            tokio::time::sleep(Duration::from_millis(delay)).await;
            verdict = self.predictor.predict(
                &prepared.features,
                PredictOptions {
                    is_startup,
                    latest: Some(&prepared.latest),
                    iso_vib_rms: prepared.iso_vib_rms,
                    debris_flag: prepared.debris_flag,
                },
            );
            attempt += 1;
        }
        verdict
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
