//! Durable CSV audit trail with a bounded write queue.
//!
//! Telemetry and alert rows are enqueued from the pipeline and drained by a
//! single background task that owns the files. Writes retry up to three
//! times with exponential backoff; a full queue drops the row with a
//! warning, since liveness of the pipeline is worth more than audit
//! completeness.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::defaults::{CSV_QUEUE_CAPACITY, CSV_WRITE_RETRIES, RETRY_BASE_DELAY_MS};
use crate::types::{FeatureVector, PumpStatus, NUM_FEATURES};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const TELEMETRY_HEADER: &str = "timestamp,risk_score,status,vib_rms,vib_crest,vib_kurtosis,current,pressure,cavitation_index,temp,temp_delta";
pub const ALERTS_HEADER: &str = "timestamp,pump_id,status,anomaly_probability,sensor_status";

// ============================================================================
// Rows
// ============================================================================

/// One telemetry audit row. Numeric fields are persisted to 4 decimal places.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRow {
    pub timestamp: DateTime<Utc>,
    pub risk_score: f64,
    pub status: PumpStatus,
    pub features: FeatureVector,
}

impl TelemetryRow {
    pub fn to_csv_line(&self) -> String {
        let mut line = format!(
            "{},{:.4},{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.risk_score,
            self.status
        );
        for value in self.features.as_slice() {
            line.push_str(&format!(",{value:.4}"));
        }
        line
    }

    /// Parse a line previously produced by [`to_csv_line`](Self::to_csv_line).
    pub fn from_csv_line(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 3 + NUM_FEATURES {
            return None;
        }
        let timestamp = chrono::NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
            .ok()?
            .and_utc();
        let risk_score = fields[1].parse().ok()?;
        let status = match fields[2] {
            "HEALTHY" => PumpStatus::Healthy,
            "WARNING" => PumpStatus::Warning,
            "CRITICAL" => PumpStatus::Critical,
            "ERROR" => PumpStatus::Error,
            "UNKNOWN" => PumpStatus::Unknown,
            "OFFLINE" => PumpStatus::Offline,
            _ => return None,
        };
        let mut features = [0.0_f64; NUM_FEATURES];
        for (slot, field) in features.iter_mut().zip(&fields[3..]) {
            *slot = field.parse().ok()?;
        }
        Some(Self {
            timestamp,
            risk_score,
            status,
            features: FeatureVector(features),
        })
    }
}

/// One alerts audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRow {
    pub timestamp: DateTime<Utc>,
    pub pump_id: String,
    pub status: PumpStatus,
    pub anomaly_probability: f64,
    pub sensor_status: String,
}

impl AlertRow {
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{:.4},{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.pump_id,
            self.status,
            self.anomaly_probability,
            self.sensor_status
        )
    }
}

#[derive(Debug)]
enum CsvJob {
    Telemetry(TelemetryRow),
    Alert(AlertRow),
}

// ============================================================================
// Handle + writer task
// ============================================================================

/// Cheap clonable handle used by the pipeline to enqueue rows.
#[derive(Clone)]
pub struct CsvLogHandle {
    tx: mpsc::Sender<CsvJob>,
}

impl CsvLogHandle {
    pub fn append_telemetry(&self, row: TelemetryRow) {
        if self.tx.try_send(CsvJob::Telemetry(row)).is_err() {
            warn!("CSV telemetry queue full; dropping one telemetry record");
        }
    }

    pub fn append_alert(&self, row: AlertRow) {
        if self.tx.try_send(CsvJob::Alert(row)).is_err() {
            warn!("CSV alert queue full; dropping one alert record");
        }
    }
}

/// Background writer that exclusively owns the audit files.
pub struct CsvLogWriter {
    rx: mpsc::Receiver<CsvJob>,
    telemetry_path: PathBuf,
    alerts_path: PathBuf,
    cancel: CancellationToken,
}

/// Build the handle/writer pair with the default queue capacity.
pub fn csv_log(
    telemetry_path: PathBuf,
    alerts_path: PathBuf,
    cancel: CancellationToken,
) -> (CsvLogHandle, CsvLogWriter) {
    csv_log_with_capacity(telemetry_path, alerts_path, cancel, CSV_QUEUE_CAPACITY)
}

pub fn csv_log_with_capacity(
    telemetry_path: PathBuf,
    alerts_path: PathBuf,
    cancel: CancellationToken,
    capacity: usize,
) -> (CsvLogHandle, CsvLogWriter) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        CsvLogHandle { tx },
        CsvLogWriter {
            rx,
            telemetry_path,
            alerts_path,
            cancel,
        },
    )
}

impl CsvLogWriter {
    /// Drain the queue until cancellation, then flush whatever is left.
    ///
    /// The receive wait is bounded to 0.5 s so the stop signal is observed
    /// promptly even on an idle queue.
    pub async fn run(mut self) {
        loop {
            match tokio::time::timeout(Duration::from_millis(500), self.rx.recv()).await {
                Ok(Some(job)) => self.write_job(job).await,
                Ok(None) => break,
                Err(_elapsed) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                }
            }
            if self.cancel.is_cancelled() {
                // Flush anything already queued before exiting.
                let mut remaining = VecDeque::new();
                while let Ok(job) = self.rx.try_recv() {
                    remaining.push_back(job);
                }
                for job in remaining {
                    self.write_job(job).await;
                }
                break;
            }
        }
        debug!("CSV writer stopped");
    }

    async fn write_job(&self, job: CsvJob) {
        let (path, header, line) = match &job {
            CsvJob::Telemetry(row) => (&self.telemetry_path, TELEMETRY_HEADER, row.to_csv_line()),
            CsvJob::Alert(row) => (&self.alerts_path, ALERTS_HEADER, row.to_csv_line()),
        };
        write_with_retry(path, header, &line).await;
    }
}

/// Append one line, creating the file with its header on first write.
/// Retries transient I/O errors with exponential backoff, then drops the row.
async fn write_with_retry(path: &Path, header: &str, line: &str) {
    let mut last_err = None;
    for attempt in 0..CSV_WRITE_RETRIES {
        match append_line(path, header, line) {
            Ok(()) => return,
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < CSV_WRITE_RETRIES {
                    let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }
    warn!(
        path = %path.display(),
        error = ?last_err,
        "CSV write failed after {CSV_WRITE_RETRIES} retries; dropping row"
    );
}

fn append_line(path: &Path, header: &str, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let new_file = !path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if new_file {
        writeln!(file, "{header}")?;
    }
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_row() -> TelemetryRow {
        TelemetryRow {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 18, 10, 0, 0).unwrap(),
            risk_score: 0.51234,
            status: PumpStatus::Healthy,
            features: FeatureVector([2.0, 3.0, 3.14159, 45.0, 6.0, 0.05, 38.0, -0.25]),
        }
    }

    #[test]
    fn telemetry_row_round_trips_to_four_decimals() {
        let row = sample_row();
        let line = row.to_csv_line();
        let back = TelemetryRow::from_csv_line(&line).unwrap();
        assert_eq!(back.status, row.status);
        assert_eq!(back.timestamp, row.timestamp);
        for (a, b) in back.features.as_slice().iter().zip(row.features.as_slice()) {
            assert!((a - b).abs() < 5e-5, "field {a} vs {b}");
        }
        assert!((back.risk_score - row.risk_score).abs() < 5e-5);
    }

    #[test]
    fn alert_row_format() {
        let row = AlertRow {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 18, 10, 0, 0).unwrap(),
            pump_id: "PUMP_01".to_string(),
            status: PumpStatus::Critical,
            anomaly_probability: 0.95,
            sensor_status: "OK".to_string(),
        };
        assert_eq!(
            row.to_csv_line(),
            "2026-02-18 10:00:00,PUMP_01,CRITICAL,0.9500,OK"
        );
    }

    #[tokio::test]
    async fn writer_creates_files_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        let telemetry = dir.path().join("telemetry_history.csv");
        let alerts = dir.path().join("alerts_history.csv");
        let cancel = CancellationToken::new();
        let (handle, writer) = csv_log(telemetry.clone(), alerts.clone(), cancel.clone());
        let task = tokio::spawn(writer.run());

        handle.append_telemetry(sample_row());
        handle.append_alert(AlertRow {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 18, 10, 0, 0).unwrap(),
            pump_id: "PUMP_01".to_string(),
            status: PumpStatus::Warning,
            anomaly_probability: 0.61,
            sensor_status: "OK".to_string(),
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();

        let telemetry_lines = std::fs::read_to_string(&telemetry).unwrap();
        let telemetry_lines: Vec<&str> = telemetry_lines.trim().lines().collect();
        assert_eq!(telemetry_lines.len(), 2);
        assert_eq!(telemetry_lines[0], TELEMETRY_HEADER);

        let alert_lines = std::fs::read_to_string(&alerts).unwrap();
        let alert_lines: Vec<&str> = alert_lines.trim().lines().collect();
        assert_eq!(alert_lines.len(), 2);
        assert_eq!(alert_lines[0], ALERTS_HEADER);
    }

    #[tokio::test]
    async fn full_queue_drops_rows_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        // Writer never started: the queue just fills up.
        let (handle, _writer) = csv_log_with_capacity(
            dir.path().join("t.csv"),
            dir.path().join("a.csv"),
            cancel,
            2,
        );
        for _ in 0..10 {
            handle.append_telemetry(sample_row());
        }
        // Reaching here without blocking is the assertion.
    }
}
