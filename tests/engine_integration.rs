//! End-to-end pipeline scenarios: canonical failure signatures driven
//! through batch preparation, inference, and the rule engine, plus the
//! audit-trail round trip and a full twin smoke run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pumpguard::config::EngineConfig;
use pumpguard::pipeline::source::{ChannelSink, ReplaySource};
use pumpguard::pipeline::{EngineLoop, PipelineRunner};
use pumpguard::predictor::Predictor;
use pumpguard::storage::{self, TelemetryRow};
use pumpguard::twin::{self, TwinOptions};
use pumpguard::types::{AlarmCause, PumpStatus, TelemetrySample, TripCause};

// ============================================================================
// Fixtures
// ============================================================================

/// Write stub classifier + scaler artifacts: a 3-tree forest voting anomalous
/// above 5 / 5 / 10 mm/s vibration, with an identity scaler.
fn write_stub_artifacts(config: &EngineConfig) {
    std::fs::create_dir_all(&config.paths.model_dir).unwrap();

    let tree = |threshold: f64| {
        serde_json::json!({
            "nodes": [
                {"feature": 0, "threshold": threshold, "left": 1, "right": 2, "counts": [0.0, 0.0]},
                {"feature": -1, "threshold": 0.0, "left": 0, "right": 0, "counts": [10.0, 0.0]},
                {"feature": -1, "threshold": 0.0, "left": 0, "right": 0, "counts": [0.0, 10.0]},
            ]
        })
    };
    let classifier = serde_json::json!({
        "n_classes": 2,
        "trees": [tree(5.0), tree(5.0), tree(10.0)],
    });
    std::fs::write(
        config.classifier_path(),
        serde_json::to_string_pretty(&classifier).unwrap(),
    )
    .unwrap();

    let scaler = serde_json::json!({
        "feature_names": pumpguard::FEATURE_NAMES,
        "mean": vec![0.0_f64; 8],
        "scale": vec![1.0_f64; 8],
    });
    std::fs::write(
        config.scaler_path(),
        serde_json::to_string_pretty(&scaler).unwrap(),
    )
    .unwrap();
}

struct Harness {
    _dir: tempfile::TempDir,
    _cancel: CancellationToken,
    runner: PipelineRunner,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.paths.log_dir = dir.path().join("logs");
    config.paths.model_dir = dir.path().join("models");
    write_stub_artifacts(&config);

    let cancel = CancellationToken::new();
    let (csv, _writer) = storage::csv_log(
        config.telemetry_log_path(),
        config.alerts_log_path(),
        cancel.clone(),
    );
    let predictor = Predictor::new(&config);
    assert!(predictor.has_model(), "stub artifacts must load");
    let runner = PipelineRunner::new(&config, predictor, csv);
    Harness {
        _dir: dir,
        _cancel: cancel,
        runner,
    }
}

fn sample(vib: f64, crest: f64, kurtosis: f64, current: f64, pressure: f64, temp: f64) -> TelemetrySample {
    TelemetrySample {
        vib_rms: Some(vib),
        vib_crest: Some(crest),
        vib_kurtosis: Some(kurtosis),
        current: Some(current),
        pressure: Some(pressure),
        temp: Some(temp),
        cavitation_index: Some(if pressure > 0.0 { vib / pressure } else { 0.0 }),
        debris_impact: false,
    }
}

fn window(vib: f64, crest: f64, kurtosis: f64, current: f64, pressure: f64, temp: f64) -> Vec<TelemetrySample> {
    vec![sample(vib, crest, kurtosis, current, pressure, temp); 30]
}

// ============================================================================
// Canonical scenarios
// ============================================================================

#[tokio::test]
async fn choked_discharge_trips_critical() {
    let mut h = harness();
    let batch = window(3.0, 3.0, 4.0, 36.0, 7.5, 72.0);
    let report = h.runner.run_batch(&batch).await;

    assert_eq!(report.status, PumpStatus::Critical);
    assert_eq!(report.trip_cause, Some(TripCause::ChokedDischarge));
    assert!(report
        .reason
        .as_deref()
        .unwrap()
        .starts_with("CHOKED DISCHARGE"));
    assert!(report.anomaly_probability >= 0.85);
    assert_eq!(report.sensor_health, "OK");
}

#[tokio::test]
async fn debris_impact_flag_trips_mechanical() {
    let mut h = harness();
    let mut batch = window(8.0, 7.0, 5.0, 45.0, 6.0, 42.0);
    for s in &mut batch {
        s.debris_impact = true;
    }
    let report = h.runner.run_batch(&batch).await;

    assert_eq!(report.status, PumpStatus::Critical);
    assert_eq!(report.trip_cause, Some(TripCause::DebrisImpact));
    assert!(report.reason.as_deref().unwrap().contains("DEBRIS"));
}

#[tokio::test]
async fn cavitation_wins_over_vibration_interlock() {
    let mut h = harness();
    let batch = window(9.5, 4.0, 4.0, 55.0, 3.5, 50.0);
    let mut report = h.runner.run_batch(&batch).await;
    for _ in 0..4 {
        report = h.runner.run_batch(&batch).await;
    }

    assert_eq!(report.status, PumpStatus::Critical);
    assert_eq!(report.trip_cause, Some(TripCause::Cavitation));
    assert!(report.alarm_causes.contains(&AlarmCause::Cavitation));
    assert!(report.alarm_causes.contains(&AlarmCause::VibInterlock));
}

#[tokio::test]
async fn zone_d_vibration_alone_is_critical_without_interlock_trip() {
    let mut h = harness();
    let batch = window(7.5, 4.0, 4.0, 45.0, 6.0, 42.0);
    let report = h.runner.run_batch(&batch).await;

    assert_eq!(report.status, PumpStatus::Critical);
    let reason = report.reason.as_deref().unwrap();
    assert!(reason.contains("Zone D") || reason.contains("7.1"));
    // Interlock trips only at 9 mm/s and above
    assert_eq!(report.trip_cause, None);
}

#[tokio::test]
async fn healthy_nominal_recovery_resets_to_healthy() {
    let mut h = harness();

    // Elevated vibration: WARNING-tier step
    let warning = h.runner.run_batch(&window(6.0, 4.0, 4.0, 45.0, 6.0, 42.0)).await;
    assert!(matches!(
        warning.status,
        PumpStatus::Warning | PumpStatus::Critical
    ));

    // Healthy-nominal window clears the alarm immediately
    let recovered = h.runner.run_batch(&window(3.0, 3.0, 3.0, 45.0, 5.8, 45.0)).await;
    assert_eq!(recovered.status, PumpStatus::Healthy);
    assert!(recovered.trip_cause.is_none());
}

#[tokio::test]
async fn out_of_range_batch_goes_offline() {
    let mut h = harness();
    let mut batch = window(2.0, 3.0, 3.2, 45.0, 6.0, 42.0);
    batch[11].temp = Some(150.0);
    let report = h.runner.run_batch(&batch).await;

    assert_eq!(report.status, PumpStatus::Offline);
    assert_eq!(report.sensor_health, "INVALID_RANGE:TEMP_OUT_OF_RANGE:150");
    assert!(report.features.is_none());
    assert_eq!(report.anomaly_probability, 0.0);
}

// ============================================================================
// Audit trail round trip
// ============================================================================

#[tokio::test]
async fn telemetry_audit_row_round_trips_through_csv() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.paths.log_dir = dir.path().join("logs");
    config.paths.model_dir = dir.path().join("models");
    write_stub_artifacts(&config);

    let cancel = CancellationToken::new();
    let (csv, writer) = storage::csv_log(
        config.telemetry_log_path(),
        config.alerts_log_path(),
        cancel.clone(),
    );
    let writer_task = tokio::spawn(writer.run());

    let predictor = Predictor::new(&config);
    let mut runner = PipelineRunner::new(&config, predictor, csv);
    let report = runner.run_batch(&window(2.0, 3.0, 3.2, 45.0, 6.0, 38.0)).await;
    assert_eq!(report.status, PumpStatus::Healthy);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    cancel.cancel();
    writer_task.await.unwrap();

    let contents = std::fs::read_to_string(config.telemetry_log_path()).unwrap();
    let mut lines = contents.trim().lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("timestamp,risk_score,status,vib_rms"));

    let row = TelemetryRow::from_csv_line(lines.next().unwrap()).unwrap();
    assert_eq!(row.status, PumpStatus::Healthy);
    let expected = report.features.unwrap();
    for (parsed, original) in row.features.as_slice().iter().zip(expected.as_slice()) {
        assert!(
            (parsed - original).abs() < 5e-5,
            "audit row must preserve 4 decimal places: {parsed} vs {original}"
        );
    }
}

// ============================================================================
// Engine loop cadence over the channel transport
// ============================================================================

#[tokio::test]
async fn engine_loop_processes_replayed_telemetry() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.paths.log_dir = dir.path().join("logs");
    config.paths.model_dir = dir.path().join("models");
    config.smoothing.feature_window_size = 10;
    config.mqtt.batch_size = 5;
    write_stub_artifacts(&config);

    let cancel = CancellationToken::new();
    let (csv, _writer) = storage::csv_log(
        config.telemetry_log_path(),
        config.alerts_log_path(),
        cancel.clone(),
    );
    let predictor = Predictor::new(&config);
    let runner = PipelineRunner::new(&config, predictor, csv);
    let sink = Arc::new(ChannelSink::new(32));
    let mut reports = sink.subscribe();

    let engine = EngineLoop::new(&config, runner, sink, cancel.clone());
    // 20 nominal samples: window fills at 10, pipeline runs at 10, 15, 20
    let samples = vec![sample(2.0, 3.0, 3.2, 45.0, 6.0, 38.0); 20];
    let mut source = ReplaySource::new(samples, 0);
    let stats = engine.run(&mut source).await;

    assert_eq!(stats.samples_ingested, 20);
    assert_eq!(stats.batches_processed, 3);
    let report = reports.recv().await.unwrap();
    assert_eq!(report.status, PumpStatus::Healthy);
}

// ============================================================================
// Digital twin smoke run
// ============================================================================

#[tokio::test]
async fn twin_runs_end_to_end_for_a_few_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.paths.log_dir = dir.path().join("logs");
    config.paths.model_dir = dir.path().join("models");
    write_stub_artifacts(&config);

    let cancel = CancellationToken::new();
    twin::run(
        &config,
        TwinOptions {
            interval: std::time::Duration::from_millis(50),
            count: 3,
            seed: Some(7),
        },
        cancel,
    )
    .await
    .unwrap();

    // Header plus at least one audit row per processed tick
    let contents = std::fs::read_to_string(config.telemetry_log_path()).unwrap();
    let rows = contents.trim().lines().count();
    assert!(rows >= 2, "expected header + audit rows, got {rows} lines");
}
