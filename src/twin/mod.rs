//! Digital-twin simulator.
//!
//! Runs the pump model and the decision engine as two cooperating tasks in
//! one process, wired through the in-process transport: the twin synthesizes
//! one telemetry window per tick, the engine loop runs the full production
//! pipeline over it, and the twin maps the resulting verdicts to protective
//! shutdowns with cooldown and restart.

pub mod scenarios;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::pipeline::source::ChannelSink;
use crate::pipeline::{telemetry_channel, EngineCommand, EngineLoop, PipelineRunner};
use crate::predictor::Predictor;
use crate::storage::{self, CsvLogHandle, TelemetryRow};
use crate::types::{FeatureVector, PumpStatus, StatusReport, TripCause};
use scenarios::{ChannelMeans, ScenarioEngine};

/// Cavitation must be sustained this long before the twin trips the pump.
const CAVITATION_SUSTAIN: Duration = Duration::from_secs(10);
/// Overtemperature needs at least this many consecutive ticks...
const OVERTEMP_MIN_TICKS: u32 = 2;
/// ...spanning at least this much wall-clock time.
const OVERTEMP_MIN_ELAPSED: Duration = Duration::from_secs(6);
/// Ticks the pump stays down after an overtemp or choked shutdown.
const COOLDOWN_TICKS: u32 = 3;

// ============================================================================
// Shutdown policy
// ============================================================================

/// Maps engine verdicts to hard shutdowns, in fixed priority:
/// debris -> choked -> cavitation (sustained) -> overtemp (confirmed) ->
/// vibration interlock. CRITICAL without a trip cause is a no-op.
#[derive(Debug, Default)]
pub struct ShutdownPolicy {
    cavitation_since: Option<Instant>,
    overtemp_ticks: u32,
    overtemp_since: Option<Instant>,
}

impl ShutdownPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Evaluate one report; returns the shutdown to perform, if any.
    pub fn evaluate(&mut self, report: &StatusReport, now: Instant) -> Option<TripCause> {
        let cause = report.trip_cause;

        // Sustained-cavitation tracking.
        let cavitation_ready = if cause == Some(TripCause::Cavitation) {
            let since = *self.cavitation_since.get_or_insert(now);
            now.duration_since(since) >= CAVITATION_SUSTAIN
        } else {
            self.cavitation_since = None;
            false
        };

        // Overtemp confirmation tracking.
        let overtemp_ready = if cause == Some(TripCause::Overtemp) {
            self.overtemp_ticks += 1;
            let since = *self.overtemp_since.get_or_insert(now);
            self.overtemp_ticks >= OVERTEMP_MIN_TICKS
                && now.duration_since(since) >= OVERTEMP_MIN_ELAPSED
        } else {
            self.overtemp_ticks = 0;
            self.overtemp_since = None;
            false
        };

        match cause {
            Some(TripCause::DebrisImpact) => Some(TripCause::DebrisImpact),
            Some(TripCause::ChokedDischarge) => Some(TripCause::ChokedDischarge),
            Some(TripCause::Cavitation) if cavitation_ready => Some(TripCause::Cavitation),
            Some(TripCause::Overtemp) if overtemp_ready => Some(TripCause::Overtemp),
            Some(TripCause::VibInterlock)
                if report
                    .reason
                    .as_deref()
                    .is_some_and(|r| r.contains("VIBRATION")) =>
            {
                Some(TripCause::VibInterlock)
            }
            _ => None,
        }
    }
}

/// Overtemp and choked shutdowns force a cooldown before restart.
pub fn needs_cooldown(cause: TripCause) -> bool {
    matches!(cause, TripCause::Overtemp | TripCause::ChokedDischarge)
}

// ============================================================================
// Twin runner
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct TwinOptions {
    /// Wall-clock tick cadence.
    pub interval: Duration,
    /// Number of ticks to run; 0 means run until cancelled.
    pub count: u64,
    /// Seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for TwinOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            count: 0,
            seed: None,
        }
    }
}

/// Run the twin + engine pair until `count` ticks or cancellation.
pub async fn run(
    config: &EngineConfig,
    opts: TwinOptions,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let (csv, csv_writer) = storage::csv_log(
        config.telemetry_log_path(),
        config.alerts_log_path(),
        cancel.clone(),
    );
    let csv_writer_task = tokio::spawn(csv_writer.run());

    let predictor = Predictor::new(config);
    let runner = PipelineRunner::new(config, predictor, csv.clone());

    let window_size = config.smoothing.feature_window_size;
    let (sample_tx, mut source) = telemetry_channel(window_size * 2);
    let sink = Arc::new(ChannelSink::new(32));
    let mut reports = sink.subscribe();
    let (command_tx, command_rx) = mpsc::channel(4);

    // The twin triggers exactly one pipeline step per synthesized window.
    let engine = EngineLoop::new(config, runner, sink, cancel.clone())
        .with_batch_size(window_size)
        .with_commands(command_rx);
    let engine_task = tokio::spawn(async move { engine.run(&mut source).await });

    let mut scenario_engine = ScenarioEngine::new();
    let mut policy = ShutdownPolicy::new();
    let mut cooldown_ticks: u32 = 0;
    let mut ticks: u64 = 0;

    info!(
        interval_secs = opts.interval.as_secs_f64(),
        count = opts.count,
        "Digital twin started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(opts.interval) => {}
        }

        ticks += 1;
        if cooldown_ticks > 0 {
            cooldown_ticks -= 1;
            if cooldown_ticks == 0 {
                println!("── PUMP RESTART: cooldown complete, resuming operation ──");
            }
        } else {
            let means = scenario_engine.tick(&mut rng);
            let window = scenario_engine.synthesize_window(&means, window_size, &mut rng);
            for sample in window {
                if sample_tx.send(sample).await.is_err() {
                    warn!("Engine loop gone; twin stopping");
                    cancel.cancel();
                    break;
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            match tokio::time::timeout(Duration::from_secs(10), reports.recv()).await {
                Ok(Ok(report)) => {
                    log_tick(ticks, &scenario_engine, &report);
                    if let Some(shutdown) = policy.evaluate(&report, Instant::now()) {
                        perform_shutdown(
                            shutdown, &report, &means, &csv, &command_tx, &mut scenario_engine,
                            &mut policy,
                        )
                        .await;
                        if needs_cooldown(shutdown) {
                            cooldown_ticks = COOLDOWN_TICKS;
                        }
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "Report stream lagged"),
                Err(_) => warn!("No report within 10 s of a full window"),
            }
        }

        if opts.count > 0 && ticks >= opts.count {
            break;
        }
    }

    cancel.cancel();
    drop(sample_tx);
    let stats = engine_task.await?;
    csv_writer_task.await?;
    info!(
        ticks,
        batches = stats.batches_processed,
        "Digital twin stopped"
    );
    Ok(())
}

fn log_tick(ticks: u64, engine: &ScenarioEngine, report: &StatusReport) {
    info!(
        tick = ticks,
        health = format!("{:.3}", engine.health),
        scenario = ?engine.active_scenario(),
        status = %report.status,
        prob = report.anomaly_probability,
        trip = ?report.trip_cause,
        "Twin tick"
    );
}

/// Trip the pump: audit row with the real sensor means, operator banner,
/// smoothing reset, health back to zero.
async fn perform_shutdown(
    cause: TripCause,
    report: &StatusReport,
    means: &ChannelMeans,
    csv: &CsvLogHandle,
    commands: &mpsc::Sender<EngineCommand>,
    scenario_engine: &mut ScenarioEngine,
    policy: &mut ShutdownPolicy,
) {
    let cavitation_index = if means.pressure > 0.0 {
        (means.vib_rms / means.pressure).clamp(0.0, 50.0)
    } else {
        0.0
    };
    csv.append_telemetry(TelemetryRow {
        timestamp: chrono::Utc::now(),
        risk_score: report.anomaly_probability,
        status: PumpStatus::Critical,
        features: FeatureVector([
            means.vib_rms,
            means.vib_crest,
            means.vib_kurtosis,
            means.current,
            means.pressure,
            cavitation_index,
            means.temp,
            0.0,
        ]),
    });

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "🛑 PROTECTIVE SHUTDOWN: {cause} — {}",
        report.reason.as_deref().unwrap_or("no diagnostic")
    );
    println!(
        "   sensor means: vib {:.2} mm/s | crest {:.2} | current {:.1} A | pressure {:.2} bar | temp {:.1} °C",
        means.vib_rms, means.vib_crest, means.current, means.pressure, means.temp
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    warn!(%cause, "Protective shutdown executed");

    if commands.send(EngineCommand::ResetSmoothing).await.is_err() {
        warn!("Engine loop gone; smoothing reset not delivered");
    }
    scenario_engine.reset_after_shutdown();
    policy.reset();
}
