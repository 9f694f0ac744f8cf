//! Pump state inference.
//!
//! Wraps the serialized classifier + scaler, the risk-smoothing state, and
//! the rule engine into the per-batch `predict` call. On artifact load
//! failure the predictor stays usable and every call returns `UNKNOWN` with
//! probability 0, and the engine runs in data-collection mode.

pub mod artifacts;
pub mod smoothing;

pub use artifacts::{ArtifactError, DecisionTree, FeatureScaler, ModelArtifacts, PumpClassifier, TreeNode};
pub use smoothing::{display_map, SmoothingState};

use tracing::{error, info, warn};

use crate::config::{defaults, EngineConfig, MessageConfig, SmoothingConfig, ThresholdConfig};
use crate::rules::{self, RuleContext};
use crate::types::{AlarmCause, FeatureVector, PumpStatus, TelemetrySample, TripCause};

/// Optional per-call inputs that refine the rule context.
#[derive(Debug, Default, Clone, Copy)]
pub struct PredictOptions<'a> {
    /// Use the stricter startup CRITICAL threshold.
    pub is_startup: bool,
    /// Latest raw sample; overrides the "latest" readings in the rule context.
    pub latest: Option<&'a TelemetrySample>,
    /// ISO-band vibration RMS; overrides both smoothed and latest vibration
    /// for zone/interlock decisions.
    pub iso_vib_rms: Option<f64>,
    /// Debris impact flag observed on this batch.
    pub debris_flag: bool,
}

/// Outcome of one pipeline step.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub status: PumpStatus,
    /// Operator display probability in [0, 1].
    pub display_prob: f64,
    /// Smoothed model probability before display mapping.
    pub smoothed_prob: f64,
    pub reason: Option<String>,
    pub trip_cause: Option<TripCause>,
    pub alarm_causes: Vec<AlarmCause>,
}

impl Verdict {
    fn plain(status: PumpStatus) -> Self {
        Self {
            status,
            display_prob: 0.0,
            smoothed_prob: 0.0,
            reason: None,
            trip_cause: None,
            alarm_causes: Vec::new(),
        }
    }
}

/// Inference module: model artifacts + smoothing state + rule pipeline.
pub struct Predictor {
    model: Option<ModelArtifacts>,
    thresholds: ThresholdConfig,
    messages: MessageConfig,
    smoothing: SmoothingConfig,
    state: SmoothingState,
}

impl Predictor {
    /// Load artifacts from the configured paths. A load failure is logged
    /// and leaves the predictor in UNKNOWN mode; callers that want fail-fast
    /// behaviour check `validate_artifacts` separately.
    pub fn new(cfg: &EngineConfig) -> Self {
        let model = match ModelArtifacts::load(&cfg.classifier_path(), &cfg.scaler_path()) {
            Ok(artifacts) => {
                info!(
                    classifier = %cfg.classifier_path().display(),
                    trees = artifacts.classifier.trees.len(),
                    classes = artifacts.classifier.n_classes,
                    "Predictor: model and scaler loaded"
                );
                Some(artifacts)
            }
            Err(e) => {
                error!(error = %e, "Predictor: failed to load model artifacts — running in data-collection mode");
                None
            }
        };
        Self::with_artifacts(model, cfg)
    }

    /// Build a predictor around pre-loaded (or absent) artifacts.
    pub fn with_artifacts(model: Option<ModelArtifacts>, cfg: &EngineConfig) -> Self {
        Self {
            model,
            thresholds: cfg.thresholds.clone(),
            messages: cfg.messages.clone(),
            smoothing: cfg.smoothing.clone(),
            state: SmoothingState::new(),
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn last_status(&self) -> Option<PumpStatus> {
        self.state.last_status
    }

    pub fn last_reason(&self) -> Option<&str> {
        self.state.last_reason.as_deref()
    }

    /// Clear the smoothing memory (twin restart, operator acknowledgement).
    pub fn reset_smoothing(&mut self) {
        self.state.reset();
    }

    /// Run one pipeline step over a prepared feature vector.
    pub fn predict(&mut self, features: &FeatureVector, opts: PredictOptions<'_>) -> Verdict {
        let Some(model) = &self.model else {
            return Verdict::plain(PumpStatus::Unknown);
        };

        // Recovery reset: a pump that returns to the healthy-nominal band
        // after an alarm starts with fresh smoothing memory.
        if matches!(
            self.state.last_status,
            Some(PumpStatus::Warning | PumpStatus::Critical)
        ) && is_healthy_nominal(features, opts.latest)
        {
            info!("Predictor: healthy-nominal recovery observed — resetting smoothing state");
            self.state.reset();
        }

        let smoothed_row = self.state.push_features(*features, &self.smoothing);

        let instant_prob = match model.infer(&smoothed_row.0) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Inference error");
                // Hysteresis state is left untouched so a transient error
                // cannot break an alarm chain.
                return Verdict::plain(PumpStatus::Error);
            }
        };

        let smoothed_prob = self.state.update_risk(instant_prob, &self.smoothing);
        let display_prob = display_map(smoothed_prob);

        let critical_entry = if opts.is_startup {
            self.smoothing.prob_critical_startup
        } else {
            self.smoothing.prob_critical
        };
        let base_status = if smoothed_prob >= critical_entry {
            PumpStatus::Critical
        } else if smoothed_prob >= self.smoothing.prob_warning {
            PumpStatus::Warning
        } else {
            PumpStatus::Healthy
        };

        let mut ctx = self.build_context(
            &smoothed_row,
            features,
            opts,
            smoothed_prob,
            display_prob,
            base_status,
        );
        rules::evaluate(&mut ctx, &self.thresholds, &self.messages);

        self.state.last_status = Some(ctx.status);
        self.state.last_reason = ctx.reason.clone();
        self.state.critical_low_vib_steps = ctx.critical_low_vib_steps;

        Verdict {
            status: ctx.status,
            display_prob: ctx.display_prob.clamp(0.0, 1.0),
            smoothed_prob,
            reason: ctx.reason,
            trip_cause: ctx.trip_cause,
            alarm_causes: ctx.alarm_causes,
        }
    }

    fn build_context(
        &self,
        smoothed: &FeatureVector,
        latest_features: &FeatureVector,
        opts: PredictOptions<'_>,
        smoothed_prob: f64,
        display_prob: f64,
        base_status: PumpStatus,
    ) -> RuleContext {
        // Latest readings default to the current (unsmoothed) feature vector,
        // overridden field-by-field from the raw sample when available.
        let mut latest_vib = latest_features.vib_rms();
        let mut latest_crest = latest_features.vib_crest();
        let mut latest_current = latest_features.current();
        let mut latest_pressure = latest_features.pressure();
        let mut latest_temp = latest_features.temp();
        if let Some(sample) = opts.latest {
            if let Some(v) = sample.vib_rms {
                latest_vib = v;
            }
            if let Some(v) = sample.vib_crest {
                latest_crest = v;
            }
            if let Some(v) = sample.current {
                latest_current = v;
            }
            if let Some(v) = sample.pressure {
                latest_pressure = v;
            }
            if let Some(v) = sample.temp {
                latest_temp = v;
            }
        }

        let mut vib_rms = smoothed.vib_rms();
        if let Some(iso) = opts.iso_vib_rms {
            vib_rms = iso;
            latest_vib = iso;
        }

        RuleContext {
            vib_rms,
            vib_crest: smoothed.vib_crest(),
            current: smoothed.current(),
            pressure: smoothed.pressure(),
            temp: smoothed.temp(),
            latest_vib,
            latest_crest,
            latest_current,
            latest_pressure,
            latest_temp,
            smoothed_prob,
            prev_reason: self.state.last_reason.clone(),
            last_status: self.state.last_status,
            debris_flag: opts.debris_flag,
            status: base_status,
            reason: None,
            display_prob,
            critical_low_vib_steps: self.state.critical_low_vib_steps,
            trip_cause: None,
            alarm_causes: Vec::new(),
        }
    }
}

/// The healthy-nominal recovery band. Checked on the latest raw sample when
/// present, otherwise on the current feature vector. The band is narrower
/// than the WARNING thresholds (current must exceed 40 A strictly); the
/// asymmetry is intentional.
fn is_healthy_nominal(features: &FeatureVector, latest: Option<&TelemetrySample>) -> bool {
    let (vib, pressure, temp, current) = match latest {
        Some(s) => (
            s.vib_rms.unwrap_or_else(|| features.vib_rms()),
            s.pressure.unwrap_or_else(|| features.pressure()),
            s.temp.unwrap_or_else(|| features.temp()),
            s.current.unwrap_or_else(|| features.current()),
        ),
        None => (
            features.vib_rms(),
            features.pressure(),
            features.temp(),
            features.current(),
        ),
    };
    vib < defaults::RECOVERY_VIB_MAX_MMPS
        && (defaults::RECOVERY_PRESSURE_MIN_BAR..defaults::RECOVERY_PRESSURE_MAX_BAR)
            .contains(&pressure)
        && (defaults::RECOVERY_TEMP_MIN_C..defaults::RECOVERY_TEMP_MAX_C).contains(&temp)
        && current > defaults::RECOVERY_CURRENT_MIN_AMP
        && current < defaults::RECOVERY_CURRENT_MAX_AMP
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FEATURE_NAMES, NUM_FEATURES};

    /// A forest that calls everything above 5 mm/s vibration anomalous.
    fn stub_artifacts() -> ModelArtifacts {
        let healthy = TreeNode {
            feature: -1,
            threshold: 0.0,
            left: 0,
            right: 0,
            counts: vec![10.0, 0.0],
        };
        let anomalous = TreeNode {
            feature: -1,
            threshold: 0.0,
            left: 0,
            right: 0,
            counts: vec![0.0, 10.0],
        };
        let split = TreeNode {
            feature: 0,
            threshold: 5.0,
            left: 1,
            right: 2,
            counts: vec![0.0, 0.0],
        };
        ModelArtifacts {
            classifier: PumpClassifier {
                n_classes: 2,
                trees: vec![DecisionTree {
                    nodes: vec![split, healthy, anomalous],
                }],
            },
            scaler: FeatureScaler {
                feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                mean: vec![0.0; NUM_FEATURES],
                scale: vec![1.0; NUM_FEATURES],
            },
        }
    }

    fn predictor() -> Predictor {
        Predictor::with_artifacts(Some(stub_artifacts()), &EngineConfig::default())
    }

    fn features(vib: f64, crest: f64, current: f64, pressure: f64, temp: f64) -> FeatureVector {
        FeatureVector([vib, crest, 3.0, current, pressure, 0.1, temp, 0.0])
    }

    #[test]
    fn unknown_without_model() {
        let mut p = Predictor::with_artifacts(None, &EngineConfig::default());
        let verdict = p.predict(&features(2.0, 3.0, 45.0, 6.0, 40.0), PredictOptions::default());
        assert_eq!(verdict.status, PumpStatus::Unknown);
        assert_eq!(verdict.display_prob, 0.0);
    }

    #[test]
    fn healthy_input_is_healthy() {
        let mut p = predictor();
        let verdict = p.predict(&features(2.0, 3.0, 45.0, 6.0, 40.0), PredictOptions::default());
        assert_eq!(verdict.status, PumpStatus::Healthy);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn cavitation_signature_trips_rules() {
        let mut p = predictor();
        let f = features(9.5, 4.0, 55.0, 3.5, 50.0);
        let mut verdict = p.predict(&f, PredictOptions::default());
        for _ in 0..2 {
            verdict = p.predict(&f, PredictOptions::default());
        }
        assert_eq!(verdict.status, PumpStatus::Critical);
        assert_eq!(verdict.trip_cause, Some(TripCause::Cavitation));
        assert!(verdict.alarm_causes.contains(&AlarmCause::Cavitation));
        assert!(verdict
            .reason
            .as_deref()
            .unwrap_or_default()
            .contains("CAVITATION"));
        assert!(verdict.display_prob >= 0.95);
    }

    #[test]
    fn degradation_signature_warns() {
        let mut p = predictor();
        let f = features(3.5, 3.0, 39.0, 4.8, 48.0);
        let mut verdict = p.predict(&f, PredictOptions::default());
        for _ in 0..2 {
            verdict = p.predict(&f, PredictOptions::default());
        }
        assert_eq!(verdict.status, PumpStatus::Warning);
        let reason = verdict.reason.unwrap_or_default();
        assert!(reason.contains("MAINTENANCE") && reason.contains("shutdown"));
        assert!(verdict.trip_cause.is_none());
    }

    #[test]
    fn startup_uses_stricter_critical_threshold() {
        let mut p = predictor();
        // Anomalous vibration saturates the model probability
        let f = features(8.0, 4.0, 45.0, 6.0, 40.0);
        let verdict = p.predict(
            &f,
            PredictOptions {
                is_startup: true,
                ..PredictOptions::default()
            },
        );
        // First step: smoothed prob = 1.0 >= 0.90 -> still CRITICAL at startup
        assert_eq!(verdict.status, PumpStatus::Critical);
    }

    #[test]
    fn iso_band_overrides_vibration_for_zones() {
        let mut p = predictor();
        // Feature vibration is quiet, ISO band says Zone D
        let f = features(2.0, 3.0, 45.0, 6.0, 40.0);
        let verdict = p.predict(
            &f,
            PredictOptions {
                iso_vib_rms: Some(7.5),
                ..PredictOptions::default()
            },
        );
        assert_eq!(verdict.status, PumpStatus::Critical);
        assert!(verdict.alarm_causes.contains(&AlarmCause::VibZoneD));
    }

    #[test]
    fn latest_sample_overrides_rule_inputs() {
        let mut p = predictor();
        let f = features(2.0, 3.0, 45.0, 6.0, 40.0);
        let latest = TelemetrySample {
            vib_rms: Some(3.0),
            current: Some(36.0),
            pressure: Some(7.5),
            temp: Some(72.0),
            ..TelemetrySample::default()
        };
        let verdict = p.predict(
            &f,
            PredictOptions {
                latest: Some(&latest),
                ..PredictOptions::default()
            },
        );
        assert_eq!(verdict.status, PumpStatus::Critical);
        assert_eq!(verdict.trip_cause, Some(TripCause::ChokedDischarge));
    }

    #[test]
    fn debris_flag_forces_mechanical_trip() {
        let mut p = predictor();
        let f = features(8.0, 7.0, 45.0, 6.0, 40.0);
        let verdict = p.predict(
            &f,
            PredictOptions {
                debris_flag: true,
                ..PredictOptions::default()
            },
        );
        assert_eq!(verdict.status, PumpStatus::Critical);
        assert_eq!(verdict.trip_cause, Some(TripCause::DebrisImpact));
    }

    #[test]
    fn recovery_resets_smoothing_and_returns_healthy() {
        let mut p = predictor();
        // Drive into WARNING territory via Zone C vibration
        let noisy = features(6.0, 4.0, 45.0, 6.0, 40.0);
        for _ in 0..3 {
            p.predict(&noisy, PredictOptions::default());
        }
        assert!(matches!(
            p.last_status(),
            Some(PumpStatus::Warning | PumpStatus::Critical)
        ));

        // Healthy-nominal sample: smoothing resets, verdict returns HEALTHY
        let clean = features(3.0, 3.0, 45.0, 5.8, 45.0);
        let latest = TelemetrySample {
            vib_rms: Some(3.0),
            current: Some(45.0),
            pressure: Some(5.8),
            temp: Some(45.0),
            ..TelemetrySample::default()
        };
        let verdict = p.predict(
            &clean,
            PredictOptions {
                latest: Some(&latest),
                ..PredictOptions::default()
            },
        );
        assert_eq!(verdict.status, PumpStatus::Healthy);
    }

    #[test]
    fn reset_smoothing_clears_state() {
        let mut p = predictor();
        p.predict(&features(8.0, 4.0, 45.0, 6.0, 40.0), PredictOptions::default());
        p.reset_smoothing();
        let verdict = p.predict(&features(2.0, 3.0, 45.0, 6.0, 40.0), PredictOptions::default());
        assert_eq!(verdict.status, PumpStatus::Healthy);
    }

    #[test]
    fn critical_display_floor_holds_with_trip_cause() {
        let mut p = predictor();
        let f = features(3.0, 3.0, 36.0, 7.5, 72.0);
        let verdict = p.predict(&f, PredictOptions::default());
        assert_eq!(verdict.status, PumpStatus::Critical);
        assert!(verdict.trip_cause.is_some());
        assert!(verdict.display_prob >= 0.85);
    }
}
