//! Config validation: fail-fast at startup on invalid thresholds, and
//! artifact presence checks for the healthcheck command.

use std::path::PathBuf;

use thiserror::Error;

use super::EngineConfig;

/// Raised when config validation fails. The engine refuses to start rather
/// than run with a nonsensical threshold table.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("{key} must be in [0, 1], got {value}")]
    ProbabilityOutOfRange { key: &'static str, value: f64 },

    #[error("{key} must be a positive integer")]
    ZeroCount { key: &'static str },

    #[error("{low_key} ({low}) must be < {high_key} ({high})")]
    RangeOrder {
        low_key: &'static str,
        low: f64,
        high_key: &'static str,
        high: f64,
    },

    #[error("{key} must be a valid normalized cutoff in (0, 1), got {value}")]
    InvalidCutoff { key: &'static str, value: f64 },

    #[error("model artifact missing: {0}")]
    MissingArtifact(PathBuf),
}

/// Validate critical config values. Returns the first failure found.
pub fn validate_config(cfg: &EngineConfig) -> Result<(), ConfigError> {
    let s = &cfg.smoothing;
    let t = &cfg.thresholds;

    // Probabilities and smoothing factors in [0, 1]
    let probabilities: [(&'static str, f64); 9] = [
        ("smoothing.prob_critical", s.prob_critical),
        ("smoothing.prob_critical_startup", s.prob_critical_startup),
        ("smoothing.prob_warning", s.prob_warning),
        (
            "thresholds.prob_hysteresis_exit_warning",
            t.prob_hysteresis_exit_warning,
        ),
        ("smoothing.smooth_alpha_rising", s.smooth_alpha_rising),
        ("smoothing.smooth_alpha_falling", s.smooth_alpha_falling),
        ("smoothing.smooth_alpha_very_high", s.smooth_alpha_very_high),
        (
            "smoothing.smooth_high_risk_threshold",
            s.smooth_high_risk_threshold,
        ),
        (
            "thresholds.prob_min_for_vibration_warning",
            t.prob_min_for_vibration_warning,
        ),
    ];
    for (key, value) in probabilities {
        if !(0.0..=1.0).contains(&value) || !value.is_finite() {
            return Err(ConfigError::ProbabilityOutOfRange { key, value });
        }
    }

    // Positive integer counts
    let counts: [(&'static str, usize); 6] = [
        ("smoothing.feature_window_size", s.feature_window_size),
        ("smoothing.smoothing_window_size", s.smoothing_window_size),
        ("smoothing.risk_history_size", s.risk_history_size),
        ("smoothing.startup_iterations", s.startup_iterations),
        ("mqtt.batch_size", cfg.mqtt.batch_size),
        (
            "thresholds.critical_exit_min_low_vib_steps",
            t.critical_exit_min_low_vib_steps as usize,
        ),
    ];
    for (key, value) in counts {
        if value == 0 {
            return Err(ConfigError::ZeroCount { key });
        }
    }

    // Vibration band ordering: warning entry < critical <= interlock,
    // hysteresis exits strictly below their entries.
    ordered(
        "thresholds.vibration_warning_entry_mmps",
        t.vibration_warning_entry_mmps,
        "thresholds.vibration_critical_mmps",
        t.vibration_critical_mmps,
    )?;
    if t.vibration_interlock_mmps < t.vibration_critical_mmps {
        return Err(ConfigError::RangeOrder {
            low_key: "thresholds.vibration_critical_mmps",
            low: t.vibration_critical_mmps,
            high_key: "thresholds.vibration_interlock_mmps",
            high: t.vibration_interlock_mmps,
        });
    }
    ordered(
        "thresholds.vibration_hysteresis_exit_warning_mmps",
        t.vibration_hysteresis_exit_warning_mmps,
        "thresholds.vibration_warning_entry_mmps",
        t.vibration_warning_entry_mmps,
    )?;
    ordered(
        "thresholds.vibration_hysteresis_exit_critical_mmps",
        t.vibration_hysteresis_exit_critical_mmps,
        "thresholds.vibration_critical_mmps",
        t.vibration_critical_mmps,
    )?;
    ordered(
        "thresholds.prob_hysteresis_exit_warning",
        t.prob_hysteresis_exit_warning,
        "smoothing.prob_warning",
        s.prob_warning,
    )?;

    // Telemetry plausibility ranges: min < max
    let r = &cfg.telemetry;
    let pairs: [(&'static str, f64, &'static str, f64); 5] = [
        (
            "telemetry.vib_rms_min",
            r.vib_rms_min,
            "telemetry.vib_rms_max",
            r.vib_rms_max,
        ),
        (
            "telemetry.pressure_min",
            r.pressure_min,
            "telemetry.pressure_max",
            r.pressure_max,
        ),
        (
            "telemetry.temp_min",
            r.temp_min,
            "telemetry.temp_max",
            r.temp_max,
        ),
        (
            "telemetry.current_min",
            r.current_min,
            "telemetry.current_max",
            r.current_max,
        ),
        (
            "telemetry.cavitation_index_min",
            r.cavitation_index_min,
            "telemetry.cavitation_index_max",
            r.cavitation_index_max,
        ),
    ];
    for (low_key, low, high_key, high) in pairs {
        ordered(low_key, low, high_key, high)?;
    }

    // DSP parameters
    if cfg.dsp.butter_order == 0 {
        return Err(ConfigError::ZeroCount {
            key: "dsp.butter_order",
        });
    }
    if !(cfg.dsp.butter_cutoff > 0.0 && cfg.dsp.butter_cutoff < 1.0) {
        return Err(ConfigError::InvalidCutoff {
            key: "dsp.butter_cutoff",
            value: cfg.dsp.butter_cutoff,
        });
    }
    ordered(
        "dsp.iso_band_low_hz",
        cfg.dsp.iso_band_low_hz,
        "dsp.iso_band_high_hz",
        cfg.dsp.iso_band_high_hz,
    )?;

    Ok(())
}

/// Ensure the classifier and scaler files exist.
///
/// Called by the healthcheck command, and at startup when
/// `model.strict_artifact_check` is on.
pub fn validate_artifacts(cfg: &EngineConfig) -> Result<(), ConfigError> {
    for path in [cfg.classifier_path(), cfg.scaler_path()] {
        if !path.is_file() {
            return Err(ConfigError::MissingArtifact(path));
        }
    }
    Ok(())
}

fn ordered(
    low_key: &'static str,
    low: f64,
    high_key: &'static str,
    high: f64,
) -> Result<(), ConfigError> {
    if low >= high {
        return Err(ConfigError::RangeOrder {
            low_key,
            low,
            high_key,
            high,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn default_config_is_valid() {
        let cfg = EngineConfig::default();
        validate_config(&cfg).unwrap();
    }

    #[test]
    fn rejects_probability_above_one() {
        let mut cfg = EngineConfig::default();
        cfg.smoothing.prob_critical = 1.5;
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ProbabilityOutOfRange { .. }));
    }

    #[test]
    fn rejects_zero_window() {
        let mut cfg = EngineConfig::default();
        cfg.smoothing.feature_window_size = 0;
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCount { .. }));
    }

    #[test]
    fn rejects_warning_exit_above_entry() {
        let mut cfg = EngineConfig::default();
        cfg.thresholds.vibration_hysteresis_exit_warning_mmps = 6.0;
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::RangeOrder { .. }));
    }

    #[test]
    fn rejects_critical_exit_at_entry() {
        let mut cfg = EngineConfig::default();
        cfg.thresholds.vibration_hysteresis_exit_critical_mmps = 7.1;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn rejects_inverted_telemetry_range() {
        let mut cfg = EngineConfig::default();
        cfg.telemetry.temp_min = 130.0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn rejects_interlock_below_critical() {
        let mut cfg = EngineConfig::default();
        cfg.thresholds.vibration_interlock_mmps = 6.5;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn missing_artifacts_detected() {
        let mut cfg = EngineConfig::default();
        cfg.paths.model_dir = std::path::PathBuf::from("/nonexistent/models");
        let err = validate_artifacts(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::MissingArtifact(_)));
    }
}
