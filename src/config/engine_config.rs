//! Engine configuration: every operational threshold as an operator-tunable
//! TOML value, with built-in defaults and environment-variable overrides for
//! container deployments.
//!
//! Each section struct implements `Default` from the constants in
//! [`defaults`](super::defaults), so behaviour is identical when no config
//! file is present.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;
use super::validation::ConfigError;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one monitored pump.
///
/// Load with [`EngineConfig::load`], which searches:
/// 1. `$PUMPGUARD_CONFIG` env var
/// 2. `./pumpguard.toml`
/// 3. Built-in defaults
///
/// then applies the environment overrides documented on
/// [`apply_env_overrides`](EngineConfig::apply_env_overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub dsp: DspConfig,
    #[serde(default)]
    pub telemetry: TelemetryRangeConfig,
    #[serde(default)]
    pub messages: MessageConfig,
}

impl EngineConfig {
    /// Load configuration using the standard search order, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let mut config = Self::load_file_layer();
        config.apply_env_overrides();
        config
    }

    fn load_file_layer() -> Self {
        if let Ok(path) = std::env::var("PUMPGUARD_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), pump = %config.identity.pump_id, "Loaded config from PUMPGUARD_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from PUMPGUARD_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "PUMPGUARD_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("pumpguard.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(pump = %config.identity.pump_id, "Loaded config from ./pumpguard.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./pumpguard.toml, using defaults");
                }
            }
        }

        info!("No pumpguard.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Apply the environment variables used by container deployments:
    /// `PUMP_ID`, `SECTION_ID`, `MQTT_BROKER`, `MQTT_PORT`, `MQTT_USE_TLS`,
    /// `MQTT_TLS_INSECURE`, `CERT_DIR`, `LOG_DIR`, `MODEL_VERSION`,
    /// `STRICT_ARTIFACT_CHECK`, `TG_TOKEN`, `TG_CHAT_ID`.
    pub fn apply_env_overrides(&mut self) {
        env_string("PUMP_ID", &mut self.identity.pump_id);
        env_string("SECTION_ID", &mut self.identity.section_id);
        env_string("MQTT_BROKER", &mut self.mqtt.broker);
        env_parse("MQTT_PORT", &mut self.mqtt.port);
        env_bool("MQTT_USE_TLS", &mut self.mqtt.use_tls);
        env_bool("MQTT_TLS_INSECURE", &mut self.mqtt.tls_insecure);
        env_path("CERT_DIR", &mut self.paths.cert_dir);
        env_path("LOG_DIR", &mut self.paths.log_dir);
        env_string("MODEL_VERSION", &mut self.model.version);
        env_bool("STRICT_ARTIFACT_CHECK", &mut self.model.strict_artifact_check);
        env_string("TG_TOKEN", &mut self.notifier.telegram_token);
        env_string("TG_CHAT_ID", &mut self.notifier.telegram_chat_id);
    }

    // ------------------------------------------------------------------
    // Derived topics and paths
    // ------------------------------------------------------------------

    pub fn topic_telemetry(&self) -> String {
        format!("pump/monitor/{}/telemetry", self.identity.pump_id)
    }

    pub fn topic_alerts(&self) -> String {
        format!("pump/monitor/{}/alerts", self.identity.pump_id)
    }

    pub fn topic_status(&self) -> String {
        format!("pump/monitor/{}/status", self.identity.pump_id)
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.paths.cert_dir.join("ca.crt")
    }

    pub fn client_cert_path(&self) -> PathBuf {
        self.paths.cert_dir.join("client.crt")
    }

    pub fn client_key_path(&self) -> PathBuf {
        self.paths.cert_dir.join("client.key")
    }

    pub fn telemetry_log_path(&self) -> PathBuf {
        self.paths.log_dir.join("telemetry_history.csv")
    }

    pub fn alerts_log_path(&self) -> PathBuf {
        self.paths.log_dir.join("alerts_history.csv")
    }

    pub fn status_log_path(&self) -> PathBuf {
        self.paths.log_dir.join("app_status.log")
    }

    pub fn classifier_path(&self) -> PathBuf {
        self.paths
            .model_dir
            .join(format!("classifier_{}.json", self.model.version))
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.paths
            .model_dir
            .join(format!("scaler_{}.json", self.model.version))
    }
}

fn env_string(key: &str, slot: &mut String) {
    if let Ok(v) = std::env::var(key) {
        if !v.is_empty() {
            *slot = v;
        }
    }
}

fn env_path(key: &str, slot: &mut PathBuf) {
    if let Ok(v) = std::env::var(key) {
        if !v.is_empty() {
            *slot = PathBuf::from(v);
        }
    }
}

fn env_bool(key: &str, slot: &mut bool) {
    if let Ok(v) = std::env::var(key) {
        *slot = matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(key) {
        match v.parse::<T>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(key, value = %v, "Ignoring unparsable environment override"),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Asset identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub pump_id: String,
    pub section_id: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            pump_id: "PUMP_01".to_string(),
            section_id: "SECTION_A".to_string(),
        }
    }
}

/// Broker connection and ingest cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub use_tls: bool,
    /// Disable hostname verification (lab brokers with self-signed certs).
    pub tls_insecure: bool,
    pub keepalive_secs: u64,
    /// Messages accumulated between pipeline runs.
    pub batch_size: usize,
    /// Silence window before the single "no telemetry" notification.
    pub disconnect_alert_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 8883,
            use_tls: true,
            tls_insecure: false,
            keepalive_secs: 60,
            batch_size: defaults::MQTT_BATCH_SIZE,
            disconnect_alert_secs: defaults::MQTT_DISCONNECT_ALERT_SEC,
        }
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub cert_dir: PathBuf,
    pub log_dir: PathBuf,
    pub model_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cert_dir: PathBuf::from("certs"),
            log_dir: PathBuf::from("logs"),
            model_dir: PathBuf::from("models"),
        }
    }
}

/// Model artifact selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub version: String,
    /// Fail startup when artifacts are missing instead of running in
    /// data-collection (UNKNOWN) mode.
    pub strict_artifact_check: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            strict_artifact_check: false,
        }
    }
}

/// Telegram notification credentials. Empty values disable the notifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub telegram_token: String,
    pub telegram_chat_id: String,
}

impl NotifierConfig {
    pub fn is_configured(&self) -> bool {
        !self.telegram_token.is_empty() && !self.telegram_chat_id.is_empty()
    }
}

/// Rule-engine thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub debris_impact_crest_min: f64,
    pub vibration_warning_entry_mmps: f64,
    pub vibration_critical_mmps: f64,
    pub vibration_interlock_mmps: f64,
    pub vibration_hysteresis_exit_warning_mmps: f64,
    pub vibration_hysteresis_exit_critical_mmps: f64,
    pub critical_exit_min_low_vib_steps: u32,
    pub cavitation_current_min_amp: f64,
    pub cavitation_pressure_max_bar: f64,
    pub cavitation_vibration_min_mmps: f64,
    pub cavitation_hysteresis_exit_pressure_bar: f64,
    pub choked_current_max_amp: f64,
    pub choked_pressure_min_bar: f64,
    pub choked_temp_min_c: f64,
    pub degradation_current_max_amp: f64,
    pub degradation_pressure_max_bar: f64,
    pub degradation_hysteresis_current_amp: f64,
    pub degradation_hysteresis_pressure_bar: f64,
    pub temp_warning_c: f64,
    pub temp_critical_c: f64,
    pub overload_current_min_amp: f64,
    pub pressure_high_warning_bar: f64,
    pub air_ingestion_vib_crest_min: f64,
    pub air_ingestion_vib_rms_min_mmps: f64,
    pub prob_min_for_vibration_warning: f64,
    pub prob_hysteresis_exit_warning: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            debris_impact_crest_min: defaults::DEBRIS_IMPACT_CREST_MIN,
            vibration_warning_entry_mmps: defaults::VIBRATION_WARNING_ENTRY_MMPS,
            vibration_critical_mmps: defaults::VIBRATION_CRITICAL_MMPS,
            vibration_interlock_mmps: defaults::VIBRATION_INTERLOCK_MMPS,
            vibration_hysteresis_exit_warning_mmps:
                defaults::VIBRATION_HYSTERESIS_EXIT_WARNING_MMPS,
            vibration_hysteresis_exit_critical_mmps:
                defaults::VIBRATION_HYSTERESIS_EXIT_CRITICAL_MMPS,
            critical_exit_min_low_vib_steps: defaults::CRITICAL_EXIT_MIN_LOW_VIB_STEPS,
            cavitation_current_min_amp: defaults::CAVITATION_CURRENT_MIN_AMP,
            cavitation_pressure_max_bar: defaults::CAVITATION_PRESSURE_MAX_BAR,
            cavitation_vibration_min_mmps: defaults::CAVITATION_VIBRATION_MIN_MMPS,
            cavitation_hysteresis_exit_pressure_bar:
                defaults::CAVITATION_HYSTERESIS_EXIT_PRESSURE_BAR,
            choked_current_max_amp: defaults::CHOKED_CURRENT_MAX_AMP,
            choked_pressure_min_bar: defaults::CHOKED_PRESSURE_MIN_BAR,
            choked_temp_min_c: defaults::CHOKED_TEMP_MIN_C,
            degradation_current_max_amp: defaults::DEGRADATION_CURRENT_MAX_AMP,
            degradation_pressure_max_bar: defaults::DEGRADATION_PRESSURE_MAX_BAR,
            degradation_hysteresis_current_amp: defaults::DEGRADATION_HYSTERESIS_CURRENT_AMP,
            degradation_hysteresis_pressure_bar: defaults::DEGRADATION_HYSTERESIS_PRESSURE_BAR,
            temp_warning_c: defaults::TEMP_WARNING_C,
            temp_critical_c: defaults::TEMP_CRITICAL_C,
            overload_current_min_amp: defaults::OVERLOAD_CURRENT_MIN_AMP,
            pressure_high_warning_bar: defaults::PRESSURE_HIGH_WARNING_BAR,
            air_ingestion_vib_crest_min: defaults::AIR_INGESTION_VIB_CREST_MIN,
            air_ingestion_vib_rms_min_mmps: defaults::AIR_INGESTION_VIB_RMS_MIN_MMPS,
            prob_min_for_vibration_warning: defaults::PROB_MIN_FOR_VIBRATION_WARNING,
            prob_hysteresis_exit_warning: defaults::PROB_HYSTERESIS_EXIT_WARNING,
        }
    }
}

/// Risk smoothing and status thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub feature_window_size: usize,
    pub smoothing_window_size: usize,
    pub risk_history_size: usize,
    /// Pipeline runs treated as startup (stricter CRITICAL threshold).
    pub startup_iterations: usize,
    pub prob_critical: f64,
    pub prob_critical_startup: f64,
    pub prob_warning: f64,
    pub smooth_alpha_rising: f64,
    pub smooth_alpha_falling: f64,
    pub smooth_alpha_very_high: f64,
    pub smooth_high_risk_threshold: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            feature_window_size: defaults::FEATURE_WINDOW_SIZE,
            smoothing_window_size: defaults::SMOOTHING_WINDOW_SIZE,
            risk_history_size: defaults::RISK_HISTORY_SIZE,
            startup_iterations: defaults::STARTUP_ITERATIONS,
            prob_critical: defaults::PROB_CRITICAL,
            prob_critical_startup: defaults::PROB_CRITICAL_STARTUP,
            prob_warning: defaults::PROB_WARNING,
            smooth_alpha_rising: defaults::SMOOTH_ALPHA_RISING,
            smooth_alpha_falling: defaults::SMOOTH_ALPHA_FALLING,
            smooth_alpha_very_high: defaults::SMOOTH_ALPHA_VERY_HIGH,
            smooth_high_risk_threshold: defaults::SMOOTH_HIGH_RISK_THRESHOLD,
        }
    }
}

/// Signal-processing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DspConfig {
    pub sample_rate_hz: f64,
    pub butter_order: usize,
    /// Low-pass cutoff as a fraction of Nyquist.
    pub butter_cutoff: f64,
    /// Substitute the 10–1000 Hz band RMS for zone/interlock decisions.
    pub use_iso_band_for_zones: bool,
    pub iso_band_low_hz: f64,
    pub iso_band_high_hz: f64,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: defaults::SAMPLE_RATE_HZ,
            butter_order: defaults::BUTTER_ORDER,
            butter_cutoff: defaults::BUTTER_CUTOFF,
            use_iso_band_for_zones: false,
            iso_band_low_hz: defaults::ISO_BAND_LOW_HZ,
            iso_band_high_hz: defaults::ISO_BAND_HIGH_HZ,
        }
    }
}

/// Raw telemetry plausibility ranges; samples outside reject the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryRangeConfig {
    pub vib_rms_min: f64,
    pub vib_rms_max: f64,
    pub pressure_min: f64,
    pub pressure_max: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub current_min: f64,
    pub current_max: f64,
    pub cavitation_index_min: f64,
    pub cavitation_index_max: f64,
}

impl Default for TelemetryRangeConfig {
    fn default() -> Self {
        Self {
            vib_rms_min: defaults::TELEMETRY_VIB_RMS_MIN,
            vib_rms_max: defaults::TELEMETRY_VIB_RMS_MAX,
            pressure_min: defaults::TELEMETRY_PRESSURE_MIN,
            pressure_max: defaults::TELEMETRY_PRESSURE_MAX,
            temp_min: defaults::TELEMETRY_TEMP_MIN,
            temp_max: defaults::TELEMETRY_TEMP_MAX,
            current_min: defaults::TELEMETRY_CURRENT_MIN,
            current_max: defaults::TELEMETRY_CURRENT_MAX,
            cavitation_index_min: defaults::TELEMETRY_CAVITATION_INDEX_MIN,
            cavitation_index_max: defaults::TELEMETRY_CAVITATION_INDEX_MAX,
        }
    }
}

/// Operator-facing alert messages. `{pressure}`, `{temp}` and `{current}`
/// placeholders are substituted with the latest (not smoothed) readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    pub mechanical: String,
    pub cavitation: String,
    pub choked: String,
    pub degradation: String,
    pub temp_critical: String,
    pub temp_warning: String,
    pub overload: String,
    pub pressure_high: String,
    pub air_ingestion: String,
    pub vibration_zone_d: String,
    pub vibration_zone_c: String,
    pub vibration_interlock: String,
    pub high_risk_critical: String,
    pub elevated_risk: String,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            mechanical: "DEBRIS IMPACT: mechanical shock detected — inspect impeller and casing."
                .to_string(),
            cavitation: "CAVITATION: check inlet valve and sump level.".to_string(),
            choked: "CHOKED DISCHARGE: pressure {pressure} bar, temp {temp} °C at {current} A — check discharge valve and line."
                .to_string(),
            degradation: "MAINTENANCE (Zone C): impeller wear suspected — pressure {pressure} bar at {current} A. Residual risk of unplanned shutdown."
                .to_string(),
            temp_critical: "HIGH TEMPERATURE (Zone D): {temp} °C — inspect cooling and flow rate."
                .to_string(),
            temp_warning: "HIGH TEMPERATURE (Zone C): {temp} °C — inspect cooling and flow rate."
                .to_string(),
            overload: "Motor overload: current above rated — inspect for strain.".to_string(),
            pressure_high: "High discharge pressure: check downstream line.".to_string(),
            air_ingestion: "AIR INGESTION suspected: impulsive vibration with elevated crest factor."
                .to_string(),
            vibration_zone_d: "VIBRATION Zone D (ISO 10816-3): RMS at or above 7.1 mm/s — unacceptable."
                .to_string(),
            vibration_zone_c: "VIBRATION Zone C (ISO 10816-3): sustained RMS above 5.5 mm/s — plan maintenance."
                .to_string(),
            vibration_interlock: "VIBRATION INTERLOCK: RMS at or above 9.0 mm/s — protective shutdown."
                .to_string(),
            high_risk_critical: "HIGH RISK: model anomaly probability at critical level.".to_string(),
            elevated_risk: "Elevated anomaly risk: monitoring closely.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.smoothing.feature_window_size, 30);
        assert_eq!(cfg.mqtt.batch_size, 5);
        assert_eq!(cfg.thresholds.vibration_critical_mmps, 7.1);
        assert_eq!(cfg.thresholds.vibration_interlock_mmps, 9.0);
        assert!(cfg.mqtt.use_tls);
    }

    #[test]
    fn topics_derive_from_pump_id() {
        let mut cfg = EngineConfig::default();
        cfg.identity.pump_id = "WARMAN_04".to_string();
        assert_eq!(cfg.topic_telemetry(), "pump/monitor/WARMAN_04/telemetry");
        assert_eq!(cfg.topic_alerts(), "pump/monitor/WARMAN_04/alerts");
        assert_eq!(cfg.topic_status(), "pump/monitor/WARMAN_04/status");
    }

    #[test]
    fn artifact_paths_carry_version() {
        let mut cfg = EngineConfig::default();
        cfg.model.version = "v3".to_string();
        assert!(cfg.classifier_path().ends_with("classifier_v3.json"));
        assert!(cfg.scaler_path().ends_with("scaler_v3.json"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            [identity]
            pump_id = "PUMP_77"
            section_id = "S2"

            [thresholds]
            vibration_critical_mmps = 7.1
            "#,
        )
        .unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(cfg.identity.pump_id, "PUMP_77");
        assert_eq!(cfg.smoothing.prob_critical, 0.85);
    }
}
