//! Core data types shared across the engine.
//!
//! The telemetry sample, the fixed-order feature vector, the status/trip/alarm
//! vocabularies, and the report structures published to the plant network.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Feature vector contract
// ============================================================================

/// Number of scalars in the model feature vector.
pub const NUM_FEATURES: usize = 8;

/// Feature names in the exact order expected by the scaler and classifier
/// artifacts. This ordering is part of the artifact contract; never reorder.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "vib_rms",
    "vib_crest",
    "vib_kurtosis",
    "current",
    "pressure",
    "cavitation_index",
    "temp",
    "temp_delta",
];

/// One feature vector in [`FEATURE_NAMES`] order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; NUM_FEATURES]);

impl FeatureVector {
    pub fn vib_rms(&self) -> f64 {
        self.0[0]
    }

    pub fn vib_crest(&self) -> f64 {
        self.0[1]
    }

    pub fn vib_kurtosis(&self) -> f64 {
        self.0[2]
    }

    pub fn current(&self) -> f64 {
        self.0[3]
    }

    pub fn pressure(&self) -> f64 {
        self.0[4]
    }

    pub fn cavitation_index(&self) -> f64 {
        self.0[5]
    }

    pub fn temp(&self) -> f64 {
        self.0[6]
    }

    pub fn temp_delta(&self) -> f64 {
        self.0[7]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// One raw telemetry reading from the pump skid.
///
/// Units: vibration in mm/s RMS, current in A, pressure in bar,
/// temperature in °C. Fields absent from the wire payload decode to `None`
/// and are reported as `MISSING_COLUMNS` during batch preparation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Vibration velocity RMS (mm/s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vib_rms: Option<f64>,
    /// Vibration crest factor (peak / RMS, dimensionless).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vib_crest: Option<f64>,
    /// Vibration excess kurtosis (dimensionless).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vib_kurtosis: Option<f64>,
    /// Motor current (A).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    /// Discharge pressure (bar).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    /// Bearing temperature (°C).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
    /// Cavitation index (vibration / inlet pressure proxy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cavitation_index: Option<f64>,
    /// Debris impact event flag from the edge vibration unit.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub debris_impact: bool,
}

impl TelemetrySample {
    /// Decode one wire payload (UTF-8 JSON object).
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn vib_rms_or_zero(&self) -> f64 {
        self.vib_rms.unwrap_or(0.0)
    }

    pub fn vib_crest_or_zero(&self) -> f64 {
        self.vib_crest.unwrap_or(0.0)
    }

    pub fn current_or_zero(&self) -> f64 {
        self.current.unwrap_or(0.0)
    }

    pub fn pressure_or_zero(&self) -> f64 {
        self.pressure.unwrap_or(0.0)
    }

    pub fn temp_or_zero(&self) -> f64 {
        self.temp.unwrap_or(0.0)
    }
}

// ============================================================================
// Status vocabulary
// ============================================================================

/// Pump health verdict for one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PumpStatus {
    Healthy,
    Warning,
    Critical,
    /// Inference failed on this step.
    Error,
    /// Model artifacts are not loaded; engine runs in data-collection mode.
    Unknown,
    /// Batch rejected by the telemetry validator.
    Offline,
}

impl PumpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
            Self::Offline => "OFFLINE",
        }
    }

    /// True for statuses that trigger an alert row and a notification.
    pub fn is_alerting(&self) -> bool {
        matches!(self, Self::Warning | Self::Critical)
    }
}

impl std::fmt::Display for PumpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary structured trip code for a CRITICAL step. The first rule to set
/// one wins; later rules may only add alarm causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripCause {
    DebrisImpact,
    Cavitation,
    ChokedDischarge,
    Overtemp,
    VibInterlock,
}

impl TripCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DebrisImpact => "DEBRIS_IMPACT",
            Self::Cavitation => "CAVITATION",
            Self::ChokedDischarge => "CHOKED_DISCHARGE",
            Self::Overtemp => "OVERTEMP",
            Self::VibInterlock => "VIB_INTERLOCK",
        }
    }
}

impl std::fmt::Display for TripCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any active alarm-level cause on a step; a superset of the trip causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmCause {
    DebrisImpact,
    Cavitation,
    ChokedDischarge,
    Overtemp,
    VibInterlock,
    VibZoneD,
    VibZoneC,
    OvertempWarning,
}

impl From<TripCause> for AlarmCause {
    fn from(cause: TripCause) -> Self {
        match cause {
            TripCause::DebrisImpact => Self::DebrisImpact,
            TripCause::Cavitation => Self::Cavitation,
            TripCause::ChokedDischarge => Self::ChokedDischarge,
            TripCause::Overtemp => Self::Overtemp,
            TripCause::VibInterlock => Self::VibInterlock,
        }
    }
}

impl AlarmCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DebrisImpact => "DEBRIS_IMPACT",
            Self::Cavitation => "CAVITATION",
            Self::ChokedDischarge => "CHOKED_DISCHARGE",
            Self::Overtemp => "OVERTEMP",
            Self::VibInterlock => "VIB_INTERLOCK",
            Self::VibZoneD => "VIB_ZONE_D",
            Self::VibZoneC => "VIB_ZONE_C",
            Self::OvertempWarning => "OVERTEMP_WARNING",
        }
    }
}

impl std::fmt::Display for AlarmCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Full result of one pipeline step, consumed by the sinks (broker publish,
/// audit CSV, notifier) and by the digital twin's shutdown policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub pump_id: String,
    pub status: PumpStatus,
    /// Display probability in [0, 1].
    pub anomaly_probability: f64,
    /// Validator verdict: "OK" or the rejection code (e.g. `INVALID_RANGE:...`).
    pub sensor_health: String,
    pub timestamp: DateTime<Utc>,
    /// Human-readable diagnostic for WARNING/CRITICAL steps.
    pub reason: Option<String>,
    pub trip_cause: Option<TripCause>,
    pub alarm_causes: Vec<AlarmCause>,
    /// Feature vector the verdict was computed from (absent for OFFLINE).
    pub features: Option<FeatureVector>,
}

impl StatusReport {
    /// Report for a batch that failed validation.
    pub fn offline(pump_id: &str, sensor_health: String) -> Self {
        Self {
            pump_id: pump_id.to_string(),
            status: PumpStatus::Offline,
            anomaly_probability: 0.0,
            sensor_health,
            timestamp: Utc::now(),
            reason: None,
            trip_cause: None,
            alarm_causes: Vec::new(),
            features: None,
        }
    }

    /// Wire payload for the alerts topic.
    pub fn to_alert_payload(&self) -> AlertPayload {
        AlertPayload {
            pump_id: self.pump_id.clone(),
            status: self.status,
            anomaly_probability: self.anomaly_probability,
            sensor_health: self.sensor_health.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// JSON object published to `pump/monitor/<P>/alerts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub pump_id: String,
    pub status: PumpStatus,
    pub anomaly_probability: f64,
    pub sensor_health: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_decodes_partial_payload() {
        let sample =
            TelemetrySample::from_payload(br#"{"vib_rms": 2.5, "temp": 41.0}"#).unwrap();
        assert_eq!(sample.vib_rms, Some(2.5));
        assert_eq!(sample.temp, Some(41.0));
        assert_eq!(sample.current, None);
        assert!(!sample.debris_impact);
    }

    #[test]
    fn sample_decodes_debris_flag() {
        let sample =
            TelemetrySample::from_payload(br#"{"vib_rms": 8.0, "debris_impact": true}"#).unwrap();
        assert!(sample.debris_impact);
    }

    #[test]
    fn status_serializes_screaming_case() {
        let json = serde_json::to_string(&PumpStatus::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
        let json = serde_json::to_string(&TripCause::ChokedDischarge).unwrap();
        assert_eq!(json, "\"CHOKED_DISCHARGE\"");
    }

    #[test]
    fn feature_names_match_vector_width() {
        assert_eq!(FEATURE_NAMES.len(), NUM_FEATURES);
        let v = FeatureVector([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(v.vib_rms(), 1.0);
        assert_eq!(v.temp_delta(), 8.0);
    }

    #[test]
    fn alert_payload_carries_report_fields() {
        let report = StatusReport::offline("PUMP_01", "EMPTY_BUFFER".to_string());
        let payload = report.to_alert_payload();
        assert_eq!(payload.status, PumpStatus::Offline);
        assert_eq!(payload.sensor_health, "EMPTY_BUFFER");
    }
}
