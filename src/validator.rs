//! Raw telemetry range validation.
//!
//! Runs before DSP and inference so that a faulty sensor cannot corrupt the
//! feature window. A single out-of-range value rejects the whole batch:
//! clean and dirty samples are never mixed in one window. Missing fields are
//! deferred to batch preparation, which reports them as `MISSING_COLUMNS`.

use thiserror::Error;

use crate::config::TelemetryRangeConfig;
use crate::types::TelemetrySample;

/// Batch-level rejection. The `Display` form is published verbatim as the
/// `sensor_health` field of an OFFLINE report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("EMPTY_BUFFER")]
    EmptyBuffer,

    #[error("INVALID_RANGE:{0}")]
    InvalidRange(RangeViolation),

    #[error("MISSING_COLUMNS:{0}")]
    MissingColumns(String),
}

/// One field outside its plausibility range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeViolation {
    pub field: &'static str,
    pub value: f64,
}

impl std::fmt::Display for RangeViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_OUT_OF_RANGE:{}", self.field, self.value)
    }
}

/// Validate a single record against the configured min/max ranges.
///
/// Only fields present on the sample are checked; absent fields surface later
/// as `MISSING_COLUMNS` so the historical error codes stay stable.
pub fn validate_record(
    sample: &TelemetrySample,
    ranges: &TelemetryRangeConfig,
) -> Result<(), RangeViolation> {
    check("VIB_RMS", sample.vib_rms, ranges.vib_rms_min, ranges.vib_rms_max)?;
    check(
        "PRESSURE",
        sample.pressure,
        ranges.pressure_min,
        ranges.pressure_max,
    )?;
    check("TEMP", sample.temp, ranges.temp_min, ranges.temp_max)?;
    check(
        "CURRENT",
        sample.current,
        ranges.current_min,
        ranges.current_max,
    )?;
    check(
        "CAVITATION_INDEX",
        sample.cavitation_index,
        ranges.cavitation_index_min,
        ranges.cavitation_index_max,
    )?;
    Ok(())
}

/// Validate a batch; the entire batch is rejected on the first bad record.
pub fn validate_batch(
    samples: &[TelemetrySample],
    ranges: &TelemetryRangeConfig,
) -> Result<(), ValidationError> {
    if samples.is_empty() {
        return Err(ValidationError::EmptyBuffer);
    }
    for sample in samples {
        validate_record(sample, ranges).map_err(ValidationError::InvalidRange)?;
    }
    Ok(())
}

fn check(
    field: &'static str,
    value: Option<f64>,
    min: f64,
    max: f64,
) -> Result<(), RangeViolation> {
    match value {
        Some(v) if !v.is_finite() || v < min || v > max => {
            Err(RangeViolation { field, value: v })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(vib: f64, current: f64, pressure: f64, temp: f64, cav: f64) -> TelemetrySample {
        TelemetrySample {
            vib_rms: Some(vib),
            current: Some(current),
            pressure: Some(pressure),
            temp: Some(temp),
            cavitation_index: Some(cav),
            ..TelemetrySample::default()
        }
    }

    #[test]
    fn accepts_nominal_record() {
        let ranges = TelemetryRangeConfig::default();
        assert!(validate_record(&sample(2.0, 45.0, 6.0, 42.0, 0.1), &ranges).is_ok());
    }

    #[test]
    fn rejects_out_of_range_pressure() {
        let ranges = TelemetryRangeConfig::default();
        let err = validate_record(&sample(2.0, 45.0, 100.0, 42.0, 0.1), &ranges).unwrap_err();
        assert_eq!(err.field, "PRESSURE");
        assert_eq!(err.to_string(), "PRESSURE_OUT_OF_RANGE:100");
    }

    #[test]
    fn missing_fields_are_deferred() {
        let ranges = TelemetryRangeConfig::default();
        let partial = TelemetrySample {
            vib_rms: Some(2.0),
            ..TelemetrySample::default()
        };
        assert!(validate_record(&partial, &ranges).is_ok());
    }

    #[test]
    fn empty_batch_rejected() {
        let ranges = TelemetryRangeConfig::default();
        let err = validate_batch(&[], &ranges).unwrap_err();
        assert_eq!(err.to_string(), "EMPTY_BUFFER");
    }

    #[test]
    fn one_bad_record_rejects_whole_batch() {
        let ranges = TelemetryRangeConfig::default();
        let good = sample(2.0, 45.0, 6.0, 42.0, 0.1);
        let bad = sample(2.0, 45.0, 6.0, 150.0, 0.1);
        let batch = vec![good, bad, good];
        let err = validate_batch(&batch, &ranges).unwrap_err();
        assert_eq!(err.to_string(), "INVALID_RANGE:TEMP_OUT_OF_RANGE:150");
    }

    #[test]
    fn nan_is_rejected() {
        let ranges = TelemetryRangeConfig::default();
        let err = validate_record(&sample(f64::NAN, 45.0, 6.0, 42.0, 0.1), &ranges).unwrap_err();
        assert_eq!(err.field, "VIB_RMS");
    }
}
