//! Feature extraction over the sliding telemetry window.
//!
//! Produces the 8-element vector in [`FEATURE_NAMES`](crate::types::FEATURE_NAMES)
//! order: vibration statistics from the conditioned vibration signal, process
//! means, the cavitation index, and the batch-to-batch temperature delta.

use statrs::statistics::Statistics;

use crate::config::defaults::CAVITATION_INDEX_CAP;
use crate::types::{FeatureVector, TelemetrySample};

/// Vibration statistics for bearing and impact diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VibrationMetrics {
    /// Root mean square (mm/s).
    pub rms: f64,
    /// Peak / RMS; elevated values indicate shock content.
    pub crest: f64,
    /// Excess kurtosis; elevated values indicate impulsive defects.
    pub kurtosis: f64,
}

/// Compute RMS, crest factor, and excess kurtosis of a vibration signal.
///
/// Crest factor is 0 for an all-zero signal; kurtosis is 0 when the
/// fourth-moment ratio is not finite (constant signal).
pub fn vibration_metrics(signal: &[f64]) -> VibrationMetrics {
    let rms = crate::dsp::rms(signal);
    let peak = signal.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
    let crest = if rms > 0.0 { peak / rms } else { 0.0 };
    VibrationMetrics {
        rms,
        crest,
        kurtosis: excess_kurtosis(signal),
    }
}

/// Sample excess kurtosis (population moments): `m4 / m2^2 - 3`.
fn excess_kurtosis(signal: &[f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    let mean = signal.iter().mean();
    let n = signal.len() as f64;
    let m2 = signal.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let m4 = signal.iter().map(|x| (x - mean).powi(4)).sum::<f64>() / n;
    let kurt = m4 / (m2 * m2) - 3.0;
    if kurt.is_finite() {
        kurt
    } else {
        0.0
    }
}

/// Cavitation index: vibration per unit of discharge pressure, capped so a
/// pressure collapse cannot blow up the feature scale.
pub fn cavitation_index(pressure: f64, vibration: f64) -> f64 {
    if pressure > 0.0 {
        (vibration / pressure).min(CAVITATION_INDEX_CAP)
    } else {
        0.0
    }
}

/// Stateful extractor: remembers the previous batch temperature mean so the
/// `temp_delta` feature captures heating rate between batches.
#[derive(Debug, Default)]
pub struct FeatureExtractor {
    prev_temp: Option<f64>,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the model feature vector from the conditioned vibration signal
    /// and the raw process columns of the window.
    pub fn extract(&mut self, vib_signal: &[f64], batch: &[TelemetrySample]) -> FeatureVector {
        let vib = vibration_metrics(vib_signal);

        let current = batch.iter().map(TelemetrySample::current_or_zero).mean();
        let pressure = batch.iter().map(TelemetrySample::pressure_or_zero).mean();
        let temp = batch.iter().map(TelemetrySample::temp_or_zero).mean();

        let cav = cavitation_index(pressure, vib.rms);
        let temp_delta = self.prev_temp.map_or(0.0, |prev| temp - prev);
        self.prev_temp = Some(temp);

        FeatureVector([
            vib.rms,
            vib.crest,
            vib.kurtosis,
            current,
            pressure,
            cav,
            temp,
            temp_delta,
        ])
    }

    /// Forget the previous batch temperature (used after a shutdown).
    pub fn reset(&mut self) {
        self.prev_temp = None;
    }
}
