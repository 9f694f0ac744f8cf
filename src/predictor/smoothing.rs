//! Risk smoothing state: bounded feature/risk ring buffers, asymmetric
//! exponential smoothing, and the operator display mapping.
//!
//! Rising risk is tracked aggressively (alpha 0.92 above the high-risk
//! threshold, 0.70 otherwise) while falling risk decays more slowly
//! (alpha 0.65), so a developing fault saturates the display quickly and a
//! single clean batch cannot clear it.

use std::collections::VecDeque;

use crate::config::defaults::{DISPLAY_MAP_FLOOR, DISPLAY_MAP_KNEE};
use crate::config::SmoothingConfig;
use crate::types::{FeatureVector, PumpStatus, NUM_FEATURES};

/// Per-predictor mutable state. Owned by a single pipeline activity; no
/// cross-thread sharing.
#[derive(Debug, Default)]
pub struct SmoothingState {
    feature_buffer: VecDeque<FeatureVector>,
    risk_history: VecDeque<f64>,
    pub smoothed_risk: Option<f64>,
    pub last_status: Option<PumpStatus>,
    pub last_reason: Option<String>,
    pub critical_low_vib_steps: u32,
}

impl SmoothingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all smoothing memory (recovery reset or twin restart).
    pub fn reset(&mut self) {
        self.feature_buffer.clear();
        self.risk_history.clear();
        self.smoothed_risk = None;
        self.critical_low_vib_steps = 0;
    }

    pub fn feature_buffer_len(&self) -> usize {
        self.feature_buffer.len()
    }

    pub fn risk_history_len(&self) -> usize {
        self.risk_history.len()
    }

    /// Append a feature vector and return the column mean over the buffer.
    pub fn push_features(
        &mut self,
        features: FeatureVector,
        cfg: &SmoothingConfig,
    ) -> FeatureVector {
        if self.feature_buffer.len() >= cfg.smoothing_window_size {
            self.feature_buffer.pop_front();
        }
        self.feature_buffer.push_back(features);

        let mut mean = [0.0_f64; NUM_FEATURES];
        for vector in &self.feature_buffer {
            for (slot, value) in mean.iter_mut().zip(vector.0.iter()) {
                *slot += value;
            }
        }
        let n = self.feature_buffer.len() as f64;
        for slot in &mut mean {
            *slot /= n;
        }
        FeatureVector(mean)
    }

    /// Asymmetric exponential smoothing of the instantaneous model risk,
    /// then the mean over the bounded risk history.
    pub fn update_risk(&mut self, instant_prob: f64, cfg: &SmoothingConfig) -> f64 {
        let smoothed = match self.smoothed_risk {
            None => instant_prob,
            Some(prev) => {
                let alpha = if instant_prob > prev {
                    if instant_prob >= cfg.smooth_high_risk_threshold {
                        cfg.smooth_alpha_very_high
                    } else {
                        cfg.smooth_alpha_rising
                    }
                } else {
                    cfg.smooth_alpha_falling
                };
                alpha * instant_prob + (1.0 - alpha) * prev
            }
        };
        self.smoothed_risk = Some(smoothed);

        if self.risk_history.len() >= cfg.risk_history_size {
            self.risk_history.pop_front();
        }
        self.risk_history.push_back(smoothed);
        self.risk_history.iter().sum::<f64>() / self.risk_history.len() as f64
    }
}

/// Map the smoothed probability onto the operator display scale: values at or
/// above the knee are stretched linearly onto [floor, 1.0] so true model
/// saturation reads as 95–100% risk.
pub fn display_map(smoothed_prob: f64) -> f64 {
    if smoothed_prob >= DISPLAY_MAP_KNEE {
        let span = 1.0 - DISPLAY_MAP_KNEE;
        let frac = ((smoothed_prob - DISPLAY_MAP_KNEE) / span).min(1.0);
        DISPLAY_MAP_FLOOR + frac * (1.0 - DISPLAY_MAP_FLOOR)
    } else {
        smoothed_prob
    }
}
