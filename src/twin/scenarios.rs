//! Failure-scenario state machine and telemetry synthesis for the twin.
//!
//! A `health` scalar in [0, 1] drifts slowly with rare additive jumps and is
//! mapped to channel means by piecewise-linear interpolation between the
//! HEALTHY, WARNING, and CRITICAL operating points. Mutually exclusive
//! scenario countdowns override the means with physically plausible failure
//! signatures.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::types::TelemetrySample;

// Operating points of the health -> (vib, pressure, temp) map.
const HEALTHY_POINT: (f64, f64, f64) = (2.8, 6.0, 42.0);
const WARNING_POINT: (f64, f64, f64) = (5.8, 5.2, 68.0);
const CRITICAL_POINT: (f64, f64, f64) = (12.5, 2.5, 88.0);

/// Nominal motor current (A) when no scenario is active.
const NOMINAL_CURRENT: f64 = 45.0;
/// Nominal crest factor / kurtosis.
const NOMINAL_CREST: f64 = 3.2;
const NOMINAL_KURTOSIS: f64 = 3.0;

/// Ticks the debris flag stays armed after an impact (or until shutdown).
const DEBRIS_FLAG_TICKS: u32 = 999;
/// Ticks to blend pressure/temperature back to nominal after a choke clears.
const CHOKED_EXIT_BLEND_TICKS: u32 = 3;

/// Per-tick trigger probabilities and countdown lengths.
const DEBRIS_PROB: f64 = 0.002;
const DEGRADATION_PROB: f64 = 0.008;
const DEGRADATION_TICKS: u32 = 3;
const CHOKED_PROB: f64 = 0.003;
const CHOKED_TICKS: u32 = 3;
const AIR_INGESTION_PROB: f64 = 0.008;
const AIR_INGESTION_TICKS: u32 = 3;
const CAVITATION_PROB: f64 = 0.022;
const CAVITATION_TICKS: u32 = 5;
const INTERLOCK_PROB: f64 = 0.0012;
const INTERLOCK_TICKS: u32 = 3;

/// Active failure mode. Countdowns are mutually exclusive; a new scenario
/// can only start when none is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Degradation,
    Choked,
    AirIngestion,
    Cavitation,
    Interlock,
}

/// Gaussian means for one tick of synthesized telemetry.
#[derive(Debug, Clone, Copy)]
pub struct ChannelMeans {
    pub vib_rms: f64,
    pub vib_crest: f64,
    pub vib_kurtosis: f64,
    pub current: f64,
    pub pressure: f64,
    pub temp: f64,
}

/// Scenario and health state advanced once per twin tick.
#[derive(Debug)]
pub struct ScenarioEngine {
    pub health: f64,
    active: Option<(Scenario, u32)>,
    debris_ticks_left: u32,
    choked_blend_left: u32,
}

impl ScenarioEngine {
    pub fn new() -> Self {
        Self {
            health: 0.0,
            active: None,
            debris_ticks_left: 0,
            choked_blend_left: 0,
        }
    }

    pub fn active_scenario(&self) -> Option<Scenario> {
        self.active.map(|(s, _)| s)
    }

    pub fn debris_armed(&self) -> bool {
        self.debris_ticks_left > 0
    }

    /// Reset after a protective shutdown: health back to zero, scenarios and
    /// the debris flag cleared.
    pub fn reset_after_shutdown(&mut self) {
        self.health = 0.0;
        self.active = None;
        self.debris_ticks_left = 0;
        self.choked_blend_left = 0;
    }

    /// Advance one tick: drift health, roll scenario switches, and return
    /// the channel means for telemetry synthesis.
    pub fn tick(&mut self, rng: &mut StdRng) -> ChannelMeans {
        self.drift_health(rng);
        self.advance_scenarios(rng);
        self.channel_means(rng)
    }

    /// Slow Gaussian drift with rare additive jumps, clamped to [0, 1].
    fn drift_health(&mut self, rng: &mut StdRng) {
        self.health += gauss(rng, 0.0008, 0.004);
        if rng.gen_bool(0.004) {
            self.health += rng.gen_range(0.08..0.20);
        }
        self.health = self.health.clamp(0.0, 1.0);
    }

    fn advance_scenarios(&mut self, rng: &mut StdRng) {
        if self.debris_ticks_left > 0 {
            self.debris_ticks_left -= 1;
        }
        if let Some((scenario, remaining)) = self.active {
            if remaining > 1 {
                self.active = Some((scenario, remaining - 1));
            } else {
                if scenario == Scenario::Choked {
                    self.choked_blend_left = CHOKED_EXIT_BLEND_TICKS;
                }
                self.active = None;
            }
            return;
        }
        if self.choked_blend_left > 0 {
            self.choked_blend_left -= 1;
        }

        // Debris is an instantaneous event rather than a countdown: the
        // health jumps and the impact flag stays armed.
        if rng.gen_bool(DEBRIS_PROB) {
            self.health = (self.health + rng.gen_range(0.25..0.45)).clamp(0.0, 1.0);
            self.debris_ticks_left = DEBRIS_FLAG_TICKS;
            return;
        }
        let switches: [(f64, Scenario, u32); 5] = [
            (DEGRADATION_PROB, Scenario::Degradation, DEGRADATION_TICKS),
            (CHOKED_PROB, Scenario::Choked, CHOKED_TICKS),
            (AIR_INGESTION_PROB, Scenario::AirIngestion, AIR_INGESTION_TICKS),
            (CAVITATION_PROB, Scenario::Cavitation, CAVITATION_TICKS),
            (INTERLOCK_PROB, Scenario::Interlock, INTERLOCK_TICKS),
        ];
        for (prob, scenario, ticks) in switches {
            if rng.gen_bool(prob) {
                self.active = Some((scenario, ticks));
                return;
            }
        }
    }

    /// Health-interpolated baseline, overridden by the active scenario.
    fn channel_means(&self, rng: &mut StdRng) -> ChannelMeans {
        let (vib, pressure, temp) = interpolate_health(self.health);
        let mut means = ChannelMeans {
            vib_rms: vib,
            vib_crest: NOMINAL_CREST,
            vib_kurtosis: NOMINAL_KURTOSIS,
            current: NOMINAL_CURRENT,
            pressure,
            temp,
        };

        match self.active_scenario() {
            Some(Scenario::Degradation) => {
                means.current = rng.gen_range(38.0..42.0);
                means.pressure = rng.gen_range(4.2..4.8);
            }
            Some(Scenario::Choked) => {
                means.current = rng.gen_range(36.0..40.0);
                means.pressure = rng.gen_range(7.0..8.5);
                means.temp = rng.gen_range(72.0..82.0);
                means.vib_rms = means.vib_rms.min(4.0);
            }
            Some(Scenario::AirIngestion) => {
                means.vib_rms = 5.2;
                means.vib_crest = 6.2;
                means.vib_kurtosis = 5.0;
            }
            Some(Scenario::Cavitation) => {
                means.current = rng.gen_range(54.5..58.0);
                means.pressure = rng.gen_range(3.0..3.8);
                means.vib_rms = rng.gen_range(7.2..8.6);
            }
            Some(Scenario::Interlock) => {
                means.vib_rms = rng.gen_range(9.2..11.0);
            }
            None => {
                if self.choked_blend_left > 0 {
                    // Blend pressure and temperature back to nominal.
                    let frac = self.choked_blend_left as f64 / CHOKED_EXIT_BLEND_TICKS as f64;
                    means.pressure = means.pressure + frac * (7.5 - means.pressure);
                    means.temp = means.temp + frac * (75.0 - means.temp);
                }
            }
        }
        means
    }

    /// Synthesize one window of Gaussian telemetry around the tick means.
    ///
    /// Values are clamped to the validator plausibility ranges so the twin
    /// never trips its own OFFLINE path, and the cavitation index is derived
    /// per sample the way the edge unit computes it.
    pub fn synthesize_window(
        &self,
        means: &ChannelMeans,
        window_size: usize,
        rng: &mut StdRng,
    ) -> Vec<TelemetrySample> {
        (0..window_size)
            .map(|_| {
                let vib_rms = gauss(rng, means.vib_rms, 0.15).clamp(0.0, 25.0);
                let vib_crest = gauss(rng, means.vib_crest, 0.2).max(1.0);
                let vib_kurtosis = gauss(rng, means.vib_kurtosis, 0.3);
                let current = gauss(rng, means.current, 1.0).clamp(0.0, 80.0);
                let pressure = gauss(rng, means.pressure, 0.12).clamp(0.0, 15.0);
                let temp = gauss(rng, means.temp, 0.8).clamp(-20.0, 120.0);
                let cavitation_index = if pressure > 0.0 {
                    (vib_rms / pressure).clamp(0.0, 50.0)
                } else {
                    0.0
                };
                TelemetrySample {
                    vib_rms: Some(vib_rms),
                    vib_crest: Some(vib_crest),
                    vib_kurtosis: Some(vib_kurtosis),
                    current: Some(current),
                    pressure: Some(pressure),
                    temp: Some(temp),
                    cavitation_index: Some(cavitation_index),
                    debris_impact: self.debris_armed(),
                }
            })
            .collect()
    }
}

fn gauss(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + std * z
}

/// Piecewise-linear map from health to (vibration, pressure, temperature):
/// HEALTHY at 0, WARNING at 0.5, CRITICAL at 1.
pub fn interpolate_health(health: f64) -> (f64, f64, f64) {
    let h = health.clamp(0.0, 1.0);
    let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
    if h <= 0.5 {
        let t = h / 0.5;
        (
            lerp(HEALTHY_POINT.0, WARNING_POINT.0, t),
            lerp(HEALTHY_POINT.1, WARNING_POINT.1, t),
            lerp(HEALTHY_POINT.2, WARNING_POINT.2, t),
        )
    } else {
        let t = (h - 0.5) / 0.5;
        (
            lerp(WARNING_POINT.0, CRITICAL_POINT.0, t),
            lerp(WARNING_POINT.1, CRITICAL_POINT.1, t),
            lerp(WARNING_POINT.2, CRITICAL_POINT.2, t),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn health_map_hits_operating_points() {
        assert_eq!(interpolate_health(0.0), HEALTHY_POINT);
        assert_eq!(interpolate_health(0.5), WARNING_POINT);
        assert_eq!(interpolate_health(1.0), CRITICAL_POINT);
        // Midpoint of the lower segment
        let (v, p, t) = interpolate_health(0.25);
        assert!((v - 4.3).abs() < 1e-9);
        assert!((p - 5.6).abs() < 1e-9);
        assert!((t - 55.0).abs() < 1e-9);
    }

    #[test]
    fn window_is_plausible_and_gaussian_around_means() {
        let mut rng = rng();
        let engine = ScenarioEngine::new();
        let means = ChannelMeans {
            vib_rms: 2.8,
            vib_crest: 3.2,
            vib_kurtosis: 3.0,
            current: 45.0,
            pressure: 6.0,
            temp: 42.0,
        };
        let window = engine.synthesize_window(&means, 30, &mut rng);
        assert_eq!(window.len(), 30);
        let mean_vib: f64 =
            window.iter().map(|s| s.vib_rms.unwrap_or(0.0)).sum::<f64>() / 30.0;
        assert!((mean_vib - 2.8).abs() < 0.2, "vib mean {mean_vib}");
        for sample in &window {
            let p = sample.pressure.unwrap_or(0.0);
            assert!((0.0..=15.0).contains(&p));
            assert!(!sample.debris_impact);
            assert!(sample.cavitation_index.unwrap_or(-1.0) >= 0.0);
        }
    }

    #[test]
    fn debris_arms_the_impact_flag() {
        let mut rng = rng();
        let mut engine = ScenarioEngine::new();
        engine.debris_ticks_left = 5;
        let means = engine.tick(&mut rng);
        let window = engine.synthesize_window(&means, 10, &mut rng);
        assert!(window.iter().all(|s| s.debris_impact));
    }

    #[test]
    fn scenario_countdown_decrements_and_clears() {
        let mut rng = rng();
        let mut engine = ScenarioEngine::new();
        engine.active = Some((Scenario::Cavitation, 2));
        engine.tick(&mut rng);
        assert_eq!(engine.active_scenario(), Some(Scenario::Cavitation));
        engine.tick(&mut rng);
        assert_eq!(engine.active_scenario(), None);
    }

    #[test]
    fn choked_exit_starts_pressure_blend() {
        let mut rng = rng();
        let mut engine = ScenarioEngine::new();
        engine.active = Some((Scenario::Choked, 1));
        engine.tick(&mut rng);
        assert_eq!(engine.active_scenario(), None);
        assert_eq!(engine.choked_blend_left, CHOKED_EXIT_BLEND_TICKS);
    }

    #[test]
    fn cavitation_means_match_signature() {
        let mut rng = rng();
        let mut engine = ScenarioEngine::new();
        engine.active = Some((Scenario::Cavitation, 5));
        let means = engine.channel_means(&mut rng);
        assert!((54.5..58.0).contains(&means.current));
        assert!((3.0..3.8).contains(&means.pressure));
        assert!((7.2..8.6).contains(&means.vib_rms));
    }

    #[test]
    fn shutdown_reset_clears_state() {
        let mut engine = ScenarioEngine::new();
        engine.health = 0.9;
        engine.active = Some((Scenario::Interlock, 3));
        engine.debris_ticks_left = 100;
        engine.reset_after_shutdown();
        assert_eq!(engine.health, 0.0);
        assert_eq!(engine.active_scenario(), None);
        assert!(!engine.debris_armed());
    }
}
