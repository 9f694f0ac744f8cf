//! Rule-based CRITICAL/WARNING evaluators (ISO 10816-3, operating instruction).
//!
//! Trip logic vs. shutdown logic
//! -----------------------------
//! This module is the single source of truth for *why* a step is
//! CRITICAL/WARNING. Each rule may update:
//!   - `status` / `reason` / `display_prob` for operator diagnostics
//!   - `trip_cause`, the primary structured trip code
//!   - `alarm_causes`, every alarm-level cause active on this step
//!
//! The digital twin maps `trip_cause` + `reason` to specific shutdown
//! actions, so the priority of physical causes is defined here (by rule
//! order plus first-writer-wins on `trip_cause`) and shutdown behaviour
//! stays in the twin.

use crate::config::{MessageConfig, ThresholdConfig};
use crate::types::{AlarmCause, PumpStatus, TripCause};

/// Inputs and mutable outputs for one rule-evaluation step.
///
/// Created fresh by the predictor for every pipeline step and discarded
/// after evaluation; hysteresis flows through `prev_reason`, `last_status`
/// and `critical_low_vib_steps`.
#[derive(Debug, Clone)]
pub struct RuleContext {
    // Smoothed (batch mean) readings
    pub vib_rms: f64,
    pub vib_crest: f64,
    pub current: f64,
    pub pressure: f64,
    pub temp: f64,
    // Latest sample readings
    pub latest_vib: f64,
    pub latest_crest: f64,
    pub latest_current: f64,
    pub latest_pressure: f64,
    pub latest_temp: f64,
    pub smoothed_prob: f64,
    pub prev_reason: Option<String>,
    pub last_status: Option<PumpStatus>,
    pub debris_flag: bool,
    // Outputs
    pub status: PumpStatus,
    pub reason: Option<String>,
    pub display_prob: f64,
    /// In/out counter for the CRITICAL-exit vibration hysteresis.
    pub critical_low_vib_steps: u32,
    pub trip_cause: Option<TripCause>,
    pub alarm_causes: Vec<AlarmCause>,
}

impl RuleContext {
    fn raise_display(&mut self, floor: f64) {
        self.display_prob = self.display_prob.max(floor);
    }

    fn add_alarm(&mut self, cause: AlarmCause) {
        if !self.alarm_causes.contains(&cause) {
            self.alarm_causes.push(cause);
        }
    }

    /// First writer wins; the alarm cause is always recorded.
    fn set_trip(&mut self, cause: TripCause) {
        if self.trip_cause.is_none() {
            self.trip_cause = Some(cause);
        }
        self.add_alarm(cause.into());
    }

    fn prev_reason_is(&self, message: &str) -> bool {
        self.prev_reason.as_deref() == Some(message)
    }
}

/// One evaluator in the fixed-order pipeline.
pub type Rule = fn(&mut RuleContext, &ThresholdConfig, &MessageConfig);

/// Order defines priority: the first rule to set a reason or trip cause wins
/// where applicable. Do not reorder.
pub const RULES: [(&str, Rule); 13] = [
    ("mechanical", mechanical_rule),
    ("cavitation", cavitation_rule),
    ("choked", choked_rule),
    ("degradation", degradation_rule),
    ("degradation_hysteresis", degradation_hysteresis_rule),
    ("temperature", temperature_rule),
    ("overload", overload_rule),
    ("high_pressure", high_pressure_rule),
    ("air_ingestion", air_ingestion_rule),
    ("vibration_zone", vibration_zone_rule),
    ("vibration_hysteresis", vibration_hysteresis_rule),
    ("interlock", interlock_rule),
    ("final_cleanup", final_cleanup_rule),
];

/// Run the full pipeline over a context.
pub fn evaluate(ctx: &mut RuleContext, thresholds: &ThresholdConfig, messages: &MessageConfig) {
    for (_, rule) in RULES {
        rule(ctx, thresholds, messages);
    }
}

/// Substitute `{name}` placeholders with readings formatted to one decimal.
/// Substitution always uses the latest values, not smoothed ones.
fn render(template: &str, values: &[(&str, f64)]) -> String {
    let mut out = template.to_string();
    for (name, value) in values {
        out = out.replace(&format!("{{{name}}}"), &format!("{value:.1}"));
    }
    out
}

// ============================================================================
// Rules
// ============================================================================

/// Debris impact / mechanical damage (stone hit): CRITICAL.
fn mechanical_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    let high_crest = ctx.latest_crest >= t.debris_impact_crest_min
        || ctx.vib_crest >= t.debris_impact_crest_min;
    let zone_d = ctx.vib_rms >= t.vibration_critical_mmps
        || ctx.latest_vib >= t.vibration_critical_mmps;
    let hysteresis = ctx.prev_reason_is(&m.mechanical) && zone_d;

    let fires = ctx.debris_flag
        || (high_crest && (ctx.status == PumpStatus::Critical || zone_d))
        || hysteresis;
    if fires {
        ctx.status = PumpStatus::Critical;
        ctx.raise_display(0.95);
        ctx.reason = Some(m.mechanical.clone());
        ctx.set_trip(TripCause::DebrisImpact);
    }
}

/// Cavitation: high current, low pressure, high vibration. CRITICAL.
fn cavitation_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.reason.is_some() {
        return;
    }
    let smoothed = ctx.current >= t.cavitation_current_min_amp
        && ctx.pressure <= t.cavitation_pressure_max_bar
        && ctx.vib_rms >= t.cavitation_vibration_min_mmps;
    let latest = ctx.latest_current >= t.cavitation_current_min_amp
        && ctx.latest_pressure <= t.cavitation_pressure_max_bar
        && ctx.latest_vib >= t.cavitation_vibration_min_mmps;
    let exit_bar = t.cavitation_hysteresis_exit_pressure_bar;
    let hysteresis = ctx.prev_reason_is(&m.cavitation)
        && ctx.pressure <= exit_bar
        && ctx.latest_pressure <= exit_bar
        && (ctx.vib_rms >= t.cavitation_vibration_min_mmps
            || ctx.latest_vib >= t.cavitation_vibration_min_mmps)
        && (ctx.current >= t.cavitation_current_min_amp
            || ctx.latest_current >= t.cavitation_current_min_amp);

    if smoothed || latest || hysteresis {
        ctx.status = PumpStatus::Critical;
        ctx.raise_display(0.95);
        ctx.reason = Some(m.cavitation.clone());
        ctx.set_trip(TripCause::Cavitation);
    }
}

/// Choked discharge: low current, high pressure, high temperature. CRITICAL.
fn choked_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.reason.is_some() {
        return;
    }
    let smoothed = ctx.current <= t.choked_current_max_amp
        && ctx.pressure >= t.choked_pressure_min_bar
        && ctx.temp >= t.choked_temp_min_c;
    let latest = ctx.latest_current <= t.choked_current_max_amp
        && ctx.latest_pressure >= t.choked_pressure_min_bar
        && ctx.latest_temp >= t.choked_temp_min_c;

    if smoothed || latest {
        ctx.status = PumpStatus::Critical;
        ctx.raise_display(0.95);
        ctx.reason = Some(render(
            &m.choked,
            &[
                ("pressure", ctx.latest_pressure),
                ("temp", ctx.latest_temp),
                ("current", ctx.latest_current),
            ],
        ));
        ctx.set_trip(TripCause::ChokedDischarge);
    }
}

/// Impeller wear / degradation: low current and low pressure against the Q–H
/// curve. WARNING only; requires both smoothed and latest agreement.
fn degradation_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.reason.is_some() || ctx.status == PumpStatus::Critical {
        return;
    }
    let smoothed = ctx.current <= t.degradation_current_max_amp
        && ctx.pressure <= t.degradation_pressure_max_bar;
    let latest = ctx.latest_current <= t.degradation_current_max_amp
        && ctx.latest_pressure <= t.degradation_pressure_max_bar;

    if smoothed && latest {
        ctx.status = PumpStatus::Warning;
        ctx.raise_display(0.55);
        ctx.reason = Some(render(
            &m.degradation,
            &[
                ("pressure", ctx.latest_pressure),
                ("current", ctx.latest_current),
            ],
        ));
    }
}

/// Stay WARNING until current and pressure clear the exit band.
fn degradation_hysteresis_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.last_status != Some(PumpStatus::Warning) || ctx.status != PumpStatus::Healthy {
        return;
    }
    let exit_current = t.degradation_current_max_amp + t.degradation_hysteresis_current_amp;
    let exit_pressure = t.degradation_pressure_max_bar + t.degradation_hysteresis_pressure_bar;

    if ctx.current <= exit_current
        || ctx.pressure <= exit_pressure
        || ctx.latest_current <= exit_current
        || ctx.latest_pressure <= exit_pressure
    {
        ctx.status = PumpStatus::Warning;
        ctx.raise_display(0.55);
        ctx.reason = Some(render(
            &m.degradation,
            &[
                ("pressure", ctx.latest_pressure),
                ("current", ctx.latest_current),
            ],
        ));
    }
}

/// Bearing temperature: CRITICAL at the trip limit, WARNING above the alarm
/// band while otherwise healthy.
fn temperature_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.reason.is_some() {
        return;
    }
    if ctx.temp >= t.temp_critical_c || ctx.latest_temp >= t.temp_critical_c {
        ctx.status = PumpStatus::Critical;
        ctx.raise_display(0.85);
        ctx.reason = Some(render(&m.temp_critical, &[("temp", ctx.latest_temp)]));
        ctx.set_trip(TripCause::Overtemp);
    } else if ctx.status == PumpStatus::Healthy
        && (ctx.temp >= t.temp_warning_c || ctx.latest_temp >= t.temp_warning_c)
    {
        ctx.status = PumpStatus::Warning;
        ctx.raise_display(0.55);
        ctx.reason = Some(render(&m.temp_warning, &[("temp", ctx.latest_temp)]));
        ctx.add_alarm(AlarmCause::OvertempWarning);
    }
}

/// Motor overload: WARNING while still otherwise healthy.
fn overload_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.reason.is_some() || ctx.status != PumpStatus::Healthy {
        return;
    }
    if ctx.current >= t.overload_current_min_amp
        || ctx.latest_current >= t.overload_current_min_amp
    {
        ctx.status = PumpStatus::Warning;
        ctx.raise_display(0.55);
        ctx.reason = Some(m.overload.clone());
    }
}

/// High discharge pressure with normal flow (not choked): WARNING.
fn high_pressure_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.reason.is_some() || ctx.status != PumpStatus::Healthy {
        return;
    }
    let not_choked = ctx.current > t.choked_current_max_amp
        && ctx.latest_current > t.choked_current_max_amp;
    if (ctx.pressure >= t.pressure_high_warning_bar
        || ctx.latest_pressure >= t.pressure_high_warning_bar)
        && not_choked
    {
        ctx.status = PumpStatus::Warning;
        ctx.raise_display(0.55);
        ctx.reason = Some(m.pressure_high.clone());
    }
}

/// Air ingestion: elevated crest factor with Zone B/C vibration. WARNING.
fn air_ingestion_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.reason.is_some() || ctx.status != PumpStatus::Healthy {
        return;
    }
    let fires = (ctx.vib_crest >= t.air_ingestion_vib_crest_min
        || ctx.latest_crest >= t.air_ingestion_vib_crest_min)
        && (ctx.vib_rms >= t.air_ingestion_vib_rms_min_mmps
            || ctx.latest_vib >= t.air_ingestion_vib_rms_min_mmps);
    if fires {
        ctx.status = PumpStatus::Warning;
        ctx.raise_display(0.55);
        ctx.reason = Some(m.air_ingestion.clone());
    }
}

/// ISO 10816-3 zones: Zone D (>= 7.1 mm/s) is CRITICAL; sustained Zone C
/// (>= 5.5 mm/s with elevated model risk) is WARNING.
fn vibration_zone_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.vib_rms >= t.vibration_critical_mmps || ctx.latest_vib >= t.vibration_critical_mmps {
        ctx.status = PumpStatus::Critical;
        ctx.raise_display(0.85);
        // Keep the physical-cause reason when one is already present.
        let keep = match ctx.reason.as_deref() {
            Some(r) => {
                r == m.mechanical
                    || r == m.cavitation
                    || r.trim_start().starts_with("CHOKED DISCHARGE")
                    || r.contains("HIGH TEMPERATURE")
            }
            None => false,
        };
        if !keep {
            ctx.reason = Some(m.vibration_zone_d.clone());
        }
        ctx.add_alarm(AlarmCause::VibZoneD);
    } else if ctx.status == PumpStatus::Healthy
        && ctx.vib_rms >= t.vibration_warning_entry_mmps
        && ctx.latest_vib >= t.vibration_warning_entry_mmps
        && ctx.smoothed_prob >= t.prob_min_for_vibration_warning
    {
        ctx.status = PumpStatus::Warning;
        ctx.reason = Some(m.vibration_zone_c.clone());
        ctx.add_alarm(AlarmCause::VibZoneC);
    }
}

/// Vibration hysteresis: stay WARNING until vibration drops below the exit
/// level; leave CRITICAL only after enough consecutive low-vibration steps.
fn vibration_hysteresis_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.last_status == Some(PumpStatus::Warning)
        && ctx.status == PumpStatus::Healthy
        && (ctx.vib_rms >= t.vibration_hysteresis_exit_warning_mmps
            || ctx.latest_vib >= t.vibration_hysteresis_exit_warning_mmps)
    {
        ctx.status = PumpStatus::Warning;
        if ctx.reason.is_none() {
            ctx.reason = Some(m.vibration_zone_c.clone());
        }
    }

    if ctx.last_status == Some(PumpStatus::Critical) && ctx.status == PumpStatus::Warning {
        if ctx.vib_rms >= t.vibration_hysteresis_exit_critical_mmps
            || ctx.latest_vib >= t.vibration_hysteresis_exit_critical_mmps
        {
            ctx.status = PumpStatus::Critical;
            ctx.critical_low_vib_steps = 0;
        } else {
            ctx.critical_low_vib_steps += 1;
            if ctx.critical_low_vib_steps < t.critical_exit_min_low_vib_steps {
                ctx.status = PumpStatus::Critical;
            } else {
                ctx.critical_low_vib_steps = 0;
            }
        }
    }
}

/// Hard vibration interlock at 9.0 mm/s: CRITICAL at 99.9% display risk.
/// Between Zone D and the interlock the display risk ramps 0.85 → 1.00.
fn interlock_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.vib_rms >= t.vibration_interlock_mmps {
        ctx.status = PumpStatus::Critical;
        ctx.display_prob = 0.999;
        // Keep cavitation and temperature reasons so the shutdown type stays correct.
        let keep_reason = match ctx.reason.as_deref() {
            Some(r) => r.contains("HIGH TEMPERATURE") || r == m.cavitation,
            None => false,
        };
        if !keep_reason {
            ctx.reason = Some(m.vibration_interlock.clone());
        }
        if ctx.trip_cause.is_none() {
            ctx.trip_cause = Some(TripCause::VibInterlock);
        }
        ctx.add_alarm(AlarmCause::VibInterlock);
    } else if matches!(ctx.status, PumpStatus::Critical | PumpStatus::Warning)
        && ctx.vib_rms >= t.vibration_critical_mmps
        && t.vibration_interlock_mmps > t.vibration_critical_mmps
    {
        let denom = t.vibration_interlock_mmps - t.vibration_critical_mmps;
        let ramp = (ctx.vib_rms - t.vibration_critical_mmps) / denom;
        ctx.raise_display(0.85 + ramp * 0.15);
        ctx.display_prob = ctx.display_prob.min(1.0);
    }
}

/// Enforce the CRITICAL display floor, replace stale WARNING-tier reasons,
/// and hold WARNING while the model risk has not decayed.
fn final_cleanup_rule(ctx: &mut RuleContext, t: &ThresholdConfig, m: &MessageConfig) {
    if ctx.status == PumpStatus::Critical {
        ctx.raise_display(0.85);
        if ctx
            .reason
            .as_deref()
            .is_some_and(|r| r.trim_start().starts_with("MAINTENANCE (Zone C)"))
        {
            ctx.reason = Some(m.high_risk_critical.clone());
        }
    }
    if ctx.last_status == Some(PumpStatus::Warning)
        && ctx.status == PumpStatus::Healthy
        && ctx.smoothed_prob >= t.prob_hysteresis_exit_warning
    {
        ctx.status = PumpStatus::Warning;
        if ctx.reason.is_none() {
            ctx.reason = Some(m.elevated_risk.clone());
        }
    }
}
