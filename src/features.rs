//! Per-epoch index computation
//!
//! Turns one epoch (with its context, quality and temporal metadata) into the
//! recovery indices, drain rates, temperature state and comfort score the
//! integrator consumes. Everything here is a pure function of its inputs.

use serde::{Deserialize, Serialize};

use crate::config::Params;
use crate::context::{Context, ContextKind};
use crate::math::{clamp, clamp01, ramp_down01, ramp_up01, relu, z_score};
use crate::quality::{ChargeTriple, DrainTriple};
use crate::types::{AnomBreakdown, Baselines, ChannelQuality, Epoch, InputEcho};

/// Physiological ceilings for the movement indices
const STEPS_PER_MIN_CEILING: f64 = 150.0;
const KCAL_PER_MIN_CEILING: f64 = 20.0;
const POWER_RATIO_CEILING: f64 = 1.6;

/// Independent movement evidence thresholds
const EVIDENCE_STEPS_PER_MIN: f64 = 8.0;
const EVIDENCE_KCAL_PER_MIN: f64 = 1.2;
const EVIDENCE_POWER_W: f64 = 60.0;

/// Movement and heart-rate effort indices of one epoch
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActivityIndices {
    pub steps_per_min: f64,
    pub energy_per_min: f64,
    pub steps_idx: f64,
    pub energy_idx: f64,
    pub power_idx: f64,
    pub hr_idx: f64,
    /// Mean of the movement indices
    pub activity_idx: f64,
    /// Max of the movement indices
    pub movement_intensity: f64,
    /// Intensity driving mechanical load drain
    pub load_intensity: f64,
    pub has_activity_signal: bool,
}

impl ActivityIndices {
    /// Compute movement indices over an interval of `minutes`.
    pub fn compute(epoch: &Epoch, baselines: &Baselines, minutes: f64) -> Self {
        let dt_min = if minutes.is_finite() && minutes > 0.0 { minutes } else { 5.0 };
        let steps_per_min = epoch.steps.unwrap_or(0.0) / dt_min;
        let energy_per_min = epoch.active_energy_kcal.unwrap_or(0.0) / dt_min;

        let steps_idx = clamp01(steps_per_min / STEPS_PER_MIN_CEILING);
        let energy_idx = clamp01(energy_per_min / KCAL_PER_MIN_CEILING);
        let ftp = baselines.ftp_w;
        let power_idx = match epoch.power_w {
            Some(p) if ftp.is_finite() && ftp > 0.0 => {
                clamp(p / ftp, 0.0, POWER_RATIO_CEILING) / POWER_RATIO_CEILING
            }
            _ => 0.0,
        };
        let rhr = baselines.rhr_bpm;
        let hr_max = baselines.hr_max_bpm;
        let hr_idx = match epoch.hr_bpm {
            Some(hr) if rhr.is_finite() && hr_max.is_finite() && hr_max > rhr => {
                clamp01((hr - rhr) / (hr_max - rhr))
            }
            _ => 0.0,
        };

        let movement_intensity = clamp01(steps_idx.max(energy_idx).max(power_idx));
        let has_activity_signal = steps_per_min >= EVIDENCE_STEPS_PER_MIN
            || energy_per_min >= EVIDENCE_KCAL_PER_MIN
            || epoch.power_w.is_some_and(|p| p.is_finite() && p >= EVIDENCE_POWER_W);

        Self {
            steps_per_min,
            energy_per_min,
            steps_idx,
            energy_idx,
            power_idx,
            hr_idx,
            activity_idx: clamp01((steps_idx + energy_idx + power_idx) / 3.0),
            movement_intensity,
            load_intensity: movement_intensity,
            has_activity_signal,
        }
    }
}

/// How wrist temperature was interpreted for an epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempMode {
    #[default]
    Missing,
    Neutral,
    OnsetHeatLoss,
    HeatStress,
    FeverLike,
}

/// Dual-mechanism wrist temperature assessment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureState {
    pub delta_c: Option<f64>,
    pub mode: TempMode,
    pub onset_benefit_index: f64,
    pub overheat_index: f64,
    pub fever_index: f64,
    pub harm_index: f64,
    pub heat_likely: bool,
    pub physio_heat_stress01: f64,
    pub sleep_minutes_from_start: Option<f64>,
}

/// Mood, stress and HRV strain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindState {
    pub som_valence01: Option<f64>,
    pub som_stress01: Option<f64>,
    pub som_strain01: Option<f64>,
    pub hrv_strain01: Option<f64>,
    pub mind_strain01: f64,
    pub stress_from_hrv: f64,
    pub stress_from_som: f64,
    pub stress_from_mind: f64,
}

/// Temporal and session context the index computation needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexMeta {
    /// Minutes since the current sleep run began
    pub sleep_minutes_from_start: Option<f64>,
    /// Consecutive heat-flagged sleep minutes before this epoch
    pub sleep_heat_streak_minutes: f64,
    /// Sleep architecture factor of the enclosing session
    pub architecture_factor: f64,
    /// Behavioral sleep scale (1 when not applied)
    pub sleep_scale: f64,
    /// Behavioral workout load scale (1 when not applied)
    pub workout_scale: f64,
}

impl Default for IndexMeta {
    fn default() -> Self {
        Self {
            sleep_minutes_from_start: None,
            sleep_heat_streak_minutes: 0.0,
            architecture_factor: 1.0,
            sleep_scale: 1.0,
            workout_scale: 1.0,
        }
    }
}

/// Effective quality of each charge and drain sub-channel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComponentQuality {
    pub charge: ChargeTriple,
    pub drain: DrainTriple,
}

/// Everything the integrator needs from one epoch
#[derive(Debug, Clone, PartialEq)]
pub struct Indices {
    pub values: InputEcho,
    pub z_hrv: Option<f64>,
    pub activity: ActivityIndices,
    pub mind: MindState,
    /// Sleep, rest and mind recovery indices
    pub recovery: ChargeTriple,
    pub anom_index: f64,
    pub anom_breakdown: AnomBreakdown,
    pub temperature: TemperatureState,
    pub comfort_score: f64,
    /// Load, stress and anomaly drain rates (points/hour)
    pub drain_rates: DrainTriple,
    pub quality: ComponentQuality,
}

/// Charge multiplier for a sleep stage label
pub fn sleep_stage_factor(stage: &str) -> f64 {
    let s = stage.to_ascii_lowercase();
    if s.contains("deep") {
        1.2
    } else if s.contains("core") || s.contains("light") {
        1.0
    } else if s.contains("rem") {
        0.9
    } else if s.contains("awake") {
        0.25
    } else if s.contains("inbed") || s.contains("in_bed") {
        0.35
    } else {
        1.0
    }
}

#[allow(clippy::too_many_arguments)]
fn assess_temperature(
    epoch: &Epoch,
    z_hrv: Option<f64>,
    q_temp: f64,
    is_sleep: bool,
    baselines: &Baselines,
    params: &Params,
    dt_min: f64,
    meta: &IndexMeta,
) -> TemperatureState {
    let rhr = baselines.rhr_bpm;
    let hr_high = epoch
        .hr_bpm
        .map(|hr| clamp01((hr - (rhr + 12.0)) / 18.0))
        .unwrap_or(0.0);
    let rr_scale = baselines.resp_rate_scale_brpm;
    let rr_high = match epoch.resp_rate_brpm {
        Some(rr) if rr_scale > 0.0 => clamp01((rr - baselines.resp_rate_brpm) / (2.0 * rr_scale)),
        _ => 0.0,
    };
    let spo2_low = epoch
        .spo2_pct
        .map(|s| clamp01((baselines.spo2_pct - s) / 4.0))
        .unwrap_or(0.0);
    let hrv_low = z_hrv.map(|z| clamp01(-z / 2.0)).unwrap_or(0.0);
    let heat_stress = clamp01(0.35 * hr_high + 0.25 * rr_high + 0.25 * spo2_low + 0.15 * hrv_low);

    let mut state = TemperatureState {
        delta_c: epoch.wrist_temp_c.map(|t| t - baselines.wrist_temp_c),
        physio_heat_stress01: heat_stress,
        sleep_minutes_from_start: meta.sleep_minutes_from_start,
        ..Default::default()
    };

    let Some(d) = state.delta_c else {
        return state;
    };
    if q_temp <= 0.0 {
        return state;
    }
    state.mode = TempMode::Neutral;

    let onset_window = is_sleep
        && meta
            .sleep_minutes_from_start
            .is_some_and(|m| m <= params.temp_onset_window_minutes);

    let onset_min = params.temp_onset_beneficial_min_c;
    let onset_max = params.temp_onset_beneficial_max_c;
    if onset_window && d >= onset_min && d <= onset_max && heat_stress <= 0.6 {
        let shape = clamp01((d - onset_min) / (onset_max - onset_min).max(1e-6));
        state.onset_benefit_index = shape * (1.0 - heat_stress) * q_temp;
        if state.onset_benefit_index > 0.0 {
            state.mode = TempMode::OnsetHeatLoss;
        }
    }

    let overheat_base = relu((d - params.temp_overheat_start_c) / params.temp_overheat_scale_c);
    let fever_base = relu((d - params.temp_fever_start_c) / params.temp_fever_scale_c);
    let extreme = d >= params.temp_fever_start_c;

    if overheat_base > 0.0 && (!onset_window || heat_stress > 0.3 || extreme) {
        let streak = meta.sleep_heat_streak_minutes.max(0.0) + dt_min;
        let sustained_frac = clamp01(streak / params.temp_sustained_heat_minutes);
        let sustained = 1.0 + (params.temp_sustained_heat_multiplier_max - 1.0) * sustained_frac;
        state.overheat_index = overheat_base * (0.7 + 0.6 * heat_stress) * sustained * q_temp;
        if state.overheat_index > 0.0 {
            state.heat_likely = true;
            state.mode = TempMode::HeatStress;
        }
    }

    if fever_base > 0.0 {
        state.fever_index = fever_base * (0.6 + 0.8 * heat_stress) * q_temp;
        if state.fever_index > 0.0 {
            state.heat_likely = true;
            state.mode = TempMode::FeverLike;
        }
    }

    state.harm_index = state.overheat_index + state.fever_index;
    state
}

fn assess_mind(epoch: &Epoch, z_hrv: Option<f64>, q: &ChannelQuality, params: &Params) -> MindState {
    let som = epoch
        .state_of_mind
        .filter(|s| s.valence01.is_some() || s.stress01.is_some());

    let low_mood = som.and_then(|s| s.valence01).map(|v| {
        ramp_down01(v, params.som_low_mood_start01, params.som_low_mood_full01)
    });
    let high_stress = som.and_then(|s| s.stress01).map(|v| {
        ramp_up01(v, params.som_high_stress_start01, params.som_high_stress_full01)
    });
    let som_strain = som.map(|_| {
        clamp01(low_mood.unwrap_or(0.0).max(high_stress.unwrap_or(0.0)) * clamp01(q.som))
    });

    let start_z = params.mind_strain_from_hrv_start_z;
    let full_z = params.mind_strain_from_hrv_full_z;
    let hrv_strain = z_hrv.map(|z| clamp01((relu(-z) - start_z) / (full_z - start_z) * clamp01(q.hrv)));

    let w = params.som_priority_weight;
    let mind_strain = match som_strain {
        Some(s) => clamp01(w * s + (1.0 - w) * hrv_strain.unwrap_or(0.0)),
        None => clamp01(hrv_strain.unwrap_or(0.0)),
    };

    let stress_from_hrv = z_hrv.map(|z| relu(-z)).unwrap_or(0.0);
    let stress_from_som = som_strain.map(|s| s * params.som_stress_index_max).unwrap_or(0.0);
    let stress_from_mind = match som_strain {
        Some(_) => w * stress_from_som + (1.0 - w) * stress_from_hrv,
        None => stress_from_hrv,
    };

    MindState {
        som_valence01: som.and_then(|s| s.valence01),
        som_stress01: som.and_then(|s| s.stress01),
        som_strain01: som_strain,
        hrv_strain01: hrv_strain,
        mind_strain01: mind_strain,
        stress_from_hrv,
        stress_from_som,
        stress_from_mind,
    }
}

/// Compute all indices for one epoch.
///
/// Load and stress never share the same elevated-HR evidence: heart rate
/// feeds mechanical load only in WORKOUT (fully) or when movement corroborates
/// it (at half weight); otherwise it surfaces as stress.
pub fn compute_indices(
    epoch: &Epoch,
    q: &ChannelQuality,
    context: &Context,
    baselines: &Baselines,
    params: &Params,
    dt_minutes: f64,
    meta: &IndexMeta,
) -> Indices {
    let kind = context.kind();
    let is_sleep = kind == ContextKind::Sleep;
    let dt_min = if dt_minutes.is_finite() && dt_minutes > 0.0 {
        dt_minutes
    } else {
        params.epoch_minutes
    };
    let rhr = baselines.rhr_bpm;
    let hr = epoch.hr_bpm;

    let mut activity = ActivityIndices::compute(epoch, baselines, dt_min);
    activity.load_intensity = if kind == ContextKind::Workout {
        clamp01(activity.movement_intensity.max(params.workout_hr_weight * activity.hr_idx))
    } else if activity.has_activity_signal {
        clamp01(activity.movement_intensity.max(0.5 * activity.hr_idx))
    } else {
        activity.movement_intensity
    };

    let z_hrv = epoch
        .hrv_sdnn_ms
        .and_then(|v| z_score(v, baselines.hrv_sdnn_ms, baselines.hrv_scale_ms));

    let spo2_penalty = epoch
        .spo2_pct
        .map(|s| relu((baselines.spo2_pct - s) / 2.0))
        .unwrap_or(0.0);
    let rr_penalty = epoch
        .resp_rate_brpm
        .map(|r| relu((r - baselines.resp_rate_brpm) / 2.0))
        .unwrap_or(0.0);

    let q_temp = clamp01(q.temp);
    let temperature = assess_temperature(epoch, z_hrv, q_temp, is_sleep, baselines, params, dt_min, meta);

    let spo2_eff = spo2_penalty * clamp01(q.spo2);
    let rr_eff = rr_penalty * clamp01(q.rr);
    let anom_index = spo2_eff + 0.7 * rr_eff + params.temp_anom_weight * temperature.harm_index;

    // Recovery channels
    let stage_factor = context.sleep_stage().map(sleep_stage_factor).unwrap_or(0.0);

    let mut autonomic = 1.0;
    if let Some(z) = z_hrv {
        autonomic += 0.15 * clamp(z, -3.0, 3.0);
    }
    if let Some(hr) = hr {
        autonomic -= 0.1 * clamp((hr - rhr) / 5.0, 0.0, 5.0);
    }
    let autonomic = clamp(autonomic, 0.4, 1.6);

    let mut sleep_recovery = stage_factor * autonomic * (-0.12 * anom_index).exp();
    if is_sleep && temperature.onset_benefit_index > 0.0 {
        sleep_recovery *= 1.0 + params.temp_onset_benefit_max_boost * temperature.onset_benefit_index;
    }
    sleep_recovery *= meta.architecture_factor * meta.sleep_scale;
    let sleep_recovery = clamp(sleep_recovery, 0.0, 2.5);

    let hrv_bonus = |cap: f64| z_hrv.map(|z| clamp(z / 2.0, 0.0, cap)).unwrap_or(0.0);

    let rest_recovery = if kind.is_resting_awake() {
        let hr_relax = hr.map(|hr| clamp01((rhr + 15.0 - hr) / 15.0)).unwrap_or(0.6);
        let step_relax = clamp01((10.0 - activity.steps_per_min) / 10.0);
        clamp(0.55 * hr_relax + 0.35 * step_relax + 0.2 * hrv_bonus(0.6), 0.0, 1.5)
    } else {
        0.0
    };

    let mind_recovery = if epoch.mindful || kind == ContextKind::Meditation {
        let hr_relax = hr.map(|hr| clamp01((rhr + 18.0 - hr) / 18.0)).unwrap_or(0.6);
        clamp(0.7 + 0.4 * hr_relax + 0.2 * hrv_bonus(0.8), 0.0, 1.8)
    } else {
        0.0
    };

    // Drain channels
    let (load_max, load_exponent) = match kind {
        ContextKind::Workout => (params.load_drain_workout_max_per_hour, 1.55),
        ContextKind::HighActivity => (params.load_drain_high_activity_max_per_hour, 1.25),
        _ => (params.load_drain_active_max_per_hour, 1.25),
    };
    let mut load_rate = load_max * activity.load_intensity.powf(load_exponent);
    if kind == ContextKind::Workout {
        load_rate *= meta.workout_scale;
    }

    let mind = assess_mind(epoch, z_hrv, q, params);

    let stress_from_hr = hr
        .map(|hr| relu(hr - (rhr + 10.0 + 70.0 * activity.activity_idx)) / 10.0)
        .unwrap_or(0.0);
    let rest_elevation = match hr {
        Some(hr) if kind.is_resting_awake() => relu((hr - (rhr + 5.0)) / 5.0),
        _ => 0.0,
    };
    let stress_index = clamp(
        0.8 * mind.stress_from_mind + 0.4 * stress_from_hr + 0.2 * rest_elevation,
        0.0,
        5.0,
    );
    let stress_rate = clamp(
        params.stress_drain_per_index_per_hour * stress_index,
        0.0,
        params.stress_drain_max_per_hour,
    );
    let anom_rate = clamp(
        params.anom_drain_per_index_per_hour * anom_index,
        0.0,
        params.anom_drain_max_per_hour,
    );

    // Effective quality per sub-channel
    let q_anom = clamp01(q.spo2.max(q.rr).max(q.temp));
    let quality = ComponentQuality {
        charge: ChargeTriple::new(
            clamp01(0.4 + 0.3 * q.hrv + 0.2 * q.hr + 0.1 * q_anom),
            clamp01(0.35 + 0.45 * q.hr + 0.2 * q.steps),
            clamp01(0.35 + 0.4 * q.hr + 0.25 * q.hrv),
        ),
        drain: DrainTriple::new(
            clamp01(q.steps.max(q.energy).max(q.power).max(q.hr)),
            clamp01(q.hrv.max(q.hr)),
            q_anom,
        ),
    };

    let respiratory_discomfort = 0.9 * spo2_eff + 0.6 * rr_eff;
    let thermal_discomfort = temperature.overheat_index + 0.6 * temperature.fever_index;
    let discomfort = thermal_discomfort + 0.5 * respiratory_discomfort;
    let comfort_score = clamp(
        100.0
            - params.comfort_penalty_per_index * discomfort
            - params.mind_comfort_penalty_max_points * mind.mind_strain01,
        0.0,
        100.0,
    );

    Indices {
        values: InputEcho {
            hr,
            hrv: epoch.hrv_sdnn_ms,
            spo2: epoch.spo2_pct,
            rr: epoch.resp_rate_brpm,
            temp: epoch.wrist_temp_c,
            steps: epoch.steps,
            active_energy: epoch.active_energy_kcal,
            power: epoch.power_w,
            state_of_mind: epoch.state_of_mind,
        },
        z_hrv,
        activity,
        mind,
        recovery: ChargeTriple::new(sleep_recovery, rest_recovery, mind_recovery),
        anom_index,
        anom_breakdown: AnomBreakdown {
            spo2: spo2_eff,
            rr: rr_eff,
            temp: temperature.harm_index,
        },
        temperature,
        comfort_score,
        drain_rates: DrainTriple::new(load_rate, stress_rate, anom_rate),
        quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::assess;
    use crate::types::{ImputedChannels, StateOfMind};

    fn make_baselines() -> Baselines {
        Baselines {
            hrv_sdnn_ms: 55.0,
            wrist_temp_c: 36.55,
            ..Default::default()
        }
    }

    fn indices_for(epoch: &Epoch, context: &Context, meta: &IndexMeta) -> Indices {
        let b = make_baselines();
        let q = assess(epoch, &ImputedChannels::default(), &b);
        compute_indices(epoch, &q, context, &b, &Params::default(), 5.0, meta)
    }

    fn sleep(stage: &str) -> Context {
        Context::Sleep {
            sleep_stage: stage.to_string(),
        }
    }

    #[test]
    fn test_stage_factors() {
        assert_eq!(sleep_stage_factor("deep"), 1.2);
        assert_eq!(sleep_stage_factor("Core"), 1.0);
        assert_eq!(sleep_stage_factor("rem"), 0.9);
        assert_eq!(sleep_stage_factor("inBed"), 0.35);
        assert_eq!(sleep_stage_factor("asleep"), 1.0);
    }

    #[test]
    fn test_workout_load_uses_hr_weight() {
        let epoch = Epoch {
            workout: true,
            hr_bpm: Some(138.0),
            steps: Some(525.0),
            active_energy_kcal: Some(70.0),
            power_w: Some(250.0),
            ..Default::default()
        };
        let ctx = Context::Workout { workout_type: None };
        let low = indices_for(&epoch, &ctx, &IndexMeta::default());

        let b = make_baselines();
        let q = assess(&epoch, &ImputedChannels::default(), &b);
        let params = Params {
            workout_hr_weight: 1.5,
            ..Default::default()
        };
        let high = compute_indices(&epoch, &q, &ctx, &b, &params, 5.0, &IndexMeta::default());
        assert!(high.drain_rates.load > low.drain_rates.load * 1.15);
    }

    #[test]
    fn test_elevated_hr_at_rest_is_stress_not_load() {
        let epoch = Epoch {
            hr_bpm: Some(110.0),
            steps: Some(0.0),
            ..Default::default()
        };
        let ctx = Context::Awake(Default::default());
        let idx = indices_for(&epoch, &ctx, &IndexMeta::default());
        assert_eq!(idx.drain_rates.load, 0.0);
        assert!(idx.drain_rates.stress > 0.0);
    }

    #[test]
    fn test_higher_hrv_raises_sleep_recovery() {
        let make = |hrv: f64| Epoch {
            sleep_stage: Some("core".to_string()),
            hr_bpm: Some(55.0),
            hrv_sdnn_ms: Some(hrv),
            ..Default::default()
        };
        let hi = indices_for(&make(80.0), &sleep("core"), &IndexMeta::default());
        let lo = indices_for(&make(30.0), &sleep("core"), &IndexMeta::default());
        assert!(hi.recovery.sleep > lo.recovery.sleep);
        assert!(lo.drain_rates.stress > hi.drain_rates.stress);
    }

    #[test]
    fn test_onset_warmth_is_beneficial() {
        let epoch = Epoch {
            hr_bpm: Some(54.0),
            wrist_temp_c: Some(36.85),
            ..Default::default()
        };
        let meta = IndexMeta {
            sleep_minutes_from_start: Some(10.0),
            ..Default::default()
        };
        let idx = indices_for(&epoch, &sleep("core"), &meta);
        assert_eq!(idx.temperature.mode, TempMode::OnsetHeatLoss);
        assert!(idx.temperature.onset_benefit_index > 0.0);
        assert_eq!(idx.temperature.harm_index, 0.0);
    }

    #[test]
    fn test_sustained_heat_is_harmful() {
        let epoch = Epoch {
            hr_bpm: Some(54.0),
            wrist_temp_c: Some(37.25),
            ..Default::default()
        };
        let early = IndexMeta {
            sleep_minutes_from_start: Some(240.0),
            sleep_heat_streak_minutes: 0.0,
            ..Default::default()
        };
        let late = IndexMeta {
            sleep_heat_streak_minutes: 240.0,
            ..early
        };
        let a = indices_for(&epoch, &sleep("core"), &early);
        let b = indices_for(&epoch, &sleep("core"), &late);
        assert_eq!(a.temperature.mode, TempMode::HeatStress);
        assert!(a.temperature.heat_likely);
        assert!(b.temperature.overheat_index > a.temperature.overheat_index);
        assert!(a.comfort_score < 100.0);
    }

    #[test]
    fn test_fever_like_elevation() {
        let epoch = Epoch {
            wrist_temp_c: Some(38.0),
            ..Default::default()
        };
        let idx = indices_for(&epoch, &Context::Awake(Default::default()), &IndexMeta::default());
        assert_eq!(idx.temperature.mode, TempMode::FeverLike);
        assert!(idx.temperature.fever_index > 0.0);
        assert!(idx.anom_index > 0.0);
    }

    #[test]
    fn test_low_mood_drives_stress_and_comfort() {
        let epoch = Epoch {
            state_of_mind: Some(StateOfMind {
                valence01: Some(0.1),
                stress01: None,
            }),
            ..Default::default()
        };
        let idx = indices_for(&epoch, &Context::Awake(Default::default()), &IndexMeta::default());
        assert_eq!(idx.mind.som_strain01, Some(1.0));
        assert!((idx.mind.mind_strain01 - 0.75).abs() < 1e-12);
        assert!((idx.comfort_score - 94.0).abs() < 1e-9);
        assert!(idx.drain_rates.stress > 0.0);
    }

    #[test]
    fn test_missing_channels_lower_component_quality() {
        let bare = Epoch {
            sleep_stage: Some("core".to_string()),
            ..Default::default()
        };
        let idx = indices_for(&bare, &sleep("core"), &IndexMeta::default());
        assert!((idx.quality.charge.sleep - 0.4).abs() < 1e-12);
        assert_eq!(idx.quality.drain.anom, 0.0);
    }
}
