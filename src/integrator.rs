//! Charge/drain integrator
//!
//! [`step`] is the single state transition of the reserve: a pure function of
//! the current reserve, the epoch's context and indices, and the parameters.

use crate::config::Params;
use crate::context::ContextKind;
use crate::features::Indices;
use crate::math::clamp;
use crate::quality::{gate_weights, ChargeTriple, DrainTriple, Gate};

/// Prior charge and drain weights for one context
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleWeights {
    pub charge: ChargeTriple,
    pub drain: DrainTriple,
}

/// Prior weights per context kind.
pub fn rule_weights(kind: ContextKind) -> RuleWeights {
    let (charge, drain) = match kind {
        ContextKind::Sleep => (ChargeTriple::new(1.0, 0.0, 0.0), DrainTriple::new(0.08, 0.32, 0.6)),
        ContextKind::Workout => (ChargeTriple::new(0.0, 0.0, 0.0), DrainTriple::new(0.78, 0.22, 0.0)),
        ContextKind::Meditation => (ChargeTriple::new(0.0, 0.25, 0.75), DrainTriple::new(0.05, 0.95, 0.0)),
        ContextKind::AwakeRest => (ChargeTriple::new(0.0, 1.0, 0.0), DrainTriple::new(0.15, 0.85, 0.0)),
        ContextKind::PostActivityRecovery => {
            (ChargeTriple::new(0.0, 0.9, 0.1), DrainTriple::new(0.1, 0.9, 0.0))
        }
        ContextKind::HighActivity => (ChargeTriple::new(0.0, 0.0, 0.0), DrainTriple::new(0.8, 0.2, 0.0)),
        ContextKind::Active => (ChargeTriple::new(0.0, 0.05, 0.0), DrainTriple::new(0.72, 0.28, 0.0)),
        ContextKind::LightActivity => (ChargeTriple::new(0.0, 0.12, 0.0), DrainTriple::new(0.62, 0.38, 0.0)),
        ContextKind::Awake | ContextKind::Forecast => {
            (ChargeTriple::new(0.0, 0.18, 0.0), DrainTriple::new(0.45, 0.55, 0.0))
        }
    };
    RuleWeights { charge, drain }
}

/// `(1 - reserve/100)^exponent`; charging slows as the reserve fills.
pub fn saturation_factor(reserve: f64, exponent: f64) -> f64 {
    let x = clamp(1.0 - reserve / 100.0, 0.0, 1.0);
    x.powf(exponent)
}

/// Confidence floor of a context
pub fn confidence_floor(kind: ContextKind, params: &Params) -> f64 {
    match kind {
        ContextKind::Sleep => 0.35,
        ContextKind::Workout => 0.25,
        _ => params.confidence_floor,
    }
}

/// Outcome of one integration step
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub saturation: f64,
    pub charge_gate: Gate<ChargeTriple>,
    pub drain_gate: Gate<DrainTriple>,
    pub charge_per_hour: f64,
    pub charge_per_hour_core: f64,
    pub charge_per_hour_extra: f64,
    pub drain_per_hour: f64,
    pub charge_points: f64,
    pub charge_points_extra: f64,
    pub drain_points: f64,
    /// Net change after the per-hour clamp
    pub delta_core: f64,
    pub next_reserve: f64,
    pub confidence: f64,
}

/// Advance the reserve by one epoch.
///
/// `extra_charge_per_hour` is scaled by saturation but not by the charge
/// gate. The net delta is clamped to `±maxDeltaPerHour * dt_hours`.
pub fn step(
    dt_hours: f64,
    reserve: f64,
    kind: ContextKind,
    indices: &Indices,
    params: &Params,
    weights: &RuleWeights,
    extra_charge_per_hour: f64,
) -> Step {
    let saturation = saturation_factor(reserve, params.saturation_exponent);

    let charge_gate = gate_weights(&weights.charge, &indices.quality.charge, params.min_charge_scale);
    let drain_gate = gate_weights(&weights.drain, &indices.quality.drain, params.min_drain_scale);

    let cw = charge_gate.weights;
    let raw_charge = cw.sleep * params.base_sleep_charge_per_hour * indices.recovery.sleep
        + cw.rest * params.base_rest_charge_per_hour * indices.recovery.rest
        + cw.mind * params.base_mind_charge_per_hour * indices.recovery.mind;

    let extra = if extra_charge_per_hour.is_finite() {
        extra_charge_per_hour.max(0.0)
    } else {
        0.0
    };
    let charge_per_hour_core = saturation * charge_gate.group_scale * raw_charge;
    let charge_per_hour_extra = saturation * extra;
    let charge_per_hour = charge_per_hour_core + charge_per_hour_extra;

    let dw = drain_gate.weights;
    let rates = &indices.drain_rates;
    let raw_drain = dw.load * rates.load + dw.stress * rates.stress + dw.anom * rates.anom;
    let drain_per_hour = drain_gate.group_scale * raw_drain;

    let charge_points = dt_hours * charge_per_hour;
    let charge_points_extra = dt_hours * charge_per_hour_extra;
    let drain_points = dt_hours * drain_per_hour;

    let max_delta = params.max_delta_per_hour * dt_hours;
    let max_delta = if max_delta.is_finite() { max_delta.max(0.0) } else { 0.0 };
    let delta_core = clamp(charge_points - drain_points, -max_delta, max_delta);
    let next_reserve = clamp(reserve + delta_core, 0.0, 100.0);

    let floor = confidence_floor(kind, params);
    let base = 0.5 * charge_gate.group_quality + 0.5 * drain_gate.group_quality;
    let confidence = clamp(floor + (1.0 - floor) * base, 0.0, 1.0);

    Step {
        saturation,
        charge_gate,
        drain_gate,
        charge_per_hour,
        charge_per_hour_core,
        charge_per_hour_extra,
        drain_per_hour,
        charge_points,
        charge_points_extra,
        drain_points,
        delta_core,
        next_reserve,
        confidence,
    }
}

/// Fatigue score in 0..100 from the drain rate
pub fn fatigue_score(drain_per_hour: f64, params: &Params) -> f64 {
    clamp(100.0 * drain_per_hour / params.fatigue_drain_per_hour_for100.max(1e-6), 0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::features::{compute_indices, IndexMeta};
    use crate::quality::{assess, Triple};
    use crate::types::{Baselines, Epoch, ImputedChannels};

    fn indices(epoch: &Epoch, context: &Context) -> Indices {
        let b = Baselines::default();
        let q = assess(epoch, &ImputedChannels::default(), &b);
        compute_indices(epoch, &q, context, &b, &Params::default(), 5.0, &IndexMeta::default())
    }

    #[test]
    fn test_rule_weights_sum_to_one_for_drain() {
        for kind in [
            ContextKind::Sleep,
            ContextKind::Workout,
            ContextKind::Meditation,
            ContextKind::HighActivity,
            ContextKind::Active,
            ContextKind::LightActivity,
            ContextKind::AwakeRest,
            ContextKind::Awake,
            ContextKind::PostActivityRecovery,
        ] {
            let sum: f64 = rule_weights(kind).drain.to_array().iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "{kind:?}");
        }
    }

    #[test]
    fn test_saturation() {
        assert_eq!(saturation_factor(100.0, 0.5), 0.0);
        assert_eq!(saturation_factor(0.0, 0.5), 1.0);
        assert!((saturation_factor(75.0, 0.5) - 0.5).abs() < 1e-12);
        assert_eq!(saturation_factor(140.0, 0.5), 0.0);
    }

    #[test]
    fn test_sleep_charges_and_stays_bounded() {
        let epoch = Epoch {
            sleep_stage: Some("deep".to_string()),
            hr_bpm: Some(52.0),
            hrv_sdnn_ms: Some(70.0),
            ..Default::default()
        };
        let ctx = Context::Sleep {
            sleep_stage: "deep".to_string(),
        };
        let idx = indices(&epoch, &ctx);
        let params = Params::default();
        let s = step(5.0 / 60.0, 40.0, ContextKind::Sleep, &idx, &params, &rule_weights(ContextKind::Sleep), 0.0);
        assert!(s.next_reserve > 40.0);
        assert!(s.confidence >= 0.35 && s.confidence <= 1.0);

        let full = step(5.0 / 60.0, 100.0, ContextKind::Sleep, &idx, &params, &rule_weights(ContextKind::Sleep), 0.0);
        assert_eq!(full.charge_per_hour, 0.0);
        assert!(full.next_reserve <= 100.0);
    }

    #[test]
    fn test_delta_is_clamped_per_hour() {
        let epoch = Epoch {
            workout: true,
            hr_bpm: Some(185.0),
            steps: Some(900.0),
            power_w: Some(400.0),
            ..Default::default()
        };
        let ctx = Context::Workout { workout_type: None };
        let idx = indices(&epoch, &ctx);
        let params = Params {
            load_drain_workout_max_per_hour: 200.0,
            ..Default::default()
        };
        let dt = 5.0 / 60.0;
        let s = step(dt, 50.0, ContextKind::Workout, &idx, &params, &rule_weights(ContextKind::Workout), 0.0);
        assert!((s.delta_core + params.max_delta_per_hour * dt).abs() < 1e-9);
        assert!(s.drain_points > params.max_delta_per_hour * dt);
    }

    #[test]
    fn test_extra_charge_scaled_by_saturation_only() {
        let epoch = Epoch::default();
        let ctx = Context::Awake(Default::default());
        let idx = indices(&epoch, &ctx);
        let params = Params::default();
        let s = step(1.0, 75.0, ContextKind::Awake, &idx, &params, &rule_weights(ContextKind::Awake), 4.0);
        assert!((s.charge_per_hour_extra - 2.0).abs() < 1e-12);
        assert!((s.charge_points_extra - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_fatigue_score() {
        let params = Params::default();
        assert_eq!(fatigue_score(20.0, &params), 50.0);
        assert_eq!(fatigue_score(400.0, &params), 100.0);
    }
}
