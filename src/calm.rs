//! Post-activity calm recovery
//!
//! After an activity-like stretch ends, a short decaying window grants a bonus
//! charge and suppresses stress drain, as long as the body is visibly settling:
//! heart rate falling, HRV rising or metabolic output dropping.

use serde::{Deserialize, Serialize};

use crate::config::Params;
use crate::context::ContextKind;
use crate::features::Indices;
use crate::math::clamp01;
use crate::types::ChannelQuality;

const HR_DROP_WEIGHT: f64 = 0.55;
const HRV_RISE_WEIGHT: f64 = 0.25;
const METABOLIC_DROP_WEIGHT: f64 = 0.2;

/// Activity intensity at which the intensity factor saturates
const FULL_INTENSITY01: f64 = 0.6;

/// Calm-recovery evaluation for one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalmRecovery {
    pub index: f64,
    pub charge_per_hour: f64,
    pub signal01: f64,
    pub window_factor: f64,
    pub duration_factor: f64,
    pub intensity_factor: f64,
    pub minutes_since_active_end: Option<f64>,
    pub recovery_minutes: f64,
    pub last_active_intensity01: f64,
    pub stress_suppression_factor: f64,
}

impl Default for CalmRecovery {
    fn default() -> Self {
        Self {
            index: 0.0,
            charge_per_hour: 0.0,
            signal01: 0.0,
            window_factor: 0.0,
            duration_factor: 0.0,
            intensity_factor: 0.0,
            minutes_since_active_end: None,
            recovery_minutes: 0.0,
            last_active_intensity01: 0.0,
            stress_suppression_factor: 1.0,
        }
    }
}

impl CalmRecovery {
    pub fn is_active(&self) -> bool {
        self.index > 0.0
    }
}

/// Signals compared between consecutive epochs
#[derive(Debug, Clone, Copy)]
struct Signals {
    hr: Option<f64>,
    z_hrv: Option<f64>,
    steps_per_min: f64,
    energy_per_min: f64,
    quality: ChannelQuality,
}

impl Signals {
    fn from_indices(indices: &Indices, quality: &ChannelQuality) -> Self {
        Self {
            hr: indices.values.hr,
            z_hrv: indices.z_hrv,
            steps_per_min: indices.activity.steps_per_min,
            energy_per_min: indices.activity.energy_per_min,
            quality: *quality,
        }
    }
}

fn q_min(a: f64, b: f64) -> f64 {
    clamp01(clamp01(a).min(clamp01(b)))
}

/// Sequential state of the calm-recovery window across a run
#[derive(Debug, Clone, Default)]
pub struct CalmTracker {
    active_like_prev: bool,
    minutes_since_active_end: Option<f64>,
    recovery_minutes: f64,
    last_active_intensity01: f64,
    prev: Option<Signals>,
}

impl CalmTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate the current epoch and advance the window state.
    pub fn advance(
        &mut self,
        kind: ContextKind,
        indices: &Indices,
        quality: &ChannelQuality,
        dt_minutes: f64,
        params: &Params,
    ) -> CalmRecovery {
        let movement = clamp01(indices.activity.movement_intensity);
        let active_like = kind == ContextKind::Workout
            || movement >= params.post_activity_recovery_min_activity_intensity01;

        if active_like {
            self.minutes_since_active_end = None;
            self.recovery_minutes = 0.0;
            self.last_active_intensity01 = clamp01(movement.max(indices.activity.hr_idx));
        } else {
            if self.active_like_prev {
                self.minutes_since_active_end = Some(0.0);
                self.recovery_minutes = 0.0;
            } else if let Some(m) = self.minutes_since_active_end.as_mut() {
                *m += dt_minutes;
            }
            if self
                .minutes_since_active_end
                .is_some_and(|m| m > params.post_activity_recovery_window_minutes)
            {
                self.minutes_since_active_end = None;
                self.recovery_minutes = 0.0;
                self.last_active_intensity01 = 0.0;
            }
        }

        let current = Signals::from_indices(indices, quality);
        let mut calm = self.evaluate(kind, indices, &current, dt_minutes, params);

        if calm.is_active() {
            let base = 1.0 - clamp01(calm.signal01);
            calm.stress_suppression_factor = base
                .powf(params.post_activity_recovery_stress_suppression_power)
                .clamp(params.post_activity_recovery_stress_suppression_min_factor, 1.0);
            self.recovery_minutes =
                (self.recovery_minutes + dt_minutes).min(params.post_activity_recovery_max_minutes);
        } else if self.minutes_since_active_end.is_some() {
            self.recovery_minutes = 0.0;
        }

        self.active_like_prev = active_like;
        self.prev = Some(current);
        calm
    }

    fn evaluate(
        &self,
        kind: ContextKind,
        indices: &Indices,
        curr: &Signals,
        dt_minutes: f64,
        params: &Params,
    ) -> CalmRecovery {
        let window = params.post_activity_recovery_window_minutes;
        let max_minutes = params.post_activity_recovery_max_minutes;

        let mut out = CalmRecovery {
            minutes_since_active_end: self.minutes_since_active_end,
            recovery_minutes: self.recovery_minutes,
            last_active_intensity01: self.last_active_intensity01,
            ..Default::default()
        };

        let Some(prev) = self.prev else {
            return out;
        };
        let Some(since) = self.minutes_since_active_end else {
            return out;
        };
        if !dt_minutes.is_finite() || dt_minutes <= 0.0 || !since.is_finite() || since > window {
            return out;
        }
        if self.recovery_minutes >= max_minutes
            || kind == ContextKind::Sleep
            || indices.temperature.heat_likely
            || clamp01(indices.activity.movement_intensity)
                > params.post_activity_recovery_max_movement_intensity01
            || self.last_active_intensity01 <= 0.0
        {
            return out;
        }

        let (qp, qc) = (&prev.quality, &curr.quality);

        let hr_drop = match (prev.hr, curr.hr) {
            (Some(a), Some(b)) => {
                let per_min = (a - b) / dt_minutes;
                let denom = params.post_activity_recovery_hr_drop_bpm_per_min_for_max.max(0.5);
                Some(clamp01(per_min / denom) * q_min(qp.hr, qc.hr))
            }
            _ => None,
        };

        let hrv_rise = match (prev.z_hrv, curr.z_hrv) {
            (Some(a), Some(b)) => {
                let denom = params.post_activity_recovery_hrv_rise_z_for_max.max(0.2);
                Some(clamp01((b - a) / denom) * q_min(qp.hrv, qc.hrv))
            }
            _ => None,
        };

        // Energy or steps, whichever has quality
        let mut metabolic: Option<f64> = None;
        let q_energy = q_min(qp.energy, qc.energy);
        if q_energy > 0.0 {
            let denom = params
                .post_activity_recovery_energy_drop_kcal_per_min_for_max
                .max(0.5);
            let v = clamp01((prev.energy_per_min - curr.energy_per_min) / denom) * q_energy;
            metabolic = Some(metabolic.unwrap_or(0.0).max(v));
        }
        let q_steps = q_min(qp.steps, qc.steps);
        if q_steps > 0.0 {
            let denom = params.post_activity_recovery_steps_drop_per_min_for_max.max(5.0);
            let v = clamp01((prev.steps_per_min - curr.steps_per_min) / denom) * q_steps;
            metabolic = Some(metabolic.unwrap_or(0.0).max(v));
        }

        let mut sum_w = 0.0;
        let mut sum = 0.0;
        for (value, weight) in [
            (hr_drop, HR_DROP_WEIGHT),
            (hrv_rise, HRV_RISE_WEIGHT),
            (metabolic, METABOLIC_DROP_WEIGHT),
        ] {
            if let Some(v) = value.map(clamp01).filter(|v| *v > 0.0) {
                sum_w += weight;
                sum += weight * v;
            }
        }
        if sum_w <= 0.0 {
            return out;
        }

        out.signal01 = clamp01(sum / sum_w);
        out.window_factor = clamp01(1.0 - since / window);
        out.duration_factor = clamp01(1.0 - self.recovery_minutes / max_minutes);
        out.intensity_factor = clamp01(self.last_active_intensity01 / FULL_INTENSITY01);
        let index = out.signal01 * out.window_factor * out.duration_factor * out.intensity_factor;

        if index < params.post_activity_recovery_min_index {
            return out;
        }
        out.index = clamp01(index);
        out.charge_per_hour = params.post_activity_recovery_charge_max_per_hour.max(0.0) * out.index;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::features::{compute_indices, IndexMeta};
    use crate::quality::assess;
    use crate::types::{Baselines, Epoch, ImputedChannels};

    fn step(tracker: &mut CalmTracker, epoch: &Epoch, context: &Context) -> CalmRecovery {
        let b = Baselines::default();
        let params = Params::default();
        let q = assess(epoch, &ImputedChannels::default(), &b);
        let idx = compute_indices(epoch, &q, context, &b, &params, 5.0, &IndexMeta::default());
        tracker.advance(context.kind(), &idx, &q, 5.0, &params)
    }

    fn workout() -> Epoch {
        Epoch {
            workout: true,
            hr_bpm: Some(150.0),
            steps: Some(150.0),
            active_energy_kcal: Some(45.0),
            power_w: Some(210.0),
            ..Default::default()
        }
    }

    fn calm(hr: f64) -> Epoch {
        Epoch {
            hr_bpm: Some(hr),
            steps: Some(0.0),
            active_energy_kcal: Some(0.0),
            ..Default::default()
        }
    }

    fn rest() -> Context {
        Context::AwakeRest(Default::default())
    }

    #[test]
    fn test_no_bonus_without_preceding_activity() {
        let mut tracker = CalmTracker::new();
        assert!(!step(&mut tracker, &calm(70.0), &rest()).is_active());
        assert!(!step(&mut tracker, &calm(65.0), &rest()).is_active());
    }

    #[test]
    fn test_bonus_after_workout_ends() {
        let mut tracker = CalmTracker::new();
        let w = step(&mut tracker, &workout(), &Context::Workout { workout_type: None });
        assert!(!w.is_active());

        let first = step(&mut tracker, &calm(100.0), &rest());
        assert!(first.is_active());
        assert_eq!(first.minutes_since_active_end, Some(0.0));
        assert!((first.signal01 - 1.0).abs() < 1e-12);
        assert!((first.charge_per_hour - 4.0).abs() < 1e-9);
        assert_eq!(
            first.stress_suppression_factor,
            Params::default().post_activity_recovery_stress_suppression_min_factor
        );
    }

    #[test]
    fn test_bonus_decays_and_stops_when_settled() {
        let mut tracker = CalmTracker::new();
        step(&mut tracker, &workout(), &Context::Workout { workout_type: None });
        let first = step(&mut tracker, &calm(110.0), &rest());
        let second = step(&mut tracker, &calm(95.0), &rest());
        assert!(second.is_active());
        assert!(second.index < first.index);
        assert!(second.recovery_minutes > 0.0);

        // No further drop: no signal
        let flat = step(&mut tracker, &calm(95.0), &rest());
        assert!(!flat.is_active());
    }

    #[test]
    fn test_sleep_blocks_bonus() {
        let mut tracker = CalmTracker::new();
        step(&mut tracker, &workout(), &Context::Workout { workout_type: None });
        let sleep = Context::Sleep {
            sleep_stage: "core".to_string(),
        };
        assert!(!step(&mut tracker, &calm(90.0), &sleep).is_active());
    }
}
