//! Physiological baseline inference
//!
//! When the caller supplies no baselines, a robust centre and dispersion per
//! channel are derived once from the whole epoch set and held constant for the
//! run. Resting heart rate prefers rest-like epochs (awake, still, not in a
//! workout or mindfulness session).

use std::collections::BTreeSet;

use tracing::debug;

use crate::math::{clamp, mad, median, MAD_TO_SIGMA};
use crate::types::{Baselines, Epoch};

const MS_PER_DAY: i64 = 86_400_000;

/// Steps per minute at or below which an awake epoch counts as resting
const REST_MAX_STEPS_PER_MIN: f64 = 2.0;

/// Generic population baselines
pub fn default_baselines() -> Baselines {
    Baselines::default()
}

fn robust_scale(values: &[f64], center: f64, fallback: f64, min: f64, max: f64) -> f64 {
    let scale = mad(values, center)
        .map(|m| m * MAD_TO_SIGMA)
        .unwrap_or(fallback);
    clamp(scale, min, max)
}

fn is_asleep_label(epoch: &Epoch) -> bool {
    match epoch.stage_label() {
        Some(stage) => !stage.eq_ignore_ascii_case("awake") && !stage.eq_ignore_ascii_case("inbed"),
        None => false,
    }
}

/// Infer baselines from a run's epochs.
pub fn infer_baselines(epochs: &[Epoch], epoch_minutes: f64) -> Baselines {
    let defaults = default_baselines();
    let dt_min = if epoch_minutes.is_finite() && epoch_minutes > 0.0 {
        epoch_minutes
    } else {
        5.0
    };

    let mut hr_all = Vec::new();
    let mut hr_rest = Vec::new();
    let mut hrv_all = Vec::new();
    let mut spo2_all = Vec::new();
    let mut rr_all = Vec::new();
    let mut temp_all = Vec::new();
    let mut temp_days = BTreeSet::new();

    for e in epochs {
        let steps_per_min = e.steps.unwrap_or(0.0) / dt_min;
        if let Some(hr) = e.hr_bpm {
            hr_all.push(hr);
            let rest_like = !e.workout
                && !e.mindful
                && !is_asleep_label(e)
                && steps_per_min <= REST_MAX_STEPS_PER_MIN;
            if rest_like {
                hr_rest.push(hr);
            }
        }
        if let Some(v) = e.hrv_sdnn_ms {
            hrv_all.push(v);
        }
        if let Some(v) = e.spo2_pct {
            spo2_all.push(v);
        }
        if let Some(v) = e.resp_rate_brpm {
            rr_all.push(v);
        }
        if let Some(v) = e.wrist_temp_c {
            temp_all.push(v);
            if let Some(ts) = e.timestamp_ms {
                temp_days.insert(ts.div_euclid(MS_PER_DAY));
            }
        }
    }

    let rhr_source = if hr_rest.is_empty() { &hr_all } else { &hr_rest };
    let rhr = median(rhr_source).unwrap_or(defaults.rhr_bpm);
    let hrv = median(&hrv_all).unwrap_or(defaults.hrv_sdnn_ms);
    let spo2 = median(&spo2_all).unwrap_or(defaults.spo2_pct);
    let rr = median(&rr_all).unwrap_or(defaults.resp_rate_brpm);
    let temp = median(&temp_all).unwrap_or(defaults.wrist_temp_c);

    let baselines = Baselines {
        rhr_bpm: rhr,
        rhr_scale_bpm: robust_scale(rhr_source, rhr, defaults.rhr_scale_bpm, 2.0, 15.0),
        hrv_sdnn_ms: hrv,
        hrv_scale_ms: robust_scale(&hrv_all, hrv, defaults.hrv_scale_ms, 8.0, 60.0),
        spo2_pct: spo2,
        spo2_scale_pct: robust_scale(&spo2_all, spo2, defaults.spo2_scale_pct, 0.8, 4.0),
        resp_rate_brpm: rr,
        resp_rate_scale_brpm: robust_scale(&rr_all, rr, defaults.resp_rate_scale_brpm, 1.0, 6.0),
        wrist_temp_c: temp,
        wrist_temp_scale_c: robust_scale(&temp_all, temp, defaults.wrist_temp_scale_c, 0.15, 1.0),
        wrist_temp_baseline_days: if temp_days.is_empty() {
            None
        } else {
            Some(temp_days.len() as f64)
        },
        ..defaults
    };

    debug!(
        rhr = baselines.rhr_bpm,
        hrv = baselines.hrv_sdnn_ms,
        rest_samples = hr_rest.len(),
        "Inferred baselines"
    );

    baselines
}
