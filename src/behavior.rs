//! Behavioral baseline
//!
//! Learns personal sleep-duration and workout-intensity norms from an initial
//! observation window, then rescales later sleep recovery and workout load by
//! how healthy and how typical each session is.
//!
//! The baseline is a snapshot built once per run and never updated afterwards.
//! It applies to epochs at or after the window end, using the scale of the
//! enclosing sleep session or workout segment.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BehaviorBaselineConfig;
use crate::context::ContextKind;
use crate::math::{clamp, mad, median, quantile, MAD_TO_SIGMA};
use crate::segments::Segmentation;
use crate::types::WorkingEpoch;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Width of the p10..p90 band of a standard normal, in sigmas
const P10_P90_SIGMAS: f64 = 2.5631;

/// Robust distribution summary of one behavioral metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobustStats {
    pub n: usize,
    pub median: f64,
    pub sigma: f64,
    pub mad: f64,
    pub p10: f64,
    pub p90: f64,
}

impl RobustStats {
    /// Median and MAD-derived sigma clamped to `[floor, ceiling]`.
    ///
    /// When the MAD collapses to zero the p10..p90 spread stands in for it.
    pub fn compute(values: &[f64], floor: f64, ceiling: f64) -> Option<Self> {
        let median = median(values)?;
        let mad = mad(values, median)?;
        let p10 = quantile(values, 0.1)?;
        let p90 = quantile(values, 0.9)?;
        let raw = if mad > 1e-9 {
            mad * MAD_TO_SIGMA
        } else {
            (p90 - p10) / P10_P90_SIGMAS
        };
        Some(Self {
            n: values.len(),
            median,
            sigma: clamp(raw, floor, ceiling),
            mad,
            p10,
            p90,
        })
    }

    pub fn z(&self, value: f64) -> f64 {
        (value - self.median) / self.sigma
    }
}

/// Personal sleep/workout norms learned from the observation window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorBaseline {
    pub enabled: bool,
    pub ready: bool,
    pub workout_ready: bool,
    pub days: f64,
    pub start_ts_ms: Option<i64>,
    pub window_end_ts_ms: Option<i64>,
    pub last_ts_ms: Option<i64>,
    pub sleep_samples: usize,
    pub workout_samples: usize,
    pub sleep_duration_hours: Option<RobustStats>,
    pub workout_intensity: Option<RobustStats>,
    pub workout_duration_minutes: Option<RobustStats>,
    /// Why the baseline is not ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Sleep charge scale of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepScale {
    pub scale: f64,
    /// Generic duration-only scale, before personal typicality
    pub health_scale: f64,
    pub duration_hours: f64,
    pub z: Option<f64>,
    pub typicality: f64,
}

/// Workout load scale of one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutScale {
    pub scale: f64,
    pub intensity: f64,
    pub z: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorScales {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep: Option<SleepScale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workout: Option<WorkoutScale>,
}

/// Behavioral scaling applied to one epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorApplication {
    pub applied: bool,
    pub scales: BehaviorScales,
}

impl BehaviorApplication {
    pub fn sleep_scale(&self) -> f64 {
        self.scales.sleep.as_ref().map(|s| s.scale).unwrap_or(1.0)
    }

    pub fn workout_scale(&self) -> f64 {
        self.scales.workout.as_ref().map(|s| s.scale).unwrap_or(1.0)
    }
}

/// Generic scale for a night of `hours`.
///
/// Hard floor of 0.5 below the absolute minimum, a ramp to 0.9 at the healthy
/// minimum and a ramp to 1.0 at the target.
pub fn sleep_duration_health_scale(hours: f64, cfg: &BehaviorBaselineConfig) -> f64 {
    let abs_min = cfg.sleep_absolute_min_hours;
    let healthy = cfg.sleep_healthy_min_hours;
    let target = cfg.sleep_target_hours;
    if !hours.is_finite() || hours < abs_min {
        0.5
    } else if hours < healthy {
        0.5 + 0.4 * (hours - abs_min) / (healthy - abs_min).max(1e-9)
    } else if hours < target {
        0.9 + 0.1 * (hours - healthy) / (target - healthy).max(1e-9)
    } else {
        1.0
    }
}

/// Personal sleep scale: health scale lifted toward 1 by typicality, then
/// penalized for extreme outliers (short nights harder than long ones).
pub fn sleep_scale(hours: f64, stats: Option<&RobustStats>, cfg: &BehaviorBaselineConfig) -> SleepScale {
    let health = sleep_duration_health_scale(hours, cfg);
    let z = stats.map(|s| s.z(hours)).filter(|z| z.is_finite());
    let typicality = z.map(|z| 1.0 - z.abs().min(3.0) / 3.0).unwrap_or(0.0);

    let mut scale = health + (1.0 - health) * typicality * cfg.sleep_typicality_blend;
    if let Some(z) = z {
        if z < -2.0 {
            scale *= 1.0 - 0.1 * (z.abs() - 2.0);
        } else if z > 2.5 {
            scale *= 1.0 - 0.05 * (z - 2.5);
        }
    }

    SleepScale {
        scale: clamp(scale, cfg.sleep_scale_min, cfg.sleep_scale_max),
        health_scale: health,
        duration_hours: hours,
        z,
        typicality,
    }
}

/// Load scale for a workout of mean `intensity`; unchanged inside 1 sigma.
pub fn workout_scale(intensity: f64, stats: &RobustStats, cfg: &BehaviorBaselineConfig) -> WorkoutScale {
    let z = stats.z(intensity);
    let scale = if !z.is_finite() || z.abs() <= 1.0 {
        1.0
    } else {
        1.0 + cfg.workout_scale_per_sigma * (z - z.signum())
    };
    WorkoutScale {
        scale: clamp(scale, cfg.workout_scale_min, cfg.workout_scale_max),
        intensity,
        z: Some(z).filter(|z| z.is_finite()),
    }
}

/// Baseline plus precomputed per-session and per-segment scales
#[derive(Debug, Clone, Default)]
pub struct BehaviorPlan {
    pub baseline: BehaviorBaseline,
    session_scales: Vec<Option<SleepScale>>,
    segment_scales: Vec<Option<WorkoutScale>>,
}

impl BehaviorPlan {
    /// Build the baseline from the observation window and score every
    /// session and workout segment against it.
    pub fn build(working: &[WorkingEpoch], seg: &Segmentation, cfg: &BehaviorBaselineConfig) -> Self {
        let mut baseline = BehaviorBaseline {
            enabled: true,
            days: cfg.days,
            ..Default::default()
        };

        let start = working.iter().find_map(|w| w.ts_ms());
        let last = working.iter().rev().find_map(|w| w.ts_ms());
        let Some(start) = start else {
            baseline.reason = Some("no timestamps".to_string());
            return Self {
                baseline,
                ..Default::default()
            };
        };
        let window_end = start + (cfg.days * MS_PER_DAY).round() as i64;
        baseline.start_ts_ms = Some(start);
        baseline.window_end_ts_ms = Some(window_end);
        baseline.last_ts_ms = last;

        let sleep_hours: Vec<f64> = seg
            .sessions
            .iter()
            .filter(|s| s.start_ts_ms.is_some_and(|ts| ts < window_end))
            .filter(|s| s.sleep_minutes >= cfg.min_sleep_bout_minutes)
            .map(|s| s.sleep_hours())
            .collect();

        let workouts: Vec<(f64, f64)> = seg
            .segments
            .iter()
            .filter(|s| s.kind == ContextKind::Workout)
            .filter(|s| s.start_ts_ms.is_some_and(|ts| ts < window_end))
            .filter(|s| s.duration_minutes >= cfg.min_workout_bout_minutes)
            .map(|s| (s.mean_movement_intensity, s.duration_minutes))
            .collect();
        let intensities: Vec<f64> = workouts.iter().map(|w| w.0).collect();
        let durations: Vec<f64> = workouts.iter().map(|w| w.1).collect();

        baseline.sleep_samples = sleep_hours.len();
        baseline.workout_samples = workouts.len();
        baseline.sleep_duration_hours =
            RobustStats::compute(&sleep_hours, cfg.sleep_sigma_floor_hours, cfg.sleep_sigma_ceiling_hours);
        baseline.workout_intensity =
            RobustStats::compute(&intensities, cfg.workout_sigma_floor, cfg.workout_sigma_ceiling);
        baseline.workout_duration_minutes = RobustStats::compute(&durations, 0.0, f64::MAX);

        let covered = last.is_some_and(|ts| ts >= window_end);
        baseline.ready = covered && baseline.sleep_samples >= cfg.min_sleep_samples;
        baseline.workout_ready = baseline.ready && baseline.workout_samples >= cfg.min_workout_samples;
        if !covered {
            baseline.reason = Some("observation window not yet covered".to_string());
        } else if !baseline.ready {
            baseline.reason = Some(format!(
                "{} sleep sessions, {} required",
                baseline.sleep_samples, cfg.min_sleep_samples
            ));
        }

        debug!(
            ready = baseline.ready,
            sleep_samples = baseline.sleep_samples,
            workout_samples = baseline.workout_samples,
            "Behavior baseline built"
        );

        if !baseline.ready {
            return Self {
                baseline,
                ..Default::default()
            };
        }

        let after_window = |ts: Option<i64>| ts.is_some_and(|ts| ts >= window_end);

        let session_scales = seg
            .sessions
            .iter()
            .map(|s| {
                after_window(s.start_ts_ms)
                    .then(|| sleep_scale(s.sleep_hours(), baseline.sleep_duration_hours.as_ref(), cfg))
            })
            .collect();

        let segment_scales = seg
            .segments
            .iter()
            .map(|s| match (&baseline.workout_intensity, s.kind) {
                (Some(stats), ContextKind::Workout) if baseline.workout_ready && after_window(s.start_ts_ms) => {
                    Some(workout_scale(s.mean_movement_intensity, stats, cfg))
                }
                _ => None,
            })
            .collect();

        Self {
            baseline,
            session_scales,
            segment_scales,
        }
    }

    /// Scaling for one epoch, `None` when nothing applies. Only sessions and
    /// segments starting at or after the window end carry a scale.
    pub fn application(&self, w: &WorkingEpoch) -> Option<BehaviorApplication> {
        if !self.baseline.ready {
            return None;
        }

        let mut scales = BehaviorScales::default();
        match w.context.kind() {
            ContextKind::Sleep => {
                scales.sleep = w
                    .session
                    .and_then(|i| self.session_scales.get(i).cloned().flatten());
            }
            ContextKind::Workout => {
                scales.workout = self.segment_scales.get(w.segment).cloned().flatten();
            }
            _ => {}
        }

        if scales.sleep.is_none() && scales.workout.is_none() {
            return None;
        }
        Some(BehaviorApplication {
            applied: true,
            scales,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BehaviorBaselineConfig {
        BehaviorBaselineConfig::default()
    }

    #[test]
    fn test_health_scale_ramps() {
        let c = cfg();
        assert_eq!(sleep_duration_health_scale(3.0, &c), 0.5);
        assert!((sleep_duration_health_scale(5.5, &c) - 0.7).abs() < 1e-12);
        assert!((sleep_duration_health_scale(7.0, &c) - 0.9).abs() < 1e-12);
        assert!((sleep_duration_health_scale(7.5, &c) - 0.95).abs() < 1e-12);
        assert_eq!(sleep_duration_health_scale(9.0, &c), 1.0);
    }

    #[test]
    fn test_robust_stats_fallback_to_quantile_spread() {
        let stats = RobustStats::compute(&[7.0, 7.0, 7.0, 7.0, 7.0, 6.0], 0.5, 3.0);
        let stats = stats.expect("non-empty input");
        assert_eq!(stats.median, 7.0);
        assert_eq!(stats.mad, 0.0);
        // p10..p90 = 6.5..7 gives 0.195, below the floor
        assert_eq!(stats.sigma, 0.5);
        assert!(RobustStats::compute(&[], 0.5, 3.0).is_none());
    }

    #[test]
    fn test_typical_night_beats_health_scale() {
        let stats = RobustStats::compute(&[7.0; 10], 0.5, 3.0);
        let s = sleep_scale(7.0, stats.as_ref(), &cfg());
        assert!((s.health_scale - 0.9).abs() < 1e-12);
        assert!((s.scale - 0.95).abs() < 1e-12);
        assert_eq!(s.typicality, 1.0);
    }

    #[test]
    fn test_short_outlier_is_penalized() {
        let stats = RobustStats::compute(&[8.0; 10], 0.5, 3.0);
        let s = sleep_scale(6.0, stats.as_ref(), &cfg());
        // z = -4: typicality 0, then a 20% short-outlier penalty
        assert!((s.scale - s.health_scale * 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_workout_scale_band() {
        let stats = RobustStats {
            n: 10,
            median: 0.5,
            sigma: 0.1,
            mad: 0.0,
            p10: 0.5,
            p90: 0.5,
        };
        let c = cfg();
        assert_eq!(workout_scale(0.55, &stats, &c).scale, 1.0);
        let hard = workout_scale(0.8, &stats, &c);
        assert!((hard.scale - 1.3).abs() < 1e-9);
        assert_eq!(workout_scale(1.0, &stats, &c).scale, 1.4);
        assert_eq!(workout_scale(0.0, &stats, &c).scale, 0.7);
    }
}
