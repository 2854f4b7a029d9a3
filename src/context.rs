//! Epoch context classification
//!
//! Every epoch is assigned exactly one [`Context`]. The classifier is a pure
//! function with a fixed priority order: caller override, sleep-stage label,
//! mindfulness flag, workout flag, then an activity sub-classifier.
//!
//! Two further states are never produced here: `POST_ACTIVITY_RECOVERY` is
//! assigned during integration by the calm-recovery model, and `FORECAST` only
//! labels synthetic rows appended by the three-kernel extension.

use serde::{Deserialize, Serialize};

use crate::config::Params;
use crate::features::ActivityIndices;
use crate::math::{clamp, clamp01, z_score};
use crate::types::{Baselines, Epoch};

/// Context discriminant without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextKind {
    Sleep,
    Workout,
    Meditation,
    HighActivity,
    Active,
    LightActivity,
    AwakeRest,
    Awake,
    PostActivityRecovery,
    Forecast,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Sleep => "SLEEP",
            ContextKind::Workout => "WORKOUT",
            ContextKind::Meditation => "MEDITATION",
            ContextKind::HighActivity => "HIGH_ACTIVITY",
            ContextKind::Active => "ACTIVE",
            ContextKind::LightActivity => "LIGHT_ACTIVITY",
            ContextKind::AwakeRest => "AWAKE_REST",
            ContextKind::Awake => "AWAKE",
            ContextKind::PostActivityRecovery => "POST_ACTIVITY_RECOVERY",
            ContextKind::Forecast => "FORECAST",
        }
    }

    /// Awake states without meaningful movement
    pub fn is_resting_awake(&self) -> bool {
        matches!(
            self,
            ContextKind::AwakeRest | ContextKind::Awake | ContextKind::PostActivityRecovery
        )
    }
}

/// Features the activity sub-classifier based its decision on
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityFeatures {
    pub movement_intensity01: f64,
    pub effort01: f64,
    pub has_activity_signal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relaxation_score01: Option<f64>,
}

/// Classified state of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Context {
    Sleep {
        #[serde(rename = "sleepStage", default)]
        sleep_stage: String,
    },
    Workout {
        #[serde(rename = "workoutType", default, skip_serializing_if = "Option::is_none")]
        workout_type: Option<String>,
    },
    Meditation,
    HighActivity(ActivityFeatures),
    Active(ActivityFeatures),
    LightActivity(ActivityFeatures),
    AwakeRest(ActivityFeatures),
    Awake(ActivityFeatures),
    PostActivityRecovery {
        #[serde(rename = "sourceKind")]
        source_kind: ContextKind,
    },
    Forecast,
}

impl Context {
    pub fn kind(&self) -> ContextKind {
        match self {
            Context::Sleep { .. } => ContextKind::Sleep,
            Context::Workout { .. } => ContextKind::Workout,
            Context::Meditation => ContextKind::Meditation,
            Context::HighActivity(_) => ContextKind::HighActivity,
            Context::Active(_) => ContextKind::Active,
            Context::LightActivity(_) => ContextKind::LightActivity,
            Context::AwakeRest(_) => ContextKind::AwakeRest,
            Context::Awake(_) => ContextKind::Awake,
            Context::PostActivityRecovery { .. } => ContextKind::PostActivityRecovery,
            Context::Forecast => ContextKind::Forecast,
        }
    }

    pub fn is_sleep(&self) -> bool {
        matches!(self, Context::Sleep { .. })
    }

    /// Sleep stage label when this is a SLEEP context
    pub fn sleep_stage(&self) -> Option<&str> {
        match self {
            Context::Sleep { sleep_stage } => Some(sleep_stage.as_str()),
            _ => None,
        }
    }
}

/// Stage labels that do not count as sleep
const NON_SLEEP_STAGE: &str = "awake";

/// Classify one epoch.
///
/// Any non-empty stage label yields SLEEP except exactly `"awake"`
/// (case-insensitive), which falls through to the activity sub-classifier.
pub fn classify(epoch: &Epoch, baselines: &Baselines, epoch_minutes: f64, params: &Params) -> Context {
    if let Some(context) = &epoch.context {
        return context.clone();
    }

    if let Some(stage) = epoch.stage_label() {
        if !stage.eq_ignore_ascii_case(NON_SLEEP_STAGE) {
            return Context::Sleep {
                sleep_stage: stage.to_string(),
            };
        }
    }

    if epoch.mindful {
        return Context::Meditation;
    }

    if epoch.workout {
        return Context::Workout {
            workout_type: epoch.workout_type.clone(),
        };
    }

    classify_activity(epoch, baselines, epoch_minutes, params)
}

/// Activity-state sub-classifier for epochs without an explicit label.
///
/// Heart-rate elevation only contributes to effort when movement, energy or
/// power corroborate it, so pure stress is never read as exercise.
fn classify_activity(epoch: &Epoch, baselines: &Baselines, epoch_minutes: f64, params: &Params) -> Context {
    let activity = ActivityIndices::compute(epoch, baselines, epoch_minutes);

    let effort = if activity.has_activity_signal {
        clamp01(
            activity
                .movement_intensity
                .max(params.activity_hr_effort_weight * activity.hr_idx),
        )
    } else {
        activity.movement_intensity
    };

    let mut features = ActivityFeatures {
        movement_intensity01: activity.movement_intensity,
        effort01: effort,
        has_activity_signal: activity.has_activity_signal,
        relaxation_score01: None,
    };

    if activity.has_activity_signal {
        if effort >= params.activity_high_effort01 {
            return Context::HighActivity(features);
        }
        if effort >= params.activity_active_effort01 {
            return Context::Active(features);
        }
        if effort >= params.activity_light_effort01 {
            return Context::LightActivity(features);
        }
    }

    let score = relaxation_score(epoch, baselines, activity.steps_per_min);
    features.relaxation_score01 = Some(score);
    if score >= params.awake_rest_min_score01 {
        Context::AwakeRest(features)
    } else {
        Context::Awake(features)
    }
}

/// HR relaxation, stillness and an HRV bonus, in 0..1.
fn relaxation_score(epoch: &Epoch, baselines: &Baselines, steps_per_min: f64) -> f64 {
    let hr_relax = match epoch.hr_bpm {
        Some(hr) => clamp01((baselines.rhr_bpm + 20.0 - hr) / 20.0),
        None => 0.0,
    };
    let stillness = clamp01(1.0 - steps_per_min / 8.0);
    let hrv_bonus = epoch
        .hrv_sdnn_ms
        .and_then(|hrv| z_score(hrv, baselines.hrv_sdnn_ms, baselines.hrv_scale_ms))
        .map(|z| clamp(z / 2.0, 0.0, 0.4))
        .unwrap_or(0.0);
    clamp01(0.6 * hr_relax + 0.3 * stillness + 0.5 * hrv_bonus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_epoch() -> Epoch {
        Epoch {
            timestamp_ms: Some(0),
            ..Default::default()
        }
    }

    fn run(epoch: &Epoch) -> Context {
        classify(epoch, &Baselines::default(), 5.0, &Params::default())
    }

    #[test]
    fn test_stage_label_wins() {
        let epoch = Epoch {
            sleep_stage: Some("inBed".to_string()),
            workout: true,
            ..make_epoch()
        };
        assert_eq!(
            run(&epoch),
            Context::Sleep {
                sleep_stage: "inBed".to_string()
            }
        );
    }

    #[test]
    fn test_awake_stage_falls_through() {
        let epoch = Epoch {
            sleep_stage: Some("Awake".to_string()),
            hr_bpm: Some(58.0),
            steps: Some(0.0),
            ..make_epoch()
        };
        assert_eq!(run(&epoch).kind(), ContextKind::AwakeRest);
    }

    #[test]
    fn test_flags_in_priority_order() {
        let both = Epoch {
            mindful: true,
            workout: true,
            ..make_epoch()
        };
        assert_eq!(run(&both), Context::Meditation);

        let workout = Epoch {
            workout: true,
            workout_type: Some("run".to_string()),
            ..make_epoch()
        };
        assert_eq!(
            run(&workout),
            Context::Workout {
                workout_type: Some("run".to_string())
            }
        );
    }

    #[test]
    fn test_override_beats_everything() {
        let epoch = Epoch {
            sleep_stage: Some("deep".to_string()),
            context: Some(Context::Meditation),
            ..make_epoch()
        };
        assert_eq!(run(&epoch), Context::Meditation);
    }

    #[test]
    fn test_activity_levels() {
        // 150 steps/min saturates movement
        let high = Epoch {
            steps: Some(750.0),
            hr_bpm: Some(150.0),
            ..make_epoch()
        };
        assert_eq!(run(&high).kind(), ContextKind::HighActivity);

        // 40 steps/min with moderate HR
        let active = Epoch {
            steps: Some(200.0),
            hr_bpm: Some(110.0),
            ..make_epoch()
        };
        assert_eq!(run(&active).kind(), ContextKind::Active);

        let light = Epoch {
            steps: Some(50.0),
            hr_bpm: Some(75.0),
            ..make_epoch()
        };
        assert_eq!(run(&light).kind(), ContextKind::LightActivity);
    }

    #[test]
    fn test_elevated_hr_without_movement_is_not_activity() {
        let stressed = Epoch {
            hr_bpm: Some(120.0),
            steps: Some(0.0),
            ..make_epoch()
        };
        let ctx = run(&stressed);
        assert_eq!(ctx.kind(), ContextKind::Awake);
        if let Context::Awake(features) = ctx {
            assert!(!features.has_activity_signal);
            assert_eq!(features.effort01, 0.0);
        }
    }

    #[test]
    fn test_context_serializes_with_kind_tag() {
        let ctx = Context::PostActivityRecovery {
            source_kind: ContextKind::AwakeRest,
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["kind"], "POST_ACTIVITY_RECOVERY");
        assert_eq!(json["sourceKind"], "AWAKE_REST");

        let parsed: Context = serde_json::from_str(r#"{"kind":"ACTIVE"}"#).unwrap();
        assert_eq!(parsed.kind(), ContextKind::Active);
    }
}
