//! Input adapter
//!
//! The only place that knows about input aliases. Raw JSON records are
//! resolved into canonical [`Epoch`] values (first non-null alias wins) and
//! the top-level document into a [`RunInput`]. Nothing downstream ever looks
//! at raw keys again.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::{BehaviorBaselineConfig, RunConfig, ThreeKernelConfig};
use crate::context::Context;
use crate::error::ComputeError;
use crate::math::{clamp01, normalize_score01};
use crate::pipeline::RunInput;
use crate::types::{Baselines, Epoch, QualityOverride, StateOfMind, Vital};

const TIMESTAMP_KEYS: &[&str] = &["timestampMs", "tsMs", "tMs", "t", "timestamp", "ts"];
const HR_KEYS: &[&str] = &["hrBpm", "hr"];
const HRV_KEYS: &[&str] = &["hrvSdnnMs", "hrvMs", "hrv"];
const SPO2_KEYS: &[&str] = &["spo2Pct", "spo2"];
const RR_KEYS: &[&str] = &["respRateBrpm", "respiratoryRate", "rr"];
const TEMP_KEYS: &[&str] = &["wristTempC", "tempC", "temp"];
const ENERGY_KEYS: &[&str] = &["activeEnergyKcal", "activeEnergy", "energyKcal"];
const POWER_KEYS: &[&str] = &["powerW", "power"];
const SLEEP_KEYS: &[&str] = &["sleepStage", "sleep"];
const WORKOUT_KEYS: &[&str] = &["workout", "isWorkout"];
const MINDFUL_KEYS: &[&str] = &["mindful", "mindfulness", "isMindful"];
const SOM_KEYS: &[&str] = &["stateOfMind", "som"];

const VALENCE_KEYS: &[&str] = &["valence", "pleasantness", "mood", "score", "value", "valence01"];
const STRESS_KEYS: &[&str] = &["stress", "pressure", "anxiety", "arousal", "stress01"];

/// What the adapter saw while resolving a document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterReport {
    /// Raw records in the `epochs` array
    pub records: usize,
    /// Records that were not JSON objects
    pub skipped_records: usize,
    pub missing_timestamps: usize,
    /// Context overrides that could not be interpreted
    pub ignored_contexts: usize,
    /// Epochs carrying each channel
    pub channel_counts: BTreeMap<String, usize>,
}

/// Alias-resolving input adapter
pub struct EpochAdapter;

impl EpochAdapter {
    /// Parse a run document from a JSON string.
    pub fn parse_run(json: &str) -> Result<RunInput, ComputeError> {
        let value: Value = serde_json::from_str(json)?;
        Self::run_from_value(&value).map(|(input, _)| input)
    }

    /// Resolve a run document. A bare array is taken as the epoch list.
    pub fn run_from_value(value: &Value) -> Result<(RunInput, AdapterReport), ComputeError> {
        Self::run_from_value_with(value, &RunConfig::default())
    }

    /// Resolve a run document on top of `base`: sections the document leaves
    /// out keep the base settings, and `params` patch the base params.
    pub fn run_from_value_with(
        value: &Value,
        base: &RunConfig,
    ) -> Result<(RunInput, AdapterReport), ComputeError> {
        let (records, root) = match value {
            Value::Array(items) => (items.as_slice(), None),
            Value::Object(root) => match root.get("epochs") {
                None | Some(Value::Null) => (&[][..], Some(root)),
                Some(Value::Array(items)) => (items.as_slice(), Some(root)),
                Some(_) => {
                    return Err(ComputeError::InvalidInput("'epochs' must be an array".to_string()));
                }
            },
            _ => {
                return Err(ComputeError::InvalidInput(
                    "expected an object with an 'epochs' array".to_string(),
                ));
            }
        };

        let mut report = AdapterReport {
            records: records.len(),
            ..Default::default()
        };
        let mut epochs = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let Value::Object(obj) = record else {
                warn!(index, "Skipping epoch record that is not an object");
                report.skipped_records += 1;
                continue;
            };
            let (epoch, context_ignored) = resolve_epoch(obj, index);
            if context_ignored {
                report.ignored_contexts += 1;
            }
            if epoch.timestamp_ms.is_none() {
                report.missing_timestamps += 1;
            }
            count_channels(&epoch, &mut report.channel_counts);
            epochs.push(epoch);
        }

        let config = match root {
            Some(root) => resolve_config(root, base)?,
            None => base.clone(),
        };

        Ok((RunInput { epochs, config }, report))
    }

    /// Resolve one raw epoch record.
    pub fn epoch_from_value(value: &Value) -> Option<Epoch> {
        match value {
            Value::Object(obj) => Some(resolve_epoch(obj, 0).0),
            _ => None,
        }
    }
}

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| obj.get(*k)).find(|v| !v.is_null())
}

/// Finite number from a JSON number or numeric string
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn number_at(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    first(obj, keys).and_then(number)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0 && !x.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn flag_at(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    first(obj, keys).is_some_and(truthy)
}

fn text(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Milliseconds from a number or an ISO-8601 / numeric string.
///
/// Timestamps without a zone offset (`2025-01-01T06:30:00`) are read as UTC,
/// never as device-local time.
pub fn parse_timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|x| x.is_finite()).map(|x| x.round() as i64),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(naive.and_utc().timestamp_millis());
            }
            s.parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .map(|x| x.round() as i64)
        }
        _ => None,
    }
}

/// SpO2 given as a fraction is rescaled to percent.
fn percent_maybe(value: f64) -> f64 {
    if value <= 1.5 {
        value * 100.0
    } else {
        value
    }
}

fn state_of_mind(value: &Value) -> Option<StateOfMind> {
    let som = match value {
        Value::Object(obj) => StateOfMind {
            valence01: first(obj, VALENCE_KEYS).and_then(number).and_then(normalize_score01),
            stress01: first(obj, STRESS_KEYS).and_then(number).and_then(normalize_score01),
        },
        other => StateOfMind {
            valence01: number(other).and_then(normalize_score01),
            stress01: None,
        },
    };
    (som.valence01.is_some() || som.stress01.is_some()).then_some(som)
}

fn quality_map(value: &Value) -> Option<QualityOverride> {
    let Value::Object(obj) = value else {
        return None;
    };
    Some(
        obj.iter()
            .map(|(k, v)| (k.clone(), number(v).map(clamp01).unwrap_or(0.0)))
            .collect(),
    )
}

/// Caller context override; the kind is matched case-insensitively.
fn context_override(value: &Value) -> Option<Context> {
    let normalize = |kind: &str| kind.trim().to_ascii_uppercase().replace(['-', ' '], "_");
    let patched = match value {
        Value::String(kind) => {
            let mut obj = Map::new();
            obj.insert("kind".to_string(), Value::String(normalize(kind.as_str())));
            Value::Object(obj)
        }
        Value::Object(obj) => {
            let mut obj = obj.clone();
            let kind = obj.get("kind").and_then(Value::as_str).map(normalize)?;
            obj.insert("kind".to_string(), Value::String(kind));
            Value::Object(obj)
        }
        _ => return None,
    };
    serde_json::from_value(patched).ok()
}

/// Returns the epoch and whether a context override was present but ignored.
fn resolve_epoch(obj: &Map<String, Value>, index: usize) -> (Epoch, bool) {
    let context_raw = obj.get("context").filter(|v| !v.is_null());
    let context = context_raw.and_then(context_override);
    let context_ignored = context_raw.is_some() && context.is_none();
    if context_ignored {
        warn!(index, "Ignoring unrecognized context override");
    }

    let epoch = Epoch {
        timestamp_ms: first(obj, TIMESTAMP_KEYS).and_then(parse_timestamp_ms),
        hr_bpm: number_at(obj, HR_KEYS),
        hrv_sdnn_ms: number_at(obj, HRV_KEYS),
        spo2_pct: number_at(obj, SPO2_KEYS).map(percent_maybe),
        resp_rate_brpm: number_at(obj, RR_KEYS),
        wrist_temp_c: number_at(obj, TEMP_KEYS),
        steps: number_at(obj, &["steps"]),
        active_energy_kcal: number_at(obj, ENERGY_KEYS),
        power_w: number_at(obj, POWER_KEYS),
        sleep_stage: first(obj, SLEEP_KEYS).and_then(text),
        workout: flag_at(obj, WORKOUT_KEYS),
        workout_type: obj.get("workoutType").and_then(text),
        mindful: flag_at(obj, MINDFUL_KEYS),
        state_of_mind: first(obj, SOM_KEYS).and_then(state_of_mind),
        quality: obj.get("quality").and_then(quality_map),
        context,
    };
    (epoch, context_ignored)
}

fn count_channels(epoch: &Epoch, counts: &mut BTreeMap<String, usize>) {
    let mut bump = |name: &str, present: bool| {
        if present {
            *counts.entry(name.to_string()).or_default() += 1;
        }
    };
    for vital in Vital::ALL {
        bump(vital.as_str(), epoch.vital(vital).is_some());
    }
    bump("steps", epoch.steps.is_some());
    bump("energy", epoch.active_energy_kcal.is_some());
    bump("power", epoch.power_w.is_some());
    bump("sleepStage", epoch.sleep_stage.is_some());
    bump("som", epoch.state_of_mind.is_some());
}

/// Optional section that may be given as a bool switch or a settings object.
fn section<T>(root: &Map<String, Value>, key: &str, base: Option<&T>) -> Result<Option<T>, ComputeError>
where
    T: Clone + Default + serde::de::DeserializeOwned,
{
    match root.get(key) {
        None => Ok(base.cloned()),
        Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
        Some(Value::Bool(true)) => Ok(Some(T::default())),
        Some(v @ Value::Object(_)) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| ComputeError::config(key, e)),
        Some(_) => Err(ComputeError::config(key, "expected an object or a boolean")),
    }
}

fn resolve_config(root: &Map<String, Value>, base: &RunConfig) -> Result<RunConfig, ComputeError> {
    let mut params = match root.get("params") {
        None | Some(Value::Null) => base.params.clone(),
        Some(patch) => base.params.with_overrides(patch)?,
    };
    if let Some(minutes) = root.get("epochMinutes").and_then(number) {
        params.epoch_minutes = minutes;
    }
    if let Some(bb) = root.get("initialBB").and_then(number) {
        params.initial_bb = bb;
    }

    let baselines = match root.get("baselines") {
        None => base.baselines.clone(),
        Some(Value::Null) => None,
        Some(v @ Value::Object(_)) => Some(
            serde_json::from_value::<Baselines>(v.clone()).map_err(|e| ComputeError::config("baselines", e))?,
        ),
        Some(_) => return Err(ComputeError::config("baselines", "expected an object")),
    };

    Ok(RunConfig {
        params,
        baselines,
        behavior_baseline: section::<BehaviorBaselineConfig>(
            root,
            "behaviorBaseline",
            base.behavior_baseline.as_ref(),
        )?,
        three_kernel: section::<ThreeKernelConfig>(root, "threeKernel", base.three_kernel.as_ref())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn epoch(v: Value) -> Epoch {
        EpochAdapter::epoch_from_value(&v).unwrap()
    }

    #[test]
    fn test_first_non_null_alias_wins() {
        let e = epoch(json!({"hrBpm": null, "hr": 61, "hrv": "48.5", "respiratoryRate": 14}));
        assert_eq!(e.hr_bpm, Some(61.0));
        assert_eq!(e.hrv_sdnn_ms, Some(48.5));
        assert_eq!(e.resp_rate_brpm, Some(14.0));

        let e = epoch(json!({"hrBpm": 55, "hr": 61}));
        assert_eq!(e.hr_bpm, Some(55.0));
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(epoch(json!({"t": 1000})).timestamp_ms, Some(1000));
        assert_eq!(
            epoch(json!({"timestamp": "2025-01-01T00:05:00Z"})).timestamp_ms,
            Some(1_735_689_900_000)
        );
        assert_eq!(
            epoch(json!({"ts": "2025-01-01T00:05:00.250"})).timestamp_ms,
            Some(1_735_689_900_250)
        );
        assert_eq!(epoch(json!({"ts": "yesterday"})).timestamp_ms, None);
    }

    #[test]
    fn test_spo2_fraction_and_flags() {
        let e = epoch(json!({"spo2": 0.96, "isWorkout": 1, "mindfulness": "", "sleep": "  "}));
        assert!((e.spo2_pct.unwrap() - 96.0).abs() < 1e-9);
        assert!(e.workout);
        assert!(!e.mindful);
        assert_eq!(e.sleep_stage, None);
    }

    #[test]
    fn test_state_of_mind_scales() {
        let e = epoch(json!({"som": {"mood": 4, "anxiety": 80}}));
        assert_eq!(
            e.state_of_mind,
            Some(StateOfMind {
                valence01: Some(0.75),
                stress01: Some(0.8),
            })
        );
        assert_eq!(epoch(json!({"stateOfMind": -1})).state_of_mind.unwrap().valence01, Some(0.0));
        assert_eq!(epoch(json!({"som": {"note": "meh"}})).state_of_mind, None);
    }

    #[test]
    fn test_context_override_is_case_insensitive() {
        let e = epoch(json!({"context": {"kind": "awake-rest"}}));
        assert_eq!(e.context.map(|c| c.kind()), Some(ContextKind::AwakeRest));
        let e = epoch(json!({"context": "workout"}));
        assert_eq!(e.context.map(|c| c.kind()), Some(ContextKind::Workout));
        assert_eq!(epoch(json!({"context": {"kind": "NAPPING"}})).context, None);
    }

    #[test]
    fn test_run_document() {
        let doc = json!({
            "epochMinutes": "10",
            "initialBB": 55,
            "params": {"workoutHrWeight": 1.5},
            "baselines": {"rhrBpm": 50},
            "threeKernel": true,
            "epochs": [{"t": 0, "hr": 60}, 42, {"t": 600000, "context": {"kind": "nope"}}]
        });
        let (input, report) = EpochAdapter::run_from_value(&doc).unwrap();
        assert_eq!(input.epochs.len(), 2);
        assert_eq!(input.config.params.epoch_minutes, 10.0);
        assert_eq!(input.config.params.initial_bb, 55.0);
        assert_eq!(input.config.params.workout_hr_weight, 1.5);
        assert_eq!(input.config.baselines.map(|b| b.rhr_bpm), Some(50.0));
        assert_eq!(input.config.three_kernel, Some(ThreeKernelConfig::default()));
        assert_eq!(input.config.behavior_baseline, None);
        assert_eq!(report.records, 3);
        assert_eq!(report.skipped_records, 1);
        assert_eq!(report.ignored_contexts, 1);
        assert_eq!(report.channel_counts.get("hr"), Some(&1));
    }

    #[test]
    fn test_structural_errors() {
        let err = EpochAdapter::run_from_value(&json!({"epochs": {"a": 1}}));
        assert!(matches!(err, Err(ComputeError::InvalidInput(_))));
        assert!(matches!(EpochAdapter::run_from_value(&json!(7)), Err(ComputeError::InvalidInput(_))));
        let err = EpochAdapter::run_from_value(&json!({"epochs": [], "baselines": [1]}));
        assert!(matches!(err, Err(ComputeError::InvalidConfig { .. })));
        assert!(matches!(EpochAdapter::parse_run("{nope"), Err(ComputeError::JsonError(_))));
    }

    #[test]
    fn test_document_layers_over_base_config() {
        let base = RunConfig {
            three_kernel: Some(ThreeKernelConfig {
                forecast_hours: 2.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let doc = json!({"params": {"maxDeltaPerHour": 30}, "epochs": []});
        let (input, _) = EpochAdapter::run_from_value_with(&doc, &base).unwrap();
        assert_eq!(input.config.three_kernel.map(|c| c.forecast_hours), Some(2.0));
        assert_eq!(input.config.params.max_delta_per_hour, 30.0);

        let doc = json!({"threeKernel": false, "epochs": []});
        let (input, _) = EpochAdapter::run_from_value_with(&doc, &base).unwrap();
        assert_eq!(input.config.three_kernel, None);
    }

    #[test]
    fn test_bare_array_is_epoch_list() {
        let input = EpochAdapter::parse_run(r#"[{"tsMs": 1}, {"tsMs": 2}]"#).unwrap();
        assert_eq!(input.epochs.len(), 2);
        assert_eq!(input.config, RunConfig::default());
    }
}
