//! Core types for the Reserve Flux engine
//!
//! This module defines the data structures that flow through each stage of the
//! engine: canonical input epochs, per-channel quality, personal baselines, the
//! owned working record derived per epoch, and the output series and summary.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::behavior::{BehaviorApplication, BehaviorBaseline};
use crate::calm::CalmRecovery;
use crate::config::Params;
use crate::context::Context;
use crate::features::TemperatureState;
use crate::quality::{ChargeTriple, DrainTriple};
use crate::trend::ThreeKernelMeta;

/// Caller-supplied per-channel quality map, used verbatim (clamped to 0..1).
pub type QualityOverride = BTreeMap<String, f64>;

/// Self-reported state of mind, both axes normalized to 0..1
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateOfMind {
    /// Pleasantness; low values indicate low mood
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valence01: Option<f64>,
    /// Perceived stress; high values indicate strain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stress01: Option<f64>,
}

/// One canonical input sample.
///
/// Produced by the input adapter from whichever alias keys the caller used.
/// The engine never mutates an `Epoch`; it clones it into a [`WorkingEpoch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Epoch {
    /// Absolute timestamp (ms since the Unix epoch)
    pub timestamp_ms: Option<i64>,
    /// Heart rate (bpm)
    pub hr_bpm: Option<f64>,
    /// HRV SDNN (ms)
    pub hrv_sdnn_ms: Option<f64>,
    /// Blood oxygen saturation (%)
    pub spo2_pct: Option<f64>,
    /// Respiratory rate (breaths/min)
    pub resp_rate_brpm: Option<f64>,
    /// Wrist skin temperature (°C)
    pub wrist_temp_c: Option<f64>,
    /// Step count within the epoch
    pub steps: Option<f64>,
    /// Active energy within the epoch (kcal)
    pub active_energy_kcal: Option<f64>,
    /// Mechanical power (W)
    pub power_w: Option<f64>,
    /// Raw sleep stage label (deep, core, rem, awake, inBed, ...)
    pub sleep_stage: Option<String>,
    pub workout: bool,
    pub workout_type: Option<String>,
    pub mindful: bool,
    pub state_of_mind: Option<StateOfMind>,
    pub quality: Option<QualityOverride>,
    /// Caller-forced context; takes precedence over classification
    pub context: Option<Context>,
}

/// Vital-sign channels eligible for carry-forward imputation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vital {
    Hr,
    Hrv,
    Spo2,
    Rr,
    Temp,
}

impl Vital {
    pub const ALL: [Vital; 5] = [Vital::Hr, Vital::Hrv, Vital::Spo2, Vital::Rr, Vital::Temp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vital::Hr => "hr",
            Vital::Hrv => "hrv",
            Vital::Spo2 => "spo2",
            Vital::Rr => "rr",
            Vital::Temp => "temp",
        }
    }
}

impl Epoch {
    pub fn vital(&self, vital: Vital) -> Option<f64> {
        match vital {
            Vital::Hr => self.hr_bpm,
            Vital::Hrv => self.hrv_sdnn_ms,
            Vital::Spo2 => self.spo2_pct,
            Vital::Rr => self.resp_rate_brpm,
            Vital::Temp => self.wrist_temp_c,
        }
    }

    pub fn set_vital(&mut self, vital: Vital, value: Option<f64>) {
        match vital {
            Vital::Hr => self.hr_bpm = value,
            Vital::Hrv => self.hrv_sdnn_ms = value,
            Vital::Spo2 => self.spo2_pct = value,
            Vital::Rr => self.resp_rate_brpm = value,
            Vital::Temp => self.wrist_temp_c = value,
        }
    }

    /// Trimmed sleep stage label, `None` when absent or blank
    pub fn stage_label(&self) -> Option<&str> {
        self.sleep_stage
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Per-channel signal quality in 0..1
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelQuality {
    pub hr: f64,
    pub hrv: f64,
    pub spo2: f64,
    pub rr: f64,
    pub temp: f64,
    pub steps: f64,
    pub energy: f64,
    pub power: f64,
    pub som: f64,
}

impl ChannelQuality {
    pub fn vital(&self, vital: Vital) -> f64 {
        match vital {
            Vital::Hr => self.hr,
            Vital::Hrv => self.hrv,
            Vital::Spo2 => self.spo2,
            Vital::Rr => self.rr,
            Vital::Temp => self.temp,
        }
    }

    pub fn set_vital(&mut self, vital: Vital, q: f64) {
        match vital {
            Vital::Hr => self.hr = q,
            Vital::Hrv => self.hrv = q,
            Vital::Spo2 => self.spo2 = q,
            Vital::Rr => self.rr = q,
            Vital::Temp => self.temp = q,
        }
    }
}

/// Personal physiological reference points (value + dispersion scale)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Baselines {
    pub rhr_bpm: f64,
    pub rhr_scale_bpm: f64,
    pub hrv_sdnn_ms: f64,
    pub hrv_scale_ms: f64,
    pub spo2_pct: f64,
    pub spo2_scale_pct: f64,
    pub resp_rate_brpm: f64,
    pub resp_rate_scale_brpm: f64,
    pub wrist_temp_c: f64,
    pub wrist_temp_scale_c: f64,
    pub ftp_w: f64,
    pub hr_max_bpm: f64,
    /// Days of wrist-temperature history behind `wrist_temp_c`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrist_temp_baseline_days: Option<f64>,
}

impl Default for Baselines {
    fn default() -> Self {
        Self {
            rhr_bpm: 60.0,
            rhr_scale_bpm: 6.0,
            hrv_sdnn_ms: 50.0,
            hrv_scale_ms: 20.0,
            spo2_pct: 97.0,
            spo2_scale_pct: 1.5,
            resp_rate_brpm: 14.0,
            resp_rate_scale_brpm: 2.0,
            wrist_temp_c: 36.5,
            wrist_temp_scale_c: 0.3,
            ftp_w: 220.0,
            hr_max_bpm: 190.0,
            wrist_temp_baseline_days: None,
        }
    }
}

/// A value filled in by carry-forward imputation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImputedValue {
    pub value: f64,
    pub age_minutes: f64,
    pub quality: f64,
}

/// Imputed channels of one epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImputedChannels {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr: Option<ImputedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hrv: Option<ImputedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spo2: Option<ImputedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rr: Option<ImputedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<ImputedValue>,
}

impl ImputedChannels {
    pub fn get(&self, vital: Vital) -> Option<&ImputedValue> {
        match vital {
            Vital::Hr => self.hr.as_ref(),
            Vital::Hrv => self.hrv.as_ref(),
            Vital::Spo2 => self.spo2.as_ref(),
            Vital::Rr => self.rr.as_ref(),
            Vital::Temp => self.temp.as_ref(),
        }
    }

    pub fn set(&mut self, vital: Vital, value: ImputedValue) {
        let slot = match vital {
            Vital::Hr => &mut self.hr,
            Vital::Hrv => &mut self.hrv,
            Vital::Spo2 => &mut self.spo2,
            Vital::Rr => &mut self.rr,
            Vital::Temp => &mut self.temp,
        };
        *slot = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        Vital::ALL.iter().all(|v| self.get(*v).is_none())
    }
}

/// Fully owned per-epoch record the engine derives from a caller epoch.
///
/// Prepasses fill classification, imputation, quality and session data before
/// sequential integration starts.
#[derive(Debug, Clone)]
pub struct WorkingEpoch {
    /// Position in the timestamp-sorted run
    pub index: usize,
    pub epoch: Epoch,
    pub dt_minutes: f64,
    pub context: Context,
    pub imputed: ImputedChannels,
    pub quality: ChannelQuality,
    /// Movement intensity 0..1 (max of steps, energy and power indices)
    pub movement_intensity: f64,
    /// Sleep session this epoch belongs to, if any
    pub session: Option<usize>,
    /// Same-kind segment this epoch belongs to
    pub segment: usize,
}

impl WorkingEpoch {
    pub fn ts_ms(&self) -> Option<i64> {
        self.epoch.timestamp_ms
    }
}

/// Raw input echo on each output row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEcho {
    pub hr: Option<f64>,
    pub hrv: Option<f64>,
    pub spo2: Option<f64>,
    pub rr: Option<f64>,
    pub temp: Option<f64>,
    pub steps: Option<f64>,
    pub active_energy: Option<f64>,
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_of_mind: Option<StateOfMind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeComponents {
    pub sleep: f64,
    pub rest: f64,
    pub mind: f64,
    pub architecture_factor: f64,
    pub calm_recovery_index: f64,
    pub calm_recovery_charge_per_hour: f64,
    pub calm_recovery_points: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomBreakdown {
    pub spo2: f64,
    pub rr: f64,
    pub temp: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainComponents {
    pub load_per_hour: f64,
    pub stress_per_hour: f64,
    pub anom_per_hour: f64,
    pub anom_index: f64,
    pub anom_breakdown: AnomBreakdown,
}

/// Quality-gated weights applied to each sub-channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedWeights {
    pub charge: ChargeTriple,
    pub drain: DrainTriple,
}

/// One output row of the reserve series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesRow {
    pub i: usize,
    pub ts_ms: Option<i64>,
    pub iso: Option<String>,
    pub dt_minutes: f64,
    /// Reserve entering the epoch
    pub bb: f64,
    /// Reserve leaving the epoch
    pub bb_next: f64,
    pub reserve_score: f64,
    pub comfort_score: Option<f64>,
    pub fatigue_score: Option<f64>,
    pub confidence: f64,
    pub delta_core: f64,
    pub charge_points: f64,
    pub drain_points: f64,
    pub charge_per_hour: f64,
    pub drain_per_hour: f64,
    pub charge_components: ChargeComponents,
    pub drain_components: DrainComponents,
    pub temperature: TemperatureState,
    pub calm_recovery: CalmRecovery,
    pub weights: AppliedWeights,
    pub quality: ChannelQuality,
    pub context: Context,
    pub input: InputEcho,
    #[serde(skip_serializing_if = "ImputedChannels::is_empty", default)]
    pub imputed: ImputedChannels,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior: Option<BehaviorApplication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bb_core: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bb_core_next: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bb_trend: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bb_trend_next: Option<f64>,
}

impl SeriesRow {
    /// Row with zeroed components, to be filled by the caller.
    pub fn new(i: usize, ts_ms: Option<i64>, dt_minutes: f64, context: Context) -> Self {
        Self {
            i,
            ts_ms,
            iso: ts_ms.and_then(iso_timestamp),
            dt_minutes,
            bb: 0.0,
            bb_next: 0.0,
            reserve_score: 0.0,
            comfort_score: None,
            fatigue_score: None,
            confidence: 0.0,
            delta_core: 0.0,
            charge_points: 0.0,
            drain_points: 0.0,
            charge_per_hour: 0.0,
            drain_per_hour: 0.0,
            charge_components: ChargeComponents::default(),
            drain_components: DrainComponents::default(),
            temperature: TemperatureState::default(),
            calm_recovery: CalmRecovery::default(),
            weights: AppliedWeights::default(),
            quality: ChannelQuality::default(),
            context,
            input: InputEcho::default(),
            imputed: ImputedChannels::default(),
            behavior: None,
            bb_core: None,
            bb_core_next: None,
            bb_trend: None,
            bb_trend_next: None,
        }
    }

    pub fn is_forecast(&self) -> bool {
        matches!(self.context, Context::Forecast)
    }
}

/// RFC 3339 UTC rendering with millisecond precision, e.g. `2025-01-01T00:00:00.000Z`
pub fn iso_timestamp(ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Span of the session selected as main sleep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainSleep {
    pub start_index: usize,
    pub end_index: usize,
    pub start_ts_ms: Option<i64>,
    pub end_ts_ms: Option<i64>,
    pub sleep_epochs: usize,
    pub sleep_minutes: f64,
}

/// Run-level rollup computed once from the completed series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    #[serde(rename = "startBB")]
    pub start_bb: Option<f64>,
    #[serde(rename = "endBB")]
    pub end_bb: Option<f64>,
    #[serde(rename = "minBB")]
    pub min_bb: Option<f64>,
    #[serde(rename = "maxBB")]
    pub max_bb: Option<f64>,
    pub total_charge: f64,
    pub total_drain: f64,
    pub avg_confidence: f64,
    pub avg_comfort: Option<f64>,
    pub avg_fatigue: Option<f64>,
    pub sleep_charge: Option<f64>,
    #[serde(rename = "morningBB")]
    pub morning_bb: Option<f64>,
    pub sleep_avg_comfort: Option<f64>,
    pub morning_comfort: Option<f64>,
    pub morning_fatigue: Option<f64>,
    pub readiness: Option<f64>,
    pub main_sleep: Option<MainSleep>,
}

/// Complete output of one engine run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResult {
    pub version: String,
    pub params: Params,
    pub baselines: Baselines,
    pub behavior_baseline: Option<BehaviorBaseline>,
    pub series: Vec<SeriesRow>,
    pub summary: Summary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_core: Option<Summary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub three_kernel: Option<ThreeKernelMeta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_vital_accessors() {
        let mut epoch = Epoch::default();
        epoch.set_vital(Vital::Rr, Some(14.5));
        assert_eq!(epoch.resp_rate_brpm, Some(14.5));
        assert_eq!(epoch.vital(Vital::Rr), Some(14.5));
        assert_eq!(epoch.vital(Vital::Hr), None);
    }

    #[test]
    fn test_stage_label_trims_blank() {
        let epoch = Epoch {
            sleep_stage: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(epoch.stage_label(), None);
    }

    #[test]
    fn test_partial_baselines_merge_over_defaults() {
        let b: Baselines = serde_json::from_str(r#"{"rhrBpm": 52, "hrvSdnnMs": 70}"#).unwrap();
        assert_eq!(b.rhr_bpm, 52.0);
        assert_eq!(b.hrv_sdnn_ms, 70.0);
        assert_eq!(b.hrv_scale_ms, 20.0);
        assert_eq!(b.hr_max_bpm, 190.0);
    }

    #[test]
    fn test_summary_uses_bb_field_names() {
        let summary = Summary {
            morning_bb: Some(80.0),
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["morningBB"], 80.0);
        assert!(json.get("startBB").is_some());
    }

    #[test]
    fn test_iso_timestamp_matches_utc_millis() {
        assert_eq!(iso_timestamp(1_735_689_600_000).as_deref(), Some("2025-01-01T00:00:00.000Z"));
        let row = SeriesRow::new(0, Some(1_735_689_600_500), 5.0, Context::Forecast);
        assert_eq!(row.iso.as_deref(), Some("2025-01-01T00:00:00.500Z"));
        assert!(row.is_forecast());
    }

    #[test]
    fn test_imputed_channels_empty() {
        let mut imputed = ImputedChannels::default();
        assert!(imputed.is_empty());
        imputed.set(
            Vital::Hr,
            ImputedValue {
                value: 55.0,
                age_minutes: 5.0,
                quality: 0.5,
            },
        );
        assert!(!imputed.is_empty());
    }
}
