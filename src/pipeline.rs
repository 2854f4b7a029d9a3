//! Pipeline orchestration
//!
//! This module provides the public API for Reserve Flux. One call runs the
//! whole engine over a batch of epochs:
//!
//! 1. Sort by timestamp and resolve baselines
//! 2. Prepasses: classification, imputation, quality, segmentation, sleep
//!    architecture and the behavioral baseline
//! 3. Sequential charge/drain integration
//! 4. Summary, then the optional three-kernel hybrid pass

use std::time::Instant;

use tracing::{debug, info};

use crate::adapter::EpochAdapter;
use crate::baseline::infer_baselines;
use crate::behavior::BehaviorPlan;
use crate::calm::CalmTracker;
use crate::config::{BehaviorBaselineConfig, Params, RunConfig, ThreeKernelConfig};
use crate::context::{classify, Context, ContextKind};
use crate::encoder::ReportEncoder;
use crate::error::ComputeError;
use crate::features::{compute_indices, ActivityIndices, IndexMeta};
use crate::imputation::impute;
use crate::integrator::{fatigue_score, rule_weights, step};
use crate::math::clamp;
use crate::quality::assess;
use crate::segments::{self, Segmentation};
use crate::summary::summarize;
use crate::trend;
use crate::types::{
    AppliedWeights, Baselines, ChargeComponents, ChannelQuality, DrainComponents, Epoch, ImputedChannels,
    ReserveResult, SeriesRow, WorkingEpoch,
};
use crate::RESERVE_VERSION;

/// Epochs plus everything needed to process them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunInput {
    pub epochs: Vec<Epoch>,
    pub config: RunConfig,
}

/// Run the engine over one batch of epochs.
///
/// Never fails: malformed readings degrade to missing data.
pub fn compute_series(input: RunInput) -> ReserveResult {
    let started = Instant::now();
    let RunInput { mut epochs, config } = input;
    let config = config.validated();
    let params = &config.params;

    info!(
        epochs = epochs.len(),
        behavior = config.behavior_baseline.is_some(),
        three_kernel = config.three_kernel.is_some(),
        "Computing reserve series"
    );

    // Stable: equal timestamps keep caller order
    epochs.sort_by_key(|e| e.timestamp_ms.unwrap_or(0));

    let baselines = match &config.baselines {
        Some(b) => b.clone(),
        None => {
            let inferred = infer_baselines(&epochs, params.epoch_minutes);
            debug!(rhr = inferred.rhr_bpm, hrv = inferred.hrv_sdnn_ms, "Inferred baselines");
            inferred
        }
    };

    let mut working = prepare(epochs, &baselines, params);
    let imputed = impute(&mut working, params);
    for w in &mut working {
        w.quality = assess(&w.epoch, &w.imputed, &baselines);
    }
    let segmentation = segments::build(&mut working, params);
    let plan = config
        .behavior_baseline
        .as_ref()
        .map(|cfg| BehaviorPlan::build(&working, &segmentation, cfg));
    debug!(
        imputed,
        segments = segmentation.segments.len(),
        sleep_sessions = segmentation.sessions.len(),
        "Prepasses done"
    );

    let series = integrate(&working, &segmentation, plan.as_ref(), &baselines, params);
    let summary = summarize(&series, params);

    let mut result = ReserveResult {
        version: RESERVE_VERSION.to_string(),
        params: params.clone(),
        baselines,
        behavior_baseline: plan.map(|p| p.baseline),
        series,
        summary,
        summary_core: None,
        three_kernel: None,
    };

    if let Some(cfg) = &config.three_kernel {
        let meta = trend::apply(&mut result.series, params, cfg);
        let blended = summarize(&result.series, params);
        result.summary_core = Some(std::mem::replace(&mut result.summary, blended));
        result.three_kernel = Some(meta);
    }

    info!(
        rows = result.series.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Reserve series computed"
    );
    result
}

/// JSON in, JSON out.
///
/// # Example
/// ```ignore
/// let out = compute_series_json(r#"{"epochMinutes": 5, "epochs": []}"#.to_string())?;
/// ```
pub fn compute_series_json(input: String) -> Result<String, ComputeError> {
    let run = EpochAdapter::parse_run(&input)?;
    let result = compute_series(run);
    serde_json::to_string(&result).map_err(|e| ComputeError::EncodingError(e.to_string()))
}

/// Derive the owned working records: dt, classification and movement.
fn prepare(epochs: Vec<Epoch>, baselines: &Baselines, params: &Params) -> Vec<WorkingEpoch> {
    let nominal = params.epoch_minutes;
    let max_dt = params.max_dt_factor * nominal;
    let mut prev_ts: Option<i64> = None;

    epochs
        .into_iter()
        .enumerate()
        .map(|(index, epoch)| {
            let ts = epoch.timestamp_ms;
            let dt_minutes = match (prev_ts, ts) {
                (Some(prev), Some(now)) => {
                    let diff = (now - prev) as f64 / 60_000.0;
                    if diff > 0.1 && diff <= max_dt {
                        diff
                    } else {
                        nominal
                    }
                }
                _ => nominal,
            };
            prev_ts = ts.or(prev_ts);

            let context = classify(&epoch, baselines, nominal, params);
            let movement_intensity = ActivityIndices::compute(&epoch, baselines, dt_minutes).movement_intensity;
            WorkingEpoch {
                index,
                epoch,
                dt_minutes,
                context,
                imputed: ImputedChannels::default(),
                quality: ChannelQuality::default(),
                movement_intensity,
                session: None,
                segment: 0,
            }
        })
        .collect()
}

/// Sequential integration; row `i` depends only on row `i - 1`.
fn integrate(
    working: &[WorkingEpoch],
    seg: &Segmentation,
    plan: Option<&BehaviorPlan>,
    baselines: &Baselines,
    params: &Params,
) -> Vec<SeriesRow> {
    let mut reserve = clamp(params.initial_bb, 0.0, 100.0);
    let mut calm = CalmTracker::new();
    let mut prev_kind: Option<ContextKind> = None;
    let mut sleep_minutes_from_start: Option<f64> = None;
    let mut sleep_heat_streak = 0.0;
    let mut series = Vec::with_capacity(working.len());

    for w in working {
        let classified = w.context.kind();
        let dt = w.dt_minutes;

        if classified == ContextKind::Sleep {
            if prev_kind == Some(ContextKind::Sleep) {
                sleep_minutes_from_start = Some(sleep_minutes_from_start.unwrap_or(0.0) + dt);
            } else {
                sleep_minutes_from_start = Some(0.0);
                sleep_heat_streak = 0.0;
            }
        } else {
            sleep_minutes_from_start = None;
            sleep_heat_streak = 0.0;
        }

        let behavior = plan.and_then(|p| p.application(w));
        let meta = IndexMeta {
            sleep_minutes_from_start,
            sleep_heat_streak_minutes: sleep_heat_streak,
            architecture_factor: w
                .session
                .and_then(|s| seg.sessions.get(s))
                .map(|s| s.architecture_factor)
                .unwrap_or(1.0),
            sleep_scale: behavior.as_ref().map(|b| b.sleep_scale()).unwrap_or(1.0),
            workout_scale: behavior.as_ref().map(|b| b.workout_scale()).unwrap_or(1.0),
        };

        let mut indices = compute_indices(&w.epoch, &w.quality, &w.context, baselines, params, dt, &meta);
        let calm_state = calm.advance(classified, &indices, &w.quality, dt, params);

        let context = if calm_state.is_active() {
            indices.drain_rates.stress *= calm_state.stress_suppression_factor;
            Context::PostActivityRecovery {
                source_kind: classified,
            }
        } else {
            w.context.clone()
        };
        let kind = context.kind();

        let s = step(
            dt / 60.0,
            reserve,
            kind,
            &indices,
            params,
            &rule_weights(kind),
            calm_state.charge_per_hour,
        );

        if kind == ContextKind::Sleep {
            if indices.temperature.heat_likely {
                sleep_heat_streak += dt;
            } else {
                sleep_heat_streak = 0.0;
            }
        }
        prev_kind = Some(kind);

        let mut row = SeriesRow::new(w.index, w.ts_ms(), dt, context);
        row.bb = reserve;
        row.bb_next = s.next_reserve;
        row.reserve_score = s.next_reserve;
        row.comfort_score = Some(indices.comfort_score);
        row.fatigue_score = Some(fatigue_score(s.drain_per_hour, params));
        row.confidence = s.confidence;
        row.delta_core = s.delta_core;
        row.charge_points = s.charge_points;
        row.drain_points = s.drain_points;
        row.charge_per_hour = s.charge_per_hour;
        row.drain_per_hour = s.drain_per_hour;
        row.charge_components = ChargeComponents {
            sleep: indices.recovery.sleep,
            rest: indices.recovery.rest,
            mind: indices.recovery.mind,
            architecture_factor: meta.architecture_factor,
            calm_recovery_index: calm_state.index,
            calm_recovery_charge_per_hour: calm_state.charge_per_hour,
            calm_recovery_points: s.charge_points_extra,
        };
        row.drain_components = DrainComponents {
            load_per_hour: indices.drain_rates.load,
            stress_per_hour: indices.drain_rates.stress,
            anom_per_hour: indices.drain_rates.anom,
            anom_index: indices.anom_index,
            anom_breakdown: indices.anom_breakdown.clone(),
        };
        row.weights = AppliedWeights {
            charge: s.charge_gate.weights,
            drain: s.drain_gate.weights,
        };
        row.quality = w.quality;
        row.imputed = w.imputed.clone();
        row.behavior = behavior;
        row.calm_recovery = calm_state;
        row.temperature = indices.temperature;
        row.input = indices.values;

        reserve = s.next_reserve;
        series.push(row);
    }

    series
}

/// Reusable processor holding a base run configuration.
///
/// Documents passed to [`ReserveProcessor::process_json`] are layered over
/// the base: sections they leave out keep the processor's settings.
pub struct ReserveProcessor {
    config: RunConfig,
    encoder: ReportEncoder,
}

impl Default for ReserveProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReserveProcessor {
    /// Create a processor with default settings
    pub fn new() -> Self {
        Self::with_config(RunConfig::default())
    }

    pub fn with_config(config: RunConfig) -> Self {
        Self {
            config,
            encoder: ReportEncoder::new(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Enable or disable the behavioral baseline for subsequent runs
    pub fn set_behavior_baseline(&mut self, cfg: Option<BehaviorBaselineConfig>) {
        self.config.behavior_baseline = cfg;
    }

    /// Enable or disable the three-kernel hybrid for subsequent runs
    pub fn set_three_kernel(&mut self, cfg: Option<ThreeKernelConfig>) {
        self.config.three_kernel = cfg;
    }

    /// Process canonical epochs with the base configuration
    pub fn process(&self, epochs: Vec<Epoch>) -> ReserveResult {
        compute_series(RunInput {
            epochs,
            config: self.config.clone(),
        })
    }

    /// Process a raw JSON document and return the encoded report
    pub fn process_json(&self, json: &str) -> Result<String, ComputeError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let (input, _) = EpochAdapter::run_from_value_with(&value, &self.config)?;
        let result = compute_series(input);
        self.encoder.encode_to_json(&result)
    }
}
