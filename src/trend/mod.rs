//! Three-kernel hybrid
//!
//! Runs after the core integration. A small regressor learns the core
//! kernel's normalized per-epoch delta from reserve level, time of day,
//! day of week and a sleep-probability prior. It then drives a second
//! reserve trajectory (the trend kernel). The visible reserve is a weighted
//! blend of both kernels, and an optional forecast tail extends the trend
//! kernel alone past the last observation.

mod network;

pub use network::{Mlp, Sample, TrainOptions};

use std::f64::consts::TAU;

use chrono::{Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Params, ThreeKernelConfig};
use crate::context::{Context, ContextKind};
use crate::math::{clamp, Lcg};
use crate::types::SeriesRow;

pub const FEATURE_COUNT: usize = 8;

/// Forecast confidence halves every this many hours
const FORECAST_CONFIDENCE_HALF_LIFE_HOURS: f64 = 12.0;

const MINUTES_PER_DAY: f64 = 1440.0;

/// Predictor that drove the trend kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendModel {
    Mlp,
    Histogram,
}

/// Hybrid-path metadata attached to the result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreeKernelMeta {
    pub enabled: bool,
    pub weight_core: f64,
    pub weight_trend: f64,
    pub model: TrendModel,
    pub train_samples: usize,
    pub final_loss: Option<f64>,
    pub train_epochs: usize,
    pub hidden_units: usize,
    pub seed: u32,
    pub forecast_rows: usize,
    pub time_bins: usize,
}

/// Position of an epoch in the daily and weekly cycle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Clock {
    /// 0..1440
    pub minute_of_day: f64,
    /// 0 (Monday) ..7, fractional
    pub day_of_week: f64,
}

impl Clock {
    /// UTC clock at a millisecond instant.
    pub fn at(ms: i64) -> Self {
        let Some(dt) = Utc.timestamp_millis_opt(ms).single() else {
            return Self::default();
        };
        let minute_of_day = f64::from(dt.num_seconds_from_midnight()) / 60.0
            + f64::from(dt.nanosecond() % 1_000_000_000) / 60e9;
        let day_of_week = f64::from(dt.weekday().num_days_from_monday()) + minute_of_day / MINUTES_PER_DAY;
        Self {
            minute_of_day,
            day_of_week,
        }
    }
}

/// Instant of every row. Rows without a timestamp continue the clock from the
/// previous row by its dt; a run with no timestamps starts at 0.
fn row_instants(rows: &[SeriesRow]) -> Vec<i64> {
    let mut out = Vec::with_capacity(rows.len());
    let mut prev: Option<(i64, f64)> = None;
    for r in rows {
        let ms = match (r.ts_ms, prev) {
            (Some(ts), _) => ts,
            (None, Some((p, dt))) => p + (dt * 60_000.0).round() as i64,
            (None, None) => 0,
        };
        out.push(ms);
        prev = Some((ms, r.dt_minutes));
    }
    out
}

/// Per-epoch delta normalized by the largest delta the integrator allows.
pub fn normalized_delta(delta: f64, dt_minutes: f64, params: &Params) -> f64 {
    let max_delta = params.max_delta_per_hour * dt_minutes / 60.0;
    if !(max_delta.is_finite() && max_delta > 0.0) {
        return 0.0;
    }
    clamp(delta / max_delta, -1.0, 1.0)
}

/// Time-of-day histograms learned from the core series
#[derive(Debug, Clone, PartialEq)]
pub struct TimeOfDayTables {
    bins: usize,
    /// Laplace-smoothed share of SLEEP epochs per bin
    pub sleep_probability: Vec<f64>,
    /// Confidence-weighted mean normalized delta per bin
    pub mean_delta: Vec<f64>,
}

impl TimeOfDayTables {
    pub fn build(rows: &[SeriesRow], clocks: &[Clock], targets: &[f64], bins: usize, alpha: f64) -> Self {
        let bins = bins.max(1);
        let mut sleep = vec![0.0; bins];
        let mut total = vec![0.0; bins];
        let mut delta_sum = vec![0.0; bins];
        let mut weight_sum = vec![0.0; bins];

        for ((r, clock), &target) in rows.iter().zip(clocks).zip(targets) {
            let b = bin_of(clock, bins);
            total[b] += 1.0;
            if r.context.kind() == ContextKind::Sleep {
                sleep[b] += 1.0;
            }
            let w = r.confidence.max(0.0);
            delta_sum[b] += w * target;
            weight_sum[b] += w;
        }

        let sleep_probability = sleep
            .iter()
            .zip(&total)
            .map(|(s, n)| {
                let denom = n + 2.0 * alpha;
                if denom > 0.0 {
                    (s + alpha) / denom
                } else {
                    0.5
                }
            })
            .collect();
        let mean_delta = delta_sum
            .iter()
            .zip(&weight_sum)
            .map(|(d, w)| if *w > 0.0 { d / w } else { 0.0 })
            .collect();

        Self {
            bins,
            sleep_probability,
            mean_delta,
        }
    }

    pub fn bin(&self, clock: &Clock) -> usize {
        bin_of(clock, self.bins)
    }
}

fn bin_of(clock: &Clock, bins: usize) -> usize {
    let frac = clamp(clock.minute_of_day / MINUTES_PER_DAY, 0.0, 1.0);
    ((frac * bins as f64).floor() as usize).min(bins - 1)
}

/// Regressor input vector.
pub fn features(reserve: f64, prev_delta: f64, clock: &Clock, sleep_probability: f64) -> Vec<f64> {
    let day = TAU * clock.minute_of_day / MINUTES_PER_DAY;
    let week = TAU * clock.day_of_week / 7.0;
    vec![
        1.0,
        clamp(reserve, 0.0, 100.0) / 50.0 - 1.0,
        clamp(prev_delta, -1.0, 1.0),
        day.sin(),
        day.cos(),
        clamp(sleep_probability, 0.0, 1.0) * 2.0 - 1.0,
        week.sin(),
        week.cos(),
    ]
}

enum Predictor {
    Mlp(Mlp),
    Histogram,
}

impl Predictor {
    fn predict(&self, x: &[f64], bin: usize, tables: &TimeOfDayTables) -> f64 {
        let raw = match self {
            Predictor::Mlp(net) => net.predict(x),
            Predictor::Histogram => tables.mean_delta.get(bin).copied().unwrap_or(0.0),
        };
        clamp(raw, -1.0, 1.0)
    }
}

/// Train the trend regressor on the core series, blend the kernels in place
/// and append the forecast tail.
///
/// Rows must hold the core trajectory on entry. On return every observed row
/// carries `bb_core*` and `bb_trend*`, and `bb`/`bb_next` hold the blend.
pub fn apply(series: &mut Vec<SeriesRow>, params: &Params, cfg: &ThreeKernelConfig) -> ThreeKernelMeta {
    let instants = row_instants(series);
    let clocks: Vec<Clock> = instants.iter().map(|&ms| Clock::at(ms)).collect();
    let targets: Vec<f64> = series
        .iter()
        .map(|r| normalized_delta(r.delta_core, r.dt_minutes, params))
        .collect();
    let tables = TimeOfDayTables::build(series, &clocks, &targets, cfg.time_bins, cfg.laplace_alpha);

    let samples: Vec<Sample> = series
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let prev = if i > 0 { targets[i - 1] } else { 0.0 };
            let p = tables.sleep_probability[tables.bin(&clocks[i])];
            Sample {
                features: features(r.bb, prev, &clocks[i], p),
                target: targets[i],
                weight: r.confidence,
            }
        })
        .collect();

    let mut rng = Lcg::new(cfg.seed);
    let (predictor, final_loss) = if samples.len() >= cfg.min_train_samples {
        let mut net = Mlp::new(FEATURE_COUNT, cfg.hidden_units, &mut rng);
        let opts = TrainOptions {
            epochs: cfg.train_epochs,
            learning_rate: cfg.learning_rate,
            learning_rate_decay: cfg.learning_rate_decay,
            l2: cfg.l2,
        };
        let loss = net.train(&samples, &opts, &mut rng);
        debug!(samples = samples.len(), epochs = cfg.train_epochs, loss = ?loss, "trained trend regressor");
        (Predictor::Mlp(net), loss)
    } else {
        debug!(
            samples = samples.len(),
            min = cfg.min_train_samples,
            "too few samples, using time-of-day fallback"
        );
        (Predictor::Histogram, None)
    };

    // Trend kernel over the observed rows
    let mut trend = series.first().map(|r| r.bb).unwrap_or(params.initial_bb);
    let mut prev_pred = 0.0;
    for (i, r) in series.iter_mut().enumerate() {
        let bin = tables.bin(&clocks[i]);
        let x = features(trend, prev_pred, &clocks[i], tables.sleep_probability[bin]);
        let pred = predictor.predict(&x, bin, &tables);
        let next = clamp(trend + pred * params.max_delta_per_hour * r.dt_minutes / 60.0, 0.0, 100.0);

        let (core, core_next) = (r.bb, r.bb_next);
        r.bb_core = Some(core);
        r.bb_core_next = Some(core_next);
        r.bb_trend = Some(trend);
        r.bb_trend_next = Some(next);
        r.bb = cfg.weight_core * core + cfg.weight_trend * trend;
        r.bb_next = cfg.weight_core * core_next + cfg.weight_trend * next;
        r.reserve_score = r.bb_next;

        prev_pred = pred;
        trend = next;
    }

    let forecast_rows = forecast_row_count(cfg.forecast_hours, params.epoch_minutes);
    if let Some(last) = series.last().cloned() {
        let last_instant = instants.last().copied().unwrap_or(0);
        let step_ms = (params.epoch_minutes * 60_000.0).round() as i64;
        let dt_hours = params.epoch_minutes / 60.0;

        for k in 1..=forecast_rows {
            let offset = step_ms * k as i64;
            let clock = Clock::at(last_instant + offset);
            let bin = tables.bin(&clock);
            let x = features(trend, prev_pred, &clock, tables.sleep_probability[bin]);
            let pred = predictor.predict(&x, bin, &tables);
            let next = clamp(trend + pred * params.max_delta_per_hour * dt_hours, 0.0, 100.0);

            let hours_ahead = k as f64 * dt_hours;
            let mut row = SeriesRow::new(
                series.len(),
                last.ts_ms.map(|ts| ts + offset),
                params.epoch_minutes,
                Context::Forecast,
            );
            let delta = next - trend;
            row.bb = trend;
            row.bb_next = next;
            row.reserve_score = next;
            row.delta_core = delta;
            row.charge_points = delta.max(0.0);
            row.drain_points = (-delta).max(0.0);
            row.charge_per_hour = row.charge_points / dt_hours;
            row.drain_per_hour = row.drain_points / dt_hours;
            row.confidence = last.confidence * 0.5f64.powf(hours_ahead / FORECAST_CONFIDENCE_HALF_LIFE_HOURS);
            row.bb_trend = Some(trend);
            row.bb_trend_next = Some(next);
            series.push(row);

            prev_pred = pred;
            trend = next;
        }
    }

    ThreeKernelMeta {
        enabled: true,
        weight_core: cfg.weight_core,
        weight_trend: cfg.weight_trend,
        model: match predictor {
            Predictor::Mlp(_) => TrendModel::Mlp,
            Predictor::Histogram => TrendModel::Histogram,
        },
        train_samples: samples.len(),
        final_loss,
        train_epochs: cfg.train_epochs,
        hidden_units: cfg.hidden_units,
        seed: cfg.seed,
        forecast_rows: if series.is_empty() { 0 } else { forecast_rows },
        time_bins: tables.bins,
    }
}

/// `round(hours * 60 / epoch_minutes)`
pub fn forecast_row_count(hours: f64, epoch_minutes: f64) -> usize {
    if !(hours.is_finite() && hours > 0.0 && epoch_minutes > 0.0) {
        return 0;
    }
    (hours * 60.0 / epoch_minutes).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 86_400_000;
    // 2025-01-01T00:00:00Z, a Wednesday
    const START_MS: i64 = 1_735_689_600_000;

    fn core_series(n: usize) -> Vec<SeriesRow> {
        let mut bb = 70.0;
        (0..n)
            .map(|i| {
                let minutes = (i * 5) % 1440;
                let asleep = minutes < 480;
                let context = if asleep {
                    Context::Sleep {
                        sleep_stage: "core".to_string(),
                    }
                } else {
                    Context::Awake(Default::default())
                };
                let delta = if asleep { 0.6 } else { -0.25 };
                let mut r = SeriesRow::new(i, Some(START_MS + i as i64 * 300_000), 5.0, context);
                r.bb = bb;
                r.bb_next = clamp(bb + delta, 0.0, 100.0);
                r.delta_core = r.bb_next - r.bb;
                r.reserve_score = r.bb_next;
                r.confidence = 0.8;
                bb = r.bb_next;
                r
            })
            .collect()
    }

    fn cfg(weight_core: f64, weight_trend: f64) -> ThreeKernelConfig {
        ThreeKernelConfig {
            weight_core,
            weight_trend,
            min_train_samples: 50,
            train_epochs: 5,
            ..Default::default()
        }
        .validated()
    }

    #[test]
    fn test_clock_from_timestamp() {
        let c = Clock::at(START_MS + 6 * 3_600_000 + 30 * 60_000);
        assert!((c.minute_of_day - 390.0).abs() < 1e-9);
        // Wednesday is day 2 counting from Monday
        assert!((c.day_of_week - (2.0 + 390.0 / 1440.0)).abs() < 1e-9);
        assert_eq!(Clock::at(START_MS + DAY_MS).minute_of_day, 0.0);
    }

    #[test]
    fn test_normalized_delta() {
        let p = Params::default();
        // 25 points/hour over 5 minutes allows 25/12
        assert!((normalized_delta(25.0 / 24.0, 5.0, &p) - 0.5).abs() < 1e-12);
        assert_eq!(normalized_delta(100.0, 5.0, &p), 1.0);
        assert_eq!(normalized_delta(1.0, 0.0, &p), 0.0);
    }

    #[test]
    fn test_sleep_probability_is_laplace_smoothed() {
        let rows = core_series(288);
        let instants = row_instants(&rows);
        let clocks: Vec<Clock> = instants.iter().map(|&ms| Clock::at(ms)).collect();
        let targets = vec![0.0; rows.len()];
        let tables = TimeOfDayTables::build(&rows, &clocks, &targets, 48, 1.0);
        // Each 30 minute bin holds 6 epochs of one day
        assert!((tables.sleep_probability[0] - 7.0 / 8.0).abs() < 1e-12);
        assert!((tables.sleep_probability[30] - 1.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_untimed_rows_continue_the_clock() {
        let mut rows = core_series(3);
        for r in &mut rows {
            r.ts_ms = None;
        }
        assert_eq!(row_instants(&rows), vec![0, 300_000, 600_000]);
    }

    #[test]
    fn test_pure_kernels_match_their_trajectories() {
        let params = Params::default();

        let mut core_only = core_series(288);
        apply(&mut core_only, &params, &cfg(1.0, 0.0));
        for r in &core_only {
            assert!((r.bb_next - r.bb_core_next.unwrap()).abs() < 1e-9);
        }

        let mut trend_only = core_series(288);
        let meta = apply(&mut trend_only, &params, &cfg(0.0, 1.0));
        assert_eq!(meta.model, TrendModel::Mlp);
        for r in &trend_only {
            assert!((r.bb_next - r.bb_trend_next.unwrap()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_forecast_tail() {
        let params = Params::default();
        let mut series = core_series(288);
        let cfg = ThreeKernelConfig {
            forecast_hours: 1.0,
            ..cfg(0.9, 0.1)
        };
        let meta = apply(&mut series, &params, &cfg);
        assert_eq!(meta.forecast_rows, 12);
        assert_eq!(series.len(), 300);

        let last = series.last().unwrap();
        assert_eq!(last.context.kind(), ContextKind::Forecast);
        assert_eq!(last.i, 299);
        assert_eq!(last.ts_ms, Some(START_MS + 299 * 300_000));
        assert!((last.confidence - 0.8 * 0.5f64.powf(1.0 / 12.0)).abs() < 1e-12);
        assert!(series[288..].iter().all(|r| r.bb_core.is_none() && r.comfort_score.is_none()));
        assert!(series[288..].windows(2).all(|w| w[0].bb_next == w[1].bb));
    }

    #[test]
    fn test_histogram_fallback_below_min_samples() {
        let params = Params::default();
        let mut series = core_series(20);
        let meta = apply(&mut series, &params, &ThreeKernelConfig::default().validated());
        assert_eq!(meta.model, TrendModel::Histogram);
        assert_eq!(meta.final_loss, None);
        assert!(series.iter().all(|r| (0.0..=100.0).contains(&r.bb_trend_next.unwrap())));
    }

    #[test]
    fn test_same_seed_reproduces_trend() {
        let params = Params::default();
        let run = |seed: u32| {
            let mut series = core_series(288);
            let cfg = ThreeKernelConfig { seed, ..cfg(0.5, 0.5) };
            let meta = apply(&mut series, &params, &cfg);
            let trend: Vec<f64> = series.iter().filter_map(|r| r.bb_trend_next).collect();
            (trend, meta.final_loss)
        };
        let (a, loss_a) = run(42);
        let (b, loss_b) = run(42);
        assert_eq!(a, b);
        assert_eq!(loss_a, loss_b);
        assert!(loss_a.is_some());
    }

    #[test]
    fn test_forecast_row_count() {
        assert_eq!(forecast_row_count(1.0, 5.0), 12);
        assert_eq!(forecast_row_count(0.0, 5.0), 0);
        assert_eq!(forecast_row_count(1.0, 7.0), 9);
    }
}
