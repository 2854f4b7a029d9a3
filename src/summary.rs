//! Run-level summary
//!
//! Computed once from the finished series. Forecast rows are never
//! summarized. Sleep sessions are re-derived from the row contexts with the
//! same gap rule the segmentation pass uses.

use crate::config::Params;
use crate::context::ContextKind;
use crate::math::clamp;
use crate::segments::{sleep_session_spans, RunPoint};
use crate::types::{MainSleep, SeriesRow, Summary};

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Readiness composite in 0..100.
pub fn readiness(
    morning_bb: f64,
    sleep_avg_comfort: Option<f64>,
    avg_comfort: Option<f64>,
    sleep_charge: f64,
    morning_fatigue: Option<f64>,
) -> f64 {
    let comfort = sleep_avg_comfort.or(avg_comfort).unwrap_or(50.0);
    clamp(
        0.6 * morning_bb + 0.25 * comfort + 0.15 * sleep_charge.max(0.0) - 0.1 * morning_fatigue.unwrap_or(0.0),
        0.0,
        100.0,
    )
}

pub fn summarize(series: &[SeriesRow], params: &Params) -> Summary {
    let rows: Vec<&SeriesRow> = series.iter().filter(|r| !r.is_forecast()).collect();
    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        return Summary::default();
    };

    let mut min_bb = first.bb;
    let mut max_bb = first.bb;
    let mut total_charge = 0.0;
    let mut total_drain = 0.0;
    let mut confidence_sum = 0.0;
    for r in &rows {
        min_bb = min_bb.min(r.bb).min(r.bb_next);
        max_bb = max_bb.max(r.bb).max(r.bb_next);
        total_charge += r.charge_points;
        total_drain += r.drain_points;
        confidence_sum += r.confidence;
    }
    let avg_comfort = mean(rows.iter().filter_map(|r| r.comfort_score).filter(|v| v.is_finite()));
    let avg_fatigue = mean(rows.iter().filter_map(|r| r.fatigue_score).filter(|v| v.is_finite()));

    let mut summary = Summary {
        start_bb: Some(first.bb),
        end_bb: Some(last.bb_next),
        min_bb: Some(min_bb),
        max_bb: Some(max_bb),
        total_charge,
        total_drain,
        avg_confidence: confidence_sum / rows.len() as f64,
        avg_comfort,
        avg_fatigue,
        ..Default::default()
    };

    let points: Vec<RunPoint> = rows
        .iter()
        .map(|r| RunPoint {
            asleep: r.context.kind() == ContextKind::Sleep,
            ts_ms: r.ts_ms,
            dt_minutes: r.dt_minutes,
        })
        .collect();

    // Most SLEEP epochs wins; ties go to the later session
    let main = sleep_session_spans(&points, params.epoch_minutes, params.sleep_session_max_gap_minutes)
        .into_iter()
        .map(|span| {
            let sleep_rows: Vec<&SeriesRow> = rows[span.clone()]
                .iter()
                .copied()
                .filter(|r| r.context.kind() == ContextKind::Sleep)
                .collect();
            (span, sleep_rows)
        })
        .fold(None, |best: Option<(_, Vec<&SeriesRow>)>, cand| match best {
            Some(b) if b.1.len() > cand.1.len() => Some(b),
            _ => Some(cand),
        });

    let Some((span, sleep_rows)) = main else {
        return summary;
    };
    let Some(final_row) = sleep_rows.last() else {
        return summary;
    };

    let sleep_charge: f64 = sleep_rows.iter().map(|r| r.bb_next - r.bb).sum();
    let morning_bb = final_row.bb_next;
    let sleep_avg_comfort = mean(sleep_rows.iter().filter_map(|r| r.comfort_score).filter(|v| v.is_finite()));
    let morning_fatigue = final_row.fatigue_score.filter(|v| v.is_finite());

    summary.sleep_charge = Some(sleep_charge);
    summary.morning_bb = Some(morning_bb);
    summary.sleep_avg_comfort = sleep_avg_comfort;
    summary.morning_comfort = final_row.comfort_score.filter(|v| v.is_finite());
    summary.morning_fatigue = morning_fatigue;
    summary.readiness = Some(readiness(
        morning_bb,
        sleep_avg_comfort,
        avg_comfort,
        sleep_charge,
        morning_fatigue,
    ));

    let (start, end) = (rows[*span.start()], rows[*span.end()]);
    summary.main_sleep = Some(MainSleep {
        start_index: start.i,
        end_index: end.i,
        start_ts_ms: start.ts_ms,
        end_ts_ms: end.ts_ms,
        sleep_epochs: sleep_rows.len(),
        sleep_minutes: sleep_rows.iter().map(|r| r.dt_minutes).sum(),
    });

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use pretty_assertions::assert_eq;

    const EPOCH_MS: i64 = 300_000;

    fn row(i: usize, context: Context, bb: f64, bb_next: f64) -> SeriesRow {
        let mut r = SeriesRow::new(i, Some(i as i64 * EPOCH_MS), 5.0, context);
        r.bb = bb;
        r.bb_next = bb_next;
        r.reserve_score = bb_next;
        r.confidence = 0.5;
        r.comfort_score = Some(60.0);
        r.fatigue_score = Some(10.0);
        r
    }

    fn sleep() -> Context {
        Context::Sleep {
            sleep_stage: "core".to_string(),
        }
    }

    fn awake() -> Context {
        Context::Awake(Default::default())
    }

    #[test]
    fn test_empty_series_defaults() {
        assert_eq!(summarize(&[], &Params::default()), Summary::default());
    }

    #[test]
    fn test_sleep_charge_sums_sleep_rows_of_main_session() {
        let series = vec![
            row(0, sleep(), 50.0, 51.0),
            row(1, awake(), 51.0, 50.5),
            row(2, sleep(), 50.5, 52.0),
            row(3, awake(), 52.0, 51.0),
        ];
        let s = summarize(&series, &Params::default());
        // The wake epoch inside the session does not count
        assert!((s.sleep_charge.unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(s.morning_bb, Some(52.0));
        assert_eq!(s.start_bb, Some(50.0));
        assert_eq!(s.end_bb, Some(51.0));
        assert_eq!(s.min_bb, Some(50.0));
        assert_eq!(s.max_bb, Some(52.0));
        let main = s.main_sleep.unwrap();
        assert_eq!((main.start_index, main.end_index, main.sleep_epochs), (0, 2, 2));
    }

    #[test]
    fn test_longest_session_wins_ties_go_late() {
        let mut series = Vec::new();
        // Two 2-epoch sessions separated by a 4 hour wake gap
        for i in 0..2 {
            series.push(row(i, sleep(), 40.0, 41.0));
        }
        for i in 2..52 {
            series.push(row(i, awake(), 41.0, 41.0));
        }
        for i in 52..54 {
            series.push(row(i, sleep(), 60.0, 62.0));
        }
        let s = summarize(&series, &Params::default());
        assert_eq!(s.morning_bb, Some(62.0));
        assert_eq!(s.sleep_charge, Some(4.0));

        // A third epoch makes the first session the longest
        let mut longer = series.clone();
        longer[2].context = sleep();
        let s = summarize(&longer, &Params::default());
        assert_eq!(s.main_sleep.map(|m| m.start_index), Some(0));
    }

    #[test]
    fn test_readiness_formula() {
        let r = readiness(80.0, Some(70.0), Some(40.0), 20.0, Some(10.0));
        assert!((r - (48.0 + 17.5 + 3.0 - 1.0)).abs() < 1e-12);
        assert_eq!(readiness(80.0, None, None, -5.0, None), 0.6 * 80.0 + 0.25 * 50.0);
        assert_eq!(readiness(400.0, None, None, 0.0, None), 100.0);
    }

    #[test]
    fn test_forecast_rows_are_excluded() {
        let mut series = vec![row(0, sleep(), 50.0, 52.0)];
        let mut f = row(1, Context::Forecast, 52.0, 90.0);
        f.comfort_score = None;
        series.push(f);
        let s = summarize(&series, &Params::default());
        assert_eq!(s.end_bb, Some(52.0));
        assert_eq!(s.max_bb, Some(52.0));
    }
}
