//! Missing-vitals imputation
//!
//! Carry-forward per channel with a freshness-decayed quality. Values are only
//! written into the engine's working copies, never into caller epochs.

use crate::config::Params;
use crate::math::clamp01;
use crate::types::{ImputedValue, Vital, WorkingEpoch};

/// Last observed sample of one channel
#[derive(Debug, Clone, Copy)]
struct LastSeen {
    value: f64,
    ts_ms: Option<i64>,
    elapsed_minutes: f64,
    asleep: bool,
}

fn max_gap_minutes(vital: Vital, params: &Params) -> f64 {
    match vital {
        Vital::Hr => params.impute_hr_max_gap_minutes,
        Vital::Hrv => params.impute_hrv_max_gap_minutes,
        Vital::Spo2 => params.impute_spo2_max_gap_minutes,
        Vital::Rr => params.impute_rr_max_gap_minutes,
        Vital::Temp => params.impute_temp_max_gap_minutes,
    }
}

/// Channels that are only meaningful to carry across sleep
fn sleep_only(vital: Vital) -> bool {
    matches!(vital, Vital::Spo2 | Vital::Rr | Vital::Temp)
}

/// Quality of a value carried forward for `age_minutes`.
pub fn imputed_quality(age_minutes: f64, max_gap_minutes: f64, at_freshness: f64) -> f64 {
    if max_gap_minutes <= 0.0 {
        return 0.0;
    }
    at_freshness * clamp01(1.0 - age_minutes / max_gap_minutes)
}

/// Fill missing vitals in place. Returns the number of values imputed.
///
/// Epochs carrying a caller quality map are never filled, though their
/// observed values still refresh the carry-forward state.
pub fn impute(working: &mut [WorkingEpoch], params: &Params) -> usize {
    if !params.impute_missing_vitals {
        return 0;
    }

    let mut last: [Option<LastSeen>; 5] = [None; 5];
    let mut elapsed = 0.0;
    let mut filled = 0;

    for w in working.iter_mut() {
        let ts = w.ts_ms();
        let asleep = w.context.is_sleep();
        let locked = w.epoch.quality.is_some();

        for (slot, vital) in Vital::ALL.into_iter().enumerate() {
            if let Some(value) = w.epoch.vital(vital).filter(|v| v.is_finite()) {
                last[slot] = Some(LastSeen {
                    value,
                    ts_ms: ts,
                    elapsed_minutes: elapsed,
                    asleep,
                });
                continue;
            }
            if locked {
                continue;
            }
            let Some(seen) = last[slot] else {
                continue;
            };
            if sleep_only(vital) && !(asleep && seen.asleep) {
                continue;
            }

            let age = match (ts, seen.ts_ms) {
                (Some(now), Some(then)) => (now - then) as f64 / 60_000.0,
                _ => elapsed - seen.elapsed_minutes,
            };
            let max_gap = max_gap_minutes(vital, params);
            if !(age >= 0.0 && age <= max_gap) || max_gap <= 0.0 {
                continue;
            }

            let quality = imputed_quality(age, max_gap, params.impute_quality_at_freshness);
            w.epoch.set_vital(vital, Some(seen.value));
            w.imputed.set(
                vital,
                ImputedValue {
                    value: seen.value,
                    age_minutes: age,
                    quality,
                },
            );
            filled += 1;
        }

        elapsed += w.dt_minutes;
    }

    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::types::{ChannelQuality, Epoch, ImputedChannels, QualityOverride};

    const MIN: i64 = 60_000;

    fn working(i: usize, epoch: Epoch, context: Context) -> WorkingEpoch {
        WorkingEpoch {
            index: i,
            epoch,
            dt_minutes: 5.0,
            context,
            imputed: ImputedChannels::default(),
            quality: ChannelQuality::default(),
            movement_intensity: 0.0,
            session: None,
            segment: 0,
        }
    }

    fn sleep() -> Context {
        Context::Sleep {
            sleep_stage: "core".to_string(),
        }
    }

    fn at(minutes: i64) -> Epoch {
        Epoch {
            timestamp_ms: Some(minutes * MIN),
            ..Default::default()
        }
    }

    #[test]
    fn test_quality_decays_with_age() {
        assert!((imputed_quality(0.0, 60.0, 0.8) - 0.8).abs() < 1e-12);
        assert!((imputed_quality(30.0, 60.0, 0.8) - 0.4).abs() < 1e-12);
        assert_eq!(imputed_quality(90.0, 60.0, 0.8), 0.0);
    }

    #[test]
    fn test_carries_hr_within_gap() {
        let mut run = vec![
            working(0, Epoch { hr_bpm: Some(55.0), ..at(0) }, sleep()),
            working(1, at(5), sleep()),
            working(2, at(20), sleep()),
        ];
        let n = impute(&mut run, &Params::default());
        assert_eq!(n, 1);
        assert_eq!(run[1].epoch.hr_bpm, Some(55.0));
        let imp = run[1].imputed.hr.as_ref().map(|v| (v.age_minutes, v.quality));
        assert_eq!(imp, Some((5.0, 0.8 * (1.0 - 5.0 / 15.0))));
        // 20 minutes exceeds the 15 minute HR gap
        assert_eq!(run[2].epoch.hr_bpm, None);
    }

    #[test]
    fn test_spo2_needs_sleep_on_both_sides() {
        let awake = Context::Awake(Default::default());
        let mut run = vec![
            working(0, Epoch { spo2_pct: Some(97.0), ..at(0) }, awake.clone()),
            working(1, at(5), sleep()),
            working(2, Epoch { spo2_pct: Some(96.0), ..at(10) }, sleep()),
            working(3, at(15), awake),
            working(4, at(20), sleep()),
        ];
        impute(&mut run, &Params::default());
        assert_eq!(run[1].epoch.spo2_pct, None);
        assert_eq!(run[3].epoch.spo2_pct, None);
        assert_eq!(run[4].epoch.spo2_pct, Some(96.0));
    }

    #[test]
    fn test_caller_quality_map_and_disable_switch() {
        let mut map = QualityOverride::new();
        map.insert("hr".to_string(), 1.0);
        let mut run = vec![
            working(0, Epoch { hr_bpm: Some(60.0), ..at(0) }, sleep()),
            working(1, Epoch { quality: Some(map), ..at(5) }, sleep()),
        ];
        assert_eq!(impute(&mut run, &Params::default()), 0);

        let mut run = vec![
            working(0, Epoch { hr_bpm: Some(60.0), ..at(0) }, sleep()),
            working(1, at(5), sleep()),
        ];
        let params = Params {
            impute_missing_vitals: false,
            ..Default::default()
        };
        assert_eq!(impute(&mut run, &params), 0);
        assert_eq!(run[1].epoch.hr_bpm, None);
    }

    #[test]
    fn test_age_from_dt_without_timestamps() {
        let mut run = vec![
            working(0, Epoch { hrv_sdnn_ms: Some(48.0), ..Default::default() }, sleep()),
            working(1, Epoch::default(), sleep()),
            working(2, Epoch::default(), sleep()),
        ];
        impute(&mut run, &Params::default());
        assert_eq!(run[2].imputed.hrv.map(|v| v.age_minutes), Some(10.0));
    }
}
