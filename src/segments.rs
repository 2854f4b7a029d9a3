//! Segmentation and sleep architecture
//!
//! Groups the classified run into maximal same-kind segments, merges SLEEP
//! runs across short wake gaps into sleep sessions, and derives one
//! architecture factor per session from its stage composition.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::config::Params;
use crate::context::ContextKind;
use crate::math::{clamp, ramp};
use crate::types::WorkingEpoch;

/// Maximal run of consecutive epochs sharing one context kind
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub kind: ContextKind,
    pub start_index: usize,
    pub end_index: usize,
    pub start_ts_ms: Option<i64>,
    pub end_ts_ms: Option<i64>,
    pub duration_minutes: f64,
    pub mean_movement_intensity: f64,
}

/// Minutes per sleep-stage bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMinutes {
    pub deep: f64,
    pub core: f64,
    pub rem: f64,
    pub awake: f64,
    pub in_bed: f64,
}

impl StageMinutes {
    fn add(&mut self, stage: Option<&str>, minutes: f64) {
        let Some(stage) = stage else {
            self.awake += minutes;
            return;
        };
        let s = stage.to_ascii_lowercase();
        if s.contains("deep") {
            self.deep += minutes;
        } else if s.contains("rem") {
            self.rem += minutes;
        } else if s.contains("inbed") || s.contains("in_bed") {
            self.in_bed += minutes;
        } else if s.contains("awake") {
            self.awake += minutes;
        } else {
            self.core += minutes;
        }
    }

    pub fn asleep(&self) -> f64 {
        self.deep + self.core + self.rem
    }

    pub fn total(&self) -> f64 {
        self.asleep() + self.awake + self.in_bed
    }

    /// Asleep share of the session
    pub fn efficiency(&self) -> f64 {
        let total = self.total();
        if total > 0.0 {
            self.asleep() / total
        } else {
            0.0
        }
    }

    /// Deep share of asleep time
    pub fn deep_ratio(&self) -> f64 {
        let asleep = self.asleep();
        if asleep > 0.0 {
            self.deep / asleep
        } else {
            0.0
        }
    }

    /// `0.65 + 0.3 * efficiency score + 0.3 * deep score`, in `[0.55, 1.25]`
    pub fn architecture_factor(&self) -> f64 {
        let eff_score = ramp(self.efficiency(), 0.70, 0.90);
        let deep_score = ramp(self.deep_ratio(), 0.05, 0.20);
        clamp(0.65 + 0.3 * eff_score + 0.3 * deep_score, 0.55, 1.25)
    }
}

/// SLEEP runs merged across short wake gaps
#[derive(Debug, Clone, PartialEq)]
pub struct SleepSession {
    pub start_index: usize,
    pub end_index: usize,
    pub start_ts_ms: Option<i64>,
    pub end_ts_ms: Option<i64>,
    pub sleep_epochs: usize,
    /// Minutes spent in SLEEP epochs
    pub sleep_minutes: f64,
    pub stages: StageMinutes,
    pub architecture_factor: f64,
}

impl SleepSession {
    pub fn sleep_hours(&self) -> f64 {
        self.sleep_minutes / 60.0
    }
}

/// Segments and sessions of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    pub segments: Vec<Segment>,
    pub sessions: Vec<SleepSession>,
}

/// What the session grouping needs to know about one epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunPoint {
    pub asleep: bool,
    pub ts_ms: Option<i64>,
    pub dt_minutes: f64,
}

/// Index spans of sleep sessions.
///
/// The gap between two SLEEP runs is the timestamp distance between the last
/// and first sleep epoch minus one nominal epoch, or the summed dt of the
/// epochs in between when timestamps are missing. Each span starts and ends on
/// a SLEEP epoch.
pub fn sleep_session_spans(
    points: &[RunPoint],
    epoch_minutes: f64,
    max_gap_minutes: f64,
) -> Vec<RangeInclusive<usize>> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < points.len() {
        if !points[i].asleep {
            i += 1;
            continue;
        }
        let start = i;
        while i + 1 < points.len() && points[i + 1].asleep {
            i += 1;
        }
        runs.push((start, i));
        i += 1;
    }

    let mut spans: Vec<(usize, usize)> = Vec::new();
    for (start, end) in runs {
        if let Some(last) = spans.last_mut() {
            let gap = match (points[last.1].ts_ms, points[start].ts_ms) {
                (Some(a), Some(b)) => (b - a) as f64 / 60_000.0 - epoch_minutes,
                _ => points[last.1 + 1..start].iter().map(|p| p.dt_minutes).sum(),
            };
            if gap <= max_gap_minutes {
                last.1 = end;
                continue;
            }
        }
        spans.push((start, end));
    }

    spans.into_iter().map(|(s, e)| s..=e).collect()
}

/// Segment the run and form sleep sessions, tagging every working epoch with
/// its segment and (when inside a session span) its session.
pub fn build(working: &mut [WorkingEpoch], params: &Params) -> Segmentation {
    let mut segments: Vec<Segment> = Vec::new();

    for (i, w) in working.iter_mut().enumerate() {
        let kind = w.context.kind();
        let extend = segments.last().is_some_and(|s| s.kind == kind);
        if !extend {
            segments.push(Segment {
                kind,
                start_index: i,
                end_index: i,
                start_ts_ms: w.ts_ms(),
                end_ts_ms: w.ts_ms(),
                duration_minutes: 0.0,
                mean_movement_intensity: 0.0,
            });
        }
        let seg_index = segments.len() - 1;
        if let Some(seg) = segments.last_mut() {
            let n = (i - seg.start_index) as f64;
            seg.end_index = i;
            seg.end_ts_ms = w.ts_ms().or(seg.end_ts_ms);
            seg.duration_minutes += w.dt_minutes;
            seg.mean_movement_intensity = (seg.mean_movement_intensity * n + w.movement_intensity) / (n + 1.0);
        }
        w.segment = seg_index;
    }

    let points: Vec<RunPoint> = working
        .iter()
        .map(|w| RunPoint {
            asleep: w.context.is_sleep(),
            ts_ms: w.ts_ms(),
            dt_minutes: w.dt_minutes,
        })
        .collect();

    let spans = sleep_session_spans(&points, params.epoch_minutes, params.sleep_session_max_gap_minutes);
    let mut sessions = Vec::with_capacity(spans.len());

    for (session_index, span) in spans.into_iter().enumerate() {
        let mut stages = StageMinutes::default();
        let mut sleep_epochs = 0;
        let mut sleep_minutes = 0.0;
        for w in &mut working[span.clone()] {
            w.session = Some(session_index);
            let stage = w.context.sleep_stage();
            if w.context.is_sleep() {
                sleep_epochs += 1;
                sleep_minutes += w.dt_minutes;
            }
            stages.add(stage, w.dt_minutes);
        }
        let (start, end) = (*span.start(), *span.end());
        sessions.push(SleepSession {
            start_index: start,
            end_index: end,
            start_ts_ms: working[start].ts_ms(),
            end_ts_ms: working[end].ts_ms(),
            sleep_epochs,
            sleep_minutes,
            stages,
            architecture_factor: stages.architecture_factor(),
        });
    }

    Segmentation { segments, sessions }
}
