//! Signal quality and weight gating
//!
//! Each channel gets an independent 0..1 plausibility score. Charge and drain
//! are each mixed from three sub-channels whose prior weights are gated by the
//! quality of the data feeding them.

use serde::{Deserialize, Serialize};

use crate::math::clamp01;
use crate::types::{Baselines, ChannelQuality, Epoch, ImputedChannels, QualityOverride, Vital};

/// Score assigned to a reading outside its plausible range
pub const OUT_OF_RANGE_QUALITY: f64 = 0.15;

/// Temperature quality cap while the temperature baseline is still young
pub const YOUNG_TEMP_BASELINE_QUALITY_CAP: f64 = 0.35;
const YOUNG_TEMP_BASELINE_DAYS: f64 = 5.0;

/// A fixed set of three weights or qualities
pub trait Triple: Sized {
    fn to_array(&self) -> [f64; 3];
    fn from_array(values: [f64; 3]) -> Self;
}

/// Charge sub-channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeTriple {
    pub sleep: f64,
    pub rest: f64,
    pub mind: f64,
}

/// Drain sub-channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainTriple {
    pub load: f64,
    pub stress: f64,
    pub anom: f64,
}

impl ChargeTriple {
    pub const fn new(sleep: f64, rest: f64, mind: f64) -> Self {
        Self { sleep, rest, mind }
    }
}

impl DrainTriple {
    pub const fn new(load: f64, stress: f64, anom: f64) -> Self {
        Self { load, stress, anom }
    }
}

impl Triple for ChargeTriple {
    fn to_array(&self) -> [f64; 3] {
        [self.sleep, self.rest, self.mind]
    }

    fn from_array([sleep, rest, mind]: [f64; 3]) -> Self {
        Self { sleep, rest, mind }
    }
}

impl Triple for DrainTriple {
    fn to_array(&self) -> [f64; 3] {
        [self.load, self.stress, self.anom]
    }

    fn from_array([load, stress, anom]: [f64; 3]) -> Self {
        Self { load, stress, anom }
    }
}

/// Result of gating one channel group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gate<T> {
    /// Gated weights, renormalized to sum 1
    pub weights: T,
    /// Quality-weighted average of the ungated priors
    pub group_quality: f64,
    /// `min_scale + (1 - min_scale) * group_quality`
    pub group_scale: f64,
}

/// Prior-weighted average quality, 0 when every prior is zero.
pub fn weighted_avg01<T: Triple>(weights: &T, qualities: &T) -> f64 {
    let mut sum_w = 0.0;
    let mut sum = 0.0;
    for (w, q) in weights.to_array().into_iter().zip(qualities.to_array()) {
        let w = if w.is_finite() { w } else { 0.0 };
        if w <= 0.0 {
            continue;
        }
        sum_w += w;
        sum += w * clamp01(q);
    }
    if sum_w <= 0.0 {
        return 0.0;
    }
    clamp01(sum / sum_w)
}

/// Gate prior weights by channel quality.
///
/// Poor data shrinks a group's rate towards `min_scale` but never to zero.
pub fn gate_weights<T: Triple>(prior: &T, quality: &T, min_scale: f64) -> Gate<T> {
    let priors = prior.to_array().map(clamp01);
    let qualities = quality.to_array().map(clamp01);
    let mut gated = [0.0; 3];
    for k in 0..3 {
        gated[k] = priors[k] * qualities[k];
    }
    let sum: f64 = gated.iter().sum();
    let weights = if sum > 0.0 {
        gated.map(|w| w / sum)
    } else {
        priors
    };

    let group_quality = weighted_avg01(prior, quality);
    let min_s = clamp01(min_scale);
    let group_scale = (min_s + (1.0 - min_s) * group_quality).clamp(min_s, 1.0);

    Gate {
        weights: T::from_array(weights),
        group_quality,
        group_scale,
    }
}

/// Full score inside `[min_ok, max_ok]`, penalty outside, zero when absent.
pub fn score_range(value: Option<f64>, min_ok: f64, max_ok: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => {
            if v < min_ok || v > max_ok {
                OUT_OF_RANGE_QUALITY
            } else {
                1.0
            }
        }
        _ => 0.0,
    }
}

fn score_non_negative(value: Option<f64>) -> f64 {
    match value {
        None => 0.0,
        Some(v) if v >= 0.0 => 1.0,
        Some(_) => 0.2,
    }
}

/// Plausibility scoring for one epoch.
///
/// A caller quality map wins outright. Otherwise each channel is scored on its
/// physiological range and imputed channels are capped at their imputed quality.
pub fn assess(epoch: &Epoch, imputed: &ImputedChannels, baselines: &Baselines) -> ChannelQuality {
    if let Some(map) = &epoch.quality {
        return from_override(map);
    }

    let mut q = ChannelQuality {
        hr: score_range(epoch.hr_bpm, 30.0, 220.0),
        hrv: score_range(epoch.hrv_sdnn_ms, 5.0, 250.0),
        spo2: score_range(epoch.spo2_pct, 75.0, 100.0),
        rr: score_range(epoch.resp_rate_brpm, 6.0, 35.0),
        temp: score_range(epoch.wrist_temp_c, 30.0, 42.0),
        steps: score_non_negative(epoch.steps),
        energy: score_non_negative(epoch.active_energy_kcal),
        power: match epoch.power_w {
            None => 0.0,
            Some(p) if (0.0..=2000.0).contains(&p) => 1.0,
            Some(_) => 0.2,
        },
        som: if epoch.state_of_mind.is_some() { 1.0 } else { 0.0 },
    };

    for vital in Vital::ALL {
        if let Some(imp) = imputed.get(vital) {
            q.set_vital(vital, q.vital(vital).min(imp.quality));
        }
    }

    if let Some(days) = baselines.wrist_temp_baseline_days {
        if days.is_finite() && days < YOUNG_TEMP_BASELINE_DAYS && q.temp > 0.0 {
            q.temp = q.temp.min(YOUNG_TEMP_BASELINE_QUALITY_CAP);
        }
    }

    q
}

/// Caller map used verbatim; missing keys count as zero quality.
pub fn from_override(map: &QualityOverride) -> ChannelQuality {
    let get = |key: &str| map.get(key).copied().map(clamp01).unwrap_or(0.0);
    ChannelQuality {
        hr: get("hr"),
        hrv: get("hrv"),
        spo2: get("spo2"),
        rr: get("rr"),
        temp: get("temp"),
        steps: get("steps"),
        energy: get("energy"),
        power: get("power"),
        som: get("som"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImputedValue;

    #[test]
    fn test_gate_renormalizes_by_quality() {
        let prior = DrainTriple::new(0.15, 0.85, 0.0);
        let quality = DrainTriple::new(1.0, 0.0, 1.0);
        let gate = gate_weights(&prior, &quality, 0.25);
        assert_eq!(gate.weights, DrainTriple::new(1.0, 0.0, 0.0));
        assert!((gate.group_quality - 0.15).abs() < 1e-12);
        assert!((gate.group_scale - (0.25 + 0.75 * 0.15)).abs() < 1e-12);
    }

    #[test]
    fn test_gate_falls_back_to_priors_when_no_quality() {
        let prior = ChargeTriple::new(1.0, 0.0, 0.0);
        let gate = gate_weights(&prior, &ChargeTriple::default(), 0.25);
        assert_eq!(gate.weights, prior);
        assert_eq!(gate.group_quality, 0.0);
        assert_eq!(gate.group_scale, 0.25);
    }

    #[test]
    fn test_assess_scores_ranges() {
        let epoch = Epoch {
            hr_bpm: Some(250.0),
            hrv_sdnn_ms: Some(40.0),
            steps: Some(-1.0),
            power_w: Some(150.0),
            ..Default::default()
        };
        let q = assess(&epoch, &ImputedChannels::default(), &Baselines::default());
        assert_eq!(q.hr, OUT_OF_RANGE_QUALITY);
        assert_eq!(q.hrv, 1.0);
        assert_eq!(q.spo2, 0.0);
        assert_eq!(q.steps, 0.2);
        assert_eq!(q.power, 1.0);
        assert_eq!(q.som, 0.0);
    }

    #[test]
    fn test_override_used_verbatim() {
        let mut map = QualityOverride::new();
        map.insert("hr".to_string(), 0.4);
        map.insert("hrv".to_string(), 7.0);
        let epoch = Epoch {
            hr_bpm: Some(60.0),
            spo2_pct: Some(97.0),
            quality: Some(map),
            ..Default::default()
        };
        let q = assess(&epoch, &ImputedChannels::default(), &Baselines::default());
        assert_eq!(q.hr, 0.4);
        assert_eq!(q.hrv, 1.0);
        assert_eq!(q.spo2, 0.0);
    }

    #[test]
    fn test_imputed_and_young_temperature_caps() {
        let epoch = Epoch {
            hr_bpm: Some(55.0),
            wrist_temp_c: Some(36.6),
            ..Default::default()
        };
        let mut imputed = ImputedChannels::default();
        imputed.set(
            Vital::Hr,
            ImputedValue {
                value: 55.0,
                age_minutes: 5.0,
                quality: 0.53,
            },
        );
        let baselines = Baselines {
            wrist_temp_baseline_days: Some(2.0),
            ..Default::default()
        };
        let q = assess(&epoch, &imputed, &baselines);
        assert_eq!(q.hr, 0.53);
        assert_eq!(q.temp, YOUNG_TEMP_BASELINE_QUALITY_CAP);
    }
}
