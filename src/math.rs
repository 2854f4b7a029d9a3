//! Numeric primitives
//!
//! Every division and external boundary in the engine goes through these
//! helpers so that non-finite values never reach the reserve trajectory.

/// Scale factor turning a median absolute deviation into a normal-equivalent sigma.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Clamp `value` into `[min, max]`. Non-finite input maps to `min`.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return min;
    }
    value.max(min).min(max)
}

/// Clamp into `[0, 1]`.
pub fn clamp01(value: f64) -> f64 {
    clamp(value, 0.0, 1.0)
}

/// Rectified linear unit; non-finite input maps to 0.
pub fn relu(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.max(0.0)
}

/// Linear ramp from 0 at `start` to 1 at `full` (rising).
pub fn ramp_up01(value: f64, start: f64, full: f64) -> f64 {
    let s = clamp01(start);
    let f = clamp01(full);
    if f <= s {
        return if value >= s { 1.0 } else { 0.0 };
    }
    clamp01((value - s) / (f - s))
}

/// Linear ramp from 0 at `start` to 1 at `full`, where `full < start` (falling).
pub fn ramp_down01(value: f64, start: f64, full: f64) -> f64 {
    let s = clamp01(start);
    let f = clamp01(full);
    if s <= f {
        return if value <= s { 1.0 } else { 0.0 };
    }
    clamp01((s - value) / (s - f))
}

/// Unbounded linear ramp: 0 at `lo`, 1 at `hi`, clamped to `[0, 1]`.
pub fn ramp(value: f64, lo: f64, hi: f64) -> f64 {
    if hi <= lo {
        return if value >= hi { 1.0 } else { 0.0 };
    }
    clamp01((value - lo) / (hi - lo))
}

/// Map an arbitrary mood/stress reading onto `[0, 1]`.
///
/// Accepted scales, tried in order: 0..1, -1..1, 1..5 (Likert), 0..10, 0..100.
pub fn normalize_score01(raw: f64) -> Option<f64> {
    if !raw.is_finite() {
        return None;
    }
    if (0.0..=1.0).contains(&raw) {
        return Some(raw);
    }
    if (-1.0..=1.0).contains(&raw) {
        return Some(clamp01((raw + 1.0) / 2.0));
    }
    if (1.0..=5.0).contains(&raw) {
        return Some(clamp01((raw - 1.0) / 4.0));
    }
    if (0.0..=10.0).contains(&raw) {
        return Some(clamp01(raw / 10.0));
    }
    if (0.0..=100.0).contains(&raw) {
        return Some(clamp01(raw / 100.0));
    }
    None
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut xs: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    xs.sort_by(|a, b| a.total_cmp(b));
    xs
}

/// Median of the finite values, `None` when there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    let xs = sorted_finite(values);
    if xs.is_empty() {
        return None;
    }
    let mid = xs.len() / 2;
    if xs.len() % 2 == 1 {
        Some(xs[mid])
    } else {
        Some((xs[mid - 1] + xs[mid]) / 2.0)
    }
}

/// Median absolute deviation around `center` (unscaled).
pub fn mad(values: &[f64], center: f64) -> Option<f64> {
    if !center.is_finite() {
        return None;
    }
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - center).abs())
        .collect();
    median(&deviations)
}

/// Linear-interpolated quantile, `q` in `[0, 1]`.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let xs = sorted_finite(values);
    if xs.is_empty() {
        return None;
    }
    let pos = clamp01(q) * (xs.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(xs[lo] + (xs[hi] - xs[lo]) * frac)
}

/// Weighted mean of `(value, weight)` pairs, skipping non-positive weights.
pub fn weighted_mean(pairs: impl IntoIterator<Item = (f64, f64)>) -> Option<f64> {
    let mut sum = 0.0;
    let mut sum_w = 0.0;
    for (value, weight) in pairs {
        if !value.is_finite() || !weight.is_finite() || weight <= 0.0 {
            continue;
        }
        sum += value * weight;
        sum_w += weight;
    }
    if sum_w > 0.0 {
        Some(sum / sum_w)
    } else {
        None
    }
}

/// `(value - base) / scale`, `None` for a degenerate scale.
pub fn z_score(value: f64, base: f64, scale: f64) -> Option<f64> {
    if !value.is_finite() || !base.is_finite() || !scale.is_finite() || scale <= 0.0 {
        return None;
    }
    Some((value - base) / scale)
}

/// Seeded linear-congruential generator (Numerical Recipes constants).
///
/// Deterministic across platforms so a fixed seed reproduces training exactly.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(1_664_525)
            .wrapping_add(1_013_904_223);
        self.state
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }

    /// Uniform in `[lo, hi)`.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// In-place Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = (self.next_f64() * (i + 1) as f64) as usize;
            items.swap(i, j.min(i));
        }
    }
}
