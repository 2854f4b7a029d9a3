//! Tiny feed-forward regressor
//!
//! One tanh hidden layer and a tanh output, trained with per-sample SGD on a
//! weighted squared error. All randomness comes from a caller-seeded [`Lcg`],
//! so a fixed seed reproduces the trained weights exactly.

use crate::math::Lcg;

/// One training example
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: Vec<f64>,
    pub target: f64,
    pub weight: f64,
}

/// SGD schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f64,
    pub learning_rate_decay: f64,
    pub l2: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mlp {
    inputs: usize,
    hidden: usize,
    /// Row-major `hidden x inputs`
    w1: Vec<f64>,
    b1: Vec<f64>,
    w2: Vec<f64>,
    b2: f64,
}

impl Mlp {
    /// Weights uniform in `±1/sqrt(fan_in)`, biases zero.
    pub fn new(inputs: usize, hidden: usize, rng: &mut Lcg) -> Self {
        let hidden = hidden.max(1);
        let r1 = 1.0 / (inputs.max(1) as f64).sqrt();
        let r2 = 1.0 / (hidden as f64).sqrt();
        let w1 = (0..hidden * inputs).map(|_| rng.uniform(-r1, r1)).collect();
        let w2 = (0..hidden).map(|_| rng.uniform(-r2, r2)).collect();
        Self {
            inputs,
            hidden,
            w1,
            b1: vec![0.0; hidden],
            w2,
            b2: 0.0,
        }
    }

    pub fn hidden_units(&self) -> usize {
        self.hidden
    }

    fn forward(&self, x: &[f64], h: &mut [f64]) -> f64 {
        let mut out = self.b2;
        for j in 0..self.hidden {
            let row = &self.w1[j * self.inputs..(j + 1) * self.inputs];
            let z: f64 = row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + self.b1[j];
            h[j] = z.tanh();
            out += self.w2[j] * h[j];
        }
        out.tanh()
    }

    /// Prediction in `(-1, 1)`.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut h = vec![0.0; self.hidden];
        self.forward(x, &mut h)
    }

    /// Train in place; returns the weighted mean loss of the final epoch.
    pub fn train(&mut self, samples: &[Sample], opts: &TrainOptions, rng: &mut Lcg) -> Option<f64> {
        if samples.is_empty() || opts.epochs == 0 {
            return None;
        }

        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut h = vec![0.0; self.hidden];
        let mut final_loss = None;
        let mut lr = opts.learning_rate;

        for _ in 0..opts.epochs {
            rng.shuffle(&mut order);
            let mut loss_sum = 0.0;
            let mut weight_sum = 0.0;

            for &k in &order {
                let s = &samples[k];
                let w = if s.weight.is_finite() { s.weight.max(0.0) } else { 0.0 };
                if w <= 0.0 {
                    continue;
                }

                let y = self.forward(&s.features, &mut h);
                let err = y - s.target;
                loss_sum += w * err * err;
                weight_sum += w;

                // d(w/2 * err^2) through the output tanh
                let g = w * err * (1.0 - y * y);
                for j in 0..self.hidden {
                    let gh = g * self.w2[j] * (1.0 - h[j] * h[j]);
                    self.w2[j] -= lr * (g * h[j] + opts.l2 * self.w2[j]);
                    let row = &mut self.w1[j * self.inputs..(j + 1) * self.inputs];
                    for (wi, xi) in row.iter_mut().zip(&s.features) {
                        *wi -= lr * (gh * xi + opts.l2 * *wi);
                    }
                    self.b1[j] -= lr * gh;
                }
                self.b2 -= lr * g;
            }

            if weight_sum > 0.0 {
                final_loss = Some(loss_sum / weight_sum);
            }
            lr *= opts.learning_rate_decay;
        }

        final_loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> TrainOptions {
        TrainOptions {
            epochs: 200,
            learning_rate: 0.1,
            learning_rate_decay: 0.99,
            l2: 0.0,
        }
    }

    fn line_samples() -> Vec<Sample> {
        (0..40)
            .map(|i| {
                let x = -1.0 + i as f64 / 20.0;
                Sample {
                    features: vec![1.0, x],
                    target: 0.5 * x,
                    weight: 1.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_learns_a_line() {
        let mut rng = Lcg::new(7);
        let mut net = Mlp::new(2, 4, &mut rng);
        let samples = line_samples();
        let loss = net.train(&samples, &opts(), &mut rng).expect("trained");
        assert!(loss < 0.01, "loss {loss}");
        assert!((net.predict(&[1.0, 0.5]) - 0.25).abs() < 0.1);
    }

    #[test]
    fn test_same_seed_same_weights() {
        let samples = line_samples();
        let run = |seed: u32| {
            let mut rng = Lcg::new(seed);
            let mut net = Mlp::new(2, 3, &mut rng);
            net.train(&samples, &opts(), &mut rng);
            net
        };
        assert_eq!(run(1337), run(1337));
        assert_ne!(run(1337), run(1338));
    }

    #[test]
    fn test_no_samples_no_loss() {
        let mut rng = Lcg::new(1);
        let mut net = Mlp::new(3, 2, &mut rng);
        assert_eq!(net.train(&[], &opts(), &mut rng), None);
        assert_eq!(net.hidden_units(), 2);
    }
}
