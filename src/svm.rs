//! Linear SVM with Platt-scaled probabilities.
//!
//! Training solves the L1-loss dual with coordinate descent over a randomly
//! permuted sample order, treating the bias as an extra constant feature. The
//! sigmoid is fitted on held-out decision values from an internal 5-fold split
//! of the training rows, with the Newton method and backtracking line search
//! described by Lin, Lin and Weng (2007).

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::classifier::{Classifier, Trainer, GENUINE};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmParams {
    /// Penalty on margin violations.
    pub c: f64,
    /// Stop once the projected-gradient spread drops below this.
    pub tolerance: f64,
    pub max_iter: usize,
    /// Seed for the coordinate visiting order.
    pub seed: u64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            tolerance: 0.1,
            max_iter: 1000,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinearSvm {
    pub params: SvmParams,
}

impl LinearSvm {
    pub fn new(params: SvmParams) -> Self {
        Self { params }
    }
}

#[derive(Debug, Clone)]
pub struct LinearSvmModel {
    weights: Array1<f64>,
    bias: f64,
    sigmoid: Sigmoid,
}

impl LinearSvmModel {
    /// Signed distance-like score, positive on the genuine side.
    pub fn decision_value(&self, x: ArrayView1<'_, f64>) -> f64 {
        self.weights.dot(&x) + self.bias
    }
}

impl Classifier for LinearSvmModel {
    fn genuine_probability(&self, features: ArrayView2<'_, f64>) -> Vec<f64> {
        features
            .outer_iter()
            .map(|row| self.sigmoid.probability(self.decision_value(row)))
            .collect()
    }
}

/// Folds used to collect held-out decision values for the sigmoid.
const CALIBRATION_FOLDS: usize = 5;

impl LinearSvm {
    /// Dual coordinate descent; returns the weights and bias.
    fn solve(&self, features: ArrayView2<'_, f64>, y: &[f64], rng: &mut StdRng) -> (Array1<f64>, f64) {
        let SvmParams {
            c,
            tolerance,
            max_iter,
            ..
        } = self.params;
        let n = features.nrows();
        let diag: Vec<f64> = features
            .outer_iter()
            .map(|row| row.dot(&row) + 1.0)
            .collect();
        let mut alpha = vec![0.0; n];
        let mut weights = Array1::<f64>::zeros(features.ncols());
        let mut bias = 0.0;
        let mut order: Vec<usize> = (0..n).collect();

        let mut converged = false;
        for iter in 0..max_iter {
            order.shuffle(rng);
            let mut pg_max = f64::NEG_INFINITY;
            let mut pg_min = f64::INFINITY;

            for &i in &order {
                let row = features.row(i);
                let g = y[i] * (weights.dot(&row) + bias) - 1.0;
                let pg = if alpha[i] <= 0.0 {
                    g.min(0.0)
                } else if alpha[i] >= c {
                    g.max(0.0)
                } else {
                    g
                };
                pg_max = pg_max.max(pg);
                pg_min = pg_min.min(pg);

                if pg.abs() > 1e-12 {
                    let old = alpha[i];
                    alpha[i] = (old - g / diag[i]).clamp(0.0, c);
                    let step = (alpha[i] - old) * y[i];
                    weights.scaled_add(step, &row);
                    bias += step;
                }
            }

            if pg_max - pg_min <= tolerance {
                log::trace!("svm converged after {} iterations", iter + 1);
                converged = true;
                break;
            }
        }
        if !converged {
            log::debug!("svm reached max_iter={} before converging", max_iter);
        }
        (weights, bias)
    }

    /// Decision value of every row from a model that did not see it.
    ///
    /// Rows are shuffled and split into up to [`CALIBRATION_FOLDS`] parts. A
    /// part whose complement holds a single class gets +1 or -1 for all its
    /// rows instead of a trained model.
    fn held_out_decisions(
        &self,
        features: ArrayView2<'_, f64>,
        y: &[f64],
        rng: &mut StdRng,
    ) -> Vec<f64> {
        let n = y.len();
        let folds = CALIBRATION_FOLDS.min(n);
        let mut perm: Vec<usize> = (0..n).collect();
        perm.shuffle(rng);

        let mut decisions = vec![0.0; n];
        for k in 0..folds {
            let (begin, end) = (k * n / folds, (k + 1) * n / folds);
            let test = &perm[begin..end];
            let train: Vec<usize> = perm[..begin].iter().chain(&perm[end..]).copied().collect();
            let sub_y: Vec<f64> = train.iter().map(|&i| y[i]).collect();
            let genuine = sub_y.iter().filter(|&&v| v > 0.0).count();

            if genuine > 0 && genuine < sub_y.len() {
                let sub_x = features.select(Axis(0), &train);
                let (w, b) = self.solve(sub_x.view(), &sub_y, rng);
                for &i in test {
                    decisions[i] = w.dot(&features.row(i)) + b;
                }
            } else {
                let fill = match (genuine, sub_y.len()) {
                    (0, 0) => 0.0,
                    (0, _) => -1.0,
                    _ => 1.0,
                };
                for &i in test {
                    decisions[i] = fill;
                }
            }
        }
        decisions
    }
}

impl Trainer for LinearSvm {
    type Model = LinearSvmModel;

    fn fit(&self, features: ArrayView2<'_, f64>, labels: &[u8]) -> Result<LinearSvmModel> {
        let n = features.nrows();
        if n == 0 || n != labels.len() {
            return Err(Error::Fit(format!(
                "{} rows but {} labels",
                n,
                labels.len()
            )));
        }
        let y: Vec<f64> = labels
            .iter()
            .map(|&l| if l == GENUINE { 1.0 } else { -1.0 })
            .collect();
        let genuine = y.iter().filter(|&&v| v > 0.0).count();
        if genuine == 0 || genuine == n {
            return Err(Error::Fit(
                "training labels contain a single class".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let decisions = self.held_out_decisions(features, &y, &mut rng);
        let sigmoid = Sigmoid::fit(&decisions, &y);
        let (weights, bias) = self.solve(features, &y, &mut rng);

        Ok(LinearSvmModel {
            weights,
            bias,
            sigmoid,
        })
    }
}

/// P(genuine | f) = 1 / (1 + exp(a * f + b)).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sigmoid {
    pub a: f64,
    pub b: f64,
}

impl Sigmoid {
    const MAX_ITER: usize = 100;
    const MIN_STEP: f64 = 1e-10;
    const SIGMA: f64 = 1e-12;
    const EPS: f64 = 1e-5;

    /// Fit on decision values `f` with targets `y` in {+1, -1}.
    pub fn fit(f: &[f64], y: &[f64]) -> Self {
        let prior1 = y.iter().filter(|&&v| v > 0.0).count() as f64;
        let prior0 = y.len() as f64 - prior1;
        let hi = (prior1 + 1.0) / (prior1 + 2.0);
        let lo = 1.0 / (prior0 + 2.0);
        let t: Vec<f64> = y.iter().map(|&v| if v > 0.0 { hi } else { lo }).collect();

        let objective = |a: f64, b: f64| -> f64 {
            f.iter()
                .zip(&t)
                .map(|(&fi, &ti)| {
                    let z = fi * a + b;
                    if z >= 0.0 {
                        ti * z + (-z).exp().ln_1p()
                    } else {
                        (ti - 1.0) * z + z.exp().ln_1p()
                    }
                })
                .sum()
        };

        let mut a = 0.0;
        let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
        let mut fval = objective(a, b);

        for _ in 0..Self::MAX_ITER {
            let (mut h11, mut h22, mut h21) = (Self::SIGMA, Self::SIGMA, 0.0);
            let (mut g1, mut g2) = (0.0, 0.0);
            for (&fi, &ti) in f.iter().zip(&t) {
                let z = fi * a + b;
                let (p, q) = if z >= 0.0 {
                    let e = (-z).exp();
                    (e / (1.0 + e), 1.0 / (1.0 + e))
                } else {
                    let e = z.exp();
                    (1.0 / (1.0 + e), e / (1.0 + e))
                };
                let d2 = p * q;
                h11 += fi * fi * d2;
                h22 += d2;
                h21 += fi * d2;
                let d1 = ti - p;
                g1 += fi * d1;
                g2 += d1;
            }
            if g1.abs() < Self::EPS && g2.abs() < Self::EPS {
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let da = -(h22 * g1 - h21 * g2) / det;
            let db = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * da + g2 * db;

            let mut step = 1.0;
            while step >= Self::MIN_STEP {
                let (na, nb) = (a + step * da, b + step * db);
                let nf = objective(na, nb);
                if nf < fval + 1e-4 * step * gd {
                    a = na;
                    b = nb;
                    fval = nf;
                    break;
                }
                step /= 2.0;
            }
            if step < Self::MIN_STEP {
                log::debug!("platt scaling line search failed");
                break;
            }
        }

        Self { a, b }
    }

    pub fn probability(&self, decision: f64) -> f64 {
        let z = decision * self.a + self.b;
        if z >= 0.0 {
            let e = (-z).exp();
            e / (1.0 + e)
        } else {
            1.0 / (1.0 + z.exp())
        }
    }
}
