//! Gaussian-process surrogate and expected-improvement acquisition
//!
//! Inputs live on the unit hypercube. Targets are standardised before fitting
//! and predictions are mapped back to the original scale.

use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Length-scales tried when maximising the log marginal likelihood
const LENGTH_SCALES: [f64; 8] = [0.05, 0.1, 0.2, 0.3, 0.5, 0.8, 1.2, 2.0];

/// Observation noise on standardised targets
const NOISE: f64 = 1e-4;

const MAX_JITTER_RETRIES: usize = 5;

/// Squared-exponential kernel with unit signal variance
fn rbf(a: &[f64], b: &[f64], length_scale: f64) -> f64 {
    let sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    (-0.5 * sq / (length_scale * length_scale)).exp()
}

/// Lower-triangular Cholesky factor, `None` if the matrix is not positive definite
fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let diag = matrix[i][i] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[i][j] = diag.sqrt();
            } else {
                l[i][j] = (matrix[i][j] - sum) / l[j][j];
            }
        }
    }
    Some(l)
}

/// Solve `L x = b` for lower-triangular `L`
fn solve_lower(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in 0..n {
        let sum: f64 = (0..i).map(|k| l[i][k] * x[k]).sum();
        x[i] = (b[i] - sum) / l[i][i];
    }
    x
}

/// Solve `L^T x = b` for lower-triangular `L`
fn solve_upper(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|k| l[k][i] * x[k]).sum();
        x[i] = (b[i] - sum) / l[i][i];
    }
    x
}

struct Factorisation {
    chol: Vec<Vec<f64>>,
    alpha: Vec<f64>,
    log_likelihood: f64,
}

fn factorise(x: &[Vec<f64>], y: &[f64], length_scale: f64) -> Option<Factorisation> {
    let n = x.len();
    let mut jitter = NOISE;

    for _ in 0..MAX_JITTER_RETRIES {
        let k: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| {
                        let v = rbf(&x[i], &x[j], length_scale);
                        if i == j {
                            v + jitter
                        } else {
                            v
                        }
                    })
                    .collect()
            })
            .collect();

        if let Some(chol) = cholesky(&k) {
            let alpha = solve_upper(&chol, &solve_lower(&chol, y));
            let data_fit: f64 = y.iter().zip(&alpha).map(|(a, b)| a * b).sum();
            let log_det: f64 = (0..n).map(|i| chol[i][i].ln()).sum();
            let log_likelihood = -0.5 * data_fit
                - log_det
                - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();
            return Some(Factorisation {
                chol,
                alpha,
                log_likelihood,
            });
        }
        jitter *= 10.0;
    }
    None
}

/// Fitted Gaussian-process regressor
pub struct GaussianProcess {
    x: Vec<Vec<f64>>,
    chol: Vec<Vec<f64>>,
    alpha: Vec<f64>,
    length_scale: f64,
    y_mean: f64,
    y_std: f64,
}

impl GaussianProcess {
    /// Fit on `(x, y)` choosing the length-scale with the best marginal likelihood.
    ///
    /// Returns `None` for empty input or when no kernel matrix could be factorised.
    pub fn fit(x: &[Vec<f64>], y: &[f64]) -> Option<Self> {
        if x.is_empty() || x.len() != y.len() {
            return None;
        }

        let n = y.len() as f64;
        let y_mean = y.iter().sum::<f64>() / n;
        let variance = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n;
        let y_std = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        let y_norm: Vec<f64> = y.iter().map(|v| (v - y_mean) / y_std).collect();

        let mut best: Option<(f64, Factorisation)> = None;
        for &ls in &LENGTH_SCALES {
            if let Some(f) = factorise(x, &y_norm, ls) {
                let better = match &best {
                    Some((_, b)) => f.log_likelihood > b.log_likelihood,
                    None => true,
                };
                if better {
                    best = Some((ls, f));
                }
            }
        }

        let (length_scale, fact) = best?;
        Some(GaussianProcess {
            x: x.to_vec(),
            chol: fact.chol,
            alpha: fact.alpha,
            length_scale,
            y_mean,
            y_std,
        })
    }

    pub fn length_scale(&self) -> f64 {
        self.length_scale
    }

    /// Posterior mean and standard deviation at `point`
    pub fn predict(&self, point: &[f64]) -> (f64, f64) {
        let k_star: Vec<f64> = self
            .x
            .iter()
            .map(|xi| rbf(xi, point, self.length_scale))
            .collect();

        let mean: f64 = k_star.iter().zip(&self.alpha).map(|(a, b)| a * b).sum();
        let v = solve_lower(&self.chol, &k_star);
        let variance = (1.0 - v.iter().map(|x| x * x).sum::<f64>()).max(0.0);

        (
            self.y_mean + mean * self.y_std,
            variance.sqrt() * self.y_std,
        )
    }
}

/// Expected improvement over `best` for a maximisation problem
pub fn expected_improvement(mean: f64, std: f64, best: f64, xi: f64) -> f64 {
    let improvement = mean - best - xi;
    if std <= 1e-12 {
        return improvement.max(0.0);
    }
    let normal = match Normal::new(0.0, 1.0) {
        Ok(n) => n,
        Err(_) => return improvement.max(0.0),
    };
    let z = improvement / std;
    improvement * normal.cdf(z) + std * normal.pdf(z)
}
