//! Surrogate models for Bayesian optimization
//!
//! The Bayesian optimizer works against this small strategy trait so the
//! core never bakes in a specific numerical library. The default surrogate
//! is a Gaussian process with an RBF kernel over inputs normalized to the
//! unit box, solved with plain dense linear algebra.

use crate::errors::{OptimizerError, Result};

/// Posterior model over the encoded parameter box
pub trait Surrogate: Send {
    /// Fit to normalized inputs and their objective values
    fn fit(&mut self, inputs: &[Vec<f64>], targets: &[f64]) -> Result<()>;

    /// Posterior mean and standard deviation at one normalized point
    fn predict(&self, point: &[f64]) -> (f64, f64);
}

/// Gaussian process with a radial basis function kernel
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    /// Kernel length scale on the unit box
    length_scale: f64,
    /// Observation noise added on the kernel diagonal
    noise: f64,
    fitted: Option<Fitted>,
}

#[derive(Debug, Clone)]
struct Fitted {
    inputs: Vec<Vec<f64>>,
    k_inv: Vec<Vec<f64>>,
    alpha: Vec<f64>,
    signal_variance: f64,
    target_mean: f64,
}

impl GaussianProcess {
    pub fn new(length_scale: f64, noise: f64) -> Self {
        Self {
            length_scale,
            noise,
            fitted: None,
        }
    }

    fn kernel(&self, a: &[f64], b: &[f64], signal_variance: f64) -> f64 {
        let sq_dist: f64 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        signal_variance * (-sq_dist / (2.0 * self.length_scale * self.length_scale)).exp()
    }
}

impl Default for GaussianProcess {
    fn default() -> Self {
        // Length scale tuned for unit-box inputs
        Self::new(0.3, 1e-6)
    }
}

impl Surrogate for GaussianProcess {
    fn fit(&mut self, inputs: &[Vec<f64>], targets: &[f64]) -> Result<()> {
        if inputs.len() != targets.len() {
            return Err(OptimizerError::SurrogateFailed(format!(
                "{} inputs but {} targets",
                inputs.len(),
                targets.len()
            )));
        }
        if inputs.len() < 2 {
            return Err(OptimizerError::SurrogateFailed(
                "need at least two observations to fit".to_string(),
            ));
        }

        let n = targets.len();
        let target_mean = targets.iter().sum::<f64>() / n as f64;
        let centered: Vec<f64> = targets.iter().map(|y| y - target_mean).collect();
        let signal_variance = (centered.iter().map(|y| y * y).sum::<f64>() / n as f64).max(1e-6);

        let mut gram = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                gram[i][j] = self.kernel(&inputs[i], &inputs[j], signal_variance);
            }
            gram[i][i] += self.noise + 1e-10;
        }

        let k_inv = invert_matrix(&gram)?;
        let alpha = matrix_vector_multiply(&k_inv, &centered);

        self.fitted = Some(Fitted {
            inputs: inputs.to_vec(),
            k_inv,
            alpha,
            signal_variance,
            target_mean,
        });
        Ok(())
    }

    fn predict(&self, point: &[f64]) -> (f64, f64) {
        let fitted = match &self.fitted {
            Some(fitted) => fitted,
            None => return (0.0, 1.0),
        };

        let k_star: Vec<f64> = fitted
            .inputs
            .iter()
            .map(|x| self.kernel(point, x, fitted.signal_variance))
            .collect();

        let mean = fitted.target_mean + dot_product(&k_star, &fitted.alpha);

        let k_inv_k = matrix_vector_multiply(&fitted.k_inv, &k_star);
        let variance =
            (fitted.signal_variance + self.noise - dot_product(&k_star, &k_inv_k)).max(1e-12);

        (mean, variance.sqrt())
    }
}

/// Invert a square matrix by Gauss-Jordan elimination with partial pivoting
fn invert_matrix(matrix: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut aug = vec![vec![0.0; 2 * n]; n];

    for i in 0..n {
        aug[i][..n].copy_from_slice(&matrix[i]);
        aug[i][n + i] = 1.0;
    }

    for col in 0..n {
        // Pick the largest pivot in this column
        let mut pivot_row = col;
        for row in (col + 1)..n {
            if aug[row][col].abs() > aug[pivot_row][col].abs() {
                pivot_row = row;
            }
        }
        if aug[pivot_row][col].abs() < 1e-12 {
            return Err(OptimizerError::SurrogateFailed(
                "kernel matrix is singular or nearly singular".to_string(),
            ));
        }
        aug.swap(col, pivot_row);

        let pivot = aug[col][col];
        for value in aug[col].iter_mut() {
            *value /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..2 * n {
                aug[row][k] -= factor * aug[col][k];
            }
        }
    }

    Ok(aug.into_iter().map(|row| row[n..].to_vec()).collect())
}

fn matrix_vector_multiply(matrix: &[Vec<f64>], vector: &[f64]) -> Vec<f64> {
    matrix.iter().map(|row| dot_product(row, vector)).collect()
}

fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
