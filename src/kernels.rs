//! Covariance kernels for Gaussian-process surrogate models.
//!
//! These are direct closed-form covariance functions consumed by the
//! external model trainer: given two feature matrices of shapes (n, d) and
//! (m, d) they produce the (n, m) covariance matrix. Two kernels are
//! provided:
//!
//! - [`PeriodicKernel`]: for features with a known period
//! - [`RbfCyclic`]: squared-exponential with wrap-around correction for the
//!   cyclic phi-angle features
//!
//! Both kernels accept an optional active-dimensions subset so a single
//! training feature matrix can be shared by several independently
//! parameterised kernels covering disjoint dimension sets; the additive or
//! product composition happens in the consumer.
//!
//! There is no validation of hyperparameters: a zero lengthscale produces
//! NaN entries which propagate to the caller.

use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

/// Common surface of all covariance kernels.
///
/// `k` is the pairwise covariance; the two convenience methods are the
/// usual train/test aliases and always delegate to `k`.
pub trait Kernel {
    /// Covariance matrix of shape (n, m) for feature matrices of shapes
    /// (n, d) and (m, d).
    fn k(&self, x1: &DMatrix<f64>, x2: &DMatrix<f64>) -> DMatrix<f64>;

    /// Test/train covariance K(X*, X).
    fn cross_covariance(&self, x_test: &DMatrix<f64>, x_train: &DMatrix<f64>) -> DMatrix<f64> {
        self.k(x_test, x_train)
    }

    /// Symmetric train/train covariance K(X, X).
    fn train_covariance(&self, x_train: &DMatrix<f64>) -> DMatrix<f64> {
        self.k(x_train, x_train)
    }
}

/// True for feature columns holding phi angles.
///
/// In the feature layout used here every third column from index 5 onwards
/// is an azimuthal phi angle: index > 2 and (index + 1) divisible by 3.
pub fn is_phi_dimension(dim_idx: usize) -> bool {
    dim_idx > 2 && (dim_idx + 1) % 3 == 0
}

/// Resolve the set of participating columns: the explicit subset when one
/// was given, otherwise all `n_dims` columns.
fn resolve_dims(active_dims: Option<&[usize]>, n_dims: usize) -> Vec<usize> {
    match active_dims {
        Some(dims) => dims.to_vec(),
        None => (0..n_dims).collect(),
    }
}

/// Periodic covariance kernel.
///
/// Parameterised by a per-dimension precision `theta` (inverse squared
/// lengthscale) and a per-dimension period length. Both parameter vectors
/// are aligned with the active-dimension subset, not with the full feature
/// matrix.
#[derive(Debug, Clone)]
pub struct PeriodicKernel {
    // Stored pre-doubled; the effective lengthscale is sqrt(1 / (2 theta)).
    thetas: DVector<f64>,
    period_length: DVector<f64>,
    active_dims: Option<Vec<usize>>,
}

impl PeriodicKernel {
    /// Create a periodic kernel from per-dimension precisions and periods.
    pub fn new(
        thetas: DVector<f64>,
        period_length: DVector<f64>,
        active_dims: Option<Vec<usize>>,
    ) -> Self {
        Self {
            thetas: thetas * 2.0,
            period_length,
            active_dims,
        }
    }

    /// The stored (doubled) precisions and the period lengths.
    pub fn params(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.thetas, &self.period_length)
    }
}

impl Kernel for PeriodicKernel {
    fn k(&self, x1: &DMatrix<f64>, x2: &DMatrix<f64>) -> DMatrix<f64> {
        let dims = resolve_dims(self.active_dims.as_deref(), x1.ncols());
        let true_lengthscales: Vec<f64> =
            self.thetas.iter().map(|&t| (1.0 / t).sqrt()).collect();

        let mut res = DMatrix::zeros(x1.nrows(), x2.nrows());
        for i in 0..x1.nrows() {
            for j in 0..x2.nrows() {
                let mut acc = 0.0;
                for (p, &dim) in dims.iter().enumerate() {
                    let diff = PI * (x1[(i, dim)] - x2[(j, dim)]) / self.period_length[p];
                    acc += diff.sin().powi(2) / true_lengthscales[p];
                }
                res[(i, j)] = (-2.0 * acc).exp();
            }
        }
        res
    }
}

/// Radial basis function kernel with cyclic correction for phi features.
///
/// The per-dimension distance for a phi column is wrapped back into
/// `[0, pi]`: a raw separation d greater than pi becomes `2 pi - d`. All
/// other columns use the plain absolute difference. Each distance is then
/// divided by its lengthscale and squared before accumulation.
///
/// Lengthscales are aligned with the active-dimension subset; the phi test
/// always uses the real column index of the feature matrix.
#[derive(Debug, Clone)]
pub struct RbfCyclic {
    lengthscale: DVector<f64>,
    active_dims: Option<Vec<usize>>,
}

impl RbfCyclic {
    /// Create a cyclic RBF kernel from per-dimension lengthscales.
    pub fn new(lengthscale: DVector<f64>, active_dims: Option<Vec<usize>>) -> Self {
        Self {
            lengthscale,
            active_dims,
        }
    }

    /// The per-dimension lengthscales.
    pub fn params(&self) -> &DVector<f64> {
        &self.lengthscale
    }
}

impl Kernel for RbfCyclic {
    fn k(&self, x1: &DMatrix<f64>, x2: &DMatrix<f64>) -> DMatrix<f64> {
        let dims = resolve_dims(self.active_dims.as_deref(), x1.ncols());

        let mut res = DMatrix::zeros(x1.nrows(), x2.nrows());
        for i in 0..x1.nrows() {
            for j in 0..x2.nrows() {
                let mut acc = 0.0;
                for (p, &dim) in dims.iter().enumerate() {
                    let mut dist = (x1[(i, dim)] - x2[(j, dim)]).abs();
                    if is_phi_dimension(dim) && dist > PI {
                        dist = 2.0 * PI - dist;
                    }
                    let scaled = dist / self.lengthscale[p];
                    acc += scaled * scaled;
                }
                res[(i, j)] = (-0.5 * acc).exp();
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(n: usize) -> DVector<f64> {
        DVector::from_element(n, 1.0)
    }

    #[test]
    fn phi_dimensions_follow_feature_layout() {
        assert!(!is_phi_dimension(0));
        assert!(!is_phi_dimension(2));
        assert!(is_phi_dimension(5));
        assert!(is_phi_dimension(8));
        assert!(!is_phi_dimension(6));
    }

    #[test]
    fn periodic_train_covariance_is_symmetric_with_unit_diagonal() {
        let x = DMatrix::from_row_slice(3, 2, &[0.1, 0.4, 1.3, -0.2, 2.2, 0.9]);
        let kernel = PeriodicKernel::new(ones(2), DVector::from_element(2, 2.0 * PI), None);
        let cov = kernel.train_covariance(&x);
        for i in 0..3 {
            assert!((cov[(i, i)] - 1.0).abs() < 1e-12);
            for j in 0..3 {
                assert!((cov[(i, j)] - cov[(j, i)]).abs() < 1e-12);
                assert!(cov[(i, j)] > 0.0);
            }
        }
    }

    #[test]
    fn periodic_matches_closed_form_for_single_pair() {
        let x1 = DMatrix::from_row_slice(1, 1, &[0.25]);
        let x2 = DMatrix::from_row_slice(1, 1, &[1.75]);
        let theta = 0.5;
        let period = 2.0;
        let kernel = PeriodicKernel::new(
            DVector::from_element(1, theta),
            DVector::from_element(1, period),
            None,
        );
        let cov = kernel.k(&x1, &x2);

        let true_lengthscale = (1.0 / (2.0 * theta)).sqrt();
        let diff = PI * (0.25 - 1.75) / period;
        let expected = (-2.0 * diff.sin().powi(2) / true_lengthscale).exp();
        assert!((cov[(0, 0)] - expected).abs() < 1e-12);
    }

    #[test]
    fn cyclic_rbf_wraps_phi_distances() {
        // Six columns so that column 5 is a phi feature. Raw separation of
        // 3 pi / 2 in the phi column must be corrected to pi / 2.
        let mut a = vec![0.0; 6];
        let mut b = vec![0.0; 6];
        a[5] = 3.0 * PI / 2.0;
        b[5] = 0.0;
        let x1 = DMatrix::from_row_slice(1, 6, &a);
        let x2 = DMatrix::from_row_slice(1, 6, &b);

        let kernel = RbfCyclic::new(ones(6), None);
        let cov = kernel.k(&x1, &x2);

        let corrected = PI / 2.0;
        let expected = (-0.5 * corrected * corrected).exp();
        assert!((cov[(0, 0)] - expected).abs() < 1e-12);

        // The uncorrected Euclidean value would be noticeably smaller.
        let uncorrected = (-0.5 * (3.0 * PI / 2.0) * (3.0 * PI / 2.0)).exp();
        assert!((cov[(0, 0)] - uncorrected).abs() > 1e-3);
    }

    #[test]
    fn cyclic_rbf_non_phi_distance_is_not_wrapped() {
        // Column 0 is never a phi feature so a separation above pi stands.
        let x1 = DMatrix::from_row_slice(1, 1, &[0.0]);
        let x2 = DMatrix::from_row_slice(1, 1, &[4.0]);
        let kernel = RbfCyclic::new(ones(1), None);
        let cov = kernel.k(&x1, &x2);
        assert!((cov[(0, 0)] - (-0.5 * 16.0_f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn active_dims_restrict_participating_columns() {
        let x1 = DMatrix::from_row_slice(1, 3, &[0.0, 10.0, 1.0]);
        let x2 = DMatrix::from_row_slice(1, 3, &[0.0, -10.0, 2.0]);

        // Only column 2 participates; lengthscale vector aligns with it.
        let kernel = RbfCyclic::new(ones(1), Some(vec![2]));
        let cov = kernel.k(&x1, &x2);
        assert!((cov[(0, 0)] - (-0.5_f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn cross_covariance_aliases_k() {
        let x_train = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let x_test = DMatrix::from_row_slice(1, 1, &[0.5]);
        let kernel = RbfCyclic::new(ones(1), None);
        assert_eq!(
            kernel.cross_covariance(&x_test, &x_train),
            kernel.k(&x_test, &x_train)
        );
        assert_eq!(
            kernel.train_covariance(&x_train),
            kernel.k(&x_train, &x_train)
        );
    }
}
