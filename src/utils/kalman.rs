use log::trace;
use nalgebra::{DMatrix, SMatrix, SVector, SymmetricEigen};

/// Constant-velocity point filter in 3D
pub mod kalman_3d_point;

/// Smallest eigenvalue a repaired covariance is allowed to keep
pub const COVARIANCE_EIGEN_FLOOR: f64 = 1e-12;

/// Innovation covariances whose Cholesky factor has a smaller ratio of the least to the largest
/// diagonal entry are treated as singular. The ratio does not depend on the measurement units.
pub const SINGULAR_TOLERANCE: f64 = 1e-8;

macro_rules! pretty_print {
    ($arr:expr) => {{
        let indent = 4;
        let prefix = " ".repeat(indent);
        let mut result_els = vec!["".to_string()];
        for i in 0..$arr.nrows() {
            let mut row_els = vec![];
            for j in 0..$arr.ncols() {
                row_els.push(format!("{:12.5}", $arr[(i, j)]));
            }
            let row_str = row_els.into_iter().collect::<Vec<_>>().join(" ");
            let row_str = format!("{}{}", prefix, row_str);
            result_els.push(row_str);
        }
        result_els.into_iter().collect::<Vec<_>>().join("\n")
    }};
}

/// Gaussian estimate kept by a Kalman filter
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanState<const X: usize> {
    pub mean: SVector<f64, X>,
    pub covariance: SMatrix<f64, X, X>,
}

impl<const X: usize> KalmanState<X> {
    pub fn new(mean: SVector<f64, X>, covariance: SMatrix<f64, X, X>) -> Self {
        Self { mean, covariance }
    }

    pub fn dump(&self) {
        trace!("Mean={}", pretty_print!(self.mean.transpose()));
        trace!("Covariance={}", pretty_print!(self.covariance));
    }

    /// The smallest eigenvalue of the (symmetrized) covariance
    ///
    pub fn min_eigenvalue(&self) -> f64 {
        let sym = (self.covariance + self.covariance.transpose()) * 0.5;
        SymmetricEigen::new(DMatrix::from_column_slice(X, X, sym.as_slice()))
            .eigenvalues
            .min()
    }
}

/// Forces a covariance to be symmetric positive semi-definite.
///
/// The matrix is symmetrized first. If it still does not factorize, it is decomposed and every
/// eigenvalue below [`COVARIANCE_EIGEN_FLOOR`] is lifted to the floor.
///
pub fn enforce_psd<const X: usize>(covariance: SMatrix<f64, X, X>) -> SMatrix<f64, X, X> {
    let sym = (covariance + covariance.transpose()) * 0.5;
    if sym.cholesky().is_some() {
        return sym;
    }

    // static dimensions can't be decomposed generically, so go through a dynamic matrix
    let mut eigen = SymmetricEigen::new(DMatrix::from_column_slice(X, X, sym.as_slice()));
    eigen
        .eigenvalues
        .apply(|e| *e = e.max(COVARIANCE_EIGEN_FLOOR));
    let repaired = SMatrix::<f64, X, X>::from_column_slice(eigen.recompose().as_slice());
    (repaired + repaired.transpose()) * 0.5
}

/// Checks that a prior covariance is symmetric positive definite
///
pub fn is_positive_definite<const X: usize>(covariance: &SMatrix<f64, X, X>) -> bool {
    let asymmetry = (covariance - covariance.transpose()).abs().max();
    asymmetry <= crate::EPS * covariance.abs().max().max(1.0) && covariance.cholesky().is_some()
}
