use crate::utils::kalman::{enforce_psd, KalmanState, SINGULAR_TOLERANCE};
use crate::Errors;
use nalgebra::{Cholesky, Matrix3, SMatrix, SVector, Vector3, U3};
use std::f64::consts::PI;

pub const DIM_3D_POINT: usize = 3;
pub const DIM_3D_POINT_X2: usize = DIM_3D_POINT * 2;

pub type PointState = KalmanState<DIM_3D_POINT_X2>;
pub type StateMatrix = SMatrix<f64, DIM_3D_POINT_X2, DIM_3D_POINT_X2>;
pub type StateVector = SVector<f64, DIM_3D_POINT_X2>;
pub type MeasurementMatrix = SMatrix<f64, DIM_3D_POINT, DIM_3D_POINT_X2>;

/// Innovation of a single measurement against a predicted state
///
#[derive(Debug, Clone)]
pub struct Innovation {
    /// `z - H m`
    pub residual: Vector3<f64>,
    /// `H P H' + R` (plus the regularization, if any)
    pub covariance: Matrix3<f64>,
    /// Gaussian density of the residual under `covariance`
    pub likelihood: f64,
    cholesky: Cholesky<f64, U3>,
}

impl Innovation {
    /// Squared Mahalanobis distance of the residual
    ///
    pub fn mahalanobis(&self) -> f64 {
        let l = self.cholesky.l();
        match l.solve_lower_triangular(&self.residual) {
            Some(z) => z.norm_squared(),
            None => f64::INFINITY,
        }
    }
}

/// Kalman filter for a point moving with constant velocity in 3D.
///
/// The state is `[x, y, z, vx, vy, vz]`, the measurement is the position `[x, y, z]`. The
/// process noise is the continuous white-acceleration model with spectral density `q`, so a zero
/// time step neither moves the mean nor inflates the covariance.
///
#[derive(Debug, Clone)]
pub struct Point3DKalmanFilter {
    update_matrix: MeasurementMatrix,
    measurement_noise: Matrix3<f64>,
    process_noise_density: f64,
}

impl Default for Point3DKalmanFilter {
    fn default() -> Self {
        Point3DKalmanFilter::new(1e-3, Matrix3::from_diagonal_element(0.01))
    }
}

impl Point3DKalmanFilter {
    pub fn new(process_noise_density: f64, measurement_noise: Matrix3<f64>) -> Self {
        let mut update_matrix = MeasurementMatrix::zeros();
        for i in 0..DIM_3D_POINT {
            update_matrix[(i, i)] = 1.0;
        }

        Point3DKalmanFilter {
            update_matrix,
            measurement_noise,
            process_noise_density,
        }
    }

    pub fn update_matrix(&self) -> &MeasurementMatrix {
        &self.update_matrix
    }

    pub fn measurement_noise(&self) -> &Matrix3<f64> {
        &self.measurement_noise
    }

    /// Transition matrix `A(dt)`: position += velocity * dt
    ///
    pub fn motion_matrix(&self, dt: f64) -> StateMatrix {
        let mut motion_matrix = StateMatrix::identity();
        for i in 0..DIM_3D_POINT {
            motion_matrix[(i, DIM_3D_POINT + i)] = dt;
        }
        motion_matrix
    }

    /// Process noise `Q(dt)` of the white-acceleration model
    ///
    pub fn process_noise(&self, dt: f64) -> StateMatrix {
        let q = self.process_noise_density;
        let (pp, pv, vv) = (q * dt.powi(3) / 3.0, q * dt.powi(2) / 2.0, q * dt);
        let mut motion_cov = StateMatrix::zeros();
        for i in 0..DIM_3D_POINT {
            let j = DIM_3D_POINT + i;
            motion_cov[(i, i)] = pp;
            motion_cov[(i, j)] = pv;
            motion_cov[(j, i)] = pv;
            motion_cov[(j, j)] = vv;
        }
        motion_cov
    }

    /// Seeds a state at the measured position with the prior velocity and covariance
    ///
    pub fn initiate(&self, p: &Vector3<f64>, prior: &PointState) -> PointState {
        let mut mean = prior.mean;
        mean.fixed_rows_mut::<DIM_3D_POINT>(0).copy_from(p);
        KalmanState {
            mean,
            covariance: prior.covariance,
        }
    }

    pub fn predict(&self, state: &PointState, dt: f64) -> PointState {
        let (mean, covariance) = (state.mean, state.covariance);
        let motion_matrix = self.motion_matrix(dt);

        let mean = motion_matrix * mean;
        let covariance =
            motion_matrix * covariance * motion_matrix.transpose() + self.process_noise(dt);
        KalmanState {
            mean,
            covariance: enforce_psd(covariance),
        }
    }

    /// Projects the state into the measurement space: `(H m, H P H' + R)`
    ///
    pub fn project(&self, state: &PointState) -> KalmanState<DIM_3D_POINT> {
        let mean = self.update_matrix * state.mean;
        let covariance = self.update_matrix * state.covariance * self.update_matrix.transpose()
            + self.measurement_noise;
        KalmanState { mean, covariance }
    }

    /// Computes the innovation of `p` against `state`.
    ///
    /// # Parameters
    /// * `regularization` - value added to the diagonal of the innovation covariance
    ///
    /// Fails with [`Errors::SingularCovariance`] when the innovation covariance can not be
    /// factorized.
    ///
    pub fn innovation(
        &self,
        state: &PointState,
        p: &Vector3<f64>,
        regularization: f64,
    ) -> Result<Innovation, Errors> {
        let projected = self.project(state);
        let covariance =
            projected.covariance + Matrix3::from_diagonal_element(regularization.max(0.0));
        let residual = p - projected.mean;

        let cholesky = covariance.cholesky().ok_or(Errors::SingularCovariance)?;
        let diagonal = cholesky.l().diagonal();
        let (least, largest) = (diagonal.min(), diagonal.max());
        if !largest.is_finite() || least <= largest * SINGULAR_TOLERANCE {
            return Err(Errors::SingularCovariance);
        }

        let mut innovation = Innovation {
            residual,
            covariance,
            likelihood: 0.0,
            cholesky,
        };
        // log-space keeps the density finite for covariances of any scale
        let log_norm = 0.5 * DIM_3D_POINT as f64 * (2.0 * PI).ln()
            + diagonal.iter().map(|d| d.ln()).sum::<f64>();
        innovation.likelihood = (-0.5 * innovation.mahalanobis() - log_norm).exp();
        Ok(innovation)
    }

    /// Applies a previously computed innovation: `K = P H' S^-1`, `m + K y`, `(I - K H) P`
    ///
    pub fn correct(&self, state: &PointState, innovation: &Innovation) -> PointState {
        let (mean, covariance) = (state.mean, state.covariance);
        let gain_t = innovation
            .cholesky
            .solve(&(self.update_matrix * covariance));
        let kalman_gain = gain_t.transpose();

        let mean = mean + kalman_gain * innovation.residual;
        let covariance = (StateMatrix::identity() - kalman_gain * self.update_matrix) * covariance;
        KalmanState {
            mean,
            covariance: enforce_psd(covariance),
        }
    }

    /// Full measurement update. Returns the corrected state and the innovation likelihood.
    ///
    pub fn update(&self, state: &PointState, p: &Vector3<f64>) -> Result<(PointState, f64), Errors> {
        let innovation = self.innovation(state, p, 0.0)?;
        Ok((self.correct(state, &innovation), innovation.likelihood))
    }
}

#[cfg(test)]
mod tests {
    use crate::utils::kalman::kalman_3d_point::{Point3DKalmanFilter, PointState, StateMatrix};
    use crate::utils::kalman::KalmanState;
    use crate::Errors;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3, Vector6};

    fn prior() -> PointState {
        KalmanState::new(
            Vector6::zeros(),
            StateMatrix::from_diagonal(&Vector6::new(0.25, 0.25, 0.25, 1.0, 1.0, 1.0)),
        )
    }

    #[test]
    fn initiate_at_measurement() {
        let f = Point3DKalmanFilter::default();
        let state = f.initiate(&Vector3::new(1.0, 2.0, 3.0), &prior());
        assert_eq!(state.mean, Vector6::new(1.0, 2.0, 3.0, 0.0, 0.0, 0.0));
        assert_eq!(state.covariance, prior().covariance);
    }

    #[test]
    fn zero_dt_predict_is_noop() {
        let f = Point3DKalmanFilter::new(0.5, Matrix3::from_diagonal_element(0.01));
        let mut state = f.initiate(&Vector3::new(1.0, -1.0, 0.5), &prior());
        state.mean[3] = 0.7;
        state.mean[5] = -0.2;
        let (state, _) = f.update(&state, &Vector3::new(1.1, -0.9, 0.4)).unwrap();

        let predicted = f.predict(&state, 0.0);
        assert_eq!(predicted.mean, state.mean);
        assert_eq!(predicted.covariance, state.covariance);
    }

    #[test]
    fn predict_moves_with_velocity() {
        let f = Point3DKalmanFilter::default();
        let mut state = prior();
        state.mean = Vector6::new(0.0, 0.0, 0.0, 1.0, -2.0, 0.5);
        let predicted = f.predict(&state, 0.5);
        assert_relative_eq!(predicted.mean[0], 0.5);
        assert_relative_eq!(predicted.mean[1], -1.0);
        assert_relative_eq!(predicted.mean[2], 0.25);
        assert_relative_eq!(predicted.mean[3], 1.0);
        assert!(predicted.covariance[(0, 0)] > state.covariance[(0, 0)]);
        assert!(predicted.min_eigenvalue() >= -1e-9);
    }

    #[test]
    fn update_pulls_towards_measurement() {
        let f = Point3DKalmanFilter::default();
        let state = f.initiate(&Vector3::new(0.0, 0.0, 0.0), &prior());
        let (updated, likelihood) = f.update(&state, &Vector3::new(1.0, 0.0, 0.0)).unwrap();
        assert!(updated.mean[0] > 0.9 && updated.mean[0] < 1.0);
        assert!(updated.covariance[(0, 0)] < state.covariance[(0, 0)]);
        assert!(likelihood > 0.0);
        assert!(updated.min_eigenvalue() >= -1e-9);
        assert_eq!(updated.covariance, updated.covariance.transpose());
    }

    #[test]
    fn likelihood_is_gaussian_density() {
        let f = Point3DKalmanFilter::new(0.0, Matrix3::from_diagonal_element(1.0));
        let state = KalmanState::new(Vector6::zeros(), StateMatrix::zeros());
        let innovation = f.innovation(&state, &Vector3::zeros(), 0.0).unwrap();
        let peak = (2.0 * std::f64::consts::PI).powf(-1.5);
        assert_relative_eq!(innovation.likelihood, peak, epsilon = 1e-12);

        let innovation = f.innovation(&state, &Vector3::new(1.0, 0.0, 0.0), 0.0).unwrap();
        assert_relative_eq!(innovation.mahalanobis(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(innovation.likelihood, peak * (-0.5f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn singular_innovation_and_regularization() {
        let f = Point3DKalmanFilter::new(0.0, Matrix3::zeros());
        let state = KalmanState::new(Vector6::zeros(), StateMatrix::zeros());
        let res = f.innovation(&state, &Vector3::new(0.1, 0.0, 0.0), 0.0);
        assert!(matches!(res, Err(Errors::SingularCovariance)));
        assert!(f.update(&state, &Vector3::zeros()).is_err());

        let innovation = f
            .innovation(&state, &Vector3::new(0.1, 0.0, 0.0), 1e-6)
            .unwrap();
        assert!(innovation.likelihood.is_finite());
    }

    #[test]
    fn singularity_does_not_depend_on_units() {
        let tiny = Matrix3::from_diagonal_element(1e-11);
        let f = Point3DKalmanFilter::new(0.0, tiny);
        let state = KalmanState::new(Vector6::zeros(), StateMatrix::from_diagonal_element(1e-12));
        let innovation = f.innovation(&state, &Vector3::new(1e-6, 0.0, 0.0), 0.0).unwrap();
        assert!(innovation.likelihood.is_finite() && innovation.likelihood > 0.0);
        let (updated, _) = f.update(&state, &Vector3::new(1e-6, 0.0, 0.0)).unwrap();
        assert!(updated.mean[0] > 0.0);

        let huge = Point3DKalmanFilter::new(0.0, Matrix3::from_diagonal_element(1e12));
        let state = KalmanState::new(Vector6::zeros(), StateMatrix::zeros());
        assert!(huge.innovation(&state, &Vector3::zeros(), 0.0).is_ok());

        // well scaled but ill-conditioned
        let skewed =
            Point3DKalmanFilter::new(0.0, Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 1e-20)));
        assert!(matches!(
            skewed.innovation(&state, &Vector3::zeros(), 0.0),
            Err(Errors::SingularCovariance)
        ));
        assert!(skewed.innovation(&state, &Vector3::zeros(), 1e-6).is_ok());
    }

    #[test]
    fn stationary_convergence() {
        let f = Point3DKalmanFilter::new(1e-4, Matrix3::from_diagonal_element(0.01));
        let mut state = f.initiate(&Vector3::new(1.2, 0.1, -0.1), &prior());
        for i in 0..100 {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            let z = Vector3::new(1.0 + 0.1 * sign, -0.05 * sign, 0.08 * sign);
            state = f.predict(&state, 0.1);
            state = f.update(&state, &z).unwrap().0;
            assert!(state.min_eigenvalue() >= -1e-9);
        }
        assert!((state.mean[0] - 1.0).abs() < 0.05);
        assert!(state.mean[1].abs() < 0.05);
        assert!(state.mean.fixed_rows::<3>(3).norm() < 0.05);
    }
}
