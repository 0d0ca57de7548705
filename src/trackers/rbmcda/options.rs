use crate::trackers::rbmcda::estimate::EstimateMode;
use crate::utils::kalman::is_positive_definite;
use crate::utils::kalman::kalman_3d_point::{
    PointState, StateMatrix, StateVector, DIM_3D_POINT, DIM_3D_POINT_X2,
};
use crate::Errors;
use anyhow::Result;
use nalgebra::{Matrix3, Vector3};

/// What the incoming 3-vectors represent
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasurementKind {
    /// cartesian positions
    #[default]
    Position,
    /// directions of arrival; vectors are normalized on input and estimates on output
    Direction,
}

/// How a particle picks the origin of each measurement
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssociationMode {
    /// draw from the posterior over {targets, birth, clutter}
    #[default]
    Sampled,
    /// take the maximum-likelihood joint assignment of the batch
    Greedy,
}

/// Likelihood of a measurement under the "new target" hypothesis
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BirthDensity {
    /// constant density, e.g. one over the observed volume
    Uniform(f64),
    /// `N(z; H m0, H P0 H' + R)` built from the seed prior
    Gaussian,
}

/// Class that is used to configure the tracker
///
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    particles: usize,
    threads: usize,
    seed: Option<u64>,
    measurement_kind: MeasurementKind,
    max_active_targets: usize,
    prior_mean: Vec<f64>,
    prior_covariance: Vec<f64>,
    measurement_noise: Vec<f64>,
    process_noise: f64,
    birth_probability: f64,
    clutter_probability: f64,
    birth_density: BirthDensity,
    clutter_density: f64,
    max_missed_steps: usize,
    death_time_shape: f64,
    death_time_scale: f64,
    existence_floor: f64,
    multi_death: bool,
    association: AssociationMode,
    resampling_threshold: f64,
    estimate: EstimateMode,
    regularization: f64,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            particles: 30,
            threads: num_cpus::get(),
            seed: None,
            measurement_kind: MeasurementKind::Position,
            max_active_targets: 4,
            prior_mean: vec![0.0; DIM_3D_POINT_X2],
            prior_covariance: vec![0.25, 0.25, 0.25, 1.0, 1.0, 1.0],
            measurement_noise: vec![0.01; DIM_3D_POINT],
            process_noise: 1e-3,
            birth_probability: 0.1,
            clutter_probability: 0.05,
            birth_density: BirthDensity::Uniform(1.0 / 8.0),
            clutter_density: 1.0 / 8.0,
            max_missed_steps: 10,
            death_time_shape: 2.0,
            death_time_scale: 1.0,
            existence_floor: 0.0,
            multi_death: true,
            association: AssociationMode::Sampled,
            resampling_threshold: 0.5,
            estimate: EstimateMode::default(),
            regularization: 1e-6,
        }
    }
}

impl TrackerOptions {
    /// The number of particles (Monte Carlo hypotheses) kept by the tracker.
    ///
    pub fn particles(mut self, n: usize) -> Self {
        self.particles = n;
        self
    }

    /// The number of worker threads used to advance the particles.
    ///
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }

    /// Seed of the tracker random source. Two trackers with the same options and seed produce
    /// identical outputs for identical inputs regardless of the thread count.
    ///
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn measurement_kind(mut self, kind: MeasurementKind) -> Self {
        self.measurement_kind = kind;
        self
    }

    /// Births are not proposed in a particle that already tracks this many targets.
    ///
    pub fn max_active_targets(mut self, n: usize) -> Self {
        self.max_active_targets = n;
        self
    }

    /// Mean used to seed a new target, `[x, y, z, vx, vy, vz]`. The position part is replaced
    /// by the measurement that gave birth to the target.
    ///
    pub fn prior_mean(mut self, mean: &[f64]) -> Self {
        self.prior_mean = mean.to_vec();
        self
    }

    /// Covariance used to seed a new target: either the 6 diagonal values or the full 6x6
    /// matrix in row-major order.
    ///
    pub fn prior_covariance(mut self, covariance: &[f64]) -> Self {
        self.prior_covariance = covariance.to_vec();
        self
    }

    /// Measurement noise covariance: either the 3 diagonal values or the full 3x3 matrix in
    /// row-major order.
    ///
    pub fn measurement_noise(mut self, covariance: &[f64]) -> Self {
        self.measurement_noise = covariance.to_vec();
        self
    }

    /// Spectral density of the white-acceleration process noise. Larger values let the
    /// uncertainty grow faster between measurements.
    ///
    pub fn process_noise(mut self, q: f64) -> Self {
        self.process_noise = q;
        self
    }

    pub fn birth_probability(mut self, p: f64) -> Self {
        self.birth_probability = p;
        self
    }

    pub fn clutter_probability(mut self, p: f64) -> Self {
        self.clutter_probability = p;
        self
    }

    pub fn birth_density(mut self, density: BirthDensity) -> Self {
        self.birth_density = density;
        self
    }

    pub fn clutter_density(mut self, density: f64) -> Self {
        self.clutter_density = density;
        self
    }

    /// A target is removed from a particle once it has not been associated for this many
    /// consecutive steps.
    ///
    pub fn max_missed_steps(mut self, n: usize) -> Self {
        self.max_missed_steps = n;
        self
    }

    /// Gamma prior (shape, scale in seconds) of the time a target survives without detections.
    ///
    pub fn death_time(mut self, shape: f64, scale: f64) -> Self {
        self.death_time_shape = shape;
        self.death_time_scale = scale;
        self
    }

    /// A target whose continued-existence probability falls below the floor is removed. `0`
    /// disables the probabilistic death rule.
    ///
    pub fn existence_floor(mut self, p: f64) -> Self {
        self.existence_floor = p;
        self
    }

    /// When disabled, at most one target (the most stale) dies per particle and step.
    ///
    pub fn multi_death(mut self, enabled: bool) -> Self {
        self.multi_death = enabled;
        self
    }

    pub fn association(mut self, mode: AssociationMode) -> Self {
        self.association = mode;
        self
    }

    /// Resampling happens when the effective sample size drops below `threshold * particles`.
    ///
    pub fn resampling_threshold(mut self, threshold: f64) -> Self {
        self.resampling_threshold = threshold;
        self
    }

    pub fn estimate(mut self, mode: EstimateMode) -> Self {
        self.estimate = mode;
        self
    }

    /// Diagonal loading applied once to an innovation covariance that can not be inverted.
    ///
    pub fn regularization(mut self, eps: f64) -> Self {
        self.regularization = eps;
        self
    }

    /// Validates the options and builds the shared priors
    ///
    pub fn build(&self) -> Result<TrackerPriors> {
        if self.particles == 0 {
            return Err(invalid("particle count must be positive"));
        }
        if self.threads == 0 {
            return Err(invalid("thread count must be positive"));
        }
        if self.max_active_targets == 0 {
            return Err(invalid("max_active_targets must be positive"));
        }
        if self.max_missed_steps == 0 {
            return Err(invalid("max_missed_steps must be positive"));
        }

        if self.prior_mean.len() != DIM_3D_POINT_X2 {
            return Err(invalid(&format!(
                "prior_mean must have {} values, got {}",
                DIM_3D_POINT_X2,
                self.prior_mean.len()
            )));
        }
        let mean = StateVector::from_iterator(self.prior_mean.iter().copied());

        let covariance: StateMatrix = square_matrix(&self.prior_covariance, "prior_covariance")?;
        if !is_positive_definite(&covariance) {
            return Err(invalid("prior_covariance must be positive definite"));
        }

        let measurement_noise: Matrix3<f64> =
            square_matrix(&self.measurement_noise, "measurement_noise")?;
        if !is_positive_definite(&measurement_noise) {
            return Err(invalid("measurement_noise must be positive definite"));
        }

        if !mean.iter().all(|v| v.is_finite()) {
            return Err(invalid("prior_mean must be finite"));
        }
        if !(self.process_noise.is_finite() && self.process_noise >= 0.0) {
            return Err(invalid("process_noise must be non-negative"));
        }

        for (name, p) in [
            ("birth_probability", self.birth_probability),
            ("clutter_probability", self.clutter_probability),
            ("existence_floor", self.existence_floor),
            ("resampling_threshold", self.resampling_threshold),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(&format!("{} must lie in [0, 1], got {}", name, p)));
            }
        }
        if self.birth_probability + self.clutter_probability >= 1.0 {
            return Err(invalid(
                "birth_probability + clutter_probability must be below 1",
            ));
        }

        if let BirthDensity::Uniform(d) = self.birth_density {
            if !(d.is_finite() && d > 0.0) {
                return Err(invalid("uniform birth density must be positive"));
            }
        }
        if !(self.clutter_density.is_finite() && self.clutter_density >= 0.0) {
            return Err(invalid("clutter_density must be non-negative"));
        }
        if !(self.death_time_shape > 0.0 && self.death_time_scale > 0.0) {
            return Err(invalid("death_time shape and scale must be positive"));
        }
        if !(self.regularization.is_finite() && self.regularization > 0.0) {
            return Err(invalid("regularization must be positive"));
        }
        if let EstimateMode::Consensus { min_support } = self.estimate {
            if !(min_support > 0.0 && min_support <= 1.0) {
                return Err(invalid("consensus min_support must lie in (0, 1]"));
            }
        }

        Ok(TrackerPriors {
            particles: self.particles,
            threads: self.threads,
            seed: self.seed,
            measurement_kind: self.measurement_kind,
            max_active_targets: self.max_active_targets,
            prior: PointState::new(mean, covariance),
            measurement_noise,
            process_noise: self.process_noise,
            birth_probability: self.birth_probability,
            clutter_probability: self.clutter_probability,
            birth_density: self.birth_density,
            clutter_density: self.clutter_density,
            max_missed_steps: self.max_missed_steps,
            death_time_shape: self.death_time_shape,
            death_time_scale: self.death_time_scale,
            existence_floor: self.existence_floor,
            multi_death: self.multi_death,
            association: self.association,
            resampling_threshold: self.resampling_threshold,
            estimate: self.estimate,
            regularization: self.regularization,
        })
    }
}

/// Validated, typed configuration shared read-only by all particles
///
#[derive(Debug, Clone)]
pub struct TrackerPriors {
    pub particles: usize,
    pub threads: usize,
    pub seed: Option<u64>,
    pub measurement_kind: MeasurementKind,
    pub max_active_targets: usize,
    pub prior: PointState,
    pub measurement_noise: Matrix3<f64>,
    pub process_noise: f64,
    pub birth_probability: f64,
    pub clutter_probability: f64,
    pub birth_density: BirthDensity,
    pub clutter_density: f64,
    pub max_missed_steps: usize,
    pub death_time_shape: f64,
    pub death_time_scale: f64,
    pub existence_floor: f64,
    pub multi_death: bool,
    pub association: AssociationMode,
    pub resampling_threshold: f64,
    pub estimate: EstimateMode,
    pub regularization: f64,
}

impl TrackerPriors {
    /// Prior probability shared by the existing-target hypotheses
    ///
    pub fn detection_probability(&self) -> f64 {
        1.0 - self.birth_probability - self.clutter_probability
    }

    /// Normalizes a direction measurement, positions pass through
    ///
    pub fn condition(&self, z: &Vector3<f64>) -> Option<Vector3<f64>> {
        if !z.iter().all(|v| v.is_finite()) {
            return None;
        }
        match self.measurement_kind {
            MeasurementKind::Position => Some(*z),
            MeasurementKind::Direction => z.try_normalize(crate::EPS),
        }
    }
}

fn invalid(msg: &str) -> anyhow::Error {
    Errors::InvalidConfig(msg.to_string()).into()
}

fn square_matrix<const D: usize>(
    values: &[f64],
    name: &str,
) -> Result<nalgebra::SMatrix<f64, D, D>> {
    if values.len() == D {
        Ok(nalgebra::SMatrix::from_diagonal(
            &nalgebra::SVector::<f64, D>::from_column_slice(values),
        ))
    } else if values.len() == D * D {
        Ok(nalgebra::SMatrix::from_row_slice(values))
    } else {
        Err(invalid(&format!(
            "{} must have {} (diagonal) or {} values, got {}",
            name,
            D,
            D * D,
            values.len()
        )))
    }
}
