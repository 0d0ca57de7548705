use crate::trackers;
use crate::utils;

pub use trackers::rbmcda::estimate::{EstimateMode, TargetEstimate};
pub use trackers::rbmcda::options::{
    AssociationMode, BirthDensity, MeasurementKind, TrackerOptions,
};
pub use trackers::rbmcda::{StepReport, Tracker};
pub use utils::kalman::kalman_3d_point::Point3DKalmanFilter;
pub use utils::kalman::KalmanState;

pub use nalgebra::Vector3;
