use thiserror::Error;

/// Tracker implementations
pub mod trackers;

/// Kalman filters and numeric helpers
pub mod utils;

/// Seeded measurement generators for demos, benches and tests
pub mod examples;

pub mod prelude;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Errors {
    #[error("Invalid tracker configuration: {0}")]
    InvalidConfig(String),
    #[error("Innovation covariance is not invertible.")]
    SingularCovariance,
    #[error("All particle weights underflowed to zero.")]
    WeightCollapse,
}

pub(crate) const EPS: f64 = 0.00001;
