use anyhow::Result;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

/// One simulated observation of a point source
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Emission {
    pub timestamp: f64,
    /// the noiseless position
    pub truth: Vector3<f64>,
    /// the position observed with gaussian noise
    pub measurement: Vector3<f64>,
}

/// Seeded generator of a source moving with constant velocity
///
pub struct PointGen3 {
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    dt: f64,
    timestamp: f64,
    gen: StdRng,
    dist: Normal<f64>,
    antithetic: bool,
    pending: Option<Vector3<f64>>,
}

impl PointGen3 {
    /// # Parameters
    /// * `position` - where the source is at the first emission
    /// * `velocity` - units per second
    /// * `dt` - seconds between emissions
    /// * `noise` - standard deviation of the per-axis measurement noise
    /// * `seed` - seed of the noise source
    ///
    pub fn new(
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        dt: f64,
        noise: f64,
        seed: u64,
    ) -> Result<Self> {
        Ok(Self {
            position,
            velocity,
            dt,
            timestamp: 0.0,
            gen: StdRng::seed_from_u64(seed),
            dist: Normal::new(0.0, noise)?,
            antithetic: false,
            pending: None,
        })
    }

    /// Timestamp of the first emission, `0` by default
    ///
    pub fn starting_at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Every second emission carries the negated noise of the previous one, so each pair of
    /// measurements averages exactly to the truth.
    ///
    pub fn antithetic(mut self) -> Self {
        self.antithetic = true;
        self
    }

    fn noise(&mut self) -> Vector3<f64> {
        if let Some(noise) = self.pending.take() {
            return -noise;
        }
        let noise = Vector3::new(
            self.gen.sample(self.dist),
            self.gen.sample(self.dist),
            self.gen.sample(self.dist),
        );
        if self.antithetic {
            self.pending = Some(noise);
        }
        noise
    }
}

impl Iterator for PointGen3 {
    type Item = Emission;

    fn next(&mut self) -> Option<Self::Item> {
        let noise = self.noise();
        let emission = Emission {
            timestamp: self.timestamp,
            truth: self.position,
            measurement: self.position + noise,
        };
        self.position += self.velocity * self.dt;
        self.timestamp += self.dt;
        Some(emission)
    }
}
