use crate::trackers::rbmcda::particle::Particle;
use crate::Errors;
use log::debug;
use rand::Rng;
use rayon::prelude::*;

/// Normalizes the particle weights to sum to one.
///
/// When every weight underflowed to zero (or became non-finite) the weights are reset to uniform
/// and [`Errors::WeightCollapse`] is returned so the caller can report the event.
///
pub fn normalize_weights(particles: &mut [Particle]) -> Result<(), Errors> {
    let sum: f64 = particles.iter().map(|p| p.weight).sum();
    if sum > 0.0 && sum.is_finite() {
        for p in particles.iter_mut() {
            p.weight /= sum;
        }
        Ok(())
    } else {
        let uniform = 1.0 / particles.len() as f64;
        for p in particles.iter_mut() {
            p.weight = uniform;
        }
        Err(Errors::WeightCollapse)
    }
}

/// `1 / sum(w^2)` of normalized weights
///
pub fn effective_sample_size(particles: &[Particle]) -> f64 {
    let sum_of_squares: f64 = particles.iter().map(|p| p.weight * p.weight).sum();
    if sum_of_squares > 0.0 {
        1.0 / sum_of_squares
    } else {
        0.0
    }
}

/// Low-variance resampling with a single random offset and equally spaced strides
///
#[derive(Debug, Clone, Copy)]
pub struct SystematicResampler {
    threshold: f64,
}

impl SystematicResampler {
    /// # Parameters
    /// * `threshold` - resampling happens when Neff falls below `threshold * Np`
    ///
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn needs_resampling(&self, neff: f64, particles: usize) -> bool {
        neff < self.threshold * particles as f64
    }

    /// Draws `weights.len()` ordered indices with probability proportional to weight
    ///
    pub fn indices<R: Rng>(&self, weights: &[f64], rng: &mut R) -> Vec<usize> {
        let n = weights.len();
        if n == 0 {
            return Vec::default();
        }
        let total: f64 = weights.iter().sum();
        let step = total / n as f64;
        let mut u = rng.gen::<f64>() * step;

        let mut res = Vec::with_capacity(n);
        let mut i = 0;
        let mut cumsum = weights[0];
        for _ in 0..n {
            while u >= cumsum && i + 1 < n {
                i += 1;
                cumsum += weights[i];
            }
            res.push(i);
            u += step;
        }
        res
    }

    /// Replaces the population with deep copies of the drawn particles, each with weight `1/Np`
    ///
    pub fn resample<R: Rng>(&self, particles: &mut Vec<Particle>, rng: &mut R) {
        let weights = particles.iter().map(|p| p.weight).collect::<Vec<_>>();
        let indices = self.indices(&weights, rng);
        let uniform = 1.0 / particles.len() as f64;
        debug!(
            "Resampling, {} distinct particles survive",
            indices.windows(2).filter(|w| w[0] != w[1]).count() + 1
        );

        let population = &*particles;
        let resampled: Vec<Particle> = indices
            .par_iter()
            .map(|&i| {
                let mut p = population[i].clone();
                p.weight = uniform;
                p
            })
            .collect();
        *particles = resampled;
    }
}
