use crate::trackers::rbmcda::association::AssociationModel;
use crate::trackers::rbmcda::birth_death::BirthDeathModel;
use crate::trackers::rbmcda::estimate::{extract, TargetEstimate};
use crate::trackers::rbmcda::options::{TrackerOptions, TrackerPriors};
use crate::trackers::rbmcda::particle::{Particle, StepContext};
use crate::trackers::rbmcda::resampling::{
    effective_sample_size, normalize_weights, SystematicResampler,
};
use crate::trackers::rbmcda::target::IdentityAllocator;
use anyhow::Result;
use log::{debug, warn};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{BTreeSet, HashMap};

/// Hypothesis likelihoods and origin selection
///
pub mod association;

/// Target creation and removal rules
pub mod birth_death;

/// Per-target answers read from the particle population
pub mod estimate;

/// Tracker configuration
pub mod options;

/// Weighted scene hypothesis and its per-step pipeline
pub mod particle;

pub mod resampling;

/// Target slots and id allocation
pub mod target;

/// Joint assignment of a measurement batch with the Hungarian algorithm
///
pub mod voting;

/// Diagnostics of the most recent step
///
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepReport {
    /// number of steps since creation or reset
    pub epoch: usize,
    /// elapsed time used for the prediction
    pub dt: f64,
    /// measurements accepted after conditioning
    pub measurements: usize,
    /// effective sample size after normalization and before resampling
    pub effective_sample_size: f64,
    pub resampled: bool,
    /// all weights underflowed and were reset to uniform
    pub weight_collapse: bool,
    /// distinct target ids born in the step
    pub births: usize,
    /// target removals summed over particles
    pub deaths: usize,
}

/// Rao-Blackwellized Monte Carlo data association tracker.
///
/// Tracks an unknown, time-varying number of point sources in 3D from unlabeled measurements.
/// Every particle carries its own set of targets, each with a constant-velocity Kalman filter,
/// and samples (or greedily picks) the origin of every measurement among the known targets, a
/// new target, or clutter.
///
pub struct Tracker<R = StdRng> {
    priors: TrackerPriors,
    association: AssociationModel,
    birth_death: BirthDeathModel,
    resampler: SystematicResampler,
    particles: Vec<Particle>,
    identities: IdentityAllocator,
    last_timestamp: Option<f64>,
    rng: R,
    pool: ThreadPool,
    epoch: usize,
    report: StepReport,
}

impl Tracker<StdRng> {
    /// Creates a tracker; the random source is seeded from the options or from entropy.
    ///
    pub fn new(opts: &TrackerOptions) -> Result<Self> {
        let priors = opts.build()?;
        let rng = match priors.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::from_priors(priors, rng)
    }
}

impl<R: Rng> Tracker<R> {
    /// Creates a tracker that draws from the provided random source; the seed option is ignored.
    ///
    pub fn with_rng(opts: &TrackerOptions, rng: R) -> Result<Self> {
        Self::from_priors(opts.build()?, rng)
    }

    fn from_priors(priors: TrackerPriors, rng: R) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(priors.threads)
            .build()?;
        let association = AssociationModel::new(&priors);
        let birth_death = BirthDeathModel::new(&priors)?;
        let resampler = SystematicResampler::new(priors.resampling_threshold);
        let particles = Self::empty_population(priors.particles);
        debug!(
            "Tracker created with {} particles on {} threads",
            priors.particles, priors.threads
        );
        Ok(Self {
            priors,
            association,
            birth_death,
            resampler,
            particles,
            identities: IdentityAllocator::default(),
            last_timestamp: None,
            rng,
            pool,
            epoch: 0,
            report: StepReport::default(),
        })
    }

    fn empty_population(n: usize) -> Vec<Particle> {
        (0..n).map(|_| Particle::new(1.0 / n as f64)).collect()
    }

    /// Processes the measurements observed at `timestamp` and returns the target estimates.
    ///
    /// # Parameters
    /// * `measurements` - unlabeled positions (or directions) observed at once, possibly empty
    /// * `timestamp` - seconds; a timestamp earlier than the previous one is treated as `dt = 0`
    ///
    pub fn step(&mut self, measurements: &[Vector3<f64>], timestamp: f64) -> Vec<TargetEstimate> {
        let dt = match self.last_timestamp {
            None => 0.0,
            Some(last) if timestamp >= last => timestamp - last,
            Some(last) => {
                warn!(
                    "Timestamp {} precedes the previous one {}, prediction is skipped",
                    timestamp, last
                );
                0.0
            }
        };
        self.last_timestamp = Some(self.last_timestamp.map_or(timestamp, |t| t.max(timestamp)));
        self.epoch += 1;

        let measurements = measurements
            .iter()
            .filter_map(|z| {
                let conditioned = self.priors.condition(z);
                if conditioned.is_none() {
                    warn!("Measurement {:?} can not be used and is skipped", z);
                }
                conditioned
            })
            .collect::<Vec<_>>();

        let seeds = (0..self.particles.len())
            .map(|_| self.rng.gen::<u64>())
            .collect::<Vec<_>>();
        let ctx = StepContext {
            association: &self.association,
            birth_death: &self.birth_death,
            dt,
        };
        let particles = &mut self.particles;
        self.pool.install(|| {
            particles
                .par_iter_mut()
                .zip(seeds.par_iter())
                .for_each(|(p, seed)| {
                    let mut rng = StdRng::seed_from_u64(*seed);
                    p.advance(&ctx, &measurements, &mut rng);
                });
        });

        let births = self.label_births();
        let deaths = self.particles.iter().map(|p| p.dead().len()).sum();

        let weight_collapse = match normalize_weights(&mut self.particles) {
            Ok(()) => false,
            Err(e) => {
                warn!("Epoch {}: {}, weights reset to uniform", self.epoch, e);
                true
            }
        };
        let neff = effective_sample_size(&self.particles);
        let resampled = self.resampler.needs_resampling(neff, self.particles.len());
        if resampled {
            self.resampler.resample(&mut self.particles, &mut self.rng);
        }

        self.report = StepReport {
            epoch: self.epoch,
            dt,
            measurements: measurements.len(),
            effective_sample_size: neff,
            resampled,
            weight_collapse,
            births,
            deaths,
        };
        debug!("Step finished: {:?}", &self.report);

        self.estimates()
    }

    /// Gives every birth event of the step a fresh id shared by all particles that started a
    /// target from the same measurement
    ///
    fn label_births(&mut self) -> usize {
        let events = self
            .particles
            .iter()
            .flat_map(|p| p.pending_births().iter().copied())
            .collect::<BTreeSet<_>>();
        if events.is_empty() {
            return 0;
        }
        let ids = events
            .into_iter()
            .map(|k| (k, self.identities.allocate()))
            .collect::<HashMap<_, _>>();
        for p in self.particles.iter_mut() {
            p.assign_birth_ids(&ids);
        }
        ids.len()
    }

    /// Current estimates, computed without advancing the tracker
    ///
    pub fn estimates(&self) -> Vec<TargetEstimate> {
        extract(
            &self.particles,
            self.priors.estimate,
            self.priors.measurement_kind,
        )
    }

    /// Drops every target and returns to a uniform population of empty particles. Ids handed
    /// out before the reset are not reused.
    ///
    pub fn reset(&mut self) {
        self.particles = Self::empty_population(self.priors.particles);
        self.last_timestamp = None;
        self.epoch = 0;
        self.report = StepReport::default();
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn effective_sample_size(&self) -> f64 {
        effective_sample_size(&self.particles)
    }

    pub fn last_report(&self) -> &StepReport {
        &self.report
    }

    pub fn priors(&self) -> &TrackerPriors {
        &self.priors
    }

    pub fn current_epoch(&self) -> usize {
        self.epoch
    }
}
