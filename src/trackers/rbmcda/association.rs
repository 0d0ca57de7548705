use crate::trackers::rbmcda::options::{AssociationMode, BirthDensity, TrackerPriors};
use crate::trackers::rbmcda::target::TargetSlot;
use crate::trackers::rbmcda::voting::GreedyVoting;
use crate::utils::kalman::kalman_3d_point::{Innovation, Point3DKalmanFilter, PointState};
use crate::Errors;
use log::{trace, warn};
use nalgebra::Vector3;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Where a measurement came from, as seen inside one particle
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// index of the target slot in the particle
    Target(usize),
    Birth,
    Clutter,
}

/// Diagnostic record of the hypothesis a particle picked for a measurement
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hypothesis {
    /// associated with the target of the given id
    Target(u64),
    /// started a new target
    Birth,
    /// discarded as clutter
    Clutter,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// index of the measurement within the step batch
    pub measurement: usize,
    pub hypothesis: Hypothesis,
    /// unnormalized likelihood of the chosen hypothesis
    pub likelihood: f64,
}

/// Likelihoods of all hypotheses for one measurement
///
#[derive(Debug, Clone)]
pub struct Candidates {
    /// `(slot index, prior-weighted likelihood, innovation)` for every target that can take the measurement
    pub targets: Vec<(usize, f64, Innovation)>,
    /// prior-weighted birth likelihood, zero when births are not allowed
    pub birth: f64,
    /// prior-weighted clutter likelihood
    pub clutter: f64,
}

impl Candidates {
    pub fn total(&self) -> f64 {
        self.targets.iter().map(|(_, l, _)| *l).sum::<f64>() + self.birth + self.clutter
    }

    fn origin(&self, index: usize) -> (Origin, f64) {
        if index < self.targets.len() {
            let (slot, l, _) = &self.targets[index];
            (Origin::Target(*slot), *l)
        } else if index == self.targets.len() {
            (Origin::Birth, self.birth)
        } else {
            (Origin::Clutter, self.clutter)
        }
    }

    fn weights(&self) -> Vec<f64> {
        self.targets
            .iter()
            .map(|(_, l, _)| *l)
            .chain([self.birth, self.clutter])
            .collect()
    }

    /// Innovation computed for the given slot, if it was a candidate
    ///
    pub fn innovation(&self, slot: usize) -> Option<&Innovation> {
        self.targets
            .iter()
            .find(|(s, _, _)| *s == slot)
            .map(|(_, _, i)| i)
    }
}

/// Computes hypothesis likelihoods and selects measurement origins for a particle
///
#[derive(Debug, Clone)]
pub struct AssociationModel {
    filter: Point3DKalmanFilter,
    prior: PointState,
    mode: AssociationMode,
    detection_probability: f64,
    birth_probability: f64,
    clutter_probability: f64,
    birth_density: BirthDensity,
    clutter_density: f64,
    regularization: f64,
}

impl AssociationModel {
    pub fn new(priors: &TrackerPriors) -> Self {
        Self {
            filter: Point3DKalmanFilter::new(priors.process_noise, priors.measurement_noise),
            prior: priors.prior,
            mode: priors.association,
            detection_probability: priors.detection_probability(),
            birth_probability: priors.birth_probability,
            clutter_probability: priors.clutter_probability,
            birth_density: priors.birth_density,
            clutter_density: priors.clutter_density,
            regularization: priors.regularization,
        }
    }

    pub fn filter(&self) -> &Point3DKalmanFilter {
        &self.filter
    }

    pub fn prior(&self) -> &PointState {
        &self.prior
    }

    pub fn mode(&self) -> AssociationMode {
        self.mode
    }

    /// Innovation of `z` against a slot.
    ///
    /// A singular innovation covariance is regularized and retried once. If it is still singular
    /// the slot can not be observed this step and `None` is returned.
    ///
    pub fn target_innovation(&self, slot: &TargetSlot, z: &Vector3<f64>) -> Option<Innovation> {
        match self.filter.innovation(&slot.state, z, 0.0) {
            Ok(innovation) => Some(innovation),
            Err(Errors::SingularCovariance) => {
                match self.filter.innovation(&slot.state, z, self.regularization) {
                    Ok(innovation) => {
                        trace!("Target {} innovation regularized", slot.id);
                        Some(innovation)
                    }
                    Err(e) => {
                        warn!(
                            "Target {} skipped for this step, innovation is still singular after regularization: {:?}",
                            slot.id, e
                        );
                        None
                    }
                }
            }
            Err(e) => {
                warn!("Target {} skipped for this step: {:?}", slot.id, e);
                None
            }
        }
    }

    /// Likelihood of `z` under the "new target" hypothesis, without the prior probability
    ///
    pub fn birth_density(&self, z: &Vector3<f64>) -> f64 {
        match self.birth_density {
            BirthDensity::Uniform(d) => d,
            BirthDensity::Gaussian => self
                .filter
                .innovation(&self.prior, z, 0.0)
                .or_else(|_| self.filter.innovation(&self.prior, z, self.regularization))
                .map(|i| i.likelihood)
                .unwrap_or(0.0),
        }
    }

    pub fn clutter_likelihood(&self) -> f64 {
        self.clutter_probability * self.clutter_density
    }

    /// Computes the likelihood of every hypothesis for one measurement.
    ///
    /// # Parameters
    /// * `slots` - the particle's targets (predicted)
    /// * `eligible` - which slots may still take a measurement this step
    /// * `birth_allowed` - whether the particle may start another target
    ///
    pub fn candidates(
        &self,
        slots: &[TargetSlot],
        eligible: &[bool],
        z: &Vector3<f64>,
        birth_allowed: bool,
    ) -> Candidates {
        let n = eligible.iter().filter(|e| **e).count();
        let target_prior = if n > 0 {
            self.detection_probability / n as f64
        } else {
            0.0
        };

        let targets = slots
            .iter()
            .enumerate()
            .filter(|(i, _)| eligible[*i])
            .flat_map(|(i, slot)| {
                self.target_innovation(slot, z)
                    .map(|innovation| (i, target_prior * innovation.likelihood, innovation))
            })
            .collect();

        Candidates {
            targets,
            birth: if birth_allowed {
                self.birth_probability * self.birth_density(z)
            } else {
                0.0
            },
            clutter: self.clutter_likelihood(),
        }
    }

    /// Draws the origin of a measurement from the normalized hypothesis probabilities.
    ///
    /// Returns the origin, the likelihood of the chosen hypothesis and the importance weight
    /// increment, which for this proposal is the total likelihood over all hypotheses.
    ///
    pub fn sample<R: Rng>(&self, candidates: &Candidates, rng: &mut R) -> (Origin, f64, f64) {
        let total = candidates.total();
        let weights = candidates.weights();
        match WeightedIndex::new(&weights) {
            Ok(dist) if total.is_finite() => {
                let (origin, likelihood) = candidates.origin(dist.sample(rng));
                (origin, likelihood, total)
            }
            _ => {
                trace!("No hypothesis has positive likelihood: {:?}", &weights);
                (Origin::Clutter, candidates.clutter, 0.0)
            }
        }
    }

    /// Picks the most likely origin. The proposal is deterministic, so the weight increment is
    /// the likelihood of the chosen hypothesis.
    ///
    pub fn select(&self, candidates: &Candidates) -> (Origin, f64, f64) {
        let weights = candidates.weights();
        let best = weights
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, w)| match best {
                Some((_, bw)) if bw >= *w => best,
                _ => Some((i, *w)),
            });
        match best {
            Some((i, _)) => {
                let (origin, likelihood) = candidates.origin(i);
                (origin, likelihood, likelihood)
            }
            None => (Origin::Clutter, candidates.clutter, candidates.clutter),
        }
    }

    /// Joint maximum-likelihood assignment of a batch.
    ///
    /// # Parameters
    /// * `batch` - candidates of every measurement, computed against the same eligible slots
    /// * `slots` - number of slots the candidates refer to
    /// * `births` - how many targets may still be born
    ///
    pub fn select_batch(&self, batch: &[Candidates], slots: usize, births: usize) -> Vec<Origin> {
        if batch.len() == 1 && (births > 0 || batch[0].birth == 0.0) {
            return vec![self.select(&batch[0]).0];
        }

        let targets = batch
            .iter()
            .map(|c| {
                let mut row = vec![0.0; slots];
                for (slot, l, _) in &c.targets {
                    row[*slot] = *l;
                }
                row
            })
            .collect::<Vec<_>>();
        let birth = batch.iter().map(|c| c.birth).collect::<Vec<_>>();
        GreedyVoting::new(batch.len(), slots, births).winners(
            &targets,
            &birth,
            self.clutter_likelihood(),
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::trackers::rbmcda::association::{AssociationModel, Origin};
    use crate::trackers::rbmcda::options::{AssociationMode, BirthDensity, TrackerOptions};
    use crate::trackers::rbmcda::target::TargetSlot;
    use crate::utils::kalman::kalman_3d_point::{PointState, StateMatrix};
    use approx::assert_relative_eq;
    use nalgebra::{Vector3, Vector6};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model(opts: TrackerOptions) -> AssociationModel {
        AssociationModel::new(&opts.build().unwrap())
    }

    fn slot_at(id: u64, x: f64, y: f64, z: f64) -> TargetSlot {
        let mut slot = TargetSlot::newborn(PointState::new(
            Vector6::new(x, y, z, 0.0, 0.0, 0.0),
            StateMatrix::from_diagonal_element(0.01),
        ));
        slot.id = id;
        slot
    }

    #[test]
    fn candidate_priors() {
        let m = model(TrackerOptions::default());
        let slots = vec![slot_at(1, 0.0, 0.0, 0.0), slot_at(2, 5.0, 0.0, 0.0)];
        let c = m.candidates(&slots, &[true, true], &Vector3::new(0.0, 0.0, 0.0), true);
        assert_eq!(c.targets.len(), 2);
        assert!(c.targets[0].1 > c.targets[1].1);
        assert_relative_eq!(c.birth, 0.1 / 8.0);
        assert_relative_eq!(c.clutter, 0.05 / 8.0);

        // half of the detection prior goes to each target
        let innovation = m.target_innovation(&slots[0], &Vector3::zeros()).unwrap();
        assert_relative_eq!(c.targets[0].1, 0.85 / 2.0 * innovation.likelihood);
    }

    #[test]
    fn ineligible_and_capacity() {
        let m = model(TrackerOptions::default());
        let slots = vec![slot_at(1, 0.0, 0.0, 0.0)];
        let c = m.candidates(&slots, &[false], &Vector3::zeros(), false);
        assert!(c.targets.is_empty());
        assert_eq!(c.birth, 0.0);
        assert!(c.clutter > 0.0);
        assert_relative_eq!(c.total(), c.clutter);
    }

    fn flat_slot(id: u64) -> TargetSlot {
        let mut slot = TargetSlot::newborn(PointState::new(
            Vector6::zeros(),
            StateMatrix::from_diagonal(&Vector6::new(1.0, 1.0, 1e-24, 1.0, 1.0, 1.0)),
        ));
        slot.id = id;
        slot
    }

    #[test]
    fn singular_innovation_is_regularized() {
        let opts = TrackerOptions::default().measurement_noise(&[1.0, 1.0, 1e-24]);
        let m = model(opts.clone());
        let slot = flat_slot(1);
        assert!(m.filter().innovation(&slot.state, &Vector3::zeros(), 0.0).is_err());

        let innovation = m.target_innovation(&slot, &Vector3::zeros()).unwrap();
        assert_relative_eq!(innovation.covariance[(2, 2)], 1e-6, max_relative = 1e-9);
        assert!(innovation.likelihood.is_finite() && innovation.likelihood > 0.0);
        let c = m.candidates(&[slot.clone()], &[true], &Vector3::zeros(), true);
        assert_eq!(c.targets.len(), 1);
        assert_eq!(c.targets[0].0, 0);

        // too little regularization to recover
        let m = model(opts.regularization(1e-24));
        assert!(m.target_innovation(&slot, &Vector3::zeros()).is_none());
        let c = m.candidates(&[slot], &[true], &Vector3::zeros(), true);
        assert!(c.targets.is_empty());
        assert!(c.birth > 0.0);
    }

    #[test]
    fn gaussian_birth_density() {
        let m = model(TrackerOptions::default().birth_density(BirthDensity::Gaussian));
        assert!(m.birth_density(&Vector3::zeros()) > m.birth_density(&Vector3::new(3.0, 0.0, 0.0)));
    }

    #[test]
    fn sampling_follows_probabilities() {
        let m = model(TrackerOptions::default());
        let slots = vec![slot_at(1, 0.0, 0.0, 0.0)];
        let c = m.candidates(&slots, &[true], &Vector3::new(0.05, 0.0, 0.0), true);
        let mut rng = StdRng::seed_from_u64(7);
        let mut hits = 0;
        for _ in 0..1000 {
            let (origin, likelihood, increment) = m.sample(&c, &mut rng);
            assert_relative_eq!(increment, c.total());
            if origin == Origin::Target(0) {
                hits += 1;
                assert_relative_eq!(likelihood, c.targets[0].1);
            }
        }
        // the target hypothesis dominates by orders of magnitude
        assert!(hits > 980);
    }

    #[test]
    fn sampling_without_candidates() {
        let m = model(TrackerOptions::default().clutter_probability(0.0));
        let c = m.candidates(&[], &[], &Vector3::zeros(), false);
        let mut rng = StdRng::seed_from_u64(1);
        let (origin, _, increment) = m.sample(&c, &mut rng);
        assert_eq!(origin, Origin::Clutter);
        assert_eq!(increment, 0.0);
    }

    #[test]
    fn greedy_selection() {
        let m = model(TrackerOptions::default().association(AssociationMode::Greedy));
        let slots = vec![slot_at(1, 0.0, 0.0, 0.0)];

        let near = m.candidates(&slots, &[true], &Vector3::new(0.05, 0.0, 0.0), true);
        let (origin, likelihood, increment) = m.select(&near);
        assert_eq!(origin, Origin::Target(0));
        assert_eq!(likelihood, increment);

        let far = m.candidates(&slots, &[true], &Vector3::new(3.0, 0.0, 0.0), true);
        assert_eq!(m.select(&far).0, Origin::Birth);

        let batch = vec![far.clone(), near.clone()];
        assert_eq!(
            m.select_batch(&batch, 1, 1),
            vec![Origin::Birth, Origin::Target(0)]
        );
        assert_eq!(
            m.select_batch(&batch, 1, 0),
            vec![Origin::Clutter, Origin::Target(0)]
        );
        assert_eq!(m.select_batch(&[far], 1, 0), vec![Origin::Clutter]);
    }
}
