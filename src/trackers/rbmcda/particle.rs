use crate::trackers::rbmcda::association::{
    AssociationModel, Candidates, Decision, Hypothesis, Origin,
};
use crate::trackers::rbmcda::birth_death::BirthDeathModel;
use crate::trackers::rbmcda::options::AssociationMode;
use crate::trackers::rbmcda::target::TargetSlot;
use log::trace;
use nalgebra::Vector3;
use rand::Rng;
use std::collections::HashMap;

/// Read-only models and the elapsed time shared by all particles during a step
///
pub struct StepContext<'a> {
    pub association: &'a AssociationModel,
    pub birth_death: &'a BirthDeathModel,
    pub dt: f64,
}

/// One weighted hypothesis of the whole scene
///
#[derive(Debug, Clone)]
pub struct Particle {
    pub(crate) weight: f64,
    targets: Vec<TargetSlot>,
    decisions: Vec<Decision>,
    pending_births: Vec<usize>,
    born: Vec<u64>,
    dead: Vec<u64>,
}

impl Particle {
    pub fn new(weight: f64) -> Self {
        Self {
            weight,
            targets: Vec::default(),
            decisions: Vec::default(),
            pending_births: Vec::default(),
            born: Vec::default(),
            dead: Vec::default(),
        }
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn targets(&self) -> &[TargetSlot] {
        &self.targets
    }

    pub fn target(&self, id: u64) -> Option<&TargetSlot> {
        self.targets.iter().find(|t| t.id == id)
    }

    #[cfg(test)]
    pub(crate) fn push_target(&mut self, slot: super::target::TargetSlot) {
        self.targets.push(slot);
    }

    /// Hypotheses picked for the measurements of the last step
    ///
    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    /// Ids of the targets born during the last step
    ///
    pub fn born(&self) -> &[u64] {
        &self.born
    }

    /// Ids of the targets removed during the last step
    ///
    pub fn dead(&self) -> &[u64] {
        &self.dead
    }

    /// Measurement indices that started a target during the current step and still wait for an id
    ///
    pub fn pending_births(&self) -> &[usize] {
        &self.pending_births
    }

    /// Runs predict, association, update, birth and death for one step and updates the weight.
    ///
    /// In sampled mode the weight is multiplied, per measurement, by the normalizing constant of
    /// the proposal, i.e. the total prior-weighted likelihood over all hypotheses, not by the
    /// likelihood of the drawn one. In greedy mode it is multiplied by the likelihood of the
    /// chosen hypothesis.
    ///
    pub fn advance<R: Rng>(&mut self, ctx: &StepContext, measurements: &[Vector3<f64>], rng: &mut R) {
        self.decisions.clear();
        self.pending_births.clear();
        self.born.clear();
        self.dead.clear();

        let filter = ctx.association.filter();
        for slot in self.targets.iter_mut() {
            let state = filter.predict(&slot.state, ctx.dt);
            slot.advance(state, ctx.dt);
        }

        let existing = self.targets.len();
        let mut hit = vec![false; existing];
        let factor = match ctx.association.mode() {
            AssociationMode::Sampled => self.associate_sampled(ctx, measurements, &mut hit, rng),
            AssociationMode::Greedy => self.associate_greedy(ctx, measurements, &mut hit),
        };

        for (slot, hit) in self.targets.iter_mut().zip(hit.iter()) {
            if !hit {
                slot.miss();
            }
        }

        self.dead = ctx.birth_death.apply_deaths(&mut self.targets);
        self.weight *= factor;
        trace!(
            "Particle decisions: {:?}, weight factor: {}",
            &self.decisions,
            factor
        );
    }

    fn associate_sampled<R: Rng>(
        &mut self,
        ctx: &StepContext,
        measurements: &[Vector3<f64>],
        hit: &mut [bool],
        rng: &mut R,
    ) -> f64 {
        let existing = hit.len();
        let mut factor = 1.0;
        for (k, z) in measurements.iter().enumerate() {
            let eligible = (0..self.targets.len())
                .map(|i| i < existing && !hit[i])
                .collect::<Vec<_>>();
            let birth_allowed = ctx.birth_death.birth_capacity(self.targets.len()) > 0;
            let candidates = ctx
                .association
                .candidates(&self.targets, &eligible, z, birth_allowed);
            let (origin, likelihood, increment) = ctx.association.sample(&candidates, rng);
            factor *= increment;
            self.apply(ctx, k, z, origin, likelihood, &candidates, hit);
        }
        factor
    }

    fn associate_greedy(
        &mut self,
        ctx: &StepContext,
        measurements: &[Vector3<f64>],
        hit: &mut [bool],
    ) -> f64 {
        let existing = hit.len();
        let capacity = ctx.birth_death.birth_capacity(existing);
        let eligible = vec![true; existing];
        let batch = measurements
            .iter()
            .map(|z| {
                ctx.association
                    .candidates(&self.targets, &eligible, z, capacity > 0)
            })
            .collect::<Vec<_>>();
        let origins = ctx.association.select_batch(&batch, existing, capacity);

        let mut factor = 1.0;
        for (k, (z, origin)) in measurements.iter().zip(origins).enumerate() {
            let candidates = &batch[k];
            let likelihood = match origin {
                Origin::Target(i) => candidates
                    .targets
                    .iter()
                    .find(|(slot, _, _)| *slot == i)
                    .map(|(_, l, _)| *l)
                    .unwrap_or(0.0),
                Origin::Birth => candidates.birth,
                Origin::Clutter => candidates.clutter,
            };
            factor *= likelihood;
            self.apply(ctx, k, z, origin, likelihood, candidates, hit);
        }
        factor
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &mut self,
        ctx: &StepContext,
        measurement: usize,
        z: &Vector3<f64>,
        origin: Origin,
        likelihood: f64,
        candidates: &Candidates,
        hit: &mut [bool],
    ) {
        let hypothesis = match origin {
            Origin::Target(i) => match candidates.innovation(i) {
                Some(innovation) => {
                    let slot = &mut self.targets[i];
                    let state = ctx.association.filter().correct(&slot.state, innovation);
                    slot.hit(state);
                    hit[i] = true;
                    Hypothesis::Target(slot.id)
                }
                None => Hypothesis::Clutter,
            },
            Origin::Birth => {
                self.targets.push(ctx.birth_death.spawn(ctx.association, z));
                self.pending_births.push(measurement);
                Hypothesis::Birth
            }
            Origin::Clutter => Hypothesis::Clutter,
        };
        self.decisions.push(Decision {
            measurement,
            hypothesis,
            likelihood,
        });
    }

    /// Labels the targets born in this step.
    ///
    /// # Parameters
    /// * `ids` - the id allocated to every measurement index that started a target in any particle
    ///
    pub(crate) fn assign_birth_ids(&mut self, ids: &HashMap<usize, u64>) {
        let mut pending = self.pending_births.iter();
        for slot in self.targets.iter_mut().filter(|s| s.is_pending()) {
            if let Some(id) = pending.next().and_then(|k| ids.get(k)) {
                slot.id = *id;
                self.born.push(*id);
            }
        }
        self.pending_births.clear();
    }
}
