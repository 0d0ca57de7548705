use crate::trackers::rbmcda::association::AssociationModel;
use crate::trackers::rbmcda::options::TrackerPriors;
use crate::trackers::rbmcda::target::TargetSlot;
use crate::Errors;
use anyhow::Result;
use log::trace;
use nalgebra::Vector3;
use statrs::distribution::{ContinuousCDF, Gamma};
use std::cmp::Ordering;

/// Creation and removal of targets inside a particle
///
#[derive(Debug, Clone)]
pub struct BirthDeathModel {
    max_active_targets: usize,
    max_missed_steps: usize,
    existence_floor: f64,
    multi_death: bool,
    death_time: Gamma,
}

impl BirthDeathModel {
    pub fn new(priors: &TrackerPriors) -> Result<Self> {
        let death_time = Gamma::new(priors.death_time_shape, 1.0 / priors.death_time_scale)
            .map_err(|e| Errors::InvalidConfig(format!("death_time: {}", e)))?;
        Ok(Self {
            max_active_targets: priors.max_active_targets,
            max_missed_steps: priors.max_missed_steps,
            existence_floor: priors.existence_floor,
            multi_death: priors.multi_death,
            death_time,
        })
    }

    /// How many more targets a particle holding `targets` may start
    ///
    pub fn birth_capacity(&self, targets: usize) -> usize {
        self.max_active_targets.saturating_sub(targets)
    }

    /// Creates a target from the measurement that gave birth to it.
    ///
    /// The slot is seeded at `z` with the prior velocity and covariance and then updated with
    /// `z`, so its position equals the measurement. Its id stays pending until the tracker labels
    /// the birth event.
    ///
    pub fn spawn(&self, association: &AssociationModel, z: &Vector3<f64>) -> TargetSlot {
        let filter = association.filter();
        let seed = filter.initiate(z, association.prior());
        let state = match filter.innovation(&seed, z, 0.0) {
            Ok(innovation) => filter.correct(&seed, &innovation),
            Err(_) => seed,
        };
        trace!("Target spawned at {:?}", z.as_slice());
        state.dump();
        TargetSlot::newborn(state)
    }

    /// Probability that the target still exists given the time since it was last associated
    ///
    pub fn existence_probability(&self, slot: &TargetSlot) -> f64 {
        self.death_time.sf(slot.since_update.max(0.0))
    }

    pub fn condemned(&self, slot: &TargetSlot) -> bool {
        slot.missed >= self.max_missed_steps
            || self.existence_probability(slot) < self.existence_floor
    }

    /// Removes condemned targets and returns the ids removed
    ///
    pub fn apply_deaths(&self, slots: &mut Vec<TargetSlot>) -> Vec<u64> {
        let mut condemned = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| self.condemned(s))
            .map(|(i, s)| (i, s.missed, self.existence_probability(s)))
            .collect::<Vec<_>>();

        if !self.multi_death && condemned.len() > 1 {
            // the most stale target dies, the others wait for the next step
            condemned.sort_by(|a, b| {
                b.1.cmp(&a.1)
                    .then(a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal))
            });
            condemned.truncate(1);
        }

        let doomed = condemned.iter().map(|(i, _, _)| *i).collect::<Vec<_>>();
        let dead = doomed.iter().map(|i| slots[*i].id).collect::<Vec<_>>();
        if !dead.is_empty() {
            trace!("Targets removed: {:?}", &dead);
            let mut index = 0;
            slots.retain(|_| {
                let keep = !doomed.contains(&index);
                index += 1;
                keep
            });
        }
        dead
    }
}

#[cfg(test)]
mod tests {
    use crate::trackers::rbmcda::association::AssociationModel;
    use crate::trackers::rbmcda::birth_death::BirthDeathModel;
    use crate::trackers::rbmcda::options::TrackerOptions;
    use crate::trackers::rbmcda::target::TargetSlot;
    use crate::utils::kalman::kalman_3d_point::{PointState, StateMatrix};
    use approx::assert_relative_eq;
    use nalgebra::{Vector3, Vector6};

    fn models(opts: TrackerOptions) -> (AssociationModel, BirthDeathModel) {
        let priors = opts.build().unwrap();
        (
            AssociationModel::new(&priors),
            BirthDeathModel::new(&priors).unwrap(),
        )
    }

    fn slot(id: u64, missed: usize, since_update: f64) -> TargetSlot {
        let mut s = TargetSlot::newborn(PointState::new(
            Vector6::zeros(),
            StateMatrix::identity(),
        ));
        s.id = id;
        s.missed = missed;
        s.since_update = since_update;
        s
    }

    #[test]
    fn spawn_at_measurement_with_zero_velocity() {
        let (a, bd) = models(TrackerOptions::default());
        let z = Vector3::new(0.3, -1.2, 2.0);
        let s = bd.spawn(&a, &z);
        assert!(s.is_pending());
        assert_eq!(s.age(), 0);
        assert_relative_eq!(s.position(), z, epsilon = 1e-12);
        assert_eq!(s.velocity(), Vector3::zeros());
        // the seeding update shrinks the prior position variance
        assert!(s.state().covariance[(0, 0)] < 0.25);
        assert!(s.state().min_eigenvalue() >= -1e-9);
    }

    #[test]
    fn capacity() {
        let (_, bd) = models(TrackerOptions::default().max_active_targets(2));
        assert_eq!(bd.birth_capacity(0), 2);
        assert_eq!(bd.birth_capacity(2), 0);
        assert_eq!(bd.birth_capacity(5), 0);
    }

    #[test]
    fn miss_threshold() {
        let (_, bd) = models(TrackerOptions::default().max_missed_steps(3));
        let mut slots = vec![slot(1, 2, 0.2), slot(2, 3, 0.3), slot(3, 0, 0.0)];
        assert!(!bd.condemned(&slots[0]));
        assert!(bd.condemned(&slots[1]));
        let dead = bd.apply_deaths(&mut slots);
        assert_eq!(dead, vec![2]);
        assert_eq!(slots.iter().map(|s| s.id()).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn existence_floor() {
        let (_, bd) = models(
            TrackerOptions::default()
                .death_time(1.0, 1.0)
                .existence_floor(0.1),
        );
        // exponential survival: exp(-t)
        assert_relative_eq!(
            bd.existence_probability(&slot(1, 0, 1.0)),
            (-1.0f64).exp(),
            epsilon = 1e-9
        );
        assert!(!bd.condemned(&slot(1, 0, 2.0)));
        assert!(bd.condemned(&slot(1, 0, 2.5)));
    }

    #[test]
    fn floor_disabled_by_default() {
        let (_, bd) = models(TrackerOptions::default());
        assert!(!bd.condemned(&slot(1, 0, 1e6)));
    }

    #[test]
    fn single_death_per_step() {
        let (_, bd) = models(
            TrackerOptions::default()
                .max_missed_steps(2)
                .multi_death(false),
        );
        let mut slots = vec![slot(1, 2, 0.2), slot(2, 4, 0.4), slot(3, 3, 0.3)];
        assert_eq!(bd.apply_deaths(&mut slots), vec![2]);
        assert_eq!(bd.apply_deaths(&mut slots), vec![3]);
        assert_eq!(bd.apply_deaths(&mut slots), vec![1]);
        assert!(slots.is_empty());
    }
}
