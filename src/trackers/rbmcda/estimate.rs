use crate::trackers::rbmcda::options::MeasurementKind;
use crate::trackers::rbmcda::particle::Particle;
use crate::trackers::rbmcda::target::TargetSlot;
use crate::utils::kalman::kalman_3d_point::{StateMatrix, StateVector, DIM_3D_POINT};
use crate::EPS;
use itertools::Itertools;
use nalgebra::Vector3;
use std::collections::BTreeMap;

/// How the per-target answer is read from the particle population
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EstimateMode {
    /// the targets of the highest-weight particle
    BestParticle,
    /// weighted average over the particles holding each target id; ids held by less than
    /// `min_support` of the total weight are not reported
    Consensus { min_support: f64 },
}

impl Default for EstimateMode {
    fn default() -> Self {
        EstimateMode::Consensus { min_support: 0.5 }
    }
}

/// Reported state of one target
///
#[derive(Debug, Clone, PartialEq)]
pub struct TargetEstimate {
    pub id: u64,
    /// position, or unit direction for direction measurements
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    /// covariance of `[x, y, z, vx, vy, vz]`, including the spread between particles
    pub covariance: StateMatrix,
    /// square root of the trace of the position covariance
    pub spread: f64,
    /// total weight of the particles that hold the target
    pub support: f64,
    /// steps since birth, taken from the most supported particle
    pub age: usize,
}

impl TargetEstimate {
    fn from_moments(
        id: u64,
        mean: StateVector,
        covariance: StateMatrix,
        support: f64,
        age: usize,
    ) -> Self {
        let spread = covariance
            .fixed_view::<DIM_3D_POINT, DIM_3D_POINT>(0, 0)
            .trace()
            .max(0.0)
            .sqrt();
        Self {
            id,
            position: mean.fixed_rows::<DIM_3D_POINT>(0).clone_owned(),
            velocity: mean.fixed_rows::<DIM_3D_POINT>(DIM_3D_POINT).clone_owned(),
            covariance,
            spread,
            support,
            age,
        }
    }

    fn from_slot(slot: &TargetSlot, support: f64) -> Self {
        Self::from_moments(
            slot.id,
            slot.state.mean,
            slot.state.covariance,
            support,
            slot.age,
        )
    }
}

/// Builds the per-target estimates of the population, ordered by id.
///
/// Particle weights are expected to be normalized.
///
pub fn extract(
    particles: &[Particle],
    mode: EstimateMode,
    kind: MeasurementKind,
) -> Vec<TargetEstimate> {
    let mut estimates = match mode {
        EstimateMode::BestParticle => best_particle(particles),
        EstimateMode::Consensus { min_support } => consensus(particles, min_support),
    };
    if kind == MeasurementKind::Direction {
        for e in estimates.iter_mut() {
            if let Some(direction) = e.position.try_normalize(EPS) {
                e.position = direction;
            }
        }
    }
    estimates
}

fn best_particle(particles: &[Particle]) -> Vec<TargetEstimate> {
    let best = particles.iter().position_max_by(|a, b| {
        a.weight()
            .partial_cmp(&b.weight())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    match best {
        Some(i) => {
            let p = &particles[i];
            p.targets()
                .iter()
                .map(|t| TargetEstimate::from_slot(t, p.weight()))
                .sorted_by_key(|e| e.id)
                .collect()
        }
        None => Vec::default(),
    }
}

struct Moments {
    weight: f64,
    mean: StateVector,
    covariance: StateMatrix,
    /// (weight, age) of the heaviest particle holding the target
    heaviest: (f64, usize),
}

impl Moments {
    fn new() -> Self {
        Self {
            weight: 0.0,
            mean: StateVector::zeros(),
            covariance: StateMatrix::zeros(),
            heaviest: (0.0, 0),
        }
    }
}

/// Every target paired with the normalized weight of its particle
///
fn holders(particles: &[Particle], total: f64) -> impl Iterator<Item = (f64, &TargetSlot)> + '_ {
    particles.iter().flat_map(move |p| {
        p.targets()
            .iter()
            .map(move |t| (p.weight() / total, t))
    })
}

fn consensus(particles: &[Particle], min_support: f64) -> Vec<TargetEstimate> {
    let total: f64 = particles.iter().map(|p| p.weight()).sum();
    if total <= 0.0 {
        return Vec::default();
    }

    let mut moments: BTreeMap<u64, Moments> = BTreeMap::new();
    for (w, t) in holders(particles, total) {
        let m = moments.entry(t.id).or_insert_with(Moments::new);
        m.weight += w;
        m.mean += t.state.mean * w;
        if w > m.heaviest.0 {
            m.heaviest = (w, t.age);
        }
    }
    moments.retain(|_, m| m.weight >= min_support - EPS && m.weight > 0.0);
    for m in moments.values_mut() {
        m.mean /= m.weight;
    }

    // mixture covariance: within-particle covariance plus the spread of the particle means
    for (w, t) in holders(particles, total) {
        if let Some(m) = moments.get_mut(&t.id) {
            let d = t.state.mean - m.mean;
            m.covariance += (t.state.covariance + d * d.transpose()) * w;
        }
    }

    moments
        .into_iter()
        .map(|(id, m)| {
            TargetEstimate::from_moments(
                id,
                m.mean,
                m.covariance / m.weight,
                m.weight,
                m.heaviest.1,
            )
        })
        .collect()
}
