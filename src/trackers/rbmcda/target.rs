use crate::utils::kalman::kalman_3d_point::{PointState, DIM_3D_POINT};
use nalgebra::Vector3;

/// Identifier a slot carries until the tracker assigns a real id to its birth event
pub const PENDING_ID: u64 = 0;

/// One hypothesized source inside a particle
///
#[derive(Debug, Clone)]
pub struct TargetSlot {
    /// unique id of the target, never reused after its death
    ///
    pub(crate) id: u64,
    /// kinematic estimate `[x, y, z, vx, vy, vz]`
    ///
    pub(crate) state: PointState,
    /// steps since birth
    ///
    pub(crate) age: usize,
    /// consecutive steps without association
    ///
    pub(crate) missed: usize,
    /// seconds since the last association
    ///
    pub(crate) since_update: f64,
}

impl TargetSlot {
    pub(crate) fn newborn(state: PointState) -> Self {
        Self {
            id: PENDING_ID,
            state,
            age: 0,
            missed: 0,
            since_update: 0.0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> &PointState {
        &self.state
    }

    pub fn position(&self) -> Vector3<f64> {
        self.state.mean.fixed_rows::<DIM_3D_POINT>(0).clone_owned()
    }

    pub fn velocity(&self) -> Vector3<f64> {
        self.state.mean.fixed_rows::<DIM_3D_POINT>(DIM_3D_POINT).clone_owned()
    }

    pub fn age(&self) -> usize {
        self.age
    }

    pub fn missed(&self) -> usize {
        self.missed
    }

    pub fn since_update(&self) -> f64 {
        self.since_update
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.id == PENDING_ID
    }

    /// Called when a measurement was associated with the slot
    ///
    pub(crate) fn hit(&mut self, state: PointState) {
        self.state = state;
        self.missed = 0;
        self.since_update = 0.0;
    }

    /// Called when a step completed without an association
    ///
    pub(crate) fn miss(&mut self) {
        self.missed += 1;
    }

    /// Ages the slot by one step of `dt` seconds
    ///
    pub(crate) fn advance(&mut self, state: PointState, dt: f64) {
        self.state = state;
        self.age += 1;
        self.since_update += dt;
    }
}

/// Hands out process-unique target ids for one tracker instance
///
#[derive(Debug, Clone)]
pub struct IdentityAllocator {
    last: u64,
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self { last: PENDING_ID }
    }
}

impl IdentityAllocator {
    pub fn allocate(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// The most recently allocated id, `0` if none were handed out yet
    ///
    pub fn last(&self) -> u64 {
        self.last
    }
}
