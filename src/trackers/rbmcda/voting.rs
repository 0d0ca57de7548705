use crate::trackers::rbmcda::association::Origin;
use pathfinding::kuhn_munkres::kuhn_munkres;
use pathfinding::matrix::Matrix;

const LOG_LIKELIHOOD_MULT: f64 = 1_000.0;
const LOG_LIKELIHOOD_FLOOR: f64 = -1.0e6;

/// Maximum-likelihood joint assignment of a measurement batch.
///
/// Each measurement is a row. Columns are the eligible targets, followed by `births` birth
/// columns and one clutter column per measurement, so every target gets at most one measurement
/// and no more than `births` new targets are created. Log-likelihoods are scaled to integers for
/// the Hungarian solver.
///
pub struct GreedyVoting {
    measurements: usize,
    targets: usize,
    births: usize,
}

impl GreedyVoting {
    pub fn new(measurements: usize, targets: usize, births: usize) -> Self {
        Self {
            measurements,
            targets,
            births: births.min(measurements),
        }
    }

    fn weight(likelihood: f64) -> i64 {
        let ln = if likelihood > 0.0 {
            likelihood.ln().max(LOG_LIKELIHOOD_FLOOR)
        } else {
            LOG_LIKELIHOOD_FLOOR
        };
        (ln * LOG_LIKELIHOOD_MULT) as i64
    }

    /// # Parameters
    /// * `targets` - `targets[i][j]` is the likelihood of measurement `i` under target `j`, zero when the target can not take it
    /// * `births` - the birth likelihood of every measurement
    /// * `clutter` - the clutter likelihood
    ///
    pub fn winners(&self, targets: &[Vec<f64>], births: &[f64], clutter: f64) -> Vec<Origin> {
        if self.measurements == 0 {
            return Vec::default();
        }

        let columns = self.targets + self.births + self.measurements;
        let floor = Self::weight(0.0);
        let mut cost_matrix = Matrix::new(self.measurements, columns, floor);

        for row in 0..self.measurements {
            for col in 0..self.targets {
                let l = targets[row].get(col).copied().unwrap_or(0.0);
                if let Some(v) = cost_matrix.get_mut((row, col)) {
                    *v = Self::weight(l);
                }
            }
            for col in self.targets..self.targets + self.births {
                if let Some(v) = cost_matrix.get_mut((row, col)) {
                    *v = Self::weight(births[row]);
                }
            }
            for col in self.targets + self.births..columns {
                if let Some(v) = cost_matrix.get_mut((row, col)) {
                    *v = Self::weight(clutter);
                }
            }
        }

        let (_, solution) = kuhn_munkres(&cost_matrix);

        solution
            .into_iter()
            .map(|col| {
                if col < self.targets {
                    Origin::Target(col)
                } else if col < self.targets + self.births {
                    Origin::Birth
                } else {
                    Origin::Clutter
                }
            })
            .collect()
    }
}
