/// Rao-Blackwellized Monte Carlo data association tracker for an unknown number of point sources
///
pub mod rbmcda;
