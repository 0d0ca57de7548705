use anyhow::Result;
use rbmcda::examples::PointGen3;
use rbmcda::prelude::{EstimateMode, MeasurementKind, Tracker, TrackerOptions, Vector3};

fn main() -> Result<()> {
    env_logger::init();

    let opts = TrackerOptions::default()
        .seed(3)
        .measurement_kind(MeasurementKind::Direction)
        .measurement_noise(&[1e-4; 3])
        .estimate(EstimateMode::BestParticle);
    let mut tracker = Tracker::new(&opts)?;

    // a source orbiting slowly around the receiver, observed as directions of arrival
    let source = PointGen3::new(
        Vector3::new(3.0, 0.0, 1.0),
        Vector3::new(0.0, 0.3, 0.0),
        0.1,
        0.02,
        5,
    )?;
    for e in source.take(50) {
        let estimates = tracker.step(&[e.measurement], e.timestamp);
        if let Some(t) = estimates.first() {
            eprintln!(
                "t={:.1} id={} direction={:?} truth={:?}",
                e.timestamp,
                t.id,
                t.position.as_slice(),
                e.truth.normalize().as_slice()
            );
        }
    }
    Ok(())
}
