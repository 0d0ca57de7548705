use anyhow::Result;
use rbmcda::examples::PointGen3;
use rbmcda::prelude::{Tracker, TrackerOptions, Vector3};

fn main() -> Result<()> {
    env_logger::init();

    let opts = TrackerOptions::default()
        .seed(1)
        .measurement_noise(&[0.0025; 3])
        .process_noise(1e-3);
    let mut tracker = Tracker::new(&opts)?;

    let a = PointGen3::new(
        Vector3::new(-1.0, -1.0, 0.0),
        Vector3::new(0.5, 0.5, 0.0),
        0.1,
        0.05,
        1,
    )?;
    let b = PointGen3::new(
        Vector3::new(-1.0, 1.0, 0.0),
        Vector3::new(0.5, -0.5, 0.0),
        0.1,
        0.05,
        2,
    )?;

    // one source is observed per step, alternating
    for (k, (ea, eb)) in a.zip(b).take(41).enumerate() {
        let z = if k % 2 == 0 { ea.measurement } else { eb.measurement };
        let estimates = tracker.step(&[z], ea.timestamp);
        let report = tracker.last_report();
        eprintln!(
            "t={:.1} neff={:.1} resampled={} targets={:?}",
            ea.timestamp,
            report.effective_sample_size,
            report.resampled,
            estimates
                .iter()
                .map(|e| (e.id, e.position.x, e.position.y))
                .collect::<Vec<_>>()
        );
    }
    Ok(())
}
