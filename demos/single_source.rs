use anyhow::Result;
use rbmcda::examples::PointGen3;
use rbmcda::prelude::{Tracker, TrackerOptions, Vector3};

fn main() -> Result<()> {
    env_logger::init();

    let mut tracker = Tracker::new(&TrackerOptions::default().particles(50).seed(42))?;
    let source = PointGen3::new(
        Vector3::new(0.5, -0.5, 0.2),
        Vector3::new(0.1, 0.0, 0.0),
        0.1,
        0.1,
        7,
    )?;

    for e in source.take(60) {
        let estimates = tracker.step(&[e.measurement], e.timestamp);
        for t in estimates {
            eprintln!(
                "t={:.1} id={} position={:?} truth={:?} spread={:.3} support={:.2}",
                e.timestamp,
                t.id,
                t.position.as_slice(),
                e.truth.as_slice(),
                t.spread,
                t.support
            );
        }
    }

    // the source goes silent and is eventually dropped
    let mut t = 6.0;
    while !tracker.estimates().is_empty() {
        t += 0.1;
        tracker.step(&[], t);
    }
    eprintln!("Source removed at t={:.1}", t);
    Ok(())
}
