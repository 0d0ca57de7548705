#![feature(test)]

extern crate test;

use nalgebra::Vector3;
use rbmcda::examples::PointGen3;
use rbmcda::utils::kalman::kalman_3d_point::Point3DKalmanFilter;
use test::Bencher;

#[bench]
fn kalman_3d_point_100k(b: &mut Bencher) {
    const N: usize = 100_000;
    let f = Point3DKalmanFilter::default();
    let mut pt = PointGen3::new(
        Vector3::new(-10.0, 2.0, 0.0),
        Vector3::new(0.2, 0.0, 0.1),
        0.1,
        0.1,
        1,
    )
    .unwrap();
    let prior = rbmcda::prelude::TrackerOptions::default()
        .build()
        .unwrap()
        .prior;

    b.iter(|| {
        let mut state = f.initiate(&pt.next().unwrap().measurement, &prior);
        for _i in 0..N {
            let z = pt.next().unwrap().measurement;
            state = f.predict(&state, 0.1);
            state = f.update(&state, &z).unwrap().0;
        }
    });
}
