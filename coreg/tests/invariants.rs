//! Properties that hold for every registration.

mod support;

use coreg::{AutoRegConfig, Gruen, MaximumCorrelation, RegisterStatus};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use support::{assert_near, matcher, register_at, shifted_pair};

#[test]
fn registrations_stay_inside_the_search_window() {
    let config = AutoRegConfig::new(MaximumCorrelation::NAME, 0.8, (15, 15), (31, 31));
    let radius = (31 - 15) as f64 / 2.0;
    let slack = config.surface_model.distance_tolerance;
    let mut rng = StdRng::seed_from_u64(17);
    let mut matcher = matcher(&config);

    for _ in 0..12 {
        let shift = (rng.random_range(-12.0..12.0), rng.random_range(-12.0..12.0));
        let (pattern, search) = shifted_pair(120, shift);

        let registration = register_at(&mut matcher, &pattern, &search, (60.0, 50.0));

        let Some((s, l)) = registration.cube_position() else {
            continue;
        };
        assert!(
            (s - 60.0).abs() <= radius + slack && (l - 50.0).abs() <= radius + slack,
            "shift {:?} registered at ({}, {})",
            shift,
            s,
            l
        );
        if shift.0.abs() < radius - 1.0 && shift.1.abs() < radius - 1.0 {
            assert_near((s, l), (60.0 + shift.0, 50.0 + shift.1), 0.3);
        }
    }
    assert_eq!(matcher.statistics().attempts(), 12);
}

#[test]
fn adaptive_registration_is_idempotent_at_its_fixed_point() {
    let (pattern, search) = shifted_pair(120, (1.4, -0.7));
    let config = AutoRegConfig::new(Gruen::ADAPTIVE_NAME, 10.0, (15, 15), (31, 31));
    let mut matcher = matcher(&config);

    let first = register_at(&mut matcher, &pattern, &search, (60.0, 50.0));
    assert_eq!(first.status, RegisterStatus::SuccessSubPixel);
    let converged = first.gruen.as_ref().unwrap().chip_affine().unwrap();

    // Reload the search chip through the converged geometry and register again.
    matcher
        .search_chip_mut()
        .load_with_affine(&search, &converged, false, 1)
        .unwrap();
    let second = matcher.register().unwrap();

    assert_eq!(second.status, RegisterStatus::SuccessSubPixel);
    let solution = second.gruen.as_ref().unwrap();
    assert_eq!(solution.iterations, 1);
    assert_near(
        second.cube_position().unwrap(),
        first.cube_position().unwrap(),
        0.1,
    );
}
