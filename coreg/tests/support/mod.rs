#![allow(dead_code)]

use coreg::{AutoReg, AutoRegConfig, MatcherRegistry, MemoryRaster, Registration};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Smooth random texture: a handful of random sinusoids.
pub fn texture(seed: u64) -> impl Fn(f64, f64) -> f64 + Clone {
    let mut rng = StdRng::seed_from_u64(seed);
    let waves: Vec<(f64, f64, f64, f64)> = (0..6)
        .map(|_| {
            (
                rng.random_range(0.05..0.3),
                rng.random_range(0.05..0.3),
                rng.random_range(0.0..std::f64::consts::TAU),
                rng.random_range(5.0..20.0),
            )
        })
        .collect();
    move |s, l| {
        100.0
            + waves
                .iter()
                .map(|(fx, fy, ph, amp)| amp * (fx * s + fy * l + ph).sin())
                .sum::<f64>()
    }
}

/// Pattern `(s, l)` shows up at search `(s + shift.0, l + shift.1)`.
pub fn shifted_pair(size: usize, shift: (f64, f64)) -> (MemoryRaster, MemoryRaster) {
    let t = texture(7);
    let pattern = MemoryRaster::from_fn(size, size, &t);
    let search = MemoryRaster::from_fn(size, size, |s, l| t(s - shift.0, l - shift.1));
    (pattern, search)
}

pub fn matcher(config: &AutoRegConfig) -> AutoReg {
    MatcherRegistry::default().create(config).unwrap()
}

pub fn register_at(
    matcher: &mut AutoReg,
    pattern: &MemoryRaster,
    search: &MemoryRaster,
    at: (f64, f64),
) -> Registration {
    matcher.pattern_chip_mut().tack_cube(at.0, at.1);
    matcher.pattern_chip_mut().load(pattern, 0.0, 1.0, 1).unwrap();
    matcher.search_chip_mut().tack_cube(at.0, at.1);
    matcher.search_chip_mut().load(search, 0.0, 1.0, 1).unwrap();
    matcher.register().unwrap()
}

pub fn assert_near(actual: (f64, f64), expected: (f64, f64), tolerance: f64) {
    assert!(
        (actual.0 - expected.0).abs() <= tolerance && (actual.1 - expected.1).abs() <= tolerance,
        "{:?} is not within {} of {:?}",
        actual,
        tolerance,
        expected
    );
}
