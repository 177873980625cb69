use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::config::AutoRegConfig;
use crate::matcher::{PatternFailure, RegisterStatus};
use crate::raster::MemoryRaster;
use crate::registry::MatcherRegistry;

/// Smooth random texture: a handful of random sinusoids.
fn texture(seed: u64) -> impl Fn(f64, f64) -> f64 {
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

/// Pattern and search rasters where pattern `(s, l)` shows up at search
/// `(s + shift.0, l + shift.1)`.
fn shifted_pair(shift: (f64, f64)) -> (MemoryRaster, MemoryRaster) {
    let t = texture(3);
    let pattern = MemoryRaster::from_fn(120, 100, |s, l| t(s + 20.0, l + 20.0));
    let search = MemoryRaster::from_fn(120, 100, |s, l| t(s + 20.0 - shift.0, l + 20.0 - shift.1));
    (pattern, search)
}

fn correlation_matcher() -> AutoReg {
    let config = AutoRegConfig::new("MaximumCorrelation", 0.5, (15, 15), (31, 31));
    MatcherRegistry::default().create(&config).unwrap()
}

fn identity(s: f64, l: f64) -> Option<(f64, f64)> {
    Some((s, l))
}

#[test]
fn test_grid_axis_is_centred() {
    assert_eq!(grid_axis(120, 3), vec![21.0, 61.0, 101.0]);
    assert_eq!(grid_axis(100, 3), vec![18.0, 51.0, 84.0]);
    assert_eq!(grid_axis(5, 1), vec![3.0]);
    assert_eq!(grid_axis(4, 9), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_automatic_grid_spacing() {
    let driver = CoregDriver::new(GridConfig::default()).unwrap();
    let (columns, rows) = driver.grid_points(&correlation_matcher(), 120, 100);
    assert_eq!(columns.len(), 119 / 31 + 1);
    assert_eq!(rows.len(), 99 / 31 + 1);
}

#[test]
fn test_grid_config_validation() {
    assert!(GridConfig::default().validate().is_ok());
    assert!(GridConfig::new(0, 3).validate().is_err());
    let bad = GridConfig {
        band: 0,
        ..GridConfig::default()
    };
    assert!(matches!(CoregDriver::new(bad), Err(Error::Configuration(_))));

    let (pattern, search) = shifted_pair((0.0, 0.0));
    let driver = CoregDriver::new(GridConfig {
        band: 2,
        ..GridConfig::new(2, 2)
    })
    .unwrap();
    let err = driver
        .run(&correlation_matcher(), &pattern, &search, &identity)
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn test_run_recovers_integer_shift() {
    common::setup_test_logging();
    let (pattern, search) = shifted_pair((3.0, -2.0));
    let driver = CoregDriver::new(GridConfig::new(3, 3)).unwrap();

    let run = driver
        .run(&correlation_matcher(), &pattern, &search, &identity)
        .unwrap();

    assert_eq!(run.net.len(), 9);
    assert_eq!(run.net.points[0].id, "coreg_1_1");
    assert_eq!(run.net.points[5].id, "coreg_2_3");
    for point in &run.net.points {
        assert!(point.is_registered(), "{} failed: {:?}", point.id, point.measure.status);
        let (ds, dl) = point.difference();
        assert!((ds - 3.0).abs() < 1e-9 && (dl + 2.0).abs() < 1e-9, "{}: ({ds}, {dl})", point.id);
        assert_eq!(point.reference.measure_type, MeasureType::Reference);
        assert!(point.measure.log.goodness_of_fit.is_some());
        assert!(point.measure.log.z_score_max.is_some());
    }

    let summary = &run.summary;
    assert_eq!(summary.grid_points, 9);
    assert_eq!(summary.registration.attempts(), 9);
    assert_eq!(summary.registration.successes(), 9);
    let (ms, ml) = summary.mean_translation().unwrap();
    assert!((ms - 3.0).abs() < 1e-9 && (ml + 2.0).abs() < 1e-9);

    let affine = summary.fit_affine().unwrap();
    let (s, l) = affine.compute(50.0, 50.0);
    assert!((s - 53.0).abs() < 1e-6 && (l - 48.0).abs() < 1e-6);
}

#[test]
fn test_parallel_and_sequential_agree() {
    let (pattern, search) = shifted_pair((2.0, 1.0));
    let matcher = correlation_matcher();
    let parallel = CoregDriver::new(GridConfig::new(3, 4)).unwrap();
    let sequential = CoregDriver::new(GridConfig {
        parallel: false,
        ..GridConfig::new(3, 4)
    })
    .unwrap();

    let a = parallel.run(&matcher, &pattern, &search, &identity).unwrap();
    let b = sequential.run(&matcher, &pattern, &search, &identity).unwrap();

    assert_eq!(a.net, b.net);
    assert_eq!(a.summary.registration, b.summary.registration);
    // The template matcher's own statistics are untouched.
    assert_eq!(matcher.statistics().attempts(), 0);
}

#[test]
fn test_points_off_the_search_raster_are_skipped() {
    let (pattern, search) = shifted_pair((0.0, 0.0));
    let driver = CoregDriver::new(GridConfig::new(3, 3)).unwrap();
    let left = |s: f64, l: f64| (s < 80.0).then_some((s, l));

    let run = driver.run(&correlation_matcher(), &pattern, &search, &left).unwrap();

    assert_eq!(run.summary.grid_points, 9);
    assert_eq!(run.summary.skipped, 3);
    assert_eq!(run.net.len(), 6);
    assert!(run.net.point("coreg_1_3").is_none());
}

#[test]
fn test_failed_points_keep_nominal_candidate() {
    let pattern = MemoryRaster::filled(120, 100, 1, 50.0);
    let (_, search) = shifted_pair((0.0, 0.0));
    let driver = CoregDriver::new(GridConfig::new(2, 2))
        .unwrap()
        .with_names("left.cub", "right.cub");
    let shifted = |s: f64, l: f64| Some((s + 1.5, l - 0.5));

    let run = driver
        .run(&correlation_matcher(), &pattern, &search, &shifted)
        .unwrap();

    let status = RegisterStatus::PatternChipInvalid(PatternFailure::ZScoreNotMet);
    assert_eq!(run.summary.registration.count(status), 4);
    for point in &run.net.points {
        assert!(point.ignored);
        assert_eq!(point.measure.measure_type, MeasureType::Candidate);
        assert_eq!(point.measure.status, Some(status));
        assert_eq!(point.measure.serial_number, "right.cub");
        assert_eq!(point.reference.serial_number, "left.cub");
        assert_eq!(point.difference(), (1.5, -0.5));
    }
    assert_eq!(run.net.registered().count(), 0);
    assert!(run.summary.mean_translation().is_none());
    assert!(run.summary.fit_affine().is_err());
    assert_eq!(run.net.to_flat_csv().lines().count(), 1);
}

#[test]
fn test_flat_csv_rows() {
    let (pattern, search) = shifted_pair((3.0, -2.0));
    let driver = CoregDriver::new(GridConfig::new(2, 2)).unwrap();
    let run = driver
        .run(&correlation_matcher(), &pattern, &search, &identity)
        .unwrap();

    let csv = run.net.to_flat_csv();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some(FLAT_CSV_HEADER));
    let rows: Vec<Vec<f64>> = lines
        .map(|line| line.split(',').map(|f| f.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 4);
    for row in rows {
        assert_eq!(row.len(), 7);
        assert!((row[2] - row[0] - 3.0).abs() < 1e-9);
        assert!((row[4] - 3.0).abs() < 1e-9);
        assert!((row[5] + 2.0).abs() < 1e-9);
        assert!(row[6] > 0.99);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat.csv");
    run.net.write_flat_csv(&path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), csv);
}

#[test]
fn test_control_net_yaml_round_trip() {
    let (pattern, search) = shifted_pair((1.0, 1.0));
    let flat = MemoryRaster::filled(120, 100, 1, 50.0);
    let driver = CoregDriver::new(GridConfig::new(2, 2)).unwrap();
    let good = driver
        .run(&correlation_matcher(), &pattern, &search, &identity)
        .unwrap();
    let bad = driver
        .run(&correlation_matcher(), &flat, &search, &identity)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    for (name, net) in [("good.yaml", &good.net), ("bad.yaml", &bad.net)] {
        let path = dir.path().join(name);
        net.write_yaml(&path).unwrap();
        assert_eq!(&ControlNet::read_yaml(&path).unwrap(), net);
    }
    assert!(matches!(
        ControlNet::read_yaml(&dir.path().join("missing.yaml")),
        Err(Error::Io { .. })
    ));
}

#[test]
fn test_run_cached_reopens_evicted_rasters() {
    let (pattern, search) = shifted_pair((3.0, -2.0));
    let pattern: Arc<dyn Raster> = Arc::new(pattern);
    let search: Arc<dyn Raster> = Arc::new(search);
    let opens = Arc::new(AtomicUsize::new(0));

    let cache = {
        let (pattern, search, opens) = (pattern.clone(), search.clone(), opens.clone());
        RasterCache::with_opener(1, move |path: &Path| -> Result<Arc<dyn Raster>> {
            opens.fetch_add(1, Ordering::SeqCst);
            if path == Path::new("pattern.raw") {
                Ok(pattern.clone())
            } else {
                Ok(search.clone())
            }
        })
    };
    let driver = CoregDriver::new(GridConfig {
        parallel: false,
        ..GridConfig::new(3, 3)
    })
    .unwrap();
    let matcher = correlation_matcher();

    let cached = driver
        .run_cached(
            &matcher,
            &cache,
            Path::new("pattern.raw"),
            Path::new("search.raw"),
            &identity,
        )
        .unwrap();
    let direct = driver
        .run(&matcher, pattern.as_ref(), search.as_ref(), &identity)
        .unwrap();

    assert_eq!(cached.net, direct.net);
    // One resolve up front plus one per row, each opening both rasters
    // through a single-slot cache.
    assert_eq!(opens.load(Ordering::SeqCst), 8);
    assert_eq!(cache.stats().opens, 8);
    assert_eq!(cache.stats().evictions, 7);
}
