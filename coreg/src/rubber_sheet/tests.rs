use super::*;
use crate::error::Error;
use crate::raster::{MemoryRaster, PixelType};
use crate::special::{is_null, is_valid};

fn ramp(samples: usize, lines: usize) -> MemoryRaster {
    MemoryRaster::from_fn(samples, lines, |s, l| s + 1000.0 * l)
}

fn identity(s: f64, l: f64) -> Option<(f64, f64)> {
    Some((s, l))
}

#[test]
fn test_quad_tree_identity_never_splits() {
    let input = ramp(1024, 1024);
    let mut output = MemoryRaster::new(1024, 1024, 1);
    let sheet = RubberSheet::new(Interpolator::Nearest)
        .with_quad_tree(QuadTreeConfig::new(128, 8));

    let stats = sheet.warp_reverse(&input, &mut output, &identity).unwrap();

    assert_eq!(output, input);
    assert_eq!(stats.tiles, 64);
    assert_eq!(stats.splits, 0);
    assert_eq!(stats.slow_quads, 0);
    // Four corners and the centre check per tile.
    assert_eq!(stats.map_evaluations, 64 * 5);
}

#[test]
fn test_quad_tree_translation_with_bilinear() {
    let input = ramp(100, 80);
    let mut output = MemoryRaster::new(100, 80, 1);
    let sheet = RubberSheet::new(Interpolator::Bilinear)
        .with_quad_tree(QuadTreeConfig::new(32, 4));
    let shift = |s: f64, l: f64| Some((s + 2.25, l - 1.5));

    sheet.warp_reverse(&input, &mut output, &shift).unwrap();

    for l in 1..=80 {
        for s in 1..=100 {
            let (is, il) = (s as f64 + 2.25, l as f64 - 1.5);
            let value = output.get(s, l, 1);
            if is >= 1.0 && is <= 100.0 && il >= 1.0 && il <= 80.0 {
                let expected = is + 1000.0 * il;
                assert!((value - expected).abs() < 1e-4, "({s}, {l}): {value} vs {expected}");
            } else if !(0.5..=100.5).contains(&is) || !(0.5..=80.5).contains(&il) {
                assert!(is_null(value), "({s}, {l}) should be NULL");
            }
        }
    }
}

#[test]
fn test_quad_tree_partial_tile_on_output_edge() {
    let input = ramp(50, 40);
    let mut output = MemoryRaster::new(50, 40, 1);
    let sheet = RubberSheet::new(Interpolator::Nearest)
        .with_quad_tree(QuadTreeConfig::new(32, 4));

    let stats = sheet.warp_reverse(&input, &mut output, &identity).unwrap();

    assert_eq!(stats.tiles, 4);
    assert_eq!(output, input);
}

#[test]
fn test_quad_tree_nonlinear_map_splits() {
    let input = MemoryRaster::from_fn(256, 64, |s, _| s);
    let mut output = MemoryRaster::new(256, 64, 1);
    let sheet = RubberSheet::new(Interpolator::Bilinear)
        .with_quad_tree(QuadTreeConfig::new(64, 8));
    let squash = |s: f64, l: f64| Some((1.0 + 255.0 * ((s - 1.0) / 255.0).powi(2), l));

    let stats = sheet.warp_reverse(&input, &mut output, &squash).unwrap();
    output
        .save(&common::test_utils::test_output_path("quad_tree_squash.raw"), PixelType::Real32)
        .unwrap();

    assert!(stats.splits > 0);
    // The last sample and line have no bilinear neighbour.
    for l in [1, 20, 63] {
        for s in 1..=255 {
            let (expected, _) = squash(s as f64, l as f64).unwrap();
            let value = output.get(s, l, 1);
            assert!((value - expected).abs() <= 0.5, "({s}, {l}): {value} vs {expected}");
        }
    }
}

#[test]
fn test_quad_tree_empty_quads_are_null() {
    let input = ramp(96, 32);
    let mut output = MemoryRaster::filled(96, 32, 1, 7.0);
    let sheet = RubberSheet::new(Interpolator::Nearest)
        .with_quad_tree(QuadTreeConfig::new(32, 4));
    let left_only = |s: f64, l: f64| (s <= 40.0).then_some((s, l));

    let stats = sheet.warp_reverse(&input, &mut output, &left_only).unwrap();

    assert!(stats.empty_quads >= 1);
    for l in 1..=32 {
        for s in 1..=96 {
            let value = output.get(s, l, 1);
            if s <= 40 {
                assert_eq!(value, input.get(s, l, 1));
            } else {
                assert!(is_null(value), "({s}, {l}) should be NULL");
            }
        }
    }
}

#[test]
fn test_force_point_finds_isolated_island() {
    let input = ramp(32, 32);
    let island = |s: f64, l: f64| {
        let d = ((s - 20.0).powi(2) + (l - 20.0).powi(2)).sqrt();
        (d <= 1.5).then_some((s, l))
    };

    let mut plain = MemoryRaster::new(32, 32, 1);
    let sheet = RubberSheet::new(Interpolator::Nearest)
        .with_quad_tree(QuadTreeConfig::new(32, 8));
    sheet.warp_reverse(&input, &mut plain, &island).unwrap();
    assert!(is_null(plain.get(20, 20, 1)));

    let mut forced = MemoryRaster::new(32, 32, 1);
    let config = QuadTreeConfig {
        force_point: Some((20.0, 20.0)),
        ..QuadTreeConfig::new(32, 8)
    };
    let sheet = sheet.with_quad_tree(config);
    sheet.warp_reverse(&input, &mut forced, &island).unwrap();
    assert_eq!(forced.get(20, 20, 1), input.get(20, 20, 1));
    assert_eq!(forced.get(21, 20, 1), input.get(21, 20, 1));
    assert!(is_null(forced.get(25, 25, 1)));
}

#[test]
fn test_start_size_two_maps_every_pixel() {
    let input = ramp(9, 7);
    let mut output = MemoryRaster::new(9, 7, 1);
    let sheet = RubberSheet::new(Interpolator::Nearest)
        .with_quad_tree(QuadTreeConfig::new(2, 1));

    let stats = sheet.warp_reverse(&input, &mut output, &identity).unwrap();

    assert_eq!(output, input);
    assert_eq!(stats.splits, 0);
    assert_eq!(stats.slow_quads, stats.tiles);
    // Tiles overhanging the edge still evaluate their full 2x2 quad.
    assert_eq!(stats.map_evaluations, stats.tiles * 4);
}

#[test]
fn test_tile_map_reused_across_bands() {
    let (ns, nl) = (40, 30);
    let band1: Vec<f64> = ramp(ns, nl).data().to_vec();
    let band2: Vec<f64> = band1.iter().map(|v| -2.0 * v).collect();
    let input = MemoryRaster::from_data(ns, nl, 2, [band1, band2].concat());
    let mut output = MemoryRaster::new(ns, nl, 2);
    let sheet = RubberSheet::new(Interpolator::Nearest)
        .with_quad_tree(QuadTreeConfig::new(16, 4));

    let stats = sheet.warp_reverse(&input, &mut output, &identity).unwrap();

    assert_eq!(output, input);
    assert_eq!(stats.map_evaluations, stats.tiles * 5);
}

#[test]
fn test_quad_tree_config_validation() {
    assert!(QuadTreeConfig::default().validate().is_ok());
    assert!(QuadTreeConfig::new(100, 8).validate().is_err());
    assert!(QuadTreeConfig::new(1, 1).validate().is_err());
    assert!(QuadTreeConfig::new(32, 64).validate().is_err());
    assert!(QuadTreeConfig::new(32, 0).validate().is_err());

    let input = ramp(8, 8);
    let mut output = MemoryRaster::new(8, 8, 1);
    let sheet = RubberSheet::default().with_quad_tree(QuadTreeConfig::new(24, 4));
    let err = sheet.warp_reverse(&input, &mut output, &identity).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn test_output_band_count_checked() {
    let input = ramp(8, 8);
    let mut output = MemoryRaster::new(8, 8, 2);
    let sheet = RubberSheet::default();
    assert!(matches!(
        sheet.warp_reverse(&input, &mut output, &identity),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        sheet.warp_forward(&input, &mut output, &identity),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_forward_identity() {
    let input = ramp(40, 30);
    let mut output = MemoryRaster::filled(40, 30, 1, 3.0);
    let sheet = RubberSheet::new(Interpolator::Nearest);

    let stats = sheet.warp_forward(&input, &mut output, &identity).unwrap();

    assert_eq!(output, input);
    assert_eq!(stats.splits, 0);
    assert_eq!(stats.dropped, 0);
    // Starts 1, 5, .., 37 across and 1, 5, .., 29 down.
    assert_eq!(stats.patches, 10 * 8);
    assert_eq!(stats.pixels_written, 40 * 30);
}

#[test]
fn test_forward_translation_leaves_uncovered_pixels_null() {
    let input = ramp(40, 30);
    let mut output = MemoryRaster::new(40, 30, 1);
    let sheet = RubberSheet::new(Interpolator::Bilinear);
    let map = AffineMap::new(Affine::translation(3.0, 2.0));

    sheet.warp_forward(&input, &mut output, &map).unwrap();

    for l in 1..=30 {
        for s in 1..=40 {
            let value = output.get(s, l, 1);
            if s > 3 && l > 2 {
                let expected = (s - 3) as f64 + 1000.0 * (l - 2) as f64;
                assert!((value - expected).abs() < 1e-6, "({s}, {l}): {value} vs {expected}");
            } else {
                assert!(is_null(value), "({s}, {l}) should be NULL");
            }
        }
    }
}

#[test]
fn test_forward_splits_across_seam() {
    let input = MemoryRaster::from_fn(40, 8, |s, l| s + 100.0 * l);
    let mut output = MemoryRaster::new(40, 8, 1);
    let sheet = RubberSheet::new(Interpolator::Nearest);
    // Half-turn in sample, wrapping at input sample 20.5.
    let wrap = |s: f64, l: f64| Some(((s - 0.5 + 20.0).rem_euclid(40.0) + 0.5, l));

    let stats = sheet.warp_forward(&input, &mut output, &wrap).unwrap();

    assert!(stats.splits > 0);
    for l in 1..=8 {
        for os in 1..=40 {
            let is = (os - 1 + 20) % 40 + 1;
            assert_eq!(output.get(os, l, 1), input.get(is, l, 1), "({os}, {l})");
        }
    }
}

#[test]
fn test_forward_unmappable_input_is_dropped() {
    let input = ramp(12, 12);
    let mut output = MemoryRaster::filled(12, 12, 1, 1.0);
    let sheet = RubberSheet::default();
    let nowhere = |_: f64, _: f64| None;

    let stats = sheet.warp_forward(&input, &mut output, &nowhere).unwrap();

    assert_eq!(stats.pieces, 0);
    assert!(stats.dropped > 0);
    assert!(output.data().iter().all(|&v| is_null(v)));
}

#[test]
fn test_forward_keeps_valid_pixels_on_overlap() {
    // NULL input column 5 sits on the overlap between the first two patch
    // columns; every neighbouring valid pixel must still come through.
    let mut input = ramp(20, 10);
    for l in 1..=10 {
        input.set(5, l, 1, crate::special::NULL);
    }
    let mut output = MemoryRaster::new(20, 10, 1);
    let sheet = RubberSheet::new(Interpolator::Nearest);

    sheet.warp_forward(&input, &mut output, &identity).unwrap();

    assert_eq!(output, input);
    assert!((1..=10).all(|l| is_valid(output.get(4, l, 1)) && is_valid(output.get(6, l, 1))));
}

#[test]
fn test_patch_config_validation() {
    assert!(PatchConfig::default().validate().is_ok());
    let bad = PatchConfig {
        samples: 1,
        ..PatchConfig::default()
    };
    assert!(bad.validate().is_err());
    let bad = PatchConfig {
        line_increment: 0,
        ..PatchConfig::default()
    };
    assert!(bad.validate().is_err());
    let bad = PatchConfig {
        start_sample: 0,
        ..PatchConfig::default()
    };
    assert!(bad.validate().is_err());
}

#[test]
fn test_ground_transform_round_trip() {
    use crate::geometry::AffineGroundMap;

    let mut half = Affine::identity();
    half.scale(0.5).unwrap();
    let input_map = AffineGroundMap::new(half);
    let output_map = AffineGroundMap::new(Affine::identity());
    let transform = GroundTransform {
        input: &input_map,
        output: &output_map,
    };
    let (os, ol) = transform.input_to_output(10.0, 4.0).unwrap();
    let (is, il) = transform.output_to_input(os, ol).unwrap();
    assert!((is - 10.0).abs() < 1e-9 && (il - 4.0).abs() < 1e-9);
}

#[test]
fn test_config_yaml_keys() {
    let yaml = "StartQuadSize: 64\nEndQuadSize: 4\n";
    let config: QuadTreeConfig = serde_yml::from_str(yaml).unwrap();
    assert_eq!(config, QuadTreeConfig::new(64, 4));

    let yaml = "Samples: 9\nLines: 9\nSampleIncrement: 8\nLineIncrement: 8\n";
    let config: PatchConfig = serde_yml::from_str(yaml).unwrap();
    assert_eq!(config.samples, 9);
    assert_eq!(config.start_sample, 1);
}
