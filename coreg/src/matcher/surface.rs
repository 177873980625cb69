//! Sub-pixel refinement: a quadratic `z = a + b*x + c*y + d*x² + e*xy + f*y²`
//! fitted to the fit chip around the whole-pixel best.

use super::status::{SurfaceModelFailure, SurfaceModelFit};
use crate::chip::Chip;
use crate::config::SurfaceModelConfig;
use crate::math::linalg::NormalEquations;
use crate::special::is_special;

#[inline]
fn evaluate(c: &[f64; 6], x: f64, y: f64) -> f64 {
    c[0] + c[1] * x + c[2] * y + c[3] * x * x + c[4] * x * y + c[5] * y * y
}

/// Axis ratio and eccentricity of the level ellipses of the fitted surface.
/// `None` when the surface is not elliptic (saddle or degenerate).
fn eccentricity(d: f64, e: f64, f: f64) -> Option<(f64, f64)> {
    let det_j = d * f - e * e / 4.0;
    if !(det_j > 0.0) {
        return None;
    }
    let mean = (d + f) / 2.0;
    let radius = (((d - f) / 2.0).powi(2) + (e / 2.0).powi(2)).sqrt();
    let (l1, l2) = ((mean + radius).abs(), (mean - radius).abs());
    let (big, small) = (l1.max(l2), l1.min(l2));
    if small == 0.0 {
        return None;
    }
    // Curvature and axis length are inversely related.
    let ratio = (big / small).sqrt();
    let eccentricity = (1.0 - small / big).sqrt();
    Some((eccentricity, ratio))
}

/// Fits the surface over the `window_size` neighbourhood of `best` (chip
/// coordinates of `fit`) and returns the refined extremum.
pub(super) fn model_surface(
    fit: &Chip,
    best: (i64, i64),
    settings: &SurfaceModelConfig,
) -> Result<SurfaceModelFit, SurfaceModelFailure> {
    let window = settings.window_size;
    let half = (window / 2) as i64;

    let mut points = Vec::with_capacity(window * window);
    for line in best.1 - half..=best.1 + half {
        if line < 1 || line > fit.lines() as i64 {
            continue;
        }
        for samp in best.0 - half..=best.0 + half {
            if samp < 1 || samp > fit.samples() as i64 {
                continue;
            }
            let value = fit.get_value(samp as usize, line as usize);
            if is_special(value) {
                continue;
            }
            points.push(((samp - best.0) as f64, (line - best.1) as f64, value));
        }
    }
    if points.len() < window * window * 2 / 3 + 1 {
        return Err(SurfaceModelFailure::NotEnoughValidData);
    }

    let mut equations = NormalEquations::<6>::default();
    for &(x, y, z) in &points {
        equations.add_row(&[1.0, x, y, x * x, x * y, y * y], z);
    }
    let coefficients = equations.solve().ok_or(SurfaceModelFailure::SolutionInvalid)?;
    let [_, b, c, d, e, f] = coefficients;

    let mut result = SurfaceModelFit::default();

    if let Some(max_ratio) = settings.eccentricity_ratio {
        let (ecc, ratio) = eccentricity(d, e, f).ok_or(SurfaceModelFailure::EccentricityRatioNotMet)?;
        result.eccentricity = Some(ecc);
        result.eccentricity_ratio = Some(ratio);
        if ratio > max_ratio {
            return Err(SurfaceModelFailure::EccentricityRatioNotMet);
        }
    }

    if let Some(tolerance) = settings.residual_tolerance {
        let total: f64 = points
            .iter()
            .map(|&(x, y, z)| (z - evaluate(&coefficients, x, y)).abs())
            .sum();
        let average = total / points.len() as f64;
        result.average_residual = Some(average);
        if average > tolerance {
            return Err(SurfaceModelFailure::ResidualToleranceNotMet);
        }
    }

    let det = 4.0 * d * f - e * e;
    if det == 0.0 || !det.is_finite() {
        return Err(SurfaceModelFailure::SolutionInvalid);
    }
    let dx = (c * e - 2.0 * b * f) / det;
    let dy = (b * e - 2.0 * c * d) / det;

    let extent = window as f64 / 2.0;
    if !(dx.abs() <= extent && dy.abs() <= extent) {
        return Err(SurfaceModelFailure::ExtremumOutsideWindow);
    }

    result.sample_movement = dx.abs();
    result.line_movement = dy.abs();
    result.distance = dx.hypot(dy);
    if result.distance > settings.distance_tolerance {
        return Err(SurfaceModelFailure::DistanceInvalid);
    }

    result.chip_sample = best.0 as f64 + dx;
    result.chip_line = best.1 as f64 + dy;
    result.goodness_of_fit = evaluate(&coefficients, dx, dy);
    Ok(result)
}
