//! Gruen least-squares matching.
//!
//! Each pass linearises `p = (1 + g) * s(A x) + h` around the current affine
//! `A` and radiometric gain `g` and shift `h`, giving one observation per
//! pattern pixel:
//!
//! ```text
//! [gx*x, gx*y, gx, gy*x, gy*y, gy, 1, s] . delta = p - ((1 + g) * s + h)
//! ```
//!
//! where `(gx, gy)` is the central-difference gradient of the resampled
//! sub-search chip and `(x, y)` are tack-relative pattern coordinates. The
//! 8x8 normal equations are solved by Cholesky. The translation block of the
//! scaled inverse gives the positional uncertainty.
//!
//! In adaptive mode the pass repeats, re-rendering the sub-search through
//! the updated affine, until the correction falls below the per-component
//! thresholds. In non-adaptive mode a single pass scores each candidate of
//! the coarse search by its uncertainty.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use super::status::{AlgorithmStatistics, GruenFailure, RegisterStatus};
use super::{AdaptiveOutcome, AdaptiveRequest, MatchAlgorithm};
use crate::affine::Affine;
use crate::chip::Chip;
use crate::config::GruenConfig;
use crate::error::Result;
use crate::math::linalg::{cholesky_decompose, cholesky_inverse, jacobi_eigen, NormalEquations};
use crate::math::Statistics;
use crate::special::NULL;

/// Unknowns: six affine corrections, radiometric shift, radiometric gain.
const UNKNOWNS: usize = 8;

type Attempt<T> = std::result::Result<T, GruenFailure>;

/// Converged Gruen state for one registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GruenSolution {
    /// Pattern tack-relative coordinates to search tack-relative coordinates,
    /// rows `[a, b, c]` and `[d, e, f]`.
    pub affine: [[f64; 3]; 2],
    /// Pattern tack-relative coordinates to search cube coordinates.
    pub chip_affine: [[f64; 3]; 2],
    pub gain: f64,
    pub shift: f64,
    /// `sqrt(l1² + l2²)` of the translation covariance eigenvalues.
    pub uncertainty: f64,
    pub eigenvalues: [f64; 2],
    pub iterations: usize,
    pub points: usize,
    /// Registered position in search chip coordinates.
    pub chip_sample: f64,
    pub chip_line: f64,
    pub start_image: (f64, f64),
    pub final_image: (f64, f64),
    /// Distance between `start_image` and `final_image`.
    pub distance: f64,
}

impl GruenSolution {
    pub fn affine(&self) -> Result<Affine> {
        Affine::from_coefficients(self.affine[0], self.affine[1])
    }

    pub fn chip_affine(&self) -> Result<Affine> {
        Affine::from_coefficients(self.chip_affine[0], self.chip_affine[1])
    }
}

/// One solved pass.
#[derive(Debug, Clone, Copy)]
struct Pass {
    alpha: [f64; UNKNOWNS],
    points: usize,
    eigenvalues: [f64; 2],
    uncertainty: f64,
}

#[derive(Debug, Clone, Default)]
struct GruenStats {
    total_iterations: u64,
    failures: HashMap<GruenFailure, u64>,
    iterations: Statistics,
    eigen: Statistics,
    shift: Statistics,
    gain: Statistics,
}

#[derive(Debug, Clone)]
pub struct Gruen {
    adaptive: bool,
    config: GruenConfig,
    eigen_tolerance: f64,
    valid_percent: f64,
    gain: f64,
    shift: f64,
    stats: GruenStats,
}

impl Gruen {
    pub const NAME: &'static str = "Gruen";
    pub const ADAPTIVE_NAME: &'static str = "AdaptiveGruen";

    /// `eigen_tolerance` bounds the positional uncertainty; `valid_percent`
    /// is the share of pattern pixels a pass needs.
    pub fn new(config: GruenConfig, eigen_tolerance: f64, valid_percent: f64, adaptive: bool) -> Self {
        Self {
            adaptive,
            gain: config.default_radio_gain,
            shift: config.default_radio_shift,
            config,
            eigen_tolerance,
            valid_percent,
            stats: GruenStats::default(),
        }
    }

    pub fn config(&self) -> &GruenConfig {
        &self.config
    }

    fn reset_radiometry(&mut self) {
        self.gain = self.config.default_radio_gain;
        self.shift = self.config.default_radio_shift;
    }

    fn fail<T>(&mut self, failure: GruenFailure) -> Attempt<T> {
        *self.stats.failures.entry(failure).or_insert(0) += 1;
        Err(failure)
    }

    /// Convergence thresholds on the affine corrections, scaled so that scale
    /// and shear are measured at the chip edge.
    fn thresholds(&self, chip: &Chip) -> [f64; 6] {
        let half_w = (chip.samples() as f64 - 1.0) / 2.0;
        let half_h = (chip.lines() as f64 - 1.0) / 2.0;
        let scale = self.config.affine_scale_tolerance;
        let shear = self.config.shear_tolerance();
        let trans = self.config.affine_translation_tolerance;
        [
            scale / half_w,
            shear / half_h,
            trans,
            shear / half_w,
            scale / half_h,
            trans,
        ]
    }

    /// One linearised solve of `pattern` against the resampled `subsearch`.
    fn solve_pass(&mut self, pattern: &Chip, subsearch: &Chip) -> Result<Attempt<Pass>> {
        self.stats.total_iterations += 1;
        let tack_s = pattern.tack_sample() as f64;
        let tack_l = pattern.tack_line() as f64;
        let gain = 1.0 + self.gain;

        let mut rows = Vec::with_capacity(pattern.samples() * pattern.lines());
        for line in 2..pattern.lines() {
            for samp in 2..pattern.samples() {
                if !pattern.is_valid(samp, line)
                    || !subsearch.is_valid(samp, line)
                    || !subsearch.is_valid(samp + 1, line)
                    || !subsearch.is_valid(samp - 1, line)
                    || !subsearch.is_valid(samp, line + 1)
                    || !subsearch.is_valid(samp, line - 1)
                {
                    continue;
                }
                let s = subsearch.get_value(samp, line);
                let gx = gain * (subsearch.get_value(samp + 1, line) - subsearch.get_value(samp - 1, line)) / 2.0;
                let gy = gain * (subsearch.get_value(samp, line + 1) - subsearch.get_value(samp, line - 1)) / 2.0;
                let x = samp as f64 - tack_s;
                let y = line as f64 - tack_l;
                let residual = pattern.get_value(samp, line) - (gain * s + self.shift);
                rows.push(([gx * x, gx * y, gx, gy * x, gy * y, gy, 1.0, s], residual));
            }
        }

        // Residual gate against this pass's RMS.
        let rms = (rows.iter().map(|(_, r)| r * r).sum::<f64>() / rows.len().max(1) as f64).sqrt();
        let gate = self.config.residual_gate * rms;
        let mut equations = NormalEquations::<UNKNOWNS>::default();
        let mut residual_sq = 0.0;
        for (row, residual) in &rows {
            if rms > 0.0 && residual.abs() > gate {
                continue;
            }
            equations.add_row(row, *residual);
            residual_sq += residual * residual;
        }

        let points = equations.rows;
        let total = (pattern.lines() - 1) * (pattern.samples() - 1);
        let minimum = (total as f64 * self.valid_percent / 100.0) as usize;
        if points <= minimum || points <= UNKNOWNS {
            return Ok(self.fail(GruenFailure::NotEnoughPoints));
        }

        let Some(factor) = cholesky_decompose(&equations.symmetric()) else {
            return Ok(self.fail(GruenFailure::CholeskyFailed));
        };
        let inverse = cholesky_inverse(&factor);
        let mut alpha = [0.0; UNKNOWNS];
        for (r, value) in alpha.iter_mut().enumerate() {
            *value = (0..UNKNOWNS).map(|c| inverse[r][c] * equations.atb[c]).sum();
        }
        if alpha.iter().any(|v| !v.is_finite()) {
            return Ok(self.fail(GruenFailure::CholeskyFailed));
        }

        let variance = residual_sq / (points - UNKNOWNS) as f64;
        let translation_cov = [
            [variance * inverse[2][2], variance * inverse[2][5]],
            [variance * inverse[5][2], variance * inverse[5][5]],
        ];
        let (eigenvalues, _) = jacobi_eigen(&translation_cov)?;
        let uncertainty = eigenvalues[0].hypot(eigenvalues[1]);

        Ok(Ok(Pass {
            alpha,
            points,
            eigenvalues,
            uncertainty,
        }))
    }

    /// Iterates from the coarse best until the corrections converge.
    fn iterate(&mut self, request: &mut AdaptiveRequest<'_>) -> Result<Attempt<GruenSolution>> {
        let search = request.search;
        let pattern = request.pattern;
        let tack_s = search.tack_sample() as f64;
        let tack_l = search.tack_line() as f64;
        let (best_s, best_l) = request.best;
        let start_image = search.chip_to_cube(best_s, best_l);

        request.fit.set_all_values(NULL);
        let mut subsearch = Chip::new(pattern.samples(), pattern.lines())?;
        let mut tform = Affine::translation(best_s - tack_s, best_l - tack_l);
        let thresholds = self.thresholds(pattern);

        let mut converged = None;
        for iteration in 1..=self.config.maximum_iterations {
            if search.extract_affine(&mut subsearch, &tform).is_err() {
                return Ok(self.fail(GruenFailure::AffineNotInvertible));
            }
            let pass = match self.solve_pass(pattern, &subsearch)? {
                Ok(pass) => pass,
                Err(failure) => return Ok(Err(failure)),
            };

            tform = match update_affine(&tform, &pass.alpha) {
                Ok(tform) => tform,
                Err(_) => return Ok(self.fail(GruenFailure::AffineNotInvertible)),
            };
            self.shift += pass.alpha[6];
            self.gain += pass.alpha[7];

            let (ds, dl) = tform.compute(0.0, 0.0);
            let (fs, fl) = ((tack_s + ds).round(), (tack_l + dl).round());
            if fs >= 1.0 && fl >= 1.0 && fs <= request.fit.samples() as f64 && fl <= request.fit.lines() as f64 {
                request.fit.set_value(fs as usize, fl as usize, pass.uncertainty);
            }

            if pass.alpha[..6]
                .iter()
                .zip(&thresholds)
                .all(|(delta, limit)| delta.abs() < *limit)
            {
                converged = Some((iteration, pass));
                break;
            }
        }

        let Some((iterations, pass)) = converged else {
            return Ok(self.fail(GruenFailure::MaxIterationsExceeded));
        };

        if let Some(tolerance) = self.config.radio_shift_tolerance {
            if self.shift.abs() > tolerance {
                return Ok(self.fail(GruenFailure::ShiftExceeded));
            }
        }
        let gain = 1.0 + self.gain;
        let gain_min = self.config.radio_gain_min_tolerance.unwrap_or(f64::NEG_INFINITY);
        let gain_max = self.config.radio_gain_max_tolerance.unwrap_or(f64::INFINITY);
        if gain < gain_min || gain > gain_max {
            return Ok(self.fail(GruenFailure::GainExceeded));
        }
        if pass.uncertainty > self.eigen_tolerance {
            return Ok(self.fail(GruenFailure::EigenExceeded));
        }

        self.stats.iterations.add(iterations as f64);
        self.stats.eigen.add(pass.uncertainty);
        self.stats.shift.add(self.shift);
        self.stats.gain.add(self.gain);

        let (ds, dl) = tform.compute(0.0, 0.0);
        let (chip_sample, chip_line) = (tack_s + ds, tack_l + dl);
        let final_image = search.chip_to_cube(chip_sample, chip_line);
        let distance = (final_image.0 - start_image.0).hypot(final_image.1 - start_image.1);
        let chip_affine = tform.then(search.affine())?;

        if let Some(tolerance) = self.config.affine_tolerance {
            if distance > tolerance {
                return Ok(self.fail(GruenFailure::DistanceExceeded));
            }
        }

        Ok(Ok(GruenSolution {
            affine: [tform.x_coefficients(), tform.y_coefficients()],
            chip_affine: [chip_affine.x_coefficients(), chip_affine.y_coefficients()],
            gain: self.gain,
            shift: self.shift,
            uncertainty: pass.uncertainty,
            eigenvalues: pass.eigenvalues,
            iterations,
            points: pass.points,
            chip_sample,
            chip_line,
            start_image,
            final_image,
            distance,
        }))
    }
}

/// Adds the six affine corrections to the forward coefficients.
fn update_affine(current: &Affine, alpha: &[f64; UNKNOWNS]) -> Result<Affine> {
    let mut x = current.x_coefficients();
    let mut y = current.y_coefficients();
    for i in 0..3 {
        x[i] += alpha[i];
        y[i] += alpha[3 + i];
    }
    Affine::from_coefficients(x, y)
}

impl MatchAlgorithm for Gruen {
    fn name(&self) -> &str {
        if self.adaptive {
            Self::ADAPTIVE_NAME
        } else {
            Self::NAME
        }
    }

    fn ideal_fit(&self) -> f64 {
        0.0
    }

    fn match_chips(&mut self, pattern: &Chip, subsearch: &Chip) -> Option<f64> {
        self.reset_radiometry();
        match self.solve_pass(pattern, subsearch) {
            Ok(Ok(pass)) => Some(pass.uncertainty),
            Ok(Err(_)) => None,
            Err(error) => {
                tracing::debug!("Gruen pass failed: {}", error);
                None
            }
        }
    }

    fn compare_fits(&self, fit1: f64, fit2: f64) -> bool {
        fit1 <= fit2
    }

    fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    fn adaptive_registration(&mut self, mut request: AdaptiveRequest<'_>) -> Result<AdaptiveOutcome> {
        self.reset_radiometry();
        let outcome = match self.iterate(&mut request)? {
            Ok(solution) => AdaptiveOutcome {
                status: RegisterStatus::SuccessSubPixel,
                solution: Some(solution),
            },
            Err(failure) => AdaptiveOutcome {
                status: RegisterStatus::AdaptiveFailure(failure),
                solution: None,
            },
        };
        Ok(outcome)
    }

    fn statistics(&self) -> AlgorithmStatistics {
        let mut counters = vec![("TotalIterations".to_string(), self.stats.total_iterations)];
        for failure in GruenFailure::iter() {
            let count = self.stats.failures.get(&failure).copied().unwrap_or(0);
            counters.push((failure.to_string(), count));
        }
        AlgorithmStatistics {
            counters,
            distributions: vec![
                ("Iterations".to_string(), self.stats.iterations),
                ("Eigen".to_string(), self.stats.eigen),
                ("RadioShift".to_string(), self.stats.shift),
                ("RadioGain".to_string(), self.stats.gain),
            ],
        }
    }

    fn reset_statistics(&mut self) {
        self.stats = GruenStats::default();
    }

    fn box_clone(&self) -> Box<dyn MatchAlgorithm> {
        Box::new(self.clone())
    }
}
