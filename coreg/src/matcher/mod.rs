//! Pattern-to-search chip registration.
//!
//! [`AutoReg`] owns the pattern, search and fit chips. The caller tacks and
//! loads the pattern and search chips, then calls [`AutoReg::register`],
//! which walks every pattern-sized sub-search of the search chip, scores it
//! with the configured [`MatchAlgorithm`], and optionally refines the best
//! whole-pixel position with a quadratic surface model. Adaptive algorithms
//! take over after the optional reduced-resolution pass and do their own
//! sub-pixel refinement.

mod correlation;
mod difference;
mod gruen;
mod status;
mod surface;


use std::borrow::Cow;

pub use correlation::MaximumCorrelation;
pub use difference::MinimumDifference;
pub use gruen::{Gruen, GruenSolution};
pub use status::{
    AlgorithmStatistics, GruenFailure, PatternFailure, RegisterStatus, RegisteredPosition,
    Registration, RegistrationStatistics, SurfaceModelFailure, SurfaceModelFit,
};

use crate::chip::Chip;
use crate::config::{AutoRegConfig, Gradient};
use crate::error::{Error, Result};
use crate::special::NULL;

/// Fits closer than this to the ideal skip the surface model.
const IDEAL_TOLERANCE: f64 = 1e-5;

/// Inputs for an adaptive registration, starting from `best` (search chip
/// coordinates).
pub struct AdaptiveRequest<'a> {
    pub search: &'a Chip,
    pub pattern: &'a Chip,
    pub fit: &'a mut Chip,
    pub best: (f64, f64),
}

#[derive(Debug, Clone)]
pub struct AdaptiveOutcome {
    pub status: RegisterStatus,
    pub solution: Option<GruenSolution>,
}

/// A similarity measure between a pattern chip and a same-sized sub-search
/// chip. Adaptive variants replace the whole-pixel search and sub-pixel
/// refinement with [`MatchAlgorithm::adaptive_registration`].
pub trait MatchAlgorithm: Send {
    fn name(&self) -> &str;

    /// Best possible fit value.
    fn ideal_fit(&self) -> f64;

    /// Fit of `subsearch` against `pattern`, or `None` when it cannot be
    /// computed.
    fn match_chips(&mut self, pattern: &Chip, subsearch: &Chip) -> Option<f64>;

    /// True when `fit1` is at least as good as `fit2`.
    fn compare_fits(&self, fit1: f64, fit2: f64) -> bool;

    fn is_ideal(&self, fit: f64) -> bool {
        (self.ideal_fit() - fit).abs() <= IDEAL_TOLERANCE
    }

    fn is_adaptive(&self) -> bool {
        false
    }

    fn adaptive_registration(&mut self, request: AdaptiveRequest<'_>) -> Result<AdaptiveOutcome> {
        let _ = request;
        Err(Error::config(format!("{} is not an adaptive algorithm", self.name())))
    }

    fn statistics(&self) -> AlgorithmStatistics {
        AlgorithmStatistics::default()
    }

    fn reset_statistics(&mut self) {}

    fn box_clone(&self) -> Box<dyn MatchAlgorithm>;
}

impl Clone for Box<dyn MatchAlgorithm> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

impl std::fmt::Debug for dyn MatchAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchAlgorithm").field("name", &self.name()).finish()
    }
}

/// Inclusive range of sub-search centres, in search chip coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SearchWindow {
    start_sample: i64,
    end_sample: i64,
    start_line: i64,
    end_line: i64,
}

impl SearchWindow {
    /// Every centre at which a pattern-sized window fits inside the search
    /// chip.
    fn covering(pattern: &Chip, search: &Chip) -> Self {
        let start_sample = pattern.tack_sample() as i64;
        let start_line = pattern.tack_line() as i64;
        Self {
            start_sample,
            end_sample: search.samples() as i64 - start_sample + 1,
            start_line,
            end_line: search.lines() as i64 - start_line + 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BestFit {
    fit: f64,
    sample: i64,
    line: i64,
}

/// Scores every sub-search in `window`, filling `fit` (resized to the search
/// chip and NULL-initialised) and returning the best candidate.
fn coarse_search(
    algorithm: &mut dyn MatchAlgorithm,
    pattern: &Chip,
    search: &Chip,
    fit: &mut Chip,
    window: SearchWindow,
    subsearch_valid_percent: f64,
) -> Result<Option<BestFit>> {
    if fit.samples() != search.samples() || fit.lines() != search.lines() {
        *fit = Chip::new(search.samples(), search.lines())?;
    }
    fit.set_all_values(NULL);
    fit.set_affine(*search.affine());

    let mut subsearch = Chip::new(pattern.samples(), pattern.lines())?;
    let mut best: Option<BestFit> = None;
    for line in window.start_line..=window.end_line {
        for samp in window.start_sample..=window.end_sample {
            search.extract_into(samp, line, &mut subsearch)?;
            if !subsearch.has_valid_percent(subsearch_valid_percent) {
                continue;
            }
            let Some(value) = algorithm.match_chips(pattern, &subsearch) else {
                continue;
            };
            fit.set_value(samp as usize, line as usize, value);
            if best.is_none_or(|b| algorithm.compare_fits(value, b.fit)) {
                best = Some(BestFit {
                    fit: value,
                    sample: samp,
                    line,
                });
            }
        }
    }
    Ok(best)
}

/// `(z(min), z(max))` of the valid pixels, or `None` for a flat chip.
fn z_scores(chip: &Chip) -> Option<(f64, f64)> {
    let stats = chip.statistics();
    Some((
        stats.z_score(stats.minimum()?)?,
        stats.z_score(stats.maximum()?)?,
    ))
}

/// The z-score gate passes when either extreme is at least `minimum`
/// standard deviations from the mean.
fn passes_z_score(z: Option<(f64, f64)>, minimum: f64) -> bool {
    z.is_some_and(|(z_min, z_max)| z_max >= minimum || -z_min >= minimum)
}

// =============================================================================
// AutoReg
// =============================================================================

#[derive(Debug, Clone)]
pub struct AutoReg {
    config: AutoRegConfig,
    algorithm: Box<dyn MatchAlgorithm>,
    pattern: Chip,
    search: Chip,
    fit: Chip,
    reduced_pattern: Option<Chip>,
    reduced_search: Option<Chip>,
    reduced_fit: Option<Chip>,
    stats: RegistrationStatistics,
}

impl AutoReg {
    /// Validates `config` and sizes the chips from it.
    pub fn new(config: AutoRegConfig, algorithm: Box<dyn MatchAlgorithm>) -> Result<Self> {
        config.validate()?;
        let interpolator = config.algorithm.chip_interpolator;

        let mut pattern = Chip::new(config.pattern_chip.samples, config.pattern_chip.lines)?;
        let (min, max) = config.pattern_valid_range();
        pattern.set_valid_range(min, max)?;
        pattern.set_read_interpolator(interpolator);

        let mut search = Chip::new(config.search_chip.samples, config.search_chip.lines)?;
        let (min, max) = config.search_valid_range();
        search.set_valid_range(min, max)?;
        search.set_read_interpolator(interpolator);

        let fit = Chip::new(search.samples(), search.lines())?;
        Ok(Self {
            config,
            algorithm,
            pattern,
            search,
            fit,
            reduced_pattern: None,
            reduced_search: None,
            reduced_fit: None,
            stats: RegistrationStatistics::default(),
        })
    }

    pub fn config(&self) -> &AutoRegConfig {
        &self.config
    }

    pub fn algorithm_name(&self) -> &str {
        self.algorithm.name()
    }

    pub fn algorithm(&self) -> &dyn MatchAlgorithm {
        self.algorithm.as_ref()
    }

    pub fn pattern_chip(&self) -> &Chip {
        &self.pattern
    }

    pub fn pattern_chip_mut(&mut self) -> &mut Chip {
        &mut self.pattern
    }

    pub fn search_chip(&self) -> &Chip {
        &self.search
    }

    pub fn search_chip_mut(&mut self) -> &mut Chip {
        &mut self.search
    }

    /// Fit values of the last registration, NULL where no fit was computed.
    pub fn fit_chip(&self) -> &Chip {
        &self.fit
    }

    pub fn reduced_pattern_chip(&self) -> Option<&Chip> {
        self.reduced_pattern.as_ref()
    }

    pub fn reduced_search_chip(&self) -> Option<&Chip> {
        self.reduced_search.as_ref()
    }

    pub fn reduced_fit_chip(&self) -> Option<&Chip> {
        self.reduced_fit.as_ref()
    }

    pub fn statistics(&self) -> &RegistrationStatistics {
        &self.stats
    }

    pub fn algorithm_statistics(&self) -> AlgorithmStatistics {
        self.algorithm.statistics()
    }

    pub fn reset_statistics(&mut self) {
        self.stats.reset();
        self.algorithm.reset_statistics();
    }

    /// Registers the loaded pattern chip against the loaded search chip.
    /// Algorithmic failures are reported through the returned status; `Err`
    /// is reserved for configuration and chip errors.
    pub fn register(&mut self) -> Result<Registration> {
        let registration = self.run_registration()?;
        self.stats.record(registration.status);
        tracing::debug!(
            algorithm = self.algorithm.name(),
            status = %registration.status,
            pattern_sample = self.pattern.cube_tack_sample(),
            pattern_line = self.pattern.cube_tack_line(),
            goodness_of_fit = ?registration.goodness_of_fit,
            "Registration finished"
        );
        Ok(registration)
    }

    fn run_registration(&mut self) -> Result<Registration> {
        let Self {
            config,
            algorithm,
            pattern,
            search,
            fit,
            reduced_pattern,
            reduced_search,
            reduced_fit,
            ..
        } = self;
        let algorithm = algorithm.as_mut();
        *reduced_pattern = None;
        *reduced_search = None;
        *reduced_fit = None;

        let (pattern, search): (Cow<'_, Chip>, Cow<'_, Chip>) = match config.algorithm.gradient {
            Gradient::None => (Cow::Borrowed(&*pattern), Cow::Borrowed(&*search)),
            Gradient::Sobel => (Cow::Owned(pattern.sobel()), Cow::Owned(search.sobel())),
        };
        let pattern = pattern.as_ref();
        let search = search.as_ref();
        let minimum_z = config.pattern_chip.minimum_z_score;
        let subsearch_percent = config.search_chip.subchip_valid_percent;

        if !pattern.has_valid_percent(config.pattern_chip.valid_percent) {
            return Ok(Registration::new(RegisterStatus::PatternChipInvalid(
                PatternFailure::NotEnoughValidData,
            )));
        }
        let z = z_scores(pattern);
        let with_z = |status| {
            let mut registration = Registration::new(status);
            registration.z_score_min = z.map(|z| z.0);
            registration.z_score_max = z.map(|z| z.1);
            registration
        };
        if !passes_z_score(z, minimum_z) {
            return Ok(with_z(RegisterStatus::PatternChipInvalid(PatternFailure::ZScoreNotMet)));
        }

        let mut window = SearchWindow::covering(pattern, search);
        let mut best_search = (search.tack_sample() as f64, search.tack_line() as f64);

        let factor = config.algorithm.reduction_factor;
        if factor > 1 {
            let small_pattern = pattern.reduce(factor)?;
            if !passes_z_score(z_scores(&small_pattern), minimum_z) {
                *reduced_pattern = Some(small_pattern);
                return Ok(with_z(RegisterStatus::PatternChipInvalid(PatternFailure::ZScoreNotMet)));
            }
            let small_search = search.reduce(factor)?;
            let mut small_fit = Chip::new(small_search.samples(), small_search.lines())?;
            let best = coarse_search(
                algorithm,
                &small_pattern,
                &small_search,
                &mut small_fit,
                SearchWindow::covering(&small_pattern, &small_search),
                subsearch_percent,
            )?;
            *reduced_pattern = Some(small_pattern);
            *reduced_search = Some(small_search);
            *reduced_fit = Some(small_fit);
            let Some(best) = best else {
                return Ok(with_z(RegisterStatus::FitChipNoData));
            };

            // Centre of the reduced pixel in full-resolution chip pixels,
            // then grow the window around it.
            let f = factor as i64;
            let bs = (best.sample - 1) * f + (f - 1) / 2 + 1;
            let bl = (best.line - 1) * f + (f - 1) / 2 + 1;
            let grow = f + config.surface_model.window_size as i64 + 1;
            window = SearchWindow {
                start_sample: (bs - grow).max(window.start_sample),
                end_sample: (bs + grow).min(window.end_sample),
                start_line: (bl - grow).max(window.start_line),
                end_line: (bl + grow).min(window.end_line),
            };
            best_search = (bs as f64, bl as f64);
        }

        if algorithm.is_adaptive() {
            if fit.samples() != search.samples() || fit.lines() != search.lines() {
                *fit = Chip::new(search.samples(), search.lines())?;
            }
            fit.set_affine(*search.affine());
            let outcome = algorithm.adaptive_registration(AdaptiveRequest {
                search,
                pattern,
                fit,
                best: best_search,
            })?;
            let mut registration = with_z(outcome.status);
            if let Some(solution) = outcome.solution {
                let (cube_sample, cube_line) = search.chip_to_cube(solution.chip_sample, solution.chip_line);
                registration.position = Some(RegisteredPosition {
                    chip_sample: solution.chip_sample,
                    chip_line: solution.chip_line,
                    cube_sample,
                    cube_line,
                });
                registration.goodness_of_fit = Some(solution.uncertainty);
                registration.gruen = Some(solution);
            }
            return Ok(registration);
        }

        let Some(best) = coarse_search(algorithm, pattern, search, fit, window, subsearch_percent)? else {
            return Ok(with_z(RegisterStatus::FitChipNoData));
        };

        // Recorded even when the tolerance fails.
        let mut registration = with_z(RegisterStatus::SuccessPixel);
        let (cube_sample, cube_line) = search.chip_to_cube(best.sample as f64, best.line as f64);
        registration.position = Some(RegisteredPosition {
            chip_sample: best.sample as f64,
            chip_line: best.line as f64,
            cube_sample,
            cube_line,
        });
        registration.whole_pixel = Some((best.sample, best.line));
        registration.goodness_of_fit = Some(best.fit);

        if !algorithm.compare_fits(best.fit, config.algorithm.tolerance) {
            registration.status = RegisterStatus::ToleranceNotMet;
            return Ok(registration);
        }

        if !config.algorithm.subpixel_accuracy {
            return Ok(registration);
        }
        registration.status = RegisterStatus::SuccessSubPixel;
        if algorithm.is_ideal(best.fit) {
            return Ok(registration);
        }

        match surface::model_surface(fit, (best.sample, best.line), &config.surface_model) {
            Ok(model) => {
                let (cube_sample, cube_line) = search.chip_to_cube(model.chip_sample, model.chip_line);
                registration.position = Some(RegisteredPosition {
                    chip_sample: model.chip_sample,
                    chip_line: model.chip_line,
                    cube_sample,
                    cube_line,
                });
                registration.goodness_of_fit = Some(model.goodness_of_fit);
                registration.surface_model = Some(model);
            }
            Err(failure) => {
                registration.status = RegisterStatus::SurfaceModelInvalid(failure);
            }
        }
        Ok(registration)
    }
}
