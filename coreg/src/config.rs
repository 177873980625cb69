//! Auto-registration configuration.
//!
//! The tree mirrors the `AutoRegistration` object: an `Algorithm` group, a
//! `PatternChip` group, a `SearchChip` group and an optional `SurfaceModel`
//! group. Keys are PascalCase; YAML is the file form.
//!
//! ```yaml
//! AutoRegistration:
//!   Algorithm:
//!     Name: MaximumCorrelation
//!     Tolerance: 0.7
//!   PatternChip:
//!     Samples: 21
//!     Lines: 21
//!   SearchChip:
//!     Samples: 51
//!     Lines: 51
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::{Error, Result};
use crate::interpolator::Interpolator;
use crate::special::{VALID_MAXIMUM, VALID_MINIMUM};

/// Filter applied to both chips before matching.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(try_from = "String", into = "String")]
pub enum Gradient {
    #[default]
    None,
    Sobel,
}

impl TryFrom<String> for Gradient {
    type Error = strum::ParseError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Gradient> for String {
    fn from(value: Gradient) -> Self {
        value.to_string()
    }
}

// =============================================================================
// Groups
// =============================================================================

/// Tolerances of the adaptive (Gruen) matcher. `None` means unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GruenConfig {
    pub maximum_iterations: usize,
    pub affine_translation_tolerance: f64,
    pub affine_scale_tolerance: f64,
    /// Defaults to the scale tolerance.
    pub affine_shear_tolerance: Option<f64>,
    /// Maximum distance between the start and registered positions.
    pub affine_tolerance: Option<f64>,
    pub radio_shift_tolerance: Option<f64>,
    pub radio_gain_min_tolerance: Option<f64>,
    pub radio_gain_max_tolerance: Option<f64>,
    pub default_radio_gain: f64,
    pub default_radio_shift: f64,
    /// Rows whose residual exceeds this many RMS are dropped from a solve.
    pub residual_gate: f64,
}

impl Default for GruenConfig {
    fn default() -> Self {
        Self {
            maximum_iterations: 25,
            affine_translation_tolerance: 0.1,
            affine_scale_tolerance: 0.5,
            affine_shear_tolerance: None,
            affine_tolerance: None,
            radio_shift_tolerance: None,
            radio_gain_min_tolerance: None,
            radio_gain_max_tolerance: None,
            default_radio_gain: 0.0,
            default_radio_shift: 0.0,
            residual_gate: 3.0,
        }
    }
}

impl GruenConfig {
    pub fn shear_tolerance(&self) -> f64 {
        self.affine_shear_tolerance.unwrap_or(self.affine_scale_tolerance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlgorithmConfig {
    pub name: String,
    pub tolerance: f64,
    #[serde(default = "default_true")]
    pub subpixel_accuracy: bool,
    #[serde(default = "default_one")]
    pub reduction_factor: usize,
    #[serde(default)]
    pub chip_interpolator: Interpolator,
    #[serde(default)]
    pub gradient: Gradient,
    #[serde(flatten)]
    pub gruen: GruenConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatternChipConfig {
    pub samples: usize,
    pub lines: usize,
    #[serde(default = "default_percent")]
    pub valid_percent: f64,
    #[serde(default = "default_z_score", rename = "MinimumZScore", alias = "ZScoreMinimum")]
    pub minimum_z_score: f64,
    #[serde(default)]
    pub valid_minimum: Option<f64>,
    #[serde(default)]
    pub valid_maximum: Option<f64>,
    /// Percentage of chip pixels visited by the similarity measures.
    #[serde(default = "default_sampling")]
    pub sampling: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchChipConfig {
    pub samples: usize,
    pub lines: usize,
    #[serde(default = "default_percent")]
    pub subchip_valid_percent: f64,
    #[serde(default)]
    pub valid_minimum: Option<f64>,
    #[serde(default)]
    pub valid_maximum: Option<f64>,
}

/// Sub-pixel surface model. The eccentricity and residual gates are off
/// unless their keys are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SurfaceModelConfig {
    pub distance_tolerance: f64,
    pub window_size: usize,
    pub eccentricity_ratio: Option<f64>,
    pub residual_tolerance: Option<f64>,
}

impl Default for SurfaceModelConfig {
    fn default() -> Self {
        Self {
            distance_tolerance: 1.5,
            window_size: 5,
            eccentricity_ratio: None,
            residual_tolerance: None,
        }
    }
}

impl SurfaceModelConfig {
    pub const DEFAULT_ECCENTRICITY_RATIO: f64 = 2.0;
    pub const DEFAULT_RESIDUAL_TOLERANCE: f64 = 0.1;

    /// Enables eccentricity testing with the given ratio (major : minor axis).
    pub fn with_eccentricity_ratio(mut self, ratio: f64) -> Self {
        self.eccentricity_ratio = Some(ratio);
        self
    }

    pub fn with_residual_tolerance(mut self, tolerance: f64) -> Self {
        self.residual_tolerance = Some(tolerance);
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_percent() -> f64 {
    50.0
}

fn default_z_score() -> f64 {
    1.0
}

fn default_sampling() -> f64 {
    100.0
}

// =============================================================================
// AutoRegConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AutoRegConfig {
    pub algorithm: AlgorithmConfig,
    pub pattern_chip: PatternChipConfig,
    pub search_chip: SearchChipConfig,
    #[serde(default)]
    pub surface_model: SurfaceModelConfig,
}

#[derive(Serialize, Deserialize)]
struct ConfigFile {
    #[serde(rename = "AutoRegistration")]
    auto_registration: AutoRegConfig,
}

impl AutoRegConfig {
    /// Configuration with every optional key at its default.
    pub fn new(
        algorithm: &str,
        tolerance: f64,
        pattern: (usize, usize),
        search: (usize, usize),
    ) -> Self {
        Self {
            algorithm: AlgorithmConfig {
                name: algorithm.to_string(),
                tolerance,
                subpixel_accuracy: true,
                reduction_factor: 1,
                chip_interpolator: Interpolator::default(),
                gradient: Gradient::default(),
                gruen: GruenConfig::default(),
            },
            pattern_chip: PatternChipConfig {
                samples: pattern.0,
                lines: pattern.1,
                valid_percent: default_percent(),
                minimum_z_score: default_z_score(),
                valid_minimum: None,
                valid_maximum: None,
                sampling: default_sampling(),
            },
            search_chip: SearchChipConfig {
                samples: search.0,
                lines: search.1,
                subchip_valid_percent: default_percent(),
                valid_minimum: None,
                valid_maximum: None,
            },
            surface_model: SurfaceModelConfig::default(),
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ConfigFile = serde_yml::from_str(yaml)?;
        file.auto_registration.validate()?;
        Ok(file.auto_registration)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yml::to_string(&ConfigFile {
            auto_registration: self.clone(),
        })?)
    }

    pub fn pattern_valid_range(&self) -> (f64, f64) {
        (
            self.pattern_chip.valid_minimum.unwrap_or(VALID_MINIMUM),
            self.pattern_chip.valid_maximum.unwrap_or(VALID_MAXIMUM),
        )
    }

    pub fn search_valid_range(&self) -> (f64, f64) {
        (
            self.search_chip.valid_minimum.unwrap_or(VALID_MINIMUM),
            self.search_chip.valid_maximum.unwrap_or(VALID_MAXIMUM),
        )
    }

    /// Pixel stride per axis so that roughly `Sampling` percent of the
    /// pattern is visited.
    pub fn sampling_stride(&self) -> usize {
        let fraction = self.pattern_chip.sampling / 100.0;
        ((1.0 / fraction).sqrt().round() as usize).max(1)
    }

    /// Checks every key against its allowed range.
    pub fn validate(&self) -> Result<()> {
        let algo = &self.algorithm;
        let pattern = &self.pattern_chip;
        let search = &self.search_chip;
        let surface = &self.surface_model;

        if algo.name.trim().is_empty() {
            return Err(Error::config("Algorithm Name must not be empty"));
        }
        if !algo.tolerance.is_finite() {
            return Err(Error::config(format!(
                "Algorithm Tolerance must be finite, got {}",
                algo.tolerance
            )));
        }
        if algo.reduction_factor < 1 {
            return Err(Error::config("Algorithm ReductionFactor must be at least 1"));
        }

        check_percent("PatternChip ValidPercent", pattern.valid_percent)?;
        check_percent("PatternChip Sampling", pattern.sampling)?;
        check_percent("SearchChip SubchipValidPercent", search.subchip_valid_percent)?;
        if pattern.minimum_z_score <= 0.0 {
            return Err(Error::config(format!(
                "PatternChip MinimumZScore must be positive, got {}",
                pattern.minimum_z_score
            )));
        }

        check_chip_size("PatternChip", pattern.samples, pattern.lines)?;
        check_chip_size("SearchChip", search.samples, search.lines)?;
        check_valid_range("PatternChip", self.pattern_valid_range())?;
        check_valid_range("SearchChip", self.search_valid_range())?;

        if surface.window_size < 3 || surface.window_size % 2 == 0 {
            return Err(Error::config(format!(
                "SurfaceModel WindowSize must be odd and at least 3, got {}",
                surface.window_size
            )));
        }
        if !(surface.distance_tolerance > 0.0) {
            return Err(Error::config(format!(
                "SurfaceModel DistanceTolerance must be positive, got {}",
                surface.distance_tolerance
            )));
        }
        if let Some(ratio) = surface.eccentricity_ratio {
            if !(ratio >= 1.0) {
                return Err(Error::config(format!(
                    "SurfaceModel EccentricityRatio must be at least 1, got {}",
                    ratio
                )));
            }
        }
        if let Some(tolerance) = surface.residual_tolerance {
            if !(tolerance >= 0.0) {
                return Err(Error::config(format!(
                    "SurfaceModel ResidualTolerance must not be negative, got {}",
                    tolerance
                )));
            }
        }

        let margin = surface.window_size / 2 + 1;
        if search.samples < pattern.samples + margin || search.lines < pattern.lines + margin {
            return Err(Error::config(format!(
                "SearchChip {}x{} must be at least {} pixels larger than PatternChip {}x{}",
                search.samples, search.lines, margin, pattern.samples, pattern.lines
            )));
        }
        if pattern.samples / algo.reduction_factor < 2 || pattern.lines / algo.reduction_factor < 2 {
            return Err(Error::config(format!(
                "ReductionFactor {} is too large for PatternChip {}x{}",
                algo.reduction_factor, pattern.samples, pattern.lines
            )));
        }

        let gruen = &algo.gruen;
        if gruen.maximum_iterations == 0 {
            return Err(Error::config("MaximumIterations must be at least 1"));
        }
        for (key, value) in [
            ("AffineTranslationTolerance", gruen.affine_translation_tolerance),
            ("AffineScaleTolerance", gruen.affine_scale_tolerance),
            ("AffineShearTolerance", gruen.shear_tolerance()),
            ("ResidualGate", gruen.residual_gate),
        ] {
            if !(value > 0.0) {
                return Err(Error::config(format!("{} must be positive, got {}", key, value)));
            }
        }
        if let (Some(min), Some(max)) = (gruen.radio_gain_min_tolerance, gruen.radio_gain_max_tolerance) {
            if min >= max {
                return Err(Error::config(format!(
                    "RadioGainMinTolerance {} must be below RadioGainMaxTolerance {}",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

fn check_percent(key: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value <= 100.0) {
        return Err(Error::config(format!("{} must be in (0, 100], got {}", key, value)));
    }
    Ok(())
}

fn check_chip_size(group: &str, samples: usize, lines: usize) -> Result<()> {
    if samples == 0 || lines == 0 || samples % 2 == 0 || lines % 2 == 0 {
        return Err(Error::config(format!(
            "{} size {}x{} must be odd and non-zero",
            group, samples, lines
        )));
    }
    Ok(())
}

fn check_valid_range(group: &str, (min, max): (f64, f64)) -> Result<()> {
    if min >= max {
        return Err(Error::config(format!(
            "{} ValidMinimum {} must be below ValidMaximum {}",
            group, min, max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "
AutoRegistration:
  Algorithm:
    Name: MaximumCorrelation
    Tolerance: 0.7
  PatternChip:
    Samples: 21
    Lines: 21
  SearchChip:
    Samples: 51
    Lines: 51
";

    #[test]
    fn minimal_yaml_takes_defaults() {
        let config = AutoRegConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.algorithm.name, "MaximumCorrelation");
        assert!(config.algorithm.subpixel_accuracy);
        assert_eq!(config.algorithm.reduction_factor, 1);
        assert_eq!(config.algorithm.chip_interpolator, Interpolator::CubicConvolution);
        assert_eq!(config.algorithm.gradient, Gradient::None);
        assert_eq!(config.pattern_chip.valid_percent, 50.0);
        assert_eq!(config.pattern_chip.minimum_z_score, 1.0);
        assert_eq!(config.search_chip.subchip_valid_percent, 50.0);
        assert_eq!(config.surface_model, SurfaceModelConfig::default());
        assert_eq!(config.algorithm.gruen, GruenConfig::default());
        assert_eq!(config.algorithm.gruen.shear_tolerance(), 0.5);
        assert_eq!(config.sampling_stride(), 1);
    }

    #[test]
    fn full_yaml_parses_every_group() {
        let yaml = "
AutoRegistration:
  Algorithm:
    Name: AdaptiveGruen
    Tolerance: 0.3
    SubpixelAccuracy: false
    ReductionFactor: 2
    ChipInterpolator: BiLinearType
    Gradient: sobel
    MaximumIterations: 30
    AffineScaleTolerance: 0.2
    RadioGainMinTolerance: 0.5
    RadioGainMaxTolerance: 1.5
  PatternChip:
    Samples: 15
    Lines: 17
    ValidPercent: 90
    MinimumZScore: 2.5
    ValidMinimum: 0.0
    Sampling: 25
  SearchChip:
    Samples: 41
    Lines: 43
    SubchipValidPercent: 75
    ValidMaximum: 4000.0
  SurfaceModel:
    DistanceTolerance: 0.75
    WindowSize: 7
    EccentricityRatio: 3.0
";
        let config = AutoRegConfig::from_yaml_str(yaml).unwrap();
        assert!(!config.algorithm.subpixel_accuracy);
        assert_eq!(config.algorithm.chip_interpolator, Interpolator::Bilinear);
        assert_eq!(config.algorithm.gradient, Gradient::Sobel);
        assert_eq!(config.algorithm.gruen.maximum_iterations, 30);
        assert_eq!(config.algorithm.gruen.shear_tolerance(), 0.2);
        assert_eq!(config.pattern_valid_range().0, 0.0);
        assert_eq!(config.search_valid_range().1, 4000.0);
        assert_eq!(config.surface_model.window_size, 7);
        assert_eq!(config.surface_model.eccentricity_ratio, Some(3.0));
        assert_eq!(config.surface_model.residual_tolerance, None);
        assert_eq!(config.sampling_stride(), 2);
    }

    #[test]
    fn yaml_round_trip() {
        let config = AutoRegConfig::new("MinimumDifference", 5.0, (15, 15), (41, 41));
        let yaml = config.to_yaml_string().unwrap();
        assert_eq!(AutoRegConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn z_score_key_accepts_both_spellings() {
        let yaml = MINIMAL.replace("    Lines: 21\n", "    Lines: 21\n    ZScoreMinimum: 3.5\n");
        let config = AutoRegConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.pattern_chip.minimum_z_score, 3.5);
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let yaml = MINIMAL.replace("    Tolerance: 0.7\n", "");
        assert!(matches!(AutoRegConfig::from_yaml_str(&yaml), Err(Error::Yaml(_))));
    }

    #[test]
    fn unknown_interpolator_is_an_error() {
        let yaml = MINIMAL.replace("Tolerance: 0.7", "Tolerance: 0.7\n    ChipInterpolator: Sinc");
        assert!(AutoRegConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let base = AutoRegConfig::new("MaximumCorrelation", 0.7, (21, 21), (51, 51));
        assert!(base.validate().is_ok());

        let cases: Vec<Box<dyn Fn(&mut AutoRegConfig)>> = vec![
            Box::new(|c| c.pattern_chip.valid_percent = 0.0),
            Box::new(|c| c.pattern_chip.valid_percent = 101.0),
            Box::new(|c| c.search_chip.subchip_valid_percent = -5.0),
            Box::new(|c| c.pattern_chip.minimum_z_score = 0.0),
            Box::new(|c| c.pattern_chip.samples = 20),
            Box::new(|c| c.search_chip.lines = 0),
            Box::new(|c| c.surface_model.window_size = 4),
            Box::new(|c| c.surface_model.window_size = 1),
            Box::new(|c| c.surface_model.distance_tolerance = 0.0),
            Box::new(|c| c.surface_model.eccentricity_ratio = Some(0.5)),
            Box::new(|c| c.surface_model.residual_tolerance = Some(-1.0)),
            Box::new(|c| c.algorithm.reduction_factor = 0),
            Box::new(|c| c.algorithm.reduction_factor = 11),
            Box::new(|c| c.search_chip.samples = 23),
            Box::new(|c| c.pattern_chip.valid_minimum = Some(VALID_MAXIMUM)),
            Box::new(|c| {
                c.search_chip.valid_minimum = Some(20.0);
                c.search_chip.valid_maximum = Some(10.0);
            }),
            Box::new(|c| c.algorithm.gruen.maximum_iterations = 0),
            Box::new(|c| c.algorithm.gruen.affine_translation_tolerance = 0.0),
            Box::new(|c| c.algorithm.name = " ".to_string()),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut config = base.clone();
            mutate(&mut config);
            assert!(
                matches!(config.validate(), Err(Error::Configuration(_))),
                "case {} should be rejected",
                i
            );
        }
    }

    #[test]
    fn one_sided_valid_range_is_accepted() {
        let mut config = AutoRegConfig::new("MaximumCorrelation", 0.7, (21, 21), (51, 51));
        config.pattern_chip.valid_minimum = Some(10.0);
        config.search_chip.valid_maximum = Some(10.0);
        assert!(config.validate().is_ok());
        assert_eq!(config.pattern_valid_range(), (10.0, VALID_MAXIMUM));
        assert_eq!(config.search_valid_range(), (VALID_MINIMUM, 10.0));
    }

    #[test]
    fn search_margin_follows_window_size() {
        let mut config = AutoRegConfig::new("MaximumCorrelation", 0.7, (21, 21), (25, 25));
        assert!(config.validate().is_ok());
        config.surface_model.window_size = 9;
        assert!(config.validate().is_err());
    }
}
