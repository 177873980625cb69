//! Registration outcomes and their running tallies.

use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use super::gruen::GruenSolution;
use crate::math::Statistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
pub enum PatternFailure {
    NotEnoughValidData,
    ZScoreNotMet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
pub enum SurfaceModelFailure {
    NotEnoughValidData,
    SolutionInvalid,
    ExtremumOutsideWindow,
    DistanceInvalid,
    EccentricityRatioNotMet,
    ResidualToleranceNotMet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
pub enum GruenFailure {
    NotEnoughPoints,
    CholeskyFailed,
    AffineNotInvertible,
    MaxIterationsExceeded,
    EigenExceeded,
    ShiftExceeded,
    GainExceeded,
    DistanceExceeded,
}

/// Outcome of one `register` call. Every algorithmic failure is a status,
/// never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterStatus {
    SuccessPixel,
    SuccessSubPixel,
    PatternChipInvalid(PatternFailure),
    FitChipNoData,
    ToleranceNotMet,
    SurfaceModelInvalid(SurfaceModelFailure),
    AdaptiveFailure(GruenFailure),
}

impl RegisterStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RegisterStatus::SuccessPixel | RegisterStatus::SuccessSubPixel)
    }
}

impl fmt::Display for RegisterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterStatus::SuccessPixel => write!(f, "SuccessPixel"),
            RegisterStatus::SuccessSubPixel => write!(f, "SuccessSubPixel"),
            RegisterStatus::PatternChipInvalid(kind) => write!(f, "PatternChipInvalid({})", kind),
            RegisterStatus::FitChipNoData => write!(f, "FitChipNoData"),
            RegisterStatus::ToleranceNotMet => write!(f, "ToleranceNotMet"),
            RegisterStatus::SurfaceModelInvalid(kind) => write!(f, "SurfaceModelInvalid({})", kind),
            RegisterStatus::AdaptiveFailure(kind) => write!(f, "AdaptiveFailure({})", kind),
        }
    }
}

// =============================================================================
// Registration result
// =============================================================================

/// Where the pattern landed, in search chip and search cube coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegisteredPosition {
    pub chip_sample: f64,
    pub chip_line: f64,
    pub cube_sample: f64,
    pub cube_line: f64,
}

/// Diagnostics of the sub-pixel quadratic fit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SurfaceModelFit {
    /// Extremum in search chip coordinates.
    pub chip_sample: f64,
    pub chip_line: f64,
    /// Fit value at the extremum.
    pub goodness_of_fit: f64,
    pub sample_movement: f64,
    pub line_movement: f64,
    pub distance: f64,
    pub eccentricity: Option<f64>,
    pub eccentricity_ratio: Option<f64>,
    pub average_residual: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub status: RegisterStatus,
    /// Kept whenever a best candidate exists, even if it failed a later
    /// tolerance.
    pub position: Option<RegisteredPosition>,
    pub goodness_of_fit: Option<f64>,
    pub z_score_min: Option<f64>,
    pub z_score_max: Option<f64>,
    /// Whole-pixel best in search chip coordinates.
    pub whole_pixel: Option<(i64, i64)>,
    pub surface_model: Option<SurfaceModelFit>,
    pub gruen: Option<GruenSolution>,
}

impl Registration {
    pub(crate) fn new(status: RegisterStatus) -> Self {
        Self {
            status,
            position: None,
            goodness_of_fit: None,
            z_score_min: None,
            z_score_max: None,
            whole_pixel: None,
            surface_model: None,
            gruen: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Registered cube coordinate, only for successful registrations.
    pub fn cube_position(&self) -> Option<(f64, f64)> {
        self.position
            .filter(|_| self.is_success())
            .map(|p| (p.cube_sample, p.cube_line))
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Attempts and per-status counts across `register` calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationStatistics {
    attempts: u64,
    counts: HashMap<String, u64>,
}

impl RegistrationStatistics {
    pub fn record(&mut self, status: RegisterStatus) {
        self.attempts += 1;
        *self.counts.entry(status.to_string()).or_insert(0) += 1;
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn count(&self, status: RegisterStatus) -> u64 {
        self.counts.get(&status.to_string()).copied().unwrap_or(0)
    }

    pub fn successes(&self) -> u64 {
        self.count(RegisterStatus::SuccessPixel) + self.count(RegisterStatus::SuccessSubPixel)
    }

    pub fn failures(&self) -> u64 {
        self.attempts - self.successes()
    }

    /// `(status, count)` pairs sorted by status name.
    pub fn counts(&self) -> Vec<(String, u64)> {
        let mut counts: Vec<_> = self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        counts.sort();
        counts
    }

    pub fn merge(&mut self, other: &RegistrationStatistics) {
        self.attempts += other.attempts;
        for (status, count) in &other.counts {
            *self.counts.entry(status.clone()).or_insert(0) += count;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Matcher-specific counters and distributions, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmStatistics {
    pub counters: Vec<(String, u64)>,
    pub distributions: Vec<(String, Statistics)>,
}

impl AlgorithmStatistics {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .find(|(n, _)| n == name)
            .map_or(0, |(_, c)| *c)
    }

    pub fn distribution(&self, name: &str) -> Option<&Statistics> {
        self.distributions.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn merge(&mut self, other: &AlgorithmStatistics) {
        for (name, count) in &other.counters {
            match self.counters.iter_mut().find(|(n, _)| n == name) {
                Some((_, c)) => *c += count,
                None => self.counters.push((name.clone(), *count)),
            }
        }
        for (name, stats) in &other.distributions {
            match self.distributions.iter_mut().find(|(n, _)| n == name) {
                Some((_, s)) => s.merge(stats),
                None => self.distributions.push((name.clone(), *stats)),
            }
        }
    }
}
