//! Tie-point output of a grid run.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::{Error, Result};
use crate::matcher::{GruenSolution, RegisterStatus, Registration};

pub const FLAT_CSV_HEADER: &str =
    "Sample,Line,TranslatedSample,TranslatedLine,SampleDifference,LineDifference,GoodnessOfFit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum MeasureType {
    /// Pattern-side measure the others are registered against.
    Reference,
    /// Search-side measure at its nominal position; registration failed.
    Candidate,
    RegisteredPixel,
    RegisteredSubPixel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GruenLog {
    pub gain: f64,
    pub shift: f64,
    pub uncertainty: f64,
    pub eigenvalues: [f64; 2],
    pub iterations: usize,
}

impl From<&GruenSolution> for GruenLog {
    fn from(solution: &GruenSolution) -> Self {
        Self {
            gain: solution.gain,
            shift: solution.shift,
            uncertainty: solution.uncertainty,
            eigenvalues: solution.eigenvalues,
            iterations: solution.iterations,
        }
    }
}

/// Per-measure log data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MeasureLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goodness_of_fit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gruen: Option<GruenLog>,
}

impl From<&Registration> for MeasureLog {
    fn from(registration: &Registration) -> Self {
        Self {
            goodness_of_fit: registration.goodness_of_fit,
            z_score_min: registration.z_score_min,
            z_score_max: registration.z_score_max,
            gruen: registration.gruen.as_ref().map(GruenLog::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ControlMeasure {
    pub serial_number: String,
    pub sample: f64,
    pub line: f64,
    pub measure_type: MeasureType,
    /// Registration outcome; `None` on the reference measure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RegisterStatus>,
    #[serde(default)]
    pub log: MeasureLog,
}

impl ControlMeasure {
    pub fn reference(serial_number: &str, sample: f64, line: f64) -> Self {
        Self {
            serial_number: serial_number.to_string(),
            sample,
            line,
            measure_type: MeasureType::Reference,
            status: None,
            log: MeasureLog::default(),
        }
    }

    /// Search-side measure for `registration`: the registered position on
    /// success, the nominal one otherwise.
    pub fn registered(serial_number: &str, nominal: (f64, f64), registration: &Registration) -> Self {
        let (measure_type, (sample, line)) = match (registration.status, registration.cube_position()) {
            (RegisterStatus::SuccessPixel, Some(p)) => (MeasureType::RegisteredPixel, p),
            (RegisterStatus::SuccessSubPixel, Some(p)) => (MeasureType::RegisteredSubPixel, p),
            _ => (MeasureType::Candidate, nominal),
        };
        Self {
            serial_number: serial_number.to_string(),
            sample,
            line,
            measure_type,
            status: Some(registration.status),
            log: MeasureLog::from(registration),
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(
            self.measure_type,
            MeasureType::RegisteredPixel | MeasureType::RegisteredSubPixel
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ControlPoint {
    pub id: String,
    /// Set when the search measure did not register.
    pub ignored: bool,
    pub reference: ControlMeasure,
    pub measure: ControlMeasure,
}

impl ControlPoint {
    pub fn is_registered(&self) -> bool {
        !self.ignored && self.measure.is_registered()
    }

    /// `(search - reference)` in samples and lines.
    pub fn difference(&self) -> (f64, f64) {
        (
            self.measure.sample - self.reference.sample,
            self.measure.line - self.reference.line,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ControlNet {
    pub network_id: String,
    pub points: Vec<ControlPoint>,
}

impl ControlNet {
    pub fn new(network_id: &str) -> Self {
        Self {
            network_id: network_id.to_string(),
            points: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, id: &str) -> Option<&ControlPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    pub fn registered(&self) -> impl Iterator<Item = &ControlPoint> {
        self.points.iter().filter(|p| p.is_registered())
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yml::to_string(self)?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yml::from_str(yaml)?)
    }

    pub fn write_yaml(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_yaml_string()?).map_err(|e| Error::io(path, e))
    }

    pub fn read_yaml(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml_str(&text)
    }

    /// One CSV row per registered point.
    pub fn to_flat_csv(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", FLAT_CSV_HEADER);
        for point in self.registered() {
            let (ds, dl) = point.difference();
            let goodness = point
                .measure
                .log
                .goodness_of_fit
                .map(|g| g.to_string())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{},{},{},{},{},{},{}",
                point.reference.sample,
                point.reference.line,
                point.measure.sample,
                point.measure.line,
                ds,
                dl,
                goodness
            );
        }
        out
    }

    pub fn write_flat_csv(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_flat_csv()).map_err(|e| Error::io(path, e))
    }
}
