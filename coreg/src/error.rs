//! Errors that abort a registration run.
//!
//! Per-node registration failures are not errors; they are reported through
//! [`RegisterStatus`](crate::matcher::RegisterStatus).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unknown matcher algorithm '{name}'")]
    UnknownAlgorithm { name: String },

    #[error("Invalid chip size {samples}x{lines}")]
    InvalidChipSize { samples: usize, lines: usize },

    #[error("Affine is not invertible (determinant {determinant:e})")]
    AffineNotInvertible { determinant: f64 },

    #[error("Affine solve needs at least 3 non-collinear points, got {found}")]
    InsufficientAffinePoints { found: usize },

    #[error("Could not find enough geometry points to match chips ({found} found)")]
    InsufficientGeometryPoints { found: usize },

    #[error("Jacobi eigen decomposition did not converge after {sweeps} sweeps")]
    EigenNotConverged { sweeps: usize },

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid raster {path}: {reason}")]
    InvalidRaster { path: PathBuf, reason: String },

    #[error("Window {samples}x{lines} at ({sample}, {line}) band {band} is outside the raster")]
    RasterBounds {
        sample: i64,
        line: i64,
        samples: usize,
        lines: usize,
        band: usize,
    },

    #[error("YAML error")]
    Yaml(#[from] serde_yml::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
