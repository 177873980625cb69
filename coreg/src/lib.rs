//! Coreg - sub-pixel image-to-image registration.
//!
//! This library provides:
//! - Pattern/search chip matching with difference, correlation and Gruen
//!   least-squares matchers, plus quadratic surface-model refinement
//! - A grid driver producing tie points and translation statistics
//! - Rubber-sheet warps through a quad tree or forward patches
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use coreg::{AutoRegConfig, CoregDriver, GridConfig, MatcherRegistry, RawFileRaster};
//!
//! let config = AutoRegConfig::from_file("autoreg.yaml".as_ref())?;
//! let matcher = MatcherRegistry::default().create(&config)?;
//! let pattern = RawFileRaster::open("pattern.raw".as_ref())?;
//! let search = RawFileRaster::open("search.raw".as_ref())?;
//!
//! let driver = CoregDriver::new(GridConfig::new(10, 10))?;
//! let run = driver.run(&matcher, &pattern, &search, &|s, l| Some((s, l)))?;
//! run.net.write_flat_csv("flat.csv".as_ref())?;
//! ```

pub mod affine;
pub mod buffer2;
pub mod chip;
pub mod config;
pub mod driver;
pub mod error;
pub mod geometry;
pub mod interpolator;
pub mod math;
pub mod matcher;
pub mod raster;
pub mod registry;
pub mod rubber_sheet;
pub mod special;

// ============================================================================
// Core types
// ============================================================================

pub use affine::Affine;
pub use chip::Chip;
pub use error::{Error, Result};
pub use geometry::{AffineGroundMap, ClipPolygon, GroundMap};
pub use interpolator::Interpolator;
pub use math::Statistics;

// ============================================================================
// Rasters
// ============================================================================

pub use raster::{MemoryRaster, PixelType, Raster, RasterCache, RasterWrite, RawFileRaster, Window};

// ============================================================================
// Registration
// ============================================================================

pub use config::{AutoRegConfig, Gradient, GruenConfig};
pub use matcher::{
    AutoReg, Gruen, GruenSolution, MatchAlgorithm, MaximumCorrelation, MinimumDifference,
    RegisterStatus, Registration, RegistrationStatistics,
};
pub use registry::MatcherRegistry;

// ============================================================================
// Grid driver
// ============================================================================

pub use driver::{ControlNet, ControlPoint, CoregDriver, CoregRun, CoregSummary, GridConfig};

// ============================================================================
// Rubber sheet
// ============================================================================

pub use rubber_sheet::{
    AffineMap, ForwardMap, GroundTransform, InverseMap, PatchConfig, QuadTreeConfig, RubberSheet,
};
