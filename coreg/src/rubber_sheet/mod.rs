//! Geometric warping of a whole raster.
//!
//! Two engines:
//! * [`RubberSheet::warp_reverse`] walks output tiles and asks an
//!   [`InverseMap`] where each output pixel comes from. Tiles are subdivided
//!   as a quad tree until a bilinear fit of the four corner mappings is good
//!   to half a pixel at the tile centre.
//! * [`RubberSheet::warp_forward`] walks overlapping input patches, pushes
//!   their corners through a [`ForwardMap`] and fills the covered output
//!   pixels through a per-patch affine.
//!
//! Coordinates are 1-based cube coordinates.

mod forward;
mod quad_tree;

#[cfg(test)]
mod tests;

pub use forward::{PatchConfig, PatchStats};
pub use quad_tree::{QuadTreeConfig, QuadTreeStats};

use crate::affine::Affine;
use crate::geometry::GroundMap;
use crate::interpolator::Interpolator;

/// Output pixel to input pixel.
pub trait InverseMap: Sync {
    fn output_to_input(&self, sample: f64, line: f64) -> Option<(f64, f64)>;
}

/// Input pixel to output pixel.
pub trait ForwardMap: Sync {
    fn input_to_output(&self, sample: f64, line: f64) -> Option<(f64, f64)>;
}

impl<F> InverseMap for F
where
    F: Fn(f64, f64) -> Option<(f64, f64)> + Sync,
{
    fn output_to_input(&self, sample: f64, line: f64) -> Option<(f64, f64)> {
        self(sample, line)
    }
}

impl<F> ForwardMap for F
where
    F: Fn(f64, f64) -> Option<(f64, f64)> + Sync,
{
    fn input_to_output(&self, sample: f64, line: f64) -> Option<(f64, f64)> {
        self(sample, line)
    }
}

/// An affine taking input coordinates to output coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMap {
    input_to_output: Affine,
}

impl AffineMap {
    pub fn new(input_to_output: Affine) -> Self {
        Self { input_to_output }
    }

    pub fn affine(&self) -> &Affine {
        &self.input_to_output
    }
}

impl InverseMap for AffineMap {
    fn output_to_input(&self, sample: f64, line: f64) -> Option<(f64, f64)> {
        Some(self.input_to_output.compute_inverse(sample, line))
    }
}

impl ForwardMap for AffineMap {
    fn input_to_output(&self, sample: f64, line: f64) -> Option<(f64, f64)> {
        Some(self.input_to_output.compute(sample, line))
    }
}

/// Maps between two rasters through the ground.
pub struct GroundTransform<'a> {
    pub input: &'a dyn GroundMap,
    pub output: &'a dyn GroundMap,
}

impl InverseMap for GroundTransform<'_> {
    fn output_to_input(&self, sample: f64, line: f64) -> Option<(f64, f64)> {
        let (lat, lon) = self.output.image_to_ground(sample, line)?;
        self.input.ground_to_image(lat, lon)
    }
}

impl ForwardMap for GroundTransform<'_> {
    fn input_to_output(&self, sample: f64, line: f64) -> Option<(f64, f64)> {
        let (lat, lon) = self.input.image_to_ground(sample, line)?;
        self.output.ground_to_image(lat, lon)
    }
}

/// Warp engine. Holds the interpolator and the engine settings; the maps
/// and rasters are passed per call.
#[derive(Debug, Clone, Default)]
pub struct RubberSheet {
    pub interpolator: Interpolator,
    pub quad_tree: QuadTreeConfig,
    pub patches: PatchConfig,
}

impl RubberSheet {
    pub fn new(interpolator: Interpolator) -> Self {
        Self {
            interpolator,
            ..Default::default()
        }
    }

    pub fn with_quad_tree(mut self, quad_tree: QuadTreeConfig) -> Self {
        self.quad_tree = quad_tree;
        self
    }

    pub fn with_patches(mut self, patches: PatchConfig) -> Self {
        self.patches = patches;
        self
    }
}

/// True when `(sample, line)` lies on the input raster's pixel area.
#[inline]
fn inside_input(sample: f64, line: f64, samples: usize, lines: usize) -> bool {
    sample >= 0.5 && line >= 0.5 && sample <= samples as f64 + 0.5 && line <= lines as f64 + 0.5
}
