//! Fixed-size pixel windows anchored at a cube coordinate.
//!
//! A chip maps chip coordinates to cube coordinates through an affine that
//! works on tack-relative chip coordinates: chip `(s, l)` is passed to the
//! affine as `(s - tack_sample, l - tack_line)`, so `(0, 0)` always lands
//! on the cube tack. Chip coordinates are 1-based.

mod geom;
mod ops;


use std::path::Path;

use crate::affine::Affine;
use crate::buffer2::Buffer2;
use crate::error::{Error, Result};
use crate::geometry::ClipPolygon;
use crate::interpolator::Interpolator;
use crate::math::Statistics;
use crate::raster::{interpolate_direct, MemoryRaster, PixelType, Raster, RasterPatch};
use crate::special::{is_special, NULL, VALID_MAXIMUM, VALID_MINIMUM};

#[derive(Debug, Clone)]
pub struct Chip {
    buf: Buffer2<f64>,
    cube_tack_sample: f64,
    cube_tack_line: f64,
    affine: Affine,
    valid_minimum: f64,
    valid_maximum: f64,
    clip: Option<ClipPolygon>,
    read_interpolator: Interpolator,
}

impl Chip {
    pub fn new(samples: usize, lines: usize) -> Result<Self> {
        if samples == 0 || lines == 0 {
            return Err(Error::InvalidChipSize { samples, lines });
        }
        Ok(Self {
            buf: Buffer2::new_filled(samples, lines, NULL),
            cube_tack_sample: 0.0,
            cube_tack_line: 0.0,
            affine: Affine::identity(),
            valid_minimum: VALID_MINIMUM,
            valid_maximum: VALID_MAXIMUM,
            clip: None,
            read_interpolator: Interpolator::CubicConvolution,
        })
    }

    #[inline]
    pub fn samples(&self) -> usize {
        self.buf.width()
    }

    #[inline]
    pub fn lines(&self) -> usize {
        self.buf.height()
    }

    /// Chip sample of the tack, `(samples - 1) / 2 + 1`.
    #[inline]
    pub fn tack_sample(&self) -> usize {
        (self.samples() - 1) / 2 + 1
    }

    #[inline]
    pub fn tack_line(&self) -> usize {
        (self.lines() - 1) / 2 + 1
    }

    pub fn cube_tack_sample(&self) -> f64 {
        self.cube_tack_sample
    }

    pub fn cube_tack_line(&self) -> f64 {
        self.cube_tack_line
    }

    /// Sets the cube position that maps to the tack and resets the chip
    /// geometry to a pure translation.
    pub fn tack_cube(&mut self, sample: f64, line: f64) {
        self.cube_tack_sample = sample;
        self.cube_tack_line = line;
        self.affine = Affine::translation(sample, line);
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    /// Replaces the chip-to-cube affine; the cube tack follows it.
    pub fn set_affine(&mut self, affine: Affine) {
        self.affine = affine;
        let (s, l) = affine.compute(0.0, 0.0);
        self.cube_tack_sample = s;
        self.cube_tack_line = l;
    }

    pub fn read_interpolator(&self) -> Interpolator {
        self.read_interpolator
    }

    pub fn set_read_interpolator(&mut self, interpolator: Interpolator) {
        self.read_interpolator = interpolator;
    }

    pub fn clip_polygon(&self) -> Option<&ClipPolygon> {
        self.clip.as_ref()
    }

    /// Pixels whose cube coordinate falls outside `clip` load as NULL.
    /// Interpolation may still use raster pixels outside the polygon.
    pub fn set_clip_polygon(&mut self, clip: Option<ClipPolygon>) {
        self.clip = clip;
    }

    pub fn valid_range(&self) -> (f64, f64) {
        (self.valid_minimum, self.valid_maximum)
    }

    pub fn set_valid_range(&mut self, minimum: f64, maximum: f64) -> Result<()> {
        if minimum >= maximum {
            return Err(Error::config(format!(
                "valid chip range [{}, {}] must have minimum < maximum",
                minimum, maximum
            )));
        }
        self.valid_minimum = minimum;
        self.valid_maximum = maximum;
        Ok(())
    }

    // ========================================================================
    // Coordinates
    // ========================================================================

    /// Cube coordinate of a (fractional) chip coordinate.
    #[inline]
    pub fn chip_to_cube(&self, sample: f64, line: f64) -> (f64, f64) {
        self.affine.compute(
            sample - self.tack_sample() as f64,
            line - self.tack_line() as f64,
        )
    }

    /// Chip coordinate of a cube coordinate. May fall outside the chip.
    #[inline]
    pub fn cube_to_chip(&self, sample: f64, line: f64) -> (f64, f64) {
        let (x, y) = self.affine.compute_inverse(sample, line);
        (x + self.tack_sample() as f64, y + self.tack_line() as f64)
    }

    /// Whether a cube coordinate lies within the chip's footprint around the
    /// cube tack, ignoring rotation and scale.
    pub fn is_inside_chip(&self, sample: f64, line: f64) -> bool {
        let hs = ((self.samples() - 1) / 2) as f64;
        let hl = ((self.lines() - 1) / 2) as f64;
        (self.cube_tack_sample - hs..=self.cube_tack_sample + hs).contains(&sample)
            && (self.cube_tack_line - hl..=self.cube_tack_line + hl).contains(&line)
    }

    // ========================================================================
    // Pixel access
    // ========================================================================

    /// 1-based pixel value.
    #[inline]
    pub fn get_value(&self, sample: usize, line: usize) -> f64 {
        self.buf[(sample - 1, line - 1)]
    }

    #[inline]
    pub fn set_value(&mut self, sample: usize, line: usize, value: f64) {
        self.buf[(sample - 1, line - 1)] = value;
    }

    pub fn set_all_values(&mut self, value: f64) {
        self.buf.fill(value);
    }

    pub fn buffer(&self) -> &Buffer2<f64> {
        &self.buf
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer2<f64> {
        &mut self.buf
    }

    /// True when the pixel is not special and inside the valid range.
    #[inline]
    pub fn is_valid(&self, sample: usize, line: usize) -> bool {
        self.is_valid_value(self.get_value(sample, line))
    }

    #[inline]
    pub fn is_valid_value(&self, value: f64) -> bool {
        !is_special(value) && value >= self.valid_minimum && value <= self.valid_maximum
    }

    pub fn valid_count(&self) -> usize {
        self.buf
            .pixels()
            .iter()
            .filter(|&&v| self.is_valid_value(v))
            .count()
    }

    /// Percentage of pixels that are valid.
    pub fn valid_percent(&self) -> f64 {
        100.0 * self.valid_count() as f64 / self.buf.len() as f64
    }

    /// True when at least `percent` of the pixels are valid.
    pub fn has_valid_percent(&self, percent: f64) -> bool {
        self.valid_percent() >= percent
    }

    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics::with_valid_range(self.valid_minimum, self.valid_maximum);
        stats.add_all(self.buf.pixels());
        stats
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Loads from `raster` around the cube tack, rotated by `rotation`
    /// radians and magnified by `scale` (a scale of 2 samples the raster at
    /// half-pixel steps).
    pub fn load(&mut self, raster: &dyn Raster, rotation: f64, scale: f64, band: usize) -> Result<()> {
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(Error::config(format!("chip load scale must be positive, got {}", scale)));
        }
        let mut affine = Affine::identity();
        affine.scale(1.0 / scale)?;
        affine.rotate(rotation)?;
        affine.translate(self.cube_tack_sample, self.cube_tack_line)?;
        self.affine = affine;
        self.read(raster, band)
    }

    /// Loads using a caller-supplied chip-to-cube affine. The cube tack is
    /// moved to where the affine sends the chip tack.
    pub fn load_with_affine(
        &mut self,
        raster: &dyn Raster,
        affine: &Affine,
        keep_clip: bool,
        band: usize,
    ) -> Result<()> {
        self.set_affine(*affine);
        if !keep_clip {
            self.clip = None;
        }
        self.read(raster, band)
    }

    /// Fills the buffer by interpolating the raster at each pixel's cube
    /// coordinate.
    fn read(&mut self, raster: &dyn Raster, band: usize) -> Result<()> {
        let interpolator = self.read_interpolator;
        let (ns, nl) = (raster.samples() as f64, raster.lines() as f64);

        let (mut min, mut max) = ((f64::MAX, f64::MAX), (f64::MIN, f64::MIN));
        for (s, l) in [
            (1.0, 1.0),
            (self.samples() as f64, 1.0),
            (1.0, self.lines() as f64),
            (self.samples() as f64, self.lines() as f64),
        ] {
            let (cs, cl) = self.chip_to_cube(s, l);
            min = (min.0.min(cs), min.1.min(cl));
            max = (max.0.max(cs), max.1.max(cl));
        }
        let patch = RasterPatch::for_region(raster, band, interpolator, min, max)?;

        for line in 1..=self.lines() {
            for samp in 1..=self.samples() {
                let (cs, cl) = self.chip_to_cube(samp as f64, line as f64);
                let outside = cs < 0.5 || cl < 0.5 || cs > ns + 0.5 || cl > nl + 0.5;
                let clipped = self
                    .clip
                    .as_ref()
                    .is_some_and(|clip| !clip.contains(cs, cl));
                let value = if outside || clipped {
                    NULL
                } else if let Some(patch) = &patch {
                    patch.interpolate(interpolator, cs, cl)
                } else {
                    interpolate_direct(raster, band, interpolator, cs, cl)?
                };
                self.buf[(samp - 1, line - 1)] = value;
            }
        }
        Ok(())
    }

    /// Dumps the chip as a single-band Real64 raw raster.
    pub fn write(&self, path: &Path) -> Result<()> {
        MemoryRaster::from_data(self.samples(), self.lines(), 1, self.buf.pixels().to_vec())
            .save(path, PixelType::Real64)
    }
}
