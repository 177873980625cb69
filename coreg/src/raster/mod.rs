//! Minimal raster layer: the read/write seam the chip and the rubber-sheet
//! engines talk to, an in-memory raster, a raw file format and an LRU cache
//! of open file handles.

mod cache;
mod memory;
mod patch;
mod raw_file;


pub use cache::{default_ceiling, CacheStats, RasterCache, RasterOpener, RawFileOpener};
pub use memory::MemoryRaster;
pub use patch::{interpolate_direct, RasterPatch, MAX_PATCH_PIXELS};
pub use raw_file::RawFileRaster;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};
use crate::special::NULL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum PixelType {
    Real32,
    Real64,
}

impl PixelType {
    pub fn bytes(&self) -> usize {
        match self {
            PixelType::Real32 => 4,
            PixelType::Real64 => 8,
        }
    }
}

/// Rectangular read/write region. `sample`, `line` and `band` are 1-based;
/// `sample`/`line` may lie outside the raster for clipped reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub sample: i64,
    pub line: i64,
    pub samples: usize,
    pub lines: usize,
    pub band: usize,
}

impl Window {
    pub fn new(sample: i64, line: i64, samples: usize, lines: usize, band: usize) -> Self {
        Self {
            sample,
            line,
            samples,
            lines,
            band,
        }
    }

    pub fn len(&self) -> usize {
        self.samples * self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end_sample(&self) -> i64 {
        self.sample + self.samples as i64 - 1
    }

    pub fn end_line(&self) -> i64 {
        self.line + self.lines as i64 - 1
    }

    fn bounds_error(&self) -> Error {
        Error::RasterBounds {
            sample: self.sample,
            line: self.line,
            samples: self.samples,
            lines: self.lines,
            band: self.band,
        }
    }
}

/// Read access to a band-sequential image.
///
/// Implementations must be shareable between threads; handles are handed
/// out as `Arc<dyn Raster>` by [`RasterCache`].
pub trait Raster: Send + Sync {
    fn samples(&self) -> usize;
    fn lines(&self) -> usize;
    fn bands(&self) -> usize;
    fn pixel_type(&self) -> PixelType;

    /// Fills `out` (row-major, `window.len()` values) from a window that
    /// lies entirely inside the raster.
    fn read(&self, window: &Window, out: &mut [f64]) -> Result<()>;

    /// Like [`Raster::read`] but pixels outside the raster come back NULL.
    fn read_clipped(&self, window: &Window, out: &mut [f64]) -> Result<()> {
        assert_eq!(out.len(), window.len(), "output buffer size mismatch");
        if self.contains_window(window) {
            return self.read(window, out);
        }
        out.fill(NULL);
        if window.band == 0 || window.band > self.bands() {
            return Err(window.bounds_error());
        }

        let s0 = window.sample.max(1);
        let s1 = window.end_sample().min(self.samples() as i64);
        let l0 = window.line.max(1);
        let l1 = window.end_line().min(self.lines() as i64);
        if s0 > s1 || l0 > l1 {
            return Ok(());
        }

        let inner = Window::new(
            s0,
            l0,
            (s1 - s0 + 1) as usize,
            (l1 - l0 + 1) as usize,
            window.band,
        );
        let mut tmp = vec![0.0; inner.len()];
        self.read(&inner, &mut tmp)?;

        let dx = (s0 - window.sample) as usize;
        let dy = (l0 - window.line) as usize;
        for row in 0..inner.lines {
            let dst = (row + dy) * window.samples + dx;
            out[dst..dst + inner.samples]
                .copy_from_slice(&tmp[row * inner.samples..(row + 1) * inner.samples]);
        }
        Ok(())
    }

    fn contains_window(&self, window: &Window) -> bool {
        window.band >= 1
            && window.band <= self.bands()
            && window.sample >= 1
            && window.line >= 1
            && window.end_sample() <= self.samples() as i64
            && window.end_line() <= self.lines() as i64
    }

    /// Reads one pixel; NULL outside the raster.
    fn pixel(&self, sample: i64, line: i64, band: usize) -> Result<f64> {
        let mut v = [NULL];
        self.read_clipped(&Window::new(sample, line, 1, 1, band), &mut v)?;
        Ok(v[0])
    }
}

/// Write access, used for warp output and chip dumps.
pub trait RasterWrite: Raster {
    /// Writes `data` (row-major, `window.len()` values) into a window that
    /// lies entirely inside the raster.
    fn write(&mut self, window: &Window, data: &[f64]) -> Result<()>;
}

pub(crate) fn check_window<R: Raster + ?Sized>(raster: &R, window: &Window) -> Result<()> {
    if raster.contains_window(window) {
        Ok(())
    } else {
        Err(window.bounds_error())
    }
}
