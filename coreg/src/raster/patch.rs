use super::{Raster, Window};
use crate::error::Result;
use crate::interpolator::Interpolator;
use crate::special::NULL;

/// Patches larger than this are not buffered; callers fall back to reading
/// one interpolation window at a time.
pub const MAX_PATCH_PIXELS: usize = 16 * 1024 * 1024;

/// In-memory copy of a rectangular raster region. Pixels outside the raster
/// (or outside the patch) read as NULL.
#[derive(Debug, Clone)]
pub struct RasterPatch {
    sample: i64,
    line: i64,
    samples: usize,
    lines: usize,
    data: Vec<f64>,
}

impl RasterPatch {
    /// Reads the inclusive region `[s0, s1] x [l0, l1]` of `band`.
    pub fn read(
        raster: &dyn Raster,
        band: usize,
        (s0, l0): (i64, i64),
        (s1, l1): (i64, i64),
    ) -> Result<Self> {
        let samples = (s1 - s0 + 1).max(0) as usize;
        let lines = (l1 - l0 + 1).max(0) as usize;
        let window = Window::new(s0, l0, samples, lines, band);
        let mut data = vec![NULL; window.len()];
        if !window.is_empty() {
            raster.read_clipped(&window, &mut data)?;
        }
        Ok(Self {
            sample: s0,
            line: l0,
            samples,
            lines,
            data,
        })
    }

    /// Patch covering every interpolation window needed for cube coordinates
    /// in `[min, max]`, clamped to a margin around the raster. `None` if the
    /// region is empty or too large to buffer.
    pub fn for_region(
        raster: &dyn Raster,
        band: usize,
        interpolator: Interpolator,
        min: (f64, f64),
        max: (f64, f64),
    ) -> Result<Option<Self>> {
        let margin = interpolator.samples() as i64;
        let (mut s0, mut l0) = interpolator.window_origin(min.0, min.1);
        let (mut s1, mut l1) = interpolator.window_origin(max.0, max.1);
        s1 += interpolator.samples() as i64 - 1;
        l1 += interpolator.lines() as i64 - 1;

        s0 = s0.max(1 - margin);
        l0 = l0.max(1 - margin);
        s1 = s1.min(raster.samples() as i64 + margin);
        l1 = l1.min(raster.lines() as i64 + margin);
        if s0 > s1 || l0 > l1 {
            return Ok(None);
        }
        let pixels = (s1 - s0 + 1) as usize * (l1 - l0 + 1) as usize;
        if pixels > MAX_PATCH_PIXELS {
            return Ok(None);
        }
        Self::read(raster, band, (s0, l0), (s1, l1)).map(Some)
    }

    #[inline]
    pub fn get(&self, sample: i64, line: i64) -> f64 {
        let x = sample - self.sample;
        let y = line - self.line;
        if x < 0 || y < 0 || x >= self.samples as i64 || y >= self.lines as i64 {
            return NULL;
        }
        self.data[y as usize * self.samples + x as usize]
    }

    /// Copies the `width x height` window starting at `(sample, line)`.
    #[inline]
    pub fn window(&self, (sample, line): (i64, i64), width: usize, height: usize, out: &mut [f64]) {
        for dy in 0..height {
            for dx in 0..width {
                out[dy * width + dx] = self.get(sample + dx as i64, line + dy as i64);
            }
        }
    }

    /// Interpolates at a cube coordinate from the buffered pixels.
    #[inline]
    pub fn interpolate(&self, interpolator: Interpolator, sample: f64, line: f64) -> f64 {
        let mut buf = [0.0; 16];
        let n = interpolator.samples() * interpolator.lines();
        self.window(
            interpolator.window_origin(sample, line),
            interpolator.samples(),
            interpolator.lines(),
            &mut buf[..n],
        );
        interpolator.interpolate(sample, line, &buf[..n])
    }
}

/// Interpolates one coordinate with a direct window read.
pub fn interpolate_direct(
    raster: &dyn Raster,
    band: usize,
    interpolator: Interpolator,
    sample: f64,
    line: f64,
) -> Result<f64> {
    let (s, l) = interpolator.window_origin(sample, line);
    let window = Window::new(s, l, interpolator.samples(), interpolator.lines(), band);
    let mut buf = [0.0; 16];
    let n = window.len();
    raster.read_clipped(&window, &mut buf[..n])?;
    Ok(interpolator.interpolate(sample, line, &buf[..n]))
}
