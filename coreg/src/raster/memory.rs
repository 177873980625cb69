use std::path::Path;

use super::{check_window, PixelType, Raster, RasterWrite, RawFileRaster, Window};
use crate::error::Result;
use crate::special::NULL;

/// Band-sequential raster held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRaster {
    samples: usize,
    lines: usize,
    bands: usize,
    data: Vec<f64>,
}

impl MemoryRaster {
    /// A raster filled with NULL.
    pub fn new(samples: usize, lines: usize, bands: usize) -> Self {
        Self::filled(samples, lines, bands, NULL)
    }

    pub fn filled(samples: usize, lines: usize, bands: usize, value: f64) -> Self {
        Self {
            samples,
            lines,
            bands,
            data: vec![value; samples * lines * bands],
        }
    }

    /// Single-band raster from a function of the 1-based `(sample, line)`.
    pub fn from_fn(samples: usize, lines: usize, f: impl Fn(f64, f64) -> f64) -> Self {
        let mut data = Vec::with_capacity(samples * lines);
        for l in 1..=lines {
            for s in 1..=samples {
                data.push(f(s as f64, l as f64));
            }
        }
        Self {
            samples,
            lines,
            bands: 1,
            data,
        }
    }

    pub fn from_data(samples: usize, lines: usize, bands: usize, data: Vec<f64>) -> Self {
        assert_eq!(
            data.len(),
            samples * lines * bands,
            "data length must equal samples * lines * bands"
        );
        Self {
            samples,
            lines,
            bands,
            data,
        }
    }

    #[inline]
    fn offset(&self, sample: usize, line: usize, band: usize) -> usize {
        ((band - 1) * self.lines + (line - 1)) * self.samples + (sample - 1)
    }

    /// 1-based pixel access. Panics outside the raster.
    pub fn get(&self, sample: usize, line: usize, band: usize) -> f64 {
        self.data[self.offset(sample, line, band)]
    }

    pub fn set(&mut self, sample: usize, line: usize, band: usize, value: f64) {
        let idx = self.offset(sample, line, band);
        self.data[idx] = value;
    }

    pub fn band_data(&self, band: usize) -> &[f64] {
        let n = self.samples * self.lines;
        &self.data[(band - 1) * n..band * n]
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Writes this raster to a raw file.
    pub fn save(&self, path: &Path, pixel_type: PixelType) -> Result<()> {
        let mut file = RawFileRaster::create(path, self.samples, self.lines, self.bands, pixel_type)?;
        for band in 1..=self.bands {
            let window = Window::new(1, 1, self.samples, self.lines, band);
            file.write(&window, self.band_data(band))?;
        }
        Ok(())
    }
}

impl Raster for MemoryRaster {
    fn samples(&self) -> usize {
        self.samples
    }

    fn lines(&self) -> usize {
        self.lines
    }

    fn bands(&self) -> usize {
        self.bands
    }

    fn pixel_type(&self) -> PixelType {
        PixelType::Real64
    }

    fn read(&self, window: &Window, out: &mut [f64]) -> Result<()> {
        check_window(self, window)?;
        for row in 0..window.lines {
            let start = self.offset(
                window.sample as usize,
                window.line as usize + row,
                window.band,
            );
            out[row * window.samples..(row + 1) * window.samples]
                .copy_from_slice(&self.data[start..start + window.samples]);
        }
        Ok(())
    }
}

impl RasterWrite for MemoryRaster {
    fn write(&mut self, window: &Window, data: &[f64]) -> Result<()> {
        check_window(self, window)?;
        for row in 0..window.lines {
            let start = self.offset(
                window.sample as usize,
                window.line as usize + row,
                window.band,
            );
            self.data[start..start + window.samples]
                .copy_from_slice(&data[row * window.samples..(row + 1) * window.samples]);
        }
        Ok(())
    }
}
