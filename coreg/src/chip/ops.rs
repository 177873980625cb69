//! Derived chips: sub-chip extraction, affine resampling, block reduction
//! and gradient filtering. None of these touch a raster.

use super::Chip;
use crate::affine::Affine;
use crate::error::{Error, Result};
use crate::interpolator::Interpolator;
use crate::math::Statistics;
use crate::special::{NULL, VALID_MAXIMUM, VALID_MINIMUM};

impl Chip {
    /// Pixel value with NULL outside the chip, for signed 1-based coordinates.
    #[inline]
    fn value_or_null(&self, sample: i64, line: i64) -> f64 {
        if sample < 1 || line < 1 || sample > self.samples() as i64 || line > self.lines() as i64 {
            NULL
        } else {
            self.get_value(sample as usize, line as usize)
        }
    }

    /// New `samples x lines` chip whose tack sits on chip pixel
    /// `(sample, line)` of this chip.
    pub fn extract(&self, samples: usize, lines: usize, sample: i64, line: i64) -> Result<Chip> {
        if samples > self.samples() || lines > self.lines() {
            return Err(Error::InvalidChipSize { samples, lines });
        }
        let mut chipped = Chip::new(samples, lines)?;
        self.extract_into(sample, line, &mut chipped)?;
        Ok(chipped)
    }

    /// Fills `chipped` (whose size is kept) centred on chip pixel
    /// `(sample, line)`. Pixels beyond this chip's edge become NULL. The
    /// child inherits geometry so its chip coordinates still map to the
    /// right cube coordinates.
    pub fn extract_into(&self, sample: i64, line: i64, chipped: &mut Chip) -> Result<()> {
        let ts = chipped.tack_sample() as i64;
        let tl = chipped.tack_line() as i64;
        for oline in 1..=chipped.lines() {
            let this_line = line + oline as i64 - tl;
            for osamp in 1..=chipped.samples() {
                let this_samp = sample + osamp as i64 - ts;
                chipped.buf[(osamp - 1, oline - 1)] = self.value_or_null(this_samp, this_line);
            }
        }

        let offset = Affine::translation(
            (sample - self.tack_sample() as i64) as f64,
            (line - self.tack_line() as i64) as f64,
        );
        chipped.set_affine(offset.then(&self.affine)?);
        chipped.valid_minimum = self.valid_minimum;
        chipped.valid_maximum = self.valid_maximum;
        chipped.read_interpolator = self.read_interpolator;
        Ok(())
    }

    /// Resamples this chip into `chipped` through `affine`, which maps
    /// tack-relative coordinates of `chipped` onto tack-relative coordinates
    /// of this chip. Bilinear; no raster I/O. The child's chip-to-cube
    /// affine is the composition, so reading it straight from the raster
    /// would give (nearly) the same pixels.
    pub fn extract_affine(&self, chipped: &mut Chip, affine: &Affine) -> Result<()> {
        let interp = Interpolator::Bilinear;
        let ts = self.tack_sample() as f64;
        let tl = self.tack_line() as f64;
        let cts = chipped.tack_sample() as i64;
        let ctl = chipped.tack_line() as i64;
        let mut window = [0.0; 4];

        for oline in 1..=chipped.lines() {
            let rel_line = (oline as i64 - ctl) as f64;
            for osamp in 1..=chipped.samples() {
                let rel_samp = (osamp as i64 - cts) as f64;
                let (x, y) = affine.compute(rel_samp, rel_line);
                let (xp, yp) = (x + ts, y + tl);
                let (ws, wl) = interp.window_origin(xp, yp);
                window[0] = self.value_or_null(ws, wl);
                window[1] = self.value_or_null(ws + 1, wl);
                window[2] = self.value_or_null(ws, wl + 1);
                window[3] = self.value_or_null(ws + 1, wl + 1);
                chipped.buf[(osamp - 1, oline - 1)] = interp.interpolate(xp, yp, &window);
            }
        }

        chipped.set_affine(self.affine.compose(&affine)?);
        chipped.valid_minimum = self.valid_minimum;
        chipped.valid_maximum = self.valid_maximum;
        chipped.read_interpolator = self.read_interpolator;
        Ok(())
    }

    /// Block-averages valid pixels over `factor x factor` blocks. A block
    /// with no valid pixel becomes NULL. The reduced size is rounded down to
    /// odd so the tack stays on a pixel centre.
    pub fn reduce(&self, factor: usize) -> Result<Chip> {
        let odd = |n: usize| if n % 2 == 0 { n.saturating_sub(1) } else { n };
        let samples = odd(self.samples() / factor.max(1));
        let lines = odd(self.lines() / factor.max(1));
        if factor == 0 || samples == 0 || lines == 0 {
            return Err(Error::config(format!(
                "ReductionFactor {} cannot reduce a {}x{} chip",
                factor,
                self.samples(),
                self.lines()
            )));
        }
        let mut reduced = Chip::new(samples, lines)?;

        for rl in 0..lines {
            for rs in 0..samples {
                let mut stats = Statistics::with_valid_range(self.valid_minimum, self.valid_maximum);
                for l in rl * factor..(rl + 1) * factor {
                    for s in rs * factor..(rs + 1) * factor {
                        stats.add(self.buf[(s, l)]);
                    }
                }
                reduced.buf[(rs, rl)] = stats.average().unwrap_or(NULL);
            }
        }

        // Reduced pixel rs covers parent pixels (rs-1)*f+1 ..= rs*f, centred
        // on (rs-1)*f + (f+1)/2.
        let f = factor as f64;
        let offset = |reduced_tack: usize, parent_tack: usize| {
            (reduced_tack as f64 - 1.0) * f + (f + 1.0) / 2.0 - parent_tack as f64
        };
        let to_parent = Affine::from_coefficients(
            [f, 0.0, offset(reduced.tack_sample(), self.tack_sample())],
            [0.0, f, offset(reduced.tack_line(), self.tack_line())],
        )?;
        reduced.set_affine(to_parent.then(&self.affine)?);
        reduced.valid_minimum = self.valid_minimum;
        reduced.valid_maximum = self.valid_maximum;
        reduced.read_interpolator = self.read_interpolator;
        Ok(reduced)
    }

    /// Sobel gradient magnitude `|gx| + |gy|`. Edge pixels and pixels with a
    /// special neighbour become NULL.
    pub fn sobel(&self) -> Chip {
        let mut out = self.clone();
        out.set_all_values(NULL);
        out.valid_minimum = VALID_MINIMUM;
        out.valid_maximum = VALID_MAXIMUM;
        let (ns, nl) = (self.samples(), self.lines());
        if ns < 3 || nl < 3 {
            return out;
        }
        for l in 1..nl - 1 {
            for s in 1..ns - 1 {
                let mut n = [0.0; 9];
                let mut valid = true;
                for (k, v) in n.iter_mut().enumerate() {
                    *v = self.buf[(s + k % 3 - 1, l + k / 3 - 1)];
                    valid &= self.is_valid_value(*v);
                }
                if !valid {
                    continue;
                }
                let gx = (n[2] + 2.0 * n[5] + n[8]) - (n[0] + 2.0 * n[3] + n[6]);
                let gy = (n[6] + 2.0 * n[7] + n[8]) - (n[0] + 2.0 * n[1] + n[2]);
                out.buf[(s, l)] = gx.abs() + gy.abs();
            }
        }
        out
    }
}
