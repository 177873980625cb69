//! Pixel interpolation kernels used by chip loads and the rubber-sheet warps.
//!
//! Cube coordinates are 1-based with pixel centres on integers, so pixel `n`
//! covers `[n - 0.5, n + 0.5)`. Each kernel reads a small window whose first
//! pixel is given by [`Interpolator::window_origin`].

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::special::{is_special, NULL};

/// Keys cubic convolution parameter.
const CUBIC_A: f64 = -0.5;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(try_from = "String", into = "String")]
pub enum Interpolator {
    #[strum(to_string = "Nearest", serialize = "NearestNeighbor", serialize = "NearestNeighborType")]
    Nearest,
    #[strum(to_string = "Bilinear", serialize = "BiLinear", serialize = "BiLinearType")]
    Bilinear,
    #[default]
    #[strum(
        to_string = "CubicConvolution",
        serialize = "Cubic",
        serialize = "CubicConvolutionType"
    )]
    CubicConvolution,
}

impl TryFrom<String> for Interpolator {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interpolator> for String {
    fn from(value: Interpolator) -> Self {
        value.to_string()
    }
}

impl Interpolator {
    /// Window width in pixels.
    pub fn samples(&self) -> usize {
        match self {
            Interpolator::Nearest => 1,
            Interpolator::Bilinear => 2,
            Interpolator::CubicConvolution => 4,
        }
    }

    /// Window height in pixels.
    pub fn lines(&self) -> usize {
        self.samples()
    }

    /// Offset of the kernel centre from the left edge of the window.
    pub fn hot_sample(&self) -> f64 {
        match self {
            Interpolator::Nearest => 0.5,
            Interpolator::Bilinear => 1.0,
            Interpolator::CubicConvolution => 2.0,
        }
    }

    pub fn hot_line(&self) -> f64 {
        self.hot_sample()
    }

    /// 1-based (sample, line) of the first window pixel for a continuous
    /// coordinate.
    #[inline]
    pub fn window_origin(&self, sample: f64, line: f64) -> (i64, i64) {
        (
            (sample + 1.0 - self.hot_sample()).floor() as i64,
            (line + 1.0 - self.hot_line()).floor() as i64,
        )
    }

    /// Interpolates at the continuous coordinate `(sample, line)` from a
    /// row-major `samples() x lines()` window read at [`Self::window_origin`].
    /// Returns NULL if any contributing pixel is special.
    pub fn interpolate(&self, sample: f64, line: f64, window: &[f64]) -> f64 {
        debug_assert_eq!(window.len(), self.samples() * self.lines());
        match self {
            Interpolator::Nearest => window[0],
            Interpolator::Bilinear => {
                if window.iter().any(|&v| is_special(v)) {
                    return NULL;
                }
                let a = sample - sample.floor();
                let b = line - line.floor();
                let top = (1.0 - a) * window[0] + a * window[1];
                let bottom = (1.0 - a) * window[2] + a * window[3];
                (1.0 - b) * top + b * bottom
            }
            Interpolator::CubicConvolution => {
                if window.iter().any(|&v| is_special(v)) {
                    return NULL;
                }
                let ws = cubic_weights(sample - sample.floor());
                let wl = cubic_weights(line - line.floor());
                let mut sum = 0.0;
                for (row, wy) in wl.iter().enumerate() {
                    let r = &window[row * 4..row * 4 + 4];
                    let h = r[0] * ws[0] + r[1] * ws[1] + r[2] * ws[2] + r[3] * ws[3];
                    sum += wy * h;
                }
                sum
            }
        }
    }
}

/// Keys kernel weights for the four taps at distances `1+t, t, 1-t, 2-t`.
#[inline]
fn cubic_weights(t: f64) -> [f64; 4] {
    [
        cubic_kernel(1.0 + t),
        cubic_kernel(t),
        cubic_kernel(1.0 - t),
        cubic_kernel(2.0 - t),
    ]
}

#[inline]
fn cubic_kernel(x: f64) -> f64 {
    let x = x.abs();
    if x <= 1.0 {
        ((CUBIC_A + 2.0) * x - (CUBIC_A + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        ((CUBIC_A * x - 5.0 * CUBIC_A) * x + 8.0 * CUBIC_A) * x - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_window_origin() {
        assert_eq!(Interpolator::Nearest.window_origin(3.4, 3.6), (3, 4));
        assert_eq!(Interpolator::Bilinear.window_origin(3.4, 3.0), (3, 3));
        assert_eq!(Interpolator::CubicConvolution.window_origin(3.4, 3.9), (2, 2));
    }

    #[test]
    fn test_bilinear_weights() {
        let w = [0.0, 10.0, 20.0, 30.0];
        let v = Interpolator::Bilinear.interpolate(5.25, 7.5, &w);
        // top = 2.5, bottom = 22.5
        assert!((v - 12.5).abs() < 1e-12);
    }

    #[test]
    fn test_cubic_reproduces_linear_ramp() {
        // v = 2*s + 3*l over the 4x4 window with origin (2, 5).
        let mut w = [0.0; 16];
        for l in 0..4 {
            for s in 0..4 {
                w[l * 4 + s] = 2.0 * (2 + s) as f64 + 3.0 * (5 + l) as f64;
            }
        }
        let (s, l) = (3.3, 6.8);
        assert_eq!(Interpolator::CubicConvolution.window_origin(s, l), (2, 5));
        let v = Interpolator::CubicConvolution.interpolate(s, l, &w);
        assert!((v - (2.0 * s + 3.0 * l)).abs() < 1e-10);
    }

    #[test]
    fn test_cubic_at_pixel_centre_is_exact() {
        let w: Vec<f64> = (0..16).map(|i| (i * i) as f64).collect();
        let v = Interpolator::CubicConvolution.interpolate(7.0, 9.0, &w);
        assert!((v - w[5]).abs() < 1e-12);
    }

    #[test]
    fn test_special_in_window_gives_null() {
        let mut w = [1.0; 16];
        w[15] = crate::special::HIGH_INSTR_SAT;
        let v = Interpolator::CubicConvolution.interpolate(3.5, 3.5, &w);
        assert!(crate::special::is_null(v));
        let v = Interpolator::Bilinear.interpolate(3.5, 3.5, &[1.0, NULL, 1.0, 1.0]);
        assert!(crate::special::is_null(v));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Cubic".parse::<Interpolator>().unwrap(), Interpolator::CubicConvolution);
        assert_eq!("bilinear".parse::<Interpolator>().unwrap(), Interpolator::Bilinear);
        assert_eq!(
            "NearestNeighborType".parse::<Interpolator>().unwrap(),
            Interpolator::Nearest
        );
        assert!("Lanczos".parse::<Interpolator>().is_err());
        for i in Interpolator::iter() {
            assert_eq!(i.to_string().parse::<Interpolator>().unwrap(), i);
        }
    }
}
