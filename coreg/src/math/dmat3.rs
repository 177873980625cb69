//! Row-major 3x3 matrix of f64 values.

use glam::DVec2;
use std::ops::{Index, IndexMut, Mul};

/// Determinants below this magnitude are treated as singular.
pub const SINGULAR_THRESHOLD: f64 = 1e-12;

/// Row-major 3x3 matrix of f64 values.
///
/// For 2D homogeneous affines this maps to:
/// ```text
/// | a  b  c |   x' = a*x + b*y + c
/// | d  e  f |   y' = d*x + e*y + f
/// | 0  0  1 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DMat3 {
    data: [f64; 9],
}

impl DMat3 {
    #[inline]
    pub const fn from_array(data: [f64; 9]) -> Self {
        Self { data }
    }

    #[inline]
    pub const fn identity() -> Self {
        Self {
            data: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    #[inline]
    pub const fn from_rows(row0: [f64; 3], row1: [f64; 3], row2: [f64; 3]) -> Self {
        Self {
            data: [
                row0[0], row0[1], row0[2], row1[0], row1[1], row1[2], row2[0], row2[1], row2[2],
            ],
        }
    }

    #[inline]
    pub const fn translation(tx: f64, ty: f64) -> Self {
        Self::from_rows([1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0])
    }

    /// Counter-clockwise rotation by `angle` radians.
    #[inline]
    pub fn rotation(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::from_rows([cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0])
    }

    #[inline]
    pub const fn scaling(factor: f64) -> Self {
        Self::from_rows([factor, 0.0, 0.0], [0.0, factor, 0.0], [0.0, 0.0, 1.0])
    }

    #[inline]
    pub const fn as_array(&self) -> &[f64; 9] {
        &self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * 3 + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * 3 + col] = value;
    }

    /// Matrix multiplication: `self * rhs`.
    #[inline]
    pub fn mul_mat(&self, rhs: &DMat3) -> DMat3 {
        let a = &self.data;
        let b = &rhs.data;
        DMat3 {
            data: [
                a[0] * b[0] + a[1] * b[3] + a[2] * b[6],
                a[0] * b[1] + a[1] * b[4] + a[2] * b[7],
                a[0] * b[2] + a[1] * b[5] + a[2] * b[8],
                a[3] * b[0] + a[4] * b[3] + a[5] * b[6],
                a[3] * b[1] + a[4] * b[4] + a[5] * b[7],
                a[3] * b[2] + a[4] * b[5] + a[5] * b[8],
                a[6] * b[0] + a[7] * b[3] + a[8] * b[6],
                a[6] * b[1] + a[7] * b[4] + a[8] * b[7],
                a[6] * b[2] + a[7] * b[5] + a[8] * b[8],
            ],
        }
    }

    #[inline]
    pub fn determinant(&self) -> f64 {
        let d = &self.data;
        d[0] * (d[4] * d[8] - d[5] * d[7]) - d[1] * (d[3] * d[8] - d[5] * d[6])
            + d[2] * (d[3] * d[7] - d[4] * d[6])
    }

    /// Closed-form inverse, or `None` when `|det| < SINGULAR_THRESHOLD`.
    pub fn inverse(&self) -> Option<DMat3> {
        let det = self.determinant();
        if det.abs() < SINGULAR_THRESHOLD || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        let d = &self.data;
        Some(DMat3 {
            data: [
                (d[4] * d[8] - d[5] * d[7]) * inv_det,
                (d[2] * d[7] - d[1] * d[8]) * inv_det,
                (d[1] * d[5] - d[2] * d[4]) * inv_det,
                (d[5] * d[6] - d[3] * d[8]) * inv_det,
                (d[0] * d[8] - d[2] * d[6]) * inv_det,
                (d[2] * d[3] - d[0] * d[5]) * inv_det,
                (d[3] * d[7] - d[4] * d[6]) * inv_det,
                (d[1] * d[6] - d[0] * d[7]) * inv_det,
                (d[0] * d[4] - d[1] * d[3]) * inv_det,
            ],
        })
    }

    /// Apply as an affine to a point; the bottom row is assumed `[0 0 1]`.
    #[inline]
    pub fn transform_point(&self, p: DVec2) -> DVec2 {
        let d = &self.data;
        DVec2::new(
            d[0] * p.x + d[1] * p.y + d[2],
            d[3] * p.x + d[4] * p.y + d[5],
        )
    }

    /// Largest absolute element-wise difference from the identity.
    pub fn max_deviation_from_identity(&self) -> f64 {
        let id = Self::identity();
        self.data
            .iter()
            .zip(id.data.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl Default for DMat3 {
    #[inline]
    fn default() -> Self {
        Self::identity()
    }
}

impl Index<usize> for DMat3 {
    type Output = f64;
    #[inline]
    fn index(&self, idx: usize) -> &f64 {
        &self.data[idx]
    }
}

impl IndexMut<usize> for DMat3 {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut f64 {
        &mut self.data[idx]
    }
}

impl Mul for DMat3 {
    type Output = DMat3;
    #[inline]
    fn mul(self, rhs: DMat3) -> DMat3 {
        self.mul_mat(&rhs)
    }
}

impl Mul<DVec2> for DMat3 {
    type Output = DVec2;
    #[inline]
    fn mul(self, rhs: DVec2) -> DVec2 {
        self.transform_point(rhs)
    }
}
