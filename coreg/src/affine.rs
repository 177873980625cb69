//! Two-dimensional affine transform with a maintained inverse.
//!
//! ```text
//! x' = a*x + b*y + c
//! y' = d*x + e*y + f
//! ```
//!
//! Every mutation recomputes the inverse from the forward matrix and fails
//! with [`Error::AffineNotInvertible`] rather than leaving a stale or
//! garbage inverse behind.

use glam::DVec2;

use crate::error::{Error, Result};
use crate::math::linalg::NormalEquations;
use crate::math::DMat3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    forward: DMat3,
    inverse: DMat3,
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    pub const fn identity() -> Self {
        Self {
            forward: DMat3::identity(),
            inverse: DMat3::identity(),
        }
    }

    /// Builds an affine from a forward matrix whose bottom row is `[0 0 1]`.
    pub fn from_forward(forward: DMat3) -> Result<Self> {
        let inverse = forward.inverse().ok_or(Error::AffineNotInvertible {
            determinant: forward.determinant(),
        })?;
        Ok(Self { forward, inverse })
    }

    /// Builds from the six coefficients `[a, b, c]` and `[d, e, f]`.
    pub fn from_coefficients(x: [f64; 3], y: [f64; 3]) -> Result<Self> {
        Self::from_forward(DMat3::from_rows(x, y, [0.0, 0.0, 1.0]))
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            forward: DMat3::translation(tx, ty),
            inverse: DMat3::translation(-tx, -ty),
        }
    }

    /// Resets to the identity.
    pub fn reset(&mut self) {
        *self = Self::identity();
    }

    fn post_compose(&mut self, m: DMat3) -> Result<()> {
        *self = Self::from_forward(m.mul_mat(&self.forward))?;
        Ok(())
    }

    /// Applies a translation after the current transform.
    pub fn translate(&mut self, tx: f64, ty: f64) -> Result<()> {
        self.post_compose(DMat3::translation(tx, ty))
    }

    /// Applies a counter-clockwise rotation of `angle` radians after the
    /// current transform.
    pub fn rotate(&mut self, angle: f64) -> Result<()> {
        self.post_compose(DMat3::rotation(angle))
    }

    /// Applies a uniform scale after the current transform.
    pub fn scale(&mut self, factor: f64) -> Result<()> {
        self.post_compose(DMat3::scaling(factor))
    }

    /// Returns `other ∘ self`: apply `self` first, then `other`.
    pub fn then(&self, other: &Affine) -> Result<Affine> {
        Self::from_forward(other.forward.mul_mat(&self.forward))
    }

    /// Returns `self ∘ other`: apply `other` first.
    pub fn compose(&self, other: &Affine) -> Result<Affine> {
        other.then(self)
    }

    /// Least-squares fit of the six parameters mapping `(x, y)` onto
    /// `(xp, yp)`. Needs at least three non-collinear correspondences.
    pub fn solve(x: &[f64], y: &[f64], xp: &[f64], yp: &[f64]) -> Result<Self> {
        let n = x.len();
        assert!(
            y.len() == n && xp.len() == n && yp.len() == n,
            "correspondence slices must have equal length"
        );
        if n < 3 {
            return Err(Error::InsufficientAffinePoints { found: n });
        }

        // Centre the inputs to keep the normal equations well conditioned.
        let mx = x.iter().sum::<f64>() / n as f64;
        let my = y.iter().sum::<f64>() / n as f64;

        let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
        for i in 0..n {
            let (dx, dy) = (x[i] - mx, y[i] - my);
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }
        if sxx * syy - sxy * sxy <= 1e-12 * (sxx * syy).max(f64::MIN_POSITIVE) {
            return Err(Error::InsufficientAffinePoints { found: n });
        }

        let mut ne_x = NormalEquations::<3>::default();
        let mut ne_y = NormalEquations::<3>::default();
        for i in 0..n {
            let row = [x[i] - mx, y[i] - my, 1.0];
            ne_x.add_row(&row, xp[i]);
            ne_y.add_row(&row, yp[i]);
        }
        let cx = ne_x.solve().ok_or(Error::InsufficientAffinePoints { found: n })?;
        let cy = ne_y.solve().ok_or(Error::InsufficientAffinePoints { found: n })?;

        Self::from_coefficients(
            [cx[0], cx[1], cx[2] - cx[0] * mx - cx[1] * my],
            [cy[0], cy[1], cy[2] - cy[0] * mx - cy[1] * my],
        )
    }

    #[inline]
    pub fn compute(&self, x: f64, y: f64) -> (f64, f64) {
        let p = self.forward.transform_point(DVec2::new(x, y));
        (p.x, p.y)
    }

    #[inline]
    pub fn compute_inverse(&self, xp: f64, yp: f64) -> (f64, f64) {
        let p = self.inverse.transform_point(DVec2::new(xp, yp));
        (p.x, p.y)
    }

    #[inline]
    pub fn apply(&self, p: DVec2) -> DVec2 {
        self.forward.transform_point(p)
    }

    #[inline]
    pub fn apply_inverse(&self, p: DVec2) -> DVec2 {
        self.inverse.transform_point(p)
    }

    pub fn forward(&self) -> &DMat3 {
        &self.forward
    }

    pub fn inverse(&self) -> &DMat3 {
        &self.inverse
    }

    /// `[a, b, c]` of `x' = a*x + b*y + c`.
    pub fn x_coefficients(&self) -> [f64; 3] {
        [self.forward[0], self.forward[1], self.forward[2]]
    }

    /// `[d, e, f]` of `y' = d*x + e*y + f`.
    pub fn y_coefficients(&self) -> [f64; 3] {
        [self.forward[3], self.forward[4], self.forward[5]]
    }

    pub fn translation_components(&self) -> DVec2 {
        DVec2::new(self.forward[2], self.forward[5])
    }
}

impl std::fmt::Display for Affine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c] = self.x_coefficients();
        let [d, e, g] = self.y_coefficients();
        write!(
            f,
            "Affine([{:.6}, {:.6}, {:.4}], [{:.6}, {:.6}, {:.4}])",
            a, b, c, d, e, g
        )
    }
}
