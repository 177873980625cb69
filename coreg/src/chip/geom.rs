//! Loading a chip so its geometry matches a chip from another raster.

use super::Chip;
use crate::affine::Affine;
use crate::error::{Error, Result};
use crate::geometry::GroundMap;
use crate::raster::Raster;

/// Minimum triangle angle, in degrees, for three tie points to count as
/// non-collinear.
const COLLINEAR_TOLERANCE_DEG: f64 = 1.0;
/// Stricter tolerance once a corner had to be dropped.
const COLLINEAR_TOLERANCE_REDUCED_DEG: f64 = 2.0;

/// One corner search: `start` walks inward from the top/left, `end` from the
/// bottom/right, and they may cross.
#[derive(Debug, Clone, Copy)]
struct CornerWalk {
    start: (i64, i64),
    end: (i64, i64),
}

impl CornerWalk {
    fn advance(&mut self) {
        let sinc = ((self.end.0 - self.start.0) / 4).max(1);
        let linc = ((self.end.1 - self.start.1) / 3).max(1);
        self.start = (self.start.0 + sinc, self.start.1 + linc);
        self.end = (self.end.0 - sinc, self.end.1 - linc);
    }

    fn inside(&self, max_sample: i64, max_line: i64) -> bool {
        let in_s = |v: i64| (1..=max_sample).contains(&v);
        let in_l = |v: i64| (1..=max_line).contains(&v);
        in_s(self.start.0) && in_s(self.end.0) && in_l(self.start.1) && in_l(self.end.1)
    }
}

/// True when any angle of the triangle is within `tolerance_deg` of 0 or 180.
pub(super) fn points_collinear(p0: (f64, f64), p1: (f64, f64), p2: (f64, f64), tolerance_deg: f64) -> bool {
    let v01 = (p1.0 - p0.0, p1.1 - p0.1);
    let v12 = (p2.0 - p1.0, p2.1 - p1.1);
    let v20 = (p0.0 - p2.0, p0.1 - p2.1);
    let cross = |a: (f64, f64), b: (f64, f64)| (a.0 * b.1 - a.1 * b.0).abs();
    let norm = |a: (f64, f64)| (a.0 * a.0 + a.1 * a.1).sqrt();

    let sin0 = cross(v01, v20) / (norm(v01) * norm(v20));
    let sin1 = cross(v12, v01) / (norm(v12) * norm(v01));
    let sin2 = cross(v20, v12) / (norm(v20) * norm(v12));
    let min_sin = sin0.min(sin1).min(sin2);
    // Coincident points give NaN, which must count as collinear.
    !(min_sin >= tolerance_deg.to_radians().sin())
}

impl Chip {
    /// Loads from `raster` so that this chip shares the geometry of
    /// `match_chip`, whose pixels came from a raster described by
    /// `match_map`. Corner points of the match chip are carried through the
    /// ground frame into this raster (`this_map`) and an affine is fit to
    /// the correspondences; the result is scaled by `1 / scale` and pinned
    /// so the chip tack lands on the current cube tack.
    ///
    /// Fails with [`Error::InsufficientGeometryPoints`] when fewer than
    /// three usable, non-collinear points are found.
    pub fn load_matching(
        &mut self,
        raster: &dyn Raster,
        this_map: &dyn GroundMap,
        match_chip: &Chip,
        match_map: &dyn GroundMap,
        scale: f64,
        band: usize,
    ) -> Result<()> {
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(Error::config(format!("chip load scale must be positive, got {}", scale)));
        }
        let max_s = self.samples() as i64 - 1;
        let max_l = self.lines() as i64 - 1;
        let (ts, tl) = (self.tack_sample() as i64, self.tack_line() as i64);

        // chip-relative (x, y) -> this cube (xp, yp)
        let mut found: Vec<((f64, f64), (f64, f64))> = Vec::with_capacity(4);
        let mut dropped = false;

        for corner in 0..4 {
            let mut walk = CornerWalk {
                start: (1, 1),
                end: (max_s, max_l),
            };
            loop {
                if !walk.inside(max_s, max_l) {
                    dropped = true;
                    break;
                }
                let chip_s = if corner < 2 { walk.start.0 } else { walk.end.0 };
                let chip_l = if corner % 2 == 0 { walk.start.1 } else { walk.end.1 };
                let offset = ((chip_s - ts) as f64, (chip_l - tl) as f64);

                let (ms, ml) = match_chip.chip_to_cube(
                    match_chip.tack_sample() as f64 + offset.0,
                    match_chip.tack_line() as f64 + offset.1,
                );
                let Some((lat, lon)) = match_map.image_to_ground(ms, ml) else {
                    walk.advance();
                    continue;
                };
                let Some(image) = this_map.ground_to_image(lat, lon) else {
                    walk.advance();
                    continue;
                };

                if found.len() >= 2 {
                    let tolerance = if dropped {
                        COLLINEAR_TOLERANCE_REDUCED_DEG
                    } else {
                        COLLINEAR_TOLERANCE_DEG
                    };
                    if points_collinear(found[0].1, found[1].1, image, tolerance) {
                        walk.advance();
                        continue;
                    }
                }
                found.push((offset, image));
                break;
            }
        }

        if found.len() < 3 {
            return Err(Error::InsufficientGeometryPoints { found: found.len() });
        }

        let x: Vec<f64> = found.iter().map(|p| p.0 .0).collect();
        let y: Vec<f64> = found.iter().map(|p| p.0 .1).collect();
        let xp: Vec<f64> = found.iter().map(|p| p.1 .0).collect();
        let yp: Vec<f64> = found.iter().map(|p| p.1 .1).collect();
        let mut affine = Affine::solve(&x, &y, &xp, &yp).map_err(|e| match e {
            Error::InsufficientAffinePoints { found } => Error::InsufficientGeometryPoints { found },
            other => other,
        })?;

        affine.scale(1.0 / scale)?;
        let (s0, l0) = affine.compute(0.0, 0.0);
        affine.translate(self.cube_tack_sample - s0, self.cube_tack_line - l0)?;

        tracing::debug!(
            points = found.len(),
            "Matched chip geometry at ({:.2}, {:.2}): {}",
            self.cube_tack_sample,
            self.cube_tack_line,
            affine
        );

        self.affine = affine;
        self.read(raster, band)
    }
}

