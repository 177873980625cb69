//! Ground geometry seams: clip polygons and image/ground mappings.

use glam::DVec2;

use crate::affine::Affine;

/// Maps between raster coordinates and a shared ground frame.
///
/// Camera models and map projections live outside this crate; anything that
/// can convert both ways implements this. `None` means the point does not
/// intersect the ground (off-body, outside the projection).
pub trait GroundMap: Send + Sync {
    /// `(sample, line)` to `(latitude, longitude)`.
    fn image_to_ground(&self, sample: f64, line: f64) -> Option<(f64, f64)>;
    /// `(latitude, longitude)` to `(sample, line)`.
    fn ground_to_image(&self, latitude: f64, longitude: f64) -> Option<(f64, f64)>;
}

/// Ground map that is an affine of raster coordinates: `(sample, line)` maps
/// to `(longitude, latitude)`. Fits simple-cylindrical products and tests.
#[derive(Debug, Clone, Copy)]
pub struct AffineGroundMap {
    to_ground: Affine,
}

impl AffineGroundMap {
    pub fn new(to_ground: Affine) -> Self {
        Self { to_ground }
    }
}

impl GroundMap for AffineGroundMap {
    fn image_to_ground(&self, sample: f64, line: f64) -> Option<(f64, f64)> {
        let (lon, lat) = self.to_ground.compute(sample, line);
        Some((lat, lon))
    }

    fn ground_to_image(&self, latitude: f64, longitude: f64) -> Option<(f64, f64)> {
        Some(self.to_ground.compute_inverse(longitude, latitude))
    }
}

/// Closed ring of `(sample, line)` vertices; the closing edge is implicit.
#[derive(Debug, Clone, PartialEq)]
pub struct Ring {
    vertices: Vec<DVec2>,
}

impl Ring {
    pub fn new(vertices: Vec<DVec2>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[DVec2] {
        &self.vertices
    }

    /// Even-odd crossing test.
    fn crosses(&self, p: DVec2) -> bool {
        let v = &self.vertices;
        if v.len() < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = v.len() - 1;
        for i in 0..v.len() {
            let (a, b) = (v[i], v[j]);
            if (a.y > p.y) != (b.y > p.y) {
                let x = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// Polygon with optional holes.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Ring,
    pub holes: Vec<Ring>,
}

/// Region in cube coordinates that masks chip loads; pixels whose cube
/// coordinate falls outside every polygon are loaded as NULL.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClipPolygon {
    polygons: Vec<Polygon>,
}

impl ClipPolygon {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    /// Single polygon without holes.
    pub fn from_vertices(vertices: Vec<DVec2>) -> Self {
        Self::new(vec![Polygon {
            exterior: Ring::new(vertices),
            holes: Vec::new(),
        }])
    }

    /// Axis-aligned rectangle, inclusive corners.
    pub fn rectangle(min: DVec2, max: DVec2) -> Self {
        Self::from_vertices(vec![
            min,
            DVec2::new(max.x, min.y),
            max,
            DVec2::new(min.x, max.y),
        ])
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn contains(&self, sample: f64, line: f64) -> bool {
        let p = DVec2::new(sample, line);
        self.polygons
            .iter()
            .any(|poly| poly.exterior.crosses(p) && !poly.holes.iter().any(|h| h.crosses(p)))
    }
}
