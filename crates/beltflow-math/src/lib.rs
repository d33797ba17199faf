#![warn(missing_docs)]

//! Math types for beltflow.
//!
//! Thin wrappers around nalgebra providing the planar and spatial types the
//! toolpath code needs: points, an axis-aligned bounding box and polar
//! placement on a circle.

use serde::{Deserialize, Serialize};

/// A point in 3D machine space (mm).
pub type Point3 = nalgebra::Point3<f64>;

/// A point in the XY plane (mm).
pub type Point2 = nalgebra::Point2<f64>;

/// Point on the circle of `radius` around `center` at `angle` radians,
/// measured counter-clockwise from +X.
pub fn point_on_circle(center: &Point2, radius: f64, angle: f64) -> Point2 {
    let (s, c) = angle.sin_cos();
    Point2::new(center.x + radius * c, center.y + radius * s)
}

/// Axis-aligned bounding box in the XY plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds2 {
    /// Minimum corner.
    pub min: Point2,
    /// Maximum corner.
    pub max: Point2,
}

impl Bounds2 {
    /// Degenerate box containing a single point.
    pub fn from_point(p: Point2) -> Self {
        Self { min: p, max: p }
    }

    /// Grow the box to contain `p`.
    pub fn include(&mut self, p: Point2) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    /// Midpoint of the box (not the centroid of whatever produced it).
    pub fn center(&self) -> Point2 {
        nalgebra::center(&self.min, &self.max)
    }

    /// Extent along X.
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// Extent along Y.
    pub fn depth(&self) -> f64 {
        self.max.y - self.min.y
    }
}
