use serde::{Deserialize, Serialize};

use crate::Point;

/// A convex polygon on the sky plane, stored as an ordered vertex list.
///
/// Facet polygons are always convex because they are built by intersecting
/// half-planes, so all the operations here assume convexity.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Self {
        Self { vertices }
    }

    /// Axis-aligned rectangle from two opposite corners.
    pub fn rect(min: Point, max: Point) -> Self {
        Self::new(vec![
            Point::new(min.x, min.y),
            Point::new(max.x, min.y),
            Point::new(max.x, max.y),
            Point::new(min.x, max.y),
        ])
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.len() < 3
    }

    /// Unsigned area in square degrees.
    pub fn area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        // shoelace formula
        let mut sum = 0.0;
        let n = self.vertices.len();
        for i in 0..n {
            let a = &self.vertices[i];
            let b = &self.vertices[(i + 1) % n];
            sum += a.x * b.y - b.x * a.y;
        }
        sum.abs() / 2.0
    }

    /// True if `p` is strictly inside the polygon (boundary points are out).
    pub fn contains(&self, p: &Point) -> bool {
        if self.is_empty() {
            return false;
        }
        let n = self.vertices.len();
        let orient = |a: &Point, b: &Point| (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);

        // p is strictly inside a convex polygon iff it lies strictly on the
        // same side of every edge. Vertex order may be cw or ccw.
        let mut sign = 0.0f64;
        for i in 0..n {
            let cross = orient(&self.vertices[i], &self.vertices[(i + 1) % n]);
            if cross == 0.0 {
                return false;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Clip this polygon to the half-plane of points at least as close to
    /// `keep` as to `other` (the perpendicular-bisector cut used by the
    /// Voronoi construction).
    pub fn clip_bisector(&self, keep: &Point, other: &Point) -> Polygon {
        // inside(p) >= 0 iff p is on keep's side of the bisector:
        let inside = |p: &Point| {
            let mid = keep.midpoint(other);
            let nx = other.x - keep.x;
            let ny = other.y - keep.y;
            -(nx * (p.x - mid.x) + ny * (p.y - mid.y))
        };
        self.clip(inside)
    }

    /// Intersection with another convex polygon (Sutherland-Hodgman against
    /// each of `other`'s edges).
    pub fn intersect_convex(&self, other: &Polygon) -> Polygon {
        if other.is_empty() {
            return Polygon::default();
        }
        // orient edges so that "inside" is towards other's interior:
        let ccw = other.signed_area() > 0.0;
        let mut out = self.clone();
        let n = other.vertices.len();
        for i in 0..n {
            let a = other.vertices[i];
            let b = other.vertices[(i + 1) % n];
            let inside = move |p: &Point| {
                let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
                if ccw {
                    cross
                } else {
                    -cross
                }
            };
            out = out.clip(inside);
            if out.is_empty() {
                break;
            }
        }
        out
    }

    fn signed_area(&self) -> f64 {
        let mut sum = 0.0;
        let n = self.vertices.len();
        for i in 0..n {
            let a = &self.vertices[i];
            let b = &self.vertices[(i + 1) % n];
            sum += a.x * b.y - b.x * a.y;
        }
        sum / 2.0
    }

    /// Generic half-plane clip: keeps points where `inside(p) >= 0`.
    fn clip<F: Fn(&Point) -> f64>(&self, inside: F) -> Polygon {
        let n = self.vertices.len();
        if n == 0 {
            return Polygon::default();
        }
        let mut out = Vec::with_capacity(n + 1);
        for i in 0..n {
            let cur = self.vertices[i];
            let next = self.vertices[(i + 1) % n];
            let d_cur = inside(&cur);
            let d_next = inside(&next);

            if d_cur >= 0.0 {
                out.push(cur);
            }
            // edge crosses the boundary; add the intersection point:
            if (d_cur > 0.0 && d_next < 0.0) || (d_cur < 0.0 && d_next > 0.0) {
                let t = d_cur / (d_cur - d_next);
                out.push(Point::new(
                    cur.x + t * (next.x - cur.x),
                    cur.y + t * (next.y - cur.y),
                ));
            }
        }
        if out.len() < 3 {
            return Polygon::default();
        }
        Polygon::new(out)
    }

    /// Half-width (in degrees) of the smallest axis-aligned square centered
    /// on `center` that fully covers the polygon.
    pub fn half_extent(&self, center: &Point) -> f64 {
        self.vertices
            .iter()
            .map(|v| (v.x - center.x).abs().max((v.y - center.y).abs()))
            .fold(0.0, f64::max)
    }
}
