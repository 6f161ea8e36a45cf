use serde::{Deserialize, Serialize};

use crate::{Error, Point, Polygon};

/// Max edge-relaxation passes before we give up nudging.
const MAX_RELAX_PASSES: usize = 20;
/// Relaxed vertices are pushed just past the region boundary.
const RELAX_OVERSHOOT: f64 = 1.05;

/// One tessellation result: a facet polygon plus the linear extent (in
/// degrees) of the smallest square image, centered on the calibrator, that
/// fully covers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    pub polygon: Polygon,
    pub width_deg: f64,
}

/// A circular sky region that facet edges must not cross (a masked area, or
/// a target source that must not be split across facets).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AvoidRegion {
    pub center: Point,
    pub radius_deg: f64,
}

#[derive(Debug, Default, Clone)]
pub struct TessellateOpts {
    /// Fraction of the field extent added as padding around the bounding box.
    pub padding: f64,
    /// Nudge facet edges out of the avoid regions.
    pub check_edges: bool,
    /// Regions that no facet edge may cross (only used with `check_edges`).
    pub avoid: Vec<AvoidRegion>,
}

/// Partition the field into one facet per calibrator direction.
///
/// Classic Thiessen/Voronoi construction: each facet is the padded field
/// boundary clipped by the perpendicular bisector against every other
/// calibrator. A target direction that should own its own facet must be
/// appended to `centers` by the caller *before* this call; a target that
/// should merely not be split belongs in `opts.avoid`.
///
/// The result is a pure function of the inputs. Iteration follows input
/// order everywhere, so identical inputs give bit-identical polygons.
pub fn tessellate(centers: &[(String, Point)], opts: &TessellateOpts) -> Result<Vec<Facet>, Error> {
    if centers.len() < 2 {
        return Err(Error::TooFewDirections(centers.len()));
    }
    for (i, (name_i, p_i)) in centers.iter().enumerate() {
        for (name_j, p_j) in &centers[i + 1..] {
            if p_i == p_j {
                return Err(Error::DuplicateCenter(name_i.clone(), name_j.clone()));
            }
        }
    }

    let boundary = padded_boundary(centers, opts.padding);

    let mut facets = Vec::with_capacity(centers.len());
    for (name, center) in centers {
        let mut poly = boundary.clone();
        for (_, other) in centers {
            if other == center {
                continue;
            }
            poly = poly.clip_bisector(center, other);
            if poly.is_empty() {
                break;
            }
        }

        if opts.check_edges {
            relax_edges(&mut poly, &opts.avoid);
        }

        if poly.is_empty() || poly.area() < f64::EPSILON || !poly.contains(center) {
            return Err(Error::DegenerateFacet(name.clone()));
        }

        let width_deg = 2.0 * poly.half_extent(center);
        facets.push(Facet {
            polygon: poly,
            width_deg,
        });
    }

    log::debug!("tessellated {} directions", facets.len());
    Ok(facets)
}

/// Bounding box of all calibrator centers, padded on every side by
/// `padding` times the larger half-extent of the field.
fn padded_boundary(centers: &[(String, Point)], padding: f64) -> Polygon {
    let mut min = centers[0].1;
    let mut max = centers[0].1;
    for (_, p) in centers {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    let span = ((max.x - min.x) / 2.0).max((max.y - min.y) / 2.0).max(1e-6);
    let pad = padding.max(0.1) * span;
    Polygon::rect(
        Point::new(min.x - pad, min.y - pad),
        Point::new(max.x + pad, max.y + pad),
    )
}

/// Iteratively nudge polygon edges out of the avoid regions.
///
/// Edges whose midpoint falls inside a region are subdivided, and any vertex
/// inside a region is pushed radially outward just past its boundary. This is
/// a policy-level refinement of the raw Voronoi cut, not exact computational
/// geometry; downstream consumers only need the edges clear of the regions.
fn relax_edges(poly: &mut Polygon, avoid: &[AvoidRegion]) {
    if avoid.is_empty() {
        return;
    }
    for _ in 0..MAX_RELAX_PASSES {
        let mut changed = false;

        // subdivide edges that pass through a region:
        let n = poly.vertices.len();
        let mut subdivided = Vec::with_capacity(n * 2);
        for i in 0..n {
            let a = poly.vertices[i];
            let b = poly.vertices[(i + 1) % n];
            subdivided.push(a);
            let mid = a.midpoint(&b);
            if avoid.iter().any(|r| inside_region(&mid, r)) {
                subdivided.push(mid);
                changed = true;
            }
        }
        poly.vertices = subdivided;

        // push vertices out of the regions:
        for v in &mut poly.vertices {
            for r in avoid {
                if inside_region(v, r) {
                    push_out(v, r);
                    changed = true;
                }
            }
        }

        if !changed {
            break;
        }
    }
}

fn inside_region(p: &Point, r: &AvoidRegion) -> bool {
    p.dist(&r.center) < r.radius_deg
}

fn push_out(p: &mut Point, r: &AvoidRegion) {
    let d = p.dist(&r.center);
    let target = r.radius_deg * RELAX_OVERSHOOT;
    if d == 0.0 {
        // arbitrary but deterministic direction
        p.x = r.center.x + target;
        p.y = r.center.y;
    } else {
        p.x = r.center.x + (p.x - r.center.x) / d * target;
        p.y = r.center.y + (p.y - r.center.y) / d * target;
    }
}
