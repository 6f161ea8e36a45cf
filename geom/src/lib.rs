/// Points on the sky plane
mod point;
pub use point::{angular_separation, Point};

/// Convex polygons and half-plane clipping
mod polygon;
pub use polygon::Polygon;

/// Voronoi tessellation of calibrator directions
mod tessellate;
pub use tessellate::{tessellate, AvoidRegion, Facet, TessellateOpts};

/// Optimum image sizes for the imaging backend
mod imsize;
pub use imsize::{max_prime_factor, optimum_size};

/// DS9 region file rendering
mod region;
pub use region::{calimage_region_text, facet_region_text};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Tessellation needs at least 2 directions, got {0}")]
    TooFewDirections(usize),
    #[error("Directions \"{0}\" and \"{1}\" have identical centers")]
    DuplicateCenter(String, String),
    #[error("Facet for direction \"{0}\" is degenerate (calibrator center not strictly inside)")]
    DegenerateFacet(String),
}
