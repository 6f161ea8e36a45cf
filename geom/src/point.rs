use serde::{Deserialize, Serialize};

/// A point on the (flattened) sky plane, in degrees.
///
/// For tessellation purposes the field is treated as a plane; `x` is RA and
/// `y` is Dec. This is the same approximation the imaging backend makes when
/// sizing facet images, so the two stay consistent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`, in degrees on the plane.
    pub fn dist(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Midpoint between this point and `other`.
    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Angular separation in degrees between two sky positions given in degrees.
///
/// Uses the Vincenty formula, which is stable at all separations. Used for
/// nearest-neighbor searches when transferring calibration solutions, where
/// the flat-plane approximation is not good enough.
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (ra1, dec1) = (ra1.to_radians(), dec1.to_radians());
    let (ra2, dec2) = (ra2.to_radians(), dec2.to_radians());
    let dra = ra2 - ra1;

    let num = ((dec2.cos() * dra.sin()).powi(2)
        + (dec1.cos() * dec2.sin() - dec1.sin() * dec2.cos() * dra.cos()).powi(2))
    .sqrt();
    let den = dec1.sin() * dec2.sin() + dec1.cos() * dec2.cos() * dra.cos();

    num.atan2(den).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_dist() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_abs_diff_eq!(a.dist(&b), 5.0);
    }

    #[test]
    fn test_angular_separation_poles() {
        assert_abs_diff_eq!(
            angular_separation(0.0, 90.0, 0.0, -90.0),
            180.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_angular_separation_small() {
        // at dec = 0 the separation in RA is just the RA difference:
        assert_abs_diff_eq!(
            angular_separation(10.0, 0.0, 10.5, 0.0),
            0.5,
            epsilon = 1e-9
        );
    }
}
