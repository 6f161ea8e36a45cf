use std::fmt::Write;

use crate::Polygon;

const HEADER: &str = "# Region file format: DS9 version 4.0\nglobal color=green \
    font=\"helvetica 10 normal\" select=1 highlite=1 edit=1 move=1 delete=1 \
    include=1 fixed=0 source=1\nfk5\n";

/// DS9 region text showing every facet polygon, labeled by direction name.
/// Write-only output for external visualization; nothing reads it back.
pub fn facet_region_text(facets: &[(&str, &Polygon)]) -> String {
    let mut out = String::with_capacity(HEADER.len() + facets.len() * 128);
    out.push_str(HEADER);
    for (name, poly) in facets {
        out.push_str("polygon(");
        for (i, v) in poly.vertices.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{:.6},{:.6}", v.x, v.y);
        }
        let _ = writeln!(out, ") # text={{{name}}}");
    }
    out
}

/// DS9 region text with one circle per calibrator, sized by its image radius.
pub fn calimage_region_text(cals: &[(&str, f64, f64, f64)]) -> String {
    let mut out = String::with_capacity(HEADER.len() + cals.len() * 64);
    out.push_str(HEADER);
    for (name, ra, dec, radius_deg) in cals {
        let _ = writeln!(
            out,
            "circle({ra:.6},{dec:.6},{radius_deg:.6}d) # text={{{name}}}"
        );
    }
    out
}
