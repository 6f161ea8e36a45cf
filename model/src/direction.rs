use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use geom::{optimum_size, Facet, Polygon};

use crate::{Error, Stage};

/// Reference flux for solution-interval scaling: a 250 mJy calibrator gets a
/// fast interval of 4 time slots and a slow interval of 240.
const REF_FLUX_MJY: f64 = 250.0;

/// Opaque cluster allocation descriptor, attached by the resource allocator
/// and consumed by the external job launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hosts {
    pub nodes: Vec<String>,
    pub cores_per_node: usize,
}

impl Hosts {
    /// Minimal fallback allocation when no node inventory is available.
    pub fn local() -> Self {
        Self {
            nodes: vec!["localhost".to_owned()],
            cores_per_node: 1,
        }
    }
}

/// Configuration applied to every direction that the directions file does not
/// itself specify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionDefaults {
    /// Selfcal image cell size in degrees.
    pub cellsize_selfcal_deg: f64,
    /// Subtraction-verification image cell size in degrees.
    pub cellsize_verify_deg: f64,
    /// Calibrator size when the directions file leaves it out.
    pub cal_size_deg: f64,
    /// Maximum residual (Jy) accepted by the subtraction quality check.
    pub max_residual_jy: f64,
    /// Make a final facet image for every direction.
    pub make_final_image: bool,
}

impl Default for DirectionDefaults {
    fn default() -> Self {
        Self {
            cellsize_selfcal_deg: 0.000417,
            cellsize_verify_deg: 0.00833,
            cal_size_deg: 0.2,
            max_residual_jy: 0.5,
            make_final_image: false,
        }
    }
}

/// One row of the directions file.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionDef {
    pub name: String,
    pub ra: f64,
    pub dec: f64,
    pub cal_flux_jy: Option<f64>,
    pub cal_size_deg: Option<f64>,
}

/// A named facet of the observed field.
///
/// Holds everything a processing stage needs for this direction, and is the
/// unit of durable state: saved after every stage transition, reloaded (minus
/// geometry) on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Direction {
    pub name: String,
    /// Facet center in degrees.
    pub ra: f64,
    pub dec: f64,

    // geometry, always taken from the current tessellation:
    pub polygon: Option<Polygon>,
    pub width_deg: Option<f64>,

    // calibrator parameters:
    pub cal_size_deg: f64,
    pub cal_radius_deg: f64,
    pub apparent_flux_mjy: Option<f64>,

    // image sizing (even, >= 512, 7-smooth):
    pub cal_imsize: u32,
    pub facet_imsize: u32,
    pub cal_wplanes: u32,
    pub facet_wplanes: u32,
    pub cellsize_selfcal_deg: f64,
    pub cellsize_verify_deg: f64,

    // calibration parameters:
    pub solint_p: u32,
    pub solint_a: u32,
    pub max_residual_jy: f64,

    // run progress:
    pub selfcal_ok: bool,
    /// Once set, permanent: this direction consumes the improved subtracted
    /// data from earlier successful directions.
    pub use_new_sub_data: bool,
    pub completed_stages: Vec<Stage>,
    pub make_final_image: bool,
    /// The target source's own facet; never selfcal-processed, imaged with
    /// transferred solutions.
    #[serde(default)]
    pub is_target: bool,

    // field context:
    pub field_ra: f64,
    pub field_dec: f64,
    pub nbands: usize,
    pub nchannels: usize,

    /// Named output-file references written back by operation finalize.
    pub files: BTreeMap<String, PathBuf>,
    /// Intermediate products to delete after the direction's group finishes.
    pub cleanup_files: Vec<PathBuf>,

    /// Cluster allocation for the current group; never persisted.
    #[serde(skip)]
    pub hosts: Option<Hosts>,
}

impl Direction {
    pub fn new(def: &DirectionDef, defaults: &DirectionDefaults) -> Self {
        let cal_size_deg = def.cal_size_deg.unwrap_or(defaults.cal_size_deg);
        let mut d = Self {
            name: def.name.clone(),
            ra: def.ra,
            dec: def.dec,
            polygon: None,
            width_deg: None,
            cal_size_deg,
            cal_radius_deg: cal_size_deg / 2.0,
            apparent_flux_mjy: def.cal_flux_jy.map(|jy| jy * 1000.0),
            cal_imsize: 0,
            facet_imsize: 0,
            cal_wplanes: 1,
            facet_wplanes: 1,
            cellsize_selfcal_deg: defaults.cellsize_selfcal_deg,
            cellsize_verify_deg: defaults.cellsize_verify_deg,
            solint_p: 1,
            solint_a: 30,
            max_residual_jy: defaults.max_residual_jy,
            selfcal_ok: false,
            use_new_sub_data: false,
            completed_stages: Vec::new(),
            make_final_image: defaults.make_final_image,
            is_target: false,
            field_ra: 0.0,
            field_dec: 0.0,
            nbands: 0,
            nchannels: 1,
            files: BTreeMap::new(),
            cleanup_files: Vec::new(),
            hosts: None,
        };
        d.scale_solints();
        d
    }

    /// Scale solution intervals by apparent calibrator flux. The scaling is
    /// linear with flux, so fainter sources get longer (lower-SNR) intervals.
    fn scale_solints(&mut self) {
        if let Some(flux) = self.apparent_flux_mjy {
            self.solint_p = ((4.0 * REF_FLUX_MJY / flux).round() as u32).max(1);
            self.solint_a = ((240.0 * REF_FLUX_MJY / flux).round() as u32).max(30);
        }
    }

    /// Attach a tessellation result.
    pub fn set_geometry(&mut self, facet: &Facet) {
        self.polygon = Some(facet.polygon.clone());
        self.width_deg = Some(facet.width_deg);
    }

    /// Derive image sizes from the facet width and calibrator size. Sizes
    /// are clamped to >= 512 and 7-smooth as the imaging backend requires.
    pub fn set_image_sizes(&mut self) {
        if let Some(width) = self.width_deg {
            // full facet image has 15% padding:
            self.facet_imsize = optimum_size(width / self.cellsize_selfcal_deg * 1.15).max(512);
        }
        // calibrator image has 20% padding:
        self.cal_imsize = optimum_size(self.cal_size_deg / self.cellsize_selfcal_deg * 1.2).max(512);
        self.cal_wplanes = wplanes(self.cal_imsize);
        self.facet_wplanes = wplanes(self.facet_imsize);
    }

    /// Set band-derived parameters.
    pub fn set_band_info(&mut self, nbands: usize) {
        self.nbands = nbands;
        self.nchannels = ((nbands as f64) / 5.0).ceil().max(1.0) as usize;
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        self.completed_stages.contains(&stage)
    }

    pub fn record_stage(&mut self, stage: Stage) {
        if !self.is_complete(stage) {
            self.completed_stages.push(stage);
        }
    }

    /// Merge a saved snapshot into this direction. Only run progress is
    /// taken; geometry and configuration always come from the current run.
    /// The saved stage history is validated first, and nothing is touched if
    /// it is corrupt.
    pub fn merge_saved(&mut self, saved: Direction) -> Result<(), Error> {
        Stage::validate_history(&self.name, &saved.completed_stages)?;
        self.selfcal_ok = saved.selfcal_ok;
        self.use_new_sub_data = saved.use_new_sub_data;
        self.completed_stages = saved.completed_stages;
        self.files = saved.files;
        self.cleanup_files = saved.cleanup_files;
        Ok(())
    }

    /// Clear the selfcal stage from the history so it can be re-run without
    /// recomputing tessellation or earlier stages.
    pub fn reset_selfcal(&mut self) {
        self.completed_stages.retain(|s| *s != Stage::Selfcal);
        self.selfcal_ok = false;
    }
}

/// Number of w-projection planes for an image of the given size
/// (the imaging backend's lookup table).
fn wplanes(imsize: u32) -> u32 {
    match imsize {
        0..=512 => 1,
        513..=799 => 64,
        800..=1023 => 96,
        1024..=1599 => 128,
        1600..=2047 => 256,
        2048..=3000 => 384,
        3001..=4095 => 448,
        _ => 512,
    }
}

/// Read a directions file: whitespace-separated columns
/// `name ra_deg dec_deg [flux_jy [size_deg]]`, `#` comments, the literal
/// `empty` standing for an unset optional column.
pub fn read_directions_file(path: &Path) -> Result<Vec<DirectionDef>, Error> {
    let text = std::fs::read_to_string(path)?;
    let fname = path.display().to_string();

    let mut defs = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut cols = line.split_whitespace();
        let bad = |reason: String| Error::BadDirectionsLine {
            file: fname.clone(),
            line: lineno + 1,
            reason,
        };

        let name = cols.next().ok_or_else(|| bad("missing name".into()))?;
        let ra = parse_col(cols.next(), "ra").map_err(&bad)?;
        let dec = parse_col(cols.next(), "dec").map_err(&bad)?;
        let cal_flux_jy = parse_opt_col(cols.next(), "flux").map_err(&bad)?;
        let cal_size_deg = parse_opt_col(cols.next(), "size").map_err(&bad)?;

        defs.push(DirectionDef {
            name: name.to_owned(),
            ra,
            dec,
            cal_flux_jy,
            cal_size_deg,
        });
    }
    if defs.is_empty() {
        return Err(Error::NoDirections(fname));
    }
    Ok(defs)
}

fn parse_col(col: Option<&str>, what: &str) -> Result<f64, String> {
    let col = col.ok_or_else(|| format!("missing {what} column"))?;
    col.parse()
        .map_err(|_| format!("bad {what} value \"{col}\""))
}

fn parse_opt_col(col: Option<&str>, what: &str) -> Result<Option<f64>, String> {
    match col {
        None => Ok(None),
        Some(c) if c.eq_ignore_ascii_case("empty") => Ok(None),
        Some(c) => c
            .parse()
            .map(Some)
            .map_err(|_| format!("bad {what} value \"{c}\"")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geom::max_prime_factor;

    fn def(name: &str, flux_jy: Option<f64>) -> DirectionDef {
        DirectionDef {
            name: name.to_owned(),
            ra: 10.0,
            dec: 45.0,
            cal_flux_jy: flux_jy,
            cal_size_deg: Some(0.3),
        }
    }

    #[test]
    fn test_solint_scaling() {
        // 250 mJy reference source:
        let d = Direction::new(&def("a", Some(0.25)), &DirectionDefaults::default());
        assert_eq!(d.solint_p, 4);
        assert_eq!(d.solint_a, 240);

        // bright source pins at the fast/slow floors:
        let d = Direction::new(&def("b", Some(10.0)), &DirectionDefaults::default());
        assert_eq!(d.solint_p, 1);
        assert_eq!(d.solint_a, 30);

        // faint source gets longer intervals:
        let d = Direction::new(&def("c", Some(0.125)), &DirectionDefaults::default());
        assert_eq!(d.solint_p, 8);
        assert_eq!(d.solint_a, 480);
    }

    #[test]
    fn test_image_size_invariant() {
        let mut d = Direction::new(&def("a", Some(1.0)), &DirectionDefaults::default());
        for width in [0.1, 0.5, 1.0, 2.7] {
            d.width_deg = Some(width);
            d.set_image_sizes();
            for size in [d.facet_imsize, d.cal_imsize] {
                assert!(size >= 512);
                assert_eq!(size % 2, 0);
                assert!(max_prime_factor(size) <= 7);
            }
        }
    }

    #[test]
    fn test_merge_saved_keeps_geometry() {
        let defaults = DirectionDefaults::default();
        let mut current = Direction::new(&def("a", Some(1.0)), &defaults);
        current.width_deg = Some(1.0);

        let mut saved = Direction::new(&def("a", Some(1.0)), &defaults);
        saved.width_deg = Some(99.0);
        saved.selfcal_ok = true;
        saved.completed_stages = vec![Stage::Add, Stage::Selfcal];

        current.merge_saved(saved).unwrap();
        assert_eq!(current.width_deg, Some(1.0));
        assert!(current.selfcal_ok);
        assert!(current.is_complete(Stage::Selfcal));
    }

    #[test]
    fn test_merge_saved_rejects_corrupt_history() {
        let defaults = DirectionDefaults::default();
        let mut current = Direction::new(&def("a", Some(1.0)), &defaults);
        let mut saved = current.clone();
        saved.completed_stages = vec![Stage::Subtract, Stage::Add];
        saved.selfcal_ok = true;

        assert!(current.merge_saved(saved).is_err());
        // nothing was merged:
        assert!(!current.selfcal_ok);
        assert!(current.completed_stages.is_empty());
    }

    #[test]
    fn test_reset_selfcal() {
        let mut d = Direction::new(&def("a", Some(1.0)), &DirectionDefaults::default());
        d.completed_stages = vec![Stage::Add, Stage::Selfcal];
        d.selfcal_ok = true;
        d.reset_selfcal();
        assert_eq!(d.completed_stages, vec![Stage::Add]);
        assert!(!d.selfcal_ok);
    }

    #[test]
    fn test_read_directions_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directions.txt");
        std::fs::write(
            &path,
            "# name ra dec flux_jy size_deg\n\
             D0 10.0 45.0 1.2 0.3\n\
             D1 11.0 45.5 0.8 empty\n\
             D2 10.5 46.0\n",
        )
        .unwrap();

        let defs = read_directions_file(&path).unwrap();
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[0].cal_flux_jy, Some(1.2));
        assert_eq!(defs[1].cal_size_deg, None);
        assert_eq!(defs[2].cal_flux_jy, None);
    }

    #[test]
    fn test_read_directions_file_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directions.txt");
        std::fs::write(&path, "D0 ten 45.0\n").unwrap();
        let err = read_directions_file(&path).unwrap_err();
        assert!(matches!(err, Error::BadDirectionsLine { line: 1, .. }));
    }
}
