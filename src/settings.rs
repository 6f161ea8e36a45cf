use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use sched::ClusterNode;

use crate::args::Args;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Parset file {0:?} does not exist")]
    ParsetNotFound(PathBuf),
    #[error(
        "No directions file and no selection thresholds configured; \
         set [directions] file in the parset"
    )]
    NoDirectionSource,
    #[error(
        "Selection thresholds ({0}) need the source-finding collaborator, \
         which is not connected; set [directions] file instead"
    )]
    SelectionNotSupported(String),
    #[error("[cluster] pipeline_executable is required unless running with --dry-run")]
    NoPipelineExecutable,
    #[error("[directions] groupings may not contain zero-sized groups")]
    ZeroSizedGroup,
}

/// The run-configuration file.
#[derive(Debug, Deserialize)]
pub struct Parset {
    pub data: DataSection,
    #[serde(default)]
    pub directions: DirectionsSection,
    #[serde(default)]
    pub imaging: ImagingSection,
    #[serde(default)]
    pub cluster: ClusterSection,
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Deserialize)]
pub struct DataSection {
    /// Band catalog written by the data-preparation collaborator.
    pub band_catalog: PathBuf,
    /// Bands with less unflagged data than this are dropped.
    #[serde(default = "default_min_unflagged")]
    pub min_unflagged_fraction: f64,
}

fn default_min_unflagged() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DirectionsSection {
    /// Directions file: whitespace columns `name ra dec [flux_jy [size_deg]]`.
    pub file: Option<PathBuf>,
    /// Cap on the number of directions processed at all.
    pub ndir_total: Option<usize>,
    /// Cap on the number of directions selfcal-processed.
    pub ndir_selfcal: Option<usize>,
    /// Process directions in groups of one.
    pub one_at_a_time: bool,
    /// Group sizes, cycled; empty means a single group of everything.
    pub groupings: Vec<usize>,
    /// Tessellation boundary padding as a fraction of the field extent.
    pub padding: f64,
    /// Nudge facet edges out of the masked regions below.
    pub check_edges: bool,
    /// Masked regions, as flat [ra, dec, radius_deg] triples.
    pub avoid_regions: Vec<[f64; 3]>,
    /// Target center; with `target_has_own_facet` it joins the tessellation,
    /// otherwise it becomes a region no facet edge may cross.
    pub target_ra: Option<f64>,
    pub target_dec: Option<f64>,
    pub target_radius_deg: Option<f64>,
    pub target_has_own_facet: bool,
    /// Give failed/never-selfcaled directions their nearest successful
    /// neighbor's solutions before final imaging.
    pub transfer_selfcal: bool,
    /// Selection thresholds for runs without a directions file. Unsupported
    /// here; rejected with a configuration error naming them.
    pub flux_min_jy: Option<f64>,
    pub size_max_arcmin: Option<f64>,
    pub separation_max_arcmin: Option<f64>,
    /// Overrides for the per-direction defaults.
    pub cal_size_deg: Option<f64>,
    pub max_residual_jy: Option<f64>,
}

impl Default for DirectionsSection {
    fn default() -> Self {
        Self {
            file: None,
            ndir_total: None,
            ndir_selfcal: None,
            one_at_a_time: false,
            groupings: Vec::new(),
            padding: 0.3,
            check_edges: false,
            avoid_regions: Vec::new(),
            target_ra: None,
            target_dec: None,
            target_radius_deg: None,
            target_has_own_facet: false,
            transfer_selfcal: false,
            flux_min_jy: None,
            size_max_arcmin: None,
            separation_max_arcmin: None,
            cal_size_deg: None,
            max_residual_jy: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImagingSection {
    /// Make a final facet image for every direction.
    pub make_final_image: bool,
    /// Combine the final facet images into one mosaic.
    pub make_mosaic: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    pub nodes: Vec<ClusterNode>,
    pub ndir_per_node: Option<usize>,
    /// Cap on cores used per node.
    pub ncpu: Option<usize>,
    /// The external job runner invoked once per operation.
    pub pipeline_executable: Option<PathBuf>,
}

impl ClusterSection {
    pub fn ndir_per_node(&self) -> usize {
        self.ndir_per_node.unwrap_or(1).max(1)
    }

    pub fn ncpu(&self) -> usize {
        self.ncpu.unwrap_or(usize::MAX)
    }

    /// Concurrency cap for the scheduler: one slot per direction-per-node
    /// across the whole inventory.
    pub fn max_procs(&self) -> usize {
        self.nodes.len().max(1) * self.ndir_per_node()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Prompt for confirmation after region generation and selfcal failures.
    pub interactive: bool,
}

/// Settings are like Args, except all the logic has been applied,
/// so the parset is parsed and validated and defaults are filled in.
#[derive(Debug)]
pub struct Settings {
    pub parset: Parset,
    pub working_dir: PathBuf,
    pub yes: bool,
    pub verbose: u8,
    pub dry_run: bool,
    pub directions: Vec<String>,

    pub reset: bool,
    pub run: bool,
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let parset_path = PathBuf::from(&args.parset);
        if !parset_path.exists() {
            return Err(Error::ParsetNotFound(parset_path).into());
        }

        let text = std::fs::read_to_string(&parset_path)
            .with_context(|| format!("while reading parset file {parset_path:?}"))?;
        let mut parset: Parset = toml::from_str(&text)
            .with_context(|| format!("while parsing parset file {parset_path:?}"))?;

        // resolve paths in the parset relative to its own directory:
        let base = parset_path.parent().unwrap_or_else(|| Path::new("."));
        resolve(&mut parset.data.band_catalog, base);
        if let Some(file) = &mut parset.directions.file {
            resolve(file, base);
        }

        // for now, we reset if reset is specified, run otherwise.
        let reset = args.reset;
        let run = !args.reset;

        let settings = Self {
            parset,
            working_dir: PathBuf::from(&args.working_dir),
            yes: args.yes,
            verbose: args.verbose,
            dry_run: args.dry_run,
            directions: args.directions,
            reset,
            run,
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl Settings {
    /// Fatal configuration errors are caught here, before any scheduling.
    fn validate(&self) -> Result<(), Error> {
        let dirs = &self.parset.directions;
        if self.run && dirs.file.is_none() {
            let mut thresholds = Vec::with_capacity(3);
            if dirs.flux_min_jy.is_some() {
                thresholds.push("flux_min_jy");
            }
            if dirs.size_max_arcmin.is_some() {
                thresholds.push("size_max_arcmin");
            }
            if dirs.separation_max_arcmin.is_some() {
                thresholds.push("separation_max_arcmin");
            }
            if thresholds.is_empty() {
                return Err(Error::NoDirectionSource);
            }
            return Err(Error::SelectionNotSupported(thresholds.join(", ")));
        }
        if dirs.groupings.contains(&0) {
            return Err(Error::ZeroSizedGroup);
        }
        if self.run && !self.dry_run && self.parset.cluster.pipeline_executable.is_none() {
            return Err(Error::NoPipelineExecutable);
        }
        Ok(())
    }
}

fn resolve(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}
