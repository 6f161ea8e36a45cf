use anyhow::{Context, Result};
use colored::Colorize;

use geom::{
    calimage_region_text, facet_region_text, tessellate, AvoidRegion, Facet, Point, TessellateOpts,
};
use model::{
    read_directions_file, BandCatalog, Direction, DirectionDef, DirectionDefaults, Field,
    StateStore,
};
use sched::{DryRunLauncher, JobLauncher, PipelineLauncher, Scheduler};
use util::Timer;

use crate::fs::Fs;
use crate::reset::Resetter;
use crate::run::ControlLoop;
use crate::settings::{self, Settings};
use crate::ui::Ui;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(
        "Facet cache {0} has {1} facets for {2} directions; \
         delete it to retessellate"
    )]
    StaleFacetCache(String, usize, usize),
}

/// This struct actually runs the command-line app.
pub struct App {
    /// Interpreted command line and parset settings
    settings: Settings,
    /// Filesystem interface
    fs: Fs,
    /// User interface
    ui: Ui,
    /// Job launcher override, for tests; normally picked from settings
    launcher: Option<Box<dyn JobLauncher>>,
}

impl App {
    /// Create a new `App`.
    pub fn new(settings: Settings) -> Self {
        let fs = Fs::new(&settings.working_dir, settings.dry_run);
        let ui = Ui::new(&settings);
        Self {
            settings,
            fs,
            ui,
            launcher: None,
        }
    }

    /// Create an `App` with a specific job launcher.
    pub fn with_launcher(settings: Settings, launcher: Box<dyn JobLauncher>) -> Self {
        let mut app = Self::new(settings);
        app.launcher = Some(launcher);
        app
    }

    /// Run the app, using settings to determine what to do.
    pub fn run(mut self) -> Result<()> {
        if self.settings.verbose > 0 {
            eprintln!("Using working directory {:?}", self.settings.working_dir);
        }
        self.fs.ensure_work_dir_exists(self.settings.verbose > 0)?;
        let store = StateStore::open(&self.fs.state_dir()).context("opening state store")?;

        if self.settings.reset {
            let resetter = Resetter::new(&self.settings, &self.ui, &self.fs, &store);
            return resetter.reset();
        }

        let catalog = self.load_bands()?;
        let mut field = Field::new(catalog.field_ra, catalog.field_dec);
        let mut directions = self.load_directions(&catalog, &store)?;
        self.write_region_files(&directions)?;

        if self.settings.parset.run.interactive
            && !self.ui.confirm("Facet regions written. Proceed with processing?")?
        {
            eprintln!("Quitting at user request.");
            return Ok(());
        }

        self.run_control_loop(&store, &catalog, &mut directions, &mut field)
    }

    fn load_bands(&mut self) -> Result<BandCatalog> {
        let data = &self.settings.parset.data;
        self.ui.progress_path("Loading band catalog", &data.band_catalog);
        let mut catalog = BandCatalog::load(&data.band_catalog)
            .with_context(|| format!("while loading band catalog {:?}", data.band_catalog))?;
        self.ui.done();

        let dropped = catalog.filter_unflagged(data.min_unflagged_fraction)?;
        if !dropped.is_empty() {
            eprintln!(
                "{} {} bands with too little unflagged data.",
                "Dropped".magenta(),
                dropped.len()
            );
        }
        if catalog.bands.iter().any(|b| !b.has_sub_data || b.skymodel.is_none()) {
            log::warn!(
                "some bands are missing the subtracted-data column or a sky model; \
                 rerun the data-preparation pipeline before trusting results"
            );
        }
        eprintln!("Using {} bands.", catalog.bands.len());
        Ok(catalog)
    }

    /// Read the directions file, attach geometry, image sizes, and any saved
    /// run progress, and persist the initial state of every direction.
    fn load_directions(
        &mut self,
        catalog: &BandCatalog,
        store: &StateStore,
    ) -> Result<Vec<Direction>> {
        let parset_dirs = &self.settings.parset.directions;
        let file = parset_dirs.file.as_ref().ok_or(settings::Error::NoDirectionSource)?;
        let mut defs = read_directions_file(file)
            .with_context(|| format!("while reading directions file {file:?}"))?;
        if let Some(cap) = parset_dirs.ndir_total {
            defs.truncate(cap);
        }

        let mut defaults = DirectionDefaults {
            make_final_image: self.settings.parset.imaging.make_final_image,
            ..DirectionDefaults::default()
        };
        if let Some(size) = parset_dirs.cal_size_deg {
            defaults.cal_size_deg = size;
        }
        if let Some(residual) = parset_dirs.max_residual_jy {
            defaults.max_residual_jy = residual;
        }

        let mut directions: Vec<Direction> =
            defs.iter().map(|def| Direction::new(def, &defaults)).collect();

        // a target with its own facet is processed like any other direction,
        // except it sits last and never selfcals:
        let have_target = directions.iter().any(|d| d.name == "target");
        if parset_dirs.target_has_own_facet && !have_target {
            if let (Some(ra), Some(dec)) = (parset_dirs.target_ra, parset_dirs.target_dec) {
                let def = DirectionDef {
                    name: "target".to_owned(),
                    ra,
                    dec,
                    cal_flux_jy: None,
                    cal_size_deg: parset_dirs.target_radius_deg.map(|r| 2.0 * r),
                };
                let mut target = Direction::new(&def, &defaults);
                target.is_target = true;
                directions.push(target);
            }
        }
        eprintln!("Processing {} directions.", directions.len());

        let facets = self.load_or_tessellate(&directions)?;
        for (d, facet) in directions.iter_mut().zip(&facets) {
            d.set_geometry(facet);
            d.set_image_sizes();
            d.set_band_info(catalog.bands.len());
            d.field_ra = catalog.field_ra;
            d.field_dec = catalog.field_dec;

            if store.load_into(d).with_context(|| format!("while restoring state of {}", d.name))? {
                self.ui.note(&format!("Restored saved state of direction {}.", d.name));
            }
            store.save(d).with_context(|| format!("while saving state of {}", d.name))?;
        }
        Ok(directions)
    }

    /// Load the facet geometry cache, or tessellate and create it. Cached
    /// geometry keeps facet boundaries stable across resumed runs; it is
    /// invalidated only by deleting the file.
    fn load_or_tessellate(&mut self, directions: &[Direction]) -> Result<Vec<Facet>> {
        let parset_dirs = &self.settings.parset.directions;
        let cache = self.fs.facet_cache();
        let expected = directions.len();

        if self.fs.exists(&cache) {
            let text = std::fs::read_to_string(&cache)
                .with_context(|| format!("while reading facet cache {cache:?}"))?;
            let facets: Vec<Facet> = serde_json::from_str(&text)
                .with_context(|| format!("while parsing facet cache {cache:?}"))?;
            if facets.len() != expected {
                return Err(Error::StaleFacetCache(
                    cache.display().to_string(),
                    facets.len(),
                    expected,
                )
                .into());
            }
            eprintln!("{} {:?}.", "Loaded facet geometry from".magenta(), cache);
            return Ok(facets);
        }

        let centers: Vec<(String, Point)> = directions
            .iter()
            .map(|d| (d.name.clone(), Point::new(d.ra, d.dec)))
            .collect();

        let mut opts = TessellateOpts {
            padding: parset_dirs.padding,
            check_edges: parset_dirs.check_edges,
            avoid: parset_dirs
                .avoid_regions
                .iter()
                .map(|&[ra, dec, radius_deg]| AvoidRegion {
                    center: Point::new(ra, dec),
                    radius_deg,
                })
                .collect(),
        };
        if !parset_dirs.target_has_own_facet {
            // a facet-less target still must not be split across facets:
            if let (Some(ra), Some(dec), Some(radius_deg)) = (
                parset_dirs.target_ra,
                parset_dirs.target_dec,
                parset_dirs.target_radius_deg,
            ) {
                opts.avoid.push(AvoidRegion {
                    center: Point::new(ra, dec),
                    radius_deg,
                });
                opts.check_edges = true;
            }
        }

        self.ui.progress("Tessellating");
        let timer = Timer::now();
        let facets = tessellate(&centers, &opts).context("while tessellating directions")?;
        self.ui.done();
        if self.ui.verbose {
            timer.print_elapsed("Tessellation");
        }

        self.fs.create_dir(self.fs.regions_dir())?;
        self.fs.write_file(
            &cache,
            &serde_json::to_string_pretty(&facets).context("serializing facet cache")?,
        )?;
        eprintln!("{} {:?}.", "Facet geometry written to".green(), cache);
        Ok(facets)
    }

    /// DS9 region files for external visualization tools.
    fn write_region_files(&self, directions: &[Direction]) -> Result<()> {
        self.fs.create_dir(self.fs.regions_dir())?;

        let facets: Vec<(&str, &geom::Polygon)> = directions
            .iter()
            .filter_map(|d| d.polygon.as_ref().map(|p| (d.name.as_str(), p)))
            .collect();
        self.fs.write_file(self.fs.facet_regions(), &facet_region_text(&facets))?;

        let cals: Vec<(&str, f64, f64, f64)> = directions
            .iter()
            .map(|d| (d.name.as_str(), d.ra, d.dec, d.cal_radius_deg))
            .collect();
        self.fs.write_file(self.fs.calimage_regions(), &calimage_region_text(&cals))?;

        self.ui.note(&format!(
            "Wrote region files to {:?}.",
            self.fs.regions_dir()
        ));
        Ok(())
    }

    fn run_control_loop(
        mut self,
        store: &StateStore,
        catalog: &BandCatalog,
        directions: &mut Vec<Direction>,
        field: &mut Field,
    ) -> Result<()> {
        let launcher: Box<dyn JobLauncher> = match self.launcher.take() {
            Some(launcher) => launcher,
            None if self.settings.dry_run => Box::new(DryRunLauncher),
            None => {
                let exe = self
                    .settings
                    .parset
                    .cluster
                    .pipeline_executable
                    .clone()
                    .ok_or(settings::Error::NoPipelineExecutable)?;
                Box::new(PipelineLauncher::new(exe))
            }
        };
        let scheduler = Scheduler::new(launcher, self.settings.parset.cluster.max_procs());

        let control = ControlLoop {
            settings: &self.settings,
            fs: &self.fs,
            ui: &self.ui,
            store,
            scheduler: &scheduler,
            bands: &catalog.bands,
        };
        let summary = control.run(directions, field)?;

        eprintln!(
            "\nRun complete: {}/{} directions selfcal-ok.",
            summary.n_selfcal_ok, summary.n_directions
        );
        if summary.failed.is_empty() {
            eprintln!("{}", "All directions completed successfully.".green());
        } else {
            eprintln!(
                "{} {}",
                "Directions that did not complete successfully:".red(),
                summary.failed.join(", ")
            );
        }
        Ok(())
    }
}
