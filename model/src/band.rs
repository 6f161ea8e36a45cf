use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;

/// One frequency sub-band of the observed dataset.
///
/// Bands are produced by the data-preparation collaborator and described in a
/// JSON catalog; after loading they are shared read-only across all
/// directions. The only field attached later is the sky-model reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Band {
    /// Derived from the reference frequency if the catalog leaves it empty.
    #[serde(default)]
    pub name: String,
    pub freq_hz: f64,
    pub nchan: usize,
    pub chan_width_hz: f64,
    pub timestep_sec: f64,
    pub files: Vec<PathBuf>,
    /// Direction-independent instrument tables, one per file.
    #[serde(default)]
    pub parmdbs: Vec<PathBuf>,
    /// Whether the subtracted-data column already exists.
    #[serde(default)]
    pub has_sub_data: bool,
    /// Channel indices missing from the frequency axis.
    #[serde(default)]
    pub missing_channels: Vec<usize>,
    /// Fraction of unflagged visibilities, for data-quality filtering.
    #[serde(default = "default_unflagged")]
    pub unflagged_fraction: f64,
    /// Direction-independent sky model, attached lazily.
    #[serde(default)]
    pub skymodel: Option<PathBuf>,
}

fn default_unflagged() -> f64 {
    1.0
}

impl Band {
    /// Largest usable averaging step <= `target` channels. The frequency
    /// step must divide the channel count evenly, so we walk up from the
    /// target until it does.
    pub fn nearest_freqstep(&self, target: usize) -> usize {
        let mut step = target.clamp(1, self.nchan.max(1));
        while self.nchan % step != 0 {
            step += 1;
        }
        step
    }

    /// Averaging steps for each processing purpose, from the band's channel
    /// width and integration time.
    pub fn averaging_steps(&self) -> AveragingSteps {
        AveragingSteps {
            initsubtract_freqstep: self.freqstep_for(0.5e6),
            initsubtract_timestep: self.timestep_for(20.0),
            selfcal_freqstep: self.freqstep_for(2.0e6),
            selfcal_timestep: self.timestep_for(120.0),
            image_freqstep: self.freqstep_for(0.5e6),
            image_timestep: self.timestep_for(30.0),
            verify_freqstep: self.freqstep_for(2.0e6),
            verify_timestep: self.timestep_for(60.0),
        }
    }

    fn freqstep_for(&self, target_hz: f64) -> usize {
        let target = (target_hz / self.chan_width_hz).round().max(1.0) as usize;
        self.nearest_freqstep(target.min(self.nchan))
    }

    fn timestep_for(&self, target_sec: f64) -> usize {
        ((target_sec / self.timestep_sec).round() as usize).max(1)
    }
}

/// Averaging steps (in channels / time slots) per processing purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AveragingSteps {
    pub initsubtract_freqstep: usize,
    pub initsubtract_timestep: usize,
    pub selfcal_freqstep: usize,
    pub selfcal_timestep: usize,
    pub image_freqstep: usize,
    pub image_timestep: usize,
    pub verify_freqstep: usize,
    pub verify_timestep: usize,
}

/// The band catalog handed over by the data-preparation collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandCatalog {
    pub field_ra: f64,
    pub field_dec: f64,
    pub bands: Vec<Band>,
}

impl BandCatalog {
    /// Load a catalog, name the bands, and sort them by frequency.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let mut catalog: BandCatalog = serde_json::from_str(&text)?;
        if catalog.bands.is_empty() {
            return Err(Error::EmptyCatalog(path.display().to_string()));
        }
        for band in &mut catalog.bands {
            if band.name.is_empty() {
                band.name = format!("band_{:.2}MHz", band.freq_hz / 1e6);
            }
        }
        catalog
            .bands
            .sort_by(|a, b| a.freq_hz.total_cmp(&b.freq_hz));
        Ok(catalog)
    }

    /// Drop bands with too little unflagged data; returns the names of the
    /// dropped bands. An empty working set afterwards is fatal.
    pub fn filter_unflagged(&mut self, min_fraction: f64) -> Result<Vec<String>, Error> {
        let mut dropped = Vec::new();
        self.bands.retain(|band| {
            if band.unflagged_fraction < min_fraction {
                log::warn!(
                    "dropping band {}: unflagged fraction {:.2} < {:.2}",
                    band.name,
                    band.unflagged_fraction,
                    min_fraction
                );
                dropped.push(band.name.clone());
                false
            } else {
                true
            }
        });
        if self.bands.is_empty() {
            return Err(Error::NoUsableBands);
        }
        Ok(dropped)
    }
}
