use std::path::PathBuf;

use super::Fs;

/// Utility fns for making common paths in the working directory.
impl Fs {
    /// $WORK/state
    pub fn state_dir(&self) -> PathBuf {
        self.work_prefix.join("state")
    }

    /// $WORK/regions
    pub fn regions_dir(&self) -> PathBuf {
        self.work_prefix.join("regions")
    }

    /// $WORK/results
    pub fn results_dir(&self) -> PathBuf {
        self.work_prefix.join("results")
    }

    /// $WORK/results/op_name/direction_name
    pub fn op_dir(&self, op_name: &str, direction: &str) -> PathBuf {
        self.results_dir().join(op_name).join(direction)
    }

    /// $WORK/regions/facets.json
    pub fn facet_cache(&self) -> PathBuf {
        self.regions_dir().join("facets.json")
    }

    /// $WORK/regions/facets.reg
    pub fn facet_regions(&self) -> PathBuf {
        self.regions_dir().join("facets.reg")
    }

    /// $WORK/regions/calimages.reg
    pub fn calimage_regions(&self) -> PathBuf {
        self.regions_dir().join("calimages.reg")
    }
}
