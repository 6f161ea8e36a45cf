use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The single direction covering the whole observed field.
///
/// Not a facet: it represents the un-subtracted input data before any
/// facet-specific processing and, at the end of a run, collects the final
/// facet image and vertex files handed to the mosaic collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Field {
    pub ra: f64,
    pub dec: f64,
    pub facet_image_files: Vec<PathBuf>,
    pub facet_vertices_files: Vec<PathBuf>,
}

impl Field {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self {
            ra,
            dec,
            facet_image_files: Vec::new(),
            facet_vertices_files: Vec::new(),
        }
    }
}
