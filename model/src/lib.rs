/// Frequency sub-bands of the observed dataset
mod band;
pub use band::{AveragingSteps, Band, BandCatalog};

/// Per-facet directions and their derived parameters
mod direction;
pub use direction::{read_directions_file, Direction, DirectionDef, DirectionDefaults, Hosts};

/// The single whole-field direction
mod field;
pub use field::Field;

/// The fixed per-direction stage sequence
mod stage;
pub use stage::Stage;

/// Durable, resumable entity state
mod state;
pub use state::{Persist, StateStore};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid state snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("State for \"{0}\" has a corrupt stage history: {1}")]
    CorruptHistory(String, String),
    #[error("Band catalog \"{0}\" lists no bands")]
    EmptyCatalog(String),
    #[error("No usable bands left after data-quality checks")]
    NoUsableBands,
    #[error("Directions file \"{file}\" line {line}: {reason}")]
    BadDirectionsLine {
        file: String,
        line: usize,
        reason: String,
    },
    #[error("Directions file \"{0}\" defines no directions")]
    NoDirections(String),
}
