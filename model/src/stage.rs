use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

/// The fixed sequence of external processing stages run per direction.
///
/// Histories loaded from disk are validated against this order; a snapshot
/// recording `Subtract` without `Selfcal` is corrupt, not a resume point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Add,
    Selfcal,
    Subtract,
    FinalAdd,
    FinalImage,
}

impl Stage {
    pub const ORDER: [Stage; 5] = [
        Stage::Add,
        Stage::Selfcal,
        Stage::Subtract,
        Stage::FinalAdd,
        Stage::FinalImage,
    ];

    /// Operation name, used for results directories and job parameters.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Add => "facetadd",
            Stage::Selfcal => "facetselfcal",
            Stage::Subtract => "facetsub",
            Stage::FinalAdd => "facetaddfinal",
            Stage::FinalImage => "facetimagefinal",
        }
    }

    fn index(&self) -> usize {
        Stage::ORDER.iter().position(|s| s == self).unwrap()
    }

    /// Validate a completed-stage history loaded from disk: stages must be
    /// unique and in pipeline order.
    pub fn validate_history(entity: &str, history: &[Stage]) -> Result<(), Error> {
        for pair in history.windows(2) {
            if pair[1].index() <= pair[0].index() {
                return Err(Error::CorruptHistory(
                    entity.to_owned(),
                    format!("{} recorded after {}", pair[1], pair[0]),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_histories() {
        Stage::validate_history("d", &[]).unwrap();
        Stage::validate_history("d", &[Stage::Add]).unwrap();
        Stage::validate_history("d", &[Stage::Add, Stage::Selfcal, Stage::Subtract]).unwrap();
        // skipping selfcal/subtract before final imaging is a valid history
        // (directions imaged with transferred solutions):
        Stage::validate_history("d", &[Stage::Add, Stage::FinalAdd, Stage::FinalImage]).unwrap();
    }

    #[test]
    fn test_out_of_order_history_rejected() {
        let err = Stage::validate_history("d", &[Stage::Selfcal, Stage::Add]).unwrap_err();
        assert!(matches!(err, Error::CorruptHistory(_, _)));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = Stage::validate_history("d", &[Stage::Add, Stage::Add]).unwrap_err();
        assert!(matches!(err, Error::CorruptHistory(_, _)));
    }

    #[test]
    fn test_names_roundtrip_through_serde() {
        let json = serde_json::to_string(&Stage::Selfcal).unwrap();
        assert_eq!(json, "\"selfcal\"");
        let back: Stage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Stage::Selfcal);
    }
}
