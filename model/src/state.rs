use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Band, Direction, Error, Field, Stage};

/// Entities with a durable per-name state snapshot.
pub trait Persist: Serialize + DeserializeOwned {
    fn state_name(&self) -> &str;
}

impl Persist for Direction {
    fn state_name(&self) -> &str {
        &self.name
    }
}

impl Persist for Band {
    fn state_name(&self) -> &str {
        &self.name
    }
}

impl Persist for Field {
    fn state_name(&self) -> &str {
        "field"
    }
}

/// Durable state store: one JSON snapshot per entity, keyed by entity name.
///
/// The store owns on-disk persistence only; in-memory entities belong to the
/// control loop. Loads never partially overwrite: a snapshot is parsed and
/// validated in full before anything is merged.
#[derive(Debug)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    /// Open a store rooted at `state_dir`, creating the directory if needed.
    pub fn open(state_dir: &Path) -> Result<Self, Error> {
        fs::create_dir_all(state_dir)?;
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
        })
    }

    /// Path of the snapshot file for the named entity.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.state_dir.join(format!("{name}.json"))
    }

    /// Durably persist an entity's full field set.
    pub fn save<T: Persist>(&self, entity: &T) -> Result<(), Error> {
        let text = serde_json::to_string_pretty(entity)?;
        fs::write(self.path_for(entity.state_name()), text)?;
        Ok(())
    }

    /// Load a saved snapshot by name, if one exists.
    pub fn load<T: Persist>(&self, name: &str) -> Result<Option<T>, Error> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Restore a direction's saved run progress, returning whether a snapshot
    /// was found. Geometry and configuration fields are left untouched, and
    /// on any failure the in-memory direction is unchanged.
    pub fn load_into(&self, direction: &mut Direction) -> Result<bool, Error> {
        match self.load::<Direction>(&direction.name)? {
            Some(saved) => {
                direction.merge_saved(saved)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reset one direction's selfcal progress: drop the selfcal entry from
    /// its completed-stage history, delete that stage's results directory,
    /// and persist the new state. Everything else survives.
    pub fn reset(&self, direction: &mut Direction, results_dir: &Path) -> Result<(), Error> {
        direction.reset_selfcal();
        let stage_dir = results_dir.join(Stage::Selfcal.name()).join(&direction.name);
        if stage_dir.exists() {
            fs::remove_dir_all(&stage_dir)?;
            log::info!("deleted selfcal results {}", stage_dir.display());
        }
        self.save(direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DirectionDef, DirectionDefaults};

    fn direction(name: &str) -> Direction {
        Direction::new(
            &DirectionDef {
                name: name.to_owned(),
                ra: 10.0,
                dec: 45.0,
                cal_flux_jy: Some(1.0),
                cal_size_deg: None,
            },
            &DirectionDefaults::default(),
        )
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let mut d = direction("D0");
        d.selfcal_ok = true;
        d.record_stage(Stage::Add);
        d.record_stage(Stage::Selfcal);
        store.save(&d).unwrap();

        let mut fresh = direction("D0");
        assert!(store.load_into(&mut fresh).unwrap());
        assert!(fresh.selfcal_ok);
        assert!(fresh.is_complete(Stage::Selfcal));
    }

    #[test]
    fn test_load_missing_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let mut d = direction("D0");
        assert!(!store.load_into(&mut d).unwrap());
    }

    #[test]
    fn test_load_corrupt_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        std::fs::write(store.path_for("D0"), "{not json").unwrap();

        let mut d = direction("D0");
        d.use_new_sub_data = true;
        assert!(store.load_into(&mut d).is_err());
        assert!(d.use_new_sub_data);
        assert!(d.completed_stages.is_empty());
    }

    #[test]
    fn test_reset_clears_selfcal_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(&dir.path().join("state")).unwrap();
        let results = dir.path().join("results");
        let selfcal_dir = results.join("facetselfcal").join("D0");
        std::fs::create_dir_all(&selfcal_dir).unwrap();

        let mut d = direction("D0");
        d.record_stage(Stage::Add);
        d.record_stage(Stage::Selfcal);
        d.selfcal_ok = true;

        store.reset(&mut d, &results).unwrap();
        assert_eq!(d.completed_stages, vec![Stage::Add]);
        assert!(!d.selfcal_ok);
        assert!(!selfcal_dir.exists());

        // reset state was persisted:
        let saved: Direction = store.load("D0").unwrap().unwrap();
        assert_eq!(saved.completed_stages, vec![Stage::Add]);
    }

    #[test]
    fn test_field_and_band_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let field = Field::new(12.0, 34.0);
        store.save(&field).unwrap();
        let loaded: Field = store.load("field").unwrap().unwrap();
        assert_eq!(loaded.ra, 12.0);

        assert!(store.load::<Field>("nope").unwrap().is_none());
    }
}
