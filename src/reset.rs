use anyhow::Result;
use colored::Colorize;

use model::{Direction, StateStore};

use crate::fs::Fs;
use crate::settings::Settings;
use crate::ui::Ui;

/// Logic for resetting selfcal state from previous executions.
pub struct Resetter<'a> {
    settings: &'a Settings,
    ui: &'a Ui,
    fs: &'a Fs,
    store: &'a StateStore,
}

impl<'a> Resetter<'a> {
    /// Create a new `Resetter`.
    pub fn new(settings: &'a Settings, ui: &'a Ui, fs: &'a Fs, store: &'a StateStore) -> Self {
        Self {
            settings,
            ui,
            fs,
            store,
        }
    }
}

impl Resetter<'_> {
    /// Reset the selfcal state of the directions named on the command line.
    /// Geometry and earlier stage history survive, so the next run repeats
    /// only the selfcal stage.
    pub fn reset(&self) -> Result<()> {
        if self.settings.directions.is_empty() {
            eprintln!("No directions specified; quitting.");
            return Ok(());
        }

        for name in &self.settings.directions {
            let Some(mut direction) = self.store.load::<Direction>(name)? else {
                eprintln!("No saved state for direction {}; skipping.", name.cyan());
                continue;
            };
            eprintln!(
                "{} selfcal state of direction {}.",
                "Resetting".magenta(),
                name.cyan()
            );
            if self.settings.dry_run || !self.ui.confirm("Proceed?")? {
                continue;
            }
            self.store.reset(&mut direction, &self.fs.results_dir())?;
            eprintln!("{}.", "done".green());
        }
        Ok(())
    }
}
