use std::io::BufRead;
use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::settings::Settings;

/// All interactions with the terminal go through this struct.
pub struct Ui {
    /// -v setting, displays extra progress info
    pub verbose: bool,
    /// -y setting, answers every confirmation prompt with yes
    assume_yes: bool,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            verbose: settings.verbose > 0,
            assume_yes: settings.yes,
        }
    }

    /// Ask a yes/no question; anything but a leading 'y' is a no.
    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        eprintln!("{} (y/N)", prompt);
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(matches!(line.trim_start().chars().next(), Some('y' | 'Y')))
    }

    /// Start-of-step progress marker; pair with `done`.
    pub fn progress(&self, what: &str) {
        if self.verbose {
            eprint!("{}... ", what.magenta());
        }
    }

    /// Progress marker naming the file or directory being worked on.
    pub fn progress_path(&self, what: &str, path: &Path) {
        if self.verbose {
            eprint!("{} {:?}... ", what.magenta(), path);
        }
    }

    pub fn done(&self) {
        if self.verbose {
            eprintln!("{}.", "done".green());
        }
    }

    /// Informational line shown only with -v.
    pub fn note(&self, msg: &str) {
        if self.verbose {
            eprintln!("{}", msg);
        }
    }
}
