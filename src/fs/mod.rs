use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use util::PathEncodingError;

/// Defines fns for creating common paths in the working directory
mod paths;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Specified working directory \"{0}\" is not a directory")]
    NotDirectory(String),
    #[error("Can't perform IO operation: \"{0}\" is not whitelisted")]
    NotWhitelisted(String),
}

/// All file operations in the crate should go through this struct.
///
/// All destructive operations check that the path in question is a child of
/// the single whitelisted prefix (the working dir), otherwise they will not
/// be performed. Note that the external pipeline jobs write wherever their
/// parameters point them; this guard covers the engine's own bookkeeping.
#[derive(Debug)]
pub struct Fs {
    /// The directory we are allowed to modify
    work_prefix: PathBuf,
    /// if true, deletions are logged but not performed
    dry_run: bool,
}

impl Fs {
    /// Create a new `Fs` with the given working directory.
    pub fn new(work_prefix: &Path, dry_run: bool) -> Self {
        Self {
            work_prefix: work_prefix.to_path_buf(),
            dry_run,
        }
    }

    /// Check whether working dir exists, and create it if not.
    pub fn ensure_work_dir_exists(&mut self, verbose: bool) -> Result<()> {
        if !self.work_prefix.exists() {
            eprintln!(
                "Working directory {:?} doesn't exist. Creating.",
                self.work_prefix
            );
            fs::create_dir_all(&self.work_prefix).context("creating working directory")?;
        } else if !self.work_prefix.is_dir() {
            return Err(Error::NotDirectory(
                self.work_prefix.to_str().ok_or(PathEncodingError)?.to_string(),
            )
            .into());
        } else if verbose {
            eprintln!(
                "Working directory {:?} already exists. Not creating.",
                self.work_prefix
            );
        }

        self.work_prefix = self.work_prefix.canonicalize()?;
        Ok(())
    }

    /// Check if path exists on disk.
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        path.exists() || path.is_symlink()
    }

    /// Create a directory (uses `std::fs::create_dir_all`, so an entire tree of dirs can be created).
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::create_dir_all(path).context("creating dir")?;
        Ok(())
    }

    /// Write entire str to a file.
    pub fn write_file<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::write(path, text).context("writing file")?;
        Ok(())
    }

    /// Delete a file (skipped in dry-run mode).
    pub fn delete_file<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        if self.dry_run {
            log::info!("dry run: not deleting {}", path.display());
            return Ok(());
        }
        fs::remove_file(path).context("deleting file")?;
        Ok(())
    }

    /// Recursively delete a directory (skipped in dry-run mode).
    pub fn delete_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        if self.dry_run {
            log::info!("dry run: not deleting {}", path.display());
            return Ok(());
        }
        fs::remove_dir_all(path).context("deleting dir")?;
        Ok(())
    }

    fn is_whitelisted<T: AsRef<Path>>(&self, path: T) -> bool {
        path.as_ref().starts_with(&self.work_prefix)
    }

    fn check_whitelist(&self, path: &Path) -> Result<()> {
        if !self.is_whitelisted(path) {
            Err(Error::NotWhitelisted(path.to_str().ok_or(PathEncodingError)?.to_owned()).into())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitelist_blocks_outside_writes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut fs = Fs::new(&root, false);
        fs.ensure_work_dir_exists(false).unwrap();

        assert!(fs.write_file(root.join("ok.txt"), "hi").is_ok());
        assert!(fs.write_file("/tmp/definitely-elsewhere.txt", "hi").is_err());
    }

    #[test]
    fn test_dry_run_skips_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut fs = Fs::new(&root, true);
        fs.ensure_work_dir_exists(false).unwrap();

        let victim = root.join("victim.txt");
        std::fs::write(&victim, "data").unwrap();
        fs.delete_file(&victim).unwrap();
        assert!(victim.exists());
    }
}
