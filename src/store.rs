//! Cache directory ownership and the `job.json` handoff artifact.
//!
//! The worker runs in a separate execution context and reads the job
//! from disk, so every write goes through a temp file and a rename: a
//! fast-starting worker sees either the previous artifact or the complete
//! new one, never a truncated file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::job::JobDescriptor;

/// File name of the handoff artifact inside the cache directory.
pub const HANDOFF_FILE: &str = "job.json";

/// Environment variable pointing workers at the cache directory.
pub const CACHE_DIR_ENV: &str = "CACHE_DIR";

#[derive(Debug, Clone)]
pub struct JobStore {
    cache_dir: PathBuf,
}

impl JobStore {
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = std::path::absolute(cache_dir.as_ref())?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn handoff_path(&self) -> PathBuf {
        self.cache_dir.join(HANDOFF_FILE)
    }

    /// Clears the cache directory and recreates it empty.
    pub fn reset(&self) -> Result<()> {
        match fs::remove_dir_all(&self.cache_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.cache_dir)?;
        tracing::info!(cache_dir = %self.cache_dir.display(), "Cache directory reset");
        Ok(())
    }

    /// Exports [`CACHE_DIR_ENV`] for worker processes and helpers.
    ///
    /// Must run before the async runtime starts: mutating the environment
    /// while other threads may read it is undefined behaviour.
    pub fn export_env(&self) {
        // SAFETY: called from `main` before any other thread is spawned.
        unsafe { std::env::set_var(CACHE_DIR_ENV, &self.cache_dir) };
    }

    /// Writes the descriptor to [`HANDOFF_FILE`], replacing any previous one.
    pub fn persist(&self, descriptor: &JobDescriptor) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache_dir)?;
        let path = self.handoff_path();
        let body = serde_json::to_vec_pretty(descriptor)?;

        let temp_path = self
            .cache_dir
            .join(format!(".{HANDOFF_FILE}.tmp-{}", std::process::id()));
        fs::write(&temp_path, &body)?;
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        tracing::debug!(path = %path.display(), bytes = body.len(), "Handoff artifact written");
        Ok(path)
    }

    /// Reads a handoff artifact back. Used on the worker side.
    pub fn load(path: &Path) -> Result<JobDescriptor> {
        let contents = fs::read(path)?;
        Ok(serde_json::from_slice(&contents)?)
    }
}
