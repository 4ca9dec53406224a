//! Image discovery used to resolve the selected folders into file lists.
//!
//! [`ImageDiscovery`] is the seam the job builder depends on; the default
//! [`FsImageDiscovery`] walks a directory tree and keeps files whose
//! extension looks like an image.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::ValidationError;

/// Extensions recognised when no configuration overrides them.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp", "heic",
];

/// Resolves a user-selected path into an ordered list of absolute image paths.
pub trait ImageDiscovery: Send + Sync {
    fn search_all_images(&self, root: &Path) -> Result<Vec<PathBuf>, ValidationError>;
}

/// Recursive file-system scanner.
#[derive(Debug, Clone)]
pub struct FsImageDiscovery {
    extensions: Vec<String>,
    max_depth: usize,
}

impl Default for FsImageDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_EXTENSIONS.iter().map(|ext| ext.to_string()))
    }
}

impl FsImageDiscovery {
    pub fn new(extensions: impl IntoIterator<Item = String>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            max_depth: 32,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

impl ImageDiscovery for FsImageDiscovery {
    /// A single image file is accepted as-is; a directory is walked
    /// recursively. Hidden entries are skipped and the result is sorted so
    /// the descriptor is stable between runs.
    fn search_all_images(&self, root: &Path) -> Result<Vec<PathBuf>, ValidationError> {
        let discovery_error = |message: String| ValidationError::Discovery {
            path: root.display().to_string(),
            message,
        };

        let root = std::path::absolute(root).map_err(|e| discovery_error(e.to_string()))?;
        if !root.exists() {
            return Err(discovery_error("path does not exist".into()));
        }
        if root.is_file() {
            return Ok(if self.is_image(&root) { vec![root] } else { Vec::new() });
        }

        let mut images = Vec::new();
        let walker = WalkDir::new(&root)
            .max_depth(self.max_depth)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && self.is_image(entry.path()) {
                images.push(entry.into_path());
            }
        }

        images.sort();
        tracing::debug!(root = %root.display(), count = images.len(), "Image search complete");
        Ok(images)
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}
