use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::discovery::{FsImageDiscovery, ImageDiscovery};
use crate::error::ValidationError;
use crate::task::TaskKind;

/// Identifies one dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw text inputs exactly as the front-end collected them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionForm {
    pub task: String,
    pub source: String,
    pub reference: String,
    pub output: String,
}

impl SubmissionForm {
    pub fn new(task: TaskKind) -> Self {
        Self {
            task: task.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn source(mut self, path: impl Into<String>) -> Self {
        self.source = path.into();
        self
    }

    pub fn reference(mut self, path: impl Into<String>) -> Self {
        self.reference = path.into();
        self
    }

    pub fn output(mut self, path: impl Into<String>) -> Self {
        self.output = path.into();
        self
    }
}

/// Immutable description of one task submission.
///
/// This is also the on-disk shape of the handoff artifact: `reference` is
/// omitted entirely for tasks that do not use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    task: TaskKind,
    source: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reference: Option<Vec<PathBuf>>,
    output: PathBuf,
}

impl JobDescriptor {
    pub fn task(&self) -> TaskKind {
        self.task
    }

    pub fn source(&self) -> &[PathBuf] {
        &self.source
    }

    pub fn reference(&self) -> Option<&[PathBuf]> {
        self.reference.as_deref()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Number of images the worker will read.
    pub fn image_count(&self) -> usize {
        self.source.len() + self.reference.as_ref().map_or(0, Vec::len)
    }
}

/// Validates a [`SubmissionForm`] and resolves it into a [`JobDescriptor`].
#[derive(Clone)]
pub struct JobBuilder {
    discovery: Arc<dyn ImageDiscovery>,
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new(Arc::new(FsImageDiscovery::default()))
    }
}

impl JobBuilder {
    pub fn new(discovery: Arc<dyn ImageDiscovery>) -> Self {
        Self { discovery }
    }

    /// Output is checked before anything task-specific since every task
    /// writes results. For clustering the reference field is never read.
    pub fn build(&self, form: &SubmissionForm) -> Result<JobDescriptor, ValidationError> {
        let output = form.output.trim();
        if output.is_empty() {
            return Err(ValidationError::OutputNotSelected);
        }
        let output = std::path::absolute(output).map_err(|e| ValidationError::Discovery {
            path: output.to_string(),
            message: e.to_string(),
        })?;

        let task: TaskKind = form.task.parse()?;
        let source = form.source.trim();

        let descriptor = match task {
            TaskKind::FaceSearch | TaskKind::Dp2Match => {
                let reference = form.reference.trim();
                if source.is_empty() {
                    return Err(ValidationError::PathNotSelected("source"));
                }
                if reference.is_empty() {
                    return Err(ValidationError::PathNotSelected("reference"));
                }
                JobDescriptor {
                    task,
                    source: self.discovery.search_all_images(Path::new(source))?,
                    reference: Some(self.discovery.search_all_images(Path::new(reference))?),
                    output,
                }
            }
            TaskKind::Clustering => {
                if source.is_empty() {
                    return Err(ValidationError::PathNotSelected("source"));
                }
                JobDescriptor {
                    task,
                    source: self.discovery.search_all_images(Path::new(source))?,
                    reference: None,
                    output,
                }
            }
        };

        tracing::debug!(
            task = %descriptor.task,
            source = descriptor.source.len(),
            reference = descriptor.reference.as_ref().map(Vec::len),
            output = %descriptor.output.display(),
            "Job descriptor built",
        );
        Ok(descriptor)
    }
}
