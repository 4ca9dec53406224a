use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The image-analysis tasks an operator can submit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// Find every source image containing a face from the reference set.
    #[default]
    FaceSearch,
    /// Group source images by the people that appear in them.
    Clustering,
    /// Match DP2 source images against a labelled reference set.
    Dp2Match,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::FaceSearch, TaskKind::Clustering, TaskKind::Dp2Match];

    /// Wire name used in the handoff artifact.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::FaceSearch => "FACE_SEARCH",
            TaskKind::Clustering => "CLUSTERING",
            TaskKind::Dp2Match => "DP2_MATCH",
        }
    }

    /// Label shown on the task selector.
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::FaceSearch => "Face Search",
            TaskKind::Clustering => "Cluster",
            TaskKind::Dp2Match => "DP2 Match",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            TaskKind::FaceSearch => {
                "Face Search: select a source folder to search, a reference folder with the \
                 faces to look for, and an output folder for the matches."
            }
            TaskKind::Clustering => {
                "Clustering: select a source folder and an output folder. Images are grouped \
                 by the people appearing in them. No reference folder is needed."
            }
            TaskKind::Dp2Match => {
                "DP2 Match: select the DP2 source folder, the labelled reference folder, and \
                 an output folder for the matched images."
            }
        }
    }

    /// Whether the task reads a reference folder in addition to the source.
    pub fn requires_reference(self) -> bool {
        matches!(self, TaskKind::FaceSearch | TaskKind::Dp2Match)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts either the wire name or the selector label.
impl FromStr for TaskKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == trimmed || kind.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ValidationError::InvalidTask(trimmed.to_string()))
    }
}
