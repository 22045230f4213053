//! Pure validation of run requests against the allow-list and tag vocabulary.

use serde::Deserialize;

use crate::core::path::normalize_rel;
use crate::core::tags::normalize_tag;
use crate::error::RunError;

/// A caller's request to run one suite with one tag.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RunRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub tag: String,
}

impl RunRequest {
    pub fn new(path: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tag: tag.into(),
        }
    }

    /// Path with separators unified and the leading `/` stripped.
    pub fn normalized_path(&self) -> String {
        normalize_rel(&self.path)
    }

    /// Tag with whitespace removed and lower-cased.
    pub fn normalized_tag(&self) -> String {
        normalize_tag(&self.tag)
    }
}

/// Reject paths outside the fixed allow-list. `rel` must already be normalized.
pub fn check_allowed(allowed: &[String], rel: &str) -> Result<(), RunError> {
    if rel.is_empty() {
        return Err(RunError::InvalidPath {
            path: rel.to_string(),
        });
    }
    if allowed.iter().any(|entry| normalize_rel(entry) == rel) {
        return Ok(());
    }
    Err(RunError::NotAllowed {
        path: rel.to_string(),
    })
}

/// Reject tags that are not part of the known vocabulary.
pub fn check_vocabulary(vocabulary: &[String], tag: &str, rel: &str) -> Result<(), RunError> {
    if !tag.is_empty() && vocabulary.iter().any(|known| normalize_tag(known) == tag) {
        return Ok(());
    }
    Err(RunError::TagNotPermitted {
        tag: tag.to_string(),
        path: rel.to_string(),
        available: Vec::new(),
    })
}

/// Reject tags the suite does not declare.
///
/// A suite with no detected tags rejects every tag. The parser is best-effort, and
/// running a suite whose tags could not be read would silently match nothing.
pub fn check_suite_tags(suite_tags: &[String], tag: &str, rel: &str) -> Result<(), RunError> {
    if !suite_tags.is_empty() && suite_tags.iter().any(|t| t == tag) {
        return Ok(());
    }
    Err(RunError::TagNotPermitted {
        tag: tag.to_string(),
        path: rel.to_string(),
        available: suite_tags.to_vec(),
    })
}
