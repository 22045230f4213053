//! Suite discovery and tag extraction on the filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::tags::{decode_suite_text, parse_tags};

/// Directory names never descended into when counting regression suites.
const SKIPPED_DIRS: &[&str] = &[".git", "__pycache__", "logs", "None", "_pdf_cache"];

/// Directory names that mark a suite as part of the regression run.
const REGRESSION_DIRS: &[&str] = &["tests", "testes"];

/// Recognizes runnable suite files and the conventional tests directory.
#[derive(Debug, Clone)]
pub struct SuiteLayout {
    /// Extension without the dot, compared case-insensitively.
    pub extension: String,
    pub tests_dir_name: String,
}

impl SuiteLayout {
    pub fn new(extension: impl Into<String>, tests_dir_name: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            tests_dir_name: tests_dir_name.into(),
        }
    }

    /// True for an existing file with the suite extension.
    pub fn is_runnable_file(&self, path: &Path) -> bool {
        path.is_file() && self.has_suite_extension(path)
    }

    pub fn has_suite_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }

    /// Decide which paths to hand to the runner for `target`.
    ///
    /// A runnable file is its own suite. For a directory, a conventional tests
    /// sub-directory holding runnable files wins (the runner recurses into it);
    /// otherwise the directory itself if anything beneath it is runnable. An empty
    /// result means nothing to run.
    pub fn find_suites(&self, target: &Path) -> Vec<PathBuf> {
        if self.is_runnable_file(target) {
            return vec![target.to_path_buf()];
        }
        if !target.is_dir() {
            return Vec::new();
        }
        let tests_dir = target.join(&self.tests_dir_name);
        if tests_dir.is_dir() && self.contains_runnable(&tests_dir) {
            debug!(dir = %tests_dir.display(), "using tests directory");
            return vec![tests_dir];
        }
        if self.contains_runnable(target) {
            return vec![target.to_path_buf()];
        }
        Vec::new()
    }

    fn contains_runnable(&self, dir: &Path) -> bool {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .any(|entry| entry.file_type().is_file() && self.has_suite_extension(entry.path()))
    }

    /// Count suites the regression run will pick up: runnable files below `root`
    /// that sit under a `tests`/`testes` directory.
    pub fn count_regression_suites(&self, root: &Path) -> usize {
        WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry))
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && self.has_suite_extension(entry.path()))
            .filter(|entry| under_regression_dir(root, entry.path()))
            .count()
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

fn under_regression_dir(root: &Path, path: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    let Some(parent) = rel.parent() else {
        return false;
    };
    parent
        .components()
        .skip(1)
        .any(|c| c.as_os_str().to_str().is_some_and(|n| REGRESSION_DIRS.contains(&n)))
}

/// Extract declared tags from a suite file, read fresh on every call.
///
/// Unreadable files yield no tags.
pub fn extract_tags(path: &Path) -> Vec<String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "failed to read suite");
            return Vec::new();
        }
    };
    let tags = parse_tags(&decode_suite_text(&bytes));
    debug!(path = %path.display(), ?tags, "extracted tags");
    tags
}
