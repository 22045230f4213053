//! Sandboxed directory listing for the project browser.

use std::fs;

use anyhow::Context;
use serde::Serialize;
use tracing::debug;

use crate::error::RunError;
use crate::io::sandbox::PathSandbox;

const HIDDEN_NAMES: &[&str] = &["__pycache__", ".git"];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
    /// `/`-separated path relative to the project root.
    pub rel: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DirListing {
    pub path: String,
    pub items: Vec<DirEntryInfo>,
}

/// List one directory: directories first, then names case-insensitively.
pub fn list_dir(sandbox: &PathSandbox, rel: &str) -> Result<DirListing, RunError> {
    let dir = sandbox.resolve(rel)?;
    if !dir.exists() {
        return Err(RunError::TargetNotFound {
            path: rel.to_string(),
        });
    }
    if !dir.is_dir() {
        return Err(RunError::InvalidPath {
            path: rel.to_string(),
        });
    }

    let mut items = Vec::new();
    let entries = fs::read_dir(&dir).with_context(|| format!("read dir {}", dir.display()))?;
    for entry in entries {
        let entry = entry.context("read dir entry")?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if HIDDEN_NAMES.contains(&name.as_str()) {
            continue;
        }
        let path = entry.path();
        let Some(rel) = sandbox.relative(&path) else {
            continue;
        };
        items.push(DirEntryInfo {
            is_dir: path.is_dir(),
            name,
            rel,
        });
    }
    items.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    debug!(path = rel, count = items.len(), "listed directory");

    Ok(DirListing {
        path: rel.to_string(),
        items,
    })
}
