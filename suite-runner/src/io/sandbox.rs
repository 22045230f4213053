//! Resolution of caller-supplied paths inside the project root.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::path::normalize_rel;
use crate::error::RunError;

/// A fixed project root that resolved paths can never leave.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Canonicalize `root` once; it must exist.
    pub fn new(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("canonicalize project root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `rel` against the root, following `..` and symlinks.
    ///
    /// The result is the root itself or a descendant of it; anything else is
    /// `InvalidPath`. Missing paths still resolve (the existence check belongs to the
    /// caller), with every existing prefix canonicalized.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, RunError> {
        let invalid = || RunError::InvalidPath {
            path: rel.to_string(),
        };
        let normalized = normalize_rel(rel);
        match resolve_within(&self.root, Path::new(&normalized)) {
            Ok(Some(resolved)) => {
                debug!(path = rel, resolved = %resolved.display(), "resolved path");
                Ok(resolved)
            }
            Ok(None) => {
                warn!(path = rel, "path escapes project root");
                Err(invalid())
            }
            Err(err) => {
                warn!(path = rel, err = %err, "failed to canonicalize path");
                Err(invalid())
            }
        }
    }

    /// Render an absolute path inside the root as a `/`-separated relative path.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

/// Walk `rel` one component at a time from `root`.
///
/// Every component that exists is canonicalized before the next one is applied,
/// so `..` always pops the real parent of a symlink target. Returns `None` as soon
/// as the walk leaves `root`.
fn resolve_within(root: &Path, rel: &Path) -> io::Result<Option<PathBuf>> {
    let mut resolved = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                match fs::symlink_metadata(&resolved) {
                    Ok(_) => resolved = resolved.canonicalize()?,
                    Err(err)
                        if matches!(
                            err.kind(),
                            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                        ) => {}
                    Err(err) => return Err(err),
                }
            }
            Component::RootDir | Component::Prefix(_) => return Ok(None),
        }
        if !resolved.starts_with(root) {
            return Ok(None);
        }
    }
    Ok(Some(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, PathSandbox) {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project");
        fs::create_dir_all(project.join("parte1/tests")).expect("mkdir");
        fs::write(project.join("parte1/tests/a.robot"), "").expect("write");
        let sandbox = PathSandbox::new(&project).expect("sandbox");
        (temp, sandbox)
    }

    #[test]
    fn resolves_descendants() {
        let (_temp, sandbox) = sandbox();
        let resolved = sandbox.resolve("parte1/tests/a.robot").expect("resolve");
        assert_eq!(resolved, sandbox.root().join("parte1/tests/a.robot"));
        assert_eq!(
            sandbox.relative(&resolved).as_deref(),
            Some("parte1/tests/a.robot")
        );
    }

    #[test]
    fn root_itself_is_allowed() {
        let (_temp, sandbox) = sandbox();
        assert_eq!(sandbox.resolve("").expect("root"), sandbox.root());
        assert_eq!(sandbox.resolve("/").expect("root"), sandbox.root());
        assert_eq!(sandbox.resolve("parte1/..").expect("root"), sandbox.root());
    }

    #[test]
    fn rejects_parent_traversal() {
        let (_temp, sandbox) = sandbox();
        for rel in [
            "..",
            "../",
            "../project-other",
            "parte1/../../etc/passwd",
            "..\\..\\windows",
            "parte1/tests/../../../x",
        ] {
            let err = sandbox.resolve(rel).expect_err(rel);
            assert_eq!(err.kind(), "invalid_path", "{rel}");
        }
    }

    #[test]
    fn absolute_prefixes_stay_inside_root() {
        let (_temp, sandbox) = sandbox();
        let resolved = sandbox.resolve("/etc/passwd").expect("resolve");
        assert!(resolved.starts_with(sandbox.root()));
        assert_eq!(resolved, sandbox.root().join("etc/passwd"));
    }

    #[test]
    fn missing_paths_resolve_inside_root() {
        let (_temp, sandbox) = sandbox();
        let resolved = sandbox.resolve("parte9/missing/../x.robot").expect("resolve");
        assert_eq!(resolved, sandbox.root().join("parte9/x.robot"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let (temp, sandbox) = sandbox();
        let outside = temp.path().join("outside");
        fs::create_dir_all(&outside).expect("mkdir");
        std::os::unix::fs::symlink(&outside, sandbox.root().join("link")).expect("symlink");

        let err = sandbox.resolve("link/secret.txt").expect_err("escape");
        assert_eq!(err.kind(), "invalid_path");
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape_behind_missing_component() {
        let (temp, sandbox) = sandbox();
        let outside = temp.path().join("outside");
        fs::create_dir_all(&outside).expect("mkdir");
        fs::write(outside.join("secret.txt"), "secret").expect("write");
        std::os::unix::fs::symlink(&outside, sandbox.root().join("link")).expect("symlink");

        for rel in [
            "nope/../link",
            "nope/../link/secret.txt",
            "nope/deeper/../../link/secret.txt",
            "parte1/nope/../../link/missing/x",
        ] {
            let err = sandbox.resolve(rel).expect_err(rel);
            assert_eq!(err.kind(), "invalid_path", "{rel}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_inside_root_resolve_to_their_target() {
        let (_temp, sandbox) = sandbox();
        std::os::unix::fs::symlink(
            sandbox.root().join("parte1/tests"),
            sandbox.root().join("alias"),
        )
        .expect("symlink");

        let resolved = sandbox.resolve("alias/a.robot").expect("resolve");
        assert_eq!(resolved, sandbox.root().join("parte1/tests/a.robot"));
        assert_eq!(
            sandbox.resolve("alias/..").expect("parent"),
            sandbox.root().join("parte1")
        );
    }

    #[test]
    fn re_entering_root_after_leaving_is_rejected() {
        let (_temp, sandbox) = sandbox();
        let err = sandbox.resolve("../project/parte1").expect_err("left root");
        assert_eq!(err.kind(), "invalid_path");
    }
}
