//! Workspace filesystem helpers.
//!
//! Every directory in the configuration file is relative to the file
//! itself, so the same configuration works from any checkout location.
//! [`Workspace`] owns that resolution plus the recursive latest-mtime
//! scans that drive out-of-date decisions.

use crate::error::{Error, Result};
use crate::Stamp;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// Filesystem context anchored at the configuration file.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Directory holding the configuration file.
    base: PathBuf,
    /// Full path of the configuration file itself.
    config_file: PathBuf,
}

impl Workspace {
    /// Creates a workspace for a configuration file. The file must exist;
    /// commands fail early rather than half-way through a build.
    pub fn new(config_file: &Path) -> Result<Self> {
        fs::metadata(config_file)?;
        let base = config_file
            .parent()
            .ok_or_else(|| Error::Config(format!("{} has no parent directory", config_file.display())))?
            .to_path_buf();
        Ok(Self {
            base,
            config_file: config_file.to_path_buf(),
        })
    }

    /// Path of the configuration file this workspace was created from.
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Reads the configuration file's text.
    pub fn config_text(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.config_file)?)
    }

    /// Resolves a configuration-relative directory to a real path.
    pub fn resolve(&self, dir: &str) -> PathBuf {
        clean_path(&self.base.join(dir))
    }

    /// Checks that `dir` (relative) contains a Dockerfile.
    pub fn check_dockerfile(&self, dir: &str) -> Result<()> {
        let path = self.resolve(dir).join("Dockerfile");
        fs::metadata(&path)
            .map_err(|e| Error::Config(format!("looked for {}: {e}", path.display())))?;
        Ok(())
    }

    /// Modification time of a configuration-relative file.
    pub fn file_mtime(&self, path: &str) -> Result<Stamp> {
        let full = self.resolve(path);
        let meta = fs::metadata(&full)?;
        Ok(to_stamp(meta.modified()?))
    }

    /// Latest modification time of any file under a configuration-relative
    /// directory, recursing into subdirectories. `None` for an empty tree.
    pub fn last_time_in_dir(&self, dir: &str) -> Result<Option<Stamp>> {
        last_time_in_tree(&self.resolve(dir))
    }

    /// Latest modification time under an absolute path.
    pub fn last_time_in_tree(&self, path: &Path) -> Result<Option<Stamp>> {
        last_time_in_tree(path)
    }
}

/// Recursively finds the newest file mtime in a tree. Directories
/// themselves do not count, only the files within them.
fn last_time_in_tree(path: &Path) -> Result<Option<Stamp>> {
    let meta = fs::metadata(path)?;
    if !meta.is_dir() {
        return Ok(Some(to_stamp(meta.modified()?)));
    }
    let mut best: Option<Stamp> = None;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if let Some(t) = last_time_in_tree(&entry.path())? {
            if best.is_none_or(|b| t > b) {
                best = Some(t);
            }
        }
    }
    Ok(best)
}

/// Converts a filesystem timestamp into the orchestrator's stamp type.
pub fn to_stamp(t: std::time::SystemTime) -> Stamp {
    DateTime::<Utc>::from(t)
}

/// Lexically cleans a path: resolves `.` and `..` components without
/// touching the filesystem, so prefix comparisons behave predictably.
pub fn clean_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn workspace_in(dir: &TempDir) -> Workspace {
        let conf = dir.path().join("Pickett.json");
        File::create(&conf).unwrap().write_all(b"{}").unwrap();
        Workspace::new(&conf).unwrap()
    }

    #[test]
    fn resolve_is_relative_to_config_file() {
        let dir = TempDir::new().unwrap();
        let ws = workspace_in(&dir);
        assert_eq!(ws.resolve("mydir"), clean_path(&dir.path().join("mydir")));
    }

    #[test]
    fn last_time_recurses_into_subdirectories() {
        let dir = TempDir::new().unwrap();
        let ws = workspace_in(&dir);
        fs::create_dir_all(dir.path().join("tree/deep")).unwrap();
        File::create(dir.path().join("tree/a")).unwrap();
        File::create(dir.path().join("tree/deep/b")).unwrap();

        let latest = ws.last_time_in_dir("tree").unwrap();
        assert!(latest.is_some());
    }

    #[test]
    fn empty_directory_has_no_latest_time() {
        let dir = TempDir::new().unwrap();
        let ws = workspace_in(&dir);
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        assert_eq!(ws.last_time_in_dir("empty").unwrap(), None);
    }

    #[test]
    fn clean_path_resolves_dots() {
        assert_eq!(
            clean_path(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }
}
