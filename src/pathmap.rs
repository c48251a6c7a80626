//! Host-to-VM path translation.
//!
//! When the engine endpoint is remote (TCP), bind-mount sources name paths
//! on the VM that hosts the engine, not on this machine. The translator
//! queries the local VM manager for its shared-folder mappings and
//! rewrites any path under a shared source to the corresponding mount.
//! When no mapping can be discovered, it falls back to re-rooting
//! `$HOME/…` at `/vagrant/…`.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Rewrites host paths into engine-visible paths.
#[derive(Debug, Clone, Default)]
pub struct PathTranslator {
    /// Shared-folder mappings: host source prefix to VM mount path.
    mappings: Vec<(PathBuf, String)>,
}

impl PathTranslator {
    /// Translator with explicit mappings. Used directly in tests; the
    /// binary uses [`PathTranslator::discover`].
    pub fn from_mappings(mappings: Vec<(PathBuf, String)>) -> Self {
        Self { mappings }
    }

    /// Queries the VM manager for shared-folder mappings. Any failure
    /// (no `vboxmanage`, zero or many running VMs, unparseable output)
    /// yields an empty mapping set, leaving only the `$HOME` fallback.
    pub async fn discover() -> Self {
        match query_shared_folders().await {
            Ok(mappings) => {
                debug!("vm shared-folder mappings: {:?}", mappings);
                Self { mappings }
            }
            Err(e) => {
                debug!("no vm path mappings discovered ({e}), relying on $HOME fallback");
                Self::default()
            }
        }
    }

    /// Maps one host path to its engine-visible equivalent.
    pub fn translate(&self, path: &Path) -> Result<String> {
        for (source, mount) in &self.mappings {
            if let Ok(rest) = path.strip_prefix(source) {
                let rest = rest.to_string_lossy();
                let result = if rest.is_empty() {
                    mount.clone()
                } else {
                    format!("{mount}/{rest}")
                };
                debug!("code volume {} converted to {}", path.display(), result);
                return Ok(result);
            }
        }

        // No mapping matched: guess the conventional /vagrant layout.
        let home = std::env::var("HOME").map_err(|_| Error::PathTranslation {
            path: path.display().to_string(),
            reason: "no HOME environment variable set, can't guess a vagrant mapping".to_string(),
        })?;
        let rest = path
            .strip_prefix(&home)
            .map_err(|_| Error::PathTranslation {
                path: path.display().to_string(),
                reason: format!("no shared-folder mapping and not under {home}"),
            })?;
        let guessed = format!("/vagrant/{}", rest.to_string_lossy());
        warn!(
            "no vm mappings, guessing {} -> {}",
            path.display(),
            guessed
        );
        Ok(guessed)
    }
}

/// True when the engine endpoint implies the engine runs in a VM.
pub fn needs_translation(engine_host: &str) -> bool {
    if engine_host.starts_with("tcp://") {
        return true;
    }
    debug!("engine endpoint isn't tcp://, assuming local and skipping path translation");
    false
}

/// Asks the VM manager about the single running VM's shared folders.
async fn query_shared_folders() -> Result<Vec<(PathBuf, String)>> {
    let out = Command::new("vboxmanage")
        .args(["list", "runningvms"])
        .output()
        .await?;
    if !out.status.success() {
        return Err(Error::Internal("vboxmanage list runningvms failed".into()));
    }
    let listing = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<&str> = listing.trim().lines().collect();
    if lines.len() != 1 {
        return Err(Error::Internal(format!(
            "expected exactly one running VM, found {}",
            lines.len()
        )));
    }
    let id = lines[0]
        .split('{')
        .nth(1)
        .map(|s| s.trim_end_matches('}'))
        .ok_or_else(|| Error::Internal("can't understand vboxmanage vm listing".into()))?
        .to_string();

    let out = Command::new("vboxmanage")
        .args(["showvminfo", &id, "--machinereadable"])
        .output()
        .await?;
    if !out.status.success() {
        return Err(Error::Internal("vboxmanage showvminfo failed".into()));
    }
    Ok(parse_shared_folders(&String::from_utf8_lossy(&out.stdout)))
}

/// Pulls `SharedFolder{Name,Path}MachineMapping<N>` pairs out of
/// machine-readable VM info. Shared folders are assumed mounted at
/// `/<name>` inside the VM.
fn parse_shared_folders(info: &str) -> Vec<(PathBuf, String)> {
    use std::collections::BTreeMap;
    let mut names: BTreeMap<String, String> = BTreeMap::new();
    let mut paths: BTreeMap<String, String> = BTreeMap::new();
    for line in info.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim_matches('"').to_string();
        if let Some(num) = key.strip_prefix("SharedFolderNameMachineMapping") {
            names.insert(num.to_string(), value);
        } else if let Some(num) = key.strip_prefix("SharedFolderPathMachineMapping") {
            paths.insert(num.to_string(), value);
        }
    }
    let mut mappings = Vec::new();
    for (num, host_path) in paths {
        if let Some(name) = names.get(&num) {
            mappings.push((PathBuf::from(host_path), format!("/{name}")));
        }
    }
    mappings
}
