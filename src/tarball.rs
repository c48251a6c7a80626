//! Tar stream assembly for engine build contexts.
//!
//! Two flavours of context are produced:
//!
//! - a plain archive of a Dockerfile directory ([`pack_dir`]), and
//! - a synthetic context ([`ContextBuilder`]) holding extracted artifacts
//!   plus a generated Dockerfile of `FROM`/`COPY` lines.
//!
//! File mode and mtime are preserved so the engine's layer cache behaves
//! the same as it would for a checked-out directory.

use crate::error::{Error, Result};
use std::fs;
use std::io::Read;
use std::path::Path;
use tar::{Builder, EntryType, Header};
use tracing::debug;

/// Packages a directory as a tar stream, recursing into subdirectories.
/// Entry names are relative to `dir`.
pub fn pack_dir(dir: &Path) -> Result<Vec<u8>> {
    let meta = fs::metadata(dir)?;
    if !meta.is_dir() {
        return Err(Error::Config(format!(
            "expected {} to be a directory",
            dir.display()
        )));
    }
    let mut builder = Builder::new(Vec::new());
    append_tree(&mut builder, dir, "")?;
    Ok(builder.into_inner()?)
}

/// Recursively appends the files of `dir` under `prefix` in the archive.
fn append_tree(builder: &mut Builder<Vec<u8>>, dir: &Path, prefix: &str) -> Result<()> {
    debug!("tarball construction in '{}' (as '{}')", dir.display(), prefix);
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let archive_name = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        };
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            append_tree(builder, &path, &archive_name)?;
        } else {
            append_file(builder, &path, &archive_name)?;
        }
    }
    Ok(())
}

/// Appends a single file, preserving size, mode, and mtime.
fn append_file(builder: &mut Builder<Vec<u8>>, path: &Path, archive_name: &str) -> Result<()> {
    let meta = fs::metadata(path)?;
    let mut header = Header::new_gnu();
    header.set_size(meta.len());
    header.set_mode(file_mode(&meta));
    header.set_mtime(mtime_secs(&meta));
    header.set_entry_type(EntryType::Regular);
    let content = fs::read(path)?;
    builder.append_data(&mut header, archive_name, content.as_slice())?;
    debug!("added {} as {} to tarball", path.display(), archive_name);
    Ok(())
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> u32 {
    0o644
}

fn mtime_secs(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// Synthetic Extraction Contexts
// =============================================================================

/// Accumulates artifact files plus a generated Dockerfile into one build
/// context. The Dockerfile starts `FROM <base>` and gains one `COPY` line
/// per added artifact.
pub struct ContextBuilder {
    tar: Builder<Vec<u8>>,
    dockerfile: String,
}

impl ContextBuilder {
    pub fn new(base_image: &str) -> Self {
        Self {
            tar: Builder::new(Vec::new()),
            dockerfile: format!("FROM {base_image}\n"),
        }
    }

    /// Records a `COPY <source> <destination>` line in the Dockerfile.
    pub fn copy_line(&mut self, source: &str, destination: &str) {
        debug!("COPY {} TO {}.", source, destination);
        self.dockerfile
            .push_str(&format!("COPY {source} {destination}\n"));
    }

    /// Adds a host file or directory tree under `archive_name`.
    ///
    /// Tar entry names must be relative, so a leading `/` is dropped from
    /// the archive name; `COPY` sources keep their configured spelling
    /// (the engine resolves them against the context root either way).
    pub fn add_path(&mut self, host_path: &Path, archive_name: &str) -> Result<()> {
        let archive_name = archive_name.trim_start_matches('/');
        let meta = fs::metadata(host_path)?;
        if meta.is_dir() {
            let mut stack = vec![(host_path.to_path_buf(), archive_name.to_string())];
            while let Some((dir, prefix)) = stack.pop() {
                for entry in fs::read_dir(&dir)? {
                    let entry = entry?;
                    let name = entry.file_name().to_string_lossy().to_string();
                    let child_name = format!("{prefix}/{name}");
                    if entry.file_type()?.is_dir() {
                        stack.push((entry.path(), child_name));
                    } else {
                        append_file(&mut self.tar, &entry.path(), &child_name)?;
                    }
                }
            }
        } else {
            append_file(&mut self.tar, host_path, archive_name)?;
        }
        Ok(())
    }

    /// Re-emits the file entries of a tar stream fetched from a container,
    /// preserving header metadata, and records one `COPY` line per file
    /// into `destination_dir`.
    pub fn add_container_archive(&mut self, archive: &[u8], destination_dir: &str) -> Result<()> {
        let mut reader = tar::Archive::new(archive);
        for entry in reader.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry.path()?.to_string_lossy().to_string();
            debug!("read file from container archive: {}", name);
            let mut header = entry.header().clone();
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            self.dockerfile
                .push_str(&format!("COPY {name} {destination_dir}/{name}\n"));
            self.tar
                .append_data(&mut header, name.clone(), content.as_slice())?;
        }
        Ok(())
    }

    /// Appends the Dockerfile and closes the stream.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let bytes = self.dockerfile.into_bytes();
        let mut header = Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        self.tar
            .append_data(&mut header, "Dockerfile", bytes.as_slice())?;
        Ok(self.tar.into_inner()?)
    }

    /// The Dockerfile text accumulated so far.
    pub fn dockerfile(&self) -> &str {
        &self.dockerfile
    }
}

/// Scans a tar stream for the newest file mtime. Used by the
/// engine-assisted artifact staleness probe.
pub fn newest_mtime(archive: &[u8]) -> Result<Option<crate::Stamp>> {
    let mut reader = tar::Archive::new(archive);
    let mut best: Option<crate::Stamp> = None;
    for entry in reader.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let secs = entry.header().mtime()? as i64;
        if let Some(t) = chrono::DateTime::from_timestamp(secs, 0) {
            if best.is_none_or(|b| t > b) {
                best = Some(t);
            }
        }
    }
    Ok(best)
}
