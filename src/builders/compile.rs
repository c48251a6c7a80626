//! In-container compile builder.
//!
//! Given a base image with the toolchain and a list of packages, produce a
//! new image containing the built artifacts. One container runs per
//! package; each exited container is committed and becomes the base for
//! the next package, so the final commit sees every artifact. The final
//! commit is tagged as the builder's output.
//!
//! ## Staleness
//!
//! Checked in order, first hit wins:
//!
//! 1. output tag absent;
//! 2. output older than the base image node;
//! 3. a configured dependency-lock file newer than the output;
//! 4. the probe: either a per-package dry-run command whose non-empty
//!    output marks the package stale, or a source-directory mtime check
//!    against mounted code volumes.

use crate::engine::RunSpec;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::tag::ImageTag;
use crate::Orchestrator;
use crate::Stamp;
use tracing::{debug, info};

/// How a compile builder decides its sources went stale.
#[derive(Debug, Clone)]
pub enum Probe {
    /// Run this command per package in the base image; any output means
    /// the package needs rebuilding.
    Command(String),
    /// Compare the recursive latest mtime of a directory (relative to the
    /// config file) against the output tag's time. Used when sources
    /// arrive through code volumes and the toolchain has no dry-run mode.
    SourceDirCheck(String),
}

/// Builds `repository:name` by compiling packages inside a base image.
#[derive(Debug, Clone)]
pub struct CompileBuilder {
    pub tag: ImageTag,
    /// Node of the image the compiles run in. Wired in the edge pass.
    pub run_in: Option<NodeId>,
    pub packages: Vec<String>,
    /// Build command, split into argv and given one package at a time.
    pub command: String,
    pub probe: Probe,
    /// Dependency-lock file (relative to the config file) whose mtime
    /// invalidates the output.
    pub lock_file: Option<String>,
}

impl CompileBuilder {
    fn run_in(&self) -> Result<NodeId> {
        self.run_in
            .ok_or_else(|| Error::Internal(format!("compile builder {} was never wired", self.tag)))
    }
}

impl Orchestrator {
    pub(crate) async fn compile_out_of_date(
        &mut self,
        b: &CompileBuilder,
    ) -> Result<(Option<Stamp>, bool)> {
        let run_in = b.run_in()?;
        let tag = b.tag.to_string();

        let Some(t) = self.tag_time(&tag).await? else {
            info!("building {} (tag not found)", tag);
            return Ok((None, true));
        };
        if let Some(base_time) = self.node_time(run_in) {
            if t < base_time {
                info!(
                    "building {} (out of date with respect to '{}')",
                    tag,
                    self.node_tag(run_in)
                );
                return Ok((None, true));
            }
        }

        // A dependency-lock file short-circuits the probe entirely.
        if let Some(lock) = &b.lock_file {
            let mtime = self.workspace.file_mtime(lock)?;
            debug!("mod time of {} is {}", lock, mtime);
            if t < mtime {
                return Ok((Some(mtime), true));
            }
            info!("'{}' is up to date with respect to {}", tag, lock);
            return Ok((Some(t), false));
        }

        match &b.probe {
            Probe::SourceDirCheck(dir) => {
                let latest = self.workspace.last_time_in_dir(dir)?;
                if latest.is_some_and(|l| t < l) {
                    info!("building {} (out of date with respect to source in {})", tag, dir);
                    return Ok((None, true));
                }
            }
            Probe::Command(probe) => {
                if self.probe_packages(b, probe).await? {
                    return Ok((None, true));
                }
            }
        }

        info!("'{}' is up to date with respect to its source code", tag);
        Ok((Some(t), false))
    }

    /// Runs the probe command once per package in the base image. Any
    /// package producing output marks the whole tag stale. Probe
    /// containers are throwaways and are removed once read.
    async fn probe_packages(&mut self, b: &CompileBuilder, probe: &str) -> Result<bool> {
        let run_in = b.run_in()?;
        let image = self.node_tag(run_in);
        let volumes = self.volume_binds()?;

        for pkg in &b.packages {
            let mut argv: Vec<String> = probe.split_whitespace().map(str::to_string).collect();
            argv.push(pkg.clone());

            let spec = RunSpec {
                image: image.clone(),
                volumes: volumes.clone(),
                wait: true,
                ..Default::default()
            };
            let outcome = self.engine.run(&spec, &argv).await?;
            let output = outcome.output.unwrap_or_default();
            let stale = !output.trim().is_empty();
            if stale {
                info!(
                    "building {} (out of date with respect to source in {})",
                    b.tag, pkg
                );
                debug!("probe output for {}: {}", pkg, output.trim());
            }
            if let Err(e) = self.engine.remove_container(&outcome.container_id).await {
                debug!("couldn't remove probe container: {}", e);
            }
            if stale {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Runs the build command per package, committing each exited
    /// container on top of the previous, then tags the final commit.
    pub(crate) async fn compile_build(&mut self, b: &CompileBuilder) -> Result<Stamp> {
        let run_in = b.run_in()?;
        let volumes = self.volume_binds()?;
        let mut base = self.node_tag(run_in);
        let mut last_commit: Option<String> = None;

        for pkg in &b.packages {
            let mut argv: Vec<String> = b.command.split_whitespace().map(str::to_string).collect();
            argv.push(pkg.clone());

            let spec = RunSpec {
                image: base.clone(),
                volumes: volumes.clone(),
                attach: true,
                wait: true,
                ..Default::default()
            };
            let outcome = self.engine.run(&spec, &argv).await?;
            if let Some(status) = outcome.exit_status {
                if status != 0 {
                    return Err(Error::BuildCommandFailed {
                        tag: b.tag.to_string(),
                        status,
                    });
                }
            }

            let image_id = self.engine.commit(&outcome.container_id, None).await?;
            debug!("committed {} for package {} -> {}", outcome.container_id, pkg, image_id);
            base = image_id.clone();
            last_commit = Some(image_id);
        }

        let last = last_commit
            .ok_or_else(|| Error::Internal(format!("no packages built for {}", b.tag)))?;
        self.engine.tag_image(&last, true, &b.tag).await?;

        self.inspect_fresh_tag(&b.tag.to_string()).await
    }
}

/// Parses the configured probe string: the `source-dir-check` spelling
/// with a directory argument selects the mtime check, anything else is a
/// command run per package.
pub(crate) fn parse_probe(raw: &str, tag: &ImageTag) -> Result<Probe> {
    let trimmed = raw.trim();
    match trimmed.strip_prefix(crate::constants::SOURCE_DIR_PROBE) {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
            let dir = rest.trim();
            if dir.is_empty() {
                return Err(Error::Config(format!(
                    "probe for {tag} needs a directory argument, like '{} src'",
                    crate::constants::SOURCE_DIR_PROBE
                )));
            }
            Ok(Probe::SourceDirCheck(dir.to_string()))
        }
        _ => Ok(Probe::Command(trimmed.to_string())),
    }
}
