//! Extraction builder.
//!
//! Extractions bridge compile builders and publishable runtime images: a
//! new image is the `mergeWith` base overlaid with files copied out of the
//! `runIn` image, or straight off the local filesystem when the artifact
//! lives under a mounted code volume.
//!
//! The build assembles one tar stream: source-tree artifacts read from
//! their host paths, in-container artifacts fetched through the engine's
//! copy operation, and a synthetic Dockerfile of `FROM`/`COPY` lines at
//! the end. The engine builds that context into the output tag.

use crate::engine::RunSpec;
use crate::error::{Error, Result};
use crate::fsutil::clean_path;
use crate::graph::Ref;
use crate::tag::ImageTag;
use crate::tarball::ContextBuilder;
use crate::Orchestrator;
use crate::Stamp;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One artifact copied by an extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path of the artifact as the build container sees it.
    pub built_path: String,
    /// Directory (or file path) it lands at in the output image.
    pub destination_dir: String,
}

/// Builds `repository:name` by merging artifacts into a base image.
#[derive(Debug, Clone)]
pub struct ExtractionBuilder {
    pub tag: ImageTag,
    /// Image the artifacts were built in.
    pub run_in: Ref,
    /// Image the artifacts are layered onto.
    pub merge_with: Ref,
    pub artifacts: Vec<Artifact>,
}

/// Artifact classification against the mounted code volumes.
struct Classified {
    /// Built path -> real host path, for artifacts under a code volume.
    source_paths: BTreeMap<String, PathBuf>,
}

impl Orchestrator {
    /// Splits artifacts into "on the host, under a code volume" and
    /// "inside the runIn image". A destination under a code volume is a
    /// configuration error: extractions must not write into the source
    /// tree.
    fn classify_artifacts(&self, b: &ExtractionBuilder) -> Result<Classified> {
        let mut source_paths = BTreeMap::new();
        for artifact in &b.artifacts {
            if artifact.built_path.is_empty() || artifact.destination_dir.is_empty() {
                return Err(Error::Config(format!(
                    "an artifact of {} must define both BuiltPath and DestinationDir",
                    b.tag
                )));
            }
            let built = clean_path(Path::new(&artifact.built_path));
            let destination = clean_path(Path::new(&artifact.destination_dir));

            for volume in &self.code_volumes {
                let mount = clean_path(Path::new(&volume.mounted_at));
                if destination.starts_with(&mount) {
                    return Err(Error::Config(format!(
                        "should not be copying things into the source directories for extraction: {}",
                        artifact.destination_dir
                    )));
                }
                if let Ok(rest) = built.strip_prefix(&mount) {
                    source_paths.insert(
                        artifact.built_path.clone(),
                        volume.host_dir.join(rest),
                    );
                }
            }
        }
        Ok(Classified { source_paths })
    }

    /// Latest mtime across the host trees of source-classified artifacts.
    fn source_latest(&self, classified: &Classified) -> Result<Option<Stamp>> {
        let mut best: Option<Stamp> = None;
        for host_path in classified.source_paths.values() {
            if let Some(t) = self.workspace.last_time_in_tree(host_path)? {
                if best.is_none_or(|b| t > b) {
                    best = Some(t);
                }
            }
        }
        Ok(best)
    }

    /// Staleness, short-circuiting left to right: absent tag; older than
    /// the runIn node; older than the mergeWith node; older than the
    /// newest source-tree artifact; and (behind the `container-mtime-ood`
    /// feature) older than the newest in-container artifact.
    pub(crate) async fn extraction_out_of_date(
        &mut self,
        b: &ExtractionBuilder,
    ) -> Result<(Option<Stamp>, bool)> {
        let tag = b.tag.to_string();
        let Some(t) = self.tag_time(&tag).await? else {
            info!("building {} (tag not found)", tag);
            return Ok((None, true));
        };

        for reference in [&b.run_in, &b.merge_with] {
            if let Some(id) = reference.node_id() {
                if self.node_time(id).is_some_and(|rt| t < rt) {
                    info!(
                        "building {} (out of date with respect to {})",
                        tag,
                        self.node_tag(id)
                    );
                    return Ok((None, true));
                }
            }
        }

        let classified = self.classify_artifacts(b)?;
        if self.source_latest(&classified)?.is_some_and(|s| t < s) {
            info!("building {} (out of date with respect to source artifact)", tag);
            return Ok((None, true));
        }

        #[cfg(feature = "container-mtime-ood")]
        if self.container_artifacts_newer(b, &classified, t).await? {
            info!(
                "building {} (out of date with respect to container artifact)",
                tag
            );
            return Ok((None, true));
        }

        info!("'{}' is up to date", tag);
        Ok((Some(t), false))
    }

    /// Asks the engine for the newest mtime among artifacts that live in
    /// the runIn image, by pulling each one as a tar stream from a
    /// throwaway container.
    #[cfg(feature = "container-mtime-ood")]
    async fn container_artifacts_newer(
        &mut self,
        b: &ExtractionBuilder,
        classified: &Classified,
        t: Stamp,
    ) -> Result<bool> {
        let retrievable: Vec<&Artifact> = b
            .artifacts
            .iter()
            .filter(|a| !classified.source_paths.contains_key(&a.built_path))
            .collect();
        if retrievable.is_empty() {
            debug!("no artifacts inside the container, skipping engine probe");
            return Ok(false);
        }

        let container = self.throwaway_container(&self.ref_name(&b.run_in)).await?;
        let mut newer = false;
        for artifact in retrievable {
            let archive = self
                .engine
                .copy_from_container(&container, &artifact.built_path)
                .await?;
            if crate::tarball::newest_mtime(&archive)?.is_some_and(|m| t < m) {
                newer = true;
                break;
            }
        }
        if let Err(e) = self.engine.remove_container(&container).await {
            debug!("couldn't remove probe container: {}", e);
        }
        Ok(newer)
    }

    /// Creates a short-lived container so the engine can serve
    /// copy-from-container requests against the image's filesystem.
    async fn throwaway_container(&self, image: &str) -> Result<String> {
        let spec = RunSpec {
            image: image.to_string(),
            ..Default::default()
        };
        let outcome = self
            .engine
            .run(&spec, &["/bin/true".to_string()])
            .await?;
        Ok(outcome.container_id)
    }

    /// Assembles the extraction context and has the engine build it.
    pub(crate) async fn extraction_build(&mut self, b: &ExtractionBuilder) -> Result<Stamp> {
        let classified = self.classify_artifacts(b)?;
        let mut ctx = ContextBuilder::new(&self.ref_name(&b.merge_with));

        // Source-tree artifacts go into the tarball straight off the host.
        let mut retrievable: Vec<&Artifact> = Vec::new();
        for artifact in &b.artifacts {
            match classified.source_paths.get(&artifact.built_path) {
                Some(host_path) => {
                    debug!(
                        "artifact {} found in source tree at {}",
                        artifact.built_path,
                        host_path.display()
                    );
                    ctx.add_path(host_path, &artifact.built_path)?;
                    ctx.copy_line(&artifact.built_path, &artifact.destination_dir);
                }
                None => retrievable.push(artifact),
            }
        }

        // The rest come out of the runIn image through the engine.
        if !retrievable.is_empty() {
            debug!("starting container to retrieve {} artifacts", retrievable.len());
            let container = self.throwaway_container(&self.ref_name(&b.run_in)).await?;
            for artifact in retrievable {
                let archive = self
                    .engine
                    .copy_from_container(&container, &artifact.built_path)
                    .await?;
                ctx.add_container_archive(&archive, &artifact.destination_dir)?;
            }
            if let Err(e) = self.engine.remove_container(&container).await {
                debug!("couldn't remove retrieval container: {}", e);
            }
        }

        let context = ctx.finish()?;
        let options = crate::engine::BuildOptions {
            no_cache: true,
            remove_temp_containers: true,
        };
        self.engine
            .build(&options, context, &b.tag.to_string())
            .await?;

        let stamp = self.inspect_fresh_tag(&b.tag.to_string()).await?;
        debug!("done copying, time for {} is {}", b.tag, stamp);
        Ok(stamp)
    }
}
