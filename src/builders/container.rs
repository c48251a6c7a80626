//! Image-from-directory builder.
//!
//! The simplest node kind: a directory with a Dockerfile becomes a tagged
//! image. Staleness is a pure timestamp comparison between the directory
//! tree and the image's creation time.

use crate::error::Result;
use crate::graph::NodeId;
use crate::tag::ImageTag;
use crate::tarball;
use crate::Orchestrator;
use crate::Stamp;
use tracing::info;

/// Builds `repository:name` from a Dockerfile directory.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    pub tag: ImageTag,
    /// Directory holding the Dockerfile, relative to the config file.
    pub dir: String,
    /// Other container nodes this one depends on.
    pub in_edges: Vec<NodeId>,
}

impl Orchestrator {
    /// Compares the image's creation time against the newest file under
    /// the build directory (recursively). Equal timestamps count as up to
    /// date, so an absent image and an empty directory agree at zero.
    pub(crate) async fn container_out_of_date(
        &mut self,
        b: &ContainerBuilder,
    ) -> Result<(Option<Stamp>, bool)> {
        let dir_time = self.workspace.last_time_in_dir(&b.dir)?;
        let img_time = self.tag_time(&b.tag.to_string()).await?;

        if dir_newer_than_image(dir_time, img_time) {
            info!(
                "building {} (source directory {} is newer)",
                b.tag, b.dir
            );
            return Ok((None, true));
        }
        info!("'{}' is up to date with respect to its build directory", b.tag);
        Ok((img_time, false))
    }

    /// Packages the directory as a tar build context, streams it to the
    /// engine, and re-inspects the tag for its fresh timestamp.
    pub(crate) async fn container_build(&mut self, b: &ContainerBuilder) -> Result<Stamp> {
        let dir = self.workspace.resolve(&b.dir);
        info!("building tarball in {}", b.dir);
        let context = tarball::pack_dir(&dir)?;

        self.engine
            .build(&self.build_options, context, &b.tag.to_string())
            .await?;

        self.inspect_fresh_tag(&b.tag.to_string()).await
    }
}

/// Strictly-after comparison where "absent" counts as the zero time: an
/// absent image and an empty directory are equal, so nothing rebuilds.
fn dir_newer_than_image(dir: Option<Stamp>, image: Option<Stamp>) -> bool {
    match (dir, image) {
        (Some(d), Some(i)) => d > i,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
