//! Container engine abstraction.
//!
//! The orchestrator drives every image and container operation through the
//! [`ContainerEngine`] trait. The shipped implementation speaks the Docker
//! Engine HTTP API ([`DockerEngine`]); tests substitute an in-memory fake.
//!
//! All calls are effectively synchronous from the orchestrator's point of
//! view: one command invocation awaits each engine response before issuing
//! the next request.

mod docker;
pub(crate) mod http;

pub use docker::DockerEngine;
pub use http::{Endpoint, Response};

use crate::error::Result;
use crate::tag::ImageTag;
use crate::Stamp;
use async_trait::async_trait;
use std::collections::BTreeMap;

// =============================================================================
// Request Types
// =============================================================================

/// Options forwarded to the engine's image build.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Bypass the engine's layer cache.
    pub no_cache: bool,
    /// Remove intermediate containers after a successful build.
    pub remove_temp_containers: bool,
}

/// Everything needed to create and start one container.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    /// Image tag or id to run.
    pub image: String,
    /// Explicit container name. `None` gets a generated throwaway name.
    pub name: Option<String>,
    /// Tee the container's output to this process's stdout/stderr.
    pub attach: bool,
    /// Block until the container exits and report its status.
    pub wait: bool,
    /// Bind mounts, host path to container path.
    pub volumes: BTreeMap<String, String>,
    /// Exposed ports, container port to host port (bound on 127.0.0.1).
    pub ports: BTreeMap<u16, u16>,
    /// Links wired as hostnames: (existing container name, alias).
    pub links: Vec<(String, String)>,
    /// Device mappings, host path to container path.
    pub devices: BTreeMap<String, String>,
    /// Run with extended privileges.
    pub privileged: bool,
}

/// What came back from running a container.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Engine-assigned container id.
    pub container_id: String,
    /// Exit status, present only when the run waited for termination.
    pub exit_status: Option<i64>,
    /// Captured output, present only when the run waited without attaching.
    pub output: Option<String>,
}

// =============================================================================
// Introspection Types
// =============================================================================

/// Facts about an image, from inspection.
#[derive(Debug, Clone)]
pub struct ImageFacts {
    pub id: String,
    pub created: Stamp,
}

/// Facts about a container, from inspection.
#[derive(Debug, Clone)]
pub struct ContainerFacts {
    pub id: String,
    /// Container name without the engine's leading slash.
    pub name: String,
    pub running: bool,
    pub created: Stamp,
    pub exit_status: i64,
    /// IPv4 address on the engine's bridge network; empty when stopped.
    pub ip: String,
    /// Exposed container ports.
    pub ports: Vec<u16>,
}

/// One row of the engine's container listing.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub running: bool,
}

/// One row of the engine's image listing.
#[derive(Debug, Clone)]
pub struct ImageSummary {
    pub id: String,
    pub tags: Vec<String>,
}

// =============================================================================
// The Engine Contract
// =============================================================================

/// Operations the orchestrator needs from a container engine.
///
/// Absent images and containers surface as [`crate::Error::NoSuchImage`]
/// and [`crate::Error::NoSuchContainer`] so callers can treat absence as a
/// normal state where the flow allows it.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Builds an image from a tar build context and tags the result.
    async fn build(&self, options: &BuildOptions, context: Vec<u8>, result_tag: &str)
        -> Result<()>;

    /// Creates and starts a container running `argv` in `spec.image`.
    async fn run(&self, spec: &RunSpec, argv: &[String]) -> Result<RunOutcome>;

    /// Commits a container's filesystem to a new image, optionally tagged.
    /// Returns the new image id.
    async fn commit(&self, container: &str, tag: Option<&ImageTag>) -> Result<String>;

    /// Applies a tag to an existing image.
    async fn tag_image(&self, image_id: &str, force: bool, tag: &ImageTag) -> Result<()>;

    /// Stops a container, allowing it a short grace window.
    async fn stop(&self, container: &str) -> Result<()>;

    /// Removes a stopped container.
    async fn remove_container(&self, container: &str) -> Result<()>;

    /// Removes an image. Fails with [`crate::Error::ImageInUse`] when a
    /// container still references it.
    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Inspects an image by tag or id.
    async fn inspect_image(&self, name: &str) -> Result<ImageFacts>;

    /// Inspects a container by name or id.
    async fn inspect_container(&self, name_or_id: &str) -> Result<ContainerFacts>;

    /// Fetches a path out of a container's filesystem as a tar stream.
    async fn copy_from_container(&self, container: &str, path: &str) -> Result<Vec<u8>>;

    /// Lists all containers, running or not.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Lists all images.
    async fn list_images(&self) -> Result<Vec<ImageSummary>>;
}
