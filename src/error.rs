//! Error types for the orchestrator.

use std::time::Duration;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building images or driving topologies.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file could not be understood.
    #[error("configuration error: {0}")]
    Config(String),

    /// A name is used twice within one configuration.
    #[error("name '{0}' already in use in this configuration")]
    DuplicateName(String),

    /// A name in the configuration does not resolve to anything buildable
    /// or pullable.
    #[error("unable to find '{name}' needed by '{wanted_by}': maybe you need to pull it?")]
    UnknownReference { name: String, wanted_by: String },

    /// A build or run target given on the command line is not known.
    #[error("no such target: '{0}'")]
    UnknownTarget(String),

    /// A run/drop target did not look like `topology.service`.
    #[error("unable to understand '{0}', expected something like 'topology.service'")]
    MalformedTarget(String),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// The engine has no image with this tag.
    #[error("no such image: {0}")]
    NoSuchImage(String),

    /// The engine has no container with this name or id.
    #[error("no such container: {0}")]
    NoSuchContainer(String),

    /// The image is referenced by a container and cannot be removed.
    #[error("image {0} is in use")]
    ImageInUse(String),

    /// The engine rejected a request.
    #[error("engine {operation} failed (status {status}): {message}")]
    EngineApi {
        operation: String,
        status: u16,
        message: String,
    },

    /// A command run inside a build container exited non-zero.
    #[error("non-zero exit code {status} from build container for '{tag}'")]
    BuildCommandFailed { tag: String, status: i64 },

    // =========================================================================
    // Coordination Store Errors
    // =========================================================================
    /// The coordination store rejected a request. A missing key is not an
    /// error; callers see `None` for that case.
    #[error("store {operation} failed: {message}")]
    Store { operation: String, message: String },

    // =========================================================================
    // Path / Filesystem Errors
    // =========================================================================
    /// A host path could not be mapped to a VM-visible path.
    #[error("cannot translate path '{path}': {reason}")]
    PathTranslation { path: String, reason: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // =========================================================================
    // Timeout / Internal Errors
    // =========================================================================
    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error means "the image does not exist", which most
    /// out-of-date checks treat as a normal state rather than a failure.
    pub fn is_absent_image(&self) -> bool {
        matches!(self, Error::NoSuchImage(_))
    }

    /// True when the error means "the container does not exist". Policy
    /// evaluation recovers from this by discarding the stale store entry.
    pub fn is_absent_container(&self) -> bool {
        matches!(self, Error::NoSuchContainer(_))
    }
}
