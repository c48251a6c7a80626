//! Centralized constants for the orchestrator.
//!
//! Collecting these in one module keeps key names, timeouts, and default
//! commands consistent between the engine adapter, the store layout, and
//! the builders.

use std::time::Duration;

// =============================================================================
// Coordination Store Layout
// =============================================================================

/// Root of the orchestrator's keyspace in the coordination store.
pub const KEYSPACE: &str = "/pickett";

/// Subtree that maps `<root>.<topology>/<service>/<instance>` to a
/// container name.
pub const CONTAINERS: &str = "containers";

/// Subtree that maps `<topology>/<service>/<instance>` to the container's
/// IPv4 address.
pub const IPS: &str = "ips";

/// Subtree that maps `<topology>/<service>/<instance>` to the first
/// exposed port.
pub const PORTS: &str = "ports";

/// Store entries effectively never expire; the orchestrator deletes them
/// explicitly when containers are dropped.
pub const STORE_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);

// =============================================================================
// Engine Defaults
// =============================================================================

/// Grace window given to a container between SIGTERM and SIGKILL when
/// stopping it.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Connect timeout for engine and store endpoints. Requests themselves
/// (image builds, container waits) are unbounded.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How many times to retry creating a container when a generated name
/// collides before giving up on named creation.
pub const NAME_COLLISION_RETRIES: u32 = 3;

/// Environment variable naming the engine endpoint.
pub const ENGINE_HOST_ENV: &str = "DOCKER_HOST";

/// Environment variable overriding the derived coordination store endpoint.
pub const STORE_HOST_ENV: &str = "PICKETT_ETCD_HOST";

/// Port substituted into the engine host to reach the coordination store
/// when no explicit store endpoint is configured.
pub const STORE_PORT: u16 = 4001;

// =============================================================================
// Builder Defaults
// =============================================================================

/// Default in-container compile command.
pub const DEFAULT_COMPILE_COMMAND: &str = "go install";

/// Default staleness probe command (a dry run of the compile).
pub const DEFAULT_PROBE_COMMAND: &str = "go install -n";

/// Probe spelling that selects the source-directory mtime check instead of
/// an in-container command.
pub const SOURCE_DIR_PROBE: &str = "source-dir-check";

// =============================================================================
// CLI Defaults
// =============================================================================

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "Pickett.json";

/// Timestamp format used by `status` and `ps` output.
pub const TIME_FORMAT: &str = "%m/%d/%y-%I:%M%p";
