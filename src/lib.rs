//! # pickett
//!
//! **Build-and-run orchestrator for container images and topologies**
//!
//! From a single declarative configuration this crate resolves a directed
//! acyclic graph of build artifacts, rebuilding only what is stale, and
//! instantiates multi-container topologies as ordered service graphs,
//! recording each running instance in a shared coordination store.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           pickett                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Pickett.json ──► RawConfig ──► 3-pass wiring ──► Orchestrator   │
//! │                                                                  │
//! │  ┌───────────────────────────┐   ┌───────────────────────────┐   │
//! │  │        Build DAG          │   │       Topologies          │   │
//! │  │  node arena + memoised    │   │  services, instances,     │   │
//! │  │  timestamps               │   │  consumes ordering        │   │
//! │  │  ┌─────────┬──────────┐   │   │  ┌─────────────────────┐  │   │
//! │  │  │container│ compile  │   │   │  │   policy engine     │  │   │
//! │  │  ├─────────┼──────────┤   │   │  │ start/stop/rebuild  │  │   │
//! │  │  │extract  │ outcome  │◄──┼───┼──┤ per instance        │  │   │
//! │  │  └─────────┴──────────┘   │   │  └─────────────────────┘  │   │
//! │  └─────────────┬─────────────┘   └─────────────┬─────────────┘   │
//! ├────────────────┼───────────────────────────────┼─────────────────┤
//! │        ContainerEngine trait            CoordStore trait         │
//! │        (Docker Engine API)              (etcd v2 keyspace)       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Out-of-date analysis
//!
//! Every node memoises its timestamp within one process: once a node is
//! found up to date (or freshly built), it is never re-inspected or
//! rebuilt in that invocation, even when several sinks share it. The
//! durable record is the engine's tag store plus the coordination
//! store's instance keys; nothing orchestrator-side persists between
//! invocations.
//!
//! # Topology runs
//!
//! Running `topology.service` recursively starts one instance of every
//! consumed sibling first (wired as links into the new container), then
//! applies the service's lifecycle policy per instance. The policy
//! consults the coordination store and container introspection to decide
//! between starting, stopping, rebuilding, committing-and-continuing, or
//! leaving things alone.
//!
//! # Example
//!
//! ```rust,ignore
//! use pickett::{DockerEngine, EtcdStore, Orchestrator, OrchestratorOptions, Workspace};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> pickett::Result<()> {
//!     let workspace = Workspace::new("Pickett.json".as_ref())?;
//!     let engine = Arc::new(DockerEngine::from_env()?);
//!     let store = Arc::new(EtcdStore::from_env()?);
//!
//!     let text = workspace.config_text()?;
//!     let mut core = Orchestrator::from_config_text(
//!         &text,
//!         workspace,
//!         engine,
//!         store,
//!         OrchestratorOptions::default(),
//!     )
//!     .await?;
//!
//!     core.build_target("blah:bletch").await?;
//!     Ok(())
//! }
//! ```

// =============================================================================
// Internal Modules
// =============================================================================

mod builders;
mod constants;
mod core;
mod error;
mod fsutil;
mod graph;
mod names;
mod policy;
mod tag;
mod tarball;
mod topology;
mod wiring;

// =============================================================================
// Facade Modules
// =============================================================================

/// Configuration records and the comment-stripping JSON parser.
pub mod config;

/// Engine abstraction and the Docker Engine API adapter.
pub mod engine;

/// Coordination store abstraction and the etcd adapter.
pub mod store;

/// Subcommand implementations driving the orchestrator core.
pub mod commands;

/// Host-to-VM path translation for remote engine endpoints.
pub mod pathmap;

/// Graceful-shutdown callback stack.
pub mod signals;

/// Timestamp type used for images, containers, and files alike.
pub type Stamp = chrono::DateTime<chrono::Utc>;

pub use crate::core::{CodeVolume, Orchestrator, OrchestratorOptions, RunVolume};
pub use crate::error::{Error, Result};
pub use crate::fsutil::Workspace;
pub use crate::graph::{NodeId, Ref};
pub use crate::names::{StructuredName, TargetRef};
pub use crate::policy::{Policy, PolicyInput, StartMode, StopMode};
pub use crate::tag::ImageTag;
pub use engine::{ContainerEngine, DockerEngine};
pub use store::{CoordStore, EtcdStore};

pub use crate::constants::{DEFAULT_CONFIG_FILE, ENGINE_HOST_ENV};
