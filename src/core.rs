//! The orchestrator core.
//!
//! [`Orchestrator`] owns everything one command invocation needs: the
//! node arena, the topology services, the resolved code volumes, and the
//! engine/store adapters. State here is process-local; only the
//! coordination store outlives the invocation.

use crate::engine::{BuildOptions, ContainerEngine};
use crate::error::{Error, Result};
use crate::fsutil::Workspace;
use crate::graph::{Node, NodeId};
use crate::names::TargetRef;
use crate::pathmap::PathTranslator;
use crate::store::CoordStore;
use crate::topology::{Service, ServiceId};
use crate::Stamp;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

/// A code volume resolved against the workspace: the host directory (not
/// path-translated) and the mount point containers see.
#[derive(Debug, Clone)]
pub struct CodeVolume {
    pub host_dir: PathBuf,
    pub mounted_at: String,
}

/// An extra bind mount applied to containers started by `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunVolume {
    pub source: String,
    pub mounted_at: String,
}

impl std::str::FromStr for RunVolume {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((source, mounted_at)) if !source.is_empty() && !mounted_at.is_empty() => {
                Ok(Self {
                    source: source.to_string(),
                    mounted_at: mounted_at.to_string(),
                })
            }
            _ => Err(Error::Config(format!(
                "unable to understand run volume ({s}), should be /foo:/bar/foo"
            ))),
        }
    }
}

/// Knobs that vary per invocation rather than per configuration.
#[derive(Debug, Default)]
pub struct OrchestratorOptions {
    /// Prefix for structured container names, typically the user name.
    pub root_name: String,
    /// Host-to-VM path translation, when the engine endpoint is remote.
    pub translator: Option<PathTranslator>,
    /// Extra bind mount for `run`-started containers.
    pub run_volume: Option<RunVolume>,
}

/// One command invocation's worth of orchestrator state.
pub struct Orchestrator {
    pub(crate) workspace: Workspace,
    pub(crate) engine: Arc<dyn ContainerEngine>,
    pub(crate) store: Arc<dyn CoordStore>,
    pub(crate) build_options: BuildOptions,
    pub(crate) code_volumes: Vec<CodeVolume>,

    // Build graph arena plus the name index over it.
    pub(crate) nodes: Vec<Node>,
    pub(crate) node_names: BTreeMap<String, NodeId>,

    // Topology arena: services by id, topologies as ordered id lists.
    pub(crate) services: Vec<Service>,
    pub(crate) topologies: BTreeMap<String, Vec<ServiceId>>,

    pub(crate) root_name: String,
    pub(crate) translator: Option<PathTranslator>,
    pub(crate) run_volume: Option<RunVolume>,

    /// Containers started during this invocation, for signal cleanup.
    pub(crate) orphans: Arc<Mutex<Vec<String>>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("root_name", &self.root_name)
            .field("nodes", &self.nodes.len())
            .field("services", &self.services.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Containers started so far in this invocation. Shared with the
    /// shutdown stack so an interrupt can stop them.
    pub fn orphans(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.orphans)
    }

    /// Buildable tags that nothing else consumes: the roots of the
    /// back-chains, and the natural "build everything" frontier.
    pub fn sinks(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.is_sink())
            .map(|n| n.builder.tag())
            .collect()
    }

    /// The two kinds of entry points: buildable tags and runnable
    /// `topology.service` names.
    pub fn entry_points(&self) -> (Vec<String>, Vec<String>) {
        let buildable = self.node_names.keys().cloned().collect();
        let mut runnable = Vec::new();
        for (topology, ids) in &self.topologies {
            for sid in ids {
                runnable.push(format!("{}.{}", topology, self.services[sid.0].name));
            }
        }
        (buildable, runnable)
    }

    /// Builds one target by name, doing nothing when it is up to date.
    pub async fn build_target(&mut self, name: &str) -> Result<()> {
        let id = self
            .node_id(name.trim())
            .ok_or_else(|| Error::UnknownTarget(name.trim().to_string()))?;
        if !self.node_out_of_date(id).await? {
            info!("nothing to do for '{}'", self.node_tag(id));
            return Ok(());
        }
        self.node_build(id).await
    }

    /// Runs a `topology.service` target: every instance sequentially,
    /// blocking on the last one when the service waits for exit. Returns
    /// the exit status to surface from the process.
    pub async fn execute(&mut self, target: &TargetRef) -> Result<i64> {
        let sid = self
            .find_service(&target.topology, &target.service)
            .ok_or_else(|| Error::UnknownTarget(target.to_string()))?;

        let instances = self.services[sid.0].instances;
        let wait_for = self.services[sid.0].wait_for;
        let mut exit_status = 0i64;

        for instance in 0..instances {
            // Wait on the last instance only, in case many are specified.
            let wait = wait_for && instance == instances - 1;
            let input = self.run_service(sid, instance, wait, wait).await?;
            if wait {
                let facts = self.engine.inspect_container(&input.container_name).await?;
                exit_status = facts.exit_status;
            }
        }
        Ok(exit_status)
    }

    // =========================================================================
    // Shared Helpers
    // =========================================================================

    pub(crate) fn node_id(&self, name: &str) -> Option<NodeId> {
        self.node_names.get(name.trim()).copied()
    }

    /// Creation time of an image tag in the engine, `None` when the tag
    /// does not exist.
    pub(crate) async fn tag_time(&self, tag: &str) -> Result<Option<Stamp>> {
        match self.engine.inspect_image(tag).await {
            Ok(facts) => Ok(Some(facts.created)),
            Err(e) if e.is_absent_image() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Inspects a tag that was just built; absence at this point is an
    /// engine fault, not a normal state.
    pub(crate) async fn inspect_fresh_tag(&self, tag: &str) -> Result<Stamp> {
        self.tag_time(tag).await?.ok_or_else(|| {
            Error::Internal(format!("engine reports no image for freshly built {tag}"))
        })
    }

    /// Bind mounts for build and service containers: every code volume
    /// (path-translated when the engine is remote) plus the run volume.
    pub(crate) fn volume_binds(&self) -> Result<BTreeMap<String, String>> {
        let mut binds = BTreeMap::new();
        for volume in &self.code_volumes {
            let host = match &self.translator {
                Some(tr) => tr.translate(&volume.host_dir)?,
                None => volume.host_dir.display().to_string(),
            };
            binds.insert(host, volume.mounted_at.clone());
        }
        if let Some(rv) = &self.run_volume {
            binds.insert(rv.source.clone(), rv.mounted_at.clone());
        }
        Ok(binds)
    }
}
