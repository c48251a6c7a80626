//! Topology services and the run recursion.
//!
//! A topology is a named set of long-lived services with a consumes
//! graph. Running a service first runs one instance of every consumed
//! sibling (in configuration order), collects their container names as
//! link pairs, then applies the service's policy to each of its own
//! instances sequentially.

use crate::error::Result;
use crate::graph::{BoxFuture, Ref};
use crate::policy::{Policy, PolicyInput};
use crate::tag::ImageTag;
use crate::Orchestrator;
use std::collections::BTreeMap;
use tracing::debug;

/// Index of a service in the orchestrator's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub(crate) usize);

/// One entry in a topology.
#[derive(Debug)]
pub struct Service {
    /// Name, unique within the topology.
    pub name: String,
    /// Owning topology name.
    pub topology: String,
    /// Image the service runs in: a buildable node or a bare tag.
    pub run_in: Ref,
    /// Entry command; the instance identity is appended at start time.
    pub entry: Vec<String>,
    /// Sibling services started before this one, in configuration order.
    pub consumes: Vec<ServiceId>,
    pub policy: Policy,
    /// Exposed ports, container port to host port.
    pub expose: BTreeMap<u16, u16>,
    /// Device mappings, host path to container path. A `?` in the host
    /// path is replaced per instance.
    pub devices: BTreeMap<String, String>,
    pub privileged: bool,
    /// Instance count, at least 1.
    pub instances: u32,
    /// Block on the last instance's termination and surface its exit code.
    pub wait_for: bool,
    /// Consumed sibling name -> tag to commit its container to after this
    /// service's run completes.
    pub commit_on_exit: Vec<(String, ImageTag)>,
}

impl Orchestrator {
    /// `topology.service` display name.
    pub(crate) fn service_name(&self, sid: ServiceId) -> String {
        let service = &self.services[sid.0];
        format!("{}.{}", service.topology, service.name)
    }

    /// Looks a service up by topology and service name.
    pub(crate) fn find_service(&self, topology: &str, service: &str) -> Option<ServiceId> {
        let ids = self.topologies.get(topology)?;
        ids.iter()
            .copied()
            .find(|sid| self.services[sid.0].name == service)
    }

    /// Starts one instance of a service, recursively starting a single
    /// instance of each consumed sibling first. Returns the policy input
    /// reflecting the instance's state after the decision was applied.
    pub(crate) fn run_service(
        &mut self,
        sid: ServiceId,
        instance: u32,
        tee: bool,
        wait: bool,
    ) -> BoxFuture<'_, Result<PolicyInput>> {
        Box::pin(async move {
            let consumed = self.services[sid.0].consumes.clone();
            let mut links: Vec<(String, String)> = Vec::new();
            for sibling in consumed {
                debug!(
                    "launching {} because {} consumes it (one instance)",
                    self.service_name(sibling),
                    self.service_name(sid)
                );
                let sibling_input = self.run_service(sibling, 0, false, false).await?;
                if sibling_input.container_name.is_empty() {
                    debug!(
                        "{} has no container to link against",
                        self.service_name(sibling)
                    );
                    continue;
                }
                links.push((
                    sibling_input.container_name,
                    self.services[sibling.0].name.clone(),
                ));
            }

            let mut input = self.create_policy_input(sid, instance).await?;
            self.apply_policy(&mut input, &links, tee, wait).await?;
            Ok(input)
        })
    }
}
