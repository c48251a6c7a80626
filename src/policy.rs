//! Lifecycle policy engine.
//!
//! A policy decides, per service instance, whether to start, stop,
//! rebuild, or leave a container alone, given what the coordination store
//! and the engine report about it.
//!
//! ## Decision table
//!
//! | Condition | Action |
//! |-----------|--------|
//! | not started, start-if-missing off | nothing |
//! | not started, rebuild allowed, image stale | build image, start |
//! | not started | start |
//! | running, image stale, stop = Fresh | stop, then fall through |
//! | running, stop = Always | stop, then fall through |
//! | stopped, start = Restart | (rebuild if stale and allowed) start |
//! | stopped, start = Continue | commit old container, start from commit |
//! | stopped, start = Dont | nothing |
//! | running, no stop triggered | leave alone |
//!
//! Starting records the container name, IP, and first exposed port in the
//! store; stopping deletes the instance key.

use crate::constants::{CONTAINERS, IPS, KEYSPACE, PORTS};
use crate::engine::RunSpec;
use crate::error::{Error, Result};
use crate::names::StructuredName;
use crate::topology::ServiceId;
use crate::Orchestrator;
use crate::Stamp;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

// =============================================================================
// Policy Types
// =============================================================================

/// What to do with a previously-started instance that is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Leave it stopped.
    Dont,
    /// Start a fresh container from the runIn image.
    Restart,
    /// Commit the stopped container and start from that image, keeping
    /// accumulated state.
    Continue,
}

/// What to do with a running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Never,
    /// Stop only when the runIn image is out of date.
    Fresh,
    Always,
}

/// Per-service lifecycle policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub start_if_non_existent: bool,
    pub rebuild_if_ood: bool,
    pub start: StartMode,
    pub stop: StopMode,
}

impl Default for Policy {
    /// The `FRESH` preset: start when missing, rebuild stale images,
    /// restart stopped containers, stop running ones only to refresh.
    fn default() -> Self {
        Self {
            start_if_non_existent: true,
            rebuild_if_ood: true,
            start: StartMode::Restart,
            stop: StopMode::Fresh,
        }
    }
}

impl Policy {
    /// Maps the user-facing preset names onto policy fields. The empty
    /// string reads as `FRESH`.
    pub fn preset(name: &str) -> Result<Self> {
        let mut policy = Policy::default();
        match name.trim().to_uppercase().as_str() {
            "" | "FRESH" => {}
            "KEEP_UP" => policy.stop = StopMode::Never,
            "CONTINUE" => {
                policy.stop = StopMode::Never;
                policy.start = StartMode::Continue;
            }
            "ALWAYS" => policy.stop = StopMode::Always,
            "BY_HAND" => {
                policy.start_if_non_existent = false;
                policy.rebuild_if_ood = false;
                policy.start = StartMode::Dont;
                policy.stop = StopMode::Never;
            }
            other => {
                return Err(Error::Config(format!("unknown policy {other}")));
            }
        }
        Ok(policy)
    }
}

// =============================================================================
// Policy Input
// =============================================================================

/// Snapshot of one instance's state, gathered from the store and the
/// engine just before a decision.
#[derive(Debug, Clone)]
pub struct PolicyInput {
    /// A store entry exists for this instance.
    pub has_started: bool,
    /// Container name from the store (empty when never started).
    pub container_name: String,
    /// Creation time of the recorded container.
    pub container_started: Option<Stamp>,
    pub is_running: bool,
    pub service: ServiceId,
    pub instance: u32,
}

impl Orchestrator {
    /// Store key of an instance's container record.
    pub(crate) fn container_key(&self, name: &StructuredName) -> String {
        format!(
            "{KEYSPACE}/{CONTAINERS}/{}.{}/{}/{}",
            name.root, name.topology, name.service, name.instance
        )
    }

    fn ip_key(&self, name: &StructuredName) -> String {
        format!(
            "{KEYSPACE}/{IPS}/{}/{}/{}",
            name.topology, name.service, name.instance
        )
    }

    fn port_key(&self, name: &StructuredName) -> String {
        format!(
            "{KEYSPACE}/{PORTS}/{}/{}/{}",
            name.topology, name.service, name.instance
        )
    }

    pub(crate) fn structured_name(&self, sid: ServiceId, instance: u32) -> StructuredName {
        let service = &self.services[sid.0];
        StructuredName::new(&self.root_name, &service.topology, &service.name, instance)
    }

    /// Interrogates the store and, if needed, the engine to build the
    /// policy input for one instance. A store entry naming a container
    /// the engine no longer knows is stale: the entry is deleted and the
    /// instance reads as never started.
    pub(crate) async fn create_policy_input(
        &mut self,
        sid: ServiceId,
        instance: u32,
    ) -> Result<PolicyInput> {
        let key = self.container_key(&self.structured_name(sid, instance));
        let recorded = self.store.get(&key).await?;

        let mut input = PolicyInput {
            has_started: recorded.is_some(),
            container_name: recorded.unwrap_or_default(),
            container_started: None,
            is_running: false,
            service: sid,
            instance,
        };

        if input.has_started {
            match self.engine.inspect_container(&input.container_name).await {
                Ok(facts) => {
                    input.is_running = facts.running;
                    input.container_started = Some(facts.created);
                }
                Err(e) if e.is_absent_container() => {
                    warn!(
                        "container {} is gone, discarding its record",
                        input.container_name
                    );
                    self.store.delete(&key).await?;
                    input.has_started = false;
                    input.container_name.clear();
                }
                Err(e) => return Err(e),
            }
        }
        debug!("policy input for {}: {:?}", self.service_name(sid), input);
        Ok(input)
    }

    // =========================================================================
    // Decision Application
    // =========================================================================

    /// Applies the service's policy to one instance.
    pub(crate) async fn apply_policy(
        &mut self,
        input: &mut PolicyInput,
        links: &[(String, String)],
        tee: bool,
        wait: bool,
    ) -> Result<()> {
        let policy = self.services[input.service.0].policy;
        let label = self.service_name(input.service);

        if !input.has_started {
            if !policy.start_if_non_existent {
                debug!("policy: not starting {} by hand", label);
                return Ok(());
            }
            if policy.rebuild_if_ood && self.service_image_out_of_date(input.service).await? {
                self.service_image_build(input.service).await?;
            }
            debug!("policy: initial start of {}", label);
            return self.start_instance(input, None, links, tee, wait).await;
        }

        let mut running = input.is_running;
        if running {
            let stop = match policy.stop {
                StopMode::Always => true,
                StopMode::Fresh => self.service_image_out_of_date(input.service).await?,
                StopMode::Never => false,
            };
            if stop {
                debug!("policy: stopping {} ({:?})", label, policy.stop);
                self.stop_instance(input).await?;
                running = false;
            }
        }

        if running {
            debug!("policy: leaving {} alone, still running", label);
            return Ok(());
        }

        match policy.start {
            StartMode::Dont => {
                debug!("policy: not restarting {}", label);
                Ok(())
            }
            StartMode::Restart => {
                if policy.rebuild_if_ood && self.service_image_out_of_date(input.service).await? {
                    self.service_image_build(input.service).await?;
                }
                debug!("policy: restarting {} from its image", label);
                self.start_instance(input, None, links, tee, wait).await
            }
            StartMode::Continue => {
                // Keep accumulated state: the stopped container becomes a
                // fresh image to continue from.
                let committed = self.engine.commit(&input.container_name, None).await?;
                debug!(
                    "policy: continuing {} from commit {} of {}",
                    label, committed, input.container_name
                );
                self.start_instance(input, Some(committed), links, tee, wait)
                    .await
            }
        }
    }

    // =========================================================================
    // Start / Stop Transitions
    // =========================================================================

    /// Starts one instance and records it in the store. The container
    /// gets its structured name, link pairs for consumed siblings, the
    /// configured ports/devices/privilege, and its own identity appended
    /// to the entry command.
    async fn start_instance(
        &mut self,
        input: &mut PolicyInput,
        image_override: Option<String>,
        links: &[(String, String)],
        tee: bool,
        wait: bool,
    ) -> Result<()> {
        let sid = input.service;
        let name = self.structured_name(sid, input.instance);
        let container_name = name.to_string();

        // A container may survive under this name even when its store
        // record did not (or it was stopped and is being replaced). Clear
        // the way before creating.
        match self.engine.remove_container(&container_name).await {
            Ok(()) => debug!("removed old container {}", container_name),
            Err(e) if e.is_absent_container() => {}
            Err(e) => debug!("couldn't remove old container {}: {}", container_name, e),
        }

        let service = &self.services[sid.0];
        let image = match image_override {
            Some(image) => image,
            None => self.ref_name(&service.run_in),
        };

        let mut devices = BTreeMap::new();
        for (host, container) in &service.devices {
            let letter = (b'b' + (input.instance % 24) as u8) as char;
            devices.insert(host.replace('?', &letter.to_string()), container.clone());
        }

        let mut argv = service.entry.clone();
        argv.push(format!("{}.{}", name.root, name.topology));
        argv.push(input.instance.to_string());

        let spec = RunSpec {
            image,
            name: Some(container_name.clone()),
            attach: tee,
            wait,
            volumes: self.volume_binds()?,
            ports: service.expose.clone(),
            links: links.to_vec(),
            devices,
            privileged: service.privileged,
        };

        info!("starting {} as {}", self.service_name(sid), container_name);
        let outcome = self.engine.run(&spec, &argv).await?;

        let facts = self.engine.inspect_container(&outcome.container_id).await?;
        self.store
            .put(&self.container_key(&name), &facts.name)
            .await?;
        self.store.put(&self.ip_key(&name), &facts.ip).await?;
        let port = self.services[sid.0]
            .expose
            .keys()
            .next()
            .copied()
            .or_else(|| facts.ports.first().copied());
        if let Some(port) = port {
            self.store
                .put(&self.port_key(&name), &port.to_string())
                .await?;
        }
        self.orphans.lock().unwrap().push(facts.name.clone());

        input.container_name = facts.name;
        input.has_started = true;
        input.is_running = facts.running;
        input.container_started = Some(facts.created);
        Ok(())
    }

    /// Stops one instance and deletes its store record.
    async fn stop_instance(&mut self, input: &mut PolicyInput) -> Result<()> {
        self.engine.stop(&input.container_name).await?;
        let key = self.container_key(&self.structured_name(input.service, input.instance));
        self.store.delete(&key).await?;
        input.is_running = false;
        Ok(())
    }

    // =========================================================================
    // Service Image Helpers
    // =========================================================================

    /// Whether the image a service runs in is out of date. A bare tag
    /// cannot be out of date because nothing buildable produces it.
    pub(crate) async fn service_image_out_of_date(&mut self, sid: ServiceId) -> Result<bool> {
        match self.services[sid.0].run_in.node_id() {
            Some(node) => self.node_out_of_date(node).await,
            None => {
                debug!(
                    "'{}' can't be out of date, image '{}' is not buildable",
                    self.service_name(sid),
                    self.ref_name(&self.services[sid.0].run_in)
                );
                Ok(false)
            }
        }
    }

    /// Builds the image a service runs in, when it is buildable.
    pub(crate) async fn service_image_build(&mut self, sid: ServiceId) -> Result<()> {
        match self.services[sid.0].run_in.node_id() {
            Some(node) => self.node_build(node).await,
            None => {
                warn!(
                    "'{}' can't be built, image '{}' is not buildable",
                    self.service_name(sid),
                    self.ref_name(&self.services[sid.0].run_in)
                );
                Ok(())
            }
        }
    }
}
