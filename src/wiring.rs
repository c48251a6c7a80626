//! Configuration-to-graph wiring.
//!
//! Three passes turn parsed records into the arena without
//! forward-reference errors:
//!
//! 1. **Containers** — created and edged immediately; containers may only
//!    reference other containers.
//! 2. **Simple creation** — compile builders, extraction builders,
//!    topology services, and commit-on-exit proxies are created without
//!    edges, recording pending references by name.
//! 3. **Edges** — every pending name resolves against the full node set;
//!    an unresolved name the engine can inspect is accepted as a bare
//!    tag, anything else rejects the configuration.
//!
//! After pass 3 both the node graph and the consumes graph are checked
//! for cycles, so the run-time recursions cannot diverge.

use crate::builders::{
    Artifact, BuilderKind, CompileBuilder, ContainerBuilder, ExtractionBuilder,
    OutcomeProxyBuilder, Probe,
};
use crate::config::RawConfig;
use crate::constants::{DEFAULT_COMPILE_COMMAND, DEFAULT_PROBE_COMMAND};
use crate::core::{CodeVolume, OrchestratorOptions};
use crate::engine::{BuildOptions, ContainerEngine};
use crate::error::{Error, Result};
use crate::fsutil::Workspace;
use crate::graph::{Node, NodeId, Ref};
use crate::policy::Policy;
use crate::store::CoordStore;
use crate::tag::ImageTag;
use crate::topology::{Service, ServiceId};
use crate::Orchestrator;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Pending references recorded in pass 2, resolved in pass 3.
#[derive(Default)]
struct Pending {
    compiles: Vec<(NodeId, String)>,
    extractions: Vec<(NodeId, String, String)>,
    services: Vec<(ServiceId, String)>,
}

impl Orchestrator {
    /// Parses configuration text and wires the full graph.
    pub async fn from_config_text(
        text: &str,
        workspace: Workspace,
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn CoordStore>,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        let raw = RawConfig::parse(text)?;
        Self::from_config(raw, workspace, engine, store, options).await
    }

    /// Wires parsed records into an orchestrator.
    pub async fn from_config(
        raw: RawConfig,
        workspace: Workspace,
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn CoordStore>,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        let code_volumes = raw
            .code_volumes
            .iter()
            .map(|v| CodeVolume {
                host_dir: workspace.resolve(&v.directory),
                mounted_at: v.mounted_at.clone(),
            })
            .collect();

        let mut orchestrator = Orchestrator {
            workspace,
            engine,
            store,
            build_options: BuildOptions {
                no_cache: raw.build_options.dont_use_cache,
                remove_temp_containers: raw.build_options.remove_container,
            },
            code_volumes,
            nodes: Vec::new(),
            node_names: BTreeMap::new(),
            services: Vec::new(),
            topologies: BTreeMap::new(),
            root_name: options.root_name,
            translator: options.translator,
            run_volume: options.run_volume,
            orphans: Arc::new(Mutex::new(Vec::new())),
        };

        let mut pending = Pending::default();
        orchestrator.wire_containers(&raw)?;
        orchestrator.wire_compiles(&raw, &mut pending)?;
        orchestrator.wire_topologies(&raw, &mut pending)?;
        orchestrator.wire_extractions(&raw, &mut pending)?;
        orchestrator.wire_edges(pending).await?;
        orchestrator.check_node_cycles()?;
        orchestrator.check_consume_cycles()?;
        Ok(orchestrator)
    }

    // =========================================================================
    // Pass 1: Containers
    // =========================================================================

    fn wire_containers(&mut self, raw: &RawConfig) -> Result<()> {
        for conf in &raw.containers {
            let tag = ImageTag::new(&conf.repository, &conf.tag)?;
            self.workspace.check_dockerfile(&conf.directory)?;
            self.add_node(BuilderKind::Container(ContainerBuilder {
                tag,
                dir: conf.directory.trim().to_string(),
                in_edges: Vec::new(),
            }))?;
        }

        // Containers reference only containers, so edges can go in now.
        for conf in &raw.containers {
            let dest_tag = format!("{}:{}", conf.repository.trim(), conf.tag.trim());
            let dest = self
                .node_id(&dest_tag)
                .ok_or_else(|| Error::Internal(format!("container {dest_tag} vanished")))?;
            for source_name in &conf.depends_on {
                let source =
                    self.node_id(source_name)
                        .ok_or_else(|| Error::UnknownReference {
                            name: source_name.trim().to_string(),
                            wanted_by: dest_tag.clone(),
                        })?;
                self.nodes[source.0].out.push(dest);
                if let BuilderKind::Container(b) = &mut self.nodes[dest.0].builder {
                    b.in_edges.push(source);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Pass 2: Simple Creation
    // =========================================================================

    fn wire_compiles(&mut self, raw: &RawConfig, pending: &mut Pending) -> Result<()> {
        for conf in &raw.compiles {
            let tag = ImageTag::new(&conf.repository, &conf.tag)?;
            if conf.packages.is_empty() {
                return Err(Error::Config(format!(
                    "you must define at least one source package for {tag}"
                )));
            }
            let command = if conf.command.trim().is_empty() {
                DEFAULT_COMPILE_COMMAND.to_string()
            } else {
                conf.command.trim().to_string()
            };
            let probe_text = if conf.probe.trim().is_empty() {
                DEFAULT_PROBE_COMMAND.to_string()
            } else {
                conf.probe.trim().to_string()
            };
            let probe: Probe = crate::builders::parse_probe(&probe_text, &tag)?;
            let lock_file = match conf.test_file.trim() {
                "" => None,
                path => Some(path.to_string()),
            };

            let id = self.add_node(BuilderKind::Compile(CompileBuilder {
                tag,
                run_in: None,
                packages: conf.packages.clone(),
                command,
                probe,
                lock_file,
            }))?;
            pending.compiles.push((id, conf.run_in.trim().to_string()));
        }
        Ok(())
    }

    fn wire_topologies(&mut self, raw: &RawConfig, pending: &mut Pending) -> Result<()> {
        for (topology_raw, entries) in &raw.topologies {
            let topology = topology_raw.trim().to_string();
            if topology.is_empty() {
                return Err(Error::Config("can't have an empty topology name".into()));
            }
            if self.topologies.contains_key(&topology) {
                return Err(Error::DuplicateName(topology));
            }
            let mut ids = Vec::new();

            for conf in entries {
                let name = conf.name.trim().to_string();
                if name.is_empty() {
                    return Err(Error::Config(format!(
                        "can't have an empty service name in topology {topology}"
                    )));
                }
                if ids
                    .iter()
                    .any(|sid: &ServiceId| self.services[sid.0].name == name)
                {
                    return Err(Error::DuplicateName(format!("{topology}.{name}")));
                }

                let policy = Policy::preset(&conf.policy)?;
                let instances = conf.instances.max(1);

                let mut commit_on_exit = Vec::new();
                for (input, result) in &conf.commit_on_exit {
                    let input = input.trim().to_string();
                    if !conf.consumes.iter().any(|c| c.trim() == input) {
                        return Err(Error::Config(format!(
                            "can't commit input {input} in '{name}' because it's not consumed"
                        )));
                    }
                    commit_on_exit.push((input, result.parse::<ImageTag>()?));
                }

                let sid = ServiceId(self.services.len());
                self.services.push(Service {
                    name,
                    topology: topology.clone(),
                    run_in: Ref::External(conf.run_in.trim().to_string()),
                    entry: conf.entry_point.clone(),
                    consumes: Vec::new(),
                    policy,
                    expose: conf.expose.clone(),
                    devices: conf.devices.clone(),
                    privileged: conf.privileged,
                    instances,
                    wait_for: conf.wait_for,
                    commit_on_exit: commit_on_exit.clone(),
                });
                ids.push(sid);
                pending.services.push((sid, conf.run_in.trim().to_string()));

                // Commit-on-exit results are buildable: downstream builds
                // may depend on the aftermath of this topology run.
                for (input, result_tag) in commit_on_exit {
                    self.add_node(BuilderKind::OutcomeProxy(OutcomeProxyBuilder {
                        service: sid,
                        input_name: input,
                        tag: result_tag,
                    }))?;
                }
            }
            self.topologies.insert(topology, ids);
        }

        // Second sub-pass: services may consume siblings declared later.
        for (topology, entries) in &raw.topologies {
            let topology = topology.trim();
            for conf in entries {
                let sid = self
                    .find_service(topology, conf.name.trim())
                    .ok_or_else(|| Error::Internal(format!("service {} vanished", conf.name)))?;
                for consumed in &conf.consumes {
                    let sibling =
                        self.find_service(topology, consumed.trim())
                            .ok_or_else(|| {
                                Error::Config(format!(
                                    "can't find service named {consumed} consumed by {}.{}",
                                    topology,
                                    conf.name.trim()
                                ))
                            })?;
                    self.services[sid.0].consumes.push(sibling);
                }
            }
        }
        Ok(())
    }

    fn wire_extractions(&mut self, raw: &RawConfig, pending: &mut Pending) -> Result<()> {
        for conf in &raw.extractions {
            let tag = ImageTag::new(&conf.repository, &conf.tag)?;
            if conf.artifacts.is_empty() {
                return Err(Error::Config(format!(
                    "{tag} must define at least one artifact"
                )));
            }
            let run_in = conf.run_in.trim().to_string();
            let merge_with = conf.merge_with.trim().to_string();
            if run_in.is_empty() || merge_with.is_empty() {
                return Err(Error::Config(format!(
                    "MergeWith and RunIn are required for extraction {tag}"
                )));
            }

            let id = self.add_node(BuilderKind::Extraction(ExtractionBuilder {
                tag,
                run_in: Ref::External(run_in.clone()),
                merge_with: Ref::External(merge_with.clone()),
                artifacts: conf
                    .artifacts
                    .iter()
                    .map(|a| Artifact {
                        built_path: a.built_path.trim().to_string(),
                        destination_dir: a.destination_dir.trim().to_string(),
                    })
                    .collect(),
            }))?;
            pending.extractions.push((id, run_in, merge_with));
        }
        Ok(())
    }

    // =========================================================================
    // Pass 3: Edges
    // =========================================================================

    async fn wire_edges(&mut self, pending: Pending) -> Result<()> {
        for (id, run_in) in pending.compiles {
            let base = self.node_id(&run_in).ok_or_else(|| Error::UnknownReference {
                name: run_in.clone(),
                wanted_by: self.node_tag(id),
            })?;
            self.nodes[base.0].out.push(id);
            if let BuilderKind::Compile(b) = &mut self.nodes[id.0].builder {
                b.run_in = Some(base);
            }
        }

        for (id, run_in, merge_with) in pending.extractions {
            let run_in_ref = self.resolve_node_or_name(&run_in, id).await?;
            if let Some(base) = run_in_ref.node_id() {
                if !matches!(self.nodes[base.0].builder, BuilderKind::Compile(_)) {
                    return Err(Error::Config(format!(
                        "extraction {} must run in a compile node, but '{}' is not one",
                        self.node_tag(id),
                        run_in
                    )));
                }
                self.nodes[base.0].out.push(id);
            }
            let merge_ref = self.resolve_node_or_name(&merge_with, id).await?;
            if let Some(base) = merge_ref.node_id() {
                self.nodes[base.0].out.push(id);
            }
            if let BuilderKind::Extraction(b) = &mut self.nodes[id.0].builder {
                b.run_in = run_in_ref;
                b.merge_with = merge_ref;
            }
        }

        for (sid, run_in) in pending.services {
            let reference = match self.node_id(&run_in) {
                Some(id) => Ref::Node(id),
                None => {
                    if self.engine.inspect_image(&run_in).await.is_err() {
                        return Err(Error::UnknownReference {
                            name: run_in,
                            wanted_by: self.service_name(sid),
                        });
                    }
                    Ref::External(run_in)
                }
            };
            self.services[sid.0].run_in = reference;
        }
        Ok(())
    }

    /// Resolves a name to a graph node when one produces it, otherwise
    /// accepts it as a bare tag the engine can already inspect.
    async fn resolve_node_or_name(&self, name: &str, wanted_by: NodeId) -> Result<Ref> {
        if let Some(id) = self.node_id(name) {
            return Ok(Ref::Node(id));
        }
        match self.engine.inspect_image(name).await {
            Ok(_) => Ok(Ref::External(name.to_string())),
            Err(_) => Err(Error::UnknownReference {
                name: name.to_string(),
                wanted_by: self.node_tag(wanted_by),
            }),
        }
    }

    // =========================================================================
    // Shared Construction Helpers
    // =========================================================================

    fn add_node(&mut self, builder: BuilderKind) -> Result<NodeId> {
        let name = builder.tag();
        if name.trim().is_empty() {
            return Err(Error::Config("can't have an empty name".into()));
        }
        if self.node_names.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(builder));
        self.node_names.insert(name, id);
        Ok(id)
    }

    /// Rejects build-node cycles, which would otherwise diverge in the
    /// out-of-date recursion.
    fn check_node_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        fn visit(
            orch: &Orchestrator,
            id: NodeId,
            marks: &mut [Mark],
        ) -> Result<()> {
            match marks[id.0] {
                Mark::Black => return Ok(()),
                Mark::Grey => {
                    return Err(Error::Config(format!(
                        "dependency cycle involving '{}'",
                        orch.node_tag(id)
                    )))
                }
                Mark::White => {}
            }
            marks[id.0] = Mark::Grey;
            for dep in orch.node_inbound(id) {
                visit(orch, dep, marks)?;
            }
            marks[id.0] = Mark::Black;
            Ok(())
        }

        let mut marks = vec![Mark::White; self.nodes.len()];
        for i in 0..self.nodes.len() {
            visit(self, NodeId(i), &mut marks)?;
        }
        Ok(())
    }

    /// Rejects consumes cycles among services, which would otherwise
    /// diverge in the run recursion.
    fn check_consume_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        fn visit(orch: &Orchestrator, sid: ServiceId, marks: &mut [Mark]) -> Result<()> {
            match marks[sid.0] {
                Mark::Black => return Ok(()),
                Mark::Grey => {
                    return Err(Error::Config(format!(
                        "consumes cycle involving '{}'",
                        orch.service_name(sid)
                    )))
                }
                Mark::White => {}
            }
            marks[sid.0] = Mark::Grey;
            for dep in orch.services[sid.0].consumes.clone() {
                visit(orch, dep, marks)?;
            }
            marks[sid.0] = Mark::Black;
            Ok(())
        }

        let mut marks = vec![Mark::White; self.services.len()];
        for i in 0..self.services.len() {
            visit(self, ServiceId(i), &mut marks)?;
        }
        Ok(())
    }
}
