//! Builder variants.
//!
//! Each node kind knows how to decide staleness and how to produce its
//! image; everything shared (memoisation, recursion, edge bookkeeping)
//! lives on the node in [`crate::graph`]. The four kinds:
//!
//! | Kind | Produces |
//! |------|----------|
//! | [`ContainerBuilder`] | image from a Dockerfile directory |
//! | [`CompileBuilder`]   | image holding artifacts compiled in a base image |
//! | [`ExtractionBuilder`]| image merging artifacts into a runtime base |
//! | [`OutcomeProxyBuilder`] | image committed from a topology run's aftermath |

mod compile;
mod container;
mod extraction;
mod outcome;

pub use compile::{CompileBuilder, Probe};
pub(crate) use compile::parse_probe;
pub use container::ContainerBuilder;
pub use extraction::{Artifact, ExtractionBuilder};
pub use outcome::OutcomeProxyBuilder;

use crate::error::Result;
use crate::graph::NodeId;
use crate::Orchestrator;
use crate::Stamp;

/// The tagged union of builder kinds a node can own.
#[derive(Debug, Clone)]
pub enum BuilderKind {
    Container(ContainerBuilder),
    Compile(CompileBuilder),
    Extraction(ExtractionBuilder),
    OutcomeProxy(OutcomeProxyBuilder),
}

impl BuilderKind {
    /// The tag this builder produces, used as the node's name.
    pub fn tag(&self) -> String {
        match self {
            BuilderKind::Container(b) => b.tag.to_string(),
            BuilderKind::Compile(b) => b.tag.to_string(),
            BuilderKind::Extraction(b) => b.tag.to_string(),
            BuilderKind::OutcomeProxy(b) => b.tag.to_string(),
        }
    }
}

impl Orchestrator {
    /// Inbound edges of a node, derived from its builder's references.
    pub(crate) fn node_inbound(&self, id: NodeId) -> Vec<NodeId> {
        match &self.nodes[id.0].builder {
            BuilderKind::Container(b) => b.in_edges.clone(),
            BuilderKind::Compile(b) => b.run_in.into_iter().collect(),
            BuilderKind::Extraction(b) => {
                let mut edges = Vec::new();
                if let Some(id) = b.run_in.node_id() {
                    edges.push(id);
                }
                if let Some(id) = b.merge_with.node_id() {
                    edges.push(id);
                }
                edges
            }
            BuilderKind::OutcomeProxy(b) => {
                let service = &self.services[b.service.0];
                service.run_in.node_id().into_iter().collect()
            }
        }
    }

    /// Builder-specific staleness check. The stamp is only meaningful
    /// when the result is "not out of date"; the node memoises it.
    pub(crate) async fn builder_out_of_date(
        &mut self,
        id: NodeId,
    ) -> Result<(Option<Stamp>, bool)> {
        let builder = self.nodes[id.0].builder.clone();
        match builder {
            BuilderKind::Container(b) => self.container_out_of_date(&b).await,
            BuilderKind::Compile(b) => self.compile_out_of_date(&b).await,
            BuilderKind::Extraction(b) => self.extraction_out_of_date(&b).await,
            BuilderKind::OutcomeProxy(b) => self.outcome_out_of_date(&b).await,
        }
    }

    /// Builder-specific build. Returns the freshly-inspected timestamp of
    /// the produced tag.
    pub(crate) async fn builder_build(&mut self, id: NodeId) -> Result<Stamp> {
        let builder = self.nodes[id.0].builder.clone();
        match builder {
            BuilderKind::Container(b) => self.container_build(&b).await,
            BuilderKind::Compile(b) => self.compile_build(&b).await,
            BuilderKind::Extraction(b) => self.extraction_build(&b).await,
            BuilderKind::OutcomeProxy(b) => self.outcome_build(&b).await,
        }
    }
}
