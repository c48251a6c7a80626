//! The build dependency graph.
//!
//! Nodes wrap a type-specific builder and carry the process-local
//! memoised timestamp that prevents repeat inspection or repeat builds of
//! shared ancestors. The arena ([`crate::Orchestrator`] owns it) holds
//! every node; edges are [`NodeId`] indices, so reference cycles are a
//! wiring-time error rather than an ownership puzzle.
//!
//! ## Memoisation invariant
//!
//! A node's timestamp is `None` until the first successful build or
//! up-to-date decision in this process. Once it is `Some`, no further
//! out-of-date or build work is performed for that node, even when it is
//! reached again through a different sink.

use crate::builders::BuilderKind;
use crate::error::Result;
use crate::Orchestrator;
use crate::Stamp;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// Boxed future used by the recursive graph walks.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Index of a node in the orchestrator's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

/// A reference that may be a graph node or a bare tag assumed to exist in
/// the engine cache or a remote registry.
#[derive(Debug, Clone)]
pub enum Ref {
    Node(NodeId),
    External(String),
}

impl Ref {
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Ref::Node(id) => Some(*id),
            Ref::External(_) => None,
        }
    }
}

/// One element of the build graph.
#[derive(Debug)]
pub struct Node {
    pub(crate) builder: BuilderKind,
    pub(crate) out: Vec<NodeId>,
    pub(crate) time: Option<Stamp>,
}

impl Node {
    pub(crate) fn new(builder: BuilderKind) -> Self {
        Self {
            builder,
            out: Vec::new(),
            time: None,
        }
    }

    /// True when no other node consumes this one.
    pub fn is_sink(&self) -> bool {
        self.out.is_empty()
    }
}

impl Orchestrator {
    /// Display name of a node (its tag).
    pub(crate) fn node_tag(&self, id: NodeId) -> String {
        self.nodes[id.0].builder.tag()
    }

    /// Memoised timestamp of a node.
    pub(crate) fn node_time(&self, id: NodeId) -> Option<Stamp> {
        self.nodes[id.0].time
    }

    /// Display name of a node-or-name reference.
    pub(crate) fn ref_name(&self, r: &Ref) -> String {
        match r {
            Ref::Node(id) => self.node_tag(*id),
            Ref::External(name) => name.clone(),
        }
    }

    /// Recursive out-of-date query with memoisation.
    ///
    /// A node whose timestamp is already known is up to date by
    /// definition for the rest of the process. Otherwise any out-of-date
    /// inbound edge makes this node out of date, and only then is the
    /// builder's own check consulted.
    pub fn node_out_of_date(&mut self, id: NodeId) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            if let Some(t) = self.nodes[id.0].time {
                debug!(
                    "avoiding second check on {} (already found {})",
                    self.node_tag(id),
                    t
                );
                return Ok(false);
            }

            for dep in self.node_inbound(id) {
                if self.node_out_of_date(dep).await? {
                    return Ok(true);
                }
            }

            let (stamp, ood) = self.builder_out_of_date(id).await?;
            if !ood {
                if let Some(t) = stamp {
                    self.nodes[id.0].time = Some(t);
                }
            }
            Ok(ood)
        })
    }

    /// Recursive build. Inbound edges build first; the builder's own work
    /// runs once and its resulting timestamp is memoised.
    pub fn node_build(&mut self, id: NodeId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.nodes[id.0].time.is_some() {
                debug!("no work to do for '{}'", self.node_tag(id));
                return Ok(());
            }

            let deps = self.node_inbound(id);
            if !deps.is_empty() {
                debug!(
                    "building dependencies of '{}' ({})",
                    self.node_tag(id),
                    deps.len()
                );
            }
            for dep in deps {
                self.node_build(dep).await?;
            }

            debug!("building '{}'", self.node_tag(id));
            let t = self.builder_build(id).await?;
            self.nodes[id.0].time = Some(t);
            Ok(())
        })
    }
}
