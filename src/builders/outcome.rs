//! Outcome-proxy builder.
//!
//! Represents "the image that will exist after service X in topology Y
//! terminates" as a graph node, so downstream builds can back-chain
//! through a run: building the proxy runs the owning service to
//! completion, then commits the named consumed sibling's container as the
//! result tag.

use crate::error::{Error, Result};
use crate::names::StructuredName;
use crate::topology::ServiceId;
use crate::Orchestrator;
use crate::Stamp;
use crate::tag::ImageTag;
use tracing::debug;

/// Commits a consumed sibling's post-run state into `repository:name`.
#[derive(Debug, Clone)]
pub struct OutcomeProxyBuilder {
    /// The topology service whose run produces the outcome.
    pub service: ServiceId,
    /// Name of the consumed sibling whose container gets committed.
    pub input_name: String,
    pub tag: ImageTag,
}

impl Orchestrator {
    /// Out of date when the owning service's runIn image is out of date,
    /// or when the result tag does not exist yet.
    pub(crate) async fn outcome_out_of_date(
        &mut self,
        b: &OutcomeProxyBuilder,
    ) -> Result<(Option<Stamp>, bool)> {
        if self.service_image_out_of_date(b.service).await? {
            return Ok((None, true));
        }
        match self.tag_time(&b.tag.to_string()).await? {
            None => Ok((None, true)),
            Some(t) => Ok((Some(t), false)),
        }
    }

    /// Builds the runIn image if necessary, runs the owning service with
    /// output attached until it exits, then commits the consumed
    /// sibling's container.
    pub(crate) async fn outcome_build(&mut self, b: &OutcomeProxyBuilder) -> Result<Stamp> {
        self.service_image_build(b.service).await?;
        self.run_service(b.service, 0, true, true).await?;

        let service = &self.services[b.service.0];
        let sibling_key = self.container_key(&StructuredName::new(
            &self.root_name,
            &service.topology,
            &b.input_name,
            0,
        ));
        let container = self.store.get(&sibling_key).await?.ok_or_else(|| {
            Error::Internal(format!(
                "no container recorded for consumed service '{}' after run",
                b.input_name
            ))
        })?;

        debug!("committing {} as {}", container, b.tag);
        self.engine.commit(&container, Some(&b.tag)).await?;
        self.inspect_fresh_tag(&b.tag.to_string()).await
    }
}
