//! Subcommand implementations.
//!
//! Each function backs one CLI subcommand and drives the orchestrator
//! core. Output formatting lives here; the core stays printable-free.

use crate::constants::{CONTAINERS, KEYSPACE, TIME_FORMAT};
use crate::error::{Error, Result};
use crate::names::{StructuredName, TargetRef};
use crate::topology::ServiceId;
use crate::Orchestrator;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

// =============================================================================
// build
// =============================================================================

/// Builds the given targets, or every buildable tag when none are named.
pub async fn build(core: &mut Orchestrator, targets: &[String]) -> Result<()> {
    let (buildable, _) = core.entry_points();
    let selected: Vec<String> = if targets.is_empty() {
        buildable
    } else {
        let mut selected = Vec::new();
        for target in targets {
            if buildable.iter().any(|b| b == target.trim()) {
                selected.push(target.trim().to_string());
            } else {
                error!("{} is not buildable, ignoring", target);
            }
        }
        selected
    };

    for target in selected {
        core.build_target(&target).await?;
    }
    Ok(())
}

// =============================================================================
// run
// =============================================================================

/// Runs one `topology.service` target, returning the exit status to
/// surface from the process.
pub async fn run(core: &mut Orchestrator, target: &str) -> Result<i64> {
    let target: TargetRef = target.parse()?;
    core.execute(&target).await
}

// =============================================================================
// status / ps
// =============================================================================

/// Shows image freshness for buildable tags and instance state for
/// runnable services.
pub async fn status(core: &mut Orchestrator, targets: &[String]) -> Result<()> {
    let (buildable, _) = core.entry_points();
    let build_status: Vec<String> = if targets.is_empty() {
        buildable
    } else {
        let mut selected = Vec::new();
        for target in targets {
            if buildable.iter().any(|b| b == target.trim()) {
                selected.push(target.trim().to_string());
            } else if target.parse::<TargetRef>().is_err() {
                error!("unknown target {}", target);
            }
        }
        selected
    };

    for target in &build_status {
        match core.tag_time(target).await? {
            Some(t) => println!("{:<25} | {:<31}", target, t.format(TIME_FORMAT)),
            None => println!("{:<25} | {:<31}", target, "not found"),
        }
    }

    for target in chosen_runnables(core, targets) {
        let parsed: TargetRef = target.parse()?;
        let Some(instances) = status_instances(core, &parsed).await? else {
            println!("{:<25} | {:<31}", target, "not found");
            continue;
        };
        if instances.is_empty() {
            println!("{:<25} | {:<31}", target, "not found");
            continue;
        }
        for (i, container) in instances {
            let mut label = format!("{target}[{i}]");
            match core.engine.inspect_container(&container).await {
                Ok(facts) => {
                    if facts.running {
                        label.push('*');
                    }
                    println!(
                        "{:<25} | {:<31} | {:<19}",
                        label,
                        container,
                        facts.created.format(TIME_FORMAT)
                    );
                }
                Err(e) => {
                    println!("container {container} not inspected: {e}");
                }
            }
        }
    }
    Ok(())
}

/// `docker ps`-like listing of running topology instances.
pub async fn ps(core: &mut Orchestrator, targets: &[String]) -> Result<()> {
    println!(
        "{:<28} {:<36} {:<14} {:<16} PORTS",
        "TARGET", "NAME", "CONTAINER ID", "IP"
    );
    for target in chosen_runnables(core, targets) {
        let parsed: TargetRef = target.parse()?;
        let Some(instances) = status_instances(core, &parsed).await? else {
            continue;
        };
        for (i, container) in instances {
            let facts = match core.engine.inspect_container(&container).await {
                Ok(facts) => facts,
                Err(e) if e.is_absent_container() => continue,
                Err(e) => return Err(e),
            };
            let short_id: String = facts.id.chars().take(12).collect();
            let ports: Vec<String> = facts.ports.iter().map(u16::to_string).collect();
            println!(
                "{:<28} {:<36} {:<14} {:<16} {}",
                format!("{target}.{i}"),
                facts.name,
                short_id,
                facts.ip,
                ports.join(",")
            );
        }
    }
    Ok(())
}

// =============================================================================
// stop / drop
// =============================================================================

/// Stops the running containers of the given services (all services when
/// none are named). Containers that already vanished are skipped.
pub async fn stop(core: &mut Orchestrator, targets: &[String]) -> Result<()> {
    for target in chosen_runnables(core, targets) {
        let parsed: TargetRef = target.parse()?;
        let Some(instances) = status_instances(core, &parsed).await? else {
            continue;
        };
        for container in instances.values() {
            match core.engine.inspect_container(container).await {
                Ok(facts) if facts.running => {
                    info!("stopping {} [{}]", container, target);
                    core.engine.stop(container).await?;
                }
                Ok(_) => {}
                Err(e) if e.is_absent_container() => {
                    warn!("failed to inspect {}, already destroyed?", container);
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

/// Stops and removes the containers of a service and everything it
/// consumes, clearing their store records. Non-existent containers are
/// skipped without error.
pub async fn drop_target(core: &mut Orchestrator, target: &str) -> Result<()> {
    let parsed: TargetRef = target.parse()?;
    let sid = core
        .find_service(&parsed.topology, &parsed.service)
        .ok_or_else(|| Error::UnknownTarget(target.to_string()))?;

    // Walk the consumes graph breadth-first, collecting every instance
    // name reachable from the target.
    let mut queue: Vec<ServiceId> = vec![sid];
    let mut seen: Vec<ServiceId> = vec![sid];
    let mut names: Vec<StructuredName> = Vec::new();
    while let Some(current) = queue.pop() {
        for instance in 0..core.services[current.0].instances {
            names.push(core.structured_name(current, instance));
        }
        for consumed in &core.services[current.0].consumes {
            if !seen.contains(consumed) {
                seen.push(*consumed);
                queue.push(*consumed);
            }
        }
    }

    for name in names {
        let container = name.to_string();
        match core.engine.inspect_container(&container).await {
            Ok(facts) => {
                if facts.running {
                    core.engine.stop(&container).await?;
                }
                core.engine.remove_container(&container).await?;
            }
            Err(e) if e.is_absent_container() => {}
            Err(e) => return Err(e),
        }

        // The record goes even when the container already vanished.
        let key = core.container_key(&name);
        if let Some(previous) = core.store.delete(&key).await? {
            if previous != container {
                warn!(
                    "unexpected container recorded at {}: expected {} but found {}",
                    key, container, previous
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// wipe / destroy
// =============================================================================

/// Removes built images so the next build starts from scratch. Images
/// still in use are logged and skipped.
pub async fn wipe(core: &mut Orchestrator, targets: &[String]) -> Result<()> {
    let (buildable, _) = core.entry_points();
    let selected: Vec<String> = if targets.is_empty() {
        buildable
    } else {
        for target in targets {
            if !buildable.iter().any(|b| b == target.trim()) {
                return Err(Error::UnknownTarget(target.trim().to_string()));
            }
        }
        targets.iter().map(|t| t.trim().to_string()).collect()
    };

    for image in selected {
        match core.engine.remove_image(&image).await {
            Ok(()) => {}
            Err(e) if e.is_absent_image() => {}
            Err(Error::ImageInUse(_)) => info!("image {} is in use, ignoring", image),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Stops and removes all containers, removes all images, and clears the
/// coordination store.
pub async fn destroy(core: &mut Orchestrator) -> Result<()> {
    info!("clearing the coordination store");
    if let Some(children) = core.store.children("/").await? {
        for child in children {
            core.store.delete_all(&format!("/{child}")).await?;
        }
    }

    info!("stopping running containers");
    let containers = core.engine.list_containers().await?;
    for container in &containers {
        if container.running {
            core.engine.stop(&container.id).await?;
        }
    }

    info!("removing containers");
    for container in &containers {
        core.engine.remove_container(&container.id).await?;
    }

    info!("removing images");
    for image in core.engine.list_images().await? {
        if let Err(e) = core.engine.remove_image(&image.id).await {
            info!("couldn't remove {}: {}", image.id, e);
        }
    }
    Ok(())
}

// =============================================================================
// inject
// =============================================================================

/// Runs a command inside instance 0 of a running service, reusing the
/// local engine CLI so the user's terminal is wired straight through.
pub async fn inject(core: &mut Orchestrator, target: &str, argv: &[String]) -> Result<i64> {
    let parsed: TargetRef = target.parse()?;
    if core
        .find_service(&parsed.topology, &parsed.service)
        .is_none()
    {
        return Err(Error::UnknownTarget(target.to_string()));
    }

    let name = StructuredName::new(&core.root_name, &parsed.topology, &parsed.service, 0);
    let key = core.container_key(&name);
    let container = core.store.get(&key).await?.ok_or_else(|| {
        Error::Config(format!(
            "no instance information found in the store, is '{target}' running?"
        ))
    })?;
    let facts = core.engine.inspect_container(&container).await?;

    info!("injecting into {} ({})", container, facts.id);
    let status = tokio::process::Command::new("docker")
        .arg("exec")
        .arg("-i")
        .arg(&facts.name)
        .args(argv)
        .status()
        .await?;
    Ok(status.code().unwrap_or(1) as i64)
}

// =============================================================================
// Helpers
// =============================================================================

/// Filters the runnable entry points down to the requested targets.
fn chosen_runnables(core: &Orchestrator, targets: &[String]) -> Vec<String> {
    let (_, runnable) = core.entry_points();
    if targets.is_empty() {
        return runnable;
    }
    targets
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| runnable.iter().any(|r| r == t))
        .collect()
}

/// Reads the store for a service's instances.
///
/// `None` means the topology has never run under this root name. An
/// empty map means the topology is known but this service has no
/// instances. Otherwise instance ordinals map to container names, with
/// an empty name for records that vanished mid-read.
async fn status_instances(
    core: &Orchestrator,
    target: &TargetRef,
) -> Result<Option<BTreeMap<u32, String>>> {
    let scoped = format!("{}.{}", core.root_name, target.topology);
    let base = format!("{KEYSPACE}/{CONTAINERS}");

    let Some(topologies) = core.store.children(&base).await? else {
        return Ok(None);
    };
    if !topologies.iter().any(|t| *t == scoped) {
        return Ok(None);
    }

    let mut result = BTreeMap::new();
    let service_base = format!("{base}/{scoped}");
    let Some(services) = core.store.children(&service_base).await? else {
        return Ok(Some(result));
    };
    if !services.iter().any(|s| *s == target.service) {
        return Ok(Some(result));
    }

    let instance_base = format!("{service_base}/{}", target.service);
    let Some(instances) = core.store.children(&instance_base).await? else {
        return Ok(Some(result));
    };
    for instance in instances {
        let ordinal: u32 = instance.parse().map_err(|_| {
            Error::Store {
                operation: format!("children {instance_base}"),
                message: format!("non-numeric instance key '{instance}'"),
            }
        })?;
        let value = core
            .store
            .get(&format!("{instance_base}/{instance}"))
            .await?;
        result.insert(ordinal, value.unwrap_or_default());
    }
    Ok(Some(result))
}
