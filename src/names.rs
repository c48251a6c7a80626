//! Container naming.
//!
//! Two kinds of names appear on containers the orchestrator creates:
//!
//! - **Structured names** for topology instances:
//!   `<rootName>.<topology>.<service>.<instance>`, assembled
//!   deterministically so every invocation can re-derive the name of any
//!   instance without consulting the engine.
//! - **Throwaway names** for build and probe containers, generated as a
//!   two-word phrase so the engine's container list stays readable while
//!   builds are in flight.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Structured Instance Names
// =============================================================================

/// Deterministic name of one topology instance's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredName {
    /// Per-user or per-checkout prefix, so several people can share an
    /// engine without colliding.
    pub root: String,
    /// Topology name.
    pub topology: String,
    /// Service name within the topology.
    pub service: String,
    /// Instance ordinal, 0-based.
    pub instance: u32,
}

impl StructuredName {
    pub fn new(root: &str, topology: &str, service: &str, instance: u32) -> Self {
        Self {
            root: root.to_string(),
            topology: topology.to_string(),
            service: service.to_string(),
            instance,
        }
    }
}

impl fmt::Display for StructuredName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.root, self.topology, self.service, self.instance
        )
    }
}

// =============================================================================
// Run Targets
// =============================================================================

/// A `topology.service` pair as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRef {
    pub topology: String,
    pub service: String,
}

impl FromStr for TargetRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let mut parts = trimmed.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(topology), Some(service), None) if !topology.is_empty() && !service.is_empty() => {
                Ok(Self {
                    topology: topology.to_string(),
                    service: service.to_string(),
                })
            }
            _ => Err(Error::MalformedTarget(trimmed.to_string())),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.topology, self.service)
    }
}

// =============================================================================
// Throwaway Names
// =============================================================================

const WEATHER: &[&str] = &[
    "misty", "gusty", "balmy", "hazy", "sultry", "frosty", "drizzly", "muggy", "blustery",
    "parched", "sleety", "thundery", "brisk", "sodden", "torrid", "glacial", "overcast", "squally",
];

const RIVERS: &[&str] = &[
    "danube", "mekong", "orinoco", "volga", "zambezi", "yukon", "tagus", "irrawaddy", "parana",
    "severn", "shannon", "loire", "vistula", "tigris", "klamath", "murray", "salween", "dnieper",
    "rhone", "ganges",
];

/// Generates a throwaway container name like `misty_danube`.
///
/// Uniqueness is not guaranteed; callers retry on a name collision.
pub fn throwaway_name() -> String {
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    let weather = WEATHER[bytes[0] as usize % WEATHER.len()];
    let river = RIVERS[bytes[1] as usize % RIVERS.len()];
    format!("{weather}_{river}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_name_renders_all_four_parts() {
        let name = StructuredName::new("user", "topologyX", "frontend", 2);
        assert_eq!(name.to_string(), "user.topologyX.frontend.2");
    }

    #[test]
    fn target_parses_pair() {
        let t: TargetRef = "someothergraph.part3".parse().unwrap();
        assert_eq!(t.topology, "someothergraph");
        assert_eq!(t.service, "part3");
    }

    #[test]
    fn target_rejects_wrong_shapes() {
        assert!("justone".parse::<TargetRef>().is_err());
        assert!("a.b.c".parse::<TargetRef>().is_err());
        assert!(".b".parse::<TargetRef>().is_err());
    }

    #[test]
    fn throwaway_names_have_two_words() {
        let name = throwaway_name();
        assert_eq!(name.split('_').count(), 2);
    }
}
