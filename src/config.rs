//! Configuration file parsing.
//!
//! The configuration is JSON with `//` line comments. A comment strips the
//! line from the `//` to the end; when the `//` begins the line, the whole
//! line drops. Everything past this layer is a typed record; no
//! dynamically-typed maps survive parsing.
//!
//! Only the raw shape is validated here. Cross-references between entries
//! (dependencies, run-in images, consumed services) are resolved by the
//! wiring passes in [`crate::wiring`].

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

// =============================================================================
// Comment Stripping
// =============================================================================

/// Removes `//` line comments so the remainder parses as plain JSON.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        match line.find("//") {
            Some(0) => continue,
            Some(idx) => out.push_str(&line[..idx]),
            None => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

// =============================================================================
// Typed Records
// =============================================================================

/// Options forwarded to the engine on every directory-based image build.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildOptionsConfig {
    #[serde(rename = "DontUseCache")]
    pub dont_use_cache: bool,
    #[serde(rename = "RemoveContainer")]
    pub remove_container: bool,
}

/// A host directory exposed inside build containers at a fixed mount path.
///
/// Exactly this spelling is accepted: a list of objects with these two
/// fields. Unrecognised keys are configuration errors.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeVolumeConfig {
    #[serde(rename = "Directory")]
    pub directory: String,
    #[serde(rename = "MountedAt")]
    pub mounted_at: String,
}

/// An image built from a directory containing a Dockerfile.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "Repository")]
    pub repository: String,
    #[serde(rename = "Tag")]
    pub tag: String,
    #[serde(rename = "Directory")]
    pub directory: String,
    #[serde(rename = "DependsOn", default)]
    pub depends_on: Vec<String>,
}

/// An image produced by compiling packages inside another image.
#[derive(Debug, Clone, Deserialize)]
pub struct CompileConfig {
    #[serde(rename = "Repository")]
    pub repository: String,
    #[serde(rename = "Tag")]
    pub tag: String,
    #[serde(rename = "RunIn")]
    pub run_in: String,
    #[serde(rename = "Packages", default)]
    pub packages: Vec<String>,
    #[serde(rename = "Command", default)]
    pub command: String,
    #[serde(rename = "Probe", default)]
    pub probe: String,
    #[serde(rename = "TestFile", default)]
    pub test_file: String,
}

/// One file or directory copied out of a build image.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    #[serde(rename = "BuiltPath")]
    pub built_path: String,
    #[serde(rename = "DestinationDir")]
    pub destination_dir: String,
}

/// An image assembled by overlaying artifacts from one image (or the
/// source tree) onto another.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    #[serde(rename = "Repository")]
    pub repository: String,
    #[serde(rename = "Tag")]
    pub tag: String,
    #[serde(rename = "RunIn")]
    pub run_in: String,
    #[serde(rename = "MergeWith")]
    pub merge_with: String,
    #[serde(rename = "Artifacts", default)]
    pub artifacts: Vec<ArtifactConfig>,
}

/// One service entry inside a topology.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "RunIn")]
    pub run_in: String,
    #[serde(rename = "EntryPoint", default)]
    pub entry_point: Vec<String>,
    #[serde(rename = "Consumes", default)]
    pub consumes: Vec<String>,
    #[serde(rename = "Policy", default)]
    pub policy: String,
    #[serde(rename = "Expose", default)]
    pub expose: BTreeMap<u16, u16>,
    #[serde(rename = "Instances", default)]
    pub instances: u32,
    #[serde(rename = "Devices", default)]
    pub devices: BTreeMap<String, String>,
    #[serde(rename = "Privileged", default)]
    pub privileged: bool,
    #[serde(rename = "WaitFor", default)]
    pub wait_for: bool,
    #[serde(rename = "CommitOnExit", default)]
    pub commit_on_exit: BTreeMap<String, String>,
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    #[serde(rename = "DockerBuildOptions")]
    pub build_options: BuildOptionsConfig,
    #[serde(rename = "CodeVolumes")]
    pub code_volumes: Vec<CodeVolumeConfig>,
    #[serde(rename = "Containers")]
    pub containers: Vec<ContainerConfig>,
    #[serde(rename = "GoBuilds")]
    pub compiles: Vec<CompileConfig>,
    #[serde(rename = "Extractions")]
    pub extractions: Vec<ExtractionConfig>,
    #[serde(rename = "Topologies")]
    pub topologies: BTreeMap<String, Vec<ServiceConfig>>,
}

impl RawConfig {
    /// Parses configuration text, stripping comments first.
    pub fn parse(text: &str) -> Result<Self> {
        let clean = strip_comments(text);
        serde_json::from_str(&clean)
            .map_err(|e| Error::Config(format!("malformed configuration JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_and_whole_line_comments() {
        let text = "// leading\n{\"a\": 1 // trailing\n}\n";
        let clean = strip_comments(text);
        assert_eq!(clean, "{\"a\": 1 \n}\n");
    }

    #[test]
    fn parses_minimal_config() {
        let conf = RawConfig::parse(
            r#"
            // minimal
            {
                "Containers": [
                    {"Repository": "blah", "Tag": "bletch", "Directory": "mydir"}
                ]
            }
            "#,
        )
        .unwrap();
        assert_eq!(conf.containers.len(), 1);
        assert_eq!(conf.containers[0].repository, "blah");
        assert!(conf.containers[0].depends_on.is_empty());
    }

    #[test]
    fn code_volume_rejects_extra_keys() {
        let err = RawConfig::parse(
            r#"
            {
                "CodeVolumes": [
                    {"Directory": "src", "MountedAt": "/han", "SomeExtra": "cruft"}
                ]
            }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("configuration"));
    }

    #[test]
    fn parses_topologies() {
        let conf = RawConfig::parse(
            r#"
            {
                "Topologies": {
                    "someothergraph": [
                        {
                            "Name": "part3",
                            "RunIn": "part3-image",
                            "EntryPoint": ["/bin/part3-start.sh"],
                            "Consumes": ["part4"],
                            "Instances": 2,
                            "Expose": {"8080": 18080}
                        }
                    ]
                }
            }
            "#,
        )
        .unwrap();
        let entries = &conf.topologies["someothergraph"];
        assert_eq!(entries[0].instances, 2);
        assert_eq!(entries[0].expose.get(&8080), Some(&18080));
    }
}
