//! Docker Engine API adapter.
//!
//! Implements [`ContainerEngine`] against the Docker daemon's HTTP API,
//! reached over the endpoint named by `DOCKER_HOST` (TCP or Unix socket).
//! Only the operations the orchestrator needs are covered; each maps to a
//! single API call plus status-code classification.

use super::http::{self, Endpoint, Response};
use super::{
    BuildOptions, ContainerEngine, ContainerFacts, ContainerSummary, ImageFacts, ImageSummary,
    RunOutcome, RunSpec,
};
use crate::constants::{ENGINE_HOST_ENV, NAME_COLLISION_RETRIES, STOP_GRACE};
use crate::error::{Error, Result};
use crate::names::throwaway_name;
use crate::tag::ImageTag;
use crate::Stamp;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Docker daemon client.
pub struct DockerEngine {
    endpoint: Endpoint,
}

impl DockerEngine {
    /// Connects to the endpoint named by `DOCKER_HOST`. The Unix socket
    /// default matches a local daemon.
    pub fn from_env() -> Result<Self> {
        let spec = std::env::var(ENGINE_HOST_ENV)
            .unwrap_or_else(|_| "unix:///var/run/docker.sock".to_string());
        if spec.is_empty() {
            return Err(Error::Config(format!(
                "no {ENGINE_HOST_ENV} found in environment, please set it"
            )));
        }
        Ok(Self {
            endpoint: Endpoint::parse(&spec)?,
        })
    }

    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Confirms the daemon is reachable before any real work starts.
    pub async fn ping(&self) -> Result<()> {
        let resp = self.call("GET", "/_ping", None, &[]).await?;
        if resp.status == 200 {
            Ok(())
        } else {
            Err(api_error("ping", &resp))
        }
    }

    async fn call(
        &self,
        method: &str,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<Response> {
        http::request(&self.endpoint, method, path, content_type, body).await
    }

    async fn call_json(
        &self,
        method: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Response> {
        let bytes = serde_json::to_vec(body)?;
        self.call(method, path, Some("application/json"), &bytes)
            .await
    }

    /// Creates a container, generating throwaway names and retrying on
    /// collisions when no explicit name was requested.
    async fn create_container(&self, spec: &RunSpec, argv: &[String]) -> Result<String> {
        let body = create_body(spec, argv);

        if let Some(name) = &spec.name {
            return self.try_create(&body, Some(name)).await;
        }

        for attempt in 0..NAME_COLLISION_RETRIES {
            let name = throwaway_name();
            debug!(
                "attempting to create container {} ({}) from image: {}",
                name, attempt, spec.image
            );
            match self.try_create(&body, Some(&name)).await {
                Err(Error::EngineApi { status: 409, .. }) => continue,
                other => return other,
            }
        }
        // Give up on picking a name ourselves.
        self.try_create(&body, None).await
    }

    async fn try_create(&self, body: &serde_json::Value, name: Option<&str>) -> Result<String> {
        let path = match name {
            Some(n) => format!("/containers/create?name={}", encode_query(n)),
            None => "/containers/create".to_string(),
        };
        let resp = self.call_json("POST", &path, body).await?;
        match resp.status {
            200 | 201 => {
                let created: CreatedWire = serde_json::from_slice(&resp.body)?;
                Ok(created.id)
            }
            404 => Err(Error::NoSuchImage(
                body["Image"].as_str().unwrap_or_default().to_string(),
            )),
            _ => Err(api_error("create container", &resp)),
        }
    }

    /// Fetches a container's collected output, demultiplexing the engine's
    /// stream framing.
    async fn fetch_logs(&self, id: &str) -> Result<String> {
        let path = format!("/containers/{id}/logs?stdout=1&stderr=1");
        let resp = self.call("GET", &path, None, &[]).await?;
        match resp.status {
            200 => Ok(demux_log_stream(&resp.body)),
            404 => Err(Error::NoSuchContainer(id.to_string())),
            _ => Err(api_error("logs", &resp)),
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn build(
        &self,
        options: &BuildOptions,
        context: Vec<u8>,
        result_tag: &str,
    ) -> Result<()> {
        debug!("building image {}", result_tag);
        let path = format!(
            "/build?t={}&nocache={}&rm={}",
            encode_query(result_tag),
            options.no_cache,
            options.remove_temp_containers
        );
        // The daemon sniffs compression, so contexts travel gzipped.
        let context = gzip(&context)?;
        let resp = self
            .call("POST", &path, Some("application/x-tar"), &context)
            .await?;
        if resp.status != 200 {
            return Err(api_error("build", &resp));
        }
        // The response is a stream of JSON progress lines; an "error"
        // entry anywhere means the build failed even with a 200 status.
        for line in resp.body_text().lines() {
            if let Ok(progress) = serde_json::from_str::<BuildProgressWire>(line) {
                if let Some(message) = progress.error {
                    return Err(Error::EngineApi {
                        operation: format!("build {result_tag}"),
                        status: resp.status,
                        message,
                    });
                }
            }
        }
        Ok(())
    }

    async fn run(&self, spec: &RunSpec, argv: &[String]) -> Result<RunOutcome> {
        let id = self.create_container(spec, argv).await?;

        let start = self
            .call_json("POST", &format!("/containers/{id}/start"), &serde_json::json!({}))
            .await?;
        if !matches!(start.status, 204 | 304) {
            return Err(api_error("start container", &start));
        }

        if !spec.wait {
            return Ok(RunOutcome {
                container_id: id,
                exit_status: None,
                output: None,
            });
        }

        let waited = self
            .call_json("POST", &format!("/containers/{id}/wait"), &serde_json::json!({}))
            .await?;
        if waited.status != 200 {
            return Err(api_error("wait for container", &waited));
        }
        let wait: WaitWire = serde_json::from_slice(&waited.body)?;

        let logs = self.fetch_logs(&id).await?;
        let output = if spec.attach {
            print!("{logs}");
            None
        } else {
            Some(logs)
        };

        Ok(RunOutcome {
            container_id: id,
            exit_status: Some(wait.status_code),
            output,
        })
    }

    async fn commit(&self, container: &str, tag: Option<&ImageTag>) -> Result<String> {
        let mut path = format!("/commit?container={}", encode_query(container));
        if let Some(tag) = tag {
            path.push_str(&format!(
                "&repo={}&tag={}",
                encode_query(&tag.repository),
                encode_query(&tag.name)
            ));
        }
        debug!("commit of container {} (tag {:?})", container, tag.map(|t| t.to_string()));
        let resp = self.call_json("POST", &path, &serde_json::json!({})).await?;
        match resp.status {
            200 | 201 => {
                let created: CreatedWire = serde_json::from_slice(&resp.body)?;
                Ok(created.id)
            }
            404 => Err(Error::NoSuchContainer(container.to_string())),
            _ => Err(api_error("commit", &resp)),
        }
    }

    async fn tag_image(&self, image_id: &str, force: bool, tag: &ImageTag) -> Result<()> {
        debug!("tagging image {} as {}", image_id, tag);
        let path = format!(
            "/images/{}/tag?repo={}&tag={}&force={}",
            encode_query(image_id),
            encode_query(&tag.repository),
            encode_query(&tag.name),
            if force { 1 } else { 0 }
        );
        let resp = self.call("POST", &path, None, &[]).await?;
        match resp.status {
            200 | 201 => Ok(()),
            404 => Err(Error::NoSuchImage(image_id.to_string())),
            _ => Err(api_error("tag", &resp)),
        }
    }

    async fn stop(&self, container: &str) -> Result<()> {
        debug!("stopping container {}", container);
        let path = format!(
            "/containers/{}/stop?t={}",
            encode_query(container),
            STOP_GRACE.as_secs()
        );
        let resp = self.call("POST", &path, None, &[]).await?;
        match resp.status {
            204 | 304 => Ok(()),
            404 => Err(Error::NoSuchContainer(container.to_string())),
            _ => Err(api_error("stop", &resp)),
        }
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        debug!("removing container {}", container);
        let resp = self
            .call("DELETE", &format!("/containers/{}", encode_query(container)), None, &[])
            .await?;
        match resp.status {
            200 | 204 => Ok(()),
            404 => Err(Error::NoSuchContainer(container.to_string())),
            _ => Err(api_error("remove container", &resp)),
        }
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        debug!("removing image {}", image);
        let resp = self
            .call("DELETE", &format!("/images/{}", encode_query(image)), None, &[])
            .await?;
        match resp.status {
            200 => Ok(()),
            404 => Err(Error::NoSuchImage(image.to_string())),
            409 => Err(Error::ImageInUse(image.to_string())),
            _ => Err(api_error("remove image", &resp)),
        }
    }

    async fn inspect_image(&self, name: &str) -> Result<ImageFacts> {
        let resp = self
            .call("GET", &format!("/images/{}/json", encode_query(name)), None, &[])
            .await?;
        match resp.status {
            200 => {
                let wire: ImageInspectWire = serde_json::from_slice(&resp.body)?;
                Ok(ImageFacts {
                    id: wire.id,
                    created: parse_engine_time(&wire.created)?,
                })
            }
            404 => Err(Error::NoSuchImage(name.to_string())),
            _ => Err(api_error("inspect image", &resp)),
        }
    }

    async fn inspect_container(&self, name_or_id: &str) -> Result<ContainerFacts> {
        let resp = self
            .call(
                "GET",
                &format!("/containers/{}/json", encode_query(name_or_id)),
                None,
                &[],
            )
            .await?;
        match resp.status {
            200 => {
                let wire: ContainerInspectWire = serde_json::from_slice(&resp.body)?;
                let ports = wire
                    .network_settings
                    .ports
                    .keys()
                    .filter_map(|spec| spec.split('/').next()?.parse().ok())
                    .collect();
                Ok(ContainerFacts {
                    id: wire.id,
                    name: wire.name.trim_start_matches('/').to_string(),
                    running: wire.state.running,
                    created: parse_engine_time(&wire.created)?,
                    exit_status: wire.state.exit_code,
                    ip: wire.network_settings.ip_address,
                    ports,
                })
            }
            404 => Err(Error::NoSuchContainer(name_or_id.to_string())),
            _ => Err(api_error("inspect container", &resp)),
        }
    }

    async fn copy_from_container(&self, container: &str, path: &str) -> Result<Vec<u8>> {
        debug!("copying {} out of container {}", path, container);
        let url = format!(
            "/containers/{}/archive?path={}",
            encode_query(container),
            encode_query(path)
        );
        let resp = self.call("GET", &url, None, &[]).await?;
        match resp.status {
            200 => Ok(resp.body),
            404 => Err(Error::NoSuchContainer(container.to_string())),
            _ => Err(api_error("copy from container", &resp)),
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let resp = self.call("GET", "/containers/json?all=1", None, &[]).await?;
        if resp.status != 200 {
            return Err(api_error("list containers", &resp));
        }
        let wire: Vec<ContainerListWire> = serde_json::from_slice(&resp.body)?;
        Ok(wire
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id,
                names: c
                    .names
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .collect(),
                running: c.state == "running" || c.status.starts_with("Up"),
            })
            .collect())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let resp = self.call("GET", "/images/json", None, &[]).await?;
        if resp.status != 200 {
            return Err(api_error("list images", &resp));
        }
        let wire: Vec<ImageListWire> = serde_json::from_slice(&resp.body)?;
        Ok(wire
            .into_iter()
            .map(|i| ImageSummary {
                id: i.id,
                tags: i.repo_tags,
            })
            .collect())
    }
}

// =============================================================================
// Wire Formats
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreatedWire {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct WaitWire {
    #[serde(rename = "StatusCode")]
    status_code: i64,
}

#[derive(Debug, Deserialize)]
struct BuildProgressWire {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageInspectWire {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Created")]
    created: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContainerStateWire {
    #[serde(rename = "Running")]
    running: bool,
    #[serde(rename = "ExitCode")]
    exit_code: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NetworkSettingsWire {
    #[serde(rename = "IPAddress")]
    ip_address: String,
    #[serde(rename = "Ports")]
    ports: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ContainerInspectWire {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Created")]
    created: String,
    #[serde(rename = "State", default)]
    state: ContainerStateWire,
    #[serde(rename = "NetworkSettings", default)]
    network_settings: NetworkSettingsWire,
}

#[derive(Debug, Deserialize)]
struct ContainerListWire {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ImageListWire {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Vec<String>,
}

// =============================================================================
// Helpers
// =============================================================================

fn create_body(spec: &RunSpec, argv: &[String]) -> serde_json::Value {
    let binds: Vec<String> = spec
        .volumes
        .iter()
        .map(|(host, cont)| format!("{host}:{cont}"))
        .collect();
    let links: Vec<String> = spec
        .links
        .iter()
        .map(|(name, alias)| format!("{name}:{alias}"))
        .collect();
    let mut port_bindings = serde_json::Map::new();
    for (container_port, host_port) in &spec.ports {
        port_bindings.insert(
            format!("{container_port}/tcp"),
            serde_json::json!([{ "HostIp": "127.0.0.1", "HostPort": host_port.to_string() }]),
        );
    }
    let devices: Vec<serde_json::Value> = spec
        .devices
        .iter()
        .map(|(host, cont)| {
            serde_json::json!({
                "PathOnHost": host,
                "PathInContainer": cont,
                "CgroupPermissions": "rwm",
            })
        })
        .collect();

    serde_json::json!({
        "Image": spec.image,
        "Cmd": argv,
        "ExposedPorts": spec
            .ports
            .keys()
            .map(|p| (format!("{p}/tcp"), serde_json::json!({})))
            .collect::<serde_json::Map<_, _>>(),
        "HostConfig": {
            "Binds": binds,
            "Links": links,
            "PortBindings": port_bindings,
            "Devices": devices,
            "Privileged": spec.privileged,
        },
    })
}

fn api_error(operation: &str, resp: &Response) -> Error {
    let message = resp.body_text().trim().to_string();
    warn!("engine {} failed: {} {}", operation, resp.status, message);
    Error::EngineApi {
        operation: operation.to_string(),
        status: resp.status,
        message,
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write as _;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn parse_engine_time(raw: &str) -> Result<Stamp> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("bad engine timestamp '{raw}': {e}")))
}

/// Percent-encodes a query value.
fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' | b':' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Splits the engine's multiplexed log stream into plain text. Frames are
/// an 8-byte header (stream type, three zero bytes, big-endian length)
/// followed by that many payload bytes; TTY output arrives unframed.
fn demux_log_stream(raw: &[u8]) -> String {
    let mut out = Vec::new();
    let mut rest = raw;
    while rest.len() >= 8 {
        let kind = rest[0];
        if !(kind <= 2 && rest[1] == 0 && rest[2] == 0 && rest[3] == 0) {
            // Not framed; treat the whole stream as raw output.
            return String::from_utf8_lossy(raw).into_owned();
        }
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        if rest.len() < 8 + len {
            break;
        }
        out.extend_from_slice(&rest[8..8 + len]);
        rest = &rest[8 + len..];
    }
    if out.is_empty() && !raw.is_empty() && raw.len() < 8 {
        return String::from_utf8_lossy(raw).into_owned();
    }
    String::from_utf8_lossy(&out).into_owned()
}
