//! etcd (v2 keys API) adapter for the coordination store.
//!
//! The store endpoint is normally derived from the engine host: the same
//! machine, with the port swapped for the coordination port. An explicit
//! endpoint in the environment overrides the derivation.

use super::CoordStore;
use crate::constants::{ENGINE_HOST_ENV, STORE_HOST_ENV, STORE_PORT, STORE_TTL};
use crate::engine::http::{self, Endpoint, Response};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// etcd key-not-found error code.
const KEY_NOT_FOUND: u64 = 100;

/// etcd v2 client.
pub struct EtcdStore {
    endpoint: Endpoint,
}

impl EtcdStore {
    /// Resolves the store endpoint from the environment: an explicit
    /// override wins, otherwise the engine host with the store port.
    pub fn from_env() -> Result<Self> {
        if let Ok(explicit) = std::env::var(STORE_HOST_ENV) {
            return Ok(Self {
                endpoint: Endpoint::parse(&explicit)?,
            });
        }
        let engine_spec = std::env::var(ENGINE_HOST_ENV).unwrap_or_default();
        let engine = Endpoint::parse(&engine_spec).map_err(|_| {
            Error::Config(format!(
                "can't derive a store endpoint: set {STORE_HOST_ENV} or a tcp {ENGINE_HOST_ENV}"
            ))
        })?;
        let host = engine.host().ok_or_else(|| {
            Error::Config(format!(
                "engine endpoint has no host part; set {STORE_HOST_ENV} explicitly"
            ))
        })?;
        Ok(Self {
            endpoint: Endpoint::Tcp(format!("{host}:{STORE_PORT}")),
        })
    }

    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    /// Confirms the store is reachable: a probe read of a key that cannot
    /// exist must come back as a clean not-found.
    pub async fn ping(&self) -> Result<()> {
        match self.get("/pickett-liveness-probe").await {
            Ok(None) => Ok(()),
            Ok(Some(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn call(&self, method: &str, path: &str, form: Option<String>) -> Result<Response> {
        let (content_type, body) = match &form {
            Some(data) => (
                Some("application/x-www-form-urlencoded"),
                data.as_bytes().to_vec(),
            ),
            None => (None, Vec::new()),
        };
        http::request(&self.endpoint, method, path, content_type, &body).await
    }

    fn keys_path(key: &str) -> String {
        format!("/v2/keys{}", if key.starts_with('/') { "" } else { "/" }) + key
    }
}

#[async_trait]
impl CoordStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        debug!("[store] GET {}", key);
        let resp = self.call("GET", &Self::keys_path(key), None).await?;
        match classify(key, "get", &resp)? {
            None => Ok(None),
            Some(wire) => Ok(wire.node.and_then(|n| n.value)),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<Option<String>> {
        debug!("[store] PUT {} {}", key, value);
        let form = format!(
            "value={}&ttl={}",
            form_encode(value),
            STORE_TTL.as_secs()
        );
        let resp = self.call("PUT", &Self::keys_path(key), Some(form)).await?;
        match classify(key, "put", &resp)? {
            None => Ok(None),
            Some(wire) => Ok(wire.prev_node.and_then(|n| n.value)),
        }
    }

    async fn delete(&self, key: &str) -> Result<Option<String>> {
        debug!("[store] DELETE {}", key);
        let resp = self.call("DELETE", &Self::keys_path(key), None).await?;
        match classify(key, "delete", &resp)? {
            None => Ok(None),
            Some(wire) => Ok(wire.prev_node.and_then(|n| n.value)),
        }
    }

    async fn delete_all(&self, key: &str) -> Result<()> {
        debug!("[store] DELETE (recursive) {}", key);
        let path = format!("{}?recursive=true", Self::keys_path(key));
        let resp = self.call("DELETE", &path, None).await?;
        classify(key, "recursive delete", &resp)?;
        Ok(())
    }

    async fn children(&self, key: &str) -> Result<Option<Vec<String>>> {
        debug!("[store] CHILDREN {}", key);
        let resp = self.call("GET", &Self::keys_path(key), None).await?;
        match classify(key, "children", &resp)? {
            None => Ok(None),
            Some(wire) => {
                let names = wire
                    .node
                    .map(|n| {
                        n.nodes
                            .into_iter()
                            .filter_map(|child| {
                                child.key.rsplit('/').next().map(|s| s.to_string())
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Some(names))
            }
        }
    }
}

// =============================================================================
// Wire Formats
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeWire {
    key: String,
    value: Option<String>,
    nodes: Vec<NodeWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeysWire {
    node: Option<NodeWire>,
    #[serde(rename = "prevNode")]
    prev_node: Option<NodeWire>,
}

#[derive(Debug, Deserialize)]
struct ErrorWire {
    #[serde(rename = "errorCode", default)]
    error_code: u64,
    #[serde(default)]
    message: String,
}

/// Separates "key not found" (a normal `None`) from real store failures.
fn classify(key: &str, operation: &str, resp: &Response) -> Result<Option<KeysWire>> {
    if resp.status < 400 {
        let wire: KeysWire = serde_json::from_slice(&resp.body)?;
        return Ok(Some(wire));
    }
    if let Ok(err) = serde_json::from_slice::<ErrorWire>(&resp.body) {
        if err.error_code == KEY_NOT_FOUND {
            debug!("[store] {} not found", key);
            return Ok(None);
        }
        return Err(Error::Store {
            operation: format!("{operation} {key}"),
            message: err.message,
        });
    }
    Err(Error::Store {
        operation: format!("{operation} {key}"),
        message: format!("status {}", resp.status),
    })
}

fn form_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
