//! Docker Engine REST client for a single execution host.
//!
//! Speaks plain HTTP/1 to the daemon's TCP control endpoint: image inspect
//! to discover the exposed service port, container create with a host-port
//! binding, start, stop, delete, container inspect. One published port per
//! image is supported.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tracing::{debug, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::types::{ContainerRuntime, ContainerStatus, Provisioned};

const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Docker Engine API client bound to one host's control endpoint.
#[derive(Debug, Clone)]
pub struct DockerClient {
    /// Control endpoint, `address:port`.
    endpoint: String,
    /// Address participants connect to (endpoint minus the control port —
    /// published ports bind on the same interface).
    address: String,
    create_timeout: Duration,
    op_timeout: Duration,
}

impl DockerClient {
    pub fn new(endpoint: &str) -> Self {
        let address = endpoint
            .rsplit_once(':')
            .map(|(addr, _)| addr)
            .unwrap_or(endpoint)
            .to_string();
        Self {
            endpoint: endpoint.to_string(),
            address,
            create_timeout: DEFAULT_CREATE_TIMEOUT,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Override the default timeouts (for testing).
    pub fn with_timeouts(mut self, create: Duration, op: Duration) -> Self {
        self.create_timeout = create;
        self.op_timeout = op;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One HTTP exchange with the daemon, bounded by `timeout`.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
        timeout: Duration,
    ) -> RuntimeResult<(u16, Bytes)> {
        let uri = format!("http://{}{}", self.endpoint, path);
        let unreachable = |e: String| RuntimeError::Unreachable(format!("{uri}: {e}"));

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&self.endpoint)
                .await
                .map_err(|e| unreachable(e.to_string()))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| unreachable(e.to_string()))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let builder = http::Request::builder()
                .method(method)
                .uri(&uri)
                .header("host", &self.endpoint)
                .header("user-agent", "arena-runtime/0.1");
            let req = match body {
                Some(json) => {
                    let payload = serde_json::to_vec(&json)
                        .map_err(|e| RuntimeError::Provision(e.to_string()))?;
                    builder
                        .header("content-type", "application/json")
                        .body(Full::new(Bytes::from(payload)))
                }
                None => builder.body(Full::new(Bytes::new())),
            }
            .map_err(|e| unreachable(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| unreachable(e.to_string()))?;
            let status = resp.status().as_u16();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| unreachable(e.to_string()))?
                .to_bytes();
            Ok((status, bytes))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%uri, ?timeout, "docker request timed out");
                Err(RuntimeError::Unreachable(format!("{uri}: timed out")))
            }
        }
    }

    /// Discover the single exposed port of an image, e.g. `"80/tcp"`.
    async fn exposed_port(&self, image: &str) -> RuntimeResult<String> {
        let path = format!("/images/{image}/json");
        let (status, bytes) = self.request("GET", &path, None, self.op_timeout).await?;
        if status == 404 {
            return Err(RuntimeError::Provision(format!(
                "image not present on host: {image}"
            )));
        }
        if status != 200 {
            return Err(RuntimeError::Provision(format!(
                "image inspect returned {status} for {image}"
            )));
        }
        let json: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| RuntimeError::Provision(format!("image inspect body: {e}")))?;
        first_exposed_port(&json).ok_or_else(|| {
            RuntimeError::Provision(format!("image {image} exposes no ports"))
        })
    }
}

/// First key of `Config.ExposedPorts` from an image inspect response.
fn first_exposed_port(json: &serde_json::Value) -> Option<String> {
    json.get("Config")?
        .get("ExposedPorts")?
        .as_object()?
        .keys()
        .next()
        .cloned()
}

/// Body for `POST /containers/create`: publish the image's service port on
/// the allocated host port.
fn build_create_body(image: &str, container_port: &str, host_port: u16) -> serde_json::Value {
    let mut exposed = serde_json::Map::new();
    exposed.insert(container_port.to_string(), serde_json::json!({}));
    let mut bindings = serde_json::Map::new();
    bindings.insert(
        container_port.to_string(),
        serde_json::json!([{ "HostPort": host_port.to_string() }]),
    );
    serde_json::json!({
        "Image": image,
        "ExposedPorts": exposed,
        "HostConfig": { "PortBindings": bindings },
    })
}

/// Trim a response body for error messages.
fn snippet(bytes: &Bytes) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.chars().take(200).collect()
}

impl ContainerRuntime for DockerClient {
    async fn create(&self, image: &str, host_port: u16) -> RuntimeResult<Provisioned> {
        let container_port = self.exposed_port(image).await?;
        let body = build_create_body(image, &container_port, host_port);

        let (status, bytes) = self
            .request("POST", "/containers/create", Some(body), self.create_timeout)
            .await?;
        if status != 201 {
            return Err(RuntimeError::Provision(format!(
                "create returned {status}: {}",
                snippet(&bytes)
            )));
        }
        let json: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| RuntimeError::Provision(format!("create body: {e}")))?;
        let container_id = json
            .get("Id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuntimeError::Provision("create response missing Id".to_string()))?
            .to_string();

        let start_path = format!("/containers/{container_id}/start");
        let (status, bytes) = self
            .request("POST", &start_path, None, self.create_timeout)
            .await?;
        if status != 204 && status != 304 {
            // The container exists but never started; clean it up so it
            // doesn't sit on the host unaccounted for.
            let delete_path = format!("/containers/{container_id}?force=true");
            if let Err(e) = self.request("DELETE", &delete_path, None, self.op_timeout).await {
                warn!(%container_id, error = %e, "cleanup of unstarted container failed");
            }
            return Err(RuntimeError::Provision(format!(
                "start returned {status}: {}",
                snippet(&bytes)
            )));
        }

        debug!(%image, %container_id, host_port, "container provisioned");
        Ok(Provisioned {
            container_id,
            address: self.address.clone(),
            port: host_port,
        })
    }

    async fn destroy(&self, container_id: &str) -> RuntimeResult<()> {
        let stop_path = format!("/containers/{container_id}/stop?t=5");
        let (status, bytes) = self.request("POST", &stop_path, None, self.op_timeout).await?;
        // 304: already stopped. 404: already gone. Both fine.
        if !matches!(status, 204 | 304 | 404) {
            return Err(RuntimeError::Destroy(format!(
                "stop returned {status}: {}",
                snippet(&bytes)
            )));
        }

        let delete_path = format!("/containers/{container_id}?force=true");
        let (status, bytes) = self
            .request("DELETE", &delete_path, None, self.op_timeout)
            .await?;
        match status {
            200 | 204 | 404 => {
                debug!(%container_id, "container destroyed");
                Ok(())
            }
            _ => Err(RuntimeError::Destroy(format!(
                "delete returned {status}: {}",
                snippet(&bytes)
            ))),
        }
    }

    async fn inspect(&self, container_id: &str) -> ContainerStatus {
        let path = format!("/containers/{container_id}/json");
        match self.request("GET", &path, None, self.op_timeout).await {
            Err(_) => ContainerStatus::Unreachable,
            Ok((404, _)) => ContainerStatus::Absent,
            Ok((200, bytes)) => {
                let running = serde_json::from_slice::<serde_json::Value>(&bytes)
                    .ok()
                    .and_then(|v| v.get("State")?.get("Running")?.as_bool())
                    .unwrap_or(false);
                if running {
                    ContainerStatus::Running
                } else {
                    ContainerStatus::Absent
                }
            }
            Ok((status, _)) => {
                debug!(%container_id, status, "unexpected inspect status");
                ContainerStatus::Unreachable
            }
        }
    }
}
