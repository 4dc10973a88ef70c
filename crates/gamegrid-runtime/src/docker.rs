//! Docker Engine API client over plain HTTP/1.1.
//!
//! Each call opens a TCP connection to the node's `host:port`, performs a
//! single request, and drops the connection. The node's API key is sent as a
//! bearer token for the authenticating proxy that fronts the daemon.
//! Timeouts are not applied here; wrap the client in
//! [`BoundedRuntime`](crate::BoundedRuntime).

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

use gamegrid_state::ConnectionConfig;

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::ContainerRuntime;
use crate::types::*;

const DEFAULT_API_VERSION: &str = "v1.43";

/// Container runtime backed by the Docker Engine HTTP API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    api_version: String,
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Pin a specific API version prefix (e.g. `v1.41`).
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    async fn send(
        &self,
        conn: &ConnectionConfig,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> RuntimeResult<(StatusCode, Bytes)> {
        let address = conn.address();
        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|e| RuntimeError::Connection(format!("{address}: {e}")))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, connection) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RuntimeError::Connection(format!("handshake with {address}: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "runtime connection closed with error");
            }
        });

        let uri = format!("/{}{}", self.api_version, path);
        let mut builder = http::Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header(HOST, &address)
            .header(USER_AGENT, "gamegrid/0.1");
        if !conn.api_key.is_empty() {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", conn.api_key));
        }
        let payload = match body {
            Some(bytes) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder
            .body(payload)
            .map_err(|e| RuntimeError::Protocol(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| RuntimeError::Connection(format!("{method} {uri}: {e}")))?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RuntimeError::Connection(format!("reading {uri}: {e}")))?
            .to_bytes();

        debug!(%method, %uri, %status, "runtime call completed");
        Ok((status, bytes))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        conn: &ConnectionConfig,
        path: &str,
        handle: Option<&str>,
    ) -> RuntimeResult<T> {
        let (status, body) = self.send(conn, Method::GET, path, None).await?;
        check_status(status, &body, handle)?;
        serde_json::from_slice(&body).map_err(|e| RuntimeError::Protocol(format!("{path}: {e}")))
    }

    async fn post_action(&self, conn: &ConnectionConfig, handle: &str, action: &str) -> RuntimeResult<()> {
        let path = format!("/containers/{handle}/{action}");
        let (status, body) = self.send(conn, Method::POST, &path, None).await?;
        // 304: already in the requested state.
        if status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        check_status(status, &body, Some(handle))
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self, conn: &ConnectionConfig) -> RuntimeResult<()> {
        let (status, body) = self.send(conn, Method::GET, "/_ping", None).await?;
        check_status(status, &body, None)
    }

    async fn list_containers(&self, conn: &ConnectionConfig) -> RuntimeResult<Vec<ContainerSummary>> {
        let raw: Vec<RawSummary> = self.get_json(conn, "/containers/json", None).await?;
        Ok(raw.into_iter().map(RawSummary::into_summary).collect())
    }

    async fn stats(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<ContainerStats> {
        let path = format!("/containers/{handle}/stats?stream=false");
        let raw: RawStats = self.get_json(conn, &path, Some(handle)).await?;
        Ok(raw.into_stats())
    }

    async fn inspect(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<ContainerState> {
        let path = format!("/containers/{handle}/json");
        let raw: RawInspect = self.get_json(conn, &path, Some(handle)).await?;
        Ok(raw.state.into_state())
    }

    async fn logs(&self, conn: &ConnectionConfig, handle: &str, tail: usize) -> RuntimeResult<String> {
        let path = format!("/containers/{handle}/logs?stdout=1&stderr=1&timestamps=1&tail={tail}");
        let (status, body) = self.send(conn, Method::GET, &path, None).await?;
        check_status(status, &body, Some(handle))?;
        Ok(demux_log_stream(&body))
    }

    async fn create_container(&self, conn: &ConnectionConfig, spec: &ContainerSpec) -> RuntimeResult<String> {
        if !spec
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(RuntimeError::Protocol(format!(
                "invalid container name: {}",
                spec.name
            )));
        }
        let path = format!("/containers/create?name={}", spec.name);
        let body = serde_json::to_vec(&create_body(spec))
            .map_err(|e| RuntimeError::Protocol(e.to_string()))?;
        let (status, response) = self.send(conn, Method::POST, &path, Some(body)).await?;
        check_status(status, &response, None)?;
        let created: RawCreated = serde_json::from_slice(&response)
            .map_err(|e| RuntimeError::Protocol(format!("create response: {e}")))?;
        Ok(created.id)
    }

    async fn start(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        self.post_action(conn, handle, "start").await
    }

    async fn stop(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        self.post_action(conn, handle, "stop").await
    }

    async fn restart(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        self.post_action(conn, handle, "restart").await
    }

    async fn remove(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        let path = format!("/containers/{handle}?force=true");
        let (status, body) = self.send(conn, Method::DELETE, &path, None).await?;
        check_status(status, &body, Some(handle))
    }
}

/// Map a non-success status to a `RuntimeError`.
fn check_status(status: StatusCode, body: &[u8], handle: Option<&str>) -> RuntimeResult<()> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::NOT_FOUND {
        if let Some(handle) = handle {
            return Err(RuntimeError::NotFound(handle.to_string()));
        }
    }
    let message = serde_json::from_slice::<RawErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    Err(RuntimeError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Build the `/containers/create` request body.
fn create_body(spec: &ContainerSpec) -> Value {
    let exposed: Map<String, Value> = spec.ports.iter().map(|p| (p.key(), json!({}))).collect();
    let bindings: Map<String, Value> = spec
        .ports
        .iter()
        .map(|p| (p.key(), json!([{ "HostPort": p.host_port.to_string() }])))
        .collect();
    let restart = if spec.auto_restart { "unless-stopped" } else { "no" };

    json!({
        "Image": spec.image,
        "Env": spec.env,
        "Labels": spec.labels,
        "ExposedPorts": exposed,
        "HostConfig": {
            "PortBindings": bindings,
            "Binds": spec.volumes,
            "RestartPolicy": { "Name": restart },
            "Memory": spec.memory_limit_mb.unwrap_or(0) * 1024 * 1024,
            "NanoCpus": spec.cpu_millis.unwrap_or(0) * 1_000_000,
        },
    })
}

/// Decode Docker's multiplexed log stream into plain text.
///
/// Non-TTY containers frame output as `[stream, 0, 0, 0, len_be32] payload`.
/// Input that does not look framed is returned as-is.
fn demux_log_stream(raw: &[u8]) -> String {
    let framed = raw.len() >= 8 && raw[0] <= 2 && raw[1..4] == [0, 0, 0];
    if !framed {
        return String::from_utf8_lossy(raw).into_owned();
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw;
    while rest.len() >= 8 {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (8 + len).min(rest.len());
        out.extend_from_slice(&rest[8..end]);
        rest = &rest[end..];
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ── Docker wire types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawCreated {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "State", default)]
    state: String,
}

impl RawSummary {
    fn into_summary(self) -> ContainerSummary {
        let name = self
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        ContainerSummary {
            id: self.id,
            name,
            state: self.state,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawCpuUsage {
    #[serde(default)]
    total_usage: u64,
    #[serde(default)]
    percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCpuStats {
    #[serde(default)]
    cpu_usage: RawCpuUsage,
    #[serde(default)]
    system_cpu_usage: u64,
    #[serde(default)]
    online_cpus: u32,
}

impl RawCpuStats {
    fn sample(&self) -> CpuSample {
        CpuSample {
            container_usage: self.cpu_usage.total_usage,
            system_usage: self.system_cpu_usage,
        }
    }

    fn cores(&self) -> u32 {
        if self.online_cpus > 0 {
            return self.online_cpus;
        }
        self.cpu_usage
            .percpu_usage
            .as_ref()
            .map(|v| v.len() as u32)
            .unwrap_or(1)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawMemoryStats {
    #[serde(default)]
    usage: u64,
    #[serde(default)]
    limit: u64,
}

#[derive(Debug, Default, Deserialize)]
struct RawNetwork {
    #[serde(default)]
    rx_bytes: u64,
    #[serde(default)]
    tx_bytes: u64,
}

#[derive(Debug, Default, Deserialize)]
struct RawStats {
    #[serde(default)]
    cpu_stats: RawCpuStats,
    #[serde(default)]
    precpu_stats: RawCpuStats,
    #[serde(default)]
    memory_stats: RawMemoryStats,
    #[serde(default)]
    networks: Option<BTreeMap<String, RawNetwork>>,
}

impl RawStats {
    fn into_stats(self) -> ContainerStats {
        ContainerStats {
            cpu: self.cpu_stats.sample(),
            precpu: self.precpu_stats.sample(),
            online_cpus: self.cpu_stats.cores(),
            memory_usage_bytes: self.memory_stats.usage,
            memory_limit_bytes: self.memory_stats.limit,
            networks: self
                .networks
                .unwrap_or_default()
                .into_iter()
                .map(|(name, n)| {
                    (
                        name,
                        NetworkUsage {
                            rx_bytes: n.rx_bytes,
                            tx_bytes: n.tx_bytes,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawInspect {
    #[serde(rename = "State")]
    state: RawState,
}

#[derive(Debug, Deserialize)]
struct RawState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Running", default)]
    running: bool,
    #[serde(rename = "ExitCode")]
    exit_code: Option<i64>,
    #[serde(rename = "StartedAt")]
    started_at: Option<String>,
    #[serde(rename = "Error")]
    error: Option<String>,
}

impl RawState {
    fn into_state(self) -> ContainerState {
        ContainerState {
            status: self.status,
            running: self.running,
            exit_code: self.exit_code,
            started_at: self.started_at,
            error: self.error.filter(|e| !e.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(port: u16) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port,
            api_key: String::new(),
        }
    }

    #[test]
    fn parses_stats_payload() {
        let payload = r#"{
            "cpu_stats": {
                "cpu_usage": {"total_usage": 400, "percpu_usage": [100, 100, 100, 100]},
                "system_cpu_usage": 2000
            },
            "precpu_stats": {
                "cpu_usage": {"total_usage": 200},
                "system_cpu_usage": 1000
            },
            "memory_stats": {"usage": 104857600, "limit": 209715200},
            "networks": {"eth0": {"rx_bytes": 10, "tx_bytes": 20}}
        }"#;
        let raw: RawStats = serde_json::from_str(payload).unwrap();
        let stats = raw.into_stats();

        assert_eq!(stats.online_cpus, 4);
        assert_eq!(stats.memory_usage_bytes, 104_857_600);
        // (200 / 1000) × 4 × 100
        assert!((stats.cpu_percent() - 80.0).abs() < 1e-9);
        assert_eq!(stats.network_totals().tx_bytes, 20);
    }

    #[test]
    fn parses_summary_names() {
        let payload = r#"[{"Id": "abc", "Names": ["/server-1"], "State": "running"}]"#;
        let raw: Vec<RawSummary> = serde_json::from_str(payload).unwrap();
        let summary = raw.into_iter().next().unwrap().into_summary();
        assert_eq!(summary.name, "server-1");
        assert_eq!(summary.state, "running");
    }

    #[test]
    fn create_body_publishes_ports_and_restart_policy() {
        let spec = ContainerSpec {
            name: "server-1".to_string(),
            image: "itzg/minecraft-server:latest".to_string(),
            env: vec!["EULA=TRUE".to_string()],
            ports: vec![PortBinding {
                container_port: 25565,
                host_port: 25565,
                protocol: PortProtocol::Tcp,
            }],
            volumes: vec!["/data/servers/1:/data".to_string()],
            labels: BTreeMap::new(),
            memory_limit_mb: Some(2048),
            cpu_millis: Some(1500),
            auto_restart: true,
        };
        let body = create_body(&spec);

        assert_eq!(body["Image"], "itzg/minecraft-server:latest");
        assert!(body["ExposedPorts"].get("25565/tcp").is_some());
        assert_eq!(
            body["HostConfig"]["PortBindings"]["25565/tcp"][0]["HostPort"],
            "25565"
        );
        assert_eq!(body["HostConfig"]["RestartPolicy"]["Name"], "unless-stopped");
        assert_eq!(body["HostConfig"]["Memory"], 2048u64 * 1024 * 1024);
        assert_eq!(body["HostConfig"]["NanoCpus"], 1_500_000_000u64);
    }

    #[test]
    fn demuxes_framed_logs() {
        let mut raw = vec![1, 0, 0, 0, 0, 0, 0, 6];
        raw.extend_from_slice(b"hello\n");
        raw.extend_from_slice(&[2, 0, 0, 0, 0, 0, 0, 5]);
        raw.extend_from_slice(b"oops\n");
        assert_eq!(demux_log_stream(&raw), "hello\noops\n");
    }

    #[test]
    fn passes_through_unframed_logs() {
        assert_eq!(demux_log_stream(b"plain tty output"), "plain tty output");
    }

    #[test]
    fn check_status_maps_errors() {
        assert!(check_status(StatusCode::NO_CONTENT, b"", None).is_ok());
        assert!(matches!(
            check_status(StatusCode::NOT_FOUND, b"", Some("abc")),
            Err(RuntimeError::NotFound(h)) if h == "abc"
        ));
        let err = check_status(
            StatusCode::CONFLICT,
            br#"{"message":"name already in use"}"#,
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Api { status: 409, ref message } if message == "name already in use"
        ));
    }

    #[tokio::test]
    async fn ping_to_closed_port_is_connection_error() {
        let runtime = DockerRuntime::new();
        let result = runtime.ping(&conn(1)).await;
        assert!(matches!(result, Err(RuntimeError::Connection(_))));
    }

    #[tokio::test]
    async fn rejects_unsafe_container_names() {
        let runtime = DockerRuntime::new();
        let spec = ContainerSpec {
            name: "bad name&x=1".to_string(),
            image: "img".to_string(),
            env: vec![],
            ports: vec![],
            volumes: vec![],
            labels: BTreeMap::new(),
            memory_limit_mb: None,
            cpu_millis: None,
            auto_restart: false,
        };
        let result = runtime.create_container(&conn(1), &spec).await;
        assert!(matches!(result, Err(RuntimeError::Protocol(_))));
    }
}
