// Thin Docker Engine API client over the local unix socket.

pub mod normalize;

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use http_body_util::{BodyExt, BodyStream, Full, Limited};
use hyper::{Method, Request};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use hyperlocal::{UnixConnector, Uri as UnixUri};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Cap on JSON response bodies.
const MAX_JSON_BODY: usize = 10 << 20;
/// Cap on error bodies kept for diagnostics.
const MAX_ERROR_BODY: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    #[error("docker api {method} {path}: status {status}: {body}")]
    Status {
        method: &'static str,
        path: String,
        status: u16,
        body: String,
    },
    #[error("docker api {method} {path}: {message}")]
    Transport {
        method: &'static str,
        path: String,
        message: String,
    },
    #[error("docker api {method} {path}: timed out")]
    Timeout { method: &'static str, path: String },
    #[error("docker api decode {path}: {message}")]
    Decode { path: String, message: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Labels", default)]
    pub labels: HashMap<String, String>,
    #[serde(rename = "Created", default)]
    pub created: i64,
}

impl ContainerSummary {
    /// Container name with the leading slash the Engine API adds stripped.
    pub fn clean_name(&self) -> String {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| self.id.clone())
    }

    /// Stable service id: compose service label, else the container name,
    /// else the short container id.
    pub fn service_id(&self) -> String {
        if let Some(v) = self.labels.get("com.docker.compose.service") {
            if !v.is_empty() {
                return v.clone();
            }
        }
        if let Some(name) = self.names.first() {
            return name.trim_start_matches('/').to_string();
        }
        if self.id.len() >= 12 {
            return self.id[..12].to_string();
        }
        self.id.clone()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerInspect {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "RestartCount", default)]
    pub restart_count: i64,
    #[serde(rename = "State", default)]
    pub state: InspectState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InspectState {
    #[serde(rename = "StartedAt", default)]
    pub started_at: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

/// One non-streaming stats snapshot (`/containers/{id}/stats?stream=false`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsSnapshot {
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub precpu_stats: PreCpuStats,
    #[serde(default)]
    pub memory_stats: MemoryStats,
    #[serde(default)]
    pub networks: HashMap<String, NetworkCounters>,
    #[serde(default)]
    pub blkio_stats: BlkioStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub system_cpu_usage: u64,
    #[serde(default)]
    pub online_cpus: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
    #[serde(default)]
    pub percpu_usage: Vec<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreCpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub system_cpu_usage: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: u64,
    #[serde(default)]
    pub limit: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkCounters {
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlkioStats {
    #[serde(default)]
    pub io_service_bytes_recursive: Option<Vec<BlkioEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlkioEntry {
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub value: u64,
}

/// Parameters for opening a log stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogsOptions {
    pub follow: bool,
    /// Epoch seconds; only lines after this instant.
    pub since: Option<i64>,
    pub tail: Option<u32>,
}

pub struct DockerClient {
    socket: String,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl DockerClient {
    pub fn new(socket_path: &str) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(UnixConnector);
        Self {
            socket: socket_path.to_string(),
            client,
        }
    }

    pub async fn ping(&self) -> Result<(), DockerError> {
        self.get_json_bytes("/_ping").await.map(|_| ())
    }

    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DockerError> {
        self.get_json("/containers/json?all=1").await
    }

    pub async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, DockerError> {
        self.get_json(&format!("/containers/{id}/json")).await
    }

    pub async fn stats(&self, id: &str) -> Result<StatsSnapshot, DockerError> {
        self.get_json(&format!("/containers/{id}/stats?stream=false"))
            .await
    }

    /// Open a log byte stream. The returned reader yields the raw Engine
    /// payload: multiplexed frames without a TTY, plain text with one.
    pub async fn logs(
        &self,
        id: &str,
        opts: LogsOptions,
    ) -> Result<impl AsyncRead + Send + Unpin, DockerError> {
        let mut path = format!("/containers/{id}/logs?stdout=1&stderr=1&timestamps=1");
        if opts.follow {
            path.push_str("&follow=1");
        }
        if let Some(since) = opts.since {
            path.push_str(&format!("&since={since}"));
        }
        if let Some(tail) = opts.tail {
            path.push_str(&format!("&tail={tail}"));
        }

        let res = self.get(&path, REQUEST_TIMEOUT).await?;
        let status = res.status();
        if !status.is_success() {
            let body = read_capped(res.into_body(), MAX_ERROR_BODY).await;
            return Err(DockerError::Status {
                method: "GET",
                path,
                status: status.as_u16(),
                body,
            });
        }
        let stream = BodyStream::new(res.into_body()).map(|frame| match frame {
            Ok(frame) => Ok(frame.into_data().unwrap_or_default()),
            Err(e) => Err(std::io::Error::other(e)),
        });
        Ok(StreamReader::new(stream))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, DockerError> {
        let bytes = self.get_json_bytes(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| DockerError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    async fn get_json_bytes(&self, path: &str) -> Result<Bytes, DockerError> {
        let res = self.get(path, REQUEST_TIMEOUT).await?;
        let status = res.status();
        if !status.is_success() {
            let body = read_capped(res.into_body(), MAX_ERROR_BODY).await;
            return Err(DockerError::Status {
                method: "GET",
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Limited::new(res.into_body(), MAX_JSON_BODY)
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| DockerError::Transport {
                method: "GET",
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    async fn get(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<hyper::Response<hyper::body::Incoming>, DockerError> {
        let uri: hyper::Uri = UnixUri::new(&self.socket, path).into();
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Full::default())
            .map_err(|e| DockerError::Transport {
                method: "GET",
                path: path.to_string(),
                message: e.to_string(),
            })?;
        match tokio::time::timeout(timeout, self.client.request(req)).await {
            Ok(Ok(res)) => Ok(res),
            Ok(Err(e)) => Err(DockerError::Transport {
                method: "GET",
                path: path.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(DockerError::Timeout {
                method: "GET",
                path: path.to_string(),
            }),
        }
    }
}

async fn read_capped(body: hyper::body::Incoming, cap: usize) -> String {
    let mut buf = Vec::with_capacity(cap.min(4096));
    let mut stream = BodyStream::new(body);
    while let Ok(Some(frame)) = stream.try_next().await {
        if let Ok(data) = frame.into_data() {
            let take = (cap - buf.len()).min(data.len());
            buf.extend_from_slice(&data[..take]);
            if buf.len() >= cap {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}
