// Metrics tick: host sample plus one pass over every container.

mod host;

pub use host::HostSampler;

use crate::docker::{normalize::normalize_stats, DockerClient};
use crate::models::{Container, Service};
use crate::repo::Repository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, warn};

pub struct Collector {
    repo: Arc<Repository>,
    docker: Arc<DockerClient>,
    host: HostSampler,
}

impl Collector {
    pub fn new(repo: Arc<Repository>, docker: Arc<DockerClient>) -> Self {
        Self {
            repo,
            docker,
            host: HostSampler::new(),
        }
    }

    /// One collection pass. A listing failure aborts the container half of
    /// the pass; a failure on a single container skips only that container.
    pub async fn tick(&mut self) {
        let metric = self.host.collect();
        if let Err(e) = self.repo.insert_host_metric(&metric).await {
            error!(error = %e, "insert host metric");
        }

        let containers = match self.docker.list_containers().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "list containers");
                return;
            }
        };

        let mut seen = Vec::with_capacity(containers.len());
        for c in &containers {
            seen.push(c.id.clone());
            let service_id = c.service_id();
            let labels_json =
                serde_json::to_string(&c.labels).unwrap_or_else(|_| "{}".to_string());

            let inspect = match self.docker.inspect_container(&c.id).await {
                Ok(i) => i,
                Err(e) => {
                    warn!(container = %c.id, error = %e, "inspect container");
                    continue;
                }
            };
            let started_at = DateTime::parse_from_rfc3339(&inspect.state.started_at)
                .ok()
                .map(|t| t.with_timezone(&Utc));

            let svc = Service {
                id: service_id.clone(),
                name: service_id.clone(),
                image: c.image.clone(),
                labels_json,
                status: c.state.clone(),
            };
            let container = Container {
                id: c.id.clone(),
                service_id,
                name: c.clean_name(),
                status: c.state.clone(),
                started_at,
                last_seen_at: Utc::now(),
                restart_count: inspect.restart_count,
            };
            if let Err(e) = self.repo.upsert_service_and_container(&svc, &container).await {
                error!(container = %c.id, error = %e, "upsert service/container");
                continue;
            }

            let stats = match self.docker.stats(&c.id).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(container = %c.id, error = %e, "container stats");
                    continue;
                }
            };
            let mut m = normalize_stats(&c.id, &stats);
            m.ts = Utc::now();
            if let Err(e) = self.repo.insert_container_metric(&m).await {
                error!(container = %c.id, error = %e, "insert container metric");
            }
        }

        if let Err(e) = self.repo.mark_missing_containers(&seen).await {
            warn!(error = %e, "mark missing containers");
        }
    }
}
