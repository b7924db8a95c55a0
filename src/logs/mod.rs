// Log ingestion: one follow worker per live container, reconciled against
// the current container list every tick.

pub mod parser;

use crate::docker::{DockerClient, LogsOptions};
use crate::models::LogEntry;
use crate::repo::Repository;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const WORKER_CHANNEL_CAPACITY: usize = 256;
const FLUSH_BATCH: usize = 200;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
/// Overlap re-read on reconnect so rotation gaps stay small.
const RECONNECT_OVERLAP_SECS: i64 = 2;
const BACKFILL_TAIL: u32 = 500;

pub struct LogIngestor {
    repo: Arc<Repository>,
    docker: Arc<DockerClient>,
    skip_self_logs: bool,
    self_id: String,
    workers: Mutex<HashMap<String, CancellationToken>>,
}

impl LogIngestor {
    pub fn new(repo: Arc<Repository>, docker: Arc<DockerClient>, skip_self_logs: bool) -> Self {
        Self {
            repo,
            docker,
            skip_self_logs,
            self_id: hostname(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Start workers for live containers without one, cancel workers whose
    /// container is gone.
    pub async fn reconcile(&self, root: &CancellationToken) {
        let containers = match self.docker.list_containers().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "log reconcile list containers");
                return;
            }
        };
        let mut live = HashSet::new();
        for c in &containers {
            if self.skip_self_logs && self.is_self_container(&c.id) {
                continue;
            }
            live.insert(c.id.clone());
            self.ensure_worker(root, &c.id, c.service_id());
        }
        let mut workers = self.workers.lock().expect("worker map poisoned");
        workers.retain(|id, cancel| {
            if live.contains(id) {
                true
            } else {
                cancel.cancel();
                false
            }
        });
    }

    /// Hostname-prefix heuristic: inside a container the hostname defaults
    /// to the short container id.
    fn is_self_container(&self, container_id: &str) -> bool {
        if self.self_id.is_empty() {
            return false;
        }
        container_id == self.self_id
            || container_id.starts_with(&self.self_id)
            || self.self_id.starts_with(container_id)
    }

    fn ensure_worker(&self, root: &CancellationToken, container_id: &str, service_id: String) {
        {
            let mut workers = self.workers.lock().expect("worker map poisoned");
            if workers.contains_key(container_id) {
                return;
            }
            let cancel = root.child_token();
            workers.insert(container_id.to_string(), cancel.clone());
            let repo = self.repo.clone();
            let docker = self.docker.clone();
            let container_id = container_id.to_string();
            tokio::spawn(run_worker(repo, docker, container_id, service_id, cancel));
        }
    }
}

async fn run_worker(
    repo: Arc<Repository>,
    docker: Arc<DockerClient>,
    container_id: String,
    service_id: String,
    cancel: CancellationToken,
) {
    info!(container = %container_id, "start log worker");
    let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
    let flusher = tokio::spawn(flush_loop(repo, rx));

    let mut first = true;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        // First pass backfills recent history for the UI; afterwards follow
        // incrementally with a small overlap.
        let opts = if first {
            LogsOptions {
                follow: true,
                since: None,
                tail: Some(BACKFILL_TAIL),
            }
        } else {
            LogsOptions {
                follow: true,
                since: Some(Utc::now().timestamp() - RECONNECT_OVERLAP_SECS),
                tail: None,
            }
        };
        first = false;

        match docker.logs(&container_id, opts).await {
            Ok(reader) => {
                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = parser::parse_log_stream(reader, &service_id, &container_id, &tx) => r,
                };
                match result {
                    // Streams end cleanly when the Engine rotates logs;
                    // pause before reconnecting to avoid a hot loop.
                    Ok(()) => {
                        if sleep_or_cancel(&cancel, Duration::from_millis(500)).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(container = %container_id, error = %e, "parse log stream");
                        if sleep_or_cancel(&cancel, Duration::from_secs(1)).await {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(container = %container_id, error = %e, "open container logs");
                if sleep_or_cancel(&cancel, Duration::from_secs(2)).await {
                    break;
                }
            }
        }
    }

    // Closing the channel lets the flusher drain its last batch and return.
    drop(tx);
    let _ = flusher.await;
    info!(container = %container_id, "stop log worker");
}

/// Returns true if cancelled before the delay elapsed.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

async fn flush_loop(repo: Arc<Repository>, mut rx: mpsc::Receiver<LogEntry>) {
    let mut tick = tokio::time::interval(FLUSH_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut batch: Vec<LogEntry> = Vec::with_capacity(FLUSH_BATCH);
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(entry) => {
                    batch.push(entry);
                    if batch.len() >= FLUSH_BATCH {
                        flush(&repo, &mut batch).await;
                    }
                }
                None => {
                    flush(&repo, &mut batch).await;
                    return;
                }
            },
            _ = tick.tick() => flush(&repo, &mut batch).await,
        }
    }
}

/// Best effort: a failed insert drops the batch after logging its size.
async fn flush(repo: &Repository, batch: &mut Vec<LogEntry>) {
    if batch.is_empty() {
        return;
    }
    if let Err(e) = repo.insert_logs(batch).await {
        error!(error = %e, count = batch.len(), "insert logs");
    }
    batch.clear();
}

fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}
