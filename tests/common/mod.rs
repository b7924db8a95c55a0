// Shared fixtures: a migrated store in a temp dir, container seeding, and
// a recording notifier. Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dockwatch::models::{Container, Service};
use dockwatch::notifier::{Notifier, NotifyError};
use dockwatch::repo::Repository;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

pub async fn open_repo(dir: &TempDir) -> Repository {
    let path = dir.path().join("test.db");
    Repository::open(path.to_str().unwrap()).await.unwrap()
}

pub async fn seed_container(
    repo: &Repository,
    service_id: &str,
    container_id: &str,
    status: &str,
    restart_count: i64,
) {
    repo.upsert_service_and_container(
        &Service {
            id: service_id.to_string(),
            name: service_id.to_string(),
            image: "img".to_string(),
            labels_json: "{}".to_string(),
            status: status.to_string(),
        },
        &Container {
            id: container_id.to_string(),
            service_id: service_id.to_string(),
            name: container_id.to_string(),
            status: status.to_string(),
            started_at: None,
            last_seen_at: Utc::now(),
            restart_count,
        },
    )
    .await
    .unwrap();
}

/// Overwrite a container's stored last_seen_at (upsert always stamps now).
pub async fn set_last_seen(repo: &Repository, container_id: &str, at: DateTime<Utc>) {
    sqlx::query("UPDATE containers SET last_seen_at=? WHERE id=?")
        .bind(at)
        .bind(container_id)
        .execute(repo.pool())
        .await
        .unwrap();
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(NotifyError::NotConfigured);
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn channel(&self) -> &'static str {
        "telegram"
    }
}
