// HTTP endpoint tests over an in-process server.

mod common;

use axum_test::TestServer;
use chrono::{Duration, Utc};
use common::{open_repo, seed_container};
use dockwatch::docker::DockerClient;
use dockwatch::models::LogEntry;
use dockwatch::notifier::Telegram;
use dockwatch::repo::Repository;
use dockwatch::web;
use std::sync::Arc;
use tempfile::TempDir;

async fn test_server(dir: &TempDir) -> (TestServer, Arc<Repository>) {
    let repo = Arc::new(open_repo(dir).await);
    // Points at a socket that does not exist; only /readyz touches it.
    let docker = Arc::new(DockerClient::new(
        dir.path().join("docker.sock").to_str().unwrap(),
    ));
    let notify = Arc::new(Telegram::new("", ""));
    let app = web::app(repo.clone(), docker, notify);
    (TestServer::new(app).unwrap(), repo)
}

fn entry(service_id: &str, level: &str, stream: &str, message: &str) -> LogEntry {
    LogEntry {
        ts: Utc::now(),
        service_id: service_id.to_string(),
        container_id: "c1".to_string(),
        level: level.to_string(),
        stream: stream.to_string(),
        message: message.to_string(),
    }
}

#[tokio::test]
async fn healthz_is_always_ok() {
    let dir = TempDir::new().unwrap();
    let (server, _repo) = test_server(&dir).await;
    let response = server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn readyz_fails_without_docker() {
    let dir = TempDir::new().unwrap();
    let (server, _repo) = test_server(&dir).await;
    let response = server.get("/readyz").await;
    response.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn host_metrics_returns_window() {
    let dir = TempDir::new().unwrap();
    let (server, repo) = test_server(&dir).await;
    for (ts, cpu) in [
        (Utc::now() - Duration::hours(3), 11.0),
        (Utc::now(), 42.0),
    ] {
        repo.insert_host_metric(&dockwatch::models::HostMetric {
            ts,
            cpu_pct: cpu,
            ..Default::default()
        })
        .await
        .unwrap();
    }

    let response = server.get("/api/metrics/host").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    let arr = json.as_array().unwrap();
    assert_eq!(arr.len(), 1, "default range is one hour");
    assert_eq!(arr[0].get("cpu_pct").and_then(|v| v.as_f64()), Some(42.0));

    let response = server.get("/api/metrics/host?range=6h").await;
    let json: serde_json::Value = response.json();
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn logs_endpoint_filters_and_groups() {
    let dir = TempDir::new().unwrap();
    let (server, repo) = test_server(&dir).await;
    seed_container(&repo, "svc-a", "c1", "running", 0).await;
    repo.insert_logs(&[
        entry("svc-a", "ERROR", "stderr", "disk full"),
        entry("svc-a", "ERROR", "stderr", "disk almost full"),
        entry("svc-a", "WARN", "stdout", "careful"),
    ])
    .await
    .unwrap();

    let response = server.get("/api/logs?service=svc-a&q=disk&level=ERROR").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json.as_array().unwrap().len(), 2);

    let response = server.get("/api/logs?group_by=level").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json.get("group_by").and_then(|v| v.as_str()), Some("level"));
    let groups = json.get("groups").and_then(|v| v.as_array()).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].get("key").and_then(|v| v.as_str()), Some("ERROR"));
    assert_eq!(groups[0].get("count").and_then(|v| v.as_i64()), Some(2));

    let response = server.get("/api/logs?group_by=bogus").await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rules_can_be_listed_and_updated() {
    let dir = TempDir::new().unwrap();
    let (server, repo) = test_server(&dir).await;

    let response = server.get("/api/rules").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    let rules = json.as_array().unwrap();
    assert_eq!(rules.len(), 5);
    let id = rules[0].get("id").and_then(|v| v.as_i64()).unwrap();

    let response = server
        .post("/settings/rules")
        .form(&[
            ("id", id.to_string()),
            ("threshold", "77.5".to_string()),
            ("for_seconds", "30".to_string()),
            ("cooldown_seconds", "120".to_string()),
            ("enabled", "on".to_string()),
        ])
        .await;
    response.assert_status_ok();

    let updated = repo
        .list_rules()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.id == id)
        .unwrap();
    assert_eq!(updated.threshold, 77.5);
    assert_eq!(updated.for_seconds, 30);
    assert!(updated.enabled);
}

#[tokio::test]
async fn telegram_settings_post_persists_credentials() {
    let dir = TempDir::new().unwrap();
    let (server, repo) = test_server(&dir).await;

    let response = server
        .post("/settings/telegram")
        .form(&[("token", " tok "), ("chat_id", " chat ")])
        .await;
    response.assert_status_ok();

    let (token, chat_id) = repo.load_telegram_settings().await.unwrap();
    assert_eq!(token, "tok");
    assert_eq!(chat_id, "chat");
}

#[tokio::test]
async fn services_endpoint_returns_health_rows() {
    let dir = TempDir::new().unwrap();
    let (server, repo) = test_server(&dir).await;
    seed_container(&repo, "svc-a", "c1", "running", 2).await;
    repo.insert_container_metric(&dockwatch::models::ContainerMetric {
        ts: Utc::now(),
        container_id: "c1".to_string(),
        cpu_pct: 12.5,
        mem_used_bytes: 2048,
        ..Default::default()
    })
    .await
    .unwrap();

    let response = server.get("/api/services").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("service_id").and_then(|v| v.as_str()),
        Some("svc-a")
    );
    assert_eq!(rows[0].get("cpu_pct").and_then(|v| v.as_f64()), Some(12.5));
}

#[tokio::test]
async fn overview_reports_latest_metric_and_alert_count() {
    let dir = TempDir::new().unwrap();
    let (server, repo) = test_server(&dir).await;

    let response = server.get("/api/overview").await;
    response.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);

    repo.insert_host_metric(&dockwatch::models::HostMetric {
        ts: Utc::now(),
        cpu_pct: 33.0,
        mem_used_bytes: 50,
        mem_total_bytes: 100,
        ..Default::default()
    })
    .await
    .unwrap();
    let rule = repo.list_rules().await.unwrap().remove(0);
    repo.create_alert(rule.id, "host", "firing", "x", &serde_json::json!({}), Utc::now())
        .await
        .unwrap();

    let response = server.get("/api/overview").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json.get("mem_pct").and_then(|v| v.as_f64()), Some(50.0));
    assert_eq!(json.get("active_alerts").and_then(|v| v.as_i64()), Some(1));

    let response = server.post("/api/alerts/clear").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json.get("deleted").and_then(|v| v.as_i64()), Some(1));
}

#[tokio::test]
async fn test_notification_without_credentials_is_an_error() {
    let dir = TempDir::new().unwrap();
    let (server, _repo) = test_server(&dir).await;
    let response = server.post("/api/alerts/test").await;
    response.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
}
