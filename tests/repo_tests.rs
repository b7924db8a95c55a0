// Repository tests: migration, seeding, upserts, mark-missing, log views,
// alerts, settings, retention.

mod common;

use chrono::{DateTime, Duration, Utc};
use common::{open_repo, seed_container};
use dockwatch::models::LogEntry;
use dockwatch::repo::{LogFilter, LogGroupBy};
use sqlx::Row;
use tempfile::TempDir;

fn entry(
    ts: DateTime<Utc>,
    service_id: &str,
    container_id: &str,
    level: &str,
    stream: &str,
    message: &str,
) -> LogEntry {
    LogEntry {
        ts,
        service_id: service_id.to_string(),
        container_id: container_id.to_string(),
        level: level.to_string(),
        stream: stream.to_string(),
        message: message.to_string(),
    }
}

#[tokio::test]
async fn open_twice_is_idempotent_and_seeds_five_rules() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    {
        let repo = dockwatch::repo::Repository::open(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(repo.list_rules().await.unwrap().len(), 5);
    }
    let repo = dockwatch::repo::Repository::open(path.to_str().unwrap())
        .await
        .unwrap();
    let rules = repo.list_rules().await.unwrap();
    assert_eq!(rules.len(), 5, "re-migration must not duplicate seeds");
    let keys: Vec<&str> = rules.iter().map(|r| r.metric_key.as_str()).collect();
    assert!(keys.contains(&"host_cpu_pct"));
    assert!(keys.contains(&"host_mem_pct"));
    assert!(keys.contains(&"host_disk_pct"));
    assert!(keys.contains(&"container_unavailable"));
    assert!(keys.contains(&"container_restarts"));
    assert!(rules.iter().all(|r| r.enabled));
}

#[tokio::test]
async fn upsert_preserves_first_seen_and_advances_last_seen() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    seed_container(&repo, "svc", "c1", "running", 0).await;

    let row = sqlx::query("SELECT first_seen_at, last_seen_at FROM services WHERE id='svc'")
        .fetch_one(repo.pool())
        .await
        .unwrap();
    let first_seen: DateTime<Utc> = row.try_get("first_seen_at").unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    seed_container(&repo, "svc", "c1", "running", 1).await;

    let row = sqlx::query("SELECT first_seen_at, last_seen_at FROM services WHERE id='svc'")
        .fetch_one(repo.pool())
        .await
        .unwrap();
    let first_seen_after: DateTime<Utc> = row.try_get("first_seen_at").unwrap();
    let last_seen_after: DateTime<Utc> = row.try_get("last_seen_at").unwrap();
    assert_eq!(first_seen, first_seen_after);
    assert!(last_seen_after > first_seen);

    let containers = repo.list_containers().await.unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].restart_count, 1);
}

#[tokio::test]
async fn mark_missing_flags_everything_not_seen() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    seed_container(&repo, "svc", "c1", "running", 0).await;
    seed_container(&repo, "svc", "c2", "running", 0).await;
    seed_container(&repo, "svc", "c3", "exited", 0).await;

    repo.mark_missing_containers(&["c1".to_string()])
        .await
        .unwrap();
    let containers = repo.list_containers().await.unwrap();
    let status = |id: &str| {
        containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.status.clone())
            .unwrap()
    };
    assert_eq!(status("c1"), "running");
    assert_eq!(status("c2"), "missing");
    assert_eq!(status("c3"), "missing");

    repo.mark_missing_containers(&[]).await.unwrap();
    let containers = repo.list_containers().await.unwrap();
    assert!(containers.iter().all(|c| c.status == "missing"));
}

#[tokio::test]
async fn query_logs_filters_by_service_text_level_stream_and_time() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let now = Utc::now();
    seed_container(&repo, "svc-a", "c1", "running", 0).await;
    seed_container(&repo, "svc-b", "c2", "running", 0).await;

    repo.insert_logs(&[
        entry(now - Duration::minutes(10), "svc-a", "c1", "INFO", "stdout", "old entry"),
        entry(now - Duration::minutes(2), "svc-a", "c1", "ERROR", "stderr", "disk full"),
        entry(now - Duration::minutes(1), "svc-b", "c2", "ERROR", "stdout", "other service"),
    ])
    .await
    .unwrap();

    let filter = LogFilter {
        service_id: Some("svc-a".to_string()),
        q: Some("disk".to_string()),
        level: Some("error".to_string()),
        stream: Some("STDERR".to_string()),
        from: Some(now - Duration::minutes(5)),
        to: None,
    };
    let entries = repo.query_logs(&filter, 50).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "disk full");
}

#[tokio::test]
async fn query_logs_orders_newest_first_with_default_limit() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let now = Utc::now();
    seed_container(&repo, "svc", "c1", "running", 0).await;

    repo.insert_logs(&[
        entry(now - Duration::minutes(2), "svc", "c1", "INFO", "stdout", "older"),
        entry(now - Duration::minutes(1), "svc", "c1", "INFO", "stdout", "newer"),
    ])
    .await
    .unwrap();

    let entries = repo.query_logs(&LogFilter::default(), 0).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].message, "newer");
    assert_eq!(entries[1].message, "older");
}

#[tokio::test]
async fn group_logs_by_level_counts_and_orders() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let now = Utc::now();
    seed_container(&repo, "svc", "c1", "running", 0).await;

    repo.insert_logs(&[
        entry(now, "svc", "c1", "ERROR", "stderr", "boom"),
        entry(now, "svc", "c1", "ERROR", "stderr", "boom again"),
        entry(now, "svc", "c1", "WARN", "stdout", "careful"),
    ])
    .await
    .unwrap();

    let groups = repo
        .group_logs(LogGroupBy::Level, &LogFilter::default(), 10)
        .await
        .unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].key, "ERROR");
    assert_eq!(groups[0].count, 2);
    assert_eq!(groups[1].key, "WARN");
    assert_eq!(groups[1].count, 1);
}

#[tokio::test]
async fn list_services_with_health_filters_and_orders_by_cpu() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let now = Utc::now();
    seed_container(&repo, "svc-a", "c1", "running", 0).await;
    seed_container(&repo, "svc-b", "c2", "running", 0).await;
    seed_container(&repo, "svc-c", "c3", "missing", 0).await;

    for (id, cpu, mem) in [("c1", 5.0, 100i64), ("c2", 50.0, 10), ("c3", 99.0, 999)] {
        repo.insert_container_metric(&dockwatch::models::ContainerMetric {
            ts: now,
            container_id: id.to_string(),
            cpu_pct: cpu,
            mem_used_bytes: mem,
            mem_limit_bytes: 1000,
            ..Default::default()
        })
        .await
        .unwrap();
    }
    sqlx::query("UPDATE containers SET status='missing' WHERE id='c3'")
        .execute(repo.pool())
        .await
        .unwrap();

    let rows = repo
        .list_services_with_health(0.0, 0, 20, false)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2, "missing containers are excluded");
    assert_eq!(rows[0].container_id, "c2");
    assert_eq!(rows[1].container_id, "c1");

    let rows = repo
        .list_services_with_health(10.0, 0, 20, false)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].container_id, "c2");

    let rows = repo
        .list_services_with_health(0.0, 0, 20, true)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3, "include_missing keeps them");
    assert_eq!(rows[0].container_id, "c3");
}

#[tokio::test]
async fn close_alert_flips_firing_row_and_returns_its_id() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let rule = repo.list_rules().await.unwrap().remove(0);
    let now = Utc::now();

    let id = repo
        .create_alert(
            rule.id,
            "host",
            "firing",
            "ALERT",
            &serde_json::json!({"value": 1}),
            now,
        )
        .await
        .unwrap();
    assert!(id > 0);
    assert_eq!(repo.active_alert_count().await.unwrap(), 1);

    let closed = repo.close_alert(rule.id, "host", now).await.unwrap();
    assert_eq!(closed, Some(id));
    assert_eq!(repo.active_alert_count().await.unwrap(), 0);

    let again = repo.close_alert(rule.id, "host", now).await.unwrap();
    assert_eq!(again, None);
}

#[tokio::test]
async fn retention_removes_only_rows_older_than_cutoff() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let now = Utc::now();
    let old = now - Duration::days(30);
    seed_container(&repo, "svc", "c1", "running", 0).await;

    for ts in [old, now] {
        repo.insert_host_metric(&dockwatch::models::HostMetric {
            ts,
            ..Default::default()
        })
        .await
        .unwrap();
        repo.insert_container_metric(&dockwatch::models::ContainerMetric {
            ts,
            container_id: "c1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        repo.insert_logs(&[entry(ts, "svc", "c1", "INFO", "stdout", "line")])
            .await
            .unwrap();
    }

    let rule = repo.list_rules().await.unwrap().remove(0);
    repo.create_alert(rule.id, "a", "firing", "old firing", &serde_json::json!({}), old)
        .await
        .unwrap();
    repo.create_alert(rule.id, "b", "firing", "old recovered", &serde_json::json!({}), old)
        .await
        .unwrap();
    repo.close_alert(rule.id, "b", old).await.unwrap();

    repo.delete_older_than(now - Duration::days(14)).await.unwrap();

    let count = |sql: &'static str| async {
        sqlx::query(sql)
            .fetch_one(repo.pool())
            .await
            .unwrap()
            .try_get::<i64, _>(0)
            .unwrap()
    };
    assert_eq!(count("SELECT COUNT(*) FROM host_metrics").await, 1);
    assert_eq!(count("SELECT COUNT(*) FROM container_metrics").await, 1);
    assert_eq!(count("SELECT COUNT(*) FROM logs").await, 1);
    // Old firing alert survives; old recovered alert is gone.
    assert_eq!(count("SELECT COUNT(*) FROM alerts").await, 1);
    assert_eq!(
        count("SELECT COUNT(*) FROM alerts WHERE status='firing'").await,
        1
    );
}

#[tokio::test]
async fn delete_alert_maintenance_ops() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let rule = repo.list_rules().await.unwrap().remove(0);
    let now = Utc::now();

    repo.create_alert(rule.id, "a", "firing", "one", &serde_json::json!({}), now)
        .await
        .unwrap();
    repo.create_alert(rule.id, "b", "firing", "two", &serde_json::json!({}), now)
        .await
        .unwrap();
    repo.close_alert(rule.id, "b", now).await.unwrap();
    repo.upsert_alert_state(rule.id, "a", dockwatch::models::AlertState::Firing, now, Some(now), None)
        .await
        .unwrap();

    let deleted = repo.delete_recovered_alerts().await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(repo.active_alert_count().await.unwrap(), 1);

    let deleted = repo.delete_all_alerts().await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(repo.active_alert_count().await.unwrap(), 0);
    assert!(repo.get_alert_state(rule.id, "a").await.unwrap().is_none());
}

#[tokio::test]
async fn telegram_settings_roundtrip() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;

    let (token, chat_id) = repo.load_telegram_settings().await.unwrap();
    assert!(token.is_empty() && chat_id.is_empty());

    repo.save_telegram_settings("tok", "chat").await.unwrap();
    let (token, chat_id) = repo.load_telegram_settings().await.unwrap();
    assert_eq!(token, "tok");
    assert_eq!(chat_id, "chat");

    repo.save_telegram_settings("tok2", "chat2").await.unwrap();
    let (token, _) = repo.load_telegram_settings().await.unwrap();
    assert_eq!(token, "tok2");
}

#[tokio::test]
async fn update_rule_changes_thresholds_and_enabled() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    let rule = repo.list_rules().await.unwrap().remove(0);

    repo.update_rule(rule.id, 42.5, 30, 90, false).await.unwrap();
    let updated = repo
        .list_rules()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.id == rule.id)
        .unwrap();
    assert_eq!(updated.threshold, 42.5);
    assert_eq!(updated.for_seconds, 30);
    assert_eq!(updated.cooldown_seconds, 90);
    assert!(!updated.enabled);
}

#[tokio::test]
async fn latest_host_metric_returns_newest_row() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    assert!(repo.latest_host_metric().await.unwrap().is_none());

    let now = Utc::now();
    for (ts, cpu) in [(now - Duration::minutes(5), 10.0), (now, 55.0)] {
        repo.insert_host_metric(&dockwatch::models::HostMetric {
            ts,
            cpu_pct: cpu,
            ..Default::default()
        })
        .await
        .unwrap();
    }
    let latest = repo.latest_host_metric().await.unwrap().unwrap();
    assert_eq!(latest.cpu_pct, 55.0);

    let window = repo
        .recent_host_metrics(now - Duration::minutes(1), 100)
        .await
        .unwrap();
    assert_eq!(window.len(), 1);
}
