// Handlers. Range parameters are duration strings ("15m", "6h"); anything
// unparsable falls back to one hour.

use super::AppState;
use crate::config::parse_duration;
use crate::repo::{LogFilter, LogGroupBy};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

const METRIC_ROW_CAP: i64 = 4096;

fn range_start(range: Option<&str>) -> DateTime<Utc> {
    let window = range
        .and_then(parse_duration)
        .unwrap_or(Duration::from_secs(3600));
    Utc::now() - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(1))
}

fn internal_error(e: anyhow::Error) -> Response {
    tracing::warn!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": e.to_string()})),
    )
        .into_response()
}

pub(super) async fn healthz() -> &'static str {
    "ok"
}

pub(super) async fn readyz(State(state): State<AppState>) -> Response {
    if state.repo.ping().await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "db not ready").into_response();
    }
    if state.docker.ping().await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "docker not ready").into_response();
    }
    (StatusCode::OK, "ready").into_response()
}

/// Latest host sample with derived percentages and the firing alert count.
pub(super) async fn overview(State(state): State<AppState>) -> Response {
    let metric = match state.repo.latest_host_metric().await {
        Ok(Some(m)) => m,
        Ok(None) => {
            return (StatusCode::SERVICE_UNAVAILABLE, "no metrics yet").into_response();
        }
        Err(e) => return internal_error(e),
    };
    let active_alerts = state.repo.active_alert_count().await.unwrap_or(0);
    let pct = |used: i64, total: i64| {
        if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        }
    };
    let mem_pct = pct(metric.mem_used_bytes, metric.mem_total_bytes);
    let disk_pct = pct(metric.disk_used_bytes, metric.disk_total_bytes);
    Json(serde_json::json!({
        "metric": metric,
        "mem_pct": mem_pct,
        "disk_pct": disk_pct,
        "active_alerts": active_alerts,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub(super) struct RangeQuery {
    range: Option<String>,
}

pub(super) async fn host_metrics(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Response {
    let from = range_start(q.range.as_deref());
    match state.repo.recent_host_metrics(from, METRIC_ROW_CAP).await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(super) async fn container_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<RangeQuery>,
) -> Response {
    let from = range_start(q.range.as_deref());
    match state
        .repo
        .recent_container_metrics(&id, from, METRIC_ROW_CAP)
        .await
    {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct LogsQuery {
    service: Option<String>,
    q: Option<String>,
    level: Option<String>,
    stream: Option<String>,
    range: Option<String>,
    limit: Option<i64>,
    group_by: Option<String>,
}

pub(super) async fn logs(State(state): State<AppState>, Query(q): Query<LogsQuery>) -> Response {
    let filter = LogFilter {
        service_id: q.service.clone().filter(|s| !s.is_empty()),
        q: q.q.clone().filter(|s| !s.is_empty()),
        level: q.level.clone().filter(|s| !s.is_empty()),
        stream: q.stream.clone().filter(|s| !s.is_empty()),
        from: q.range.as_deref().map(|r| range_start(Some(r))),
        to: None,
    };
    let limit = q.limit.unwrap_or(0);

    if let Some(group_by) = q.group_by.as_deref().filter(|s| !s.is_empty()) {
        let Some(group_by) = LogGroupBy::parse(&group_by.to_lowercase()) else {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("unsupported group_by: {group_by}")})),
            )
                .into_response();
        };
        return match state.repo.group_logs(group_by, &filter, limit).await {
            Ok(groups) => Json(serde_json::json!({
                "group_by": q.group_by,
                "groups": groups,
            }))
            .into_response(),
            Err(e) => internal_error(e),
        };
    }

    match state.repo.query_logs(&filter, limit).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ServicesQuery {
    min_cpu: Option<f64>,
    min_mem_mb: Option<i64>,
    limit: Option<i64>,
    include_missing: Option<String>,
}

pub(super) async fn services(
    State(state): State<AppState>,
    Query(q): Query<ServicesQuery>,
) -> Response {
    let min_cpu = q.min_cpu.unwrap_or(0.0).max(0.0);
    let min_mem_bytes = q.min_mem_mb.unwrap_or(0).max(0) * 1024 * 1024;
    let limit = q.limit.unwrap_or(20);
    let include_missing = q.include_missing.as_deref() == Some("1");
    match state
        .repo
        .list_services_with_health(min_cpu, min_mem_bytes, limit, include_missing)
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct AlertsQuery {
    range: Option<String>,
    limit: Option<i64>,
}

pub(super) async fn alerts(
    State(state): State<AppState>,
    Query(q): Query<AlertsQuery>,
) -> Response {
    let since = range_start(Some(q.range.as_deref().unwrap_or("24h")));
    match state.repo.recent_alerts(since, q.limit.unwrap_or(100)).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(super) async fn restart_alerts(
    State(state): State<AppState>,
    Query(q): Query<AlertsQuery>,
) -> Response {
    let since = range_start(Some(q.range.as_deref().unwrap_or("24h")));
    match state
        .repo
        .recent_restart_alerts(since, q.limit.unwrap_or(20))
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ClearQuery {
    recovered_only: Option<String>,
}

/// Maintenance: drop recovered alerts, or every alert with its state.
pub(super) async fn clear_alerts(
    State(state): State<AppState>,
    Query(q): Query<ClearQuery>,
) -> Response {
    let recovered_only = q.recovered_only.as_deref() == Some("1");
    let result = if recovered_only {
        state.repo.delete_recovered_alerts().await
    } else {
        state.repo.delete_all_alerts().await
    };
    match result {
        Ok(deleted) => Json(serde_json::json!({"deleted": deleted})).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(super) async fn test_notification(State(state): State<AppState>) -> Response {
    use crate::notifier::Notifier;
    match state
        .notify
        .send("dockwatch test alert: notifications are working")
        .await
    {
        Ok(()) => Json(serde_json::json!({"status": "ok"})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

pub(super) async fn rules(State(state): State<AppState>) -> Response {
    match state.repo.list_rules().await {
        Ok(rules) => Json(rules).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct RuleForm {
    id: i64,
    threshold: f64,
    for_seconds: i64,
    cooldown_seconds: i64,
    enabled: Option<String>,
}

pub(super) async fn update_rule(
    State(state): State<AppState>,
    Form(form): Form<RuleForm>,
) -> Response {
    let enabled = matches!(form.enabled.as_deref(), Some("on") | Some("1") | Some("true"));
    match state
        .repo
        .update_rule(
            form.id,
            form.threshold,
            form.for_seconds,
            form.cooldown_seconds,
            enabled,
        )
        .await
    {
        Ok(()) => Json(serde_json::json!({"status": "ok"})).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TelegramForm {
    token: String,
    chat_id: String,
}

pub(super) async fn update_telegram(
    State(state): State<AppState>,
    Form(form): Form<TelegramForm>,
) -> Response {
    let token = form.token.trim();
    let chat_id = form.chat_id.trim();
    if let Err(e) = state.repo.save_telegram_settings(token, chat_id).await {
        return internal_error(e);
    }
    state.notify.update(token, chat_id);
    Json(serde_json::json!({"status": "ok"})).into_response()
}
