// JSON endpoints consumed by the browser UI and by probes.

mod http;

use crate::docker::DockerClient;
use crate::notifier::Telegram;
use crate::repo::Repository;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) repo: Arc<Repository>,
    pub(crate) docker: Arc<DockerClient>,
    pub(crate) notify: Arc<Telegram>,
}

pub fn app(repo: Arc<Repository>, docker: Arc<DockerClient>, notify: Arc<Telegram>) -> Router {
    let state = AppState {
        repo,
        docker,
        notify,
    };
    Router::new()
        .route("/healthz", get(http::healthz))
        .route("/readyz", get(http::readyz))
        .route("/api/overview", get(http::overview))
        .route("/api/metrics/host", get(http::host_metrics))
        .route("/api/metrics/container/{id}", get(http::container_metrics))
        .route("/api/logs", get(http::logs))
        .route("/api/services", get(http::services))
        .route("/api/alerts", get(http::alerts))
        .route("/api/alerts/restarts", get(http::restart_alerts))
        .route("/api/alerts/clear", post(http::clear_alerts))
        .route("/api/alerts/test", post(http::test_notification))
        .route("/api/rules", get(http::rules))
        .route("/settings/rules", post(http::update_rule))
        .route("/settings/telegram", post(http::update_telegram))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
