// Wires the store, Docker client, notifier, web router, and the four
// periodic drivers onto one cancellation root. Each driver runs its first
// pass immediately and never overlaps itself.

use crate::alerts::AlertEngine;
use crate::collector::Collector;
use crate::config::Config;
use crate::docker::DockerClient;
use crate::logs::LogIngestor;
use crate::notifier::Telegram;
use crate::repo::Repository;
use crate::retention::Retention;
use crate::web;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct App {
    cfg: Config,
    repo: Arc<Repository>,
    docker: Arc<DockerClient>,
    notify: Arc<Telegram>,
    cancel: CancellationToken,
}

impl App {
    pub async fn new(cfg: Config) -> anyhow::Result<Self> {
        let repo = Arc::new(Repository::open(&cfg.db_path).await?);
        let docker = Arc::new(DockerClient::new(&cfg.docker_socket));

        // Stored credentials win over the environment.
        let (mut token, mut chat_id) = repo.load_telegram_settings().await.unwrap_or_default();
        if token.is_empty() {
            token = cfg.telegram_token.clone();
        }
        if chat_id.is_empty() {
            chat_id = cfg.telegram_chat_id.clone();
        }
        let notify = Arc::new(Telegram::new(&token, &chat_id));

        Ok(Self {
            cfg,
            repo,
            docker,
            notify,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the web server and every background driver.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.cfg.addr).await?;
        info!(addr = %self.cfg.addr, "http server listening");

        let mut drivers = Vec::with_capacity(4);

        let mut collector = Collector::new(self.repo.clone(), self.docker.clone());
        let cancel = self.cancel.clone();
        let period = self.cfg.metrics_interval;
        drivers.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }
                collector.tick().await;
            }
        }));

        let mut engine = AlertEngine::new(
            self.repo.clone(),
            self.notify.clone(),
            self.cfg.debug_restarts,
        );
        let cancel = self.cancel.clone();
        let period = self.cfg.rules_interval;
        drivers.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }
                engine.evaluate().await;
            }
        }));

        let ingestor = LogIngestor::new(
            self.repo.clone(),
            self.docker.clone(),
            self.cfg.skip_self_logs,
        );
        let cancel = self.cancel.clone();
        let period = self.cfg.logs_interval;
        drivers.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }
                ingestor.reconcile(&cancel).await;
            }
        }));

        let retention = Retention::new(self.repo.clone(), self.cfg.retention_days);
        let cancel = self.cancel.clone();
        let period = self.cfg.retention_interval;
        drivers.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }
                retention.run().await;
            }
        }));

        let router = web::app(self.repo.clone(), self.docker.clone(), self.notify.clone());
        let cancel = self.cancel.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        // Log workers drain their batches before their tasks resolve.
        self.cancel.cancel();
        for handle in drivers {
            let _ = handle.await;
        }
        Ok(())
    }
}
