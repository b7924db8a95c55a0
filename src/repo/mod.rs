// SQLite repository: the only component that touches persisted state.

mod alerts;
mod logs;
mod metrics;
mod settings;

pub use logs::{LogFilter, LogGroupBy};

use crate::models::{Container, Service};
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Open (creating if missing) and migrate the store. Fatal on failure.
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .synchronous(SqliteSynchronous::Normal)
            .pragma("temp_store", "MEMORY");
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        const STMTS: &[&str] = &[
            r#"CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                image TEXT NOT NULL,
                labels_json TEXT NOT NULL,
                first_seen_at DATETIME NOT NULL,
                last_seen_at DATETIME NOT NULL,
                status TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS containers (
                id TEXT PRIMARY KEY,
                service_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at DATETIME,
                last_seen_at DATETIME NOT NULL,
                restart_count INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY(service_id) REFERENCES services(id) ON DELETE CASCADE
            )"#,
            r#"CREATE TABLE IF NOT EXISTS host_metrics (
                ts DATETIME NOT NULL,
                cpu_pct REAL NOT NULL,
                mem_used_bytes INTEGER NOT NULL,
                mem_total_bytes INTEGER NOT NULL,
                net_rx_bytes INTEGER NOT NULL,
                net_tx_bytes INTEGER NOT NULL,
                disk_used_bytes INTEGER NOT NULL,
                disk_total_bytes INTEGER NOT NULL,
                load1 REAL NOT NULL,
                load5 REAL NOT NULL,
                load15 REAL NOT NULL,
                uptime_sec INTEGER NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS container_metrics (
                ts DATETIME NOT NULL,
                container_id TEXT NOT NULL,
                cpu_pct REAL NOT NULL,
                mem_used_bytes INTEGER NOT NULL,
                mem_limit_bytes INTEGER NOT NULL,
                net_rx_bytes INTEGER NOT NULL,
                net_tx_bytes INTEGER NOT NULL,
                blk_read_bytes INTEGER NOT NULL,
                blk_write_bytes INTEGER NOT NULL,
                FOREIGN KEY(container_id) REFERENCES containers(id) ON DELETE CASCADE
            )"#,
            r#"CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts DATETIME NOT NULL,
                service_id TEXT NOT NULL,
                container_id TEXT NOT NULL,
                level TEXT NOT NULL,
                stream TEXT NOT NULL,
                message TEXT NOT NULL,
                FOREIGN KEY(service_id) REFERENCES services(id) ON DELETE CASCADE,
                FOREIGN KEY(container_id) REFERENCES containers(id) ON DELETE CASCADE
            )"#,
            r#"CREATE TABLE IF NOT EXISTS alert_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                target_type TEXT NOT NULL,
                target_id_nullable TEXT,
                metric_key TEXT NOT NULL,
                operator TEXT NOT NULL,
                threshold REAL NOT NULL,
                for_seconds INTEGER NOT NULL,
                cooldown_seconds INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1
            )"#,
            r#"CREATE TABLE IF NOT EXISTS alert_states (
                rule_id INTEGER NOT NULL,
                target_fingerprint TEXT NOT NULL,
                state TEXT NOT NULL,
                since_ts DATETIME NOT NULL,
                last_fired_ts DATETIME,
                last_recovered_ts DATETIME,
                PRIMARY KEY(rule_id, target_fingerprint),
                FOREIGN KEY(rule_id) REFERENCES alert_rules(id) ON DELETE CASCADE
            )"#,
            r#"CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER NOT NULL,
                target_fingerprint TEXT NOT NULL,
                status TEXT NOT NULL,
                started_ts DATETIME NOT NULL,
                ended_ts_nullable DATETIME,
                summary TEXT NOT NULL,
                details_json TEXT NOT NULL,
                FOREIGN KEY(rule_id) REFERENCES alert_rules(id) ON DELETE CASCADE
            )"#,
            r#"CREATE TABLE IF NOT EXISTS notification_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                alert_id INTEGER NOT NULL,
                channel TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                last_error TEXT,
                sent_ts_nullable DATETIME,
                FOREIGN KEY(alert_id) REFERENCES alerts(id) ON DELETE CASCADE
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_logs_service_ts ON logs(service_id, ts DESC)",
            "CREATE INDEX IF NOT EXISTS idx_logs_container_ts ON logs(container_id, ts DESC)",
            "CREATE INDEX IF NOT EXISTS idx_host_metrics_ts ON host_metrics(ts DESC)",
            "CREATE INDEX IF NOT EXISTS idx_container_metrics_container_ts ON container_metrics(container_id, ts DESC)",
            "CREATE INDEX IF NOT EXISTS idx_alerts_status_started ON alerts(status, started_ts DESC)",
        ];
        for stmt in STMTS {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        self.seed_default_rules().await
    }

    async fn seed_default_rules(&self) -> anyhow::Result<()> {
        struct Seed {
            name: &'static str,
            target_type: &'static str,
            metric_key: &'static str,
            op: &'static str,
            threshold: f64,
            for_seconds: i64,
            cooldown_seconds: i64,
        }
        const DEFAULTS: &[Seed] = &[
            Seed {
                name: "Host CPU high",
                target_type: "host",
                metric_key: "host_cpu_pct",
                op: ">",
                threshold: 90.0,
                for_seconds: 120,
                cooldown_seconds: 600,
            },
            Seed {
                name: "Host memory high",
                target_type: "host",
                metric_key: "host_mem_pct",
                op: ">",
                threshold: 90.0,
                for_seconds: 120,
                cooldown_seconds: 600,
            },
            Seed {
                name: "Host disk high",
                target_type: "host",
                metric_key: "host_disk_pct",
                op: ">",
                threshold: 85.0,
                for_seconds: 300,
                cooldown_seconds: 1800,
            },
            Seed {
                name: "Container unavailable",
                target_type: "container",
                metric_key: "container_unavailable",
                op: ">=",
                threshold: 1.0,
                for_seconds: 60,
                cooldown_seconds: 600,
            },
            Seed {
                name: "Container restarted",
                target_type: "container",
                metric_key: "container_restarts",
                op: ">=",
                threshold: 1.0,
                for_seconds: 0,
                cooldown_seconds: 60,
            },
        ];
        for seed in DEFAULTS {
            sqlx::query(
                r#"INSERT INTO alert_rules (name,target_type,metric_key,operator,threshold,for_seconds,cooldown_seconds,enabled)
                   SELECT ?,?,?,?,?,?,?,1 WHERE NOT EXISTS (SELECT 1 FROM alert_rules WHERE name = ?)"#,
            )
            .bind(seed.name)
            .bind(seed.target_type)
            .bind(seed.metric_key)
            .bind(seed.op)
            .bind(seed.threshold)
            .bind(seed.for_seconds)
            .bind(seed.cooldown_seconds)
            .bind(seed.name)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Record a (service, container) observation. Stamps `last_seen_at = now`
    /// on both rows; the service keeps its original `first_seen_at`.
    pub async fn upsert_service_and_container(
        &self,
        svc: &Service,
        container: &Container,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO services (id,name,image,labels_json,first_seen_at,last_seen_at,status)
               VALUES (?,?,?,?,?,?,?)
               ON CONFLICT(id) DO UPDATE SET name=excluded.name,image=excluded.image,
                 labels_json=excluded.labels_json,last_seen_at=excluded.last_seen_at,status=excluded.status"#,
        )
        .bind(&svc.id)
        .bind(&svc.name)
        .bind(&svc.image)
        .bind(&svc.labels_json)
        .bind(now)
        .bind(now)
        .bind(&svc.status)
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"INSERT INTO containers (id,service_id,name,status,started_at,last_seen_at,restart_count)
               VALUES (?,?,?,?,?,?,?)
               ON CONFLICT(id) DO UPDATE SET service_id=excluded.service_id,name=excluded.name,
                 status=excluded.status,last_seen_at=excluded.last_seen_at,restart_count=excluded.restart_count"#,
        )
        .bind(&container.id)
        .bind(&container.service_id)
        .bind(&container.name)
        .bind(&container.status)
        .bind(container.started_at)
        .bind(now)
        .bind(container.restart_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flag every non-missing container that is not in `seen` as missing.
    /// An empty `seen` set flags them all.
    pub async fn mark_missing_containers(&self, seen: &[String]) -> anyhow::Result<()> {
        if seen.is_empty() {
            sqlx::query("UPDATE containers SET status='missing' WHERE status != 'missing'")
                .execute(&self.pool)
                .await?;
            return Ok(());
        }
        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "UPDATE containers SET status='missing' WHERE status != 'missing' AND id NOT IN (",
        );
        let mut ids = qb.separated(", ");
        for id in seen {
            ids.push_bind(id);
        }
        qb.push(")");
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    pub async fn list_containers(&self) -> anyhow::Result<Vec<Container>> {
        let rows = sqlx::query_as::<_, Container>(
            "SELECT id,service_id,name,status,started_at,last_seen_at,restart_count FROM containers ORDER BY last_seen_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
