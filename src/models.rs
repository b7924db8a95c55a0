// Domain rows shared by the repository, collectors, engine, and web layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical group of containers with the same role. The id comes from the
/// compose service label when present, else the container name, else the
/// first 12 chars of the container id.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels_json: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Container {
    pub id: String,
    pub service_id: String,
    pub name: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    pub restart_count: i64,
}

/// One host-level sample. Net counters are cumulative since boot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct HostMetric {
    pub ts: DateTime<Utc>,
    pub cpu_pct: f64,
    pub mem_used_bytes: i64,
    pub mem_total_bytes: i64,
    pub net_rx_bytes: i64,
    pub net_tx_bytes: i64,
    pub disk_used_bytes: i64,
    pub disk_total_bytes: i64,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub uptime_sec: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContainerMetric {
    pub ts: DateTime<Utc>,
    pub container_id: String,
    pub cpu_pct: f64,
    pub mem_used_bytes: i64,
    pub mem_limit_bytes: i64,
    pub net_rx_bytes: i64,
    pub net_tx_bytes: i64,
    pub blk_read_bytes: i64,
    pub blk_write_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub service_id: String,
    pub container_id: String,
    pub level: String,
    pub stream: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlertRule {
    pub id: i64,
    pub name: String,
    pub target_type: String,
    #[sqlx(rename = "target_id_nullable")]
    pub target_id: Option<String>,
    pub metric_key: String,
    pub operator: String,
    pub threshold: f64,
    pub for_seconds: i64,
    pub cooldown_seconds: i64,
    pub enabled: bool,
}

/// Per-(rule, target) evaluation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertState {
    Ok,
    Pending,
    Firing,
    Cooldown,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Ok => "OK",
            AlertState::Pending => "PENDING",
            AlertState::Firing => "FIRING",
            AlertState::Cooldown => "COOLDOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PENDING" => AlertState::Pending,
            "FIRING" => AlertState::Firing,
            "COOLDOWN" => AlertState::Cooldown,
            _ => AlertState::Ok,
        }
    }
}

/// Stored state row for one (rule, target fingerprint) pair.
#[derive(Debug, Clone)]
pub struct AlertStateRow {
    pub state: AlertState,
    pub since_ts: DateTime<Utc>,
    pub last_fired_ts: Option<DateTime<Utc>>,
    pub last_recovered_ts: Option<DateTime<Utc>>,
}

/// One firing episode as listed by the alerts views.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertListRow {
    pub id: i64,
    pub status: String,
    pub started_ts: DateTime<Utc>,
    #[sqlx(rename = "ended_ts_nullable")]
    pub ended_ts: Option<DateTime<Utc>>,
    pub summary: String,
    pub rule_name: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RestartAlertRow {
    pub id: i64,
    pub target_fingerprint: String,
    pub status: String,
    pub started_ts: DateTime<Utc>,
    #[sqlx(rename = "ended_ts_nullable")]
    pub ended_ts: Option<DateTime<Utc>>,
    pub summary: String,
}

/// Firing (rule, target) pair, used to recover alerts for vanished targets.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActiveAlertTarget {
    pub rule_id: i64,
    pub target_fingerprint: String,
}

/// Per-container health line for the services view, ordered hottest first.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceHealthRow {
    pub service_id: String,
    pub name: String,
    pub status: String,
    pub container_id: String,
    pub restart_count: i64,
    pub last_seen_at: DateTime<Utc>,
    pub cpu_pct: f64,
    pub mem_used_bytes: i64,
}

/// Count per group key for the logs group-by view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LogGroupRow {
    pub key: String,
    pub count: i64,
}
