// Metric appends and time-window reads.

use super::Repository;
use crate::models::{ContainerMetric, HostMetric, ServiceHealthRow};
use chrono::{DateTime, Utc};

impl Repository {
    pub async fn insert_host_metric(&self, m: &HostMetric) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO host_metrics
               (ts,cpu_pct,mem_used_bytes,mem_total_bytes,net_rx_bytes,net_tx_bytes,disk_used_bytes,disk_total_bytes,load1,load5,load15,uptime_sec)
               VALUES (?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(m.ts)
        .bind(m.cpu_pct)
        .bind(m.mem_used_bytes)
        .bind(m.mem_total_bytes)
        .bind(m.net_rx_bytes)
        .bind(m.net_tx_bytes)
        .bind(m.disk_used_bytes)
        .bind(m.disk_total_bytes)
        .bind(m.load1)
        .bind(m.load5)
        .bind(m.load15)
        .bind(m.uptime_sec)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn insert_container_metric(&self, m: &ContainerMetric) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO container_metrics
               (ts,container_id,cpu_pct,mem_used_bytes,mem_limit_bytes,net_rx_bytes,net_tx_bytes,blk_read_bytes,blk_write_bytes)
               VALUES (?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(m.ts)
        .bind(&m.container_id)
        .bind(m.cpu_pct)
        .bind(m.mem_used_bytes)
        .bind(m.mem_limit_bytes)
        .bind(m.net_rx_bytes)
        .bind(m.net_tx_bytes)
        .bind(m.blk_read_bytes)
        .bind(m.blk_write_bytes)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn latest_host_metric(&self) -> anyhow::Result<Option<HostMetric>> {
        let row = sqlx::query_as::<_, HostMetric>(
            "SELECT * FROM host_metrics ORDER BY ts DESC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn recent_host_metrics(
        &self,
        from: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<HostMetric>> {
        let rows = sqlx::query_as::<_, HostMetric>(
            "SELECT * FROM host_metrics WHERE ts >= ? ORDER BY ts ASC LIMIT ?",
        )
        .bind(from)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn recent_container_metrics(
        &self,
        container_id: &str,
        from: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<ContainerMetric>> {
        let rows = sqlx::query_as::<_, ContainerMetric>(
            "SELECT * FROM container_metrics WHERE container_id = ? AND ts >= ? ORDER BY ts ASC LIMIT ?",
        )
        .bind(container_id)
        .bind(from)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Per-container health lines joined with the latest metric sample,
    /// hottest first (cpu desc, memory desc, restarts desc).
    pub async fn list_services_with_health(
        &self,
        min_cpu: f64,
        min_mem_bytes: i64,
        limit: i64,
        include_missing: bool,
    ) -> anyhow::Result<Vec<ServiceHealthRow>> {
        let limit = if limit <= 0 || limit > 200 { 20 } else { limit };
        let missing_filter = if include_missing {
            ""
        } else {
            " AND c.status NOT IN ('missing','exited')"
        };
        let query = format!(
            r#"SELECT s.id AS service_id, s.name AS name, c.status AS status, c.id AS container_id,
                 c.restart_count AS restart_count, c.last_seen_at AS last_seen_at,
                 COALESCE((SELECT cpu_pct FROM container_metrics cm WHERE cm.container_id=c.id ORDER BY ts DESC LIMIT 1),0) AS cpu_pct,
                 COALESCE((SELECT mem_used_bytes FROM container_metrics cm WHERE cm.container_id=c.id ORDER BY ts DESC LIMIT 1),0) AS mem_used_bytes
               FROM services s JOIN containers c ON c.service_id=s.id
               WHERE (
                 COALESCE((SELECT cpu_pct FROM container_metrics cm WHERE cm.container_id=c.id ORDER BY ts DESC LIMIT 1),0) >= ?
                 AND COALESCE((SELECT mem_used_bytes FROM container_metrics cm WHERE cm.container_id=c.id ORDER BY ts DESC LIMIT 1),0) >= ?
               ){missing_filter}
               ORDER BY cpu_pct DESC, mem_used_bytes DESC, c.restart_count DESC
               LIMIT ?"#
        );
        let rows = sqlx::query_as::<_, ServiceHealthRow>(&query)
            .bind(min_cpu)
            .bind(min_mem_bytes)
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }
}
