// Alert rules, per-target states, alert episodes, notification events.

use super::Repository;
use crate::models::{
    ActiveAlertTarget, AlertListRow, AlertRule, AlertState, AlertStateRow, RestartAlertRow,
};
use chrono::{DateTime, Utc};
use sqlx::Row;

impl Repository {
    pub async fn list_rules(&self) -> anyhow::Result<Vec<AlertRule>> {
        let rows = sqlx::query_as::<_, AlertRule>(
            r#"SELECT id,name,target_type,target_id_nullable,metric_key,operator,threshold,
                 for_seconds,cooldown_seconds,enabled
               FROM alert_rules ORDER BY id"#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn update_rule(
        &self,
        id: i64,
        threshold: f64,
        for_seconds: i64,
        cooldown_seconds: i64,
        enabled: bool,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE alert_rules SET threshold=?,for_seconds=?,cooldown_seconds=?,enabled=? WHERE id=?",
        )
        .bind(threshold)
        .bind(for_seconds)
        .bind(cooldown_seconds)
        .bind(enabled)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// State for one (rule, target) pair, or None if never evaluated.
    pub async fn get_alert_state(
        &self,
        rule_id: i64,
        target: &str,
    ) -> anyhow::Result<Option<AlertStateRow>> {
        let row = sqlx::query(
            "SELECT state,since_ts,last_fired_ts,last_recovered_ts FROM alert_states WHERE rule_id=? AND target_fingerprint=?",
        )
        .bind(rule_id)
        .bind(target)
        .fetch_optional(self.pool())
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.try_get("state")?;
        Ok(Some(AlertStateRow {
            state: AlertState::parse(&state),
            since_ts: row.try_get("since_ts")?,
            last_fired_ts: row.try_get("last_fired_ts")?,
            last_recovered_ts: row.try_get("last_recovered_ts")?,
        }))
    }

    pub async fn upsert_alert_state(
        &self,
        rule_id: i64,
        target: &str,
        state: AlertState,
        since: DateTime<Utc>,
        last_fired: Option<DateTime<Utc>>,
        last_recovered: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO alert_states (rule_id,target_fingerprint,state,since_ts,last_fired_ts,last_recovered_ts)
               VALUES (?,?,?,?,?,?)
               ON CONFLICT(rule_id,target_fingerprint) DO UPDATE SET state=excluded.state,
                 since_ts=excluded.since_ts,last_fired_ts=excluded.last_fired_ts,
                 last_recovered_ts=excluded.last_recovered_ts"#,
        )
        .bind(rule_id)
        .bind(target)
        .bind(state.as_str())
        .bind(since)
        .bind(last_fired)
        .bind(last_recovered)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Insert a firing episode and return its id.
    pub async fn create_alert(
        &self,
        rule_id: i64,
        target: &str,
        status: &str,
        summary: &str,
        details: &serde_json::Value,
        started: DateTime<Utc>,
    ) -> anyhow::Result<i64> {
        let res = sqlx::query(
            "INSERT INTO alerts (rule_id,target_fingerprint,status,started_ts,summary,details_json) VALUES (?,?,?,?,?,?)",
        )
        .bind(rule_id)
        .bind(target)
        .bind(status)
        .bind(started)
        .bind(summary)
        .bind(details.to_string())
        .execute(self.pool())
        .await?;
        Ok(res.last_insert_rowid())
    }

    /// Flip the single firing row for the pair to recovered. Returns the id
    /// of the closed row so the recovery notification can reference it.
    pub async fn close_alert(
        &self,
        rule_id: i64,
        target: &str,
        ended: DateTime<Utc>,
    ) -> anyhow::Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT id FROM alerts WHERE rule_id=? AND target_fingerprint=? AND status='firing' ORDER BY started_ts DESC LIMIT 1",
        )
        .bind(rule_id)
        .bind(target)
        .fetch_optional(self.pool())
        .await?;
        sqlx::query(
            "UPDATE alerts SET status='recovered', ended_ts_nullable=? WHERE rule_id=? AND target_fingerprint=? AND status='firing'",
        )
        .bind(ended)
        .bind(rule_id)
        .bind(target)
        .execute(self.pool())
        .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("id")?),
            None => None,
        })
    }

    pub async fn recent_alerts(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<AlertListRow>> {
        let limit = if limit <= 0 { 100 } else { limit };
        let rows = sqlx::query_as::<_, AlertListRow>(
            r#"SELECT a.id,a.status,a.started_ts,a.ended_ts_nullable,a.summary,r.name AS rule_name
               FROM alerts a JOIN alert_rules r ON r.id=a.rule_id
               WHERE a.started_ts >= ?
               ORDER BY a.started_ts DESC LIMIT ?"#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn recent_restart_alerts(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<RestartAlertRow>> {
        let limit = if limit <= 0 || limit > 200 { 20 } else { limit };
        let rows = sqlx::query_as::<_, RestartAlertRow>(
            r#"SELECT a.id,a.target_fingerprint,a.status,a.started_ts,a.ended_ts_nullable,a.summary
               FROM alerts a
               JOIN alert_rules r ON r.id=a.rule_id
               WHERE r.metric_key='container_restarts' AND a.started_ts >= ?
               ORDER BY a.started_ts DESC
               LIMIT ?"#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn active_alert_count(&self) -> anyhow::Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM alerts WHERE status='firing'")
            .fetch_one(self.pool())
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Firing (rule, target) pairs for one metric key; the engine recovers
    /// entries whose target container no longer exists.
    pub async fn active_alert_targets_by_metric(
        &self,
        metric_key: &str,
    ) -> anyhow::Result<Vec<ActiveAlertTarget>> {
        let rows = sqlx::query_as::<_, ActiveAlertTarget>(
            r#"SELECT a.rule_id,a.target_fingerprint
               FROM alerts a
               JOIN alert_rules r ON r.id=a.rule_id
               WHERE a.status='firing' AND r.metric_key=?
               GROUP BY a.rule_id,a.target_fingerprint"#,
        )
        .bind(metric_key)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn delete_recovered_alerts(&self) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM alerts WHERE status='recovered'")
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected())
    }

    /// Wipe every alert together with the evaluation states.
    pub async fn delete_all_alerts(&self) -> anyhow::Result<u64> {
        let mut tx = self.pool().begin().await?;
        let res = sqlx::query("DELETE FROM alerts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM alert_states")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(res.rows_affected())
    }

    pub async fn insert_notification_event(
        &self,
        alert_id: i64,
        channel: &str,
        status: &str,
        attempts: i64,
        last_error: &str,
        sent: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO notification_events (alert_id,channel,status,attempts,last_error,sent_ts_nullable) VALUES (?,?,?,?,?,?)",
        )
        .bind(alert_id)
        .bind(channel)
        .bind(status)
        .bind(attempts)
        .bind(last_error)
        .bind(sent)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
