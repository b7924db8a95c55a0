// Settings key/value table (created on demand) and retention deletes.

use super::Repository;
use chrono::{DateTime, Utc};
use sqlx::Row;

const SETTINGS_DDL: &str =
    "CREATE TABLE IF NOT EXISTS settings (key TEXT PRIMARY KEY, value TEXT NOT NULL)";

impl Repository {
    pub async fn save_telegram_settings(&self, token: &str, chat_id: &str) -> anyhow::Result<()> {
        sqlx::query(SETTINGS_DDL).execute(self.pool()).await?;
        for (key, value) in [("telegram_token", token), ("telegram_chat_id", chat_id)] {
            sqlx::query(
                "INSERT INTO settings(key,value) VALUES (?,?) ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            )
            .bind(key)
            .bind(value)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }

    /// Returns (token, chat_id); either may be empty if never saved.
    pub async fn load_telegram_settings(&self) -> anyhow::Result<(String, String)> {
        sqlx::query(SETTINGS_DDL).execute(self.pool()).await?;
        let rows = sqlx::query(
            "SELECT key,value FROM settings WHERE key IN ('telegram_token','telegram_chat_id')",
        )
        .fetch_all(self.pool())
        .await?;
        let mut token = String::new();
        let mut chat_id = String::new();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            match key.as_str() {
                "telegram_token" => token = value,
                "telegram_chat_id" => chat_id = value,
                _ => {}
            }
        }
        Ok((token, chat_id))
    }

    /// Drop time-series rows and recovered alerts older than `cutoff`, then
    /// checkpoint the WAL and let SQLite re-plan its indexes.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<()> {
        const DELETES: &[&str] = &[
            "DELETE FROM host_metrics WHERE ts < ?",
            "DELETE FROM container_metrics WHERE ts < ?",
            "DELETE FROM logs WHERE ts < ?",
            "DELETE FROM alerts WHERE started_ts < ? AND status='recovered'",
        ];
        for stmt in DELETES {
            sqlx::query(stmt).bind(cutoff).execute(self.pool()).await?;
        }
        let _ = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(self.pool())
            .await;
        let _ = sqlx::query("PRAGMA optimize").execute(self.pool()).await;
        Ok(())
    }
}
