// Batched log persistence and the filtered log views.

use super::Repository;
use crate::models::{LogEntry, LogGroupRow};
use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

/// Optional filters shared by the log query and group views. All string
/// filters bind as placeholders; nothing is interpolated.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub service_id: Option<String>,
    pub q: Option<String>,
    pub level: Option<String>,
    pub stream: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl LogFilter {
    fn apply(&self, qb: &mut QueryBuilder<'_, sqlx::Sqlite>) {
        if let Some(service_id) = &self.service_id {
            qb.push(" AND service_id = ").push_bind(service_id.clone());
        }
        if let Some(level) = &self.level {
            qb.push(" AND level = ").push_bind(level.to_uppercase());
        }
        if let Some(stream) = &self.stream {
            qb.push(" AND stream = ").push_bind(stream.to_lowercase());
        }
        if let Some(q) = &self.q {
            qb.push(" AND message LIKE ").push_bind(format!("%{q}%"));
        }
        if let Some(from) = self.from {
            qb.push(" AND ts >= ").push_bind(from);
        }
        if let Some(to) = self.to {
            qb.push(" AND ts <= ").push_bind(to);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogGroupBy {
    Service,
    Level,
    Stream,
}

impl LogGroupBy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "service" => Some(Self::Service),
            "level" => Some(Self::Level),
            "stream" => Some(Self::Stream),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Service => "service_id",
            Self::Level => "level",
            Self::Stream => "stream",
        }
    }
}

impl Repository {
    /// Insert a batch inside one transaction. The statement is prepared once
    /// and reused for every row.
    pub async fn insert_logs(&self, entries: &[LogEntry]) -> anyhow::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool().begin().await?;
        for e in entries {
            sqlx::query(
                "INSERT INTO logs (ts,service_id,container_id,level,stream,message) VALUES (?,?,?,?,?,?)",
            )
            .bind(e.ts)
            .bind(&e.service_id)
            .bind(&e.container_id)
            .bind(&e.level)
            .bind(&e.stream)
            .bind(&e.message)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Newest-first log lines matching the filter.
    pub async fn query_logs(
        &self,
        filter: &LogFilter,
        limit: i64,
    ) -> anyhow::Result<Vec<LogEntry>> {
        let limit = if limit <= 0 || limit > 1000 { 200 } else { limit };
        let mut qb = QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT ts,service_id,container_id,level,stream,message FROM logs WHERE 1=1",
        );
        filter.apply(&mut qb);
        qb.push(" ORDER BY ts DESC LIMIT ").push_bind(limit);
        let rows = qb
            .build_query_as::<LogEntry>()
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// Counts per group key, largest first, key as tiebreaker.
    pub async fn group_logs(
        &self,
        group_by: LogGroupBy,
        filter: &LogFilter,
        limit: i64,
    ) -> anyhow::Result<Vec<LogGroupRow>> {
        let limit = if limit <= 0 || limit > 500 { 100 } else { limit };
        let column = group_by.column();
        let mut qb = QueryBuilder::<sqlx::Sqlite>::new(format!(
            "SELECT {column} AS key, COUNT(*) AS count FROM logs WHERE 1=1"
        ));
        filter.apply(&mut qb);
        qb.push(format!(
            " GROUP BY {column} ORDER BY count DESC, key ASC LIMIT "
        ))
        .push_bind(limit);
        let rows = qb
            .build_query_as::<LogGroupRow>()
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }
}
