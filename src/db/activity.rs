//! Append-only activity log.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result, StorageContext};
use crate::model::*;

impl super::Db {
    /// Activity entries for a ticket, in append order.
    pub async fn history(&self, ticket_id: TicketId) -> Result<Vec<ActivityEntry>> {
        let rows: Vec<ActivityRow> = sqlx::query_as(
            "SELECT id, ticket_id, action, actor_type, actor_id, summary, details, created_at
             FROM activity_log WHERE ticket_id = $1 ORDER BY id",
        )
        .bind(ticket_id.0)
        .fetch_all(&self.pool)
        .await
        .context("load history")?;
        rows.into_iter().map(ActivityRow::try_into_entry).collect()
    }
}

impl super::Tx {
    pub async fn append_activity(&mut self, entry: &NewActivity) -> Result<()> {
        let details = serde_json::to_string(&entry.details)
            .map_err(|e| Error::Other(format!("serialize activity details: {e}")))?;
        sqlx::query(
            "INSERT INTO activity_log (ticket_id, action, actor_type, actor_id, summary, details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.ticket_id.0)
        .bind(entry.action.as_str())
        .bind(entry.actor.kind.as_str())
        .bind(&entry.actor.id)
        .bind(&entry.summary)
        .bind(details)
        .bind(Utc::now())
        .execute(self.conn())
        .await
        .context("append activity")?;
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: i64,
    ticket_id: i64,
    action: String,
    actor_type: String,
    actor_id: String,
    summary: String,
    details: String,
    created_at: DateTime<Utc>,
}

impl ActivityRow {
    fn try_into_entry(self) -> Result<ActivityEntry> {
        let details = serde_json::from_str(&self.details)
            .map_err(|e| Error::Other(format!("corrupt activity details #{}: {e}", self.id)))?;
        Ok(ActivityEntry {
            id: self.id,
            ticket_id: TicketId(self.ticket_id),
            action: self.action.parse()?,
            actor: Actor {
                kind: self.actor_type.parse()?,
                id: self.actor_id,
            },
            summary: self.summary,
            details,
            created_at: self.created_at,
        })
    }
}
