//! Dependency edges: `(ticket_id -> depends_on_id)`.

use chrono::Utc;

use crate::error::{Result, StorageContext};
use crate::model::*;

impl super::Db {
    /// Tickets the given ticket depends on.
    pub async fn dependencies(&self, id: TicketId) -> Result<Vec<TicketId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT depends_on_id FROM dependencies WHERE ticket_id = $1 ORDER BY depends_on_id",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .context("list dependencies")?;
        Ok(rows.into_iter().map(|(id,)| TicketId(id)).collect())
    }

    /// Tickets that depend on the given ticket.
    pub async fn dependents(&self, id: TicketId) -> Result<Vec<TicketId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT ticket_id FROM dependencies WHERE depends_on_id = $1 ORDER BY ticket_id",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .context("list dependents")?;
        Ok(rows.into_iter().map(|(id,)| TicketId(id)).collect())
    }
}

impl super::Tx {
    pub async fn dependencies_of(&mut self, id: TicketId) -> Result<Vec<TicketId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT depends_on_id FROM dependencies WHERE ticket_id = $1 ORDER BY depends_on_id",
        )
        .bind(id.0)
        .fetch_all(self.conn())
        .await
        .context("list dependencies")?;
        Ok(rows.into_iter().map(|(id,)| TicketId(id)).collect())
    }

    pub async fn dependents_of(&mut self, id: TicketId) -> Result<Vec<TicketId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT ticket_id FROM dependencies WHERE depends_on_id = $1 ORDER BY ticket_id",
        )
        .bind(id.0)
        .fetch_all(self.conn())
        .await
        .context("list dependents")?;
        Ok(rows.into_iter().map(|(id,)| TicketId(id)).collect())
    }

    /// Insert an edge. Returns false if it already existed.
    pub async fn insert_edge(&mut self, edge: Dependency) -> Result<bool> {
        let rows = sqlx::query(
            "INSERT INTO dependencies (ticket_id, depends_on_id, created_at) VALUES ($1, $2, $3)
             ON CONFLICT (ticket_id, depends_on_id) DO NOTHING",
        )
        .bind(edge.ticket_id.0)
        .bind(edge.depends_on_id.0)
        .bind(Utc::now())
        .execute(self.conn())
        .await
        .context("insert dependency")?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Delete an edge. Returns false if there was none.
    pub async fn delete_edge(&mut self, edge: Dependency) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM dependencies WHERE ticket_id = $1 AND depends_on_id = $2")
            .bind(edge.ticket_id.0)
            .bind(edge.depends_on_id.0)
            .execute(self.conn())
            .await
            .context("delete dependency")?
            .rows_affected();
        Ok(rows > 0)
    }
}
