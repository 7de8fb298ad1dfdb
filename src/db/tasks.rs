//! Per-ticket task checklists.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result, StorageContext};
use crate::model::*;

type TaskRow = (i64, i64, String, bool, Option<DateTime<Utc>>);

fn into_task((ticket_id, position, description, done, completed_at): TaskRow) -> Task {
    Task {
        ticket_id: TicketId(ticket_id),
        position,
        description,
        done,
        completed_at,
    }
}

impl super::Db {
    /// A ticket's checklist in order.
    pub async fn tasks(&self, ticket_id: TicketId) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT ticket_id, position, description, done, completed_at
             FROM ticket_tasks WHERE ticket_id = $1 ORDER BY position",
        )
        .bind(ticket_id.0)
        .fetch_all(&self.pool)
        .await
        .context("list tasks")?;
        Ok(rows.into_iter().map(into_task).collect())
    }
}

impl super::Tx {
    /// Append a task to the end of a ticket's checklist.
    pub async fn append_task(&mut self, ticket_id: TicketId, description: &str) -> Result<Task> {
        let (position,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM ticket_tasks WHERE ticket_id = $1",
        )
        .bind(ticket_id.0)
        .fetch_one(self.conn())
        .await
        .context("next task position")?;

        sqlx::query("INSERT INTO ticket_tasks (ticket_id, position, description) VALUES ($1, $2, $3)")
            .bind(ticket_id.0)
            .bind(position)
            .bind(description)
            .execute(self.conn())
            .await
            .context("insert task")?;

        Ok(Task {
            ticket_id,
            position,
            description: description.to_string(),
            done: false,
            completed_at: None,
        })
    }

    /// Tick off one task. Ticking a done task is a no-op.
    pub async fn complete_task(&mut self, ticket_id: TicketId, position: i64) -> Result<Task> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE ticket_tasks SET done = 1, completed_at = $1
             WHERE ticket_id = $2 AND position = $3 AND done = 0",
        )
        .bind(now)
        .bind(ticket_id.0)
        .bind(position)
        .execute(self.conn())
        .await
        .context("complete task")?;

        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT ticket_id, position, description, done, completed_at
             FROM ticket_tasks WHERE ticket_id = $1 AND position = $2",
        )
        .bind(ticket_id.0)
        .bind(position)
        .fetch_optional(self.conn())
        .await
        .context("load task")?;
        row.map(into_task)
            .ok_or_else(|| Error::NotFound(format!("task {position} of ticket {ticket_id}")))
    }

    /// Number of unchecked tasks on a ticket.
    pub async fn incomplete_tasks(&mut self, ticket_id: TicketId) -> Result<usize> {
        let (n,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM ticket_tasks WHERE ticket_id = $1 AND done = 0")
                .bind(ticket_id.0)
                .fetch_one(self.conn())
                .await
                .context("count open tasks")?;
        Ok(n as usize)
    }
}
