//! Project and ticket rows.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::{Error, Result, StorageContext};
use crate::model::*;

const TICKET_COLUMNS: &str = "t.id, p.key AS project_key, t.number, t.title, t.description, t.ticket_type,
     t.priority, t.complexity, t.status, t.resolution, t.retry_count, t.max_retries,
     t.flag_reason, t.flag_message, t.parent_ticket_id, t.milestone_id,
     t.created_at, t.updated_at, t.completed_at";

/// Fields of a ticket row about to be inserted.
pub(crate) struct TicketInsert<'a> {
    pub project_id: i64,
    pub title: &'a str,
    pub description: &'a str,
    pub ticket_type: TicketType,
    pub priority: Priority,
    pub complexity: Complexity,
    pub status: Status,
    pub max_retries: u32,
    pub parent_ticket_id: Option<TicketId>,
    pub milestone_id: Option<i64>,
    pub now: DateTime<Utc>,
}

impl super::Db {
    /// Get a project by key.
    pub async fn get_project(&self, key: &str) -> Result<Project> {
        let mut conn = self.pool.acquire().await.context("acquire")?;
        project_by_key(&mut conn, key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {key}")))
    }

    /// Get a ticket by its human key.
    pub async fn get_ticket(&self, key: &TicketKey) -> Result<Ticket> {
        let mut conn = self.pool.acquire().await.context("acquire")?;
        fetch_ticket_by_key(&mut conn, key).await
    }

    pub async fn get_ticket_by_id(&self, id: TicketId) -> Result<Ticket> {
        let mut conn = self.pool.acquire().await.context("acquire")?;
        fetch_ticket(&mut conn, id).await
    }

    /// List tickets, newest project sequence last.
    pub async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
        let mut conn = self.pool.acquire().await.context("acquire")?;
        list_tickets_on(&mut conn, filter).await
    }
}

impl super::Tx {
    pub async fn insert_project(&mut self, key: &str, name: &str) -> Result<Project> {
        let now = Utc::now();
        let result = sqlx::query("INSERT INTO projects (key, name, created_at) VALUES ($1, $2, $3)")
            .bind(key)
            .bind(name)
            .bind(now)
            .execute(self.conn())
            .await
            .context("insert project");
        let result = match result {
            Err(e) if e.is_unique_violation() => {
                return Err(Error::InvalidArgument(format!("project {key} already exists")));
            }
            other => other?,
        };
        Ok(Project {
            id: result.last_insert_rowid(),
            key: key.to_string(),
            name: name.to_string(),
            created_at: now,
        })
    }

    pub async fn project_by_key(&mut self, key: &str) -> Result<Option<Project>> {
        project_by_key(self.conn(), key).await
    }

    /// Take the next ticket number of a project.
    pub(crate) async fn allocate_number(&mut self, project_id: i64) -> Result<i64> {
        let (next,): (i64,) = sqlx::query_as("SELECT next_number FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_one(self.conn())
            .await
            .context("read ticket counter")?;
        sqlx::query("UPDATE projects SET next_number = next_number + 1 WHERE id = $1")
            .bind(project_id)
            .execute(self.conn())
            .await
            .context("bump ticket counter")?;
        Ok(next)
    }

    pub(crate) async fn insert_ticket(&mut self, number: i64, row: &TicketInsert<'_>) -> Result<TicketId> {
        let result = sqlx::query(
            "INSERT INTO tickets (project_id, number, title, description, ticket_type, priority, complexity,
                                  status, max_retries, parent_ticket_id, milestone_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)",
        )
        .bind(row.project_id)
        .bind(number)
        .bind(row.title)
        .bind(row.description)
        .bind(row.ticket_type.as_str())
        .bind(row.priority.as_str())
        .bind(row.complexity.as_str())
        .bind(row.status.as_str())
        .bind(row.max_retries as i64)
        .bind(row.parent_ticket_id.map(|p| p.0))
        .bind(row.milestone_id)
        .bind(row.now)
        .execute(self.conn())
        .await
        .context("insert ticket")?;
        Ok(TicketId(result.last_insert_rowid()))
    }

    pub async fn ticket(&mut self, id: TicketId) -> Result<Ticket> {
        fetch_ticket(self.conn(), id).await
    }

    pub async fn ticket_by_key(&mut self, key: &TicketKey) -> Result<Ticket> {
        fetch_ticket_by_key(self.conn(), key).await
    }

    /// Write a ticket's lifecycle fields, provided its status is still
    /// `expected`. A miss means another writer moved the ticket first.
    pub async fn update_ticket(&mut self, ticket: &Ticket, expected: Status) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE tickets
             SET status = $1, resolution = $2, retry_count = $3, max_retries = $4,
                 flag_reason = $5, flag_message = $6, updated_at = $7, completed_at = $8
             WHERE id = $9 AND status = $10",
        )
        .bind(ticket.status.as_str())
        .bind(ticket.resolution.map(Resolution::as_str))
        .bind(ticket.retry_count as i64)
        .bind(ticket.max_retries as i64)
        .bind(ticket.flag_reason.map(FlagReason::as_str))
        .bind(ticket.flag_message.as_deref())
        .bind(ticket.updated_at)
        .bind(ticket.completed_at)
        .bind(ticket.id.0)
        .bind(expected.as_str())
        .execute(self.conn())
        .await
        .context("update ticket")?
        .rows_affected();

        if rows == 0 {
            return Err(Error::InvalidState {
                subject: ticket.key.to_string(),
                from: expected.to_string(),
                action: "update (status changed concurrently)",
            });
        }
        Ok(())
    }

    pub async fn children_of(&mut self, id: TicketId) -> Result<Vec<Ticket>> {
        list_tickets_on(
            self.conn(),
            &TicketFilter {
                parent: Some(id),
                ..Default::default()
            },
        )
        .await
    }
}

async fn project_by_key(conn: &mut SqliteConnection, key: &str) -> Result<Option<Project>> {
    let row: Option<(i64, String, String, DateTime<Utc>)> =
        sqlx::query_as("SELECT id, key, name, created_at FROM projects WHERE key = $1")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await
            .context("load project")?;
    Ok(row.map(|(id, key, name, created_at)| Project {
        id,
        key,
        name,
        created_at,
    }))
}

async fn fetch_ticket(conn: &mut SqliteConnection, id: TicketId) -> Result<Ticket> {
    let sql = format!(
        "SELECT {TICKET_COLUMNS} FROM tickets t JOIN projects p ON p.id = t.project_id WHERE t.id = $1"
    );
    let row: Option<TicketRow> = sqlx::query_as(&sql)
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await
        .context("load ticket")?;
    row.ok_or_else(|| Error::NotFound(format!("ticket {id}")))?
        .try_into_ticket()
}

async fn fetch_ticket_by_key(conn: &mut SqliteConnection, key: &TicketKey) -> Result<Ticket> {
    let sql = format!(
        "SELECT {TICKET_COLUMNS} FROM tickets t JOIN projects p ON p.id = t.project_id
         WHERE p.key = $1 AND t.number = $2"
    );
    let row: Option<TicketRow> = sqlx::query_as(&sql)
        .bind(&key.project)
        .bind(key.number)
        .fetch_optional(&mut *conn)
        .await
        .context("load ticket")?;
    row.ok_or_else(|| Error::NotFound(format!("ticket {key}")))?
        .try_into_ticket()
}

async fn list_tickets_on(conn: &mut SqliteConnection, filter: &TicketFilter) -> Result<Vec<Ticket>> {
    let sql = format!(
        "SELECT {TICKET_COLUMNS} FROM tickets t JOIN projects p ON p.id = t.project_id
         WHERE ($1 IS NULL OR p.key = $1)
           AND ($2 IS NULL OR t.status = $2)
           AND ($3 IS NULL OR t.parent_ticket_id = $3)
         ORDER BY p.key, t.number
         LIMIT $4"
    );
    let rows: Vec<TicketRow> = sqlx::query_as(&sql)
        .bind(filter.project.as_deref())
        .bind(filter.status.map(Status::as_str))
        .bind(filter.parent.map(|p| p.0))
        .bind(filter.limit.unwrap_or(-1))
        .fetch_all(&mut *conn)
        .await
        .context("list tickets")?;
    rows.into_iter().map(TicketRow::try_into_ticket).collect()
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TicketRow {
    id: i64,
    project_key: String,
    number: i64,
    title: String,
    description: String,
    ticket_type: String,
    priority: String,
    complexity: String,
    status: String,
    resolution: Option<String>,
    retry_count: i64,
    max_retries: i64,
    flag_reason: Option<String>,
    flag_message: Option<String>,
    parent_ticket_id: Option<i64>,
    milestone_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TicketRow {
    fn try_into_ticket(self) -> Result<Ticket> {
        Ok(Ticket {
            id: TicketId(self.id),
            key: TicketKey::new(self.project_key, self.number),
            title: self.title,
            description: self.description,
            ticket_type: self.ticket_type.parse()?,
            priority: self.priority.parse()?,
            complexity: self.complexity.parse()?,
            status: self.status.parse()?,
            resolution: self.resolution.map(|r| r.parse()).transpose()?,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            flag_reason: self.flag_reason.map(|r| r.parse()).transpose()?,
            flag_message: self.flag_message,
            parent_ticket_id: self.parent_ticket_id.map(TicketId),
            milestone_id: self.milestone_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}
