//! Claim rows.
//!
//! The partial unique index `ux_claims_one_active` allows at most one active
//! claim per ticket. Inserting a second one fails at the write and surfaces as
//! [`Error::AlreadyClaimed`]; nothing here checks first.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::error::{Error, Result, StorageContext};
use crate::model::*;

const CLAIM_COLUMNS: &str =
    "id, ticket_id, worker_id, claimed_at, expires_at, released_at, status";

impl super::Db {
    /// All active claims, in claim order.
    pub async fn active_claims(&self) -> Result<Vec<Claim>> {
        let mut conn = self.pool.acquire().await.context("acquire")?;
        active_claims_on(&mut conn).await
    }

    /// Every claim ever made on a ticket, oldest first.
    pub async fn claim_history(&self, ticket_id: TicketId) -> Result<Vec<Claim>> {
        let rows: Vec<ClaimRow> = sqlx::query_as(&format!(
            "SELECT {CLAIM_COLUMNS} FROM claims WHERE ticket_id = $1 ORDER BY claimed_at, rowid"
        ))
        .bind(ticket_id.0)
        .fetch_all(&self.pool)
        .await
        .context("list claims")?;
        rows.into_iter().map(ClaimRow::try_into_claim).collect()
    }
}

impl super::Tx {
    /// Insert an active claim. The storage constraint decides exclusivity.
    pub async fn insert_claim(&mut self, claim: &Claim, ticket_key: &TicketKey) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO claims (id, ticket_id, worker_id, claimed_at, expires_at, status)
             VALUES ($1, $2, $3, $4, $5, 'active')",
        )
        .bind(claim.id.0.to_string())
        .bind(claim.ticket_id.0)
        .bind(&claim.worker_id)
        .bind(claim.claimed_at)
        .bind(claim.expires_at)
        .execute(self.conn())
        .await
        .context("insert claim");

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_unique_violation() => {
                let holder = self.active_claim(claim.ticket_id).await.ok().flatten();
                Err(Error::AlreadyClaimed {
                    ticket: ticket_key.to_string(),
                    holder: holder.map(|c| c.worker_id),
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn active_claim(&mut self, ticket_id: TicketId) -> Result<Option<Claim>> {
        let row: Option<ClaimRow> = sqlx::query_as(&format!(
            "SELECT {CLAIM_COLUMNS} FROM claims WHERE ticket_id = $1 AND status = 'active'"
        ))
        .bind(ticket_id.0)
        .fetch_optional(self.conn())
        .await
        .context("load active claim")?;
        row.map(ClaimRow::try_into_claim).transpose()
    }

    pub async fn claim(&mut self, id: ClaimId) -> Result<Claim> {
        let row: Option<ClaimRow> = sqlx::query_as(&format!(
            "SELECT {CLAIM_COLUMNS} FROM claims WHERE id = $1"
        ))
        .bind(id.0.to_string())
        .fetch_optional(self.conn())
        .await
        .context("load claim")?;
        row.ok_or_else(|| Error::NotFound(format!("claim {id}")))?
            .try_into_claim()
    }

    pub async fn active_claims(&mut self) -> Result<Vec<Claim>> {
        active_claims_on(self.conn()).await
    }

    /// Move an active claim to a terminal status. Fails with `InvalidState`
    /// if the claim is no longer active.
    pub async fn finish_claim(
        &mut self,
        claim: &Claim,
        status: ClaimStatus,
        at: DateTime<Utc>,
    ) -> Result<Claim> {
        debug_assert!(status.is_terminal());
        let rows = sqlx::query(
            "UPDATE claims SET status = $1, released_at = $2 WHERE id = $3 AND status = 'active'",
        )
        .bind(status.as_str())
        .bind(at)
        .bind(claim.id.0.to_string())
        .execute(self.conn())
        .await
        .context("finish claim")?
        .rows_affected();

        if rows == 0 {
            let current = self.claim(claim.id).await?;
            return Err(Error::InvalidState {
                subject: format!("claim {}", claim.id),
                from: current.status.to_string(),
                action: "finish",
            });
        }

        Ok(Claim {
            status,
            released_at: Some(at),
            ..claim.clone()
        })
    }

    /// Push out the expiry of an active claim.
    pub async fn extend_claim(&mut self, claim: &Claim, expires_at: DateTime<Utc>) -> Result<Claim> {
        let rows = sqlx::query("UPDATE claims SET expires_at = $1 WHERE id = $2 AND status = 'active'")
            .bind(expires_at)
            .bind(claim.id.0.to_string())
            .execute(self.conn())
            .await
            .context("extend claim")?
            .rows_affected();
        if rows == 0 {
            return Err(Error::InvalidState {
                subject: format!("claim {}", claim.id),
                from: claim.status.to_string(),
                action: "extend",
            });
        }
        Ok(Claim {
            expires_at,
            ..claim.clone()
        })
    }
}

async fn active_claims_on(conn: &mut SqliteConnection) -> Result<Vec<Claim>> {
    let rows: Vec<ClaimRow> = sqlx::query_as(&format!(
        "SELECT {CLAIM_COLUMNS} FROM claims WHERE status = 'active' ORDER BY claimed_at, rowid"
    ))
    .fetch_all(&mut *conn)
    .await
    .context("list active claims")?;
    rows.into_iter().map(ClaimRow::try_into_claim).collect()
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ClaimRow {
    id: String,
    ticket_id: i64,
    worker_id: String,
    claimed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
    status: String,
}

impl ClaimRow {
    fn try_into_claim(self) -> Result<Claim> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::Other(format!("corrupt claim id {}: {e}", self.id)))?;
        Ok(Claim {
            id: ClaimId(id),
            ticket_id: TicketId(self.ticket_id),
            worker_id: self.worker_id,
            claimed_at: self.claimed_at,
            expires_at: self.expires_at,
            released_at: self.released_at,
            status: self.status.parse()?,
        })
    }
}
