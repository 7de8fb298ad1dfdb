//! Claims: time-boxed exclusive leases on a ticket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::ticket::TicketId;
use crate::error::{Error, Result};

/// Newtype for claim IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimId(pub Uuid);

impl ClaimId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClaimId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Longest lease a worker may take or renew in one call: one year.
pub const MAX_CLAIM_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// A lease held by one worker on one ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub ticket_id: TicketId,
    pub worker_id: String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub status: ClaimStatus,
}

impl Claim {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ClaimStatus::Active && self.expires_at < now
    }
}

/// Claims start `Active` and move to exactly one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Active,
    Completed,
    Expired,
    Released,
}

impl ClaimStatus {
    pub fn is_terminal(self) -> bool {
        self != ClaimStatus::Active
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClaimStatus::Active => "active",
            ClaimStatus::Completed => "completed",
            ClaimStatus::Expired => "expired",
            ClaimStatus::Released => "released",
        }
    }
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(ClaimStatus::Active),
            "completed" => Ok(ClaimStatus::Completed),
            "expired" => Ok(ClaimStatus::Expired),
            "released" => Ok(ClaimStatus::Released),
            other => Err(Error::InvalidArgument(format!("unknown claim status: {other}"))),
        }
    }
}
