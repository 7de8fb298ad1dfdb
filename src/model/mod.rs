//! Core data model.
//!
//! Tickets are units of work grouped into projects. A ticket is worked under a
//! claim (a lease), may depend on other tickets, and carries an ordered task
//! checklist. Every state change leaves an activity entry behind.

pub mod activity;
pub mod claim;
pub mod ticket;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use activity::{Action, ActivityEntry, Actor, ActorKind, NewActivity};
pub use claim::{Claim, ClaimId, ClaimStatus, MAX_CLAIM_DURATION_SECS};
pub use ticket::{
    Complexity, FlagReason, NewTicket, Priority, Resolution, Status, Ticket, TicketId, TicketKey,
    TicketType,
};

/// A project groups tickets under a short key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One item of a ticket's ordered checklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub ticket_id: TicketId,
    /// 1-based position within the ticket.
    pub position: i64,
    pub description: String,
    pub done: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A directed "must finish first" edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub ticket_id: TicketId,
    pub depends_on_id: TicketId,
}

/// Filters for ticket listings.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub project: Option<String>,
    pub status: Option<Status>,
    pub parent: Option<TicketId>,
    pub limit: Option<i64>,
}
