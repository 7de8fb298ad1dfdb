//! Activity log entries.
//!
//! The activity log is an append-only ledger. The engine writes one entry per
//! state-affecting operation; history display is left to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::ticket::TicketId;
use crate::error::{Error, Result};

/// A recorded activity entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub ticket_id: TicketId,
    pub action: Action,
    pub actor: Actor,
    pub summary: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An entry about to be appended.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub ticket_id: TicketId,
    pub action: Action,
    pub actor: Actor,
    pub summary: String,
    pub details: serde_json::Value,
}

impl NewActivity {
    pub fn new(ticket_id: TicketId, action: Action, actor: &Actor, summary: impl Into<String>) -> Self {
        Self {
            ticket_id,
            action,
            actor: actor.clone(),
            summary: summary.into(),
            details: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Who performed an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Agent,
            id: id.into(),
        }
    }

    pub fn human(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Human,
            id: id.into(),
        }
    }

    /// The engine itself, e.g. the lease sweeper.
    pub fn system(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::System,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Agent,
    Human,
    System,
}

impl ActorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorKind::Agent => "agent",
            ActorKind::Human => "human",
            ActorKind::System => "system",
        }
    }
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "agent" => Ok(ActorKind::Agent),
            "human" => Ok(ActorKind::Human),
            "system" => Ok(ActorKind::System),
            other => Err(Error::InvalidArgument(format!("unknown actor type: {other}"))),
        }
    }
}

/// What happened to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Published,
    Claimed,
    Resumed,
    Released,
    Expired,
    Escalated,
    Completed,
    Accepted,
    Rejected,
    Flagged,
    Responded,
    Closed,
    Reopened,
    Blocked,
    Unblocked,
    DependencyAdded,
    DependencyRemoved,
    TaskAdded,
    TaskCompleted,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Published => "published",
            Action::Claimed => "claimed",
            Action::Resumed => "resumed",
            Action::Released => "released",
            Action::Expired => "expired",
            Action::Escalated => "escalated",
            Action::Completed => "completed",
            Action::Accepted => "accepted",
            Action::Rejected => "rejected",
            Action::Flagged => "flagged",
            Action::Responded => "responded",
            Action::Closed => "closed",
            Action::Reopened => "reopened",
            Action::Blocked => "blocked",
            Action::Unblocked => "unblocked",
            Action::DependencyAdded => "dependency_added",
            Action::DependencyRemoved => "dependency_removed",
            Action::TaskAdded => "task_added",
            Action::TaskCompleted => "task_completed",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let action = match s {
            "created" => Action::Created,
            "published" => Action::Published,
            "claimed" => Action::Claimed,
            "resumed" => Action::Resumed,
            "released" => Action::Released,
            "expired" => Action::Expired,
            "escalated" => Action::Escalated,
            "completed" => Action::Completed,
            "accepted" => Action::Accepted,
            "rejected" => Action::Rejected,
            "flagged" => Action::Flagged,
            "responded" => Action::Responded,
            "closed" => Action::Closed,
            "reopened" => Action::Reopened,
            "blocked" => Action::Blocked,
            "unblocked" => Action::Unblocked,
            "dependency_added" => Action::DependencyAdded,
            "dependency_removed" => Action::DependencyRemoved,
            "task_added" => Action::TaskAdded,
            "task_completed" => Action::TaskCompleted,
            other => return Err(Error::InvalidArgument(format!("unknown action: {other}"))),
        };
        Ok(action)
    }
}
