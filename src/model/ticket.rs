//! Tickets: identity, classification, and lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Storage identity of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId(pub i64);

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Human key of a ticket: `PROJECT-NUMBER`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketKey {
    pub project: String,
    pub number: i64,
}

impl TicketKey {
    pub fn new(project: impl Into<String>, number: i64) -> Self {
        Self {
            project: project.into(),
            number,
        }
    }
}

impl std::fmt::Display for TicketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.project, self.number)
    }
}

impl FromStr for TicketKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (project, number) = s
            .rsplit_once('-')
            .ok_or_else(|| Error::InvalidArgument(format!("ticket key '{s}' is not PROJECT-NUMBER")))?;
        validate_project_key(project)?;
        let number: i64 = number
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("ticket key '{s}' has a bad number")))?;
        if number < 1 {
            return Err(Error::InvalidArgument(format!(
                "ticket key '{s}' must have a positive number"
            )));
        }
        Ok(Self::new(project.to_ascii_uppercase(), number))
    }
}

/// Project keys are short alphanumeric tags, stored uppercase.
pub fn validate_project_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key.len() <= 16
        && key.chars().all(|c| c.is_ascii_alphanumeric())
        && key.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "project key '{key}' must be 1-16 alphanumeric characters starting with a letter"
        )))
    }
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// A unit of work tracked through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub key: TicketKey,
    pub title: String,
    pub description: String,
    pub ticket_type: TicketType,
    pub priority: Priority,
    pub complexity: Complexity,
    pub status: Status,
    /// Set iff `status == Closed`.
    pub resolution: Option<Resolution>,
    pub retry_count: u32,
    /// Reaching this bound escalates; it is not a hard cap.
    pub max_retries: u32,
    pub flag_reason: Option<FlagReason>,
    pub flag_message: Option<String>,
    pub parent_ticket_id: Option<TicketId>,
    pub milestone_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Closed with the success resolution. Only this satisfies a dependency.
    pub fn is_resolved(&self) -> bool {
        self.status == Status::Closed && self.resolution.is_some_and(Resolution::is_success)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not yet published for work.
    Draft,
    /// Claimable.
    Ready,
    /// Waiting on at least one unresolved dependency.
    Blocked,
    /// Claimed; a worker holds the active lease.
    Working,
    /// Work submitted, awaiting acceptance.
    Review,
    /// Escalated; needs a person.
    Human,
    /// Terminal; carries a resolution.
    Closed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        self == Status::Closed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Ready => "ready",
            Status::Blocked => "blocked",
            Status::Working => "working",
            Status::Review => "review",
            Status::Human => "human",
            Status::Closed => "closed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(Status::Draft),
            "ready" => Ok(Status::Ready),
            "blocked" => Ok(Status::Blocked),
            "working" => Ok(Status::Working),
            "review" => Ok(Status::Review),
            "human" => Ok(Status::Human),
            "closed" => Ok(Status::Closed),
            other => Err(Error::InvalidArgument(format!("unknown status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Terminal outcome recorded when a ticket closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Done,
    WontDo,
    Duplicate,
    Invalid,
    Obsolete,
}

impl Resolution {
    pub fn is_success(self) -> bool {
        self == Resolution::Done
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Done => "done",
            Resolution::WontDo => "wont_do",
            Resolution::Duplicate => "duplicate",
            Resolution::Invalid => "invalid",
            Resolution::Obsolete => "obsolete",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "done" => Ok(Resolution::Done),
            "wont_do" | "wont-do" => Ok(Resolution::WontDo),
            "duplicate" => Ok(Resolution::Duplicate),
            "invalid" => Ok(Resolution::Invalid),
            "obsolete" => Ok(Resolution::Obsolete),
            other => Err(Error::InvalidArgument(format!("unknown resolution: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Flag reason
// ---------------------------------------------------------------------------

/// Why a ticket was escalated to `human`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    NeedsInput,
    Decision,
    Blocked,
    Error,
    Review,
    MaxRetriesReached,
}

impl FlagReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FlagReason::NeedsInput => "needs_input",
            FlagReason::Decision => "decision",
            FlagReason::Blocked => "blocked",
            FlagReason::Error => "error",
            FlagReason::Review => "review",
            FlagReason::MaxRetriesReached => "max_retries_reached",
        }
    }
}

impl std::fmt::Display for FlagReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlagReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "needs_input" => Ok(FlagReason::NeedsInput),
            "decision" => Ok(FlagReason::Decision),
            "blocked" => Ok(FlagReason::Blocked),
            "error" => Ok(FlagReason::Error),
            "review" => Ok(FlagReason::Review),
            "max_retries_reached" => Ok(FlagReason::MaxRetriesReached),
            other => Err(Error::InvalidArgument(format!("unknown flag reason: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Ordered highest to lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

/// Ordered smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Small,
    Medium,
    Large,
    Xlarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    Task,
    Epic,
}

macro_rules! simple_enum_str {
    ($ty:ident, $what:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(Error::InvalidArgument(format!(concat!("unknown ", $what, ": {}"), other))),
                }
            }
        }
    };
}

simple_enum_str!(Priority, "priority", {
    Critical => "critical",
    High => "high",
    Medium => "medium",
    Low => "low",
});

simple_enum_str!(Complexity, "complexity", {
    Trivial => "trivial",
    Small => "small",
    Medium => "medium",
    Large => "large",
    Xlarge => "xlarge",
});

simple_enum_str!(TicketType, "ticket type", {
    Task => "task",
    Epic => "epic",
});

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for new tickets. Passed to `Workflow::create_ticket`.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub(crate) project: String,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) ticket_type: TicketType,
    pub(crate) priority: Priority,
    pub(crate) complexity: Complexity,
    pub(crate) max_retries: Option<u32>,
    pub(crate) parent: Option<TicketKey>,
    pub(crate) milestone_id: Option<i64>,
    pub(crate) depends_on: Vec<TicketKey>,
    pub(crate) draft: bool,
}

impl NewTicket {
    pub fn new(project: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            title: title.into(),
            description: String::new(),
            ticket_type: TicketType::Task,
            priority: Priority::Medium,
            complexity: Complexity::Medium,
            max_retries: None,
            parent: None,
            milestone_id: None,
            depends_on: Vec::new(),
            draft: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn ticket_type(mut self, ticket_type: TicketType) -> Self {
        self.ticket_type = ticket_type;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn parent(mut self, parent: TicketKey) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn milestone(mut self, milestone_id: i64) -> Self {
        self.milestone_id = Some(milestone_id);
        self
    }

    pub fn depends_on(mut self, key: TicketKey) -> Self {
        self.depends_on.push(key);
        self
    }

    /// Create in `draft`; `Workflow::publish` makes it claimable.
    pub fn draft(mut self) -> Self {
        self.draft = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_key_round_trips_through_display() {
        let key: TicketKey = "core-42".parse().unwrap();
        assert_eq!(key, TicketKey::new("CORE", 42));
        assert_eq!(key.to_string(), "CORE-42");
    }

    #[test]
    fn ticket_key_rejects_garbage() {
        assert!("CORE".parse::<TicketKey>().is_err());
        assert!("CORE-x".parse::<TicketKey>().is_err());
        assert!("CORE-0".parse::<TicketKey>().is_err());
        assert!("-3".parse::<TicketKey>().is_err());
        assert!("9AB-3".parse::<TicketKey>().is_err());
    }

    #[test]
    fn priority_orders_highest_first() {
        let mut p = vec![Priority::Low, Priority::Critical, Priority::Medium, Priority::High];
        p.sort();
        assert_eq!(
            p,
            vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
        );
        assert!(Complexity::Trivial < Complexity::Xlarge);
    }

    #[test]
    fn only_done_is_success() {
        assert!(Resolution::Done.is_success());
        for r in [
            Resolution::WontDo,
            Resolution::Duplicate,
            Resolution::Invalid,
            Resolution::Obsolete,
        ] {
            assert!(!r.is_success(), "{r} should not count as success");
        }
    }

    #[test]
    fn unknown_codes_are_invalid_arguments() {
        assert!(matches!(
            "finished".parse::<Resolution>(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            "bored".parse::<FlagReason>(),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!("wont-do".parse::<Resolution>().unwrap(), Resolution::WontDo);
        assert_eq!("xlarge".parse::<Complexity>().unwrap(), Complexity::Xlarge);
    }
}
