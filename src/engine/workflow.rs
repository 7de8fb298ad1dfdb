//! Workflow orchestrator: the public API for managing tickets.
//!
//! Each worker-facing operation runs in exactly one storage transaction:
//! load, evaluate the transition against the state machine, write ticket and
//! claim rows, cascade through the dependency graph if the ticket closed
//! successfully, append activity, commit. A rejected guard returns before
//! anything is written; any later failure drops the transaction, which rolls
//! it back.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde_json::json;
use tracing::{Instrument, Span, info, warn};

use super::resolver::{self, Cascade};
use super::retry::after_failed_attempt;
use super::state_machine::{Guards, Transition, holds_claim, next_status};
use crate::db::Db;
use crate::db::Tx;
use crate::db::tickets::TicketInsert;
use crate::error::{Error, Result};
use crate::model::ticket::validate_project_key;
use crate::model::*;
use crate::telemetry::metrics;
use crate::telemetry::ticket::{record_transition, start_ticket_span};

/// The ticket workflow engine. Stateless apart from the store handle; clone
/// freely.
#[derive(Clone)]
pub struct Workflow {
    pub(crate) db: Db,
    /// Retry bound for tickets created without an explicit one.
    pub default_max_retries: u32,
}

/// Guard inputs for one ticket, plus the keys of its unresolved
/// dependencies for error reporting.
pub(crate) struct Snapshot {
    pub guards: Guards,
    pub blocking: Vec<String>,
}

pub(crate) async fn snapshot(tx: &mut Tx, ticket: &Ticket) -> Result<Snapshot> {
    let unresolved = resolver::unresolved_dependencies(tx, ticket.id).await?;
    let incomplete_tasks = tx.incomplete_tasks(ticket.id).await?;
    let active_claim = tx.active_claim(ticket.id).await?.is_some();
    Ok(Snapshot {
        guards: Guards {
            unresolved_dependencies: !unresolved.is_empty(),
            incomplete_tasks,
            active_claim,
        },
        blocking: unresolved.iter().map(|t| t.key.to_string()).collect(),
    })
}

/// Evaluate a transition, attaching the ticket key to any rejection.
pub(crate) fn decide(ticket: &Ticket, transition: Transition, snap: &Snapshot) -> Result<Status> {
    next_status(ticket.status, transition, &snap.guards)
        .map_err(|r| r.into_error(&ticket.key, snap.blocking.clone()))
}

/// Write the updated ticket (compare-and-set on the old status) and its
/// activity entry.
pub(crate) async fn write_transition(
    tx: &mut Tx,
    before: &Ticket,
    after: &Ticket,
    activity: NewActivity,
) -> Result<()> {
    tx.update_ticket(after, before.status).await?;
    tx.append_activity(&activity).await?;
    if before.status != after.status {
        metrics::ticket_transitions().add(
            1,
            &[
                KeyValue::new("from", before.status.as_str()),
                KeyValue::new("to", after.status.as_str()),
            ],
        );
        record_transition(&Span::current(), before.status.as_str(), after.status.as_str());
    }
    Ok(())
}

impl Workflow {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            default_max_retries: 3,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    pub async fn create_project(&self, key: &str, name: &str) -> Result<Project> {
        validate_project_key(key)?;
        let key = key.to_ascii_uppercase();
        let mut tx = self.db.begin().await?;
        let project = tx.insert_project(&key, name).await?;
        tx.commit().await?;
        info!(project = %project.key, "project created");
        Ok(project)
    }

    /// Create a ticket. It starts `ready` when every listed dependency is
    /// already resolved, `blocked` otherwise, or `draft` if requested.
    pub async fn create_ticket(&self, actor: &Actor, new: NewTicket) -> Result<Ticket> {
        if new.title.trim().is_empty() {
            return Err(Error::InvalidArgument("ticket title must not be empty".into()));
        }
        let project_key = new.project.to_ascii_uppercase();
        let mut tx = self.db.begin().await?;
        let project = tx
            .project_by_key(&project_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {project_key}")))?;

        let parent_ticket_id = match &new.parent {
            Some(key) => Some(tx.ticket_by_key(key).await?.id),
            None => None,
        };

        let mut depends_on = Vec::new();
        let mut unresolved = false;
        for key in &new.depends_on {
            let dep = tx.ticket_by_key(key).await?;
            unresolved |= !dep.is_resolved();
            if !depends_on.contains(&dep.id) {
                depends_on.push(dep.id);
            }
        }

        let status = if new.draft {
            Status::Draft
        } else if unresolved {
            Status::Blocked
        } else {
            Status::Ready
        };

        let number = tx.allocate_number(project.id).await?;
        let id = tx
            .insert_ticket(
                number,
                &TicketInsert {
                    project_id: project.id,
                    title: new.title.trim(),
                    description: &new.description,
                    ticket_type: new.ticket_type,
                    priority: new.priority,
                    complexity: new.complexity,
                    status,
                    max_retries: new.max_retries.unwrap_or(self.default_max_retries),
                    parent_ticket_id,
                    milestone_id: new.milestone_id,
                    now: Utc::now(),
                },
            )
            .await?;
        // A brand-new ticket has no dependents, so none of these can close a cycle.
        for dep in &depends_on {
            tx.insert_edge(Dependency {
                ticket_id: id,
                depends_on_id: *dep,
            })
            .await?;
        }

        let ticket = tx.ticket(id).await?;
        tx.append_activity(
            &NewActivity::new(id, Action::Created, actor, format!("{} created", ticket.key)).details(json!({
                "status": status,
                "depends_on": new.depends_on.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            })),
        )
        .await?;
        tx.commit().await?;

        metrics::tickets_created().add(
            1,
            &[
                KeyValue::new("project", project.key),
                KeyValue::new("status", status.as_str()),
            ],
        );
        info!(ticket = %ticket.key, %status, "ticket created");
        Ok(ticket)
    }

    /// Move a draft into the claimable pool.
    pub async fn publish(&self, key: &TicketKey, actor: &Actor) -> Result<Ticket> {
        let span = start_ticket_span("publish", key);
        async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let snap = snapshot(&mut tx, &ticket).await?;
            let to = decide(&ticket, Transition::Publish, &snap)?;
            let updated = Ticket {
                status: to,
                updated_at: Utc::now(),
                ..ticket.clone()
            };
            write_transition(
                &mut tx,
                &ticket,
                &updated,
                NewActivity::new(ticket.id, Action::Published, actor, format!("{key} published")),
            )
            .await?;
            tx.commit().await?;
            Ok(updated)
        }
        .instrument(span)
        .await
    }

    // -----------------------------------------------------------------------
    // Work submission and review
    // -----------------------------------------------------------------------

    /// Submit work: `working → review`, ending the worker's lease. With
    /// `auto_accept` the ticket is accepted in the same transaction.
    pub async fn complete(
        &self,
        key: &TicketKey,
        worker_id: &str,
        summary: Option<&str>,
        auto_accept: bool,
    ) -> Result<(Ticket, Cascade)> {
        let span = start_ticket_span("complete", key);
        async {
            let actor = Actor::agent(worker_id);
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let snap = snapshot(&mut tx, &ticket).await?;
            let claim = tx.active_claim(ticket.id).await?;
            if let Some(other) = claim.as_ref().filter(|c| c.worker_id != worker_id) {
                return Err(Error::AlreadyClaimed {
                    ticket: key.to_string(),
                    holder: Some(other.worker_id.clone()),
                });
            }
            let to = decide(&ticket, Transition::Submit, &snap)?;
            let claim = claim.ok_or_else(|| Error::InvalidState {
                subject: key.to_string(),
                from: format!("{} without an active claim", ticket.status),
                action: "complete",
            })?;

            let now = Utc::now();
            tx.finish_claim(&claim, ClaimStatus::Completed, now).await?;
            let reviewed = Ticket {
                status: to,
                flag_reason: None,
                flag_message: None,
                updated_at: now,
                ..ticket.clone()
            };
            write_transition(
                &mut tx,
                &ticket,
                &reviewed,
                NewActivity::new(ticket.id, Action::Completed, &actor, format!("{key} submitted for review"))
                    .details(json!({ "summary": summary, "claim_id": claim.id.0 })),
            )
            .await?;

            let (ticket, cascade) = if auto_accept {
                accept_in(&mut tx, reviewed, &actor).await?
            } else {
                (reviewed, Cascade::default())
            };
            tx.commit().await?;
            info!(ticket = %key, worker = worker_id, auto_accept, "work completed");
            Ok((ticket, cascade))
        }
        .instrument(span)
        .await
    }

    /// Accept reviewed work: `review → closed(done)`, then cascade.
    pub async fn accept(&self, key: &TicketKey, actor: &Actor) -> Result<(Ticket, Cascade)> {
        let span = start_ticket_span("accept", key);
        async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let result = accept_in(&mut tx, ticket, actor).await?;
            tx.commit().await?;
            info!(ticket = %key, unblocked = result.1.unblocked.len(), "ticket accepted");
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Send reviewed work back. Counts as a failed attempt; exhausting the
    /// retry bound escalates to `human` instead.
    pub async fn reject(&self, key: &TicketKey, actor: &Actor, reason: &str) -> Result<Ticket> {
        if reason.trim().is_empty() {
            return Err(Error::InvalidArgument("a rejection needs a reason".into()));
        }
        let span = start_ticket_span("reject", key);
        async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let decision = after_failed_attempt(ticket.retry_count, ticket.max_retries);
            let snap = snapshot(&mut tx, &ticket).await?;
            let to = decide(
                &ticket,
                Transition::Reject {
                    escalate: decision.escalate,
                },
                &snap,
            )?;

            let now = Utc::now();
            release_claim_in(&mut tx, ticket.id, now).await?;
            let updated = Ticket {
                status: to,
                retry_count: decision.retry_count,
                flag_reason: decision.escalate.then_some(FlagReason::MaxRetriesReached),
                flag_message: decision.escalate.then(|| reason.to_string()),
                updated_at: now,
                ..ticket.clone()
            };
            write_transition(
                &mut tx,
                &ticket,
                &updated,
                NewActivity::new(ticket.id, Action::Rejected, actor, format!("{key} rejected: {reason}"))
                    .details(json!({ "reason": reason, "retry_count": decision.retry_count })),
            )
            .await?;
            if decision.escalate {
                tx.append_activity(&NewActivity::new(
                    ticket.id,
                    Action::Escalated,
                    actor,
                    format!(
                        "{key} escalated after {} of {} attempts",
                        decision.retry_count, ticket.max_retries
                    ),
                ))
                .await?;
                warn!(ticket = %key, retry_count = decision.retry_count, "rejected ticket escalated");
            }
            tx.commit().await?;
            Ok(updated)
        }
        .instrument(span)
        .await
    }

    // -----------------------------------------------------------------------
    // Human escalation
    // -----------------------------------------------------------------------

    /// A message needing a response was sent for the ticket: park it in
    /// `human` and release any lease.
    pub async fn flag(
        &self,
        key: &TicketKey,
        actor: &Actor,
        reason: FlagReason,
        message: &str,
    ) -> Result<Ticket> {
        let span = start_ticket_span("flag", key);
        async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let snap = snapshot(&mut tx, &ticket).await?;
            let to = decide(&ticket, Transition::Escalate, &snap)?;

            let now = Utc::now();
            let released = release_claim_in(&mut tx, ticket.id, now).await?;
            let updated = Ticket {
                status: to,
                flag_reason: Some(reason),
                flag_message: Some(message.to_string()),
                updated_at: now,
                ..ticket.clone()
            };
            write_transition(
                &mut tx,
                &ticket,
                &updated,
                NewActivity::new(ticket.id, Action::Flagged, actor, format!("{key} flagged: {reason}"))
                    .details(json!({
                        "reason": reason,
                        "message": message,
                        "released_claim": released.map(|c| c.id.0),
                    })),
            )
            .await?;
            tx.commit().await?;
            info!(ticket = %key, %reason, "ticket flagged for a human");
            Ok(updated)
        }
        .instrument(span)
        .await
    }

    /// A human answered: `human → ready`, retry count reset, flag cleared.
    pub async fn respond(&self, key: &TicketKey, actor: &Actor, response: &str) -> Result<Ticket> {
        let span = start_ticket_span("respond", key);
        async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let snap = snapshot(&mut tx, &ticket).await?;
            let to = decide(&ticket, Transition::Respond, &snap)?;
            let updated = Ticket {
                status: to,
                retry_count: 0,
                flag_reason: None,
                flag_message: None,
                updated_at: Utc::now(),
                ..ticket.clone()
            };
            write_transition(
                &mut tx,
                &ticket,
                &updated,
                NewActivity::new(ticket.id, Action::Responded, actor, format!("{key} answered"))
                    .details(json!({
                        "response": response,
                        "flag_reason": ticket.flag_reason,
                        "previous_retry_count": ticket.retry_count,
                    })),
            )
            .await?;
            tx.commit().await?;
            Ok(updated)
        }
        .instrument(span)
        .await
    }

    // -----------------------------------------------------------------------
    // Closing and reopening
    // -----------------------------------------------------------------------

    /// Close a ticket with an explicit resolution, releasing any lease.
    ///
    /// Only `done` cascades. Dependents of a ticket closed any other way stay
    /// blocked until someone edits the graph.
    pub async fn close(
        &self,
        key: &TicketKey,
        actor: &Actor,
        resolution: Resolution,
        reason: Option<&str>,
    ) -> Result<(Ticket, Cascade)> {
        let span = start_ticket_span("close", key);
        async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let snap = snapshot(&mut tx, &ticket).await?;
            let to = decide(&ticket, Transition::Close(resolution), &snap)?;

            let now = Utc::now();
            if holds_claim(ticket.status) || snap.guards.active_claim {
                release_claim_in(&mut tx, ticket.id, now).await?;
            }
            let closed = Ticket {
                status: to,
                resolution: Some(resolution),
                flag_reason: None,
                flag_message: None,
                completed_at: Some(now),
                updated_at: now,
                ..ticket.clone()
            };
            write_transition(
                &mut tx,
                &ticket,
                &closed,
                NewActivity::new(ticket.id, Action::Closed, actor, format!("{key} closed as {resolution}"))
                    .details(json!({ "resolution": resolution, "reason": reason })),
            )
            .await?;

            let cascade = if resolution.is_success() {
                resolver::on_completed_successfully(&mut tx, &closed, actor).await?
            } else {
                Cascade::default()
            };
            tx.commit().await?;
            info!(ticket = %key, %resolution, "ticket closed");
            Ok((closed, cascade))
        }
        .instrument(span)
        .await
    }

    /// Reopen a closed ticket. Its new status follows the dependency graph as
    /// it is now, not as it was when the ticket closed.
    pub async fn reopen(&self, key: &TicketKey, actor: &Actor) -> Result<Ticket> {
        let span = start_ticket_span("reopen", key);
        async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let snap = snapshot(&mut tx, &ticket).await?;
            let to = decide(&ticket, Transition::Reopen, &snap)?;
            let reopened = Ticket {
                status: to,
                resolution: None,
                completed_at: None,
                updated_at: Utc::now(),
                ..ticket.clone()
            };
            write_transition(
                &mut tx,
                &ticket,
                &reopened,
                NewActivity::new(ticket.id, Action::Reopened, actor, format!("{key} reopened"))
                    .details(json!({ "previous_resolution": ticket.resolution })),
            )
            .await?;
            if ticket.is_resolved() {
                let reblocked = resolver::on_reopened(&mut tx, &reopened, actor).await?;
                if !reblocked.is_empty() {
                    info!(ticket = %key, reblocked = reblocked.len(), "dependents blocked again");
                }
            }
            tx.commit().await?;
            Ok(reopened)
        }
        .instrument(span)
        .await
    }

    // -----------------------------------------------------------------------
    // Dependencies
    // -----------------------------------------------------------------------

    /// Add `key -> depends_on`. Rejected without change if it would close a
    /// cycle. Returns the ticket after re-evaluation.
    pub async fn add_dependency(
        &self,
        key: &TicketKey,
        depends_on: &TicketKey,
        actor: &Actor,
    ) -> Result<Ticket> {
        let span = start_ticket_span("add_dependency", key);
        async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let target = tx.ticket_by_key(depends_on).await?;

            if resolver::would_create_cycle(&mut tx, ticket.id, target.id).await? {
                metrics::dependency_operations()
                    .add(1, &[KeyValue::new("operation", "add"), KeyValue::new("result", "cycle")]);
                return Err(Error::CircularDependency {
                    ticket: key.to_string(),
                    depends_on: depends_on.to_string(),
                });
            }

            let inserted = tx
                .insert_edge(Dependency {
                    ticket_id: ticket.id,
                    depends_on_id: target.id,
                })
                .await?;
            if inserted {
                tx.append_activity(&NewActivity::new(
                    ticket.id,
                    Action::DependencyAdded,
                    actor,
                    format!("{key} depends on {depends_on}"),
                ))
                .await?;
                resolver::reevaluate(&mut tx, ticket.id, actor).await?;
            }
            let ticket = tx.ticket(ticket.id).await?;
            tx.commit().await?;

            metrics::dependency_operations().add(
                1,
                &[
                    KeyValue::new("operation", "add"),
                    KeyValue::new("result", if inserted { "ok" } else { "noop" }),
                ],
            );
            Ok(ticket)
        }
        .instrument(span)
        .await
    }

    /// Remove `key -> depends_on` (a no-op if absent) and re-evaluate.
    pub async fn remove_dependency(
        &self,
        key: &TicketKey,
        depends_on: &TicketKey,
        actor: &Actor,
    ) -> Result<Ticket> {
        let span = start_ticket_span("remove_dependency", key);
        async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let target = tx.ticket_by_key(depends_on).await?;
            let removed = tx
                .delete_edge(Dependency {
                    ticket_id: ticket.id,
                    depends_on_id: target.id,
                })
                .await?;
            if removed {
                tx.append_activity(&NewActivity::new(
                    ticket.id,
                    Action::DependencyRemoved,
                    actor,
                    format!("{key} no longer depends on {depends_on}"),
                ))
                .await?;
            }
            resolver::reevaluate(&mut tx, ticket.id, actor).await?;
            let ticket = tx.ticket(ticket.id).await?;
            tx.commit().await?;

            metrics::dependency_operations().add(
                1,
                &[
                    KeyValue::new("operation", "remove"),
                    KeyValue::new("result", if removed { "ok" } else { "noop" }),
                ],
            );
            Ok(ticket)
        }
        .instrument(span)
        .await
    }

    // -----------------------------------------------------------------------
    // Task checklist
    // -----------------------------------------------------------------------

    pub async fn add_task(&self, key: &TicketKey, actor: &Actor, description: &str) -> Result<Task> {
        if description.trim().is_empty() {
            return Err(Error::InvalidArgument("task description must not be empty".into()));
        }
        let mut tx = self.db.begin().await?;
        let ticket = tx.ticket_by_key(key).await?;
        if ticket.status.is_terminal() {
            return Err(Error::InvalidState {
                subject: key.to_string(),
                from: ticket.status.to_string(),
                action: "add a task",
            });
        }
        let task = tx.append_task(ticket.id, description.trim()).await?;
        tx.append_activity(
            &NewActivity::new(ticket.id, Action::TaskAdded, actor, format!("{key} task {}", task.position))
                .details(json!({ "description": task.description })),
        )
        .await?;
        tx.commit().await?;
        Ok(task)
    }

    pub async fn complete_task(&self, key: &TicketKey, actor: &Actor, position: i64) -> Result<Task> {
        let mut tx = self.db.begin().await?;
        let ticket = tx.ticket_by_key(key).await?;
        let task = tx.complete_task(ticket.id, position).await?;
        tx.append_activity(&NewActivity::new(
            ticket.id,
            Action::TaskCompleted,
            actor,
            format!("{key} task {position} done"),
        ))
        .await?;
        tx.commit().await?;
        Ok(task)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn ticket(&self, key: &TicketKey) -> Result<Ticket> {
        self.db.get_ticket(key).await
    }

    pub async fn tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
        self.db.list_tickets(filter).await
    }

    /// Claimable tickets: highest priority first, then oldest first.
    pub async fn ready(&self, project: Option<&str>, limit: usize) -> Result<Vec<Ticket>> {
        let mut tickets = self
            .db
            .list_tickets(&TicketFilter {
                project: project.map(str::to_ascii_uppercase),
                status: Some(Status::Ready),
                ..Default::default()
            })
            .await?;
        tickets.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        tickets.truncate(limit);
        Ok(tickets)
    }

    pub async fn active_claim(&self, key: &TicketKey) -> Result<Option<Claim>> {
        let mut tx = self.db.begin().await?;
        let ticket = tx.ticket_by_key(key).await?;
        tx.active_claim(ticket.id).await
    }

    pub async fn claims(&self, key: &TicketKey) -> Result<Vec<Claim>> {
        let ticket = self.db.get_ticket(key).await?;
        self.db.claim_history(ticket.id).await
    }

    /// Tickets `key` depends on.
    pub async fn dependencies(&self, key: &TicketKey) -> Result<Vec<Ticket>> {
        let mut tx = self.db.begin().await?;
        let ticket = tx.ticket_by_key(key).await?;
        let mut out = Vec::new();
        for id in tx.dependencies_of(ticket.id).await? {
            out.push(tx.ticket(id).await?);
        }
        Ok(out)
    }

    /// Tickets depending on `key`.
    pub async fn dependents(&self, key: &TicketKey) -> Result<Vec<Ticket>> {
        let mut tx = self.db.begin().await?;
        let ticket = tx.ticket_by_key(key).await?;
        let mut out = Vec::new();
        for id in tx.dependents_of(ticket.id).await? {
            out.push(tx.ticket(id).await?);
        }
        Ok(out)
    }

    pub async fn tasks(&self, key: &TicketKey) -> Result<Vec<Task>> {
        let ticket = self.db.get_ticket(key).await?;
        self.db.tasks(ticket.id).await
    }

    pub async fn history(&self, key: &TicketKey) -> Result<Vec<ActivityEntry>> {
        let ticket = self.db.get_ticket(key).await?;
        self.db.history(ticket.id).await
    }
}

/// End the ticket's active claim, if it has one, as released.
pub(crate) async fn release_claim_in(
    tx: &mut Tx,
    ticket_id: TicketId,
    at: DateTime<Utc>,
) -> Result<Option<Claim>> {
    match tx.active_claim(ticket_id).await? {
        Some(claim) => Ok(Some(tx.finish_claim(&claim, ClaimStatus::Released, at).await?)),
        None => Ok(None),
    }
}

/// `review → closed(done)` and the completion cascade, inside `tx`.
async fn accept_in(tx: &mut Tx, ticket: Ticket, actor: &Actor) -> Result<(Ticket, Cascade)> {
    let snap = snapshot(tx, &ticket).await?;
    let to = decide(&ticket, Transition::Accept, &snap)?;
    let now = Utc::now();
    let closed = Ticket {
        status: to,
        resolution: Some(Resolution::Done),
        completed_at: Some(now),
        updated_at: now,
        ..ticket.clone()
    };
    write_transition(
        tx,
        &ticket,
        &closed,
        NewActivity::new(ticket.id, Action::Accepted, actor, format!("{} accepted", ticket.key)),
    )
    .await?;
    let cascade = resolver::on_completed_successfully(tx, &closed, actor).await?;
    Ok((closed, cascade))
}
