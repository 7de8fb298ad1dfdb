//! Dependency resolution engine.
//!
//! Keeps ticket status consistent with the dependency graph. A dependency is
//! resolved only when the depended-on ticket is closed with the success
//! resolution; any other closure leaves dependents blocked until a person
//! edits the graph.
//!
//! Everything here works against the [`Records`] seam rather than a concrete
//! store, so the graph walks can be exercised without a database. The walks
//! are bounded: one hop over direct dependents plus one parent check per
//! successful completion.

use std::collections::HashSet;
use std::future::Future;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use super::state_machine::{Guards, Transition, next_status};
use crate::db::Tx;
use crate::error::Result;
use crate::model::*;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Read/write access the resolver needs. Implemented by [`Tx`]; anything
/// implementing it gets the same cascade semantics.
pub trait Records {
    fn load_ticket(&mut self, id: TicketId) -> impl Future<Output = Result<Ticket>> + Send;

    /// Write a ticket whose status was `expected` when it was read.
    fn store_ticket(
        &mut self,
        ticket: &Ticket,
        expected: Status,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Outgoing edges: what `id` depends on.
    fn dependencies(&mut self, id: TicketId) -> impl Future<Output = Result<Vec<TicketId>>> + Send;

    /// Incoming edges: who depends on `id`.
    fn dependents(&mut self, id: TicketId) -> impl Future<Output = Result<Vec<TicketId>>> + Send;

    fn children(&mut self, id: TicketId) -> impl Future<Output = Result<Vec<Ticket>>> + Send;

    /// Release the ticket's active claim, if any.
    fn release_active_claim(
        &mut self,
        ticket_id: TicketId,
    ) -> impl Future<Output = Result<Option<Claim>>> + Send;

    fn record(&mut self, entry: NewActivity) -> impl Future<Output = Result<()>> + Send;
}

impl Records for Tx {
    async fn load_ticket(&mut self, id: TicketId) -> Result<Ticket> {
        self.ticket(id).await
    }

    async fn store_ticket(&mut self, ticket: &Ticket, expected: Status) -> Result<()> {
        self.update_ticket(ticket, expected).await
    }

    async fn dependencies(&mut self, id: TicketId) -> Result<Vec<TicketId>> {
        self.dependencies_of(id).await
    }

    async fn dependents(&mut self, id: TicketId) -> Result<Vec<TicketId>> {
        self.dependents_of(id).await
    }

    async fn children(&mut self, id: TicketId) -> Result<Vec<Ticket>> {
        self.children_of(id).await
    }

    async fn release_active_claim(&mut self, ticket_id: TicketId) -> Result<Option<Claim>> {
        match self.active_claim(ticket_id).await? {
            Some(claim) => Ok(Some(
                self.finish_claim(&claim, ClaimStatus::Released, Utc::now())
                    .await?,
            )),
            None => Ok(None),
        }
    }

    async fn record(&mut self, entry: NewActivity) -> Result<()> {
        self.append_activity(&entry).await
    }
}

/// What a successful completion changed elsewhere in the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cascade {
    /// Dependents moved from `blocked` to `ready`.
    pub unblocked: Vec<TicketKey>,
    /// The parent, if it moved to `ready` because all its children closed.
    pub parent_ready: Option<TicketKey>,
}

/// Dependencies of `id` that are not yet resolved.
pub async fn unresolved_dependencies<R: Records>(records: &mut R, id: TicketId) -> Result<Vec<Ticket>> {
    let mut unresolved = Vec::new();
    for dep in records.dependencies(id).await? {
        let ticket = records.load_ticket(dep).await?;
        if !ticket.is_resolved() {
            unresolved.push(ticket);
        }
    }
    Ok(unresolved)
}

pub async fn has_unresolved_dependencies<R: Records>(records: &mut R, id: TicketId) -> Result<bool> {
    for dep in records.dependencies(id).await? {
        if !records.load_ticket(dep).await?.is_resolved() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// True if adding `ticket -> depends_on` would close a cycle: `ticket` is
/// reachable from `depends_on` along existing dependency edges.
pub async fn would_create_cycle<R: Records>(
    records: &mut R,
    ticket: TicketId,
    depends_on: TicketId,
) -> Result<bool> {
    if ticket == depends_on {
        return Ok(true);
    }
    let mut seen = HashSet::from([depends_on]);
    let mut stack = vec![depends_on];
    while let Some(current) = stack.pop() {
        for next in records.dependencies(current).await? {
            if next == ticket {
                return Ok(true);
            }
            if seen.insert(next) {
                stack.push(next);
            }
        }
    }
    Ok(false)
}

/// Apply a graph-driven transition and log it.
async fn shift<R: Records>(
    records: &mut R,
    ticket: &Ticket,
    to: Status,
    action: Action,
    actor: &Actor,
    details: serde_json::Value,
) -> Result<Ticket> {
    let from = ticket.status;
    let updated = Ticket {
        status: to,
        updated_at: Utc::now(),
        ..ticket.clone()
    };
    records.store_ticket(&updated, from).await?;
    records
        .record(
            NewActivity::new(
                ticket.id,
                action,
                actor,
                format!("{} {from} -> {to}", ticket.key),
            )
            .details(details),
        )
        .await?;
    metrics::ticket_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
    Ok(updated)
}

/// Re-check one ticket against the graph: `ready` with an unresolved
/// dependency becomes `blocked`, `blocked` with none becomes `ready`. Other
/// statuses are left alone. Returns the new status if it changed.
pub async fn reevaluate<R: Records>(records: &mut R, id: TicketId, actor: &Actor) -> Result<Option<Status>> {
    let ticket = records.load_ticket(id).await?;
    let transition = match ticket.status {
        Status::Ready => Transition::Block,
        Status::Blocked => Transition::Unblock,
        _ => return Ok(None),
    };
    let unresolved = unresolved_dependencies(records, id).await?;
    let guards = Guards {
        unresolved_dependencies: !unresolved.is_empty(),
        ..Default::default()
    };
    let Ok(to) = next_status(ticket.status, transition, &guards) else {
        return Ok(None);
    };

    let action = if to == Status::Blocked {
        Action::Blocked
    } else {
        Action::Unblocked
    };
    let blocking: Vec<String> = unresolved.iter().map(|t| t.key.to_string()).collect();
    shift(
        records,
        &ticket,
        to,
        action,
        actor,
        json!({ "unresolved": blocking }),
    )
    .await?;
    debug!(ticket = %ticket.key, from = %ticket.status, %to, "re-evaluated against dependencies");
    Ok(Some(to))
}

/// Cascade a successful completion of `completed`.
///
/// (a) Every blocked dependent with no other unresolved dependency moves to
/// `ready`. (b) If every child of `completed`'s parent is now closed, the
/// parent moves from `blocked`/`working` to `ready` (releasing its lease if
/// it had one). The parent is never closed automatically.
pub async fn on_completed_successfully<R: Records>(
    records: &mut R,
    completed: &Ticket,
    actor: &Actor,
) -> Result<Cascade> {
    let mut cascade = Cascade::default();

    for dependent_id in records.dependents(completed.id).await? {
        let dependent = records.load_ticket(dependent_id).await?;
        if dependent.status != Status::Blocked {
            continue;
        }
        if has_unresolved_dependencies(records, dependent_id).await? {
            continue;
        }
        shift(
            records,
            &dependent,
            Status::Ready,
            Action::Unblocked,
            actor,
            json!({ "resolved_by": completed.key.to_string() }),
        )
        .await?;
        cascade.unblocked.push(dependent.key.clone());
    }

    if let Some(parent_id) = completed.parent_ticket_id {
        cascade.parent_ready = settle_parent(records, parent_id, actor).await?;
    }

    if !cascade.unblocked.is_empty() || cascade.parent_ready.is_some() {
        info!(
            ticket = %completed.key,
            unblocked = cascade.unblocked.len(),
            parent_ready = cascade.parent_ready.is_some(),
            "completion cascaded"
        );
    }
    Ok(cascade)
}

async fn settle_parent<R: Records>(
    records: &mut R,
    parent_id: TicketId,
    actor: &Actor,
) -> Result<Option<TicketKey>> {
    let children = records.children(parent_id).await?;
    if children.iter().any(|c| !c.status.is_terminal()) {
        return Ok(None);
    }
    let parent = records.load_ticket(parent_id).await?;
    let guards = Guards {
        unresolved_dependencies: has_unresolved_dependencies(records, parent_id).await?,
        ..Default::default()
    };
    let Ok(to) = next_status(parent.status, Transition::ChildrenClosed, &guards) else {
        return Ok(None);
    };

    let released = if parent.status == Status::Working {
        records.release_active_claim(parent_id).await?
    } else {
        None
    };
    shift(
        records,
        &parent,
        to,
        Action::Unblocked,
        actor,
        json!({
            "reason": "children_closed",
            "children": children.len(),
            "released_worker": released.map(|c| c.worker_id),
        }),
    )
    .await?;
    Ok(Some(parent.key))
}

/// A successfully closed ticket was reopened: dependents that were `ready`
/// only because of it go back to `blocked`.
pub async fn on_reopened<R: Records>(records: &mut R, reopened: &Ticket, actor: &Actor) -> Result<Vec<TicketKey>> {
    let mut blocked = Vec::new();
    for dependent_id in records.dependents(reopened.id).await? {
        if reevaluate(records, dependent_id, actor).await? == Some(Status::Blocked) {
            blocked.push(records.load_ticket(dependent_id).await?.key);
        }
    }
    Ok(blocked)
}
