//! Claim lease manager.
//!
//! A claim is a time-boxed exclusive lease. Acquiring one moves the ticket to
//! `working`; releasing, completing or expiring it ends the lease and moves
//! the ticket on. Exclusivity is enforced by the store's one-active-claim
//! index, so two workers racing for the same ticket cannot both win even if
//! both pass the status check.
//!
//! Expiry is not triggered by a clock. It runs when someone asks:
//! [`Workflow::expire_one`], [`Workflow::expire_all`], or a
//! [`Sweeper`](super::sweep::Sweeper) on an interval.

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use serde_json::json;
use tracing::{Instrument, debug, error, info, warn};

use super::retry::after_failed_attempt;
use super::state_machine::Transition;
use super::workflow::{Workflow, decide, snapshot, write_transition};
use crate::db::Tx;
use crate::error::{Error, Result};
use crate::model::*;
use crate::telemetry::metrics;
use crate::telemetry::ticket::{start_sweep_span, start_ticket_span};

/// Actor recorded on activity written by lease expiry.
pub const LEASE_SWEEPER: &str = "lease-sweeper";

/// Outcome of expiring one claim.
#[derive(Debug, Clone, Serialize)]
pub struct ExpirationResult {
    pub ticket: Option<TicketKey>,
    pub claim_id: ClaimId,
    pub worker_id: String,
    /// Status the ticket moved (or, on a dry run, would move) to.
    pub new_status: Option<Status>,
    pub retry_count: Option<u32>,
    pub escalated: bool,
    /// Set when this claim could not be expired. Other claims in the same
    /// sweep are unaffected.
    pub error: Option<String>,
}

impl ExpirationResult {
    /// Metric label: `failed`, `escalated` or `requeued`.
    pub fn outcome(&self) -> &'static str {
        if self.error.is_some() {
            "failed"
        } else if self.escalated {
            "escalated"
        } else {
            "requeued"
        }
    }
}

/// Outcome of one sweep over all active claims.
#[derive(Debug, Clone, Serialize)]
pub struct ExpireClaimsResult {
    pub dry_run: bool,
    pub checked_at: DateTime<Utc>,
    pub results: Vec<ExpirationResult>,
}

impl ExpireClaimsResult {
    /// Claims expired (or that would be, on a dry run), escalations included.
    pub fn expired(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_none()).count()
    }

    pub fn escalated(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.error.is_none() && r.escalated)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }
}

/// Count an expiry that was committed, or one that failed. Dry runs are
/// never counted.
fn count_expiry(outcome: &'static str) {
    metrics::claims_expired().add(1, &[KeyValue::new("outcome", outcome)]);
}

fn claim_metric<T>(operation: &'static str, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(Error::AlreadyClaimed { .. }) => "conflict",
        Err(_) => "error",
    };
    metrics::claim_operations().add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", outcome),
        ],
    );
}

impl Workflow {
    // -----------------------------------------------------------------------
    // Acquire / resume / release
    // -----------------------------------------------------------------------

    /// Claim a ticket for `worker_id` for `duration`. The ticket must be
    /// `ready` (or `blocked` with every dependency since resolved) and hold
    /// no active claim.
    pub async fn claim(
        &self,
        key: &TicketKey,
        worker_id: &str,
        duration: Duration,
    ) -> Result<(Ticket, Claim)> {
        validate_lease(worker_id, duration)?;
        let span = start_ticket_span("claim", key);
        let result = async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let acquired = acquire_in(&mut tx, ticket, worker_id, duration, Action::Claimed).await?;
            tx.commit().await?;
            info!(ticket = %key, worker = worker_id, expires_at = %acquired.1.expires_at, "claimed");
            Ok(acquired)
        }
        .instrument(span)
        .await;
        claim_metric("acquire", &result);
        result
    }

    /// Pick a ticket back up. The same worker renews its lease; a free ticket
    /// is claimed afresh; a ticket held by someone else is refused.
    pub async fn resume(
        &self,
        key: &TicketKey,
        worker_id: &str,
        duration: Duration,
    ) -> Result<(Ticket, Claim)> {
        validate_lease(worker_id, duration)?;
        let span = start_ticket_span("resume", key);
        let result = async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let resumed = match tx.active_claim(ticket.id).await? {
                Some(claim) if claim.worker_id == worker_id => {
                    let renewed = tx.extend_claim(&claim, lease_expiry(Utc::now(), duration)?).await?;
                    tx.append_activity(
                        &NewActivity::new(
                            ticket.id,
                            Action::Resumed,
                            &Actor::agent(worker_id),
                            format!("{key} lease renewed"),
                        )
                        .details(json!({
                            "claim_id": renewed.id.0,
                            "expires_at": renewed.expires_at,
                        })),
                    )
                    .await?;
                    (ticket, renewed)
                }
                Some(claim) => {
                    return Err(Error::AlreadyClaimed {
                        ticket: key.to_string(),
                        holder: Some(claim.worker_id),
                    });
                }
                None => acquire_in(&mut tx, ticket, worker_id, duration, Action::Resumed).await?,
            };
            tx.commit().await?;
            Ok(resumed)
        }
        .instrument(span)
        .await;
        claim_metric("renew", &result);
        result
    }

    /// Give up the lease on `key`. Counts as a failed attempt but never
    /// escalates on its own.
    pub async fn release(&self, key: &TicketKey, worker_id: &str, reason: &str) -> Result<Ticket> {
        let span = start_ticket_span("release", key);
        let result = async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let claim = tx.active_claim(ticket.id).await?.ok_or_else(|| Error::InvalidState {
                subject: key.to_string(),
                from: format!("{} without an active claim", ticket.status),
                action: "release",
            })?;
            let released = release_in(&mut tx, ticket, claim, worker_id, reason).await?;
            tx.commit().await?;
            Ok(released)
        }
        .instrument(span)
        .await;
        claim_metric("release", &result);
        result
    }

    /// Release by claim id. A claim that already ended is refused rather
    /// than released twice.
    pub async fn release_claim(&self, claim_id: ClaimId, worker_id: &str, reason: &str) -> Result<Ticket> {
        let mut tx = self.db.begin().await?;
        let claim = tx.claim(claim_id).await?;
        if claim.status.is_terminal() {
            return Err(Error::InvalidState {
                subject: format!("claim {claim_id}"),
                from: claim.status.to_string(),
                action: "release",
            });
        }
        let ticket = tx.ticket(claim.ticket_id).await?;
        let span = start_ticket_span("release", &ticket.key);
        let result = release_in(&mut tx, ticket, claim, worker_id, reason)
            .instrument(span)
            .await;
        claim_metric("release", &result);
        let released = result?;
        tx.commit().await?;
        Ok(released)
    }

    // -----------------------------------------------------------------------
    // Expiry
    // -----------------------------------------------------------------------

    /// Expire the lease on one ticket if it has run out.
    pub async fn expire_one(&self, key: &TicketKey, dry_run: bool) -> Result<ExpirationResult> {
        self.expire_one_as_of(key, Utc::now(), dry_run).await
    }

    /// [`expire_one`](Self::expire_one) judged against `now` instead of the
    /// wall clock.
    pub async fn expire_one_as_of(
        &self,
        key: &TicketKey,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<ExpirationResult> {
        let span = start_ticket_span("expire", key);
        async {
            let mut tx = self.db.begin().await?;
            let ticket = tx.ticket_by_key(key).await?;
            let claim = tx
                .active_claim(ticket.id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("active claim on {key}")))?;
            if !claim.is_expired_at(now) {
                return Err(Error::InvalidState {
                    subject: format!("claim {} on {key}", claim.id),
                    from: format!("active until {}", claim.expires_at),
                    action: "expire",
                });
            }
            let result = expire_in(&mut tx, ticket, claim, now, dry_run).await?;
            if !dry_run {
                tx.commit().await?;
                count_expiry(result.outcome());
            }
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Expire every lease that has run out.
    pub async fn expire_all(&self, dry_run: bool) -> Result<ExpireClaimsResult> {
        self.expire_all_as_of(Utc::now(), dry_run).await
    }

    /// [`expire_all`](Self::expire_all) judged against `now`.
    pub async fn expire_all_as_of(&self, now: DateTime<Utc>, dry_run: bool) -> Result<ExpireClaimsResult> {
        self.expire_due(now, dry_run, || false).await
    }

    /// Expire due claims one transaction at a time, checking `cancelled`
    /// before each. A claim that fails is reported and skipped.
    pub(crate) async fn expire_due(
        &self,
        now: DateTime<Utc>,
        dry_run: bool,
        cancelled: impl Fn() -> bool,
    ) -> Result<ExpireClaimsResult> {
        let span = start_sweep_span(dry_run);
        let started = Instant::now();
        let due: Vec<Claim> = self
            .db
            .active_claims()
            .await?
            .into_iter()
            .filter(|c| c.is_expired_at(now))
            .collect();

        let mut results = Vec::with_capacity(due.len());
        for claim in due {
            if cancelled() {
                debug!(remaining = results.len(), "sweep cancelled");
                break;
            }
            let result = match self.expire_claim(&claim, now, dry_run).await {
                Ok(result) => result,
                Err(e) => {
                    error!(claim = %claim.id, worker = %claim.worker_id, error = %e, "failed to expire claim");
                    if !dry_run {
                        count_expiry("failed");
                    }
                    ExpirationResult {
                        ticket: self.db.get_ticket_by_id(claim.ticket_id).await.ok().map(|t| t.key),
                        claim_id: claim.id,
                        worker_id: claim.worker_id.clone(),
                        new_status: None,
                        retry_count: None,
                        escalated: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }

        let sweep = ExpireClaimsResult {
            dry_run,
            checked_at: now,
            results,
        };
        span.record("sweep.expired", sweep.expired());
        metrics::sweep_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("dry_run", dry_run)],
        );
        if sweep.expired() > 0 || sweep.failed() > 0 {
            span.in_scope(|| {
                info!(
                    expired = sweep.expired(),
                    escalated = sweep.escalated(),
                    failed = sweep.failed(),
                    dry_run,
                    "lease sweep finished"
                )
            });
        }
        Ok(sweep)
    }

    /// Expire one claim in its own transaction. The claim is re-read first;
    /// one that was completed or released since the scan is an error for
    /// this claim only.
    async fn expire_claim(&self, claim: &Claim, now: DateTime<Utc>, dry_run: bool) -> Result<ExpirationResult> {
        let mut tx = self.db.begin().await?;
        let current = tx.claim(claim.id).await?;
        if current.status != ClaimStatus::Active {
            return Err(Error::InvalidState {
                subject: format!("claim {}", claim.id),
                from: current.status.to_string(),
                action: "expire",
            });
        }
        let ticket = tx.ticket(current.ticket_id).await?;
        let span = start_ticket_span("expire", &ticket.key);
        let result = expire_in(&mut tx, ticket, current, now, dry_run)
            .instrument(span)
            .await?;
        if !dry_run {
            tx.commit().await?;
            count_expiry(result.outcome());
        }
        Ok(result)
    }
}

fn validate_lease(worker_id: &str, duration: Duration) -> Result<()> {
    if worker_id.trim().is_empty() {
        return Err(Error::InvalidArgument("worker id must not be empty".into()));
    }
    if duration <= Duration::zero() {
        return Err(Error::InvalidArgument("claim duration must be positive".into()));
    }
    if duration > Duration::seconds(MAX_CLAIM_DURATION_SECS as i64) {
        return Err(Error::InvalidArgument(format!(
            "claim duration must not exceed {MAX_CLAIM_DURATION_SECS}s"
        )));
    }
    Ok(())
}

/// When a lease taken at `now` for `duration` runs out.
fn lease_expiry(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(duration).ok_or_else(|| {
        Error::InvalidArgument(format!("claim duration {duration} is out of range"))
    })
}

/// Take a new lease on `ticket` inside `tx`.
async fn acquire_in(
    tx: &mut Tx,
    ticket: Ticket,
    worker_id: &str,
    duration: Duration,
    action: Action,
) -> Result<(Ticket, Claim)> {
    let snap = snapshot(tx, &ticket).await?;
    let to = match decide(&ticket, Transition::Claim, &snap) {
        // Name the holder when there is one.
        Err(Error::AlreadyClaimed { ticket: t, .. }) => {
            let holder = tx.active_claim(ticket.id).await?.map(|c| c.worker_id);
            return Err(Error::AlreadyClaimed { ticket: t, holder });
        }
        other => other?,
    };

    let now = Utc::now();
    let claim = Claim {
        id: ClaimId::new(),
        ticket_id: ticket.id,
        worker_id: worker_id.to_string(),
        claimed_at: now,
        expires_at: lease_expiry(now, duration)?,
        released_at: None,
        status: ClaimStatus::Active,
    };
    tx.insert_claim(&claim, &ticket.key).await?;

    let working = Ticket {
        status: to,
        updated_at: now,
        ..ticket.clone()
    };
    write_transition(
        tx,
        &ticket,
        &working,
        NewActivity::new(
            ticket.id,
            action,
            &Actor::agent(worker_id),
            format!("{} claimed by {worker_id}", ticket.key),
        )
        .details(json!({
            "claim_id": claim.id.0,
            "expires_at": claim.expires_at,
        })),
    )
    .await?;
    Ok((working, claim))
}

async fn release_in(
    tx: &mut Tx,
    ticket: Ticket,
    claim: Claim,
    worker_id: &str,
    reason: &str,
) -> Result<Ticket> {
    if claim.worker_id != worker_id {
        return Err(Error::AlreadyClaimed {
            ticket: ticket.key.to_string(),
            holder: Some(claim.worker_id),
        });
    }
    let snap = snapshot(tx, &ticket).await?;
    let to = decide(&ticket, Transition::Release, &snap)?;
    let retry_count = after_failed_attempt(ticket.retry_count, ticket.max_retries).retry_count;

    let now = Utc::now();
    tx.finish_claim(&claim, ClaimStatus::Released, now).await?;
    let released = Ticket {
        status: to,
        retry_count,
        updated_at: now,
        ..ticket.clone()
    };
    write_transition(
        tx,
        &ticket,
        &released,
        NewActivity::new(
            ticket.id,
            Action::Released,
            &Actor::agent(worker_id),
            format!("{} released: {reason}", ticket.key),
        )
        .details(json!({ "claim_id": claim.id.0, "reason": reason })),
    )
    .await?;
    info!(ticket = %ticket.key, worker = worker_id, %to, "claim released");
    Ok(released)
}

/// Expire `claim` on `ticket`: count the failed attempt, then either return
/// the ticket to the pool or escalate it to `human`. Writes nothing on a dry
/// run.
async fn expire_in(
    tx: &mut Tx,
    ticket: Ticket,
    claim: Claim,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<ExpirationResult> {
    let decision = after_failed_attempt(ticket.retry_count, ticket.max_retries);
    let snap = snapshot(tx, &ticket).await?;
    let to = decide(
        &ticket,
        Transition::Expire {
            escalate: decision.escalate,
        },
        &snap,
    )?;

    let result = ExpirationResult {
        ticket: Some(ticket.key.clone()),
        claim_id: claim.id,
        worker_id: claim.worker_id.clone(),
        new_status: Some(to),
        retry_count: Some(decision.retry_count),
        escalated: decision.escalate,
        error: None,
    };
    if dry_run {
        debug!(ticket = %ticket.key, claim = %claim.id, %to, "would expire claim");
        return Ok(result);
    }

    let actor = Actor::system(LEASE_SWEEPER);
    tx.finish_claim(&claim, ClaimStatus::Expired, now).await?;
    let expired = Ticket {
        status: to,
        retry_count: decision.retry_count,
        flag_reason: decision.escalate.then_some(FlagReason::MaxRetriesReached),
        flag_message: decision.escalate.then(|| {
            format!(
                "lease expired {} times (limit {})",
                decision.retry_count, ticket.max_retries
            )
        }),
        updated_at: now,
        ..ticket.clone()
    };
    write_transition(
        tx,
        &ticket,
        &expired,
        NewActivity::new(
            ticket.id,
            Action::Expired,
            &actor,
            format!("{} lease of {} expired", ticket.key, claim.worker_id),
        )
        .details(json!({
            "claim_id": claim.id.0,
            "worker_id": claim.worker_id,
            "expired_at": claim.expires_at,
            "retry_count": decision.retry_count,
        })),
    )
    .await?;

    if decision.escalate {
        tx.append_activity(&NewActivity::new(
            ticket.id,
            Action::Escalated,
            &actor,
            format!(
                "{} escalated after {} of {} attempts",
                ticket.key, decision.retry_count, ticket.max_retries
            ),
        ))
        .await?;
        warn!(ticket = %ticket.key, worker = %claim.worker_id, retry_count = decision.retry_count, "lease expired, escalated to human");
    } else {
        info!(ticket = %ticket.key, worker = %claim.worker_id, retry_count = decision.retry_count, %to, "lease expired");
    }
    Ok(result)
}
