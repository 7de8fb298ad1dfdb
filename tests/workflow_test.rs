//! Integration tests for the ticket workflow: creation, review, escalation,
//! closing, and the activity log.

use chrono::Duration;
use ticketq::db::Db;
use ticketq::engine::Workflow;
use ticketq::error::Error;
use ticketq::model::*;

async fn setup() -> Workflow {
    let db = Db::in_memory().await.expect("failed to create in-memory db");
    let wf = Workflow::new(db);
    wf.create_project("CORE", "Core").await.unwrap();
    wf
}

fn reviewer() -> Actor {
    Actor::human("reviewer")
}

fn lease() -> Duration {
    Duration::minutes(30)
}

async fn create(wf: &Workflow, new: NewTicket) -> Ticket {
    wf.create_ticket(&reviewer(), new).await.unwrap()
}

/// Create, claim, and submit a ticket, leaving it in review.
async fn in_review(wf: &Workflow, title: &str) -> Ticket {
    let t = create(wf, NewTicket::new("CORE", title)).await;
    wf.claim(&t.key, "w1", lease()).await.unwrap();
    let (t, _) = wf.complete(&t.key, "w1", Some("did it"), false).await.unwrap();
    assert_eq!(t.status, Status::Review);
    t
}

fn actions(history: &[ActivityEntry]) -> Vec<Action> {
    history.iter().map(|e| e.action).collect()
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_assigns_sequential_keys_per_project() {
    let wf = setup().await;
    wf.create_project("OPS", "Operations").await.unwrap();

    let a = create(&wf, NewTicket::new("CORE", "first")).await;
    let b = create(&wf, NewTicket::new("core", "second")).await;
    let c = create(&wf, NewTicket::new("OPS", "other project")).await;

    assert_eq!(a.key.to_string(), "CORE-1");
    assert_eq!(b.key.to_string(), "CORE-2");
    assert_eq!(c.key.to_string(), "OPS-1");
    assert_eq!(a.status, Status::Ready);
    assert_eq!(a.retry_count, 0);
    assert_eq!(a.max_retries, 3);
    assert!(a.resolution.is_none());
}

#[tokio::test]
async fn create_rejects_bad_input() {
    let wf = setup().await;

    let err = wf
        .create_ticket(&reviewer(), NewTicket::new("CORE", "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = wf
        .create_ticket(&reviewer(), NewTicket::new("NOPE", "no such project"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = wf.create_project("CORE", "again").await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    let err = wf.create_project("1BAD", "digit first").await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn create_with_open_dependency_starts_blocked() {
    let wf = setup().await;
    let dep = create(&wf, NewTicket::new("CORE", "foundation")).await;
    let t = create(&wf, NewTicket::new("CORE", "roof").depends_on(dep.key.clone())).await;

    assert_eq!(t.status, Status::Blocked);
    let deps = wf.dependencies(&t.key).await.unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].key, dep.key);
}

#[tokio::test]
async fn create_with_resolved_dependency_starts_ready() {
    let wf = setup().await;
    let dep = create(&wf, NewTicket::new("CORE", "foundation")).await;
    wf.close(&dep.key, &reviewer(), Resolution::Done, None)
        .await
        .unwrap();

    let t = create(&wf, NewTicket::new("CORE", "roof").depends_on(dep.key.clone())).await;
    assert_eq!(t.status, Status::Ready);
}

#[tokio::test]
async fn draft_is_published_into_ready_or_blocked() {
    let wf = setup().await;
    let draft = create(&wf, NewTicket::new("CORE", "idea").draft()).await;
    assert_eq!(draft.status, Status::Draft);

    // Drafts are not claimable.
    let err = wf.claim(&draft.key, "w1", lease()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    let published = wf.publish(&draft.key, &reviewer()).await.unwrap();
    assert_eq!(published.status, Status::Ready);

    let err = wf.publish(&draft.key, &reviewer()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    let dep = create(&wf, NewTicket::new("CORE", "prereq")).await;
    let blocked_draft = create(
        &wf,
        NewTicket::new("CORE", "later").depends_on(dep.key.clone()).draft(),
    )
    .await;
    assert_eq!(blocked_draft.status, Status::Draft);
    let published = wf.publish(&blocked_draft.key, &reviewer()).await.unwrap();
    assert_eq!(published.status, Status::Blocked);
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

#[tokio::test]
async fn complete_then_accept_closes_as_done() {
    let wf = setup().await;
    let t = in_review(&wf, "ship it").await;

    // The lease ended on submission.
    assert!(wf.active_claim(&t.key).await.unwrap().is_none());
    let claims = wf.claims(&t.key).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].status, ClaimStatus::Completed);
    assert!(claims[0].released_at.is_some());

    let (closed, _) = wf.accept(&t.key, &reviewer()).await.unwrap();
    assert_eq!(closed.status, Status::Closed);
    assert_eq!(closed.resolution, Some(Resolution::Done));
    assert!(closed.completed_at.is_some());
    assert!(closed.is_resolved());

    let history = wf.history(&t.key).await.unwrap();
    assert_eq!(
        actions(&history),
        vec![Action::Created, Action::Claimed, Action::Completed, Action::Accepted]
    );
}

#[tokio::test]
async fn complete_with_auto_accept_closes_in_one_step() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "quick")).await;
    wf.claim(&t.key, "w1", lease()).await.unwrap();

    let (closed, _) = wf.complete(&t.key, "w1", None, true).await.unwrap();
    assert_eq!(closed.status, Status::Closed);
    assert_eq!(closed.resolution, Some(Resolution::Done));
}

#[tokio::test]
async fn complete_requires_the_claiming_worker() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "mine")).await;

    let err = wf.complete(&t.key, "w1", None, false).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    wf.claim(&t.key, "w1", lease()).await.unwrap();
    let err = wf.complete(&t.key, "w2", None, false).await.unwrap_err();
    match err {
        Error::AlreadyClaimed { holder, .. } => assert_eq!(holder.as_deref(), Some("w1")),
        other => panic!("expected AlreadyClaimed, got {other:?}"),
    }
    assert_eq!(wf.ticket(&t.key).await.unwrap().status, Status::Working);
}

#[tokio::test]
async fn reject_returns_to_ready_and_counts_a_retry() {
    let wf = setup().await;
    let t = in_review(&wf, "needs polish").await;

    let rejected = wf.reject(&t.key, &reviewer(), "tests missing").await.unwrap();
    assert_eq!(rejected.status, Status::Ready);
    assert_eq!(rejected.retry_count, 1);
    assert!(rejected.flag_reason.is_none());

    let err = wf.reject(&t.key, &reviewer(), "again").await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    let err = wf.reject(&t.key, &reviewer(), " ").await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn reject_at_retry_bound_escalates_to_human() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "hard").max_retries(1)).await;
    wf.claim(&t.key, "w1", lease()).await.unwrap();
    wf.complete(&t.key, "w1", None, false).await.unwrap();

    let escalated = wf.reject(&t.key, &reviewer(), "still wrong").await.unwrap();
    assert_eq!(escalated.status, Status::Human);
    assert_eq!(escalated.retry_count, 1);
    assert_eq!(escalated.flag_reason, Some(FlagReason::MaxRetriesReached));
    assert_eq!(escalated.flag_message.as_deref(), Some("still wrong"));

    let history = wf.history(&t.key).await.unwrap();
    assert!(actions(&history).ends_with(&[Action::Rejected, Action::Escalated]));
}

#[tokio::test]
async fn accept_is_only_legal_from_review() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "not yet")).await;
    let err = wf.accept(&t.key, &reviewer()).await.unwrap_err();
    match err {
        Error::InvalidState { from, action, .. } => {
            assert_eq!(from, "ready");
            assert_eq!(action, "accept");
        }
        other => panic!("expected InvalidState, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Human escalation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn flag_releases_the_lease_and_respond_resets_retries() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "unclear")).await;
    wf.claim(&t.key, "w1", lease()).await.unwrap();
    wf.release(&t.key, "w1", "stuck").await.unwrap();
    wf.claim(&t.key, "w1", lease()).await.unwrap();

    let flagged = wf
        .flag(&t.key, &Actor::agent("w1"), FlagReason::NeedsInput, "which API?")
        .await
        .unwrap();
    assert_eq!(flagged.status, Status::Human);
    assert_eq!(flagged.flag_reason, Some(FlagReason::NeedsInput));
    assert_eq!(flagged.retry_count, 1);
    assert!(wf.active_claim(&t.key).await.unwrap().is_none());

    let answered = wf.respond(&t.key, &reviewer(), "use v2").await.unwrap();
    assert_eq!(answered.status, Status::Ready);
    assert_eq!(answered.retry_count, 0);
    assert!(answered.flag_reason.is_none());
    assert!(answered.flag_message.is_none());

    let last = wf.history(&t.key).await.unwrap().pop().unwrap();
    assert_eq!(last.action, Action::Responded);
    assert_eq!(last.details["response"], "use v2");
}

#[tokio::test]
async fn respond_settles_into_blocked_while_a_dependency_is_open() {
    let wf = setup().await;
    let base = create(&wf, NewTicket::new("CORE", "base")).await;
    let t = create(&wf, NewTicket::new("CORE", "waits on base")).await;
    wf.claim(&t.key, "w1", lease()).await.unwrap();
    wf.release(&t.key, "w1", "stuck").await.unwrap();
    wf.claim(&t.key, "w1", lease()).await.unwrap();

    // A dependency added mid-work leaves the ticket working.
    let working = wf.add_dependency(&t.key, &base.key, &reviewer()).await.unwrap();
    assert_eq!(working.status, Status::Working);
    wf.flag(&t.key, &Actor::agent("w1"), FlagReason::Blocked, "needs base")
        .await
        .unwrap();

    let answered = wf.respond(&t.key, &reviewer(), "wait for base").await.unwrap();
    assert_eq!(answered.status, Status::Blocked);
    assert_eq!(answered.retry_count, 0);
    assert!(answered.flag_reason.is_none());

    // Finishing the dependency releases it like any other blocked ticket.
    wf.close(&base.key, &reviewer(), Resolution::Done, None)
        .await
        .unwrap();
    assert_eq!(wf.ticket(&t.key).await.unwrap().status, Status::Ready);
}

#[tokio::test]
async fn flag_is_rejected_outside_working_and_review() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "idle")).await;
    let err = wf
        .flag(&t.key, &reviewer(), FlagReason::Decision, "?")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    let err = wf.respond(&t.key, &reviewer(), "nothing asked").await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

// ---------------------------------------------------------------------------
// Close / reopen
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_releases_an_active_lease() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "obsolete work")).await;
    wf.claim(&t.key, "w1", lease()).await.unwrap();

    let (closed, cascade) = wf
        .close(&t.key, &reviewer(), Resolution::Obsolete, Some("superseded"))
        .await
        .unwrap();
    assert_eq!(closed.status, Status::Closed);
    assert_eq!(closed.resolution, Some(Resolution::Obsolete));
    assert!(!closed.is_resolved());
    assert!(cascade.unblocked.is_empty());

    let claims = wf.claims(&t.key).await.unwrap();
    assert_eq!(claims[0].status, ClaimStatus::Released);

    let err = wf
        .close(&t.key, &reviewer(), Resolution::Done, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test]
async fn reopen_clears_resolution() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "premature")).await;
    wf.close(&t.key, &reviewer(), Resolution::WontDo, None)
        .await
        .unwrap();

    let reopened = wf.reopen(&t.key, &reviewer()).await.unwrap();
    assert_eq!(reopened.status, Status::Ready);
    assert!(reopened.resolution.is_none());
    assert!(reopened.completed_at.is_none());

    let err = wf.reopen(&t.key, &reviewer()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

// ---------------------------------------------------------------------------
// Task checklist
// ---------------------------------------------------------------------------

#[tokio::test]
async fn incomplete_tasks_block_submission() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "with checklist")).await;
    wf.add_task(&t.key, &reviewer(), "write code").await.unwrap();
    let second = wf.add_task(&t.key, &reviewer(), "write tests").await.unwrap();
    assert_eq!(second.position, 2);

    wf.claim(&t.key, "w1", lease()).await.unwrap();
    wf.complete_task(&t.key, &Actor::agent("w1"), 1).await.unwrap();

    let err = wf.complete(&t.key, "w1", None, false).await.unwrap_err();
    match err {
        Error::IncompleteTasks { remaining, .. } => assert_eq!(remaining, 1),
        other => panic!("expected IncompleteTasks, got {other:?}"),
    }
    // Nothing changed: still working under the same lease.
    assert_eq!(wf.ticket(&t.key).await.unwrap().status, Status::Working);
    assert!(wf.active_claim(&t.key).await.unwrap().is_some());

    wf.complete_task(&t.key, &Actor::agent("w1"), 2).await.unwrap();
    let (t, _) = wf.complete(&t.key, "w1", None, false).await.unwrap();
    assert_eq!(t.status, Status::Review);

    let tasks = wf.tasks(&t.key).await.unwrap();
    assert!(tasks.iter().all(|task| task.done && task.completed_at.is_some()));
}

#[tokio::test]
async fn incomplete_tasks_block_closing_as_done_only() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "half done")).await;
    wf.add_task(&t.key, &reviewer(), "step").await.unwrap();

    let err = wf
        .close(&t.key, &reviewer(), Resolution::Done, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IncompleteTasks { .. }));

    let (closed, _) = wf
        .close(&t.key, &reviewer(), Resolution::WontDo, None)
        .await
        .unwrap();
    assert_eq!(closed.resolution, Some(Resolution::WontDo));

    let err = wf.add_task(&t.key, &reviewer(), "too late").await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test]
async fn completing_a_missing_task_is_not_found() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "empty list")).await;
    let err = wf.complete_task(&t.key, &reviewer(), 7).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ready_orders_by_priority_then_age() {
    let wf = setup().await;
    let low = create(&wf, NewTicket::new("CORE", "low").priority(Priority::Low)).await;
    let high_old = create(&wf, NewTicket::new("CORE", "high old").priority(Priority::High)).await;
    let critical = create(&wf, NewTicket::new("CORE", "fire").priority(Priority::Critical)).await;
    let high_new = create(&wf, NewTicket::new("CORE", "high new").priority(Priority::High)).await;
    let claimed = create(&wf, NewTicket::new("CORE", "taken").priority(Priority::Critical)).await;
    wf.claim(&claimed.key, "w1", lease()).await.unwrap();

    let ready = wf.ready(Some("core"), 10).await.unwrap();
    let keys: Vec<_> = ready.iter().map(|t| t.key.clone()).collect();
    assert_eq!(keys, vec![critical.key, high_old.key, high_new.key, low.key]);

    assert_eq!(wf.ready(None, 2).await.unwrap().len(), 2);
}

#[tokio::test]
async fn list_filters_by_status() {
    let wf = setup().await;
    let a = create(&wf, NewTicket::new("CORE", "a")).await;
    create(&wf, NewTicket::new("CORE", "b")).await;
    wf.claim(&a.key, "w1", lease()).await.unwrap();

    let working = wf
        .tickets(&TicketFilter {
            status: Some(Status::Working),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(working.len(), 1);
    assert_eq!(working[0].key, a.key);

    let all = wf.tickets(&TicketFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn unknown_ticket_is_not_found() {
    let wf = setup().await;
    let key = TicketKey::new("CORE", 99);
    assert!(matches!(wf.ticket(&key).await, Err(Error::NotFound(_))));
    assert!(matches!(
        wf.claim(&key, "w1", lease()).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn every_transition_is_logged_with_its_actor() {
    let wf = setup().await;
    let t = in_review(&wf, "audited").await;
    wf.reject(&t.key, &reviewer(), "no").await.unwrap();

    let history = wf.history(&t.key).await.unwrap();
    assert_eq!(
        actions(&history),
        vec![Action::Created, Action::Claimed, Action::Completed, Action::Rejected]
    );
    assert_eq!(history[1].actor, Actor::agent("w1"));
    assert_eq!(history[3].actor, reviewer());
    assert!(history.windows(2).all(|w| w[0].id < w[1].id));
}
