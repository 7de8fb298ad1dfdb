//! Integration tests for the dependency graph: cycles, unblocking cascades,
//! parent readiness, and reopening.

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

fn pm() -> Actor {
    Actor::human("pm")
}

async fn create(wf: &Workflow, new: NewTicket) -> Ticket {
    wf.create_ticket(&pm(), new).await.unwrap()
}

async fn status(wf: &Workflow, key: &TicketKey) -> Status {
    wf.ticket(key).await.unwrap().status
}

/// Claim, submit and accept: the normal way a ticket resolves.
async fn finish(wf: &Workflow, key: &TicketKey) -> ticketq::engine::Cascade {
    wf.claim(key, "w1", Duration::minutes(30)).await.unwrap();
    wf.complete(key, "w1", None, false).await.unwrap();
    wf.accept(key, &pm()).await.unwrap().1
}

// ---------------------------------------------------------------------------
// Cycles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn self_dependency_is_a_cycle() {
    let wf = setup().await;
    let a = create(&wf, NewTicket::new("CORE", "a")).await;

    let err = wf.add_dependency(&a.key, &a.key, &pm()).await.unwrap_err();
    assert!(matches!(err, Error::CircularDependency { .. }));
    assert!(wf.dependencies(&a.key).await.unwrap().is_empty());
}

#[tokio::test]
async fn closing_a_cycle_is_rejected_and_graph_is_unchanged() {
    let wf = setup().await;
    let a = create(&wf, NewTicket::new("CORE", "a")).await;
    let b = create(&wf, NewTicket::new("CORE", "b")).await;
    let c = create(&wf, NewTicket::new("CORE", "c")).await;

    // a -> b -> c
    wf.add_dependency(&a.key, &b.key, &pm()).await.unwrap();
    wf.add_dependency(&b.key, &c.key, &pm()).await.unwrap();

    let err = wf.add_dependency(&c.key, &a.key, &pm()).await.unwrap_err();
    match err {
        Error::CircularDependency { ticket, depends_on } => {
            assert_eq!(ticket, "CORE-3");
            assert_eq!(depends_on, "CORE-1");
        }
        other => panic!("expected CircularDependency, got {other:?}"),
    }

    assert!(wf.dependencies(&c.key).await.unwrap().is_empty());
    assert_eq!(status(&wf, &c.key).await, Status::Ready);
    let logged = wf.history(&c.key).await.unwrap();
    assert!(logged.iter().all(|e| e.action != Action::DependencyAdded));
}

#[tokio::test]
async fn diamond_is_not_a_cycle() {
    let wf = setup().await;
    let top = create(&wf, NewTicket::new("CORE", "top")).await;
    let left = create(&wf, NewTicket::new("CORE", "left")).await;
    let right = create(&wf, NewTicket::new("CORE", "right")).await;
    let bottom = create(&wf, NewTicket::new("CORE", "bottom")).await;

    wf.add_dependency(&top.key, &left.key, &pm()).await.unwrap();
    wf.add_dependency(&top.key, &right.key, &pm()).await.unwrap();
    wf.add_dependency(&left.key, &bottom.key, &pm()).await.unwrap();
    wf.add_dependency(&right.key, &bottom.key, &pm()).await.unwrap();

    assert_eq!(wf.dependents(&bottom.key).await.unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Edge edits re-evaluate status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn adding_an_open_dependency_blocks_and_removing_it_unblocks() {
    let wf = setup().await;
    let a = create(&wf, NewTicket::new("CORE", "a")).await;
    let b = create(&wf, NewTicket::new("CORE", "b")).await;

    let blocked = wf.add_dependency(&a.key, &b.key, &pm()).await.unwrap();
    assert_eq!(blocked.status, Status::Blocked);

    // Adding the same edge again changes nothing.
    let again = wf.add_dependency(&a.key, &b.key, &pm()).await.unwrap();
    assert_eq!(again.status, Status::Blocked);
    assert_eq!(wf.dependencies(&a.key).await.unwrap().len(), 1);

    let ready = wf.remove_dependency(&a.key, &b.key, &pm()).await.unwrap();
    assert_eq!(ready.status, Status::Ready);

    let history = wf.history(&a.key).await.unwrap();
    let edits: Vec<_> = history
        .iter()
        .map(|e| e.action)
        .filter(|a| *a != Action::Created)
        .collect();
    assert_eq!(
        edits,
        vec![
            Action::DependencyAdded,
            Action::Blocked,
            Action::DependencyRemoved,
            Action::Unblocked
        ]
    );
}

#[tokio::test]
async fn adding_a_resolved_dependency_keeps_ready() {
    let wf = setup().await;
    let done = create(&wf, NewTicket::new("CORE", "done")).await;
    finish(&wf, &done.key).await;
    let t = create(&wf, NewTicket::new("CORE", "next")).await;

    let t = wf.add_dependency(&t.key, &done.key, &pm()).await.unwrap();
    assert_eq!(t.status, Status::Ready);
}

// ---------------------------------------------------------------------------
// Completion cascade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn accepting_unblocks_dependents_with_nothing_else_open() {
    let wf = setup().await;
    let base = create(&wf, NewTicket::new("CORE", "base")).await;
    let other = create(&wf, NewTicket::new("CORE", "other")).await;
    let only_base = create(&wf, NewTicket::new("CORE", "needs base").depends_on(base.key.clone())).await;
    let both = create(
        &wf,
        NewTicket::new("CORE", "needs both")
            .depends_on(base.key.clone())
            .depends_on(other.key.clone()),
    )
    .await;
    assert_eq!(only_base.status, Status::Blocked);
    assert_eq!(both.status, Status::Blocked);

    let cascade = finish(&wf, &base.key).await;
    assert_eq!(cascade.unblocked, vec![only_base.key.clone()]);
    assert_eq!(status(&wf, &only_base.key).await, Status::Ready);
    assert_eq!(status(&wf, &both.key).await, Status::Blocked);

    let cascade = finish(&wf, &other.key).await;
    assert_eq!(cascade.unblocked, vec![both.key.clone()]);
    assert_eq!(status(&wf, &both.key).await, Status::Ready);

    let unblocked = wf.history(&both.key).await.unwrap().pop().unwrap();
    assert_eq!(unblocked.action, Action::Unblocked);
    assert_eq!(unblocked.details["resolved_by"], "CORE-2");
}

#[tokio::test]
async fn closing_done_directly_also_cascades() {
    let wf = setup().await;
    let base = create(&wf, NewTicket::new("CORE", "base")).await;
    let dependent = create(&wf, NewTicket::new("CORE", "dep").depends_on(base.key.clone())).await;

    let (_, cascade) = wf
        .close(&base.key, &pm(), Resolution::Done, None)
        .await
        .unwrap();
    assert_eq!(cascade.unblocked, vec![dependent.key.clone()]);
    assert_eq!(status(&wf, &dependent.key).await, Status::Ready);
}

#[tokio::test]
async fn non_success_closure_leaves_dependents_blocked() {
    let wf = setup().await;
    let base = create(&wf, NewTicket::new("CORE", "base")).await;
    let dependent = create(&wf, NewTicket::new("CORE", "dep").depends_on(base.key.clone())).await;

    let (_, cascade) = wf
        .close(&base.key, &pm(), Resolution::WontDo, None)
        .await
        .unwrap();
    assert!(cascade.unblocked.is_empty());
    assert_eq!(status(&wf, &dependent.key).await, Status::Blocked);

    let err = wf.claim(&dependent.key, "w1", Duration::minutes(5)).await.unwrap_err();
    assert!(matches!(err, Error::UnresolvedDependencies { .. }));

    // Editing the graph is the way out.
    let freed = wf.remove_dependency(&dependent.key, &base.key, &pm()).await.unwrap();
    assert_eq!(freed.status, Status::Ready);
}

#[tokio::test]
async fn reopening_a_done_ticket_reblocks_ready_dependents() {
    let wf = setup().await;
    let base = create(&wf, NewTicket::new("CORE", "base")).await;
    let dependent = create(&wf, NewTicket::new("CORE", "dep").depends_on(base.key.clone())).await;
    finish(&wf, &base.key).await;
    assert_eq!(status(&wf, &dependent.key).await, Status::Ready);

    let reopened = wf.reopen(&base.key, &pm()).await.unwrap();
    assert_eq!(reopened.status, Status::Ready);
    assert_eq!(status(&wf, &dependent.key).await, Status::Blocked);
}

#[tokio::test]
async fn reopen_settles_against_the_current_graph() {
    let wf = setup().await;
    let t = create(&wf, NewTicket::new("CORE", "t")).await;
    let later = create(&wf, NewTicket::new("CORE", "later")).await;
    wf.close(&t.key, &pm(), Resolution::Duplicate, None)
        .await
        .unwrap();

    // An edge added while closed decides where the ticket reopens to.
    let closed = wf.add_dependency(&t.key, &later.key, &pm()).await.unwrap();
    assert_eq!(closed.status, Status::Closed);
    let reopened = wf.reopen(&t.key, &pm()).await.unwrap();
    assert_eq!(reopened.status, Status::Blocked);
}

// ---------------------------------------------------------------------------
// Parent readiness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn parent_becomes_ready_when_all_children_close() {
    let wf = setup().await;
    let epic = create(&wf, NewTicket::new("CORE", "epic").ticket_type(TicketType::Epic)).await;
    let c1 = create(&wf, NewTicket::new("CORE", "child 1").parent(epic.key.clone())).await;
    let c2 = create(&wf, NewTicket::new("CORE", "child 2").parent(epic.key.clone())).await;

    // The epic is being coordinated by a worker while children are open.
    wf.claim(&epic.key, "lead", Duration::hours(8)).await.unwrap();

    let cascade = finish(&wf, &c1.key).await;
    assert!(cascade.parent_ready.is_none());
    assert_eq!(status(&wf, &epic.key).await, Status::Working);

    // A non-success closure still counts as closed for the parent.
    wf.close(&c2.key, &pm(), Resolution::Obsolete, None)
        .await
        .unwrap();
    // Only a successful completion triggers the parent check.
    assert_eq!(status(&wf, &epic.key).await, Status::Working);

    let c3 = create(&wf, NewTicket::new("CORE", "child 3").parent(epic.key.clone())).await;
    let cascade = finish(&wf, &c3.key).await;
    assert_eq!(cascade.parent_ready, Some(epic.key.clone()));

    let epic_now = wf.ticket(&epic.key).await.unwrap();
    assert_eq!(epic_now.status, Status::Ready);
    assert!(epic_now.resolution.is_none(), "parent is never closed automatically");
    assert!(wf.active_claim(&epic.key).await.unwrap().is_none());
    let claims = wf.claims(&epic.key).await.unwrap();
    assert_eq!(claims[0].status, ClaimStatus::Released);
}
