//! Ticket status state machine.
//!
//! Pure decision logic: given a ticket's status, a requested [`Transition`]
//! and the facts the guards need ([`Guards`]), decide the next status or why
//! the transition is refused. Nothing here touches storage; callers evaluate
//! the transition before any write and abort the whole operation on
//! rejection.
//!
//! Every transition that would land in `ready` lands in `blocked` instead
//! when the ticket has unresolved dependencies, so `blocked` always means
//! "waiting on the graph".

use crate::error::Error;
use crate::model::{Resolution, Status, TicketKey};

/// A requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// draft → ready | blocked
    Publish,
    /// ready → blocked, after an unresolved dependency was added.
    Block,
    /// blocked → ready, after the last unresolved dependency resolved.
    Unblock,
    /// ready | blocked → working
    Claim,
    /// working → ready
    Release,
    /// working → ready, or human when retries are exhausted.
    Expire { escalate: bool },
    /// working → review
    Submit,
    /// working | review → human
    Escalate,
    /// review → closed(done)
    Accept,
    /// review → ready, or human when retries are exhausted.
    Reject { escalate: bool },
    /// human → ready
    Respond,
    /// any non-terminal → closed(resolution)
    Close(Resolution),
    /// closed → ready | blocked
    Reopen,
    /// blocked | working → ready, once every child of an epic is closed.
    ChildrenClosed,
}

impl Transition {
    /// Verb used in errors, spans and metrics.
    pub fn action(self) -> &'static str {
        match self {
            Transition::Publish => "publish",
            Transition::Block => "block",
            Transition::Unblock => "unblock",
            Transition::Claim => "claim",
            Transition::Release => "release",
            Transition::Expire { .. } => "expire",
            Transition::Submit => "complete",
            Transition::Escalate => "flag",
            Transition::Accept => "accept",
            Transition::Reject { .. } => "reject",
            Transition::Respond => "respond",
            Transition::Close(_) => "close",
            Transition::Reopen => "reopen",
            Transition::ChildrenClosed => "settle parent",
        }
    }
}

/// Facts the guards depend on, gathered by the caller beforehand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guards {
    pub unresolved_dependencies: bool,
    pub incomplete_tasks: usize,
    pub active_claim: bool,
}

/// Why a transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Illegal {
        from: Status,
        action: &'static str,
    },
    AlreadyClaimed,
    UnresolvedDependencies,
    IncompleteTasks(usize),
}

impl Rejection {
    /// Attach the ticket key. `blocking` lists unresolved dependency keys
    /// for the `UnresolvedDependencies` case.
    pub fn into_error(self, key: &TicketKey, blocking: Vec<String>) -> Error {
        match self {
            Rejection::Illegal { from, action } => Error::InvalidState {
                subject: key.to_string(),
                from: from.to_string(),
                action,
            },
            Rejection::AlreadyClaimed => Error::AlreadyClaimed {
                ticket: key.to_string(),
                holder: None,
            },
            Rejection::UnresolvedDependencies => Error::UnresolvedDependencies {
                ticket: key.to_string(),
                blocking,
            },
            Rejection::IncompleteTasks(remaining) => Error::IncompleteTasks {
                ticket: key.to_string(),
                remaining,
            },
        }
    }
}

/// Status a ticket settles into when it becomes available for work again.
pub fn settle(guards: &Guards) -> Status {
    if guards.unresolved_dependencies {
        Status::Blocked
    } else {
        Status::Ready
    }
}

/// Decide the next status for `transition` from `from`.
pub fn next_status(from: Status, transition: Transition, guards: &Guards) -> Result<Status, Rejection> {
    use Status::*;

    let illegal = Rejection::Illegal {
        from,
        action: transition.action(),
    };

    match (from, transition) {
        (Draft, Transition::Publish) => Ok(settle(guards)),

        (Ready, Transition::Block) if guards.unresolved_dependencies => Ok(Blocked),
        (Blocked, Transition::Unblock) => {
            if guards.unresolved_dependencies {
                Err(Rejection::UnresolvedDependencies)
            } else {
                Ok(Ready)
            }
        }

        (Working, Transition::Claim) => Err(Rejection::AlreadyClaimed),
        (Ready | Blocked, Transition::Claim) => {
            if guards.active_claim {
                Err(Rejection::AlreadyClaimed)
            } else if guards.unresolved_dependencies {
                Err(Rejection::UnresolvedDependencies)
            } else {
                Ok(Working)
            }
        }

        (Working, Transition::Release) => Ok(settle(guards)),
        (Working, Transition::Expire { escalate: true }) => Ok(Human),
        (Working, Transition::Expire { escalate: false }) => Ok(settle(guards)),

        (Working, Transition::Submit) => {
            if guards.incomplete_tasks > 0 {
                Err(Rejection::IncompleteTasks(guards.incomplete_tasks))
            } else {
                Ok(Review)
            }
        }

        (Working | Review, Transition::Escalate) => Ok(Human),

        (Review, Transition::Accept) => {
            if guards.incomplete_tasks > 0 {
                Err(Rejection::IncompleteTasks(guards.incomplete_tasks))
            } else {
                Ok(Closed)
            }
        }
        (Review, Transition::Reject { escalate: true }) => Ok(Human),
        (Review, Transition::Reject { escalate: false }) => Ok(settle(guards)),

        (Human, Transition::Respond) => Ok(settle(guards)),

        (Closed, Transition::Close(_)) => Err(illegal),
        (_, Transition::Close(resolution)) => {
            if resolution.is_success() && guards.incomplete_tasks > 0 {
                Err(Rejection::IncompleteTasks(guards.incomplete_tasks))
            } else {
                Ok(Closed)
            }
        }

        (Closed, Transition::Reopen) => Ok(settle(guards)),

        (Blocked | Working, Transition::ChildrenClosed) => {
            if guards.unresolved_dependencies {
                Err(Rejection::UnresolvedDependencies)
            } else {
                Ok(Ready)
            }
        }

        _ => Err(illegal),
    }
}

/// Statuses that hold an active claim.
pub fn holds_claim(status: Status) -> bool {
    status == Status::Working
}

#[cfg(test)]
mod tests {
    use super::*;
    use Status::*;

    const CLEAR: Guards = Guards {
        unresolved_dependencies: false,
        incomplete_tasks: 0,
        active_claim: false,
    };

    const DEPS: Guards = Guards {
        unresolved_dependencies: true,
        incomplete_tasks: 0,
        active_claim: false,
    };

    const ALL: [Status; 7] = [Draft, Ready, Blocked, Working, Review, Human, Closed];

    #[test]
    fn claim_requires_free_and_resolved_ticket() {
        assert_eq!(next_status(Ready, Transition::Claim, &CLEAR), Ok(Working));
        assert_eq!(next_status(Blocked, Transition::Claim, &CLEAR), Ok(Working));
        assert_eq!(
            next_status(Ready, Transition::Claim, &DEPS),
            Err(Rejection::UnresolvedDependencies)
        );
        assert_eq!(
            next_status(Working, Transition::Claim, &CLEAR),
            Err(Rejection::AlreadyClaimed)
        );
        let claimed = Guards {
            active_claim: true,
            ..CLEAR
        };
        assert_eq!(
            next_status(Ready, Transition::Claim, &claimed),
            Err(Rejection::AlreadyClaimed)
        );
        for from in [Draft, Review, Human, Closed] {
            assert!(matches!(
                next_status(from, Transition::Claim, &CLEAR),
                Err(Rejection::Illegal { .. })
            ));
        }
    }

    #[test]
    fn returns_to_work_settle_on_dependency_state() {
        for t in [
            Transition::Release,
            Transition::Expire { escalate: false },
        ] {
            assert_eq!(next_status(Working, t, &CLEAR), Ok(Ready));
            assert_eq!(next_status(Working, t, &DEPS), Ok(Blocked));
        }
        assert_eq!(next_status(Human, Transition::Respond, &CLEAR), Ok(Ready));
        assert_eq!(next_status(Closed, Transition::Reopen, &DEPS), Ok(Blocked));
        assert_eq!(next_status(Closed, Transition::Reopen, &CLEAR), Ok(Ready));
        assert_eq!(next_status(Draft, Transition::Publish, &DEPS), Ok(Blocked));
    }

    #[test]
    fn exhausted_retries_escalate_to_human() {
        assert_eq!(
            next_status(Working, Transition::Expire { escalate: true }, &CLEAR),
            Ok(Human)
        );
        assert_eq!(
            next_status(Review, Transition::Reject { escalate: true }, &CLEAR),
            Ok(Human)
        );
        assert_eq!(
            next_status(Review, Transition::Reject { escalate: false }, &CLEAR),
            Ok(Ready)
        );
    }

    #[test]
    fn incomplete_tasks_are_a_distinct_failure() {
        let open = Guards {
            incomplete_tasks: 2,
            ..CLEAR
        };
        assert_eq!(
            next_status(Working, Transition::Submit, &open),
            Err(Rejection::IncompleteTasks(2))
        );
        assert_eq!(
            next_status(Review, Transition::Accept, &open),
            Err(Rejection::IncompleteTasks(2))
        );
        // Non-success closure is not gated by the checklist.
        assert_eq!(
            next_status(Working, Transition::Close(Resolution::WontDo), &open),
            Ok(Closed)
        );
        assert_eq!(
            next_status(Working, Transition::Close(Resolution::Done), &open),
            Err(Rejection::IncompleteTasks(2))
        );
    }

    #[test]
    fn close_from_any_non_terminal_status() {
        for from in ALL {
            let result = next_status(from, Transition::Close(Resolution::Obsolete), &CLEAR);
            if from == Closed {
                assert!(result.is_err());
            } else {
                assert_eq!(result, Ok(Closed), "close from {from}");
            }
        }
    }

    #[test]
    fn escalation_only_from_active_work() {
        for from in ALL {
            let result = next_status(from, Transition::Escalate, &CLEAR);
            match from {
                Working | Review => assert_eq!(result, Ok(Human)),
                _ => assert!(result.is_err(), "flag from {from} should fail"),
            }
        }
    }

    #[test]
    fn block_and_unblock_follow_the_graph() {
        assert_eq!(next_status(Ready, Transition::Block, &DEPS), Ok(Blocked));
        assert!(next_status(Ready, Transition::Block, &CLEAR).is_err());
        assert_eq!(next_status(Blocked, Transition::Unblock, &CLEAR), Ok(Ready));
        assert_eq!(
            next_status(Blocked, Transition::Unblock, &DEPS),
            Err(Rejection::UnresolvedDependencies)
        );
        assert!(next_status(Working, Transition::Block, &DEPS).is_err());
    }

    #[test]
    fn parent_settles_only_from_blocked_or_working() {
        assert_eq!(next_status(Blocked, Transition::ChildrenClosed, &CLEAR), Ok(Ready));
        assert_eq!(next_status(Working, Transition::ChildrenClosed, &CLEAR), Ok(Ready));
        assert!(next_status(Review, Transition::ChildrenClosed, &CLEAR).is_err());
        assert!(next_status(Working, Transition::ChildrenClosed, &DEPS).is_err());
    }

    #[test]
    fn rejection_maps_to_named_errors() {
        let key = TicketKey::new("CORE", 7);
        let err = Rejection::IncompleteTasks(1).into_error(&key, vec![]);
        assert!(matches!(err, Error::IncompleteTasks { remaining: 1, .. }));
        let err = Rejection::UnresolvedDependencies.into_error(&key, vec!["CORE-1".into()]);
        assert_eq!(
            err.to_string(),
            "ticket CORE-7 has unresolved dependencies: CORE-1"
        );
    }
}
