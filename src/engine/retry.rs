//! Retry-then-escalate policy, shared by lease expiry and review rejection.

/// Outcome of one failed attempt on a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// The ticket's retry count after this attempt.
    pub retry_count: u32,
    /// The bound was reached; hand the ticket to a human.
    pub escalate: bool,
}

/// Count a failed attempt. Reaching `max_retries` is a signal to escalate,
/// not a cap: the count is still incremented.
pub fn after_failed_attempt(retry_count: u32, max_retries: u32) -> RetryDecision {
    let retry_count = retry_count.saturating_add(1);
    RetryDecision {
        retry_count,
        escalate: retry_count >= max_retries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_when_bound_is_reached() {
        assert_eq!(
            after_failed_attempt(0, 3),
            RetryDecision {
                retry_count: 1,
                escalate: false
            }
        );
        assert_eq!(
            after_failed_attempt(2, 3),
            RetryDecision {
                retry_count: 3,
                escalate: true
            }
        );
    }

    #[test]
    fn keeps_counting_past_the_bound() {
        let d = after_failed_attempt(5, 3);
        assert_eq!(d.retry_count, 6);
        assert!(d.escalate);
    }

    #[test]
    fn zero_bound_escalates_on_first_failure() {
        assert!(after_failed_attempt(0, 0).escalate);
    }
}
