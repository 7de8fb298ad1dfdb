//! Ticket operation span helpers.

use tracing::Span;

use crate::model::TicketKey;

/// Start a span for one worker-facing operation on a ticket.
///
/// The `ticket.status` field is declared empty and is filled by
/// [`record_transition`].
pub fn start_ticket_span(operation: &'static str, key: &TicketKey) -> Span {
    tracing::info_span!(
        "ticket.operation",
        "ticket.operation" = operation,
        "ticket.key" = %key,
        "ticket.status" = tracing::field::Empty,
    )
}

/// Start a span for one lease sweep.
pub fn start_sweep_span(dry_run: bool) -> Span {
    tracing::info_span!(
        "ticket.sweep",
        "sweep.dry_run" = dry_run,
        "sweep.expired" = tracing::field::Empty,
    )
}

/// Record a status transition on the span and emit an event inside it.
pub fn record_transition(span: &Span, from: &str, to: &str) {
    span.record("ticket.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
