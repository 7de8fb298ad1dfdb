//! Metric instrument factories for ticketq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"ticketq"` meter and are
//! no-ops until a provider is installed.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for ticketq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("ticketq")
}

/// Counter: tickets created.
/// Labels: `project`, `status` (initial status).
pub fn tickets_created() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.tickets.created")
        .with_description("Number of tickets created")
        .build()
}

/// Counter: ticket status transitions.
/// Labels: `from`, `to`.
pub fn ticket_transitions() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.tickets.transitions")
        .with_description("Number of ticket status transitions")
        .build()
}

/// Counter: claim operations.
/// Labels: `operation` ("acquire" | "release" | "renew"), `result` ("ok" | "conflict" | "error").
pub fn claim_operations() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.claims.operations")
        .with_description("Number of claim operations")
        .build()
}

/// Counter: expired leases, counted once the expiry has committed (or has
/// failed). Dry runs are not counted.
/// Labels: `outcome` ("requeued" | "escalated" | "failed").
pub fn claims_expired() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.claims.expired")
        .with_description("Number of expired claims processed")
        .build()
}

/// Counter: dependency edge operations.
/// Labels: `operation` ("add" | "remove"), `result` ("ok" | "cycle" | "noop").
pub fn dependency_operations() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.dependencies.operations")
        .with_description("Number of dependency edge operations")
        .build()
}

/// Counter: sweeps run by the periodic sweeper.
/// Labels: `result` ("ok" | "error").
pub fn sweep_runs() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.sweep.runs")
        .with_description("Number of lease sweeps run")
        .build()
}

/// Histogram: sweep duration in milliseconds.
pub fn sweep_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("ticketq.sweep.duration_ms")
        .with_description("Lease sweep duration in milliseconds")
        .with_unit("ms")
        .build()
}
