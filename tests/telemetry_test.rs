//! Integration tests for telemetry initialization and span helpers.

use ticketq::model::TicketKey;
use ticketq::telemetry::{self, TelemetryConfig};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second
    // attempt returning Err is acceptable.
    let guard = telemetry::init_telemetry(TelemetryConfig {
        endpoint: None,
        service_name: "ticketq-test".to_string(),
        log_level: "warn".to_string(),
    });
    if let Ok(guard) = guard {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn ticket_span_records_transition() {
    let key = TicketKey::new("CORE", 7);
    let span = telemetry::ticket::start_ticket_span("claim", &key);
    telemetry::ticket::record_transition(&span, "ready", "working");
}

#[test]
fn sweep_span_records_count() {
    let span = telemetry::ticket::start_sweep_span(true);
    span.record("sweep.expired", 3u64);
}

#[test]
fn metric_instruments_are_usable_without_a_provider() {
    use opentelemetry::KeyValue;

    telemetry::metrics::tickets_created().add(1, &[KeyValue::new("project", "CORE")]);
    telemetry::metrics::claim_operations().add(
        1,
        &[
            KeyValue::new("operation", "acquire"),
            KeyValue::new("result", "ok"),
        ],
    );
    telemetry::metrics::sweep_runs().add(1, &[KeyValue::new("result", "ok")]);
    telemetry::metrics::sweep_duration_ms().record(1.5, &[]);
}
