//! Chat history metrics.
//!
//! Uses the global OpenTelemetry meter provider, which must be installed by
//! the host application. Without one, recording is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("chat-history"))
}

/// Counter for history queries answered.
pub fn queries_handled() -> Counter<u64> {
    meter()
        .u64_counter("history.queries")
        .with_description("Total chat history queries handled")
        .with_unit("query")
        .build()
}

/// Counter for history messages returned to clients.
pub fn messages_returned() -> Counter<u64> {
    meter()
        .u64_counter("history.messages.returned")
        .with_description("Total history messages returned")
        .with_unit("message")
        .build()
}

/// Histogram for query handling latency.
pub fn query_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("history.query.duration")
        .with_description("Chat history query handling latency")
        .with_unit("ms")
        .build()
}

/// Record a handled query.
///
/// `outcome` is `success`, `bad-request` or `internal-server-error`.
pub fn record_query(mode: &str, outcome: &str, latency_ms: f64) {
    let attrs = [
        KeyValue::new("mode", mode.to_string()),
        KeyValue::new("outcome", outcome.to_string()),
    ];
    queries_handled().add(1, &attrs);
    query_duration().record(latency_ms, &attrs);
}

/// Record messages returned in a page.
pub fn record_messages_returned(count: usize, mode: &str) {
    messages_returned().add(count as u64, &[KeyValue::new("mode", mode.to_string())]);
}
