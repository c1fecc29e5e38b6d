//! Metric instrument factories for echolog.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"echolog"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for echolog instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("echolog")
}

/// Counter: entries ingested.
/// Labels: `result` ("committed" | "degraded" | "duplicate").
pub fn entries_ingested() -> Counter<u64> {
    meter()
        .u64_counter("echolog.entries.ingested")
        .with_description("Number of entries ingested")
        .build()
}

/// Counter: derived-store write outcomes.
/// Labels: `store` ("facts" | "vector"), `result` ("ok" | "queued_repair").
pub fn store_writes() -> Counter<u64> {
    meter()
        .u64_counter("echolog.store.writes")
        .with_description("Derived store write outcomes")
        .build()
}

/// Counter: background repair outcomes.
/// Labels: `tier`, `result` ("ok" | "deferred" | "exhausted").
pub fn repairs() -> Counter<u64> {
    meter()
        .u64_counter("echolog.repairs")
        .with_description("Background repair outcomes")
        .build()
}

/// Counter: queue-level operations (send, read, archive, delete).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("echolog.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: vector store operations.
/// Labels: `operation`.
pub fn vector_operations() -> Counter<u64> {
    meter()
        .u64_counter("echolog.vector.operations")
        .with_description("Number of vector store operations")
        .build()
}

/// Counter: jobs enqueued.
/// Labels: `kind`, `result` ("ok" | "duplicate").
pub fn jobs_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("echolog.jobs.enqueued")
        .with_description("Number of jobs enqueued")
        .build()
}

/// Counter: job state transitions.
/// Labels: `from`, `to`.
pub fn job_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("echolog.jobs.state_transitions")
        .with_description("Number of job state transitions")
        .build()
}

/// Counter: artifact commits.
/// Labels: `kind`, `result` ("created" | "duplicate" | "superseded").
pub fn artifacts_committed() -> Counter<u64> {
    meter()
        .u64_counter("echolog.artifacts.committed")
        .with_description("Number of artifact commit attempts")
        .build()
}

/// Counter: artifact generation runs.
/// Labels: `kind`, `result` ("ok" | "fallback").
pub fn artifacts_generated() -> Counter<u64> {
    meter()
        .u64_counter("echolog.artifacts.generated")
        .with_description("Number of artifact generation runs")
        .build()
}

/// Counter: nudges emitted.
/// Labels: `kind`.
pub fn nudges_emitted() -> Counter<u64> {
    meter()
        .u64_counter("echolog.nudges.emitted")
        .with_description("Number of nudge intents emitted")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("echolog.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
