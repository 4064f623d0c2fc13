use tracing::trace;

// Trace-based counters; the Prometheus recorder only renders what is emitted here.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "migrator.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn item_settled(status: &'static str, retry_count: u32, duration_ms: u64) {
    trace!(
        target = "migrator.metrics",
        status = status,
        retry_count = retry_count,
        duration_ms = duration_ms,
        "item_settled"
    );
}

pub fn batch_completed(succeeded: usize, failed: usize, elapsed_ms: u128) {
    trace!(
        target = "migrator.metrics",
        succeeded = succeeded as u64,
        failed = failed as u64,
        elapsed_ms = elapsed_ms as u64,
        "batch_completed"
    );
}
