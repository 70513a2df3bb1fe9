use tracing::trace;

// Counter events are emitted as trace records; the Prometheus handle only
// renders whatever recorder is installed.

pub fn inc_requests(route: &'static str) {
    trace!(target = "pickwell.metrics", route = route, "requests_total_inc");
}

pub fn orders_accepted(count: usize) {
    trace!(target = "pickwell.metrics", count = count as u64, "orders_accepted");
}

pub fn orders_skipped(count: usize) {
    trace!(target = "pickwell.metrics", count = count as u64, "orders_skipped");
}

pub fn item_errors(count: usize) {
    trace!(target = "pickwell.metrics", count = count as u64, "item_errors");
}

pub fn cycle_elapsed(source: &'static str, elapsed_ms: u128) {
    trace!(
        target = "pickwell.metrics",
        source = source,
        elapsed_ms = elapsed_ms as u64,
        "cycle_elapsed"
    );
}
