pub const CYCLE_STARTS: &str = "cancellation_poller_cycle_starts";
pub const CYCLE_ENDS: &str = "cancellation_poller_cycle_ends";
pub const CYCLE_DURATION: &str = "cancellation_poller_cycle_duration_seconds";
pub const CYCLE_FAILURES: &str = "cancellation_poller_cycle_failures";

pub const ROWS_FETCHED: &str = "cancellation_poller_rows_fetched";
pub const ROWS_SKIPPED: &str = "cancellation_poller_rows_skipped";

pub const RESOLVED_TOTAL: &str = "cancellation_poller_resolved_cancellations";
pub const RESOLVED_NEW: &str = "cancellation_poller_new_cancellations";
pub const RESOLVED_REPEATED: &str = "cancellation_poller_repeated_cancellations";

pub const EVENTS_PUBLISHED: &str = "cancellation_poller_events_published";
pub const EVENTS_DROPPED: &str = "cancellation_poller_events_dropped";

pub const KAFKA_QUEUE_DEPTH: &str = "cancellation_poller_kafka_producer_queue_depth";
pub const KAFKA_QUEUE_BYTES: &str = "cancellation_poller_kafka_producer_queue_bytes";
pub const KAFKA_BROKER_TX_ERRORS: &str = "cancellation_poller_kafka_broker_tx_errors_total";
