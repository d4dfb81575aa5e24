//! Collapse the records observed in one poll into the authoritative set to publish.
//!
//! The source system keeps every step of "cancel, un-cancel, cancel again" as a valid row, so
//! a single poll can return several records for the same trip and deviation case. At most one
//! of them is published per `(trip_id, deviation_case_id)`:
//!   - if any record cancels the trip, a cancellation is published,
//!   - otherwise the most recently modified retraction is published.
//!
//! Different trips, and different deviation cases of the same trip, never affect each other.
use std::collections::BTreeMap;

use tracing::{error, warn};

use crate::record::{CancellationRecord, Status};

/// Resolve one group of records sharing a `(trip_id, deviation_case_id)` key.
/// Returns `None` only if the group is empty.
fn resolve_group(
    trip_id: &str,
    deviation_case_id: &str,
    group: Vec<CancellationRecord>,
) -> Option<CancellationRecord> {
    let (canceled, running): (Vec<_>, Vec<_>) = group
        .into_iter()
        .partition(|record| record.status == Status::Canceled);

    if canceled.len() > 1 {
        warn!(
            trip_id,
            deviation_case_id,
            count = canceled.len(),
            "multiple cancellations for the same trip and deviation case, publishing the first one"
        );
    }

    if let Some(first) = canceled.into_iter().next() {
        return Some(first);
    }

    // Keeps the first record on ties
    let latest = running.into_iter().fold(None, |latest, record| match latest {
        Some(current) if record_is_newer(&record, &current) => Some(record),
        Some(current) => Some(current),
        None => Some(record),
    });

    if latest.is_none() {
        error!(
            trip_id,
            deviation_case_id, "no cancellation status found for trip and deviation case"
        );
    }
    latest
}

fn record_is_newer(candidate: &CancellationRecord, current: &CancellationRecord) -> bool {
    candidate.last_modified_epoch_ms > current.last_modified_epoch_ms
}

/// Reduce the records of one poll cycle to at most one record per
/// `(trip_id, deviation_case_id)`. The output is ordered by trip, then deviation case.
pub fn resolve(records: Vec<CancellationRecord>) -> Vec<CancellationRecord> {
    let mut by_trip: BTreeMap<String, BTreeMap<String, Vec<CancellationRecord>>> = BTreeMap::new();

    for record in records {
        by_trip
            .entry(record.trip_id.clone())
            .or_default()
            .entry(record.deviation_case_id.clone())
            .or_default()
            .push(record);
    }

    by_trip
        .into_iter()
        .flat_map(|(trip_id, by_case)| {
            by_case
                .into_iter()
                .filter_map(move |(deviation_case_id, group)| {
                    resolve_group(&trip_id, &deviation_case_id, group)
                })
        })
        .collect()
}
