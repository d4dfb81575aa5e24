use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{error, warn};

use crate::record::{CancellationRecord, Status, UnknownVariant};
use crate::time::to_utc_epoch_ms;

/// Column names of a cancellation row, as aliased by the source query.
pub mod columns {
    pub const ROUTE_ID: &str = "route_id";
    pub const DIRECTION_ID: &str = "direction_id";
    pub const OPERATING_DAY: &str = "operating_day";
    pub const START_TIME: &str = "start_time";
    pub const TRIP_ID: &str = "trip_id";
    pub const DEVIATION_CASE_ID: &str = "deviation_case_id";
    pub const AFFECTED_DEPARTURE_STATUS: &str = "affected_departure_status";
    pub const DEVIATION_CASE_TYPE: &str = "deviation_case_type";
    pub const AFFECTED_DEPARTURES_TYPE: &str = "affected_departures_type";
    pub const CATEGORY: &str = "category";
    pub const SUB_CATEGORY: &str = "sub_category";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const LAST_MODIFIED: &str = "last_modified";

    pub const ALL: [&str; 14] = [
        ROUTE_ID,
        DIRECTION_ID,
        OPERATING_DAY,
        START_TIME,
        TRIP_ID,
        DEVIATION_CASE_ID,
        AFFECTED_DEPARTURE_STATUS,
        DEVIATION_CASE_TYPE,
        AFFECTED_DEPARTURES_TYPE,
        CATEGORY,
        SUB_CATEGORY,
        TITLE,
        DESCRIPTION,
        LAST_MODIFIED,
    ];
}

/// Status value marking an affected departure entry as removed, i.e. the cancellation is off.
const DELETED_STATUS: &str = "deleted";

/// A database row with named text columns. SQL NULLs are not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    values: HashMap<String, String>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: impl Into<String>) {
        drop(self.values.insert(column.to_owned(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Enumeration of reasons a single row could not become a `CancellationRecord`.
/// None of them are fatal for the poll cycle: the row is dropped and parsing continues.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RowError {
    #[error("missing required column {0}")]
    MissingField(&'static str),
    #[error("column {column} has invalid value {value:?}")]
    InvalidValue { column: &'static str, value: String },
    #[error("column {column}: {source}")]
    UnknownVariant {
        column: &'static str,
        source: UnknownVariant,
    },
    #[error("failed to parse last modified timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// Result of parsing all rows returned by one query.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub records: Vec<CancellationRecord>,
    pub skipped: usize,
}

fn required<'a>(row: &'a RawRow, column: &'static str) -> Result<&'a str, RowError> {
    match row.get(column) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim()),
        _ => Err(RowError::MissingField(column)),
    }
}

fn optional<'a>(row: &'a RawRow, column: &'static str) -> Option<&'a str> {
    row.get(column).map(str::trim).filter(|v| !v.is_empty())
}

fn lookup<T>(value: &str, column: &'static str) -> Result<T, RowError>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    value
        .parse()
        .map_err(|source| RowError::UnknownVariant { column, source })
}

fn invalid(column: &'static str, value: &str) -> RowError {
    RowError::InvalidValue {
        column,
        value: value.to_owned(),
    }
}

/// Map the affected departure status column to a cancellation status. A deleted entry means
/// the cancellation itself was retracted; anything else, including NULL, is a cancellation.
pub fn status_from_column(value: Option<&str>) -> Status {
    match value {
        Some(status) if status.trim().eq_ignore_ascii_case(DELETED_STATUS) => Status::Running,
        _ => Status::Canceled,
    }
}

/// Build a `CancellationRecord` from one row, resolving its last modified timestamp in `zone`.
pub fn parse_row(row: &RawRow, zone: Tz) -> Result<CancellationRecord, RowError> {
    use columns::*;

    let trip_id = required(row, TRIP_ID)?.to_owned();
    let deviation_case_id = required(row, DEVIATION_CASE_ID)?.to_owned();
    let route_id = required(row, ROUTE_ID)?.to_owned();

    let direction = required(row, DIRECTION_ID)?;
    let direction_id = direction
        .parse::<i32>()
        .map_err(|_| invalid(DIRECTION_ID, direction))?;

    let day = required(row, OPERATING_DAY)?;
    let operating_day =
        NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|_| invalid(OPERATING_DAY, day))?;

    let start = required(row, START_TIME)?;
    let start_time =
        NaiveTime::parse_from_str(start, "%H:%M:%S").map_err(|_| invalid(START_TIME, start))?;

    let deviation_case_type = lookup(required(row, DEVIATION_CASE_TYPE)?, DEVIATION_CASE_TYPE)?;
    let affected_departures_type = lookup(
        required(row, AFFECTED_DEPARTURES_TYPE)?,
        AFFECTED_DEPARTURES_TYPE,
    )?;
    let category = optional(row, CATEGORY)
        .map(|v| lookup(v, CATEGORY))
        .transpose()?;
    let sub_category = optional(row, SUB_CATEGORY)
        .map(|v| lookup(v, SUB_CATEGORY))
        .transpose()?;

    let last_modified = required(row, LAST_MODIFIED)?;
    let last_modified_epoch_ms = to_utc_epoch_ms(last_modified, zone)
        .ok_or_else(|| RowError::InvalidTimestamp(last_modified.to_owned()))?;

    Ok(CancellationRecord {
        trip_id,
        deviation_case_id,
        route_id,
        direction_id,
        operating_day,
        start_time,
        status: status_from_column(row.get(AFFECTED_DEPARTURE_STATUS)),
        deviation_case_type,
        affected_departures_type,
        category,
        sub_category,
        title: optional(row, TITLE).map(str::to_owned),
        description: optional(row, DESCRIPTION).map(str::to_owned),
        last_modified_epoch_ms,
    })
}

/// Parse every row of a query result. Rows that fail are logged and counted, never fatal.
pub fn parse_rows<I>(rows: I, zone: Tz) -> ParsedBatch
where
    I: IntoIterator<Item = RawRow>,
{
    let mut batch = ParsedBatch::default();

    for row in rows {
        match parse_row(&row, zone) {
            Ok(record) => batch.records.push(record),
            Err(err) => {
                let trip_id = row.get(columns::TRIP_ID).unwrap_or("<unknown>");
                let deviation_case_id = row.get(columns::DEVIATION_CASE_ID).unwrap_or("<unknown>");
                match err {
                    RowError::InvalidTimestamp(_) => error!(
                        trip_id,
                        deviation_case_id, "dropping cancellation row: {}", err
                    ),
                    _ => warn!(
                        trip_id,
                        deviation_case_id, "skipping cancellation row: {}", err
                    ),
                }
                batch.skipped += 1;
            }
        }
    }

    batch
}
