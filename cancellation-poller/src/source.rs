use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info};

use crate::parser::{columns, RawRow};

/// Enumeration of errors for the cancellation query. All of them are fatal for the poller.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError {
        command: &'static str,
        error: sqlx::Error,
    },
    #[error("failed to read column {column}: {error}")]
    ColumnError {
        column: &'static str,
        error: sqlx::Error,
    },
}

/// Bounds of one query, rendered as local time strings in the database's time zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryWindow {
    /// Cancellations affecting trips from now on.
    Now { now: String, today: String },
    /// Same as `Now`, plus anything modified since `since`.
    History {
        now: String,
        today: String,
        since: String,
    },
}

impl QueryWindow {
    pub fn command(&self) -> &'static str {
        match self {
            QueryWindow::Now { .. } => "cancellations_from_now",
            QueryWindow::History { .. } => "cancellations_from_history",
        }
    }
}

#[async_trait]
pub trait CancellationSource {
    /// Run the cancellation query for `window` and return all rows.
    async fn fetch(&self, window: &QueryWindow) -> Result<Vec<RawRow>, SourceError>;

    /// Release connections, called once when the poller stops.
    async fn close(&self);
}

// Every column is selected as text and the parser owns the decoding, so a single malformed
// value only drops its own row.
const SELECT_CANCELLATIONS: &str = r#"
SELECT DISTINCT
    dvj.route_id::text AS route_id,
    dvj.direction::text AS direction_id,
    dvj.operating_day::text AS operating_day,
    to_char(dvj.planned_start_time, 'HH24:MI:SS') AS start_time,
    dvj.id::text AS trip_id,
    dc.id::text AS deviation_case_id,
    ad.status AS affected_departure_status,
    dc.type AS deviation_case_type,
    ad.type AS affected_departures_type,
    dc.category AS category,
    dc.sub_category AS sub_category,
    dc.title AS title,
    dc.description AS description,
    to_char(ad.last_modified, 'YYYY-MM-DD HH24:MI:SS.MS') AS last_modified
FROM omm.deviation_cases dc
JOIN omm.affected_departures ad ON ad.deviation_case_id = dc.id
JOIN omm.dated_vehicle_journeys dvj ON dvj.id = ad.dated_vehicle_journey_id
WHERE dc.type = 'CANCEL_DEPARTURE'
"#;

const NOW_PREDICATE: &str = r#"
  AND (dc.valid_to IS NULL OR dc.valid_to >= $1::timestamp)
  AND dvj.operating_day >= $2::date
"#;

const HISTORY_PREDICATE: &str = r#"
  AND (
    ((dc.valid_to IS NULL OR dc.valid_to >= $1::timestamp) AND dvj.operating_day >= $2::date)
    OR ad.last_modified >= $3::timestamp
  )
"#;

/// SQL text for a query window.
pub fn query_for(window: &QueryWindow) -> String {
    let predicate = match window {
        QueryWindow::Now { .. } => NOW_PREDICATE,
        QueryWindow::History { .. } => HISTORY_PREDICATE,
    };
    format!("{SELECT_CANCELLATIONS}{predicate}ORDER BY trip_id, deviation_case_id")
}

/// Read a row into a `RawRow`, leaving out NULL columns.
fn raw_row(row: &PgRow) -> Result<RawRow, SourceError> {
    let mut raw = RawRow::new();
    for column in columns::ALL {
        let value: Option<String> = row
            .try_get(column)
            .map_err(|error| SourceError::ColumnError { column, error })?;
        if let Some(value) = value {
            raw.insert(column, value);
        }
    }
    Ok(raw)
}

/// Reads cancellations from the deviation case tables in PostgreSQL.
pub struct PgCancellationSource {
    pool: PgPool,
}

impl PgCancellationSource {
    /// Connect eagerly, so that a bad connection string fails at startup.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, SourceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| SourceError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    /// Reuse an existing pool, e.g. the per-test database of `sqlx::test`.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CancellationSource for PgCancellationSource {
    async fn fetch(&self, window: &QueryWindow) -> Result<Vec<RawRow>, SourceError> {
        let sql = query_for(window);
        let command = window.command();
        debug!(command, "running query {}", sql);

        let query = match window {
            QueryWindow::Now { now, today } => sqlx::query(&sql).bind(now).bind(today),
            QueryWindow::History { now, today, since } => {
                sqlx::query(&sql).bind(now).bind(today).bind(since)
            }
        };

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|error| SourceError::QueryError { command, error })?;

        rows.iter().map(raw_row).collect()
    }

    async fn close(&self) {
        info!("closing database connection pool");
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use chrono_tz::Europe::Helsinki;
    use sqlx::Executor;

    use super::*;
    use crate::parser::parse_rows;
    use crate::record::Status;

    fn count_placeholders(sql: &str) -> usize {
        (1..=9)
            .filter(|i| sql.contains(&format!("${}::", i)))
            .count()
    }

    #[test]
    fn now_query_binds_two_parameters() {
        let window = QueryWindow::Now {
            now: "2018-11-05 13:00:00".to_owned(),
            today: "2018-11-05".to_owned(),
        };
        let sql = query_for(&window);
        assert_eq!(count_placeholders(&sql), 2);
        assert_eq!(window.command(), "cancellations_from_now");
    }

    #[test]
    fn history_query_binds_three_parameters() {
        let window = QueryWindow::History {
            now: "2018-11-05 13:00:00".to_owned(),
            today: "2018-11-05".to_owned(),
            since: "2018-11-05 12:59:30".to_owned(),
        };
        let sql = query_for(&window);
        assert_eq!(count_placeholders(&sql), 3);
        assert!(sql.contains("ad.last_modified >= $3::timestamp"));
        assert_eq!(window.command(), "cancellations_from_history");
    }

    #[test]
    fn query_selects_every_parsed_column() {
        let sql = query_for(&QueryWindow::Now {
            now: String::new(),
            today: String::new(),
        });
        for column in columns::ALL {
            assert!(
                sql.contains(&format!("AS {}", column)),
                "missing column {}",
                column
            );
        }
    }

    const FIXTURES: &str = r#"
INSERT INTO omm.dated_vehicle_journeys (id, route_id, direction, operating_day, planned_start_time) VALUES
    (1001, '2550', 1, '2018-11-05', '2018-11-05 14:05:00'),
    (1002, '2550', 2, '2018-11-06', '2018-11-06 07:30:00'),
    (1003, '1010', 1, '2018-11-01', '2018-11-01 09:00:00');

INSERT INTO omm.deviation_cases (id, type, category, sub_category, title, description, valid_to) VALUES
    (10, 'CANCEL_DEPARTURE', NULL, NULL, 'Lakko', NULL, NULL),
    (20, 'CANCEL_DEPARTURE', 'STRIKE', 'STAFF_DEFICIT', NULL, NULL, '2018-11-01 12:00:00'),
    (30, 'DETOUR', NULL, NULL, NULL, NULL, NULL);

INSERT INTO omm.affected_departures (deviation_case_id, dated_vehicle_journey_id, status, type, last_modified) VALUES
    (10, 1001, NULL, 'CANCEL_ENTIRE_DEPARTURE', '2018-11-05 12:00:00'),
    (10, 1002, 'deleted', 'CANCEL_ENTIRE_DEPARTURE', '2018-11-05 12:59:45.250'),
    (20, 1003, NULL, 'CANCEL_STOPS_FROM_END', '2018-11-05 12:59:50'),
    (30, 1001, NULL, 'CANCEL_ENTIRE_DEPARTURE', '2018-11-05 12:59:55');
"#;

    async fn source_with_fixtures(db: PgPool) -> PgCancellationSource {
        db.execute(FIXTURES)
            .await
            .expect("failed to insert fixtures");
        PgCancellationSource::from_pool(db)
    }

    fn trip_ids(rows: &[RawRow]) -> Vec<&str> {
        rows.iter()
            .map(|row| row.get(columns::TRIP_ID).unwrap())
            .collect()
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn fetch_from_now(db: PgPool) {
        let source = source_with_fixtures(db).await;
        let window = QueryWindow::Now {
            now: "2018-11-05 13:00:00".to_owned(),
            today: "2018-11-05".to_owned(),
        };

        let rows = source.fetch(&window).await.expect("query failed");
        assert_eq!(trip_ids(&rows), vec!["1001", "1002"]);

        let canceled = &rows[0];
        assert_eq!(canceled.get(columns::ROUTE_ID), Some("2550"));
        assert_eq!(canceled.get(columns::DIRECTION_ID), Some("1"));
        assert_eq!(canceled.get(columns::OPERATING_DAY), Some("2018-11-05"));
        assert_eq!(canceled.get(columns::START_TIME), Some("14:05:00"));
        assert_eq!(canceled.get(columns::DEVIATION_CASE_ID), Some("10"));
        assert_eq!(
            canceled.get(columns::DEVIATION_CASE_TYPE),
            Some("CANCEL_DEPARTURE")
        );
        assert_eq!(
            canceled.get(columns::AFFECTED_DEPARTURES_TYPE),
            Some("CANCEL_ENTIRE_DEPARTURE")
        );
        assert_eq!(canceled.get(columns::TITLE), Some("Lakko"));
        assert_eq!(
            canceled.get(columns::LAST_MODIFIED),
            Some("2018-11-05 12:00:00.000")
        );
        // NULL columns are left out of the row
        assert_eq!(canceled.get(columns::AFFECTED_DEPARTURE_STATUS), None);
        assert_eq!(canceled.get(columns::CATEGORY), None);
        assert_eq!(canceled.get(columns::SUB_CATEGORY), None);
        assert_eq!(canceled.get(columns::DESCRIPTION), None);

        let retracted = &rows[1];
        assert_eq!(
            retracted.get(columns::AFFECTED_DEPARTURE_STATUS),
            Some("deleted")
        );
        assert_eq!(
            retracted.get(columns::LAST_MODIFIED),
            Some("2018-11-05 12:59:45.250")
        );

        let batch = parse_rows(rows, Helsinki);
        assert_eq!(batch.skipped, 0);
        assert_eq!(batch.records[0].status, Status::Canceled);
        assert_eq!(batch.records[1].status, Status::Running);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn now_and_today_filter_separately(db: PgPool) {
        let source = source_with_fixtures(db).await;

        // Trip 1003 operates on the 1st, but its deviation case is only valid until noon that day
        let before_valid_to = QueryWindow::Now {
            now: "2018-11-01 08:00:00".to_owned(),
            today: "2018-11-01".to_owned(),
        };
        let rows = source.fetch(&before_valid_to).await.expect("query failed");
        assert_eq!(trip_ids(&rows), vec!["1001", "1002", "1003"]);

        let after_valid_to = QueryWindow::Now {
            now: "2018-11-01 13:00:00".to_owned(),
            today: "2018-11-01".to_owned(),
        };
        let rows = source.fetch(&after_valid_to).await.expect("query failed");
        assert_eq!(trip_ids(&rows), vec!["1001", "1002"]);

        let later_day = QueryWindow::Now {
            now: "2018-11-01 08:00:00".to_owned(),
            today: "2018-11-06".to_owned(),
        };
        let rows = source.fetch(&later_day).await.expect("query failed");
        assert_eq!(trip_ids(&rows), vec!["1002"]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn fetch_from_history(db: PgPool) {
        let source = source_with_fixtures(db).await;

        let window = QueryWindow::History {
            now: "2018-11-05 13:00:00".to_owned(),
            today: "2018-11-05".to_owned(),
            since: "2018-11-05 12:59:30".to_owned(),
        };
        let rows = source.fetch(&window).await.expect("query failed");
        assert_eq!(trip_ids(&rows), vec!["1001", "1002", "1003"]);

        // Out of the NOW window, found only through its modification time
        let past = &rows[2];
        assert_eq!(past.get(columns::DEVIATION_CASE_ID), Some("20"));
        assert_eq!(past.get(columns::CATEGORY), Some("STRIKE"));
        assert_eq!(past.get(columns::SUB_CATEGORY), Some("STAFF_DEFICIT"));
        assert_eq!(past.get(columns::TITLE), None);

        let window = QueryWindow::History {
            now: "2018-11-05 13:00:00".to_owned(),
            today: "2018-11-05".to_owned(),
            since: "2018-11-05 12:59:51".to_owned(),
        };
        let rows = source.fetch(&window).await.expect("query failed");
        assert_eq!(trip_ids(&rows), vec!["1001", "1002"]);
    }
}
