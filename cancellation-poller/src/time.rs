//! Conversions between the database's local wall-clock timestamps and absolute instants.
//!
//! The database stores timestamps as local time in a single IANA zone. The same zone must
//! be used when reading `last_modified` columns and when rendering query bounds, otherwise
//! the query window and the event timestamps drift apart around DST changes.
use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

const LOCAL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LOCAL_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a local timestamp as written by the database, either `2018-11-05 13:00:00` or the
/// ISO `2018-11-05T13:00:00` form, with optional fractional seconds.
pub fn parse_local_timestamp(local: &str) -> Option<NaiveDateTime> {
    let local = local.trim();
    NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(local, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// Resolve a local wall-clock time in `zone` to an absolute instant.
///
/// Ambiguous times (clocks turned back) resolve to the earlier instant. Times falling into a
/// gap (clocks turned forward) are shifted forward by the length of the gap.
pub fn resolve_local(local: NaiveDateTime, zone: Tz) -> Option<DateTime<Utc>> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            // Use the offset in force just before the gap, which moves the wall clock forward.
            let before = zone
                .from_local_datetime(&(local - Duration::hours(3)))
                .earliest()?;
            before
                .offset()
                .fix()
                .from_local_datetime(&local)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        }
    }
}

/// Convert a local timestamp string in `zone` to milliseconds since the Unix epoch.
/// Returns `None` if the timestamp is empty or can't be parsed.
pub fn to_utc_epoch_ms(local: &str, zone: Tz) -> Option<i64> {
    let parsed = parse_local_timestamp(local)?;
    resolve_local(parsed, zone).map(|instant| instant.timestamp_millis())
}

/// Render an instant as a local datetime string in `zone`, as used for query bounds.
pub fn local_datetime_string(instant: DateTime<Utc>, zone: Tz) -> String {
    instant
        .with_timezone(&zone)
        .format(LOCAL_DATETIME_FORMAT)
        .to_string()
}

/// Render an instant as a local date string in `zone`.
pub fn local_date_string(instant: DateTime<Utc>, zone: Tz) -> String {
    instant
        .with_timezone(&zone)
        .format(LOCAL_DATE_FORMAT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Helsinki;
    use chrono_tz::UTC;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn renders_local_datetime() {
        assert_eq!(
            local_datetime_string(at(1541415600), Helsinki),
            "2018-11-05 13:00:00"
        );
        assert_eq!(
            local_datetime_string(at(1541422800), UTC),
            "2018-11-05 13:00:00"
        );
        assert_eq!(
            local_datetime_string(at(1514764800), UTC),
            "2018-01-01 00:00:00"
        );
        assert_eq!(
            local_datetime_string(at(1514843999), Helsinki),
            "2018-01-01 23:59:59"
        );
    }

    #[test]
    fn renders_local_date() {
        // 2018-01-01 23:30 UTC is already the 2nd in Helsinki
        assert_eq!(local_date_string(at(1514849400), Helsinki), "2018-01-02");
        assert_eq!(local_date_string(at(1514849400), UTC), "2018-01-01");
    }

    #[test]
    fn converts_local_timestamp_to_epoch() {
        let helsinki = to_utc_epoch_ms("2018-11-05 13:00:00", Helsinki).unwrap();
        let utc = to_utc_epoch_ms("2018-11-05 11:00:00", UTC).unwrap();
        assert_eq!(helsinki, utc);
        assert_eq!(helsinki, 1_541_415_600_000);

        // Summer time, Helsinki is UTC+3
        assert_eq!(
            to_utc_epoch_ms("2018-07-01 12:00:00", Helsinki),
            to_utc_epoch_ms("2018-07-01 09:00:00", UTC)
        );
    }

    #[test]
    fn accepts_iso_separator_and_fractions() {
        assert_eq!(
            to_utc_epoch_ms("2018-11-05T13:00:00", Helsinki),
            Some(1_541_415_600_000)
        );
        assert_eq!(
            to_utc_epoch_ms("2018-11-05 13:00:00.250", Helsinki),
            Some(1_541_415_600_250)
        );
    }

    #[test]
    fn rejects_unparseable_timestamps() {
        assert_eq!(to_utc_epoch_ms("", Helsinki), None);
        assert_eq!(to_utc_epoch_ms("yesterday", Helsinki), None);
        assert_eq!(to_utc_epoch_ms("2018-13-05 13:00:00", Helsinki), None);
    }

    #[test]
    fn dst_transitions() {
        // 2018-10-28 03:30 happens twice in Helsinki, the first one is at UTC+3
        assert_eq!(
            to_utc_epoch_ms("2018-10-28 03:30:00", Helsinki),
            to_utc_epoch_ms("2018-10-28 00:30:00", UTC)
        );
        // 2018-03-25 03:30 doesn't exist in Helsinki, it's read as 04:30 summer time
        assert_eq!(
            to_utc_epoch_ms("2018-03-25 03:30:00", Helsinki),
            to_utc_epoch_ms("2018-03-25 01:30:00", UTC)
        );
    }
}
