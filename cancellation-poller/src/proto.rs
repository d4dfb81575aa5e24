//! Protobuf payload for trip cancellation events.
//!
//! Field tags are part of the contract with downstream consumers: never reuse or renumber them.
use prost::Message;

use crate::record::{
    AffectedDeparturesType, CancellationRecord, Category, DeviationCasesType, Status, SubCategory,
    SCHEMA_VERSION,
};

/// Header naming the protobuf schema of the payload.
pub const PROTOBUF_SCHEMA_HEADER: &str = "protobuf-schema";
/// Header carrying the dated vehicle journey id, i.e. the trip id.
pub const DVJ_ID_HEADER: &str = "dvj-id";
/// Schema identifier of `TripCancellation` payloads.
pub const TRIP_CANCELLATION_SCHEMA: &str = "InternalMessagesTripCancellation";

#[derive(Clone, PartialEq, Message)]
pub struct TripCancellation {
    #[prost(uint32, tag = "1")]
    pub schema_version: u32,
    #[prost(string, tag = "2")]
    pub route_id: String,
    #[prost(int32, tag = "3")]
    pub direction_id: i32,
    /// Operating day as `YYYYMMDD`.
    #[prost(string, tag = "4")]
    pub start_date: String,
    /// Local start time as `HH:MM:SS`.
    #[prost(string, tag = "5")]
    pub start_time: String,
    #[prost(enumeration = "Status", tag = "6")]
    pub status: i32,
    #[prost(string, tag = "7")]
    pub trip_id: String,
    #[prost(string, tag = "8")]
    pub deviation_case_id: String,
    #[prost(enumeration = "DeviationCasesType", tag = "9")]
    pub deviation_cases_type: i32,
    #[prost(enumeration = "AffectedDeparturesType", tag = "10")]
    pub affected_departures_type: i32,
    #[prost(enumeration = "Category", optional, tag = "11")]
    pub category: Option<i32>,
    #[prost(enumeration = "SubCategory", optional, tag = "12")]
    pub sub_category: Option<i32>,
    #[prost(string, optional, tag = "13")]
    pub title: Option<String>,
    #[prost(string, optional, tag = "14")]
    pub description: Option<String>,
    #[prost(int64, tag = "15")]
    pub last_modified: i64,
}

impl From<&CancellationRecord> for TripCancellation {
    fn from(record: &CancellationRecord) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            route_id: record.route_id.clone(),
            direction_id: record.direction_id,
            start_date: record.operating_day.format("%Y%m%d").to_string(),
            start_time: record.start_time.format("%H:%M:%S").to_string(),
            status: record.status as i32,
            trip_id: record.trip_id.clone(),
            deviation_case_id: record.deviation_case_id.clone(),
            deviation_cases_type: record.deviation_case_type as i32,
            affected_departures_type: record.affected_departures_type as i32,
            category: record.category.map(|c| c as i32),
            sub_category: record.sub_category.map(|c| c as i32),
            title: record.title.clone(),
            description: record.description.clone(),
            last_modified: record.last_modified_epoch_ms,
        }
    }
}

/// Serialize a record into its binary event payload.
pub fn encode(record: &CancellationRecord) -> Vec<u8> {
    TripCancellation::from(record).encode_to_vec()
}
