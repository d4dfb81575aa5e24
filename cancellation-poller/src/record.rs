use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

/// Version of the `TripCancellation` payload, required by downstream consumers.
pub const SCHEMA_VERSION: u32 = 1;

/// A text column held a value outside of its closed set of variants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{value:?} is not a valid {kind}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares an enum that maps 1:1 to the text values of a database column, and doubles
/// as a protobuf enumeration on the wire.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $tag:literal => $text:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
        #[repr(i32)]
        pub enum $name {
            $($variant = $tag,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    invalid => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: invalid.to_owned(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Cancellation state of a trip.
/// Canceled: the trip will not run, or only partially, per `AffectedDeparturesType`.
/// Running: an earlier cancellation of the trip has been retracted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Status {
    Canceled = 0,
    Running = 1,
}

text_enum! {
    DeviationCasesType {
        CancelDeparture = 0 => "CANCEL_DEPARTURE",
        Detour = 1 => "DETOUR",
        JourneyPatternChange = 2 => "JOURNEY_PATTERN_CHANGE",
        EarlyDeparture = 3 => "EARLY_DEPARTURE",
        EarlyDepartureFromTimingPoint = 4 => "EARLY_DEPARTURE_FROM_TIMING_POINT",
        LateDeparture = 5 => "LATE_DEPARTURE",
        DepartedAfterNextJourney = 6 => "DEPARTED_AFTER_NEXT_JOURNEY",
        BlockFirstDepartureLate = 7 => "BLOCK_FIRST_DEPARTURE_LATE",
        TisError = 8 => "TIS_ERROR",
        Unknown = 9 => "UNKNOWN",
    }
}

text_enum! {
    AffectedDeparturesType {
        CancelEntireDeparture = 0 => "CANCEL_ENTIRE_DEPARTURE",
        CancelStopsFromStart = 1 => "CANCEL_STOPS_FROM_START",
        CancelStopsFromMiddle = 2 => "CANCEL_STOPS_FROM_MIDDLE",
        CancelStopsFromEnd = 3 => "CANCEL_STOPS_FROM_END",
        Unknown = 4 => "UNKNOWN",
    }
}

text_enum! {
    Category {
        Accident = 0 => "ACCIDENT",
        Assault = 1 => "ASSAULT",
        Disturbance = 2 => "DISTURBANCE",
        EarlierDisruption = 3 => "EARLIER_DISRUPTION",
        EmployeeIllness = 4 => "EMPLOYEE_ILLNESS",
        ExceptionalWeather = 5 => "EXCEPTIONAL_WEATHER",
        HeavyTraffic = 6 => "HEAVY_TRAFFIC",
        ItsSystemError = 7 => "ITS_SYSTEM_ERROR",
        MedicalIncident = 8 => "MEDICAL_INCIDENT",
        MisparkedVehicle = 9 => "MISPARKED_VEHICLE",
        MissingDriver = 10 => "MISSING_DRIVER",
        NoTrafficDisruption = 11 => "NO_TRAFFIC_DISRUPTION",
        Other = 12 => "OTHER",
        OtherDriverError = 13 => "OTHER_DRIVER_ERROR",
        PowerFailure = 14 => "POWER_FAILURE",
        PublicEvent = 15 => "PUBLIC_EVENT",
        RoadClosed = 16 => "ROAD_CLOSED",
        RoadMaintenance = 17 => "ROAD_MAINTENANCE",
        RoadTrench = 18 => "ROAD_TRENCH",
        Seizure = 19 => "SEIZURE",
        StaffDeficit = 20 => "STAFF_DEFICIT",
        StateVisit = 21 => "STATE_VISIT",
        Strike = 22 => "STRIKE",
        SwitchFailure = 23 => "SWITCH_FAILURE",
        TechnicalFailure = 24 => "TECHNICAL_FAILURE",
        TestData = 25 => "TEST_DATA",
        TrackBlocked = 26 => "TRACK_BLOCKED",
        TrackMaintenance = 27 => "TRACK_MAINTENANCE",
        TrafficAccident = 28 => "TRAFFIC_ACCIDENT",
        TrafficJam = 29 => "TRAFFIC_JAM",
        VehicleBreakdown = 30 => "VEHICLE_BREAKDOWN",
        VehicleDeficit = 31 => "VEHICLE_DEFICIT",
        VehicleOffSchedule = 32 => "VEHICLE_OFF_SCHEDULE",
        Weather = 33 => "WEATHER",
        Unknown = 34 => "UNKNOWN",
    }
}

text_enum! {
    SubCategory {
        AssaultOnDriver = 0 => "ASSAULT_ON_DRIVER",
        AssaultOnPassenger = 1 => "ASSAULT_ON_PASSENGER",
        AssaultOnVehicle = 2 => "ASSAULT_ON_VEHICLE",
        BridgeOpening = 3 => "BRIDGE_OPENING",
        CongestionCausedByAccident = 4 => "CONGESTION_CAUSED_BY_ACCIDENT",
        DriverError = 5 => "DRIVER_ERROR",
        DriverSeizure = 6 => "DRIVER_SEIZURE",
        EarlierDisruption = 7 => "EARLIER_DISRUPTION",
        ExceptionalWeather = 8 => "EXCEPTIONAL_WEATHER",
        FaultyEquipment = 9 => "FAULTY_EQUIPMENT",
        Fire = 10 => "FIRE",
        Flooding = 11 => "FLOODING",
        InsufficientCapacity = 12 => "INSUFFICIENT_CAPACITY",
        ItsSystemError = 13 => "ITS_SYSTEM_ERROR",
        MissingDriver = 14 => "MISSING_DRIVER",
        MissingVehicle = 15 => "MISSING_VEHICLE",
        Other = 16 => "OTHER",
        PowerFailure = 17 => "POWER_FAILURE",
        RoadClosed = 18 => "ROAD_CLOSED",
        RoadMaintenance = 19 => "ROAD_MAINTENANCE",
        StaffDeficit = 20 => "STAFF_DEFICIT",
        Strike = 21 => "STRIKE",
        SwitchFailure = 22 => "SWITCH_FAILURE",
        TechnicalFailure = 23 => "TECHNICAL_FAILURE",
        TrafficAccident = 24 => "TRAFFIC_ACCIDENT",
        TrafficJam = 25 => "TRAFFIC_JAM",
        VehicleBreakdown = 26 => "VEHICLE_BREAKDOWN",
        Unknown = 27 => "UNKNOWN",
    }
}

/// One trip cancellation (or retraction of one) as observed in the database during a poll.
/// Records are built fresh every cycle and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancellationRecord {
    pub trip_id: String,
    pub deviation_case_id: String,
    pub route_id: String,
    pub direction_id: i32,
    pub operating_day: NaiveDate,
    pub start_time: NaiveTime,
    pub status: Status,
    pub deviation_case_type: DeviationCasesType,
    pub affected_departures_type: AffectedDeparturesType,
    pub category: Option<Category>,
    pub sub_category: Option<SubCategory>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub last_modified_epoch_ms: i64,
}

impl CancellationRecord {
    /// Human readable trip description for logs: route/direction-start_time-operating_day.
    pub fn describe(&self) -> String {
        format!(
            "{}/{}-{}-{}",
            self.route_id,
            self.direction_id,
            self.start_time.format("%H:%M:%S"),
            self.operating_day.format("%Y%m%d"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_values() {
        assert_eq!(
            "CANCEL_DEPARTURE".parse::<DeviationCasesType>(),
            Ok(DeviationCasesType::CancelDeparture)
        );
        assert_eq!(
            "CANCEL_STOPS_FROM_END".parse::<AffectedDeparturesType>(),
            Ok(AffectedDeparturesType::CancelStopsFromEnd)
        );
        assert_eq!("STRIKE".parse::<Category>(), Ok(Category::Strike));
        assert_eq!(
            "DRIVER_SEIZURE".parse::<SubCategory>(),
            Ok(SubCategory::DriverSeizure)
        );
    }

    #[test]
    fn rejects_unknown_values() {
        let err = "cancel_departure"
            .parse::<DeviationCasesType>()
            .expect_err("lookup should be case sensitive");
        assert_eq!(err.kind, "DeviationCasesType");
        assert_eq!(err.value, "cancel_departure");
        assert_eq!(
            err.to_string(),
            "\"cancel_departure\" is not a valid DeviationCasesType"
        );

        assert!("".parse::<Category>().is_err());
    }

    #[test]
    fn text_round_trips_through_display() {
        for category in [Category::Accident, Category::Weather, Category::Unknown] {
            assert_eq!(category.to_string().parse::<Category>(), Ok(category));
        }
    }

    #[test]
    fn describe_trip() {
        let record = CancellationRecord {
            trip_id: "1".to_owned(),
            deviation_case_id: "2".to_owned(),
            route_id: "7575".to_owned(),
            direction_id: 2,
            operating_day: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
            start_time: NaiveTime::from_hms_opt(11, 22, 0).unwrap(),
            status: Status::Canceled,
            deviation_case_type: DeviationCasesType::CancelDeparture,
            affected_departures_type: AffectedDeparturesType::CancelEntireDeparture,
            category: None,
            sub_category: None,
            title: None,
            description: None,
            last_modified_epoch_ms: 0,
        };
        assert_eq!(record.describe(), "7575/2-11:22:00-20180101");
    }
}
