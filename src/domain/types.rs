//! Shared types for the open house gateway

use chrono::{NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Newtype wrapper for person (card holder) IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct IdentityId(pub i64);

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reader device ID as reported by the access controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DeviceId(pub i32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reader location ID as reported by the access controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LocationId(pub i32);

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Door ID used by open house windows and the door directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DoorId(pub i32);

impl std::fmt::Display for DoorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of the reader's own access decision for a scan
///
/// Deserializes through `FromStr`, so JSON accepts the same spellings as the
/// line protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanOutcome {
    Granted,
    Denied,
}

impl ScanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::Granted => "granted",
            ScanOutcome::Denied => "denied",
        }
    }
}

impl FromStr for ScanOutcome {
    type Err = ScanParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "granted" | "1" => Ok(ScanOutcome::Granted),
            "denied" | "0" => Ok(ScanOutcome::Denied),
            _ => Err(ScanParseError::UnknownOutcome(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for ScanOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A single card scan at a reader. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub identity: IdentityId,
    pub device: DeviceId,
    pub location: LocationId,
    /// Facility-local wall clock time of the scan
    pub scan_time: NaiveDateTime,
    pub outcome: ScanOutcome,
}

impl ScanEvent {
    /// True when both scans came from the same person at the same physical reader
    #[inline]
    pub fn same_reader_and_identity(&self, other: &ScanEvent) -> bool {
        self.identity == other.identity
            && self.device == other.device
            && self.location == other.location
    }
}

/// Errors produced while decoding scans from the reader driver
#[derive(Debug, Error)]
pub enum ScanParseError {
    /// The reader reported an outcome we do not know how to interpret
    #[error("unrecognized scan outcome '{0}'")]
    UnknownOutcome(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("invalid timestamp '{0}', expected YYYY-MM-DDTHH:MM:SS")]
    InvalidTimestamp(String),

    #[error("invalid JSON scan: {0}")]
    Json(#[from] serde_json::Error),
}

/// A named, weekday-scoped period in which open house can be started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenHouseWindow {
    pub name: String,
    pub day_of_week: Weekday,
    /// First time of day a double tap may start the open house
    pub start: NaiveTime,
    /// Exclusive end; doors relock here
    pub end: NaiveTime,
    pub door_ids: Vec<DoorId>,
}

impl OpenHouseWindow {
    /// Whether `now` falls on this window's day inside `[start, end)`
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        use chrono::Datelike;
        let time = now.time();
        now.weekday() == self.day_of_week && self.start <= time && time < self.end
    }
}

/// Convert a 0=Monday..6=Sunday number into a weekday
pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

/// Parse a facility-local timestamp, with or without fractional seconds
pub fn parse_local_timestamp(s: &str) -> Result<NaiveDateTime, ScanParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| ScanParseError::InvalidTimestamp(s.to_string()))
}

/// Parse a time of day written as `HH:MM` or `HH:MM:SS`
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Serde helper for `HH:MM[:SS]` strings in config files
pub fn deserialize_time_of_day<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimeOfDayVisitor;

    impl<'de> Visitor<'de> for TimeOfDayVisitor {
        type Value = NaiveTime;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a time of day string like \"09:00\" or \"09:00:00\"")
        }

        fn visit_str<E>(self, value: &str) -> Result<NaiveTime, E>
        where
            E: de::Error,
        {
            parse_time_of_day(value)
                .ok_or_else(|| E::custom(format!("invalid time of day '{value}'")))
        }
    }

    deserializer.deserialize_str(TimeOfDayVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    #[test]
    fn test_outcome_from_str() {
        assert_eq!("granted".parse::<ScanOutcome>().unwrap(), ScanOutcome::Granted);
        assert_eq!("DENIED".parse::<ScanOutcome>().unwrap(), ScanOutcome::Denied);
        assert_eq!("1".parse::<ScanOutcome>().unwrap(), ScanOutcome::Granted);
        assert!(matches!(
            "maybe".parse::<ScanOutcome>(),
            Err(ScanParseError::UnknownOutcome(_))
        ));
    }

    #[test]
    fn test_outcome_deserialize_matches_from_str() {
        let outcomes: Vec<ScanOutcome> = serde_json::from_str(r#"["GRANTED","0","1"]"#).unwrap();
        assert_eq!(outcomes, vec![ScanOutcome::Granted, ScanOutcome::Denied, ScanOutcome::Granted]);

        let err = serde_json::from_str::<ScanOutcome>(r#""maybe""#).unwrap_err();
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn test_weekday_from_index() {
        assert_eq!(weekday_from_index(0), Some(Weekday::Mon));
        assert_eq!(weekday_from_index(5), Some(Weekday::Sat));
        assert_eq!(weekday_from_index(6), Some(Weekday::Sun));
        assert_eq!(weekday_from_index(7), None);
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("09:00"), NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(parse_time_of_day("13:30:15"), NaiveTime::from_hms_opt(13, 30, 15));
        assert_eq!(parse_time_of_day("25:00"), None);
        assert_eq!(parse_time_of_day("noon"), None);
    }

    #[test]
    fn test_parse_local_timestamp() {
        let ts = parse_local_timestamp("2026-10-17T10:00:05").unwrap();
        assert_eq!(ts, at(2026, 10, 17, 10, 0) + chrono::Duration::seconds(5));
        assert!(parse_local_timestamp("2026-10-17T10:00:05.250").is_ok());
        assert!(parse_local_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_window_contains() {
        // 2026-10-17 is a Saturday
        let window = OpenHouseWindow {
            name: "saturday-am".to_string(),
            day_of_week: Weekday::Sat,
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            door_ids: vec![DoorId(7)],
        };

        assert!(window.contains(at(2026, 10, 17, 9, 0)));
        assert!(window.contains(at(2026, 10, 17, 11, 59)));
        assert!(!window.contains(at(2026, 10, 17, 12, 0))); // end is exclusive
        assert!(!window.contains(at(2026, 10, 17, 8, 59)));
        assert!(!window.contains(at(2026, 10, 18, 10, 0))); // Sunday
    }
}
