//! AIS ping records and time partition bounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ship2ship_store::{Keyed, TimestampRange};

/// Knots to kilometres per hour.
pub const KNOTS_TO_KMPH: f64 = 1.852;

/// Latitude reported when the position is not available.
pub const LATITUDE_UNAVAILABLE: f64 = 91.0;

/// Longitude reported when the position is not available.
pub const LONGITUDE_UNAVAILABLE: f64 = 181.0;

/// Unique vessel identifier (the 9-digit MMSI).
///
/// The total order on ids is what the join uses to emit each unordered
/// pair exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VesselId(pub u64);

impl std::fmt::Display for VesselId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:09}", self.0)
    }
}

impl From<u64> for VesselId {
    fn from(mmsi: u64) -> Self {
        Self(mmsi)
    }
}

/// One AIS position report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub vessel_id: VesselId,

    pub vessel_name: String,

    #[serde(default)]
    pub call_sign: Option<String>,

    /// Time of the AIS message
    pub timestamp: DateTime<Utc>,

    /// Degrees in [-90, 90], or 91 when not available
    pub latitude: f64,

    /// Degrees in [-180, 180], or 181 when not available
    pub longitude: f64,

    /// Speed over ground in knots
    pub speed_over_ground: f64,

    /// True heading in degrees
    pub heading: f64,

    /// Navigational status code
    #[serde(default)]
    pub status: Option<i32>,
}

impl Ping {
    /// Speed over ground in km/h, rounded to two decimals.
    pub fn sog_kmph(&self) -> f64 {
        (self.speed_over_ground * KNOTS_TO_KMPH * 100.0).round() / 100.0
    }

    /// True if either coordinate carries the "not available" sentinel.
    pub fn has_sentinel_position(&self) -> bool {
        self.latitude == LATITUDE_UNAVAILABLE || self.longitude == LONGITUDE_UNAVAILABLE
    }
}

impl Keyed for Ping {
    fn row_key(&self) -> (u64, i64) {
        (0, self.timestamp.timestamp_millis())
    }
}

/// Inclusive time partition filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    /// Bounds in the storage layer's millisecond representation.
    pub fn to_store_range(&self) -> TimestampRange {
        TimestampRange::new(self.start.timestamp_millis(), self.end.timestamp_millis())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    /// 2018-01-31T00:00:00Z plus `offset_secs`.
    pub fn at(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 31, 0, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
    }

    /// A ping with the given motion; `speed_kmph` is converted back to knots.
    pub fn ping(
        id: u64,
        longitude: f64,
        latitude: f64,
        speed_kmph: f64,
        heading: f64,
        offset_secs: i64,
    ) -> Ping {
        Ping {
            vessel_id: VesselId(id),
            vessel_name: format!("VESSEL {}", id),
            call_sign: None,
            timestamp: at(offset_secs),
            latitude,
            longitude,
            speed_over_ground: speed_kmph / KNOTS_TO_KMPH,
            heading,
            status: Some(0),
        }
    }
}
