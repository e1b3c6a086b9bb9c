//! GTFS-RT feed decoding and the in-memory snapshot model.
//!
//! A decoded feed is converted once into a [`FeedSnapshot`] of plain owned
//! records, so the reconciliation code never touches protobuf types. The
//! conversion is also where the explicit-delay rule is enforced: when a
//! stop time event carries both a delay and an absolute time, only the
//! delay survives.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use prost::Message;
use tracing::{debug, warn};

use crate::error::GtfsError;
use crate::time::parse_service_date;

/// Maximum allowed protobuf payload size (50 MB)
const MAX_PROTOBUF_SIZE: usize = 50 * 1024 * 1024;

/// Decode a raw GTFS-RT protobuf payload.
pub fn decode_feed(bytes: &[u8]) -> Result<gtfs_realtime::FeedMessage, GtfsError> {
    if bytes.len() > MAX_PROTOBUF_SIZE {
        return Err(GtfsError::ParseError(format!(
            "GTFS-RT payload too large: {} bytes (max {} bytes)",
            bytes.len(),
            MAX_PROTOBUF_SIZE
        )));
    }
    gtfs_realtime::FeedMessage::decode(bytes).map_err(GtfsError::from)
}

/// Timing reported for one stop time event.
///
/// At most one of the protobuf's `delay` and `time` fields is carried
/// over. When a feed sets both, the explicit delay wins, so downstream
/// code cannot recompute a delay the agency already published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTiming {
    /// Explicit delay in seconds relative to the schedule (negative = early).
    Delay(i32),
    /// Raw time value, normally seconds since the Unix epoch.
    Time(i64),
    /// No usable timing reported.
    Unspecified,
}

impl EventTiming {
    fn from_event(event: Option<&gtfs_realtime::trip_update::StopTimeEvent>) -> Self {
        match event {
            Some(ev) => match (ev.delay, ev.time) {
                (Some(delay), _) => EventTiming::Delay(delay),
                (None, Some(time)) => EventTiming::Time(time),
                (None, None) => EventTiming::Unspecified,
            },
            None => EventTiming::Unspecified,
        }
    }
}

/// Schedule relationship of a stop time update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopRelationship {
    #[default]
    Scheduled,
    /// The vehicle will not serve this stop.
    Skipped,
    /// No realtime information for this stop.
    NoData,
}

impl StopRelationship {
    fn from_raw(raw: Option<i32>) -> Self {
        match raw {
            Some(1) => StopRelationship::Skipped,
            Some(2) => StopRelationship::NoData,
            // 0 = SCHEDULED; unknown values get the proto default
            _ => StopRelationship::Scheduled,
        }
    }
}

/// One stop time update, detached from the protobuf representation.
#[derive(Debug, Clone)]
pub struct StopTimeUpdateRecord {
    pub stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub arrival: EventTiming,
    pub departure: EventTiming,
    pub relationship: StopRelationship,
}

impl StopTimeUpdateRecord {
    fn from_proto(stu: &gtfs_realtime::trip_update::StopTimeUpdate) -> Self {
        Self {
            stop_sequence: stu.stop_sequence,
            stop_id: stu.stop_id.clone(),
            arrival: EventTiming::from_event(stu.arrival.as_ref()),
            departure: EventTiming::from_event(stu.departure.as_ref()),
            relationship: StopRelationship::from_raw(stu.schedule_relationship),
        }
    }
}

/// All realtime data for one trip.
#[derive(Debug, Clone)]
pub struct TripUpdateRecord {
    pub trip_id: String,
    pub route_id: Option<String>,
    /// Service date announced by the trip descriptor, if any.
    pub start_date: Option<NaiveDate>,
    /// Trip-level delay, the feed's own propagation seed.
    pub trip_delay: Option<i32>,
    pub stop_updates: Vec<StopTimeUpdateRecord>,
}

/// One vehicle position report.
#[derive(Debug, Clone)]
pub struct VehicleRecord {
    pub vehicle_id: String,
    /// Trip the vehicle is serving. `None` means the vehicle is
    /// deadheading or otherwise unassigned.
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub latitude: Option<f32>,
    pub longitude: Option<f32>,
    pub bearing: Option<f32>,
    pub speed: Option<f32>,
    pub current_stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    /// Raw VehicleStopStatus enum value.
    pub current_status: Option<i32>,
    pub timestamp: Option<u64>,
}

impl VehicleRecord {
    fn from_proto(entity: &gtfs_realtime::FeedEntity, vp: &gtfs_realtime::VehiclePosition) -> Self {
        // Vehicles without a descriptor id are keyed by their entity id
        let vehicle_id = vp
            .vehicle
            .as_ref()
            .and_then(|v| v.id.clone())
            .unwrap_or_else(|| entity.id.clone());

        let (latitude, longitude, bearing, speed) = match &vp.position {
            Some(p) => (Some(p.latitude), Some(p.longitude), p.bearing, p.speed),
            None => (None, None, None, None),
        };

        Self {
            vehicle_id,
            trip_id: vp.trip.as_ref().and_then(|t| t.trip_id.clone()),
            route_id: vp.trip.as_ref().and_then(|t| t.route_id.clone()),
            latitude,
            longitude,
            bearing,
            speed,
            current_stop_sequence: vp.current_stop_sequence,
            stop_id: vp.stop_id.clone(),
            current_status: vp.current_status,
            timestamp: vp.timestamp,
        }
    }
}

/// A decoded GTFS-RT feed at one point in time.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    /// trip_id -> realtime update (first entity wins on duplicates)
    pub trip_updates: HashMap<String, TripUpdateRecord>,
    pub vehicles: Vec<VehicleRecord>,
    /// Timestamp from the feed header, kept for diagnostics.
    pub feed_timestamp: Option<u64>,
    /// When this snapshot was received, the basis for staleness checks.
    pub received_at: DateTime<Utc>,
}

impl FeedSnapshot {
    /// Convert a decoded feed message into a snapshot.
    pub fn from_feed(feed: &gtfs_realtime::FeedMessage, received_at: DateTime<Utc>) -> Self {
        let mut trip_updates: HashMap<String, TripUpdateRecord> = HashMap::new();
        let mut vehicles = Vec::new();

        for entity in &feed.entity {
            if let Some(trip_update) = &entity.trip_update {
                let Some(ref trip_id) = trip_update.trip.trip_id else {
                    debug!(entity = %entity.id, "Trip update without trip_id, skipping");
                    continue;
                };
                if trip_updates.contains_key(trip_id.as_str()) {
                    warn!(trip_id = %trip_id, "Duplicate trip update in feed, keeping the first");
                    continue;
                }

                let record = TripUpdateRecord {
                    trip_id: trip_id.clone(),
                    route_id: trip_update.trip.route_id.clone(),
                    start_date: trip_update
                        .trip
                        .start_date
                        .as_ref()
                        .and_then(|d| parse_service_date(d)),
                    trip_delay: trip_update.delay,
                    stop_updates: trip_update
                        .stop_time_update
                        .iter()
                        .map(StopTimeUpdateRecord::from_proto)
                        .collect(),
                };
                trip_updates.insert(trip_id.clone(), record);
            }

            if let Some(vp) = &entity.vehicle {
                vehicles.push(VehicleRecord::from_proto(entity, vp));
            }
        }

        debug!(
            trip_updates = trip_updates.len(),
            vehicles = vehicles.len(),
            "Converted GTFS-RT feed into snapshot"
        );

        FeedSnapshot {
            trip_updates,
            vehicles,
            feed_timestamp: feed.header.timestamp,
            received_at,
        }
    }

    /// Age of the snapshot relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.received_at
    }

    /// Whether the snapshot is too old to trust. A snapshot exactly at the
    /// threshold still counts as fresh.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.age(now) > threshold
    }
}
