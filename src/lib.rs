//! Reconciliation of static GTFS schedules with GTFS-Realtime feeds.
//!
//! Loads a static GTFS schedule (ZIP) into memory, decodes GTFS-RT
//! protobuf snapshots, and joins the two into per-stop predictions:
//! one record per upcoming stop per active vehicle, carrying the
//! scheduled time, the predicted time, the delay and where it came
//! from, a rider-facing status, and a countdown.
//!
//! Fetching feeds and serving the results stay outside this crate;
//! callers hand in raw protobuf bytes and a reference instant and get
//! a [`PredictionSet`] back.

pub mod config;
pub mod error;
pub mod predictions;
pub mod realtime;
pub mod reconcile;
pub mod schedule;
pub mod status;
pub mod time;
pub mod timestamp;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

pub use config::{ConfigError, PredictionConfig, StatusThresholds};
pub use error::GtfsError;
pub use predictions::{assemble_predictions, PredictionRecord, PredictionSet};
pub use realtime::FeedSnapshot;
pub use reconcile::{reconcile_trip, DelaySource, ReconciledStop};
pub use schedule::GtfsSchedule;
pub use status::{classify_status, Status};

/// Prediction engine holding the loaded schedule behind a shared lock.
///
/// The schedule starts empty; [`GtfsPredictor::load_schedule`] fills it
/// and can be called again to swap in a newer GTFS publication without
/// interrupting readers.
pub struct GtfsPredictor {
    config: PredictionConfig,
    timezone: chrono_tz::Tz,
    schedule: Arc<RwLock<Option<GtfsSchedule>>>,
}

impl GtfsPredictor {
    pub fn new(config: PredictionConfig) -> Result<Self, ConfigError> {
        let timezone = config.parsed_timezone()?;

        Ok(Self {
            config,
            timezone,
            schedule: Arc::new(RwLock::new(None)),
        })
    }

    /// Load a static GTFS ZIP into memory, replacing any previous schedule.
    pub async fn load_schedule(&self, zip_path: &Path) -> Result<(), GtfsError> {
        let path = zip_path.to_path_buf();
        let schedule = tokio::task::spawn_blocking(move || schedule::load_schedule(&path))
            .await??;

        info!(
            stops = schedule.stops.len(),
            routes = schedule.routes.len(),
            trips = schedule.trips.len(),
            "Loaded static GTFS schedule into memory"
        );

        let mut guard = self.schedule.write().await;
        *guard = Some(schedule);

        Ok(())
    }

    /// Decode raw GTFS-RT protobuf bytes into a snapshot stamped with
    /// the given receive time.
    pub fn decode_snapshot(
        &self,
        bytes: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<FeedSnapshot, GtfsError> {
        let feed = realtime::decode_feed(bytes)?;
        Ok(FeedSnapshot::from_feed(&feed, received_at))
    }

    /// Compute predictions for every vehicle in the snapshot as of `now`.
    pub async fn compute_predictions(
        &self,
        snapshot: &FeedSnapshot,
        now: DateTime<Utc>,
    ) -> Result<PredictionSet, GtfsError> {
        let guard = self.schedule.read().await;
        let schedule = guard.as_ref().ok_or(GtfsError::ScheduleNotLoaded)?;

        Ok(assemble_predictions(
            schedule,
            snapshot,
            now,
            self.timezone,
            &self.config,
        ))
    }

    /// Check if the static schedule has been loaded.
    pub async fn is_schedule_loaded(&self) -> bool {
        self.schedule.read().await.is_some()
    }

    /// Get a shared reference to the schedule store for callers that
    /// inspect it directly.
    pub fn schedule(&self) -> Arc<RwLock<Option<GtfsSchedule>>> {
        self.schedule.clone()
    }

    /// Get the configured timezone.
    pub fn timezone(&self) -> chrono_tz::Tz {
        self.timezone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::{TripUpdateRecord, VehicleRecord};
    use crate::schedule::{GtfsCalendar, GtfsStopTime, GtfsTrip};
    use chrono::NaiveDate;
    use prost::Message;
    use std::collections::HashMap;

    fn empty_snapshot(received_at: DateTime<Utc>) -> FeedSnapshot {
        FeedSnapshot {
            trip_updates: HashMap::new(),
            vehicles: Vec::new(),
            feed_timestamp: None,
            received_at,
        }
    }

    fn one_trip_schedule() -> GtfsSchedule {
        let mut trips = HashMap::new();
        trips.insert(
            "trip_1".to_string(),
            GtfsTrip {
                trip_id: "trip_1".to_string(),
                route_id: "route_1".to_string(),
                service_id: "daily".to_string(),
                trip_headsign: None,
                direction_id: None,
            },
        );

        let mut stop_times = HashMap::new();
        stop_times.insert(
            "trip_1".to_string(),
            vec![GtfsStopTime {
                stop_sequence: 1,
                stop_id: "stop_X".to_string(),
                arrival_time: Some(36000), // 10:00:00
                departure_time: None,
            }],
        );

        let mut calendars = HashMap::new();
        calendars.insert(
            "daily".to_string(),
            GtfsCalendar {
                service_id: "daily".to_string(),
                days: [true; 7],
                start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            },
        );

        GtfsSchedule {
            stops: HashMap::new(),
            routes: HashMap::new(),
            trips,
            stop_times,
            calendars,
            calendar_dates: HashMap::new(),
            loaded_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_rejects_invalid_timezone() {
        let config = PredictionConfig {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..PredictionConfig::default()
        };
        let err = GtfsPredictor::new(config).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidTimezone(_)));
    }

    #[tokio::test]
    async fn test_schedule_not_loaded_initially() {
        let predictor = GtfsPredictor::new(PredictionConfig::default()).unwrap();
        assert!(!predictor.is_schedule_loaded().await);
    }

    #[tokio::test]
    async fn test_compute_before_load_fails() {
        let predictor = GtfsPredictor::new(PredictionConfig::default()).unwrap();
        let now = Utc::now();
        let result = predictor.compute_predictions(&empty_snapshot(now), now).await;
        assert!(matches!(result, Err(GtfsError::ScheduleNotLoaded)));
    }

    #[tokio::test]
    async fn test_compute_with_loaded_schedule() {
        let predictor = GtfsPredictor::new(PredictionConfig::default()).unwrap();
        {
            let store = predictor.schedule();
            let mut guard = store.write().await;
            *guard = Some(one_trip_schedule());
        }
        assert!(predictor.is_schedule_loaded().await);

        // 09:00 UTC, one vehicle on trip_1 an hour before its stop
        let now = DateTime::from_timestamp(1_752_570_000, 0).unwrap();
        let mut snapshot = empty_snapshot(now);
        snapshot.vehicles.push(VehicleRecord {
            vehicle_id: "v1".to_string(),
            trip_id: Some("trip_1".to_string()),
            route_id: None,
            latitude: None,
            longitude: None,
            bearing: None,
            speed: None,
            current_stop_sequence: Some(1),
            stop_id: None,
            current_status: None,
            timestamp: None,
        });
        snapshot.trip_updates.insert(
            "trip_1".to_string(),
            TripUpdateRecord {
                trip_id: "trip_1".to_string(),
                route_id: None,
                start_date: None,
                trip_delay: Some(45),
                stop_updates: vec![],
            },
        );

        let set = predictor
            .compute_predictions(&snapshot, now)
            .await
            .unwrap();
        assert_eq!(set.records.len(), 1);
        assert_eq!(set.records[0].delay_seconds, Some(45));
        assert_eq!(set.records[0].status, Status::OnTime);
    }

    #[tokio::test]
    async fn test_decode_snapshot_stamps_receive_time() {
        let predictor = GtfsPredictor::new(PredictionConfig::default()).unwrap();
        let feed = gtfs_realtime::FeedMessage {
            header: gtfs_realtime::FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                incrementality: Some(0),
                timestamp: Some(1_752_595_200),
                feed_version: None,
            },
            entity: vec![],
        };
        let bytes = feed.encode_to_vec();

        let received_at = Utc::now();
        let snapshot = predictor.decode_snapshot(&bytes, received_at).unwrap();
        assert_eq!(snapshot.received_at, received_at);
        assert_eq!(snapshot.feed_timestamp, Some(1_752_595_200));
        assert!(snapshot.vehicles.is_empty());
    }

    #[tokio::test]
    async fn test_decode_snapshot_rejects_garbage() {
        let predictor = GtfsPredictor::new(PredictionConfig::default()).unwrap();
        let result = predictor.decode_snapshot(&[0xff, 0xff, 0xff, 0xff], Utc::now());
        assert!(matches!(result, Err(GtfsError::ProtobufError(_))));
    }
}
