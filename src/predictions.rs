//! Assembly of rider-facing predictions from vehicles and trip updates.
//!
//! The join is vehicle-driven: each vehicle with a trip assignment yields
//! one prediction per upcoming stop of that trip. Vehicles without an
//! assignment (deadheading) yield nothing, which is not an error.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PredictionConfig;
use crate::realtime::FeedSnapshot;
use crate::reconcile::{reconcile_trip, DelaySource};
use crate::schedule::GtfsSchedule;
use crate::status::{classify_status, Status};
use crate::time::service_date_for;

/// One predicted stop for one vehicle.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionRecord {
    pub vehicle_id: String,
    pub trip_id: String,
    pub route_id: String,
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub stop_sequence: u32,
    pub headsign: Option<String>,
    pub direction_id: Option<i32>,
    /// Scheduled time in the agency's timezone.
    pub scheduled_time: DateTime<Tz>,
    /// Predicted time; `None` when running on schedule data alone.
    pub predicted_time: Option<DateTime<Tz>>,
    pub delay_seconds: Option<i64>,
    pub status: Status,
    /// Seconds until the predicted (or scheduled) time, clamped to zero
    /// for stops the vehicle is overdue at.
    pub countdown_seconds: i64,
    pub source: DelaySource,
}

/// Result of one prediction pass over a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionSet {
    pub records: Vec<PredictionRecord>,
    /// True when the snapshot exceeded the staleness threshold and its
    /// realtime data was ignored.
    pub feed_stale: bool,
    pub computed_at: DateTime<Utc>,
}

/// Compute predictions for every vehicle in the snapshot.
///
/// `now` is passed in rather than read from the clock, so the same
/// snapshot and instant always produce the same records.
pub fn assemble_predictions(
    schedule: &GtfsSchedule,
    snapshot: &FeedSnapshot,
    now: DateTime<Utc>,
    tz: Tz,
    config: &PredictionConfig,
) -> PredictionSet {
    let threshold = Duration::seconds(config.staleness_threshold_secs as i64);
    let stale = snapshot.is_stale(now, threshold);
    if stale {
        warn!(
            age_secs = snapshot.age(now).num_seconds(),
            "Feed snapshot is stale, predictions fall back to schedule times"
        );
    }

    let grace = Duration::seconds(config.grace_period_secs as i64);
    let mut records = Vec::new();

    for vehicle in &snapshot.vehicles {
        let Some(trip_id) = vehicle.trip_id.as_deref() else {
            debug!(vehicle = %vehicle.vehicle_id, "Vehicle has no trip assignment, skipping");
            continue;
        };
        let Some(trip) = schedule.trips.get(trip_id) else {
            warn!(
                trip_id,
                vehicle = %vehicle.vehicle_id,
                "Vehicle references a trip missing from the schedule"
            );
            continue;
        };

        let update = if stale {
            None
        } else {
            snapshot.trip_updates.get(trip_id)
        };

        let service_date = update
            .and_then(|u| u.start_date)
            .unwrap_or_else(|| service_date_for(now, tz));

        if !schedule.is_service_active(&trip.service_id, service_date) {
            debug!(trip_id, %service_date, "Trip service not active on this date, skipping");
            continue;
        }

        for stop in reconcile_trip(schedule, update, trip_id, service_date, tz, config) {
            // Past stops drop out: by announced position when the vehicle
            // reports one, otherwise by time with a grace window
            if let Some(current_seq) = vehicle.current_stop_sequence {
                if stop.stop_sequence < current_seq {
                    continue;
                }
            } else {
                let reference = stop.predicted.unwrap_or(stop.scheduled);
                if reference.with_timezone(&Utc) < now - grace {
                    continue;
                }
            }

            let status = classify_status(stop.delay_seconds, &config.thresholds);
            let countdown_basis = stop.predicted.unwrap_or(stop.scheduled);
            let countdown_seconds = (countdown_basis.with_timezone(&Utc) - now)
                .num_seconds()
                .max(0);

            let stop_name = schedule
                .stops
                .get(&stop.stop_id)
                .and_then(|s| s.stop_name.clone());

            records.push(PredictionRecord {
                vehicle_id: vehicle.vehicle_id.clone(),
                trip_id: trip.trip_id.clone(),
                route_id: trip.route_id.clone(),
                stop_id: stop.stop_id,
                stop_name,
                stop_sequence: stop.stop_sequence,
                headsign: trip.trip_headsign.clone(),
                direction_id: trip.direction_id,
                scheduled_time: stop.scheduled,
                predicted_time: stop.predicted,
                delay_seconds: stop.delay_seconds,
                status,
                countdown_seconds,
                source: stop.source,
            });
        }
    }

    debug!(
        vehicles = snapshot.vehicles.len(),
        records = records.len(),
        feed_stale = stale,
        "Assembled prediction records"
    );

    PredictionSet {
        records,
        feed_stale: stale,
        computed_at: now,
    }
}
