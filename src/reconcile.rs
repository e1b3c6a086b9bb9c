//! Reconciliation of realtime trip updates against the static schedule.
//!
//! Walks a trip's scheduled stops in sequence order and attaches the best
//! available delay to each one. An explicit delay from the feed is carried
//! verbatim; it is never recomputed from predicted and scheduled times, so
//! a feed that says -28 seconds yields exactly -28 seconds downstream. Raw
//! times are only used to derive a delay when no explicit delay exists for
//! the stop.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PredictionConfig;
use crate::realtime::{EventTiming, StopRelationship, StopTimeUpdateRecord, TripUpdateRecord};
use crate::schedule::GtfsSchedule;
use crate::time::{scheduled_local_instant, to_local};
use crate::timestamp::{classify_timestamp, TimestampKind};

/// How the delay figure for a stop was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelaySource {
    /// The stop's own update reported it.
    Realtime,
    /// Inherited from an earlier stop or the trip-level delay.
    Propagated,
    /// No realtime coverage, schedule only.
    Schedule,
}

/// One scheduled stop with its reconciled realtime state.
#[derive(Debug, Clone)]
pub struct ReconciledStop {
    pub stop_id: String,
    pub stop_sequence: u32,
    /// Scheduled time in the agency's timezone.
    pub scheduled: DateTime<Tz>,
    /// `scheduled` shifted by the delay; `None` without realtime data.
    pub predicted: Option<DateTime<Tz>>,
    pub delay_seconds: Option<i64>,
    pub source: DelaySource,
}

/// The timing used for a stop's own record. Explicit delays outrank raw
/// times, and arrival outranks departure within each class.
fn effective_timing(stu: &StopTimeUpdateRecord) -> EventTiming {
    match (stu.arrival, stu.departure) {
        (EventTiming::Delay(d), _) => EventTiming::Delay(d),
        (_, EventTiming::Delay(d)) => EventTiming::Delay(d),
        (EventTiming::Time(t), _) => EventTiming::Time(t),
        (_, EventTiming::Time(t)) => EventTiming::Time(t),
        _ => EventTiming::Unspecified,
    }
}

/// Reconcile one trip's scheduled stops with its realtime update.
///
/// Stops are emitted in stop_sequence order. Skipped stops produce no
/// record at all. Stops the update does not cover inherit the most recent
/// explicit delay (or the trip-level delay); stops before any realtime
/// coverage stay schedule-only with an unknown delay.
pub fn reconcile_trip(
    schedule: &GtfsSchedule,
    update: Option<&TripUpdateRecord>,
    trip_id: &str,
    service_date: NaiveDate,
    tz: Tz,
    config: &PredictionConfig,
) -> Vec<ReconciledStop> {
    let Some(stop_times) = schedule.trip_stop_times(trip_id) else {
        warn!(trip_id, "No scheduled stop times for trip referenced by realtime data");
        return Vec::new();
    };

    // Build lookups for StopTimeUpdates by stop_id and stop_sequence
    let stu_by_stop: HashMap<&str, &StopTimeUpdateRecord> = update
        .map(|u| {
            u.stop_updates
                .iter()
                .filter_map(|stu| stu.stop_id.as_deref().map(|sid| (sid, stu)))
                .collect()
        })
        .unwrap_or_default();

    let stu_by_seq: HashMap<u32, &StopTimeUpdateRecord> = update
        .map(|u| {
            u.stop_updates
                .iter()
                .filter_map(|stu| stu.stop_sequence.map(|seq| (seq, stu)))
                .collect()
        })
        .unwrap_or_default();

    // Trip-level delay seeds the propagation chain
    let mut propagated: Option<i32> = update.and_then(|u| u.trip_delay);

    let mut reconciled = Vec::new();

    for st in stop_times {
        let stu = stu_by_stop
            .get(st.stop_id.as_str())
            .or_else(|| stu_by_seq.get(&(st.stop_sequence as u32)))
            .copied();

        if let Some(stu) = stu {
            if stu.relationship == StopRelationship::Skipped {
                continue;
            }
            if stu.relationship != StopRelationship::NoData {
                // Departure delay preferred for downstream propagation
                if let EventTiming::Delay(d) = stu.departure {
                    propagated = Some(d);
                } else if let EventTiming::Delay(d) = stu.arrival {
                    propagated = Some(d);
                }
            }
        }

        let Some(scheduled_secs) = st.arrival_time.or(st.departure_time) else {
            debug!(trip_id, stop_id = %st.stop_id, "Stop time has no arrival or departure, skipping");
            continue;
        };
        let Some(scheduled) = scheduled_local_instant(i64::from(scheduled_secs), service_date, tz)
        else {
            debug!(
                trip_id,
                stop_id = %st.stop_id,
                "Scheduled time has no local representation, skipping"
            );
            continue;
        };

        let mut delay: Option<i64> = None;
        let mut source = DelaySource::Schedule;

        if let Some(stu) = stu {
            if stu.relationship != StopRelationship::NoData {
                match effective_timing(stu) {
                    EventTiming::Delay(d) => {
                        delay = Some(i64::from(d));
                        source = DelaySource::Realtime;
                    }
                    EventTiming::Time(raw) => {
                        let actual = match classify_timestamp(
                            raw,
                            config.time_of_day_ceiling_secs,
                            config.epoch_cutoff,
                        ) {
                            TimestampKind::Absolute => to_local(raw, tz),
                            TimestampKind::TimeOfDay => {
                                scheduled_local_instant(raw, service_date, tz)
                            }
                            TimestampKind::Indeterminate => {
                                warn!(
                                    trip_id,
                                    stop_id = %st.stop_id,
                                    value = raw,
                                    "Ambiguous raw time in stop time update, reading as time-of-day"
                                );
                                scheduled_local_instant(raw, service_date, tz)
                            }
                        };
                        if let Some(actual) = actual {
                            delay = Some((actual - scheduled).num_seconds());
                            source = DelaySource::Realtime;
                        }
                    }
                    EventTiming::Unspecified => {}
                }
            }
        }

        if delay.is_none() {
            if let Some(p) = propagated {
                delay = Some(i64::from(p));
                source = DelaySource::Propagated;
            }
        }

        // Predicted time is always scheduled + delay, keeping the delay
        // figure and the time pair self-consistent
        let predicted = delay.map(|d| scheduled + Duration::seconds(d));

        reconciled.push(ReconciledStop {
            stop_id: st.stop_id.clone(),
            stop_sequence: st.stop_sequence as u32,
            scheduled,
            predicted,
            delay_seconds: delay,
            source,
        });
    }

    reconciled
}
