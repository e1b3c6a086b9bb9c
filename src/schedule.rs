//! The static side of prediction: GTFS schedule data loaded from a ZIP.
//!
//! Parsing is header-position based so column order and unknown extra
//! columns never matter. Rows missing their required key are dropped and
//! counted rather than failing the whole load.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use tracing::{info, warn};

use crate::error::GtfsError;
use crate::time::parse_service_date;

/// Refuse archives whose entries claim more than this much unpacked data (2 GB).
const MAX_UNPACKED_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Stop record from stops.txt. Coordinates ride along for consumers that
/// place predictions on a map; nothing in this crate reads them.
#[derive(Debug, Clone)]
pub struct GtfsStop {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// Route record from routes.txt.
#[derive(Debug, Clone)]
pub struct GtfsRoute {
    pub route_id: String,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
    pub route_type: Option<i32>,
}

/// Trip record from trips.txt, carrying the display context predictions
/// get enriched with.
#[derive(Debug, Clone)]
pub struct GtfsTrip {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub trip_headsign: Option<String>,
    pub direction_id: Option<i32>,
}

/// One row of stop_times.txt.
#[derive(Debug, Clone)]
pub struct GtfsStopTime {
    pub stop_sequence: i32,
    pub stop_id: String,
    /// Seconds since local midnight of the service day; exceeds 86400
    /// when the trip runs past midnight.
    pub arrival_time: Option<i32>,
    /// Seconds since local midnight, same convention as arrival.
    pub departure_time: Option<i32>,
}

/// Weekly service pattern from calendar.txt.
///
/// The id is repeated inside the value so a calendar prints and
/// constructs on its own in tests.
#[derive(Debug, Clone)]
pub struct GtfsCalendar {
    pub service_id: String,
    /// Monday through Sunday.
    pub days: [bool; 7],
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Service exception from calendar_dates.txt; type 1 adds the date to
/// the service, type 2 removes it.
#[derive(Debug, Clone)]
pub struct GtfsCalendarDate {
    pub date: NaiveDate,
    pub exception_type: i32,
}

/// Everything loaded from one static GTFS publication.
///
/// `loaded_at` records when the parse happened, for freshness reporting
/// by whoever holds the schedule.
pub struct GtfsSchedule {
    pub stops: HashMap<String, GtfsStop>,
    pub routes: HashMap<String, GtfsRoute>,
    pub trips: HashMap<String, GtfsTrip>,
    /// Keyed by trip id; each list is sorted by stop_sequence.
    pub stop_times: HashMap<String, Vec<GtfsStopTime>>,
    pub calendars: HashMap<String, GtfsCalendar>,
    /// Keyed by service id.
    pub calendar_dates: HashMap<String, Vec<GtfsCalendarDate>>,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

impl GtfsSchedule {
    /// Whether a service runs on `date`.
    ///
    /// calendar_dates.txt exceptions outrank the weekly pattern. A feed
    /// that defines a service only through exceptions runs it exactly on
    /// the added dates.
    pub fn is_service_active(&self, service_id: &str, date: NaiveDate) -> bool {
        if let Some(exceptions) = self.calendar_dates.get(service_id) {
            if let Some(exc) = exceptions.iter().find(|e| e.date == date) {
                return exc.exception_type == 1;
            }
        }

        let Some(cal) = self.calendars.get(service_id) else {
            return false;
        };
        if date < cal.start_date || date > cal.end_date {
            return false;
        }
        cal.days[date.weekday().num_days_from_monday() as usize]
    }

    /// Scheduled stop time for a (trip, stop sequence) pair.
    ///
    /// Relies on the per-trip ordering the loader establishes, so the
    /// lookup is a binary search rather than a scan.
    pub fn scheduled_stop_time(&self, trip_id: &str, stop_sequence: i32) -> Option<&GtfsStopTime> {
        let times = self.stop_times.get(trip_id)?;
        times
            .binary_search_by_key(&stop_sequence, |st| st.stop_sequence)
            .ok()
            .map(|i| &times[i])
    }

    /// All stop times of a trip in stop_sequence order.
    pub fn trip_stop_times(&self, trip_id: &str) -> Option<&[GtfsStopTime]> {
        self.stop_times.get(trip_id).map(Vec::as_slice)
    }
}

/// Read a static GTFS ZIP into memory.
///
/// Blocking; run it on a blocking task from async code. stops, routes,
/// trips and stop_times are required; calendar.txt and
/// calendar_dates.txt are each optional because feeds may use either
/// service model, or both.
pub fn load_schedule(zip_path: &Path) -> Result<GtfsSchedule, GtfsError> {
    let mut archive = zip::ZipArchive::new(File::open(zip_path)?)?;

    let claimed = unpacked_size(&mut archive);
    if claimed > MAX_UNPACKED_BYTES {
        return Err(GtfsError::ParseError(format!(
            "static GTFS archive inflates to {claimed} bytes, over the {MAX_UNPACKED_BYTES} byte limit"
        )));
    }

    let stops = read_stops(&mut archive)?;
    let routes = read_routes(&mut archive)?;
    let trips = read_trips(&mut archive)?;

    let mut stop_times = read_stop_times(&mut archive)?;
    for times in stop_times.values_mut() {
        times.sort_by_key(|st| st.stop_sequence);
    }

    let calendars = read_calendar(&mut archive);
    let calendar_dates = read_calendar_dates(&mut archive);

    info!(
        stops = stops.len(),
        routes = routes.len(),
        trips = trips.len(),
        trips_with_stop_times = stop_times.len(),
        services = calendars.len(),
        service_exceptions = calendar_dates.values().map(Vec::len).sum::<usize>(),
        "Parsed static GTFS archive"
    );

    Ok(GtfsSchedule {
        stops,
        routes,
        trips,
        stop_times,
        calendars,
        calendar_dates,
        loaded_at: chrono::Utc::now(),
    })
}

/// Seconds since midnight for a GTFS "HH:MM:SS" value. Hours of 24 and
/// beyond are legal and mark post-midnight stops.
pub fn parse_gtfs_time(value: &str) -> Option<i32> {
    let mut fields = value.splitn(3, ':').map(str::trim);
    let hours: i32 = fields.next()?.parse().ok()?;
    let minutes: i32 = fields.next()?.parse().ok()?;
    let seconds: i32 = fields.next()?.parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

fn unpacked_size(archive: &mut zip::ZipArchive<File>) -> u64 {
    (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|entry| entry.size()))
        .sum()
}

fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn require_column(headers: &csv::StringRecord, file: &str, name: &str) -> Result<usize, GtfsError> {
    column(headers, name)
        .ok_or_else(|| GtfsError::ParseError(format!("{file} has no {name} column")))
}

fn field<'r>(row: &'r csv::StringRecord, col: Option<usize>) -> Option<&'r str> {
    col.and_then(|i| row.get(i))
}

fn owned_field(row: &csv::StringRecord, col: Option<usize>) -> Option<String> {
    field(row, col)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn read_stops(archive: &mut zip::ZipArchive<File>) -> Result<HashMap<String, GtfsStop>, GtfsError> {
    let mut reader = csv::Reader::from_reader(archive.by_name("stops.txt")?);
    let cols = reader.headers()?.clone();
    let col_id = require_column(&cols, "stops.txt", "stop_id")?;
    let col_name = column(&cols, "stop_name");
    let col_lat = column(&cols, "stop_lat");
    let col_lon = column(&cols, "stop_lon");

    let mut stops = HashMap::new();
    let mut dropped = 0usize;
    for row in reader.records() {
        let row = row?;
        let Some(stop_id) = row.get(col_id).filter(|s| !s.is_empty()) else {
            dropped += 1;
            continue;
        };
        stops.insert(
            stop_id.to_string(),
            GtfsStop {
                stop_id: stop_id.to_string(),
                stop_name: owned_field(&row, col_name),
                lat: field(&row, col_lat).and_then(|s| s.parse().ok()),
                lon: field(&row, col_lon).and_then(|s| s.parse().ok()),
            },
        );
    }
    if dropped > 0 {
        warn!(dropped, "stops.txt rows without a stop_id");
    }
    Ok(stops)
}

fn read_routes(archive: &mut zip::ZipArchive<File>) -> Result<HashMap<String, GtfsRoute>, GtfsError> {
    let mut reader = csv::Reader::from_reader(archive.by_name("routes.txt")?);
    let cols = reader.headers()?.clone();
    let col_id = require_column(&cols, "routes.txt", "route_id")?;
    let col_short = column(&cols, "route_short_name");
    let col_long = column(&cols, "route_long_name");
    let col_type = column(&cols, "route_type");

    let mut routes = HashMap::new();
    let mut dropped = 0usize;
    for row in reader.records() {
        let row = row?;
        let Some(route_id) = row.get(col_id).filter(|s| !s.is_empty()) else {
            dropped += 1;
            continue;
        };
        routes.insert(
            route_id.to_string(),
            GtfsRoute {
                route_id: route_id.to_string(),
                route_short_name: owned_field(&row, col_short),
                route_long_name: owned_field(&row, col_long),
                route_type: field(&row, col_type).and_then(|s| s.parse().ok()),
            },
        );
    }
    if dropped > 0 {
        warn!(dropped, "routes.txt rows without a route_id");
    }
    Ok(routes)
}

fn read_trips(archive: &mut zip::ZipArchive<File>) -> Result<HashMap<String, GtfsTrip>, GtfsError> {
    let mut reader = csv::Reader::from_reader(archive.by_name("trips.txt")?);
    let cols = reader.headers()?.clone();
    let col_trip = require_column(&cols, "trips.txt", "trip_id")?;
    let col_route = require_column(&cols, "trips.txt", "route_id")?;
    let col_service = require_column(&cols, "trips.txt", "service_id")?;
    let col_headsign = column(&cols, "trip_headsign");
    let col_dir = column(&cols, "direction_id");

    let mut trips = HashMap::new();
    let mut dropped = 0usize;
    for row in reader.records() {
        let row = row?;
        let Some(trip_id) = row.get(col_trip).filter(|s| !s.is_empty()) else {
            dropped += 1;
            continue;
        };
        trips.insert(
            trip_id.to_string(),
            GtfsTrip {
                trip_id: trip_id.to_string(),
                route_id: row.get(col_route).unwrap_or("").to_string(),
                service_id: row.get(col_service).unwrap_or("").to_string(),
                trip_headsign: owned_field(&row, col_headsign),
                direction_id: field(&row, col_dir).and_then(|s| s.parse().ok()),
            },
        );
    }
    if dropped > 0 {
        warn!(dropped, "trips.txt rows without a trip_id");
    }
    Ok(trips)
}

fn read_stop_times(
    archive: &mut zip::ZipArchive<File>,
) -> Result<HashMap<String, Vec<GtfsStopTime>>, GtfsError> {
    let mut reader = csv::Reader::from_reader(archive.by_name("stop_times.txt")?);
    let cols = reader.headers()?.clone();
    let col_trip = require_column(&cols, "stop_times.txt", "trip_id")?;
    let col_seq = require_column(&cols, "stop_times.txt", "stop_sequence")?;
    let col_stop = require_column(&cols, "stop_times.txt", "stop_id")?;
    let col_arr = column(&cols, "arrival_time");
    let col_dep = column(&cols, "departure_time");

    let mut by_trip: HashMap<String, Vec<GtfsStopTime>> = HashMap::new();
    let mut dropped = 0usize;
    for row in reader.records() {
        let row = row?;
        let Some(trip_id) = row.get(col_trip).filter(|s| !s.is_empty()) else {
            dropped += 1;
            continue;
        };
        by_trip
            .entry(trip_id.to_string())
            .or_default()
            .push(GtfsStopTime {
                stop_sequence: row.get(col_seq).and_then(|s| s.parse().ok()).unwrap_or(0),
                stop_id: row.get(col_stop).unwrap_or("").to_string(),
                arrival_time: field(&row, col_arr).and_then(parse_gtfs_time),
                departure_time: field(&row, col_dep).and_then(parse_gtfs_time),
            });
    }
    if dropped > 0 {
        warn!(dropped, "stop_times.txt rows without a trip_id");
    }
    Ok(by_trip)
}

const DAY_COLUMNS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

fn read_calendar(archive: &mut zip::ZipArchive<File>) -> HashMap<String, GtfsCalendar> {
    let entry = match archive.by_name("calendar.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("calendar.txt not present, relying on calendar_dates.txt");
            return HashMap::new();
        }
    };
    let mut reader = csv::Reader::from_reader(entry);
    let Ok(cols) = reader.headers().map(|h| h.clone()) else {
        return HashMap::new();
    };
    let Some(col_service) = column(&cols, "service_id") else {
        return HashMap::new();
    };
    let day_cols = DAY_COLUMNS.map(|name| column(&cols, name));
    let col_start = column(&cols, "start_date");
    let col_end = column(&cols, "end_date");

    let mut calendars = HashMap::new();
    let mut dropped = 0usize;
    for row in reader.records() {
        let Ok(row) = row else {
            dropped += 1;
            continue;
        };
        let service_id = row.get(col_service).unwrap_or("");
        if service_id.is_empty() {
            dropped += 1;
            continue;
        }
        let start = field(&row, col_start).and_then(parse_service_date);
        let end = field(&row, col_end).and_then(parse_service_date);
        let (Some(start_date), Some(end_date)) = (start, end) else {
            dropped += 1;
            continue;
        };

        let mut days = [false; 7];
        for (day, col) in days.iter_mut().zip(day_cols) {
            *day = field(&row, col).map(|v| v.trim() == "1").unwrap_or(false);
        }

        calendars.insert(
            service_id.to_string(),
            GtfsCalendar {
                service_id: service_id.to_string(),
                days,
                start_date,
                end_date,
            },
        );
    }
    if dropped > 0 {
        warn!(dropped, "calendar.txt rows missing required fields");
    }
    calendars
}

fn read_calendar_dates(
    archive: &mut zip::ZipArchive<File>,
) -> HashMap<String, Vec<GtfsCalendarDate>> {
    let entry = match archive.by_name("calendar_dates.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("calendar_dates.txt not present, no service exceptions");
            return HashMap::new();
        }
    };
    let mut reader = csv::Reader::from_reader(entry);
    let Ok(cols) = reader.headers().map(|h| h.clone()) else {
        return HashMap::new();
    };
    let (Some(col_service), Some(col_date), Some(col_type)) = (
        column(&cols, "service_id"),
        column(&cols, "date"),
        column(&cols, "exception_type"),
    ) else {
        return HashMap::new();
    };

    let mut exceptions: HashMap<String, Vec<GtfsCalendarDate>> = HashMap::new();
    let mut dropped = 0usize;
    for row in reader.records() {
        let Ok(row) = row else {
            dropped += 1;
            continue;
        };
        let service_id = row.get(col_service).unwrap_or("");
        if service_id.is_empty() {
            dropped += 1;
            continue;
        }
        let Some(date) = row.get(col_date).and_then(parse_service_date) else {
            dropped += 1;
            continue;
        };
        let exception_type = row.get(col_type).and_then(|s| s.parse().ok()).unwrap_or(0);

        exceptions
            .entry(service_id.to_string())
            .or_default()
            .push(GtfsCalendarDate {
                date,
                exception_type,
            });
    }
    if dropped > 0 {
        warn!(dropped, "calendar_dates.txt rows missing required fields");
    }
    exceptions
}
