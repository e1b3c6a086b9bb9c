use serde::{Deserialize, Serialize};

use crate::config::StatusThresholds;

/// On-time status category for a single prediction.
///
/// The categories map directly to display colors on departure boards:
/// unknown is gray, on-time green, delayed red, early blue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No usable realtime data for this stop.
    Unknown,
    OnTime,
    Delayed,
    Early,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::OnTime => "on_time",
            Status::Delayed => "delayed",
            Status::Early => "early",
        }
    }

    /// Display color used by departure boards.
    pub fn color(&self) -> &'static str {
        match self {
            Status::Unknown => "gray",
            Status::OnTime => "green",
            Status::Delayed => "red",
            Status::Early => "blue",
        }
    }
}

/// Map a delay to its status category.
///
/// Stateless: the same delay and thresholds always yield the same status.
/// Boundary values count as on-time, so with the default thresholds a
/// delay of exactly +300 or -180 seconds is still green.
pub fn classify_status(delay_seconds: Option<i64>, thresholds: &StatusThresholds) -> Status {
    match delay_seconds {
        None => Status::Unknown,
        Some(d) if d > thresholds.delayed_after_secs => Status::Delayed,
        Some(d) if d < -thresholds.early_before_secs => Status::Early,
        Some(_) => Status::OnTime,
    }
}
