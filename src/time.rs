//! Conversions between feed time values and agency-local instants.
//!
//! All civil-time arithmetic goes through the IANA timezone database via
//! chrono-tz, so DST transitions shift the UTC offset instead of silently
//! shifting the local clock time.

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Convert an absolute Unix timestamp to the agency's local time.
pub fn to_local(unix_seconds: i64, tz: Tz) -> Option<DateTime<Tz>> {
    DateTime::from_timestamp(unix_seconds, 0).map(|dt| dt.with_timezone(&tz))
}

/// Convert GTFS seconds-since-midnight + service date to a local instant.
///
/// Handles times >= 24:00:00 by rolling into the following calendar day,
/// so "25:30:00" on a service date means 01:30:00 on the next day. Returns
/// `None` for negative values and for local times that do not exist, such
/// as the hour skipped by a spring-forward DST transition. Ambiguous times
/// during a fall-back transition resolve to the earlier occurrence.
pub fn scheduled_local_instant(
    time_of_day_seconds: i64,
    service_date: NaiveDate,
    tz: Tz,
) -> Option<DateTime<Tz>> {
    if time_of_day_seconds < 0 {
        return None;
    }
    let days_over = time_of_day_seconds / 86_400;
    let remainder = time_of_day_seconds % 86_400;
    let hours = remainder / 3600;
    let minutes = (remainder % 3600) / 60;
    let secs = remainder % 60;

    let date = service_date.checked_add_days(Days::new(days_over as u64))?;
    let time = NaiveTime::from_hms_opt(hours as u32, minutes as u32, secs as u32)?;
    let naive_dt = NaiveDateTime::new(date, time);

    tz.from_local_datetime(&naive_dt).earliest()
}

/// Parse a GTFS-RT service date string "YYYYMMDD" to NaiveDate.
pub fn parse_service_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 {
        return None;
    }
    // feed strings are untrusted; eight bytes is not eight digits, and
    // indexing into a multibyte character would panic
    let year: i32 = s.get(0..4)?.parse().ok()?;
    let month: u32 = s.get(4..6)?.parse().ok()?;
    let day: u32 = s.get(6..8)?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// The agency-local calendar date at the given instant, used as the
/// service date when a trip update does not announce one.
pub fn service_date_for(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use chrono_tz::America::Los_Angeles;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_to_local_summer() {
        // 2025-07-15T16:00:00Z is 09:00 PDT
        let local = to_local(1_752_595_200, Los_Angeles).unwrap();
        assert_eq!(local.date_naive(), NaiveDate::from_ymd_opt(2025, 7, 15).unwrap());
        assert_eq!(local.hour(), 9);
        assert_eq!(local.minute(), 0);
    }

    #[test]
    fn test_to_local_across_spring_forward() {
        // 2025-03-09 in Los Angeles: clocks jump from 02:00 PST to 03:00 PDT.
        // 09:30Z is still PST, one hour later it is already PDT.
        let before = to_local(1_741_512_600, Los_Angeles).unwrap();
        assert_eq!(before.hour(), 1);
        assert_eq!(before.minute(), 30);

        let after = to_local(1_741_516_200, Los_Angeles).unwrap();
        assert_eq!(after.hour(), 3);
        assert_eq!(after.minute(), 30);
    }

    #[test]
    fn test_to_local_across_fall_back() {
        // 2025-11-02 in Los Angeles: clocks fall back from 02:00 PDT to 01:00 PST,
        // so the 01:xx hour happens twice.
        let first_pass = to_local(1_762_072_200, Los_Angeles).unwrap();
        assert_eq!(first_pass.hour(), 1);
        assert_eq!(first_pass.minute(), 30);

        let after = to_local(1_762_077_600, Los_Angeles).unwrap();
        assert_eq!(after.hour(), 2);
        assert_eq!(after.minute(), 0);
    }

    #[test]
    fn test_scheduled_local_instant_plain() {
        // 14:48:00 on an ordinary summer day
        let date = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
        let local = scheduled_local_instant(53_280, date, Los_Angeles).unwrap();
        assert_eq!(local.date_naive(), date);
        assert_eq!(local.hour(), 14);
        assert_eq!(local.minute(), 48);
        assert_eq!(local.second(), 0);
        // PDT is UTC-7
        assert_eq!(local.with_timezone(&Utc), utc("2025-07-15T21:48:00Z"));
    }

    #[test]
    fn test_scheduled_local_instant_past_midnight() {
        // 25:00:00 on 2025-07-15 is 01:00:00 local on 2025-07-16
        let date = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
        let local = scheduled_local_instant(90_000, date, Los_Angeles).unwrap();
        assert_eq!(local.date_naive(), NaiveDate::from_ymd_opt(2025, 7, 16).unwrap());
        assert_eq!(local.hour(), 1);
        assert_eq!(local.minute(), 0);
        assert_eq!(local.with_timezone(&Utc), utc("2025-07-16T08:00:00Z"));
    }

    #[test]
    fn test_scheduled_local_instant_two_day_overflow() {
        // the 48:00:00 ceiling lands two calendar days out
        let date = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
        let local = scheduled_local_instant(172_800, date, Los_Angeles).unwrap();
        assert_eq!(local.date_naive(), NaiveDate::from_ymd_opt(2025, 7, 17).unwrap());
        assert_eq!(local.hour(), 0);
    }

    #[test]
    fn test_scheduled_local_instant_negative() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
        assert!(scheduled_local_instant(-60, date, Los_Angeles).is_none());
    }

    #[test]
    fn test_scheduled_local_instant_spring_forward_gap() {
        // 02:30:00 does not exist on 2025-03-09 in Los Angeles
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert!(scheduled_local_instant(9_000, date, Los_Angeles).is_none());

        // 03:30:00 does, on the PDT side
        let after = scheduled_local_instant(12_600, date, Los_Angeles).unwrap();
        assert_eq!(after.with_timezone(&Utc), utc("2025-03-09T10:30:00Z"));
    }

    #[test]
    fn test_scheduled_local_instant_fall_back_earliest() {
        // 01:30:00 happens twice on 2025-11-02; the first (PDT) pass wins
        let date = NaiveDate::from_ymd_opt(2025, 11, 2).unwrap();
        let local = scheduled_local_instant(5_400, date, Los_Angeles).unwrap();
        assert_eq!(local.with_timezone(&Utc), utc("2025-11-02T08:30:00Z"));
    }

    #[test]
    fn test_scheduled_local_instants_increase_with_time_of_day() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
        let instants: Vec<_> = [53_280i64, 53_580, 61_200, 86_400, 90_000]
            .iter()
            .map(|&t| scheduled_local_instant(t, date, Los_Angeles).unwrap())
            .collect();
        for pair in instants.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_parse_service_date() {
        assert_eq!(
            parse_service_date("20250715"),
            NaiveDate::from_ymd_opt(2025, 7, 15)
        );
        assert_eq!(
            parse_service_date("20240229"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(parse_service_date("20250229"), None);
        assert_eq!(parse_service_date("2025-07-15"), None);
        assert_eq!(parse_service_date("2025071"), None);
        assert_eq!(parse_service_date("20251315"), None);
        assert_eq!(parse_service_date(""), None);
    }

    #[test]
    fn test_parse_service_date_multibyte_input() {
        // eight bytes each, but not eight digits; must reject, not panic
        assert_eq!(parse_service_date("202\u{e9}067"), None);
        assert_eq!(parse_service_date("202506\u{e9}"), None);
        assert_eq!(parse_service_date("\u{e9}\u{e9}\u{e9}\u{e9}"), None);
    }

    #[test]
    fn test_service_date_for_uses_local_calendar() {
        // 02:00Z on the 16th is still the evening of the 15th in Los Angeles
        let now = utc("2025-07-16T02:00:00Z");
        assert_eq!(
            service_date_for(now, Los_Angeles),
            NaiveDate::from_ymd_opt(2025, 7, 15).unwrap()
        );
    }
}
