use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use time::OffsetDateTime;

/// Raised for expressions the schedule parser rejects. Expressions are
/// stored as five-field UTC cron; the authoring surface converts user
/// timezones before write, so no offset is ever applied here.
#[derive(Debug, thiserror::Error)]
#[error("invalid cron expression: {expr}")]
pub struct CronParseError {
    pub expr: String,
}

fn parse_schedule(cron_expr: &str) -> Result<Schedule, CronParseError> {
    let trimmed = cron_expr.trim();
    // The schedule parser wants a seconds field; stored expressions are the
    // classic five-field form.
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|_| CronParseError {
        expr: cron_expr.to_string(),
    })
}

/// Next occurrence strictly after `base`, in UTC.
pub fn next_run(cron_expr: &str, base: DateTime<Utc>) -> Result<DateTime<Utc>, CronParseError> {
    let schedule = parse_schedule(cron_expr)?;
    schedule.after(&base).next().ok_or_else(|| CronParseError {
        expr: cron_expr.to_string(),
    })
}

pub fn next_run_from_now(cron_expr: &str) -> Result<DateTime<Utc>, CronParseError> {
    next_run(cron_expr, Utc::now())
}

pub fn offset_to_chrono(dt: OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

pub fn chrono_to_offset(dt: DateTime<Utc>) -> Option<OffsetDateTime> {
    let base = OffsetDateTime::from_unix_timestamp(dt.timestamp()).ok()?;
    base.replace_nanosecond(dt.timestamp_subsec_nanos()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expression_advances_to_next_slot() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 10).unwrap();
        let next = next_run("*/5 * * * *", base).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap());
    }

    #[test]
    fn base_instant_is_exclusive() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        let next = next_run("*/5 * * * *", base).unwrap();
        assert!(next > base);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 1, 0, 10, 0).unwrap());
    }

    #[test]
    fn successive_occurrences_are_consistent() {
        let base = Utc.with_ymd_and_hms(2025, 3, 10, 11, 59, 59).unwrap();
        let first = next_run("30 12 * * *", base).unwrap();
        let second = next_run("30 12 * * *", first).unwrap();
        assert_eq!(first, Utc.with_ymd_and_hms(2025, 3, 10, 12, 30, 0).unwrap());
        assert_eq!(second, Utc.with_ymd_and_hms(2025, 3, 11, 12, 30, 0).unwrap());
    }

    #[test]
    fn malformed_expression_is_rejected() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let err = next_run("not a cron", base).unwrap_err();
        assert!(err.to_string().contains("not a cron"));
        assert!(next_run("99 * * * *", base).is_err());
    }

    #[test]
    fn timestamp_conversions_round_trip() {
        let base = Utc.with_ymd_and_hms(2025, 6, 15, 8, 45, 12).unwrap();
        let offset = chrono_to_offset(base).unwrap();
        assert_eq!(offset.unix_timestamp(), base.timestamp());
        let back = offset_to_chrono(offset).unwrap();
        assert_eq!(back, base);
    }
}
