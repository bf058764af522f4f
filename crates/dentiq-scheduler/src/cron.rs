//! Lightweight cron expression support.
//! 5-field form "MIN HOUR DOM MON DOW"; minute, hour and day-of-week are
//! honored, day-of-month and month accept only `*`.
//! Field syntax: `*`, `*/N`, `A-B`, single values, comma lists.
//! Example: "30 3 * * *" = every day at 03:30.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// A parsed cron expression. Parse once, evaluate many times.
#[derive(Debug, Clone)]
pub struct CronSpec {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    /// 0 = Sunday .. 6 = Saturday (7 is accepted as Sunday on input).
    weekdays: Vec<u32>,
}

impl CronSpec {
    pub fn parse(expression: &str) -> Option<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            tracing::warn!(
                "Invalid cron expression: '{}' (need 5 fields: MIN HOUR DOM MON DOW)",
                expression
            );
            return None;
        }
        if parts[2] != "*" || parts[3] != "*" {
            tracing::warn!(
                "Unsupported cron expression: '{}' (day-of-month and month must be '*')",
                expression
            );
            return None;
        }

        let minutes = parse_field(parts[0], 0, 59)?;
        let hours = parse_field(parts[1], 0, 23)?;
        let weekdays: Vec<u32> = parse_field(parts[4], 0, 7)?
            .into_iter()
            .map(|d| d % 7)
            .collect();
        if minutes.is_empty() || hours.is_empty() || weekdays.is_empty() {
            return None;
        }
        Some(Self {
            minutes,
            hours,
            weekdays,
        })
    }

    /// First matching minute strictly after `after`. Scans up to 8 days, so
    /// any satisfiable weekday constraint is found.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + Duration::minutes(1))
            .with_second(0)
            .and_then(|c| c.with_nanosecond(0))
            .unwrap_or(after + Duration::minutes(1));

        for _ in 0..(8 * 24 * 60) {
            let dow = candidate.weekday().num_days_from_sunday();
            if self.weekdays.contains(&dow)
                && self.hours.contains(&candidate.hour())
                && self.minutes.contains(&candidate.minute())
            {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// Parse one cron field into the sorted set of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    let mut values = Vec::new();
    for part in field.split(',') {
        let part = part.trim();
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u32 = lo.parse().ok()?;
            let hi: u32 = hi.parse().ok()?;
            if lo > hi || lo < min || hi > max {
                return None;
            }
            values.extend(lo..=hi);
        } else {
            let n: u32 = part.parse().ok()?;
            if n < min || n > max {
                return None;
            }
            values.push(n);
        }
    }
    values.sort_unstable();
    values.dedup();
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_daily_at_seven() {
        let after = Utc.with_ymd_and_hms(2026, 3, 2, 6, 58, 0).unwrap();
        let spec = CronSpec::parse("0 7 * * *").unwrap();
        let next = spec.next_after(after).unwrap();
        assert_eq!((next.hour(), next.minute()), (7, 0));
        assert_eq!(next.day(), 2);
    }

    #[test]
    fn test_rolls_to_next_day() {
        let after = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap();
        let spec = CronSpec::parse("0 7 * * *").unwrap();
        let next = spec.next_after(after).unwrap();
        assert_eq!(next.day(), 3);
        assert_eq!(next.hour(), 7);
    }

    #[test]
    fn test_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 3, 2, 10, 2, 0).unwrap();
        let spec = CronSpec::parse("*/15 * * * *").unwrap();
        assert_eq!(spec.next_after(after).unwrap().minute(), 15);
    }

    #[test]
    fn test_weekday_constraint() {
        // 2026-03-02 is a Monday; next Sunday run is 2026-03-08.
        let after = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let spec = CronSpec::parse("0 9 * * 0").unwrap();
        let next = spec.next_after(after).unwrap();
        assert_eq!(next.weekday().num_days_from_sunday(), 0);
        assert_eq!(next.day(), 8);
    }

    #[test]
    fn test_seven_means_sunday() {
        let spec = CronSpec::parse("0 9 * * 7").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        assert_eq!(
            spec.next_after(after).unwrap().weekday().num_days_from_sunday(),
            0
        );
    }

    #[test]
    fn test_range_and_list() {
        let spec = CronSpec::parse("0,30 8-10 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 2, 9, 31, 0).unwrap();
        let next = spec.next_after(after).unwrap();
        assert_eq!((next.hour(), next.minute()), (10, 0));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(CronSpec::parse("bad").is_none());
        assert!(CronSpec::parse("61 7 * * *").is_none());
        assert!(CronSpec::parse("0 7 1 * *").is_none());
        assert!(CronSpec::parse("*/0 * * * *").is_none());
    }
}
