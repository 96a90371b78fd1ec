//! Minimal 5-field cron expressions (minute hour day-of-month month
//! day-of-week) with standard list/range/step semantics, used to pace the
//! auto-scheduler.

use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Any,
    Values(Vec<u32>),
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Values(values) => values.contains(&value),
        }
    }

    fn is_restricted(&self) -> bool {
        matches!(self, Field::Values(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
    expr: String,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            bail!("invalid cron expression {expr:?}: need 5 fields");
        }
        Ok(Self {
            minute: parse_field(parts[0], 0, 59)?,
            hour: parse_field(parts[1], 0, 23)?,
            day_of_month: parse_field(parts[2], 1, 31)?,
            month: parse_field(parts[3], 1, 12)?,
            day_of_week: parse_dow(parts[4])?,
            expr: expr.trim().to_string(),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    pub fn matches(&self, when: DateTime<Utc>) -> bool {
        if !self.minute.matches(when.minute())
            || !self.hour.matches(when.hour())
            || !self.month.matches(when.month())
        {
            return false;
        }
        let dom = self.day_of_month.matches(when.day());
        let dow = self
            .day_of_week
            .matches(when.weekday().num_days_from_sunday());
        // Standard semantics: when both day fields are restricted, either
        // one matching is enough.
        if self.day_of_month.is_restricted() && self.day_of_week.is_restricted() {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First matching minute strictly after `after`. Bounded scan; a valid
    /// 5-field expression always fires within 366 days.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        for _ in 0..(366 * 24 * 60) {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

fn parse_field(spec: &str, min: u32, max: u32) -> Result<Field> {
    if spec == "*" {
        return Ok(Field::Any);
    }
    let mut values = Vec::new();
    for part in spec.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse()?;
                if step == 0 {
                    bail!("cron step of zero in {spec:?}");
                }
                (range, step)
            }
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (lo.parse()?, hi.parse()?)
        } else {
            let value: u32 = range.parse()?;
            (value, value)
        };
        if lo < min || hi > max || lo > hi {
            bail!("cron field {spec:?} out of range {min}-{max}");
        }
        let mut value = lo;
        while value <= hi {
            values.push(value);
            value += step;
        }
    }
    values.sort_unstable();
    values.dedup();
    Ok(Field::Values(values))
}

fn parse_dow(spec: &str) -> Result<Field> {
    // Accept 7 as an alias for Sunday.
    match parse_field(spec, 0, 7)? {
        Field::Any => Ok(Field::Any),
        Field::Values(values) => {
            let mut mapped: Vec<u32> = values
                .into_iter()
                .map(|v| if v == 7 { 0 } else { v })
                .collect();
            mapped.sort_unstable();
            mapped.dedup();
            Ok(Field::Values(mapped))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn wildcard_matches_every_minute() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        assert!(schedule.matches(at(2026, 8, 7, 3, 14)));
    }

    #[test]
    fn step_and_fixed_fields() {
        let schedule = CronSchedule::parse("15 */6 * * *").unwrap();
        assert!(schedule.matches(at(2026, 8, 7, 0, 15)));
        assert!(schedule.matches(at(2026, 8, 7, 6, 15)));
        assert!(schedule.matches(at(2026, 8, 7, 18, 15)));
        assert!(!schedule.matches(at(2026, 8, 7, 7, 15)));
        assert!(!schedule.matches(at(2026, 8, 7, 6, 16)));
    }

    #[test]
    fn lists_and_ranges() {
        let schedule = CronSchedule::parse("0 9-17 * * 1-5").unwrap();
        // 2026-08-07 is a Friday.
        assert!(schedule.matches(at(2026, 8, 7, 9, 0)));
        assert!(!schedule.matches(at(2026, 8, 7, 18, 0)));
        // 2026-08-09 is a Sunday.
        assert!(!schedule.matches(at(2026, 8, 9, 9, 0)));
    }

    #[test]
    fn restricted_dom_and_dow_are_ored() {
        // 13th of the month OR a Friday.
        let schedule = CronSchedule::parse("0 0 13 * 5").unwrap();
        assert!(schedule.matches(at(2026, 8, 13, 0, 0))); // a Thursday, dom hit
        assert!(schedule.matches(at(2026, 8, 7, 0, 0))); // a Friday, dow hit
        assert!(!schedule.matches(at(2026, 8, 8, 0, 0))); // Saturday the 8th
    }

    #[test]
    fn next_after_finds_the_following_fire() {
        let schedule = CronSchedule::parse("15 */6 * * *").unwrap();
        let next = schedule.next_after(at(2026, 8, 7, 6, 15)).unwrap();
        assert_eq!(next, at(2026, 8, 7, 12, 15));

        let next = schedule.next_after(at(2026, 8, 7, 23, 59)).unwrap();
        assert_eq!(next, at(2026, 8, 8, 0, 15));
    }

    #[test]
    fn sunday_aliases() {
        let schedule = CronSchedule::parse("0 0 * * 7").unwrap();
        assert!(schedule.matches(at(2026, 8, 9, 0, 0))); // Sunday
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("61 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("a * * * *").is_err());
    }
}
