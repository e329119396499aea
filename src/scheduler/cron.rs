// dbvault/src/scheduler/cron.rs
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone};
use std::fmt;

use crate::config::{Frequency, Schedule};
use crate::errors::{AppError, Result};

/// Monthly schedules on the 31st can wait up to two months; this bounds the
/// search comfortably past that.
const SEARCH_DAYS: i64 = 400;

/// The subset of five-field cron this engine produces: a fixed minute and
/// hour, optionally pinned to a day of month or a day of week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronExpr {
    pub minute: u32,
    pub hour: u32,
    pub day_of_month: Option<u32>,
    /// 0-6, Sunday is 0.
    pub day_of_week: Option<u32>,
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dom = self.day_of_month.map_or_else(|| "*".to_string(), |d| d.to_string());
        let dow = self.day_of_week.map_or_else(|| "*".to_string(), |d| d.to_string());
        write!(f, "{} {} {} * {}", self.minute, self.hour, dom, dow)
    }
}

/// Parses `HH:MM` into `(hour, minute)`.
pub fn parse_time(time: &str) -> std::result::Result<(u32, u32), String> {
    let (hours, minutes) = time
        .trim()
        .split_once(':')
        .ok_or_else(|| format!("invalid time '{}', expected HH:MM", time))?;
    let hour: u32 = hours
        .trim()
        .parse()
        .map_err(|_| format!("invalid hours in '{}'", time))?;
    let minute: u32 = minutes
        .trim()
        .parse()
        .map_err(|_| format!("invalid minutes in '{}'", time))?;
    if hour > 23 || minute > 59 {
        return Err(format!("time '{}' is out of range", time));
    }
    Ok((hour, minute))
}

impl CronExpr {
    pub fn daily(hour: u32, minute: u32) -> Self {
        CronExpr {
            minute,
            hour,
            day_of_month: None,
            day_of_week: None,
        }
    }

    /// One expression per time the schedule fires at.
    pub fn for_schedule(schedule: &Schedule) -> Result<Vec<CronExpr>> {
        let invalid = |reason: String| AppError::InvalidSchedule {
            schedule_id: schedule.id.clone(),
            reason,
        };

        let mut exprs = Vec::new();
        for time in schedule.fire_times() {
            let (hour, minute) = parse_time(time).map_err(invalid)?;
            let mut expr = CronExpr::daily(hour, minute);
            match schedule.frequency {
                Frequency::Daily => {}
                Frequency::Weekly => {
                    let day = schedule
                        .day_of_week
                        .ok_or_else(|| invalid("weekly schedule without dayOfWeek".to_string()))?;
                    if day > 6 {
                        return Err(invalid(format!("dayOfWeek {} is out of range 0-6", day)));
                    }
                    expr.day_of_week = Some(u32::from(day));
                }
                Frequency::Monthly => {
                    let day = schedule
                        .day_of_month
                        .ok_or_else(|| invalid("monthly schedule without dayOfMonth".to_string()))?;
                    if !(1..=31).contains(&day) {
                        return Err(invalid(format!("dayOfMonth {} is out of range 1-31", day)));
                    }
                    expr.day_of_month = Some(u32::from(day));
                }
            }
            exprs.push(expr);
        }
        Ok(exprs)
    }

    fn matches_date<Tz: TimeZone>(&self, day: &DateTime<Tz>) -> bool {
        self.day_of_month.is_none_or(|d| day.day() == d)
            && self
                .day_of_week
                .is_none_or(|d| day.weekday().num_days_from_sunday() == d)
    }

    /// The first fire instant strictly after `after`, in `after`'s time zone.
    ///
    /// Dates that do not exist (the 31st of a 30-day month) are skipped, as
    /// are local times that fall in a DST gap. An ambiguous local time fires
    /// at its earlier instant.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let at = NaiveTime::from_hms_opt(self.hour, self.minute, 0)?;
        let start = after.date_naive();

        for offset in 0..SEARCH_DAYS {
            let date = start.checked_add_signed(Duration::days(offset))?;
            let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() else {
                continue;
            };
            if candidate > *after && self.matches_date(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}
