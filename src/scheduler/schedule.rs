//! Schedule entity and next-run calculation.
//!
//! All times are UTC. A schedule's next run is always strictly later than the
//! time it is computed from, so a processed schedule never fires twice for
//! the same slot.

use crate::error::{PacklinkError, PacklinkResult};
use crate::orm::Entity;
use crate::queue::Priority;
use crate::task::Task;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// When a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Every `interval` minutes, on minute boundaries
    EveryMinutes {
        /// Minutes between runs
        interval: u32,
    },
    /// Every `interval` hours counted from midnight, at `minute`
    Hourly {
        /// Hours between runs, 1..=24
        interval: u32,
        /// Minute of the hour
        minute: u32,
    },
    /// Once a day
    Daily {
        /// Hour of the day
        hour: u32,
        /// Minute of the hour
        minute: u32,
    },
    /// On the given days of the week
    Weekly {
        /// Days to run on
        days: Vec<Weekday>,
        /// Hour of the day
        hour: u32,
        /// Minute of the hour
        minute: u32,
    },
    /// Once a month; days past the end of a month run on its last day
    Monthly {
        /// Day of the month, 1..=31
        day: u32,
        /// Hour of the day
        hour: u32,
        /// Minute of the hour
        minute: u32,
    },
}

impl ScheduleKind {
    /// Check the fields are in range.
    pub fn validate(&self) -> PacklinkResult<()> {
        let check_time = |hour: u32, minute: u32| {
            if hour > 23 || minute > 59 {
                return Err(schedule_error(format!("invalid time {:02}:{:02}", hour, minute)));
            }
            Ok(())
        };

        match self {
            Self::EveryMinutes { interval } => {
                if *interval == 0 {
                    return Err(schedule_error("minute interval must be at least 1"));
                }
                Ok(())
            }
            Self::Hourly { interval, minute } => {
                if !(1..=24).contains(interval) {
                    return Err(schedule_error(format!(
                        "hour interval must be between 1 and 24, got {}",
                        interval
                    )));
                }
                check_time(0, *minute)
            }
            Self::Daily { hour, minute } => check_time(*hour, *minute),
            Self::Weekly { days, hour, minute } => {
                if days.is_empty() {
                    return Err(schedule_error("weekly schedule needs at least one day"));
                }
                check_time(*hour, *minute)
            }
            Self::Monthly { day, hour, minute } => {
                if !(1..=31).contains(day) {
                    return Err(schedule_error(format!("invalid day of month {}", day)));
                }
                check_time(*hour, *minute)
            }
        }
    }

    /// First run strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> PacklinkResult<DateTime<Utc>> {
        self.validate()?;
        let today = now.date_naive();

        let next = match self {
            Self::EveryMinutes { interval } => {
                let minute_start = now
                    .with_second(0)
                    .and_then(|t| t.with_nanosecond(0))
                    .ok_or_else(|| schedule_error("cannot truncate time to minute"))?;
                Some(minute_start + Duration::minutes(i64::from(*interval)))
            }
            Self::Hourly { interval, minute } => (0..=1)
                .flat_map(|offset| {
                    (0..24)
                        .step_by(*interval as usize)
                        .map(move |hour| (offset, hour))
                })
                .filter_map(|(offset, hour)| at(today + Duration::days(offset), hour, *minute))
                .find(|candidate| *candidate > now),
            Self::Daily { hour, minute } => (0..=1)
                .filter_map(|offset| at(today + Duration::days(offset), *hour, *minute))
                .find(|candidate| *candidate > now),
            Self::Weekly { days, hour, minute } => (0..=7)
                .map(|offset| today + Duration::days(offset))
                .filter(|date| days.contains(&date.weekday()))
                .filter_map(|date| at(date, *hour, *minute))
                .find(|candidate| *candidate > now),
            Self::Monthly { day, hour, minute } => (0..=2)
                .filter_map(|offset| month_day(today, offset, *day))
                .filter_map(|date| at(date, *hour, *minute))
                .find(|candidate| *candidate > now),
        };

        next.ok_or_else(|| schedule_error(format!("no next run for {:?} after {}", self, now)))
    }
}

fn schedule_error(message: impl Into<String>) -> PacklinkError {
    PacklinkError::Schedule {
        message: message.into(),
    }
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    date.and_hms_opt(hour, minute, 0).map(|time| time.and_utc())
}

/// `day` of the month `offset` months after `from`'s, clamped to its length.
fn month_day(from: NaiveDate, offset: u32, day: u32) -> Option<NaiveDate> {
    let months = from.month0() + offset;
    let year = from.year() + (months / 12) as i32;
    let month = months % 12 + 1;
    (1..=day)
        .rev()
        .find_map(|candidate| NaiveDate::from_ymd_opt(year, month, candidate))
}

/// A task enqueued on a timetable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Storage id
    pub id: Option<i64>,
    /// Queue the task goes to
    pub queue_name: String,
    /// Tenant context
    pub context: String,
    /// Registered task type
    pub task_type: String,
    /// Serialized task
    pub payload: Value,
    /// Priority of the enqueued items
    #[serde(default)]
    pub priority: Priority,
    /// Timetable
    pub kind: ScheduleKind,
    /// Whether the schedule stays after firing
    pub recurring: bool,
    /// Next run
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub next_schedule: Option<DateTime<Utc>>,
    /// Last time the schedule fired
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub last_update: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Recurring schedule for a typed task.
    pub fn new<T: Task>(
        queue_name: impl Into<String>,
        task: &T,
        context: impl Into<String>,
        kind: ScheduleKind,
    ) -> PacklinkResult<Self> {
        Ok(Self {
            id: None,
            queue_name: queue_name.into(),
            context: context.into(),
            task_type: T::TYPE.to_string(),
            payload: serde_json::to_value(task)?,
            priority: Priority::default(),
            kind,
            recurring: true,
            next_schedule: None,
            last_update: None,
        })
    }

    /// Fire once and then delete the schedule.
    pub fn once(mut self) -> Self {
        self.recurring = false;
        self
    }

    /// Priority of the enqueued items.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the schedule should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_schedule.is_some_and(|next| next <= now)
    }
}

impl Entity for Schedule {
    const TYPE: &'static str = "Schedule";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn indexes() -> &'static [&'static str] {
        &["queue_name", "context", "task_type", "next_schedule", "recurring"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_every_minutes() {
        let kind = ScheduleKind::EveryMinutes { interval: 5 };
        assert_eq!(
            kind.next_after(utc(2024, 3, 10, 8, 12, 40)).unwrap(),
            utc(2024, 3, 10, 8, 17, 0)
        );
    }

    #[test]
    fn test_hourly_aligned_to_midnight() {
        let kind = ScheduleKind::Hourly {
            interval: 6,
            minute: 30,
        };
        assert_eq!(
            kind.next_after(utc(2024, 3, 10, 7, 0, 0)).unwrap(),
            utc(2024, 3, 10, 12, 30, 0)
        );
        assert_eq!(
            kind.next_after(utc(2024, 3, 10, 18, 30, 0)).unwrap(),
            utc(2024, 3, 11, 0, 30, 0)
        );
    }

    #[test]
    fn test_daily_is_strictly_after_now() {
        let kind = ScheduleKind::Daily { hour: 2, minute: 0 };
        assert_eq!(
            kind.next_after(utc(2024, 3, 10, 1, 59, 59)).unwrap(),
            utc(2024, 3, 10, 2, 0, 0)
        );
        assert_eq!(
            kind.next_after(utc(2024, 3, 10, 2, 0, 0)).unwrap(),
            utc(2024, 3, 11, 2, 0, 0)
        );
    }

    #[test]
    fn test_weekly() {
        // 2024-03-10 is a Sunday.
        let kind = ScheduleKind::Weekly {
            days: vec![Weekday::Mon, Weekday::Thu],
            hour: 3,
            minute: 15,
        };
        assert_eq!(
            kind.next_after(utc(2024, 3, 10, 12, 0, 0)).unwrap(),
            utc(2024, 3, 11, 3, 15, 0)
        );
        assert_eq!(
            kind.next_after(utc(2024, 3, 11, 3, 15, 0)).unwrap(),
            utc(2024, 3, 14, 3, 15, 0)
        );

        let sunday_only = ScheduleKind::Weekly {
            days: vec![Weekday::Sun],
            hour: 0,
            minute: 0,
        };
        assert_eq!(
            sunday_only.next_after(utc(2024, 3, 10, 0, 0, 0)).unwrap(),
            utc(2024, 3, 17, 0, 0, 0)
        );
    }

    #[test]
    fn test_monthly_clamps_to_month_length() {
        let kind = ScheduleKind::Monthly {
            day: 31,
            hour: 4,
            minute: 0,
        };
        assert_eq!(
            kind.next_after(utc(2024, 2, 1, 0, 0, 0)).unwrap(),
            utc(2024, 2, 29, 4, 0, 0)
        );
        assert_eq!(
            kind.next_after(utc(2024, 12, 31, 5, 0, 0)).unwrap(),
            utc(2025, 1, 31, 4, 0, 0)
        );

        let fifteenth = ScheduleKind::Monthly {
            day: 15,
            hour: 0,
            minute: 0,
        };
        assert_eq!(
            fifteenth.next_after(utc(2024, 4, 20, 0, 0, 0)).unwrap(),
            utc(2024, 5, 15, 0, 0, 0)
        );
    }

    #[test]
    fn test_invalid_kinds_are_rejected() {
        let now = utc(2024, 1, 1, 0, 0, 0);
        for kind in [
            ScheduleKind::EveryMinutes { interval: 0 },
            ScheduleKind::Hourly {
                interval: 25,
                minute: 0,
            },
            ScheduleKind::Daily { hour: 24, minute: 0 },
            ScheduleKind::Weekly {
                days: Vec::new(),
                hour: 1,
                minute: 0,
            },
            ScheduleKind::Monthly {
                day: 0,
                hour: 1,
                minute: 0,
            },
        ] {
            assert!(matches!(
                kind.next_after(now),
                Err(PacklinkError::Schedule { .. })
            ));
        }
    }

    #[test]
    fn test_serialized_kind_is_tagged() {
        let kind = ScheduleKind::Daily { hour: 1, minute: 2 };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], "daily");
        assert_eq!(serde_json::from_value::<ScheduleKind>(value).unwrap(), kind);
    }
}
