//! Recurring access schedule rules.

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Weekly (`day` set) or daily (`day` unset) wall-clock instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRule {
    #[serde(default)]
    pub day: Option<Weekday>,
    pub hour: u32,
    pub minute: u32,
}

impl ScheduleRule {
    pub fn weekly(day: Weekday, hour: u32, minute: u32) -> Self {
        Self {
            day: Some(day),
            hour,
            minute,
        }
    }

    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            day: None,
            hour,
            minute,
        }
    }

    fn time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0)
    }

    pub fn is_valid(&self) -> bool {
        self.time().is_some()
    }

    /// Next occurrence strictly after `now`, evaluated in `tz`.
    ///
    /// Wall-clock times skipped by a DST change move to the next matching day;
    /// ambiguous times resolve to the earlier instant.
    pub fn next_after<Tz: TimeZone>(&self, now: DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>> {
        let time = self.time()?;
        let today = now.with_timezone(tz).date_naive();

        // Two weeks covers a weekly rule whose first candidate falls in a DST gap.
        (0..=14u64).find_map(|offset| {
            let date = today.checked_add_days(Days::new(offset))?;
            if self.day.is_some_and(|day| date.weekday() != day) {
                return None;
            }
            let candidate = tz
                .from_local_datetime(&date.and_time(time))
                .earliest()?
                .with_timezone(&Utc);
            (candidate > now).then_some(candidate)
        })
    }
}

/// Earliest next occurrence among `rules`, if any.
pub fn next_occurrence<'a, Tz, I>(rules: I, now: DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>>
where
    Tz: TimeZone,
    I: IntoIterator<Item = &'a ScheduleRule>,
{
    rules
        .into_iter()
        .filter_map(|rule| rule.next_after(now, tz))
        .min()
}
