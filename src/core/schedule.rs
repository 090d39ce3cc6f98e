//! Schedule metadata and next-run computation.
//!
//! All date/time arithmetic for a job happens in its configured timezone and
//! converts to UTC epoch seconds for storage, so inter-worker comparisons are
//! timezone-agnostic. Every function takes the current instant explicitly;
//! nothing here reads the wall clock or touches the store.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grace window beyond a due time after which a run counts as late
/// and triggers the fallback callable.
pub const LATENESS_THRESHOLD: i64 = 60 * 5;

const HOUR_SECS: i64 = 60 * 60;

/// Errors raised while computing schedule instants.
///
/// Malformed metadata is fatal to that job's scheduling cycle; it is never
/// silently defaulted.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The schedule carries no timezone.
    #[error("schedule has no timezone")]
    MissingTimezone,

    /// The timezone name is not a known IANA zone.
    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),

    /// A timeslot string did not parse as `HH:MM` or `HH:MM:SS`.
    #[error("invalid timeslot: {0}")]
    InvalidTimeslot(String),

    /// The schedule carries no timeslots.
    #[error("schedule has no timeslots")]
    MissingTimeslots,

    /// The schedule carries no weekdays.
    #[error("schedule has no weekdays")]
    MissingDays,

    /// A weekday index was outside 0..=6 (Monday=0).
    #[error("invalid weekday index: {0}")]
    InvalidDay(u8),

    /// The computation needed a `scheduled_at` that is absent.
    #[error("schedule has no scheduled_at")]
    MissingScheduledAt,

    /// The hourly interval was zero or negative.
    #[error("invalid hourly interval: {0}")]
    InvalidInterval(i64),

    /// The local time falls in a DST gap for the zone.
    #[error("time does not exist in timezone {tz}: {when}")]
    InvalidLocalTime { tz: String, when: NaiveDateTime },
}

/// Scheduling metadata carried by a job record.
///
/// Every field is optional; absent fields are omitted from the serialized
/// blob. The same shape is used for fallback bookkeeping (`fb_info`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecInfo {
    /// Due-at instant, UTC epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<i64>,

    /// Calendar date for one-shot schedules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,

    /// Weekday indices, Monday=0 through Sunday=6.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<u8>>,

    /// Time-of-day strings, `HH:MM` or `HH:MM:SS`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeslots: Option<Vec<String>>,

    /// IANA zone name. Required for any weekday/timeslot/date computation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Run every N hours from `scheduled_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub every_hour: Option<i64>,

    /// Epoch seconds of the last execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ran_at: Option<i64>,
}

impl ExecInfo {
    /// Set the due-at instant (epoch seconds).
    pub fn with_scheduled_at(mut self, ts: i64) -> Self {
        self.scheduled_at = Some(ts);
        self
    }

    /// Set a one-shot calendar date.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Set the weekdays (Monday=0).
    pub fn with_days(mut self, days: impl Into<Vec<u8>>) -> Self {
        self.days = Some(days.into());
        self
    }

    /// Set the timeslots.
    pub fn with_timeslots<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.timeslots = Some(slots.into_iter().map(Into::into).collect());
        self
    }

    /// Set the IANA timezone name.
    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    /// Run every `hours` hours.
    pub fn with_every_hour(mut self, hours: i64) -> Self {
        self.every_hour = Some(hours);
        self
    }

    /// True when the job carries a due-at instant (lives in the scheduled set).
    pub fn is_scheduled(&self) -> bool {
        self.scheduled_at.is_some()
    }

    /// True when any schedule metadata is present at all.
    pub fn has_schedule(&self) -> bool {
        self.date.is_some()
            || self.days.is_some()
            || self.timeslots.is_some()
            || self.every_hour.is_some()
    }

    /// True when the metadata implies recurrence rather than a single instant:
    /// an hourly interval, more than one weekday, or more than one timeslot.
    pub fn is_recurring(&self) -> bool {
        self.every_hour.is_some()
            || self.days.as_ref().is_some_and(|d| d.len() > 1)
            || self.timeslots.as_ref().is_some_and(|t| t.len() > 1)
    }
}

/// Whether a due instant has been missed by more than the lateness threshold.
pub fn is_late(due_at: i64, now: i64) -> bool {
    now - due_at > LATENESS_THRESHOLD
}

/// Compute the first due-at instant for freshly created schedule metadata.
///
/// A `date` schedule resolves to that date combined with the earliest
/// timeslot (one-shot). A weekday schedule resolves to a timeslot later than
/// `now` today when today is eligible, otherwise to the next eligible weekday
/// (wrapping across the week) at the earliest timeslot.
///
/// Hourly-only metadata has no derivable first instant; callers must supply
/// `scheduled_at` explicitly.
pub fn next_run_after_schedule(
    info: &ExecInfo,
    now: DateTime<Utc>,
) -> Result<i64, ScheduleError> {
    if info.date.is_none() && info.days.is_none() {
        return Err(ScheduleError::MissingScheduledAt);
    }

    let tz = parse_timezone(info.timezone.as_deref())?;
    let slots = sorted_slots(info.timeslots.as_deref())?;

    if let Some(date) = info.date {
        return localize(&tz, date.and_time(slots[0]));
    }

    let days = info.days.as_deref().ok_or(ScheduleError::MissingDays)?;
    let today = now.with_timezone(&tz);
    let weekday = today.weekday().num_days_from_monday() as u8;

    if day_set(days)?.contains(&weekday) {
        if let Some(ts) = next_timeslot_today(&slots, &tz, now)? {
            return Ok(ts);
        }
    }

    let next_date = next_weekday(today.date_naive(), days)?;
    localize(&tz, next_date.and_time(slots[0]))
}

/// Compute the next due-at instant after a recurring job ran.
///
/// Hourly schedules advance by `every_hour` hours from the last due time;
/// when the run happened more than the lateness threshold after it was due,
/// whole missed intervals are skipped so the schedule never drifts
/// permanently behind after a worker outage.
///
/// Weekday/timeslot schedules move to the next timeslot later today, or to
/// the next eligible weekday. Returns `None` when the schedule cannot
/// produce another instant (a consumed one-shot date schedule).
pub fn next_run_after_completion(
    info: &ExecInfo,
    now: DateTime<Utc>,
) -> Result<Option<i64>, ScheduleError> {
    let scheduled_at = info.scheduled_at.ok_or(ScheduleError::MissingScheduledAt)?;

    if let Some(every) = info.every_hour {
        if every <= 0 {
            return Err(ScheduleError::InvalidInterval(every));
        }
        let interval = every * HOUR_SECS;
        let lateness = info.ran_at.unwrap_or(scheduled_at) - scheduled_at;
        let missed = if lateness > LATENESS_THRESHOLD {
            lateness / interval
        } else {
            0
        };
        return Ok(Some(scheduled_at + (missed + 1) * interval));
    }

    let tz = parse_timezone(info.timezone.as_deref())?;
    let slots = sorted_slots(info.timeslots.as_deref())?;

    let mut next = next_timeslot_today(&slots, &tz, now)?;

    if next.is_none() && info.date.is_none() {
        let days = info.days.as_deref().ok_or(ScheduleError::MissingDays)?;
        let next_date = next_weekday(now.with_timezone(&tz).date_naive(), days)?;
        next = Some(localize(&tz, next_date.and_time(slots[0]))?);
    }

    Ok(next)
}

fn parse_timezone(name: Option<&str>) -> Result<Tz, ScheduleError> {
    let name = name.ok_or(ScheduleError::MissingTimezone)?;
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Parse and sort timeslot strings ascending by time of day.
fn sorted_slots(timeslots: Option<&[String]>) -> Result<Vec<NaiveTime>, ScheduleError> {
    let timeslots = timeslots.ok_or(ScheduleError::MissingTimeslots)?;
    if timeslots.is_empty() {
        return Err(ScheduleError::MissingTimeslots);
    }

    let mut slots = Vec::with_capacity(timeslots.len());
    for raw in timeslots {
        let parsed = NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .map_err(|_| ScheduleError::InvalidTimeslot(raw.clone()))?;
        slots.push(parsed);
    }
    slots.sort();
    Ok(slots)
}

fn day_set(days: &[u8]) -> Result<Vec<u8>, ScheduleError> {
    if days.is_empty() {
        return Err(ScheduleError::MissingDays);
    }
    let mut set = days.to_vec();
    for day in &set {
        if *day > 6 {
            return Err(ScheduleError::InvalidDay(*day));
        }
    }
    set.sort_unstable();
    set.dedup();
    Ok(set)
}

/// Earliest timeslot later than `now` today, in the job's zone.
fn next_timeslot_today(
    slots: &[NaiveTime],
    tz: &Tz,
    now: DateTime<Utc>,
) -> Result<Option<i64>, ScheduleError> {
    let local_now = now.with_timezone(tz);
    for slot in slots {
        if local_now.time() < *slot {
            let ts = localize(tz, local_now.date_naive().and_time(*slot))?;
            return Ok(Some(ts));
        }
    }
    Ok(None)
}

/// The next date strictly after `after` whose weekday is in `days`,
/// wrapping across the week. A single-day schedule lands one week out
/// when `after` is already that day.
fn next_weekday(after: NaiveDate, days: &[u8]) -> Result<NaiveDate, ScheduleError> {
    let days = day_set(days)?;
    let weekday = after.weekday().num_days_from_monday() as u8;

    let next = days.iter().copied().find(|d| *d > weekday).unwrap_or(days[0]);
    let diff = if next > weekday {
        next - weekday
    } else {
        7 - weekday + next
    };

    Ok(after + Duration::days(i64::from(diff)))
}

/// Resolve a naive local time in `tz` to UTC epoch seconds.
///
/// Ambiguous times (DST fold) resolve to the earlier instant; nonexistent
/// times (DST gap) are an error.
fn localize(tz: &Tz, local: NaiveDateTime) -> Result<i64, ScheduleError> {
    use chrono::offset::LocalResult;

    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Ok(dt.timestamp()),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.timestamp()),
        LocalResult::None => Err(ScheduleError::InvalidLocalTime {
            tz: tz.to_string(),
            when: local,
        }),
    }
}
