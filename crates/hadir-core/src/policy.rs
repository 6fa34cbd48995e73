//! Attendance policy: submission windows, lateness, overtime and daily pay.

use crate::types::{AttendanceKind, AttendanceRecord, WorkHoursSettings};
use chrono::{Duration, NaiveTime};

/// Slack around the configured working hours in which submissions are accepted.
pub const WINDOW_SLACK_MINUTES: i64 = 30;
/// Working days per month used to derive the daily rate.
pub const WORKING_DAYS_PER_MONTH: f64 = 22.0;
/// Lateness beyond this many minutes reduces the day's pay.
pub const DEDUCTION_GRACE_MINUTES: i64 = 15;
/// Pay deducted per hour late.
pub const DEDUCTION_PER_HOUR: f64 = 0.1;
pub const MAX_DEDUCTION_RATE: f64 = 0.5;

/// Inclusive time-of-day range during which `kind` may be submitted.
///
/// Check-in opens 30 minutes before the start of the day, check-out at the
/// start of the day; both close 30 minutes after the end of the day.
pub fn submission_window(
    kind: AttendanceKind,
    settings: &WorkHoursSettings,
) -> (NaiveTime, NaiveTime) {
    let slack = Duration::minutes(WINDOW_SLACK_MINUTES);
    let open = match kind {
        AttendanceKind::Masuk => settings.start_time - slack,
        AttendanceKind::Keluar => settings.start_time,
    };
    (open, settings.end_time + slack)
}

pub fn within_window(kind: AttendanceKind, settings: &WorkHoursSettings, now: NaiveTime) -> bool {
    let (open, close) = submission_window(kind, settings);
    if open <= close {
        open <= now && now <= close
    } else {
        // Window wraps past midnight.
        now >= open || now <= close
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lateness {
    pub is_late: bool,
    /// Whole minutes after the nominal start time; zero when not late.
    pub late_minutes: i64,
}

/// Late iff `now` is past start + threshold. Minutes are counted from the
/// nominal start time, not from the threshold.
pub fn lateness(now: NaiveTime, settings: &WorkHoursSettings) -> Lateness {
    let cutoff = settings.start_time + Duration::minutes(settings.late_threshold_minutes as i64);
    if now <= cutoff {
        return Lateness::default();
    }
    Lateness {
        is_late: true,
        late_minutes: (now - settings.start_time).num_minutes(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WorkSplit {
    pub work_hours: f64,
    pub overtime_hours: f64,
}

/// Split elapsed minutes into regular hours capped at the standard shift
/// (shift minus break) and overtime.
pub fn work_split(elapsed_minutes: i64, settings: &WorkHoursSettings) -> WorkSplit {
    let brk = settings.break_duration_minutes as i64;
    let work_minutes = (elapsed_minutes - brk).max(0);
    let standard_minutes = (settings.shift_minutes() - brk).max(0);

    let work_hours = work_minutes as f64 / 60.0;
    let standard_hours = standard_minutes as f64 / 60.0;

    if work_hours > standard_hours {
        WorkSplit {
            work_hours: standard_hours,
            overtime_hours: work_hours - standard_hours,
        }
    } else {
        WorkSplit {
            work_hours,
            overtime_hours: 0.0,
        }
    }
}

/// Fraction of the day's pay withheld for lateness.
pub fn deduction_rate(late_minutes: i64) -> f64 {
    if late_minutes <= DEDUCTION_GRACE_MINUTES {
        return 0.0;
    }
    (late_minutes as f64 / 60.0 * DEDUCTION_PER_HOUR).min(MAX_DEDUCTION_RATE)
}

/// Pay earned for a check-in given the monthly salary and minutes late.
pub fn daily_salary_earned(monthly_salary: f64, late_minutes: i64) -> f64 {
    let daily = monthly_salary / WORKING_DAYS_PER_MONTH;
    daily - daily * deduction_rate(late_minutes)
}

/// Kind the attendance form should open with, given today's records.
pub fn default_kind(today: &[AttendanceRecord]) -> AttendanceKind {
    let checked_in = today.iter().any(|r| r.is_successful(AttendanceKind::Masuk));
    let checked_out = today.iter().any(|r| r.is_successful(AttendanceKind::Keluar));
    if checked_in && !checked_out {
        AttendanceKind::Keluar
    } else {
        AttendanceKind::Masuk
    }
}
