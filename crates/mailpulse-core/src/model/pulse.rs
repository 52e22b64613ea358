//! Two-field status summary for a lightweight indicator.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{DueBucket, NormalizedEvent, NormalizedTask, ResponseStatus};

/// Events starting further out than this are shown with a clock time.
const COUNTDOWN_MINUTES: i64 = 60;

/// Compact calendar and task summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseStatus {
    /// Current or next meeting today.
    pub calendar: Option<String>,
    /// Open task count, most urgent bucket first.
    pub tasks: Option<String>,
}

impl PulseStatus {
    /// Summarizes already-filtered events and tasks as of `now`.
    #[must_use]
    pub fn summarize(
        events: &[NormalizedEvent],
        tasks: &[NormalizedTask],
        now: NaiveDateTime,
    ) -> Self {
        Self {
            calendar: calendar_label(events, now),
            tasks: tasks_label(tasks),
        }
    }

    /// True when there is nothing to show.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.calendar.is_none() && self.tasks.is_none()
    }
}

fn calendar_label(events: &[NormalizedEvent], now: NaiveDateTime) -> Option<String> {
    let mut relevant: Vec<&NormalizedEvent> = events
        .iter()
        .filter(|e| !e.is_all_day && e.response_status != ResponseStatus::Declined)
        .collect();
    relevant.sort_by_key(|e| e.start);

    if let Some(current) = relevant.iter().find(|e| e.start <= now && now < e.end) {
        return Some(format!("Now: {}", current.subject));
    }

    let next = relevant
        .iter()
        .find(|e| e.start > now && e.start.date() == now.date())?;
    let minutes = (next.start - now).num_minutes().max(1);
    Some(if minutes <= COUNTDOWN_MINUTES {
        format!("{} in {minutes}m", next.subject)
    } else {
        format!("{} at {}", next.subject, next.start.format("%H:%M"))
    })
}

fn tasks_label(tasks: &[NormalizedTask]) -> Option<String> {
    let open: Vec<&NormalizedTask> = tasks.iter().filter(|t| !t.is_complete).collect();
    let count = |bucket: DueBucket| open.iter().filter(|t| t.bucket == bucket).count();

    let overdue = count(DueBucket::Overdue);
    let today = count(DueBucket::Today);
    if overdue > 0 {
        Some(format!("{overdue} overdue"))
    } else if today > 0 {
        Some(format!("{today} due today"))
    } else if open.is_empty() {
        None
    } else {
        Some(format!("{} due", open.len()))
    }
}
