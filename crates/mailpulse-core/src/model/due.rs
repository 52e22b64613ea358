//! Due-date buckets.

use std::str::FromStr;

use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Classification of a due time relative to the current day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DueBucket {
    /// Due strictly before the start of today.
    Overdue,
    /// Due today.
    Today,
    /// Due tomorrow.
    Tomorrow,
    /// Due after tomorrow.
    Later,
    /// No due date.
    #[serde(alias = "No Date", alias = "No-Date")]
    NoDate,
}

impl DueBucket {
    /// All buckets, in display order.
    pub const ALL: [Self; 5] = [
        Self::Overdue,
        Self::Today,
        Self::Tomorrow,
        Self::Later,
        Self::NoDate,
    ];

    /// Classifies `due` against `today`.
    #[must_use]
    pub fn classify(due: Option<NaiveDateTime>, today: NaiveDate) -> Self {
        let Some(due) = due else {
            return Self::NoDate;
        };
        let date = due.date();
        if date < today {
            Self::Overdue
        } else if date == today {
            Self::Today
        } else if Some(date) == today.checked_add_days(Days::new(1)) {
            Self::Tomorrow
        } else {
            Self::Later
        }
    }

    /// Half-open `[from, until)` window of due times that fall in this bucket.
    ///
    /// `None` on either side means unbounded. `NoDate` has no window.
    #[must_use]
    pub fn window(
        self,
        today: NaiveDate,
    ) -> Option<(Option<NaiveDateTime>, Option<NaiveDateTime>)> {
        let day = |offset: u64| {
            today
                .checked_add_days(Days::new(offset))
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        };
        match self {
            Self::Overdue => Some((None, day(0))),
            Self::Today => Some((day(0), day(1))),
            Self::Tomorrow => Some((day(1), day(2))),
            Self::Later => Some((day(2), None)),
            Self::NoDate => None,
        }
    }

    /// True when `filters` is empty or contains this bucket.
    #[must_use]
    pub fn selected_by(self, filters: &[Self]) -> bool {
        filters.is_empty() || filters.contains(&self)
    }

    /// Label shown to the user.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Overdue => "Overdue",
            Self::Today => "Today",
            Self::Tomorrow => "Tomorrow",
            Self::Later => "Later",
            Self::NoDate => "No Date",
        }
    }
}

impl FromStr for DueBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "overdue" => Ok(Self::Overdue),
            "today" => Ok(Self::Today),
            "tomorrow" => Ok(Self::Tomorrow),
            "later" | "future" => Ok(Self::Later),
            "nodate" | "none" => Ok(Self::NoDate),
            _ => Err(format!("unknown due filter: {s}")),
        }
    }
}
