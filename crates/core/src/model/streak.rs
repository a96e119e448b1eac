use chrono::NaiveDate;
use serde::Serialize;

/// Outcome of evaluating a study day against the stored streak state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StreakChange {
    /// No study day was recorded before; the date is set, the streak is kept.
    Started,
    /// Already counted today.
    SameDay,
    /// Studied yesterday as well.
    Extended,
    /// A gap of `days` (> 1) broke the streak; it restarts at 1.
    Reset { days: i64 },
    /// The stored date lies `days` in the future (clock skew); nothing changes.
    ClockSkew { days: i64 },
}

/// Streak counter with its last qualifying calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Streak {
    pub days: u32,
    pub last_study_date: Option<NaiveDate>,
}

impl Streak {
    #[must_use]
    pub fn new(days: u32, last_study_date: Option<NaiveDate>) -> Self {
        Self {
            days,
            last_study_date,
        }
    }

    /// Registers study activity on `today`.
    ///
    /// Repeated calls on the same day are no-ops. A stored date in the future
    /// is left untouched so the streak is never decremented or moved backwards.
    pub fn touch(&mut self, today: NaiveDate) -> StreakChange {
        let Some(last) = self.last_study_date else {
            self.last_study_date = Some(today);
            return StreakChange::Started;
        };

        let days_diff = today.signed_duration_since(last).num_days();
        let change = match days_diff {
            0 => StreakChange::SameDay,
            1 => {
                self.days = self.days.saturating_add(1);
                StreakChange::Extended
            }
            d if d > 1 => {
                self.days = 1;
                StreakChange::Reset { days: d }
            }
            d => return StreakChange::ClockSkew { days: -d },
        };

        self.last_study_date = Some(today);
        change
    }
}
