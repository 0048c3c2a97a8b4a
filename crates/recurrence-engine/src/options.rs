//! Engine-wide settings.

use chrono_tz::Tz;

use crate::temporal::WeekStartDay;

/// Defaults applied where a rule or recurrence does not say otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Week start for rules parsed without `WKST`.
    pub week_start: WeekStartDay,
    /// Timezone for recurrences stored without one.
    pub timezone: Tz,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            week_start: WeekStartDay::Monday,
            timezone: chrono_tz::UTC,
        }
    }
}

impl EngineOptions {
    pub fn with_week_start(mut self, week_start: WeekStartDay) -> Self {
        self.week_start = week_start;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// The recurrence's own timezone, or the default.
    pub fn timezone_for(&self, timezone: Option<Tz>) -> Tz {
        timezone.unwrap_or(self.timezone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.week_start, WeekStartDay::Monday);
        assert_eq!(options.timezone_for(None), chrono_tz::UTC);
    }

    #[test]
    fn test_explicit_timezone_wins() {
        let options = EngineOptions::default().with_timezone(chrono_tz::America::New_York);
        assert_eq!(options.timezone_for(Some(chrono_tz::Asia::Tokyo)), chrono_tz::Asia::Tokyo);
        assert_eq!(options.timezone_for(None), chrono_tz::America::New_York);
    }
}
