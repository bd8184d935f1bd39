use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Key of the singleton settings record.
pub const SETTINGS_ID: &str = "main";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Morning,
    Execution,
    Evening,
    Closed,
}

impl Default for DayStatus {
    fn default() -> Self {
        Self::Morning
    }
}

impl DayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayStatus::Morning => "morning",
            DayStatus::Execution => "execution",
            DayStatus::Evening => "evening",
            DayStatus::Closed => "closed",
        }
    }

    /// The only forward step out of this phase. `Closed` has none; it is
    /// left solely through a day rollover.
    pub fn next(&self) -> Option<DayStatus> {
        match self {
            DayStatus::Morning => Some(DayStatus::Execution),
            DayStatus::Execution => Some(DayStatus::Evening),
            DayStatus::Evening => Some(DayStatus::Closed),
            DayStatus::Closed => None,
        }
    }

    pub fn can_edit_morning(&self) -> bool {
        matches!(self, DayStatus::Morning)
    }

    pub fn can_check_todos(&self) -> bool {
        matches!(self, DayStatus::Execution)
    }

    pub fn can_edit_evening(&self) -> bool {
        matches!(self, DayStatus::Evening)
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, DayStatus::Closed)
    }
}

impl fmt::Display for DayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "morning" => Ok(DayStatus::Morning),
            "execution" => Ok(DayStatus::Execution),
            "evening" => Ok(DayStatus::Evening),
            "closed" => Ok(DayStatus::Closed),
            other => Err(format!("Unknown day status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UiSettings {
    #[serde(default = "default_start_screen")]
    pub start_screen: String,
    #[serde(default)]
    pub debug: bool,
}

fn default_start_screen() -> String {
    "dashboard".to_string()
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            start_screen: default_start_screen(),
            debug: false,
        }
    }
}

/// The singleton day-state record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub id: String,
    pub current_day_key: NaiveDate,
    #[serde(default)]
    pub day_status: DayStatus,
    #[serde(default)]
    pub morning_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub evening_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub day_closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ui: UiSettings,
}

impl Settings {
    pub fn fresh(day: NaiveDate) -> Self {
        Self {
            id: SETTINGS_ID.to_string(),
            current_day_key: day,
            day_status: DayStatus::Morning,
            morning_completed_at: None,
            evening_started_at: None,
            day_closed_at: None,
            ui: UiSettings::default(),
        }
    }

    /// Moves the record onto `day`, back to morning with no phase timestamps.
    /// UI preferences survive.
    pub fn roll_over(&mut self, day: NaiveDate) {
        self.current_day_key = day;
        self.day_status = DayStatus::Morning;
        self.morning_completed_at = None;
        self.evening_started_at = None;
        self.day_closed_at = None;
    }

    /// Applies the forward step `from -> from.next()` stamped at `at`.
    /// Returns false when the record is not in `from`.
    pub fn advance_from(&mut self, from: DayStatus, at: DateTime<Utc>) -> bool {
        if self.day_status != from {
            return false;
        }
        let Some(next) = from.next() else {
            return false;
        };
        match next {
            DayStatus::Execution => self.morning_completed_at = Some(at),
            DayStatus::Evening => self.evening_started_at = Some(at),
            DayStatus::Closed => self.day_closed_at = Some(at),
            DayStatus::Morning => {}
        }
        self.day_status = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
    }

    #[test]
    fn guards_hold_in_exactly_one_phase() {
        let all = [
            DayStatus::Morning,
            DayStatus::Execution,
            DayStatus::Evening,
            DayStatus::Closed,
        ];
        for status in all {
            let open = [
                status.can_edit_morning(),
                status.can_check_todos(),
                status.can_edit_evening(),
                status.is_read_only(),
            ];
            assert_eq!(open.iter().filter(|flag| **flag).count(), 1, "{status}");
        }
    }

    #[test]
    fn advance_only_from_matching_phase() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).single().expect("ts");
        let mut settings = Settings::fresh(day(1));

        assert!(!settings.advance_from(DayStatus::Execution, at));
        assert!(settings.advance_from(DayStatus::Morning, at));
        assert_eq!(settings.day_status, DayStatus::Execution);
        assert_eq!(settings.morning_completed_at, Some(at));
        assert!(!settings.advance_from(DayStatus::Morning, at));
        assert_eq!(settings.day_status, DayStatus::Execution);
    }

    #[test]
    fn roll_over_clears_day_timestamps_but_keeps_ui() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).single().expect("ts");
        let mut settings = Settings::fresh(day(1));
        settings.ui.debug = true;
        settings.advance_from(DayStatus::Morning, at);
        settings.advance_from(DayStatus::Execution, at);
        settings.advance_from(DayStatus::Evening, at);
        assert_eq!(settings.day_status, DayStatus::Closed);

        settings.roll_over(day(2));
        assert_eq!(settings.current_day_key, day(2));
        assert_eq!(settings.day_status, DayStatus::Morning);
        assert!(settings.morning_completed_at.is_none());
        assert!(settings.evening_started_at.is_none());
        assert!(settings.day_closed_at.is_none());
        assert!(settings.ui.debug);
    }

    #[test]
    fn settings_serialize_with_camel_case_keys() {
        let value = serde_json::to_value(Settings::fresh(day(1))).expect("serialize");
        assert_eq!(value["id"], "main");
        assert_eq!(value["currentDayKey"], "2024-01-01");
        assert_eq!(value["dayStatus"], "morning");
        assert_eq!(value["ui"]["startScreen"], "dashboard");
    }
}
