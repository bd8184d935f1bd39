use crate::{require_text, ContractError};
use chrono::{NaiveDate, NaiveTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("static regex"))
}

/// A 24h `HH:MM` wall-clock time, stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockTime(u16);

impl BlockTime {
    pub fn parse(value: &str) -> Result<Self, ContractError> {
        let invalid = || ContractError::InvalidTime {
            value: value.to_string(),
        };
        let captures = time_pattern().captures(value.trim()).ok_or_else(invalid)?;
        let hours: u16 = captures[1].parse().map_err(|_| invalid())?;
        let minutes: u16 = captures[2].parse().map_err(|_| invalid())?;
        Ok(Self(hours * 60 + minutes))
    }

    pub fn from_time(time: NaiveTime) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }

    pub fn minutes(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for BlockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for BlockTime {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl TryFrom<String> for BlockTime {
    type Error = ContractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BlockTime> for String {
    fn from(value: BlockTime) -> Self {
        value.to_string()
    }
}

fn validate_span(start: BlockTime, end: BlockTime, title: &str) -> Result<(), ContractError> {
    require_text(title, "block title")?;
    if end <= start {
        return Err(ContractError::InvalidTimeRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok(())
}

/// A time block on one day. Overlap with other blocks is allowed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub start: BlockTime,
    pub end: BlockTime,
    pub title: String,
}

impl CalendarBlock {
    pub fn new(
        date: NaiveDate,
        start: BlockTime,
        end: BlockTime,
        title: impl Into<String>,
    ) -> Result<Self, ContractError> {
        let title = title.into().trim().to_string();
        validate_span(start, end, &title)?;
        Ok(Self {
            id: None,
            date,
            start,
            end,
            title,
        })
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        validate_span(self.start, self.end, &self.title)
    }
}

/// Orders blocks of one day by start, then end.
pub fn sort_blocks(blocks: &mut [CalendarBlock]) {
    blocks.sort_by_key(|block| (block.start, block.end, block.id));
}

/// The earliest block starting at or after `now`.
pub fn next_block(blocks: &[CalendarBlock], now: BlockTime) -> Option<&CalendarBlock> {
    blocks
        .iter()
        .filter(|block| block.start >= now)
        .min_by_key(|block| (block.start, block.end))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateBlock {
    pub start: BlockTime,
    pub end: BlockTime,
    pub title: String,
}

impl TemplateBlock {
    pub fn validate(&self) -> Result<(), ContractError> {
        validate_span(self.start, self.end, &self.title)
    }

    pub fn on(&self, date: NaiveDate) -> CalendarBlock {
        CalendarBlock {
            id: None,
            date,
            start: self.start,
            end: self.end,
            title: self.title.trim().to_string(),
        }
    }
}

/// Reusable set of blocks applied additively to a date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub blocks: Vec<TemplateBlock>,
}

impl DayTemplate {
    pub fn validate(&self) -> Result<(), ContractError> {
        require_text(&self.name, "template name")?;
        self.blocks.iter().try_for_each(TemplateBlock::validate)
    }
}
