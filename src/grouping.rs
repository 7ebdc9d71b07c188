//! Date buckets for the task list.
//!
//! Tasks are bucketed by their due date at a chosen granularity. Bucket keys are
//! zero-padded date prefixes (`2024-01-07`, `2024-01`, `2024`), so plain string
//! comparison orders them chronologically. Buckets are laid out as
//! past -> today -> future -> no date, and one of them is marked as the anchor
//! the list scrolls to.

use crate::model::{format_date, Task};
use chrono::{Datelike, Duration, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const NO_DATE_KEY: &str = "no-date";
pub const NO_DATE_TITLE: &str = "No Due Date";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BucketKey {
    Dated(String),
    NoDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Past,
    Today,
    Future,
    Undated,
}

#[derive(Debug, Clone)]
pub struct Bucket<'a> {
    pub key: BucketKey,
    pub title: String,
    pub timeframe: Timeframe,
    pub tasks: Vec<&'a Task>,
    pub is_anchor: bool,
}

/// Remembers the granularity the view was last anchored for, so the
/// scroll-to-anchor happens once per granularity change and not on every
/// data mutation.
#[derive(Debug, Default)]
pub struct AnchorTracker {
    anchored_for: Option<Granularity>,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Year,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Granularity::Day => "Day",
            Granularity::Week => "Week",
            Granularity::Month => "Month",
            Granularity::Year => "Year",
        }
    }

    pub fn next(&self) -> Granularity {
        match self {
            Granularity::Day => Granularity::Week,
            Granularity::Week => Granularity::Month,
            Granularity::Month => Granularity::Year,
            Granularity::Year => Granularity::Day,
        }
    }

    /// Day and week buckets are small enough to summarize with full notes.
    pub fn is_detailed(&self) -> bool {
        matches!(self, Granularity::Day | Granularity::Week)
    }
}

impl BucketKey {
    pub fn for_date(due: Option<NaiveDate>, granularity: Granularity) -> BucketKey {
        let Some(date) = due else {
            return BucketKey::NoDate;
        };
        let key = match granularity {
            Granularity::Day => format_date(date),
            Granularity::Week => format_date(week_start(date)),
            Granularity::Month => date.format("%Y-%m").to_string(),
            Granularity::Year => date.format("%Y").to_string(),
        };
        BucketKey::Dated(key)
    }

    /// Parses a user-supplied key, accepting only the shape the granularity
    /// produces (a week key must be a Monday).
    pub fn parse(input: &str, granularity: Granularity) -> Option<BucketKey> {
        let input = input.trim();
        if input == NO_DATE_KEY {
            return Some(BucketKey::NoDate);
        }
        let key = BucketKey::Dated(input.to_string());
        let date = key.due_date(granularity)?;
        (BucketKey::for_date(Some(date), granularity) == key).then_some(key)
    }

    pub fn as_str(&self) -> &str {
        match self {
            BucketKey::Dated(key) => key,
            BucketKey::NoDate => NO_DATE_KEY,
        }
    }

    /// The concrete due date a task receives when dropped into this bucket.
    /// `None` means the due date is cleared.
    pub fn due_date(&self, granularity: Granularity) -> Option<NaiveDate> {
        let key = match self {
            BucketKey::Dated(key) => key,
            BucketKey::NoDate => return None,
        };
        let full = match granularity {
            Granularity::Day | Granularity::Week => key.clone(),
            Granularity::Month => format!("{key}-01"),
            Granularity::Year => format!("{key}-01-01"),
        };
        NaiveDate::parse_from_str(&full, "%Y-%m-%d").ok()
    }

    pub fn title(&self, granularity: Granularity, today: NaiveDate) -> String {
        bucket_title(self, granularity, today)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AnchorTracker {
    pub fn new() -> Self {
        AnchorTracker::default()
    }

    /// Returns true exactly once for each change of granularity.
    pub fn should_anchor(&mut self, granularity: Granularity) -> bool {
        if self.anchored_for == Some(granularity) {
            return false;
        }
        self.anchored_for = Some(granularity);
        true
    }

    pub fn reset(&mut self) {
        self.anchored_for = None;
    }
}

/// ISO week start: Monday on or before `date` (a Sunday maps six days back).
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Partitions an already filtered and sorted task list into buckets.
/// Task order inside each bucket is the input order.
pub fn group_tasks<'a, I>(tasks: I, granularity: Granularity, today: NaiveDate) -> Vec<Bucket<'a>>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut members: HashMap<BucketKey, Vec<&'a Task>> = HashMap::new();
    for task in tasks {
        members
            .entry(BucketKey::for_date(task.due_date, granularity))
            .or_default()
            .push(task);
    }

    let today_key = BucketKey::for_date(Some(today), granularity);
    let mut past = Vec::new();
    let mut current = Vec::new();
    let mut future = Vec::new();
    let mut undated = Vec::new();
    for key in members.keys() {
        match key {
            BucketKey::NoDate => undated.push(key.clone()),
            BucketKey::Dated(k) => match k.as_str().cmp(today_key.as_str()) {
                std::cmp::Ordering::Less => past.push(key.clone()),
                std::cmp::Ordering::Equal => current.push(key.clone()),
                std::cmp::Ordering::Greater => future.push(key.clone()),
            },
        }
    }
    past.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    future.sort_by(|a, b| a.as_str().cmp(b.as_str()));

    let anchor = current
        .first()
        .or_else(|| future.first())
        .or_else(|| undated.first())
        .cloned();

    let ordered = past
        .into_iter()
        .map(|k| (k, Timeframe::Past))
        .chain(current.into_iter().map(|k| (k, Timeframe::Today)))
        .chain(future.into_iter().map(|k| (k, Timeframe::Future)))
        .chain(undated.into_iter().map(|k| (k, Timeframe::Undated)));

    ordered
        .map(|(key, timeframe)| {
            let tasks = members.remove(&key).unwrap_or_default();
            Bucket {
                title: bucket_title(&key, granularity, today),
                is_anchor: anchor.as_ref() == Some(&key),
                key,
                timeframe,
                tasks,
            }
        })
        .collect()
}

pub fn anchor_index(buckets: &[Bucket<'_>]) -> Option<usize> {
    buckets.iter().position(|b| b.is_anchor)
}

pub fn bucket_title(key: &BucketKey, granularity: Granularity, today: NaiveDate) -> String {
    let BucketKey::Dated(raw) = key else {
        return NO_DATE_TITLE.to_string();
    };
    let Some(date) = key.due_date(granularity) else {
        return raw.clone();
    };
    match granularity {
        Granularity::Day => match (date - today).num_days() {
            0 => "Today".to_string(),
            1 => "Tomorrow".to_string(),
            -1 => "Yesterday".to_string(),
            _ => date.format("%a, %b %-d").to_string(),
        },
        Granularity::Week => {
            let end = date + Duration::days(6);
            let label = if week_start(today) == date {
                " (This Week)"
            } else {
                ""
            };
            format!(
                "Week of {} - {}{}",
                date.format("%b %-d"),
                end.format("%b %-d"),
                label
            )
        }
        Granularity::Month => date.format("%B %Y").to_string(),
        Granularity::Year => raw.clone(),
    }
}
