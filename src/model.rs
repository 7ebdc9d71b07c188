use chrono::{DateTime, NaiveDate, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type TaskId = String;

/// Calendar dates are stored and accepted as `YYYY-MM-DD`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_important: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_ai_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Image id -> inline-encoded payload, referenced from `description`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, String>,
    /// Manual rank. Records written before ordering existed load as 0.
    #[serde(default)]
    pub order: f64,
}

/// Field-level partial update. `id` and `created_at` are never touched.
///
/// Clearable fields use a nested `Option`: `Some(None)` clears the value.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TaskPatch {
    pub text: Option<String>,
    pub completed: Option<bool>,
    pub start_date: Option<Option<NaiveDate>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub is_important: Option<bool>,
    pub is_ai_generated: Option<bool>,
    pub description: Option<Option<String>>,
    pub images: Option<BTreeMap<String, String>>,
    pub order: Option<f64>,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TaskError {
    #[error("task text must not be empty")]
    EmptyText,
    #[error("task not found: {0}")]
    NotFound(String),
}

impl Task {
    pub fn new(id: TaskId, text: String, due_date: Option<NaiveDate>, order: f64) -> Self {
        Task {
            id,
            text,
            completed: false,
            created_at: Utc::now(),
            start_date: None,
            due_date,
            is_important: false,
            is_ai_generated: false,
            description: None,
            images: BTreeMap::new(),
            order,
        }
    }
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    /// Rejects a rename to blank text; everything else is accepted as given.
    pub fn validate(&self) -> Result<(), TaskError> {
        match &self.text {
            Some(text) if text.trim().is_empty() => Err(TaskError::EmptyText),
            _ => Ok(()),
        }
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(text) = &self.text {
            task.text = text.trim().to_string();
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(start) = self.start_date {
            task.start_date = start;
        }
        if let Some(due) = self.due_date {
            task.due_date = due;
        }
        if let Some(important) = self.is_important {
            task.is_important = important;
        }
        if let Some(generated) = self.is_ai_generated {
            task.is_ai_generated = generated;
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(images) = &self.images {
            task.images = images.clone();
        }
        if let Some(order) = self.order {
            task.order = order;
        }
    }
}

pub fn generate_id() -> TaskId {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

pub fn parse_date(input: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Task {
        Task::new("abc".into(), "Write report".into(), None, 3.0)
    }

    #[test]
    fn patch_merges_only_given_fields() {
        let mut task = sample();
        let created = task.created_at;
        let patch = TaskPatch {
            is_important: Some(true),
            due_date: Some(NaiveDate::from_ymd_opt(2024, 5, 1)),
            ..TaskPatch::default()
        };
        patch.apply(&mut task);
        assert!(task.is_important);
        assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(task.text, "Write report");
        assert_eq!(task.order, 3.0);
        assert_eq!(task.created_at, created);
    }

    #[test]
    fn patch_can_clear_optional_fields() {
        let mut task = sample();
        task.description = Some("notes".into());
        task.due_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        let patch = TaskPatch {
            description: Some(None),
            due_date: Some(None),
            ..TaskPatch::default()
        };
        patch.apply(&mut task);
        assert_eq!(task.description, None);
        assert_eq!(task.due_date, None);
    }

    #[test]
    fn blank_rename_is_rejected() {
        let patch = TaskPatch {
            text: Some("   ".into()),
            ..TaskPatch::default()
        };
        assert_eq!(patch.validate(), Err(TaskError::EmptyText));
        assert!(TaskPatch::default().validate().is_ok());
        assert!(TaskPatch::default().is_empty());
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 10);
        assert_ne!(a, b);
    }

    #[test]
    fn dates_use_iso_format() {
        let date = parse_date("2024-01-07").unwrap();
        assert_eq!(format_date(date), "2024-01-07");
        assert!(parse_date("2024.01.07").is_err());
    }

    #[test]
    fn missing_order_loads_as_zero() {
        let yaml = "id: x1\ntext: legacy\ncreated_at: 1700000000000\n";
        let task: Task = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(task.order, 0.0);
        assert!(!task.completed);
        assert!(task.images.is_empty());
    }
}
