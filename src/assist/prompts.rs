use super::AssistError;
use crate::grouping::Granularity;
use crate::model::{format_date, Task};
use crate::notes::strip_images;
use serde::Deserialize;

pub const DEFAULT_TASK_PROMPT: &str = "You are an expert project manager. Break down the following user goal into 3 to 5 concrete, actionable, short todo list items. Goal: \"{{goal}}\"";

pub const DEFAULT_SUMMARY_PROMPT: &str = "You are a professional work-report writer.

Write a work report for the tasks in this period: \"{{groupName}}\"

Tasks:
{{taskList}}

{{detailLevel}}. Use the following Markdown layout:

## Overview
- Total tasks, completed tasks and completion rate
- Progress on important tasks

## Done
- Main completed work, grouped by priority or category
- Short notes on outcomes

## In Progress / To Do
- Open tasks and their current state
- Expected completion or blockers

## Highlights
- Notable results worth sharing

## Next Period
- Focus areas derived from the open tasks

## Notes
- Anything else worth mentioning";

pub const JSON_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Return ONLY a raw JSON object with a 'tasks' property containing an array of strings.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const JSON_SUFFIX: &str = " Return JSON { \"tasks\": string[] }";

const DETAILED: &str = "Analyse the tasks in detail using their notes";
const BRIEF: &str = "Give a high-level summary of the task list";

#[derive(Deserialize)]
struct TaskList {
    #[serde(default)]
    tasks: Vec<String>,
}

pub fn task_prompt(template: &str, goal: &str) -> String {
    template.replace("{{goal}}", goal)
}

pub fn summary_prompt(
    template: &str,
    group_name: &str,
    tasks: &[Task],
    granularity: Granularity,
) -> String {
    let detail = if granularity.is_detailed() {
        DETAILED
    } else {
        BRIEF
    };
    template
        .replace("{{groupName}}", group_name)
        .replace("{{taskList}}", &task_lines(tasks, granularity))
        .replace("{{detailLevel}}", detail)
}

/// One line per task; day and week buckets also carry dates and notes.
pub fn task_lines(tasks: &[Task], granularity: Granularity) -> String {
    tasks
        .iter()
        .map(|task| task_line(task, granularity.is_detailed()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn task_line(task: &Task, detailed: bool) -> String {
    let status = if task.completed { "[Done]" } else { "[Todo]" };
    let mut line = format!("- {} {}", status, task.text);
    if task.is_important {
        line.push_str(" (Important)");
    }
    if !detailed {
        return line;
    }
    if let Some(start) = task.start_date {
        line.push_str(&format!(" Start: {}", format_date(start)));
    }
    if let Some(due) = task.due_date {
        line.push_str(&format!(" Due: {}", format_date(due)));
    }
    let note = task
        .description
        .as_deref()
        .map(strip_images)
        .unwrap_or_default();
    if !note.is_empty() {
        line.push_str(&format!("\n  Notes: {}", note));
    }
    line
}

/// Parses `{"tasks": [...]}`, tolerating Markdown code fences around it.
pub fn parse_task_list(raw: &str) -> Result<Vec<String>, AssistError> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(AssistError::EmptyResponse);
    }
    let parsed: TaskList =
        serde_json::from_str(cleaned).map_err(|err| AssistError::Parse(err.to_string()))?;
    Ok(parsed
        .tasks
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

pub fn fallback_subtasks(goal: &str) -> Vec<String> {
    vec![
        format!("Research {}", goal),
        format!("Draft outline for {}", goal),
        format!("Review and refine {}", goal),
    ]
}

pub fn fallback_summary(title: &str, tasks: &[Task]) -> String {
    let completed = tasks.iter().filter(|t| t.completed).count();
    format!(
        "**{} Summary**\n\nThis list has {} tasks, {} of which are completed. Keep going!",
        title,
        tasks.len(),
        completed
    )
}
