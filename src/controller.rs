//! The task list as the user manipulates it.
//!
//! `Planner` owns the in-memory tasks and mirrors every change into a
//! [`TaskStore`]. The in-memory list is authoritative: a failed write is
//! logged and the operation still succeeds. Adapter failures degrade to a
//! fallback plus a short-lived notice.

use crate::assist::{AssistError, Assistant};
use crate::filter::{filter_tasks, Counts, Filter};
use crate::grouping::{group_tasks, Bucket, BucketKey, Granularity};
use crate::model::{generate_id, Task, TaskError, TaskId, TaskPatch};
use crate::ordering::{plan_drop, stacked_orders, top_order, DropTarget};
use crate::store::{StoreError, TaskStore};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::time::{Duration, Instant};

/// How long a notice stays visible.
pub const NOTICE_TTL: Duration = Duration::from_secs(3);

pub const DECOMPOSE_FAILED: &str = "Failed to generate tasks via AI. Added as a plain task instead.";
pub const SUMMARY_FAILED: &str = "Failed to generate a summary. Check your AI settings.";

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub message: String,
    pub expires_at: Instant,
}

/// Everything a summary call needs, detached from the planner so it can run
/// on another task.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub key: BucketKey,
    pub title: String,
    pub granularity: Granularity,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub key: BucketKey,
    pub title: String,
    pub content: String,
}

pub struct Planner {
    tasks: Vec<Task>,
    store: Box<dyn TaskStore + Send>,
    selected: Option<TaskId>,
    notice: Option<Notice>,
}

impl Planner {
    pub fn load(store: Box<dyn TaskStore + Send>) -> Result<Self, StoreError> {
        let tasks = store.get_all()?;
        tracing::debug!(count = tasks.len(), "loaded tasks");
        Ok(Planner {
            tasks,
            store,
            selected: None,
            notice: None,
        })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Accepts a unique id prefix as well as a full id.
    pub fn resolve_id(&self, prefix: &str) -> Result<TaskId, TaskError> {
        if let Some(task) = self.get(prefix) {
            return Ok(task.id.clone());
        }
        let mut matches = self.tasks.iter().filter(|t| t.id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(task), None) if !prefix.is_empty() => Ok(task.id.clone()),
            _ => Err(TaskError::NotFound(prefix.to_string())),
        }
    }

    pub fn counts(&self) -> Counts {
        Counts::of(&self.tasks)
    }

    /// Filtered, sorted and bucketed tasks as the list shows them.
    pub fn view(&self, filter: Filter, granularity: Granularity, today: NaiveDate) -> Vec<Bucket<'_>> {
        group_tasks(filter_tasks(&self.tasks, filter), granularity, today)
    }

    /// Adds a task above every existing one.
    pub fn create(&mut self, text: &str, due_date: Option<NaiveDate>) -> Result<TaskId, TaskError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TaskError::EmptyText);
        }
        let order = top_order(&self.tasks);
        let task = Task::new(generate_id(), text.to_string(), due_date, order);
        let id = task.id.clone();
        self.tasks.insert(0, task);
        self.persist(&id);
        tracing::debug!(task_id = %id, order, "created task");
        Ok(id)
    }

    /// Asks the assistant to split `goal` into subtasks and adds them; falls
    /// back to a single plain task when that fails or yields nothing.
    pub async fn decompose_and_create(
        &mut self,
        assistant: &Assistant,
        goal: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<Vec<TaskId>, TaskError> {
        if goal.trim().is_empty() {
            return Err(TaskError::EmptyText);
        }
        let outcome = assistant.decompose(goal.trim()).await;
        self.apply_decomposition(goal, due_date, outcome)
    }

    /// Second half of [`Planner::decompose_and_create`], for callers that ran
    /// the assistant themselves.
    pub fn apply_decomposition(
        &mut self,
        goal: &str,
        due_date: Option<NaiveDate>,
        outcome: Result<Vec<String>, AssistError>,
    ) -> Result<Vec<TaskId>, TaskError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(TaskError::EmptyText);
        }
        let subtasks: Vec<String> = match outcome {
            Ok(list) => list
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, goal, "decomposition failed");
                Vec::new()
            }
        };
        if subtasks.is_empty() {
            tracing::info!(goal, "falling back to a plain task");
            self.notify(DECOMPOSE_FAILED);
            return self.create(goal, due_date).map(|id| vec![id]);
        }

        let orders = stacked_orders(&self.tasks, subtasks.len());
        let created: Vec<Task> = subtasks
            .into_iter()
            .zip(orders)
            .map(|(text, order)| {
                let mut task = Task::new(generate_id(), text, due_date, order);
                task.is_ai_generated = true;
                task
            })
            .collect();
        let ids: Vec<TaskId> = created.iter().map(|t| t.id.clone()).collect();
        self.tasks.splice(0..0, created);
        for id in &ids {
            self.persist(id);
        }
        tracing::debug!(count = ids.len(), "created generated tasks");
        Ok(ids)
    }

    /// Flips completion and returns the new state.
    pub fn toggle_complete(&mut self, id: &str) -> Result<bool, TaskError> {
        let task = self.find_mut(id)?;
        task.completed = !task.completed;
        let completed = task.completed;
        self.persist(id);
        Ok(completed)
    }

    pub fn update(&mut self, id: &str, patch: &TaskPatch) -> Result<(), TaskError> {
        patch.validate()?;
        let task = self.find_mut(id)?;
        patch.apply(task);
        self.persist(id);
        Ok(())
    }

    /// Removes the task and closes its details if they were open.
    pub fn delete(&mut self, id: &str) -> Result<Task, TaskError> {
        let index = self
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        let removed = self.tasks.remove(index);
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        if let Err(err) = self.store.delete(id) {
            tracing::warn!(task_id = %id, error = %err, "failed to delete stored task");
        }
        Ok(removed)
    }

    /// Applies a drag of `dragged` onto `target` in the given view. Returns
    /// false when the drop changes nothing.
    pub fn move_task(
        &mut self,
        filter: Filter,
        granularity: Granularity,
        today: NaiveDate,
        dragged: &str,
        target: &DropTarget,
    ) -> Result<bool, TaskError> {
        if self.get(dragged).is_none() {
            return Err(TaskError::NotFound(dragged.to_string()));
        }
        if let DropTarget::Task(target_id) = target {
            if self.get(target_id).is_none() {
                return Err(TaskError::NotFound(target_id.clone()));
            }
        }
        let plan = {
            let buckets = self.view(filter, granularity, today);
            plan_drop(&buckets, granularity, dragged, target)
        };
        let Some(plan) = plan else {
            return Ok(false);
        };

        let mut changed = Vec::new();
        for task in self.tasks.iter_mut() {
            let mut touched = false;
            if let Some(order) = plan.order_of(&task.id) {
                if task.order != order {
                    task.order = order;
                    touched = true;
                }
            }
            if task.id == plan.task_id {
                if let Some(due) = plan.due_date {
                    if task.due_date != due {
                        task.due_date = due;
                        touched = true;
                    }
                }
            }
            if touched {
                changed.push(task.id.clone());
            }
        }
        for id in &changed {
            self.persist(id);
        }
        tracing::debug!(task_id = %dragged, changed = changed.len(), "moved task");
        Ok(!changed.is_empty())
    }

    /// Snapshot of one bucket of the current view for summarizing.
    pub fn summary_request(
        &self,
        key: &BucketKey,
        filter: Filter,
        granularity: Granularity,
        today: NaiveDate,
    ) -> Option<SummaryRequest> {
        let buckets = self.view(filter, granularity, today);
        let bucket = buckets.into_iter().find(|b| &b.key == key)?;
        Some(SummaryRequest {
            key: bucket.key,
            title: bucket.title,
            granularity,
            tasks: bucket.tasks.into_iter().cloned().collect(),
        })
    }

    pub async fn summarize_group(
        &mut self,
        assistant: &Assistant,
        request: SummaryRequest,
    ) -> Option<Summary> {
        let outcome = assistant
            .summarize(&request.title, &request.tasks, request.granularity)
            .await;
        self.finish_summary(request.key, request.title, outcome)
    }

    /// Turns a summary result into a [`Summary`], or a notice on failure.
    pub fn finish_summary(
        &mut self,
        key: BucketKey,
        title: String,
        outcome: Result<String, AssistError>,
    ) -> Option<Summary> {
        match outcome {
            Ok(content) => Some(Summary {
                key,
                title,
                content,
            }),
            Err(err) => {
                tracing::warn!(bucket = %key, error = %err, "summary failed");
                self.notify(SUMMARY_FAILED);
                None
            }
        }
    }

    pub fn open_details(&mut self, id: &str) -> Result<(), TaskError> {
        let id = self
            .get(id)
            .map(|t| t.id.clone())
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        self.selected = Some(id);
        Ok(())
    }

    pub fn close_details(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&Task> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    pub fn notify(&mut self, message: impl Into<String>) {
        self.notice = Some(Notice {
            message: message.into(),
            expires_at: Instant::now() + NOTICE_TTL,
        });
    }

    /// The current notice while it has not expired.
    pub fn notice(&self, now: Instant) -> Option<&str> {
        self.notice
            .as_ref()
            .filter(|n| now < n.expires_at)
            .map(|n| n.message.as_str())
    }

    /// Adds a handful of demo tasks around `today`.
    pub fn seed_samples(&mut self, today: NaiveDate) {
        let now = Utc::now();
        let samples = [
            ("Review quarterly goals", Some(today - ChronoDuration::days(1)), true, false, 3),
            ("Buy groceries for the week", Some(today), false, true, 2),
            ("Reply to project emails", Some(today), false, false, 1),
            ("Prepare slides for Monday meeting", Some(today + ChronoDuration::days(1)), false, true, 0),
            ("Plan weekend hike", Some(today + ChronoDuration::days(7)), false, false, 0),
        ];
        let orders = stacked_orders(&self.tasks, samples.len());
        let created: Vec<Task> = samples
            .into_iter()
            .zip(orders)
            .map(|((text, due, completed, important, age_hours), order)| {
                let mut task = Task::new(generate_id(), text.to_string(), due, order);
                task.completed = completed;
                task.is_important = important;
                task.created_at = now - ChronoDuration::hours(age_hours);
                task
            })
            .collect();
        let ids: Vec<TaskId> = created.iter().map(|t| t.id.clone()).collect();
        self.tasks.splice(0..0, created);
        for id in &ids {
            self.persist(id);
        }
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Task, TaskError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    fn persist(&mut self, id: &str) {
        let Some(task) = self.tasks.iter().find(|t| t.id == id) else {
            return;
        };
        if let Err(err) = self.store.put(task) {
            tracing::warn!(task_id = %id, error = %err, "failed to persist task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn planner_with(tasks: Vec<Task>) -> Planner {
        Planner::load(Box::new(MemoryStore::with_tasks(tasks))).unwrap()
    }

    fn task(id: &str, order: f64, due: Option<NaiveDate>) -> Task {
        Task::new(id.into(), id.to_uppercase(), due, order)
    }

    fn ids(buckets: &[Bucket<'_>]) -> Vec<Vec<String>> {
        buckets
            .iter()
            .map(|b| b.tasks.iter().map(|t| t.id.clone()).collect())
            .collect()
    }

    #[test]
    fn created_tasks_go_on_top() {
        let mut planner = planner_with(vec![task("a", 2.0, None), task("b", 5.0, None)]);
        let id = planner.create("  Write tests ", None).unwrap();
        let created = planner.get(&id).unwrap();
        assert_eq!(created.order, 1.0);
        assert_eq!(created.text, "Write tests");
        assert_eq!(planner.create("   ", None), Err(TaskError::EmptyText));
    }

    #[test]
    fn first_task_in_empty_list_gets_order_zero() {
        let mut planner = planner_with(Vec::new());
        let id = planner.create("Only", None).unwrap();
        assert_eq!(planner.get(&id).unwrap().order, 0.0);
    }

    #[tokio::test]
    async fn offline_decomposition_stacks_subtasks_above_existing() {
        let mut planner = planner_with(vec![task("old", 0.0, None)]);
        let ids = planner
            .decompose_and_create(&Assistant::offline(), "Plan trip", None)
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);
        let view = planner.view(Filter::All, Granularity::Day, day(10));
        let texts: Vec<&str> = view[0].tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Research Plan trip",
                "Draft outline for Plan trip",
                "Review and refine Plan trip",
                "OLD"
            ]
        );
        assert!(view[0].tasks[..3].iter().all(|t| t.is_ai_generated));
        assert_eq!(planner.get(&ids[0]).unwrap().order, -3.0);
    }

    #[test]
    fn failed_decomposition_keeps_the_goal() {
        let mut planner = planner_with(vec![task("old", 4.0, None)]);
        let ids = planner
            .apply_decomposition("Plan trip", Some(day(3)), Err(AssistError::EmptyResponse))
            .unwrap();
        assert_eq!(ids.len(), 1);
        let created = planner.get(&ids[0]).unwrap();
        assert_eq!(created.text, "Plan trip");
        assert!(!created.is_ai_generated);
        assert_eq!(created.order, 3.0);
        assert_eq!(created.due_date, Some(day(3)));
        let now = Instant::now();
        assert_eq!(planner.notice(now), Some(DECOMPOSE_FAILED));
        assert_eq!(planner.notice(now + NOTICE_TTL + Duration::from_millis(1)), None);
    }

    #[test]
    fn empty_decomposition_also_falls_back() {
        let mut planner = planner_with(Vec::new());
        let ids = planner
            .apply_decomposition("Goal", None, Ok(vec!["  ".into()]))
            .unwrap();
        assert_eq!(planner.get(&ids[0]).unwrap().text, "Goal");
    }

    #[test]
    fn deleting_selected_task_closes_details() {
        let mut planner = planner_with(vec![task("a", 0.0, None), task("b", 1.0, None)]);
        planner.open_details("a").unwrap();
        planner.delete("b").unwrap();
        assert_eq!(planner.selected().map(|t| t.id.as_str()), Some("a"));
        planner.delete("a").unwrap();
        assert!(planner.selected().is_none());
        assert!(matches!(planner.delete("a"), Err(TaskError::NotFound(_))));
    }

    #[test]
    fn toggle_moves_task_to_completed_tail() {
        let mut planner = planner_with(vec![
            task("a", 0.0, None),
            task("b", 1.0, None),
            task("c", 2.0, None),
        ]);
        assert!(planner.toggle_complete("a").unwrap());
        let view = planner.view(Filter::All, Granularity::Day, day(1));
        assert_eq!(ids(&view), vec![vec!["b", "c", "a"]]);
        assert_eq!(planner.counts().completed, 1);
        assert!(!planner.toggle_complete("a").unwrap());
    }

    #[test]
    fn double_toggle_restores_state_and_keeps_order() {
        let mut planner = planner_with(vec![task("a", 2.5, None), task("b", 7.0, None)]);
        let before = planner.get("a").unwrap().clone();
        planner.toggle_complete("a").unwrap();
        assert_eq!(planner.get("a").unwrap().order, before.order);
        planner.toggle_complete("a").unwrap();
        let after = planner.get("a").unwrap();
        assert_eq!(after.completed, before.completed);
        assert_eq!(after.order, before.order);
        assert_eq!(after, &before);
    }

    #[test]
    fn update_rejects_blank_text_and_unknown_ids() {
        let mut planner = planner_with(vec![task("a", 0.0, None)]);
        let blank = TaskPatch {
            text: Some(" ".into()),
            ..TaskPatch::default()
        };
        assert_eq!(planner.update("a", &blank), Err(TaskError::EmptyText));
        let rename = TaskPatch {
            text: Some("Renamed".into()),
            ..TaskPatch::default()
        };
        assert!(matches!(
            planner.update("zz", &rename),
            Err(TaskError::NotFound(_))
        ));
        planner.update("a", &rename).unwrap();
        assert_eq!(planner.get("a").unwrap().text, "Renamed");
    }

    #[test]
    fn moving_within_bucket_reuses_orders() {
        let mut planner = planner_with(vec![
            task("a", 1.0, None),
            task("b", 2.0, None),
            task("c", 3.0, None),
        ]);
        let moved = planner
            .move_task(
                Filter::All,
                Granularity::Day,
                day(1),
                "c",
                &DropTarget::Task("a".into()),
            )
            .unwrap();
        assert!(moved);
        let view = planner.view(Filter::All, Granularity::Day, day(1));
        assert_eq!(ids(&view), vec![vec!["c", "a", "b"]]);
        let mut orders: Vec<f64> = planner.tasks().iter().map(|t| t.order).collect();
        orders.sort_by(f64::total_cmp);
        assert_eq!(orders, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn dropping_on_header_reassigns_due_date() {
        let mut planner = planner_with(vec![
            task("a", 0.0, Some(day(2))),
            task("b", 5.0, Some(day(3))),
        ]);
        let target = DropTarget::Bucket(BucketKey::Dated("2024-01-03".into()));
        assert!(planner
            .move_task(Filter::All, Granularity::Day, day(1), "a", &target)
            .unwrap());
        let moved = planner.get("a").unwrap();
        assert_eq!(moved.due_date, Some(day(3)));
        assert_eq!(moved.order, 4.0);
    }

    #[test]
    fn moving_unknown_task_is_an_error_and_self_drop_is_a_no_op() {
        let mut planner = planner_with(vec![task("a", 0.0, None)]);
        assert!(matches!(
            planner.move_task(
                Filter::All,
                Granularity::Day,
                day(1),
                "zz",
                &DropTarget::Task("a".into())
            ),
            Err(TaskError::NotFound(_))
        ));
        assert!(!planner
            .move_task(
                Filter::All,
                Granularity::Day,
                day(1),
                "a",
                &DropTarget::Task("a".into())
            )
            .unwrap());
    }

    #[test]
    fn store_failures_do_not_block_changes() {
        let mut planner = Planner::load(Box::new(MemoryStore::failing())).unwrap();
        let id = planner.create("Still here", None).unwrap();
        assert!(planner.toggle_complete(&id).unwrap());
        planner.delete(&id).unwrap();
        assert!(planner.tasks().is_empty());
    }

    #[tokio::test]
    async fn summary_covers_one_bucket() {
        let mut planner = planner_with(vec![
            task("a", 0.0, Some(day(5))),
            task("b", 1.0, Some(day(5))),
            task("c", 2.0, None),
        ]);
        planner.toggle_complete("a").unwrap();
        let key = BucketKey::Dated("2024-01-05".into());
        let request = planner
            .summary_request(&key, Filter::All, Granularity::Day, day(5))
            .unwrap();
        assert_eq!(request.title, "Today");
        assert_eq!(request.tasks.len(), 2);
        let summary = planner
            .summarize_group(&Assistant::offline(), request)
            .await
            .unwrap();
        assert_eq!(
            summary.content,
            "**Today Summary**\n\nThis list has 2 tasks, 1 of which are completed. Keep going!"
        );
    }

    #[test]
    fn failed_summary_sets_notice() {
        let mut planner = planner_with(Vec::new());
        let out = planner.finish_summary(
            BucketKey::NoDate,
            "No Due Date".into(),
            Err(AssistError::NotConfigured),
        );
        assert!(out.is_none());
        assert_eq!(planner.notice(Instant::now()), Some(SUMMARY_FAILED));
    }

    #[test]
    fn ids_resolve_by_unique_prefix() {
        let planner = planner_with(vec![task("abc123", 0.0, None), task("abd456", 1.0, None)]);
        assert_eq!(planner.resolve_id("abc").unwrap(), "abc123");
        assert!(planner.resolve_id("ab").is_err());
        assert!(planner.resolve_id("").is_err());
    }

    #[test]
    fn samples_span_several_days() {
        let mut planner = planner_with(Vec::new());
        planner.seed_samples(day(10));
        let view = planner.view(Filter::All, Granularity::Day, day(10));
        let titles: Vec<&str> = view.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Yesterday", "Today", "Tomorrow", "Wed, Jan 17"]);
    }
}
