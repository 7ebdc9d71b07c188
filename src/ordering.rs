//! Manual ordering.
//!
//! Every task carries a fractional `order`. Reordering inside a bucket reuses
//! the bucket's existing values (the sorted values are dealt back out in the
//! new sequence), so repeated moves never drift. Moving into another bucket
//! gives the task a fresh value relative to its new neighbours and the due
//! date implied by that bucket.

use crate::grouping::{Bucket, BucketKey, Granularity};
use crate::model::{Task, TaskId};
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    /// Dropped onto a task: the dragged task takes that task's position.
    Task(TaskId),
    /// Dropped onto a bucket header: the dragged task goes to the top.
    Bucket(BucketKey),
}

/// Order and date changes produced by one drop.
#[derive(Debug, Clone, PartialEq)]
pub struct MovePlan {
    pub task_id: TaskId,
    /// `Some` when the task changed buckets; the inner value is the new due date.
    pub due_date: Option<Option<NaiveDate>>,
    /// New `order` per task. Always contains the dragged task.
    pub orders: Vec<(TaskId, f64)>,
}

impl MovePlan {
    pub fn order_of(&self, id: &str) -> Option<f64> {
        self.orders
            .iter()
            .find(|(task_id, _)| task_id == id)
            .map(|(_, order)| *order)
    }

    pub fn changes_bucket(&self) -> bool {
        self.due_date.is_some()
    }
}

/// Rank that places a new task above every existing one.
pub fn top_order<'a, I>(tasks: I) -> f64
where
    I: IntoIterator<Item = &'a Task>,
{
    min_order(tasks).map_or(0.0, |min| min - 1.0)
}

/// Ranks for `count` tasks inserted together above everything else, in the
/// order given: the i-th gets `min - (count - i)`.
pub fn stacked_orders<'a, I>(tasks: I, count: usize) -> Vec<f64>
where
    I: IntoIterator<Item = &'a Task>,
{
    let base = min_order(tasks).unwrap_or(0.0);
    (0..count).map(|i| base - (count - i) as f64).collect()
}

fn min_order<'a, I>(tasks: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a Task>,
{
    tasks.into_iter().map(|t| t.order).min_by(f64::total_cmp)
}

/// Plans a drag of `dragged` onto `target` within the given bucket layout.
/// Returns `None` for no-ops: dropping onto itself, or onto something that is
/// not in the layout.
pub fn plan_drop(
    buckets: &[Bucket<'_>],
    granularity: Granularity,
    dragged: &str,
    target: &DropTarget,
) -> Option<MovePlan> {
    let source = buckets
        .iter()
        .position(|b| b.tasks.iter().any(|t| t.id == dragged))?;

    match target {
        DropTarget::Task(target_id) => {
            if target_id == dragged {
                return None;
            }
            let dest = buckets
                .iter()
                .position(|b| b.tasks.iter().any(|t| &t.id == target_id))?;
            if dest == source {
                let orders = reorder_within(&buckets[dest].tasks, dragged, target_id)?;
                return Some(MovePlan {
                    task_id: dragged.to_string(),
                    due_date: None,
                    orders,
                });
            }
            let members = &buckets[dest].tasks;
            let index = members.iter().position(|t| &t.id == target_id)?;
            let orders = insert_at(members, dragged, index);
            Some(MovePlan {
                task_id: dragged.to_string(),
                due_date: Some(buckets[dest].key.due_date(granularity)),
                orders,
            })
        }
        DropTarget::Bucket(key) => {
            let bucket = &buckets[source];
            if &bucket.key == key {
                // Own header: move to the top of the same bucket.
                let first = bucket.tasks.first()?;
                if first.id == dragged {
                    return None;
                }
                let orders = reorder_within(&bucket.tasks, dragged, &first.id)?;
                return Some(MovePlan {
                    task_id: dragged.to_string(),
                    due_date: None,
                    orders,
                });
            }
            let members: &[&Task] = buckets
                .iter()
                .find(|b| &b.key == key)
                .map(|b| b.tasks.as_slice())
                .unwrap_or_default();
            let order = top_order(members.iter().copied());
            Some(MovePlan {
                task_id: dragged.to_string(),
                due_date: Some(key.due_date(granularity)),
                orders: vec![(dragged.to_string(), order)],
            })
        }
    }
}

/// Moves `dragged` to the position of `target` inside one bucket and deals the
/// bucket's existing order values back out in the new sequence.
pub fn reorder_within(group: &[&Task], dragged: &str, target: &str) -> Option<Vec<(TaskId, f64)>> {
    let from = group.iter().position(|t| t.id == dragged)?;
    let to = group.iter().position(|t| t.id == target)?;
    if from == to {
        return None;
    }

    let mut sequence: Vec<&TaskId> = group.iter().map(|t| &t.id).collect();
    let moved = sequence.remove(from);
    sequence.insert(to, moved);

    let mut slots: Vec<f64> = group.iter().map(|t| t.order).collect();
    slots.sort_by(f64::total_cmp);

    Some(
        sequence
            .into_iter()
            .zip(slots)
            .map(|(id, order)| (id.clone(), order))
            .collect(),
    )
}

/// Rank for a task entering `members` just before position `index`.
/// Falls back to renumbering the bucket when the midpoint cannot be
/// represented between its neighbours.
fn insert_at(members: &[&Task], dragged: &str, index: usize) -> Vec<(TaskId, f64)> {
    let order = if index == 0 {
        members[0].order - 1.0
    } else {
        let prev = members[index - 1].order;
        let next = members[index].order;
        let mid = (prev + next) / 2.0;
        if mid == prev || mid == next || !mid.is_finite() {
            return renumber(members, dragged, index);
        }
        mid
    };
    vec![(dragged.to_string(), order)]
}

/// Unit-spaced ranks for the whole bucket with `dragged` placed at `index`,
/// starting from the bucket's current minimum.
fn renumber(members: &[&Task], dragged: &str, index: usize) -> Vec<(TaskId, f64)> {
    tracing::debug!(task_id = %dragged, size = members.len(), "renumbering bucket");
    let start = min_order(members.iter().copied()).unwrap_or(0.0).floor();
    let mut sequence: Vec<TaskId> = members
        .iter()
        .filter(|t| t.id != dragged)
        .map(|t| t.id.clone())
        .collect();
    sequence.insert(index.min(sequence.len()), dragged.to_string());
    sequence
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, start + i as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{filter_tasks, Filter};
    use crate::grouping::group_tasks;
    use pretty_assertions::assert_eq;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn task(id: &str, due: Option<&str>, order: f64) -> Task {
        Task::new(id.into(), id.into(), due.map(date), order)
    }

    fn today() -> NaiveDate {
        date("2024-06-15")
    }

    fn drop_plan(tasks: &[Task], dragged: &str, target: DropTarget) -> Option<MovePlan> {
        let view = filter_tasks(tasks, Filter::All);
        let buckets = group_tasks(view, Granularity::Day, today());
        plan_drop(&buckets, Granularity::Day, dragged, &target)
    }

    #[test]
    fn top_order_is_below_minimum_or_zero() {
        let tasks = vec![task("a", None, 4.0), task("b", None, -2.5)];
        assert_eq!(top_order(&tasks), -3.5);
        assert_eq!(top_order(&Vec::<Task>::new()), 0.0);
    }

    #[test]
    fn stacked_orders_keep_given_sequence_above_existing() {
        let tasks = vec![task("a", None, 0.0), task("b", None, 1.0)];
        assert_eq!(stacked_orders(&tasks, 3), vec![-3.0, -2.0, -1.0]);
        assert_eq!(stacked_orders(&Vec::<Task>::new(), 2), vec![-2.0, -1.0]);
    }

    #[test]
    fn same_bucket_reuses_existing_values() {
        let tasks = vec![
            task("a", Some("2024-06-15"), 1.0),
            task("b", Some("2024-06-15"), 2.5),
            task("c", Some("2024-06-15"), 7.0),
            task("d", Some("2024-06-15"), 9.0),
        ];
        let plan = drop_plan(&tasks, "d", DropTarget::Task("b".into())).unwrap();
        assert_eq!(plan.due_date, None);
        assert_eq!(
            plan.orders,
            vec![
                ("a".to_string(), 1.0),
                ("d".to_string(), 2.5),
                ("b".to_string(), 7.0),
                ("c".to_string(), 9.0),
            ]
        );

        let mut before: Vec<f64> = tasks.iter().map(|t| t.order).collect();
        let mut after: Vec<f64> = plan.orders.iter().map(|(_, o)| *o).collect();
        before.sort_by(f64::total_cmp);
        after.sort_by(f64::total_cmp);
        assert_eq!(before, after);
    }

    #[test]
    fn dragging_down_lands_on_target_slot() {
        let tasks = vec![
            task("a", None, 0.0),
            task("b", None, 1.0),
            task("c", None, 2.0),
        ];
        let plan = drop_plan(&tasks, "a", DropTarget::Task("c".into())).unwrap();
        assert_eq!(plan.order_of("b"), Some(0.0));
        assert_eq!(plan.order_of("c"), Some(1.0));
        assert_eq!(plan.order_of("a"), Some(2.0));
    }

    #[test]
    fn cross_bucket_midpoint() {
        let tasks = vec![
            task("x", Some("2024-06-15"), 0.0),
            task("p", Some("2024-06-16"), 2.0),
            task("n", Some("2024-06-16"), 4.0),
        ];
        let plan = drop_plan(&tasks, "x", DropTarget::Task("n".into())).unwrap();
        assert_eq!(plan.orders, vec![("x".to_string(), 3.0)]);
        assert_eq!(plan.due_date, Some(Some(date("2024-06-16"))));
        assert!(plan.changes_bucket());
    }

    #[test]
    fn cross_bucket_before_first_task() {
        let tasks = vec![
            task("x", None, 10.0),
            task("p", Some("2024-06-16"), 2.0),
            task("n", Some("2024-06-16"), 4.0),
        ];
        let plan = drop_plan(&tasks, "x", DropTarget::Task("p".into())).unwrap();
        assert_eq!(plan.orders, vec![("x".to_string(), 1.0)]);
        assert_eq!(plan.due_date, Some(Some(date("2024-06-16"))));
    }

    #[test]
    fn header_drop_goes_to_top_or_zero() {
        let tasks = vec![
            task("x", Some("2024-06-15"), 5.0),
            task("p", Some("2024-06-16"), 2.0),
            task("n", Some("2024-06-16"), 4.0),
        ];
        let target = DropTarget::Bucket(BucketKey::Dated("2024-06-16".into()));
        let plan = drop_plan(&tasks, "x", target).unwrap();
        assert_eq!(plan.orders, vec![("x".to_string(), 1.0)]);

        let empty = DropTarget::Bucket(BucketKey::Dated("2024-06-20".into()));
        let plan = drop_plan(&tasks, "x", empty).unwrap();
        assert_eq!(plan.orders, vec![("x".to_string(), 0.0)]);
        assert_eq!(plan.due_date, Some(Some(date("2024-06-20"))));
    }

    #[test]
    fn header_drop_on_no_date_clears_due_date() {
        let tasks = vec![task("x", Some("2024-06-15"), 5.0), task("u", None, 3.0)];
        let plan = drop_plan(&tasks, "x", DropTarget::Bucket(BucketKey::NoDate)).unwrap();
        assert_eq!(plan.due_date, Some(None));
        assert_eq!(plan.order_of("x"), Some(2.0));
    }

    #[test]
    fn own_header_moves_to_top_of_bucket() {
        let tasks = vec![task("a", None, 0.0), task("b", None, 1.0)];
        let plan = drop_plan(&tasks, "b", DropTarget::Bucket(BucketKey::NoDate)).unwrap();
        assert_eq!(plan.due_date, None);
        assert_eq!(plan.order_of("b"), Some(0.0));
        assert_eq!(plan.order_of("a"), Some(1.0));
        assert!(drop_plan(&tasks, "a", DropTarget::Bucket(BucketKey::NoDate)).is_none());
    }

    #[test]
    fn no_ops() {
        let tasks = vec![task("a", None, 0.0), task("b", None, 1.0)];
        assert!(drop_plan(&tasks, "a", DropTarget::Task("a".into())).is_none());
        assert!(drop_plan(&tasks, "a", DropTarget::Task("missing".into())).is_none());
        assert!(drop_plan(&tasks, "missing", DropTarget::Task("a".into())).is_none());
    }

    #[test]
    fn collapsed_midpoint_renumbers_destination() {
        let tasks = vec![
            task("x", Some("2024-06-15"), 0.0),
            task("p", Some("2024-06-16"), 2.0),
            task("q", Some("2024-06-16"), 2.0),
            task("r", Some("2024-06-16"), 3.0),
        ];
        let plan = drop_plan(&tasks, "x", DropTarget::Task("q".into())).unwrap();
        assert_eq!(
            plan.orders,
            vec![
                ("p".to_string(), 2.0),
                ("x".to_string(), 3.0),
                ("q".to_string(), 4.0),
                ("r".to_string(), 5.0),
            ]
        );
    }

    #[test]
    fn repeated_midpoints_stay_strictly_between_neighbours() {
        let mut tasks = vec![
            task("p", Some("2024-06-16"), 0.0),
            task("n", Some("2024-06-16"), 1.0),
        ];
        for i in 0..80 {
            let id = format!("t{i}");
            tasks.push(task(&id, Some("2024-06-15"), 0.0));
            let plan = drop_plan(&tasks, &id, DropTarget::Task("n".into())).unwrap();
            for (task_id, order) in &plan.orders {
                let t = tasks.iter_mut().find(|t| &t.id == task_id).unwrap();
                t.order = *order;
            }
            let t = tasks.iter_mut().find(|t| t.id == id).unwrap();
            t.due_date = plan.due_date.unwrap();
        }
        let view = filter_tasks(&tasks, Filter::All);
        let mut orders: Vec<f64> = view.iter().map(|t| t.order).collect();
        let len = orders.len();
        orders.dedup();
        assert_eq!(orders.len(), len);
        assert_eq!(view.last().unwrap().id, "n");
        assert_eq!(view.first().unwrap().id, "p");
    }
}
