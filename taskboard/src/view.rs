//! Plain-text rendering of a workspace's task list.

use std::fmt;

use taskboard_proto::task::{Task, TaskStatus};

/// Number of tasks per status, over an unfiltered list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Every task.
    pub all: usize,
    /// Tasks in `todo`.
    pub todo: usize,
    /// Tasks in `in-progress`.
    pub in_progress: usize,
    /// Tasks in `completed`.
    pub completed: usize,
}

impl StatusCounts {
    /// Counts `tasks` by status.
    #[must_use]
    pub fn tally(tasks: &[Task]) -> Self {
        tasks.iter().fold(Self::default(), |mut counts, task| {
            counts.all += 1;
            match task.status {
                TaskStatus::Todo => counts.todo += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
            }
            counts
        })
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "all ({})  {} ({})  {} ({})  {} ({})",
            self.all,
            TaskStatus::Todo,
            self.todo,
            TaskStatus::InProgress,
            self.in_progress,
            TaskStatus::Completed,
            self.completed
        )
    }
}

/// Tasks with `status`, or all of them for `None`.
#[must_use]
pub fn filter_by_status(tasks: &[Task], status: Option<TaskStatus>) -> Vec<&Task> {
    tasks
        .iter()
        .filter(|task| status.is_none_or(|s| task.status == s))
        .collect()
}

/// The count header followed by one line per task matching `status`.
#[must_use]
pub fn render_board(tasks: &[Task], status: Option<TaskStatus>) -> String {
    let mut out = StatusCounts::tally(tasks).to_string();
    let shown = filter_by_status(tasks, status);
    if shown.is_empty() {
        out.push_str("\n(no tasks)");
    }
    for task in shown {
        out.push('\n');
        out.push_str(&format_task(task));
    }
    out
}

/// One task as a fixed-width line.
#[must_use]
pub fn format_task(task: &Task) -> String {
    let mut line = format!(
        "{:<36}  [{:<11}] {:<6}  {}",
        task.id.as_str(),
        task.status.as_str(),
        task.priority.as_str(),
        task.title
    );
    if let Some(description) = &task.description {
        line.push_str(" - ");
        line.push_str(description);
    }
    line
}
