//! Task definitions for the scheduler.
//!
//! This module defines the core task types used in the queue:
//!
//! - `NewTask`: what a producer submits to `QueueClient::enqueue`
//! - `TaskRecord`: the stored state of a task, as seen by readers
//! - `TaskStatus`, `TaskType`, `Priority`: the enumerations around it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum number of characters kept from a failure message.
pub const MAX_ERROR_MESSAGE_LEN: usize = 2000;

/// Lifecycle status of a task.
///
/// Valid transitions: `pending -> running -> {completed | failed}` and
/// `pending -> cancelled`. Nothing leaves a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Returns whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Returns whether moving from `self` to `next` is a valid transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// How a task picks the trade date(s) it syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Sync the latest valid trading date.
    Incremental,
    /// Full resync; replays `trade_dates` when given, else behaves like incremental.
    Full,
    /// Replay an explicit list of historical dates.
    Backfill,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Incremental => "incremental",
            TaskType::Full => "full",
            TaskType::Backfill => "backfill",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(TaskType::Incremental),
            "full" => Ok(TaskType::Full),
            "backfill" => Ok(TaskType::Backfill),
            other => Err(format!(
                "unknown task type '{}': expected incremental, full or backfill",
                other
            )),
        }
    }
}

/// Queue lane a task is placed in. Lower ordinal is served first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High = 0,
    #[default]
    Normal = 1,
    Low = 2,
}

impl Priority {
    /// All lanes in dequeue order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Priority::High),
            1 => Some(Priority::Normal),
            2 => Some(Priority::Low),
            _ => None,
        }
    }

    /// Lane name used in store keys and metric labels.
    pub fn lane(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lane())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" | "0" => Ok(Priority::High),
            "normal" | "1" => Ok(Priority::Normal),
            "low" | "2" => Ok(Priority::Low),
            other => Err(format!(
                "unknown priority '{}': expected high, normal or low",
                other
            )),
        }
    }
}

/// A task submission.
///
/// Built with the fluent setters and handed to `QueueClient::enqueue`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub plugin_name: String,
    pub task_type: TaskType,
    pub trade_dates: Vec<String>,
    pub priority: Priority,
    pub execution_id: Option<Uuid>,
    pub user_id: Option<String>,
}

impl NewTask {
    pub fn new(plugin_name: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            task_type,
            trade_dates: Vec::new(),
            priority: Priority::Normal,
            execution_id: None,
            user_id: None,
        }
    }

    /// Shorthand for an incremental task.
    pub fn incremental(plugin_name: impl Into<String>) -> Self {
        Self::new(plugin_name, TaskType::Incremental)
    }

    /// Shorthand for a backfill task over `trade_dates`.
    pub fn backfill<I, S>(plugin_name: impl Into<String>, trade_dates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(plugin_name, TaskType::Backfill).with_trade_dates(trade_dates)
    }

    pub fn with_trade_dates<I, S>(mut self, trade_dates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trade_dates = trade_dates.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_execution_id(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Stored state of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub plugin_name: String,
    pub task_type: TaskType,
    /// Ordered trade dates; only meaningful for backfill/full tasks.
    pub trade_dates: Vec<String>,
    pub status: TaskStatus,
    /// Completion percentage, 0-100.
    pub progress: u8,
    pub records_processed: u64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub priority: Priority,
}

impl TaskRecord {
    /// Creates a pending record for a submission.
    pub fn pending(task_id: Uuid, task: NewTask, created_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            plugin_name: task.plugin_name,
            task_type: task.task_type,
            trade_dates: task.trade_dates,
            status: TaskStatus::Pending,
            progress: 0,
            records_processed: 0,
            error_message: None,
            created_at,
            started_at: None,
            completed_at: None,
            execution_id: task.execution_id,
            user_id: task.user_id,
            priority: task.priority,
        }
    }

    /// Whether this task replays an explicit date list.
    pub fn uses_backfill_strategy(&self) -> bool {
        match self.task_type {
            TaskType::Backfill => true,
            TaskType::Full => !self.trade_dates.is_empty(),
            TaskType::Incremental => false,
        }
    }

    /// Wall-clock time spent running, if the task has started and finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Truncates `message` to at most `max_chars` characters.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use TaskStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));

        assert!(!Running.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Running));
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_display_and_parse() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>(), Ok(status));
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::ALL[0], Priority::High);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert_eq!("1".parse::<Priority>(), Ok(Priority::Normal));
        assert_eq!(Priority::from_u8(2), Some(Priority::Low));
        assert_eq!(Priority::from_u8(3), None);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_task_type_parse() {
        assert_eq!("backfill".parse::<TaskType>(), Ok(TaskType::Backfill));
        assert!("weekly".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_new_task_builder() {
        let execution_id = Uuid::new_v4();
        let task = NewTask::backfill("tushare_daily", ["2026-01-05", "2026-01-06"])
            .with_priority(Priority::Low)
            .with_execution_id(execution_id)
            .with_user_id("analyst-7");

        assert_eq!(task.plugin_name, "tushare_daily");
        assert_eq!(task.task_type, TaskType::Backfill);
        assert_eq!(task.trade_dates, vec!["2026-01-05", "2026-01-06"]);
        assert_eq!(task.priority, Priority::Low);
        assert_eq!(task.execution_id, Some(execution_id));
        assert_eq!(task.user_id.as_deref(), Some("analyst-7"));
    }

    #[test]
    fn test_pending_record() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = TaskRecord::pending(id, NewTask::incremental("tushare_daily"), now);

        assert_eq!(record.task_id, id);
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.progress, 0);
        assert_eq!(record.records_processed, 0);
        assert_eq!(record.created_at, now);
        assert!(record.started_at.is_none());
        assert!(record.duration().is_none());
    }

    #[test]
    fn test_strategy_selection() {
        let now = Utc::now();
        let incremental = TaskRecord::pending(Uuid::new_v4(), NewTask::incremental("p"), now);
        assert!(!incremental.uses_backfill_strategy());

        let full = TaskRecord::pending(Uuid::new_v4(), NewTask::new("p", TaskType::Full), now);
        assert!(!full.uses_backfill_strategy());

        let full_with_dates = TaskRecord::pending(
            Uuid::new_v4(),
            NewTask::new("p", TaskType::Full).with_trade_dates(["20260105"]),
            now,
        );
        assert!(full_with_dates.uses_backfill_strategy());

        let backfill = TaskRecord::pending(
            Uuid::new_v4(),
            NewTask::backfill("p", Vec::<String>::new()),
            now,
        );
        assert!(backfill.uses_backfill_strategy());
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short", 10), "short");
        assert_eq!(truncate_message("abcdef", 3), "abc");

        let long = "x".repeat(MAX_ERROR_MESSAGE_LEN + 500);
        assert_eq!(
            truncate_message(&long, MAX_ERROR_MESSAGE_LEN).chars().count(),
            MAX_ERROR_MESSAGE_LEN
        );

        // multi-byte characters are never split
        assert_eq!(truncate_message("日本語テキスト", 3), "日本語");
    }
}
