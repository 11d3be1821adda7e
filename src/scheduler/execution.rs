//! Execution (batch) records.
//!
//! An execution groups tasks submitted together. Its counters are never
//! updated incrementally: `ExecutionStats::derive` recomputes them from the
//! member tasks' current statuses, so two workers refreshing the same
//! execution converge on the same counts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::task::TaskStatus;

/// What caused an execution to be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Group,
    Scheduled,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::Group => "group",
            TriggerType::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerType::Manual),
            "group" => Ok(TriggerType::Group),
            "scheduled" => Ok(TriggerType::Scheduled),
            other => Err(format!("unknown trigger type '{}'", other)),
        }
    }
}

/// Aggregate status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

/// Inclusive date range an execution covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }
}

/// A batch of tasks submitted together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub trigger_type: TriggerType,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub total_plugins: usize,
    pub completed_plugins: usize,
    pub failed_plugins: usize,
    pub task_ids: Vec<Uuid>,
    pub group_name: Option<String>,
    pub date_range: Option<DateRange>,
}

impl ExecutionRecord {
    /// Creates a running execution over `task_ids`.
    pub fn new(
        execution_id: Uuid,
        task_ids: Vec<Uuid>,
        trigger_type: TriggerType,
        group_name: Option<String>,
        date_range: Option<DateRange>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id,
            trigger_type,
            started_at,
            completed_at: None,
            status: ExecutionStatus::Running,
            total_plugins: task_ids.len(),
            completed_plugins: 0,
            failed_plugins: 0,
            task_ids,
            group_name,
            date_range,
        }
    }

    /// Applies freshly derived stats.
    ///
    /// `completed_at` is stamped with `now` when the execution first turns
    /// terminal; an already-terminal record keeps its timestamp.
    pub fn apply_stats(&mut self, stats: ExecutionStats, now: DateTime<Utc>) {
        self.completed_plugins = stats.completed;
        self.failed_plugins = stats.failed;

        if stats.all_terminal {
            let status = if stats.failed > 0 {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Completed
            };
            if !self.status.is_terminal() || self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
            self.status = status;
        }
    }

    /// Number of member tasks that have not reached a terminal status.
    pub fn outstanding(&self) -> usize {
        self.total_plugins
            .saturating_sub(self.completed_plugins + self.failed_plugins)
    }
}

/// Counters derived from member task statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub completed: usize,
    pub failed: usize,
    /// True when every member task is in a terminal status.
    pub all_terminal: bool,
}

impl ExecutionStats {
    /// Derives stats from the member statuses.
    ///
    /// `None` stands for a member whose record could not be read (expired or
    /// undecodable); it counts as not terminal.
    pub fn derive<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Option<TaskStatus>>,
    {
        let mut stats = ExecutionStats {
            all_terminal: true,
            ..Default::default()
        };
        for status in statuses {
            match status {
                Some(TaskStatus::Completed) => stats.completed += 1,
                Some(TaskStatus::Failed) => stats.failed += 1,
                Some(TaskStatus::Cancelled) => {}
                Some(TaskStatus::Pending) | Some(TaskStatus::Running) | None => {
                    stats.all_terminal = false
                }
            }
        }
        stats
    }
}
