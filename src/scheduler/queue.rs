//! Priority task queue client.
//!
//! `QueueClient` is the only component that touches the job store. It owns
//! the three priority lanes, the task and execution records, and the running
//! set.
//!
//! # Queue Structure
//!
//! - Three lists, one per priority. Producers `LPUSH` task ids, workers claim
//!   with a single multi-key `BRPOP` over `high, normal, low`, so a pending
//!   high-priority task always wins and each lane is FIFO.
//! - One hash per task and per execution, both expiring after the retention
//!   window.
//! - A set of claimed task ids, used only for counts. It is not a lease: a
//!   worker that dies mid-task leaves its task `running`.
//!
//! # Failure Handling
//!
//! Store failures never surface as errors. Every public operation logs the
//! underlying error and degrades to `None`/`false`, leaving retries to the
//! caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::execution::{DateRange, ExecutionRecord, ExecutionStats, TriggerType};
use super::task::{truncate_message, NewTask, TaskRecord, TaskStatus, MAX_ERROR_MESSAGE_LEN};
use crate::config::QueueConfig;
use crate::error::{CodecError, StoreError};
use crate::store::codec::{self, task_field};
use crate::store::{JobStore, KeySpace, RedisJobStore};

/// Errors raised internally by queue operations.
///
/// These are logged and mapped to `None`/`false` at the public boundary.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Corrupt record {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error("Lane member '{0}' is not a task id")]
    InvalidMember(String),
}

/// Lane depths and running count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub running: usize,
}

impl QueueStats {
    /// Tasks waiting in any lane.
    pub fn pending(&self) -> usize {
        self.high + self.normal + self.low
    }

    /// Pending plus running tasks.
    pub fn total(&self) -> usize {
        self.pending() + self.running
    }
}

/// Client for the shared task queue.
pub struct QueueClient {
    store: Arc<dyn JobStore>,
    keys: KeySpace,
    config: QueueConfig,
}

impl QueueClient {
    /// Creates a client over an already-opened store.
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self {
            keys: KeySpace::new(config.key_prefix.clone()),
            store,
            config,
        }
    }

    /// Connects to the Redis server named in `config`.
    pub async fn connect(config: QueueConfig) -> Result<Self, StoreError> {
        let store = RedisJobStore::connect(&config.redis_url).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// Ends the client's lifecycle, releasing its handle on the store.
    pub fn close(self) {
        debug!(prefix = %self.keys.prefix(), "Closing queue client");
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Returns whether the store answers.
    pub async fn ping(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Job store ping failed");
                false
            }
        }
    }

    /// Creates a pending task and appends it to its priority lane.
    ///
    /// Returns `None` if the store is unreachable. Nothing is retried or
    /// buffered.
    pub async fn enqueue(&self, task: NewTask) -> Option<Uuid> {
        let record = TaskRecord::pending(Uuid::new_v4(), task, Utc::now());
        let task_id = record.task_id;

        match self.try_enqueue(&record).await {
            Ok(()) => {
                info!(
                    task_id = %task_id,
                    plugin = %record.plugin_name,
                    task_type = %record.task_type,
                    priority = %record.priority,
                    "Task enqueued"
                );
                Some(task_id)
            }
            Err(e) => {
                warn!(plugin = %record.plugin_name, error = %e, "Failed to enqueue task");
                None
            }
        }
    }

    async fn try_enqueue(&self, record: &TaskRecord) -> Result<(), QueueError> {
        let key = self.keys.task(record.task_id);
        self.store
            .hash_set_with_ttl(&key, &codec::encode_task(record), self.config.task_ttl)
            .await?;
        self.store
            .push_lane(
                &self.keys.lane(record.priority),
                &record.task_id.to_string(),
            )
            .await?;
        Ok(())
    }

    /// Claims the next task, blocking up to `timeout`.
    ///
    /// Lanes are checked high, normal, low. The claimed task is flipped to
    /// `running`, stamped, and added to the running set. `None` means "no work
    /// right now": a timeout, a store error, or a lane entry whose record is
    /// gone or no longer pending.
    pub async fn dequeue(&self, timeout: Duration) -> Option<TaskRecord> {
        match self.try_dequeue(timeout).await {
            Ok(task) => task,
            Err(e) => {
                error!(error = %e, "Dequeue failed");
                None
            }
        }
    }

    async fn try_dequeue(&self, timeout: Duration) -> Result<Option<TaskRecord>, QueueError> {
        let Some((lane, member)) = self.store.pop_lanes(&self.keys.lanes(), timeout).await? else {
            return Ok(None);
        };

        let task_id: Uuid = member
            .parse()
            .map_err(|_| QueueError::InvalidMember(member.clone()))?;

        let Some(mut task) = self.load_task(task_id).await? else {
            warn!(task_id = %task_id, lane = %lane, "Dequeued task has no record, dropping");
            return Ok(None);
        };

        if !task.status.can_transition_to(TaskStatus::Running) {
            warn!(
                task_id = %task_id,
                status = %task.status,
                "Dequeued task is not pending, dropping"
            );
            return Ok(None);
        }

        let now = Utc::now();
        task.status = TaskStatus::Running;
        task.started_at = Some(now);

        self.store
            .hash_set(
                &self.keys.task(task_id),
                &[
                    (task_field::STATUS, task.status.to_string()),
                    (task_field::STARTED_AT, codec::encode_timestamp(Some(now))),
                ],
            )
            .await?;
        self.store
            .set_add(&self.keys.running(), &task_id.to_string())
            .await?;

        debug!(task_id = %task_id, lane = %lane, "Task claimed");
        Ok(Some(task))
    }

    /// Records progress on a task. Best effort; the status is untouched.
    ///
    /// `progress` is clamped to 0-100. Unknown and finalized tasks are left
    /// alone and yield `false`.
    pub async fn update_progress(&self, task_id: Uuid, progress: f64, records_processed: u64) -> bool {
        let progress = progress.clamp(0.0, 100.0).round() as u8;
        let result: Result<bool, QueueError> = async {
            let Some(task) = self.load_task(task_id).await? else {
                warn!(task_id = %task_id, "Progress for unknown task ignored");
                return Ok(false);
            };
            if task.status.is_terminal() {
                warn!(
                    task_id = %task_id,
                    status = %task.status,
                    "Progress for finalized task ignored"
                );
                return Ok(false);
            }

            let fields = [
                (task_field::PROGRESS, progress.to_string()),
                (task_field::RECORDS_PROCESSED, records_processed.to_string()),
            ];
            self.store.hash_set(&self.keys.task(task_id), &fields).await?;
            Ok(true)
        }
        .await;

        match result {
            Ok(updated) => updated,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to update progress");
                false
            }
        }
    }

    /// Marks a running task completed with its final record count.
    ///
    /// Returns `false` (and changes nothing) unless the task is `running`.
    pub async fn complete_task(&self, task_id: Uuid, records_processed: u64) -> bool {
        let fields = vec![
            (task_field::STATUS, TaskStatus::Completed.to_string()),
            (task_field::PROGRESS, "100".to_string()),
            (task_field::RECORDS_PROCESSED, records_processed.to_string()),
            (
                task_field::COMPLETED_AT,
                codec::encode_timestamp(Some(Utc::now())),
            ),
        ];

        self.finalize(task_id, TaskStatus::Completed, fields).await
    }

    /// Marks a running task failed.
    ///
    /// The stored message is truncated to `MAX_ERROR_MESSAGE_LEN` characters.
    /// Returns `false` (and changes nothing) unless the task is `running`.
    pub async fn fail_task(&self, task_id: Uuid, error_message: &str) -> bool {
        let fields = vec![
            (task_field::STATUS, TaskStatus::Failed.to_string()),
            (
                task_field::ERROR_MESSAGE,
                truncate_message(error_message, MAX_ERROR_MESSAGE_LEN),
            ),
            (
                task_field::COMPLETED_AT,
                codec::encode_timestamp(Some(Utc::now())),
            ),
        ];

        self.finalize(task_id, TaskStatus::Failed, fields).await
    }

    async fn finalize(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        fields: Vec<(&'static str, String)>,
    ) -> bool {
        let result: Result<bool, QueueError> = async {
            let Some(task) = self.load_task(task_id).await? else {
                warn!(task_id = %task_id, status = %status, "Cannot finalize unknown task");
                return Ok(false);
            };
            if !task.status.can_transition_to(status) {
                warn!(
                    task_id = %task_id,
                    from = %task.status,
                    to = %status,
                    "Ignoring invalid status transition"
                );
                return Ok(false);
            }

            self.store
                .hash_set(&self.keys.task(task_id), &fields)
                .await?;
            self.store
                .set_remove(&self.keys.running(), &task_id.to_string())
                .await?;
            Ok(true)
        }
        .await;

        match result {
            Ok(done) => {
                if done {
                    info!(task_id = %task_id, status = %status, "Task finalized");
                }
                done
            }
            Err(e) => {
                warn!(task_id = %task_id, status = %status, error = %e, "Failed to finalize task");
                false
            }
        }
    }

    /// Cancels a task that no worker has claimed yet.
    ///
    /// Succeeds only if the task is `pending` and its id was still in its
    /// lane; losing the race to a concurrent dequeue returns `false`.
    pub async fn cancel_task(&self, task_id: Uuid) -> bool {
        match self.try_cancel(task_id).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to cancel task");
                false
            }
        }
    }

    async fn try_cancel(&self, task_id: Uuid) -> Result<bool, QueueError> {
        let Some(task) = self.load_task(task_id).await? else {
            return Ok(false);
        };
        if !task.status.can_transition_to(TaskStatus::Cancelled) {
            debug!(task_id = %task_id, status = %task.status, "Task is not cancellable");
            return Ok(false);
        }

        let removed = self
            .store
            .remove_from_list(&self.keys.lane(task.priority), &task_id.to_string())
            .await?;
        if removed == 0 {
            debug!(task_id = %task_id, "Task left its lane before cancellation");
            return Ok(false);
        }

        self.store
            .hash_set(
                &self.keys.task(task_id),
                &[(task_field::STATUS, TaskStatus::Cancelled.to_string())],
            )
            .await?;

        info!(task_id = %task_id, "Task cancelled");
        Ok(true)
    }

    /// Reads a task record.
    pub async fn get_task(&self, task_id: Uuid) -> Option<TaskRecord> {
        match self.load_task(task_id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to read task");
                None
            }
        }
    }

    async fn load_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, QueueError> {
        let key = self.keys.task(task_id);
        let fields = self.store.hash_get_all(&key).await?;
        codec::decode_task(&fields).map_err(|source| QueueError::Codec { key, source })
    }

    /// Lane depths and running count, or `None` if the store is unreachable.
    pub async fn get_queue_stats(&self) -> Option<QueueStats> {
        let result: Result<QueueStats, StoreError> = async {
            let lanes = self.keys.lanes();
            let running_key = self.keys.running();
            let (high, normal, low, running) = tokio::try_join!(
                self.store.list_len(&lanes[0]),
                self.store.list_len(&lanes[1]),
                self.store.list_len(&lanes[2]),
                self.store.set_len(&running_key),
            )?;
            Ok(QueueStats {
                high,
                normal,
                low,
                running,
            })
        }
        .await;

        match result {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Failed to read queue stats");
                None
            }
        }
    }

    /// Records an execution over `task_ids` and back-links each member task.
    ///
    /// Members whose records no longer exist are kept in the execution but
    /// not back-linked.
    pub async fn create_execution(
        &self,
        task_ids: Vec<Uuid>,
        trigger_type: TriggerType,
        group_name: Option<String>,
        date_range: Option<DateRange>,
    ) -> Option<Uuid> {
        let record = ExecutionRecord::new(
            Uuid::new_v4(),
            task_ids,
            trigger_type,
            group_name,
            date_range,
            Utc::now(),
        );
        let execution_id = record.execution_id;

        match self.try_create_execution(&record).await {
            Ok(()) => {
                info!(
                    execution_id = %execution_id,
                    trigger = %record.trigger_type,
                    tasks = record.total_plugins,
                    "Execution created"
                );
                Some(execution_id)
            }
            Err(e) => {
                warn!(error = %e, "Failed to create execution");
                None
            }
        }
    }

    async fn try_create_execution(&self, record: &ExecutionRecord) -> Result<(), QueueError> {
        self.store
            .hash_set_with_ttl(
                &self.keys.execution(record.execution_id),
                &codec::encode_execution(record),
                self.config.task_ttl,
            )
            .await?;

        let link = [(task_field::EXECUTION_ID, record.execution_id.to_string())];
        for task_id in &record.task_ids {
            if self.load_task(*task_id).await?.is_none() {
                warn!(
                    task_id = %task_id,
                    execution_id = %record.execution_id,
                    "Execution member has no record, not linking"
                );
                continue;
            }
            self.store.hash_set(&self.keys.task(*task_id), &link).await?;
        }
        Ok(())
    }

    /// Reads an execution record.
    pub async fn get_execution(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        match self.load_execution(execution_id).await {
            Ok(exec) => exec,
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "Failed to read execution");
                None
            }
        }
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionRecord>, QueueError> {
        let key = self.keys.execution(execution_id);
        let fields = self.store.hash_get_all(&key).await?;
        codec::decode_execution(&fields).map_err(|source| QueueError::Codec { key, source })
    }

    /// Reads the member task records of an execution, in submission order.
    ///
    /// Members whose records have expired are skipped.
    pub async fn list_execution_tasks(&self, execution_id: Uuid) -> Option<Vec<TaskRecord>> {
        let result: Result<Option<Vec<TaskRecord>>, QueueError> = async {
            let Some(exec) = self.load_execution(execution_id).await? else {
                return Ok(None);
            };
            let mut tasks = Vec::with_capacity(exec.task_ids.len());
            for task_id in &exec.task_ids {
                if let Some(task) = self.load_task(*task_id).await? {
                    tasks.push(task);
                }
            }
            Ok(Some(tasks))
        }
        .await;

        match result {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "Failed to list execution tasks");
                None
            }
        }
    }

    /// Recomputes an execution's counters from its members' current statuses.
    ///
    /// The execution turns terminal only once every member is terminal:
    /// `failed` if any member failed, else `completed`. Members whose
    /// records are missing or unreadable count as still outstanding. Safe to
    /// call concurrently; every caller derives the same counts.
    pub async fn update_execution_stats(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        match self.try_update_execution_stats(execution_id).await {
            Ok(exec) => exec,
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "Failed to update execution stats");
                None
            }
        }
    }

    async fn try_update_execution_stats(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<ExecutionRecord>, QueueError> {
        let Some(mut exec) = self.load_execution(execution_id).await? else {
            return Ok(None);
        };

        let mut statuses = Vec::with_capacity(exec.task_ids.len());
        for task_id in &exec.task_ids {
            let status = match self.load_task(*task_id).await {
                Ok(task) => task.map(|t| t.status),
                Err(QueueError::Codec { key, source }) => {
                    warn!(key = %key, error = %source, "Unreadable execution member");
                    None
                }
                Err(e) => return Err(e),
            };
            statuses.push(status);
        }

        exec.apply_stats(ExecutionStats::derive(statuses), Utc::now());
        self.store
            .hash_set(
                &self.keys.execution(execution_id),
                &codec::encode_execution_stats(&exec),
            )
            .await?;

        debug!(
            execution_id = %execution_id,
            completed = exec.completed_plugins,
            failed = exec.failed_plugins,
            status = %exec.status,
            "Execution stats refreshed"
        );
        Ok(Some(exec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::execution::ExecutionStatus;
    use crate::scheduler::task::{Priority, TaskType};
    use crate::store::MemoryJobStore;

    const SHORT: Duration = Duration::from_millis(20);

    fn client() -> (QueueClient, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        let client = QueueClient::new(store.clone(), QueueConfig::default());
        (client, store)
    }

    #[test]
    fn test_queue_stats() {
        let stats = QueueStats {
            high: 1,
            normal: 4,
            low: 2,
            running: 3,
        };
        assert_eq!(stats.pending(), 7);
        assert_eq!(stats.total(), 10);
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_record() {
        let (queue, _) = client();
        let id = queue
            .enqueue(NewTask::incremental("tushare_daily").with_user_id("u1"))
            .await
            .expect("enqueue should succeed");

        let task = queue.get_task(id).await.expect("task should exist");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.plugin_name, "tushare_daily");
        assert_eq!(task.user_id.as_deref(), Some("u1"));

        let stats = queue.get_queue_stats().await.expect("stats");
        assert_eq!(stats.normal, 1);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn test_dequeue_claims_task() {
        let (queue, _) = client();
        let id = queue
            .enqueue(NewTask::incremental("tushare_daily"))
            .await
            .expect("enqueue");

        let task = queue.dequeue(SHORT).await.expect("task should be claimed");
        assert_eq!(task.task_id, id);
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());

        let stored = queue.get_task(id).await.expect("task");
        assert_eq!(stored.status, TaskStatus::Running);

        let stats = queue.get_queue_stats().await.expect("stats");
        assert_eq!(stats.pending(), 0);
        assert_eq!(stats.running, 1);
    }

    #[tokio::test]
    async fn test_dequeue_empty_returns_none() {
        let (queue, _) = client();
        assert!(queue.dequeue(SHORT).await.is_none());
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let (queue, _) = client();
        let low = queue
            .enqueue(NewTask::incremental("a").with_priority(Priority::Low))
            .await
            .expect("enqueue");
        let normal_1 = queue.enqueue(NewTask::incremental("b")).await.expect("enqueue");
        let normal_2 = queue.enqueue(NewTask::incremental("c")).await.expect("enqueue");
        let high = queue
            .enqueue(NewTask::incremental("d").with_priority(Priority::High))
            .await
            .expect("enqueue");

        let mut order = Vec::new();
        while let Some(task) = queue.dequeue(SHORT).await {
            order.push(task.task_id);
        }
        assert_eq!(order, vec![high, normal_1, normal_2, low]);
    }

    #[tokio::test]
    async fn test_store_down_degrades_to_none() {
        let (queue, store) = client();
        store.set_available(false);

        assert!(!queue.ping().await);
        assert!(queue.enqueue(NewTask::incremental("p")).await.is_none());
        assert!(queue.dequeue(SHORT).await.is_none());
        assert!(queue.get_queue_stats().await.is_none());
        assert!(!queue.cancel_task(Uuid::new_v4()).await);
        assert!(!queue.update_progress(Uuid::new_v4(), 50.0, 1).await);
    }

    #[tokio::test]
    async fn test_update_progress_clamps() {
        let (queue, _) = client();
        let id = queue.enqueue(NewTask::incremental("p")).await.expect("enqueue");

        assert!(queue.update_progress(id, 250.0, 7).await);
        let task = queue.get_task(id).await.expect("task");
        assert_eq!(task.progress, 100);
        assert_eq!(task.records_processed, 7);
        assert_eq!(task.status, TaskStatus::Pending);

        assert!(queue.update_progress(id, 33.4, 8).await);
        assert_eq!(queue.get_task(id).await.expect("task").progress, 33);
    }

    #[tokio::test]
    async fn test_update_progress_ignored_after_completion() {
        let (queue, _) = client();
        let id = queue.enqueue(NewTask::incremental("p")).await.expect("enqueue");
        queue.dequeue(SHORT).await.expect("claim");
        assert!(queue.complete_task(id, 42).await);

        assert!(!queue.update_progress(id, 10.0, 999).await);
        let task = queue.get_task(id).await.expect("task");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.records_processed, 42);
        assert_eq!(task.progress, 100);
    }

    #[tokio::test]
    async fn test_update_progress_unknown_task() {
        let (queue, store) = client();
        let id = Uuid::new_v4();

        assert!(!queue.update_progress(id, 50.0, 5).await);
        let fields = store
            .hash_get_all(&queue.keys().task(id))
            .await
            .expect("hgetall");
        assert!(fields.is_empty());
        assert!(queue.get_task(id).await.is_none());
    }

    #[tokio::test]
    async fn test_complete_is_terminal() {
        let (queue, _) = client();
        let id = queue.enqueue(NewTask::incremental("p")).await.expect("enqueue");
        queue.dequeue(SHORT).await.expect("claim");

        assert!(queue.complete_task(id, 42).await);
        assert!(!queue.fail_task(id, "late failure").await);
        assert!(!queue.complete_task(id, 1).await);

        let task = queue.get_task(id).await.expect("task");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.records_processed, 42);
        assert_eq!(task.progress, 100);
        assert!(task.error_message.is_none());
        assert!(task.completed_at.is_some());
        assert_eq!(queue.get_queue_stats().await.expect("stats").running, 0);
    }

    #[tokio::test]
    async fn test_fail_truncates_message() {
        let (queue, _) = client();
        let id = queue.enqueue(NewTask::incremental("p")).await.expect("enqueue");
        queue.dequeue(SHORT).await.expect("claim");

        let long = "e".repeat(MAX_ERROR_MESSAGE_LEN * 2);
        assert!(queue.fail_task(id, &long).await);

        let task = queue.get_task(id).await.expect("task");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error_message.map(|m| m.chars().count()),
            Some(MAX_ERROR_MESSAGE_LEN)
        );
    }

    #[tokio::test]
    async fn test_finalize_requires_running() {
        let (queue, _) = client();
        let id = queue.enqueue(NewTask::incremental("p")).await.expect("enqueue");

        assert!(!queue.complete_task(id, 5).await);
        assert_eq!(
            queue.get_task(id).await.expect("task").status,
            TaskStatus::Pending
        );
        assert!(!queue.fail_task(Uuid::new_v4(), "unknown").await);
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let (queue, _) = client();
        let id = queue
            .enqueue(NewTask::incremental("p").with_priority(Priority::Low))
            .await
            .expect("enqueue");

        assert!(queue.cancel_task(id).await);
        assert_eq!(
            queue.get_task(id).await.expect("task").status,
            TaskStatus::Cancelled
        );
        assert_eq!(queue.get_queue_stats().await.expect("stats").low, 0);
        assert!(queue.dequeue(SHORT).await.is_none());

        // second cancel sees a terminal status
        assert!(!queue.cancel_task(id).await);
    }

    #[tokio::test]
    async fn test_cancel_running_task_is_refused() {
        let (queue, _) = client();
        let id = queue.enqueue(NewTask::incremental("p")).await.expect("enqueue");
        queue.dequeue(SHORT).await.expect("claim");

        assert!(!queue.cancel_task(id).await);
        assert_eq!(
            queue.get_task(id).await.expect("task").status,
            TaskStatus::Running
        );
    }

    #[tokio::test]
    async fn test_cancel_loses_race_when_not_in_lane() {
        let (queue, store) = client();
        let id = queue.enqueue(NewTask::incremental("p")).await.expect("enqueue");

        // a worker popped the id but has not yet flipped the status
        store
            .remove_from_list(&queue.keys().lane(Priority::Normal), &id.to_string())
            .await
            .expect("lrem");

        assert!(!queue.cancel_task(id).await);
        assert_eq!(
            queue.get_task(id).await.expect("task").status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_backfill_with_no_dates_is_accepted() {
        let (queue, _) = client();
        let id = queue
            .enqueue(NewTask::backfill("p", Vec::<String>::new()))
            .await
            .expect("enqueue");
        let task = queue.get_task(id).await.expect("task");
        assert_eq!(task.task_type, TaskType::Backfill);
        assert!(task.trade_dates.is_empty());
    }

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let (queue, _) = client();
        let t1 = queue.enqueue(NewTask::incremental("a")).await.expect("enqueue");
        let t2 = queue.enqueue(NewTask::incremental("b")).await.expect("enqueue");

        let exec_id = queue
            .create_execution(vec![t1, t2], TriggerType::Manual, None, None)
            .await
            .expect("execution");

        assert_eq!(
            queue.get_task(t1).await.expect("task").execution_id,
            Some(exec_id)
        );

        let exec = queue.get_execution(exec_id).await.expect("execution");
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert_eq!(exec.task_ids, vec![t1, t2]);

        queue.dequeue(SHORT).await.expect("claim");
        queue.complete_task(t1, 10).await;

        let exec = queue
            .update_execution_stats(exec_id)
            .await
            .expect("refresh");
        assert_eq!(exec.completed_plugins, 1);
        assert_eq!(exec.status, ExecutionStatus::Running);

        queue.dequeue(SHORT).await.expect("claim");
        queue.complete_task(t2, 10).await;

        let exec = queue
            .update_execution_stats(exec_id)
            .await
            .expect("refresh");
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.completed_at.is_some());

        let stored = queue.get_execution(exec_id).await.expect("execution");
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.completed_plugins, 2);

        let members = queue.list_execution_tasks(exec_id).await.expect("members");
        assert_eq!(
            members.iter().map(|t| t.task_id).collect::<Vec<_>>(),
            vec![t1, t2]
        );
    }

    #[tokio::test]
    async fn test_execution_with_missing_member_stays_running() {
        let (queue, _) = client();
        let t1 = queue.enqueue(NewTask::incremental("a")).await.expect("enqueue");
        let ghost = Uuid::new_v4();

        let exec_id = queue
            .create_execution(vec![t1, ghost], TriggerType::Group, Some("g".into()), None)
            .await
            .expect("execution");

        queue.dequeue(SHORT).await.expect("claim");
        queue.complete_task(t1, 1).await;

        let exec = queue
            .update_execution_stats(exec_id)
            .await
            .expect("refresh");
        assert_eq!(exec.total_plugins, 2);
        assert_eq!(exec.completed_plugins, 1);
        assert_eq!(exec.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_unknown_execution() {
        let (queue, _) = client();
        let id = Uuid::new_v4();
        assert!(queue.get_execution(id).await.is_none());
        assert!(queue.update_execution_stats(id).await.is_none());
        assert!(queue.list_execution_tasks(id).await.is_none());
    }
}
