//! Priority task queue, workers and the worker-process supervisor.
//!
//! - **QueueClient**: three FIFO priority lanes plus task/execution records in
//!   a `JobStore`, claimed with one atomic multi-lane blocking pop
//! - **Worker**: single polling loop that runs one plugin task at a time
//! - **Supervisor**: launches `N` worker processes and stops them on shutdown
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Producer   │
//!                      │  (API/CLI)   │
//!                      └──────┬───────┘
//!                             │ enqueue
//!                      ┌──────▼───────┐
//!                      │    Redis     │
//!                      │ high/normal/ │
//!                      │     low      │
//!                      └──────┬───────┘
//!                             │ BRPOP
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 0│         │ Worker 1│         │ Worker N│
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         └──────── plugin.run(trade_date) ───────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use datasync::config::QueueConfig;
//! use datasync::scheduler::{NewTask, Priority, QueueClient};
//!
//! let queue = QueueClient::connect(QueueConfig::from_env()?).await?;
//!
//! let task_id = queue
//!     .enqueue(NewTask::incremental("tushare_daily").with_priority(Priority::High))
//!     .await;
//! ```
//!
//! # Known Gaps
//!
//! - The running set is not a lease: a worker that dies after claiming a
//!   task leaves it `running` for good
//! - A backfill task with skipped dates still finishes `completed`

pub mod execution;
pub mod queue;
pub mod shutdown;
pub mod supervisor;
pub mod task;
pub mod worker;

pub use execution::{DateRange, ExecutionRecord, ExecutionStats, ExecutionStatus, TriggerType};
pub use queue::{QueueClient, QueueError, QueueStats};
pub use shutdown::{install_signal_handlers, shutdown_channel, ShutdownHandle, ShutdownSignal};
pub use supervisor::{ChildExit, Supervisor, SupervisorError, WorkerCommand};
pub use task::{NewTask, Priority, TaskRecord, TaskStatus, TaskType};
pub use worker::{ProcessedTask, Worker, WorkerError};
