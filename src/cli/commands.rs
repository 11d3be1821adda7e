//! CLI command definitions for datasync.
//!
//! The `worker` command is the process entry point for task execution; the
//! remaining commands are thin operator tools over the queue client.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::Parser;
use tracing::{info, warn};
use uuid::Uuid;

use crate::calendar::WeekdayCalendar;
use crate::config::{QueueConfig, WorkerConfig};
use crate::metrics::{
    export_metrics, init_metrics, init_worker_metrics, spawn_metrics_writer, write_metrics_file,
    MetricsCollector,
};
use crate::plugin::PluginRegistry;
use crate::scheduler::{
    install_signal_handlers, shutdown_channel, DateRange, ExecutionRecord, NewTask, Priority,
    QueueClient, Supervisor, TaskRecord, TaskType, TriggerType, Worker, WorkerCommand,
};

/// Redis-backed task queue and worker pool for data-sync plugins.
#[derive(Parser)]
#[command(name = "datasync")]
#[command(about = "Priority task queue and worker pool for financial data-sync plugins")]
#[command(version)]
#[command(
    long_about = "datasync runs data-sync plugins from a Redis-backed priority queue.\n\nExample usage:\n  datasync enqueue tushare_daily --priority high\n  datasync worker --workers 4 --plugin-dir ./plugins"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Redis connection URL (overrides DATASYNC_REDIS_URL / REDIS_URL).
    #[arg(long, env = "DATASYNC_REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Prefix for every queue key.
    #[arg(long, env = "DATASYNC_KEY_PREFIX", global = true)]
    pub key_prefix: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run worker(s) that process queued tasks until interrupted.
    Worker(WorkerArgs),

    /// Submit a task.
    #[command(alias = "submit")]
    Enqueue(EnqueueArgs),

    /// Show a task record.
    Status(StatusArgs),

    /// Cancel a pending task.
    Cancel(CancelArgs),

    /// Show lane depths and the running count.
    Stats(StatsArgs),

    /// Create and inspect executions (batches of tasks).
    #[command(alias = "exec")]
    Execution(ExecutionArgs),
}

/// Arguments for `datasync worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of worker processes (1 runs inline).
    #[arg(short = 'n', long)]
    pub workers: Option<usize>,

    /// Process at most one task, then exit.
    #[arg(long)]
    pub once: bool,

    /// Directory holding one executable per plugin.
    #[arg(long)]
    pub plugin_dir: Option<PathBuf>,

    /// Holiday list for the trading calendar (one YYYY-MM-DD per line).
    #[arg(long)]
    pub holidays: Option<PathBuf>,

    /// Directory for per-worker Prometheus text files.
    #[arg(long)]
    pub metrics_dir: Option<PathBuf>,

    /// Worker identity used in logs.
    #[arg(long, hide = true)]
    pub worker_id: Option<String>,

    /// Running under a supervisor: stop when stdin closes.
    #[arg(long, hide = true)]
    pub supervised: bool,
}

/// Arguments for `datasync enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Plugin to run.
    pub plugin: String,

    /// Task type (incremental, full, backfill).
    #[arg(short = 't', long = "type", default_value = "incremental")]
    pub task_type: TaskType,

    /// Trade dates for backfill/full tasks (comma-separated or repeated).
    #[arg(short = 'd', long = "date", value_delimiter = ',')]
    pub dates: Vec<String>,

    /// Priority (high, normal, low).
    #[arg(short = 'p', long, default_value = "normal")]
    pub priority: Priority,

    /// Execution this task belongs to.
    #[arg(long)]
    pub execution_id: Option<Uuid>,

    /// Submitting user.
    #[arg(long)]
    pub user_id: Option<String>,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `datasync status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Task id.
    pub task_id: Uuid,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `datasync cancel`.
#[derive(Parser, Debug)]
pub struct CancelArgs {
    /// Task id.
    pub task_id: Uuid,
}

/// Arguments for `datasync stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Print Prometheus text format.
    #[arg(long, conflicts_with = "json")]
    pub prometheus: bool,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Execution entrypoint arguments.
#[derive(Parser, Debug)]
pub struct ExecutionArgs {
    #[command(subcommand)]
    pub command: ExecutionSubcommand,
}

/// Execution subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum ExecutionSubcommand {
    /// Group existing tasks into an execution.
    Create(ExecutionCreateArgs),

    /// Show an execution record.
    Show(ExecutionShowArgs),

    /// Recompute an execution's counters from its member tasks.
    Refresh(ExecutionRefreshArgs),
}

/// Arguments for `datasync execution create`.
#[derive(Parser, Debug)]
pub struct ExecutionCreateArgs {
    /// Member task ids.
    #[arg(required = true, num_args = 1..)]
    pub task_ids: Vec<Uuid>,

    /// Trigger type (manual, group, scheduled).
    #[arg(long, default_value = "manual")]
    pub trigger: TriggerType,

    /// Plugin group name.
    #[arg(long)]
    pub group: Option<String>,

    /// First date of the covered range.
    #[arg(long, requires = "end")]
    pub start: Option<NaiveDate>,

    /// Last date of the covered range.
    #[arg(long, requires = "start")]
    pub end: Option<NaiveDate>,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `datasync execution show`.
#[derive(Parser, Debug)]
pub struct ExecutionShowArgs {
    /// Execution id.
    pub execution_id: Uuid,

    /// Also list the member tasks.
    #[arg(long)]
    pub tasks: bool,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `datasync execution refresh`.
#[derive(Parser, Debug)]
pub struct ExecutionRefreshArgs {
    /// Execution id.
    pub execution_id: Uuid,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
struct GlobalOptions {
    log_level: String,
    redis_url: Option<String>,
    key_prefix: Option<String>,
}

impl GlobalOptions {
    fn queue_config(&self) -> anyhow::Result<QueueConfig> {
        let mut config = QueueConfig::from_env()?;
        if let Some(url) = &self.redis_url {
            config = config.with_redis_url(url.clone());
        }
        if let Some(prefix) = &self.key_prefix {
            config = config.with_key_prefix(prefix.clone());
        }
        config.validate()?;
        Ok(config)
    }

    async fn connect(&self) -> anyhow::Result<QueueClient> {
        Ok(QueueClient::connect(self.queue_config()?).await?)
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// This is the main entry point for the datasync CLI. An `Err` maps to a
/// non-zero exit code.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let global = GlobalOptions {
        log_level: cli.log_level,
        redis_url: cli.redis_url,
        key_prefix: cli.key_prefix,
    };

    match cli.command {
        Commands::Worker(args) => run_worker_command(args, &global).await,
        Commands::Enqueue(args) => run_enqueue_command(args, &global).await,
        Commands::Status(args) => run_status_command(args, &global).await,
        Commands::Cancel(args) => run_cancel_command(args, &global).await,
        Commands::Stats(args) => run_stats_command(args, &global).await,
        Commands::Execution(args) => run_execution_command(args, &global).await,
    }
}

// ============================================================================
// Worker Command Implementation
// ============================================================================

fn worker_config(args: &WorkerArgs) -> anyhow::Result<WorkerConfig> {
    let mut config = WorkerConfig::from_env()?;
    if let Some(workers) = args.workers {
        config.num_workers = workers;
    }
    if let Some(dir) = &args.plugin_dir {
        config = config.with_plugin_dir(dir.clone());
    }
    if let Some(path) = &args.holidays {
        config = config.with_holidays_file(path.clone());
    }
    if let Some(dir) = &args.metrics_dir {
        config = config.with_metrics_dir(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn run_worker_command(args: WorkerArgs, global: &GlobalOptions) -> anyhow::Result<()> {
    let config = worker_config(&args)?;

    if config.num_workers > 1 && !args.once && args.worker_id.is_none() {
        return run_supervisor(&config, global).await;
    }

    let worker_id = args
        .worker_id
        .clone()
        .unwrap_or_else(|| "worker-0".to_string());
    run_inline_worker(worker_id, &args, &config, global).await
}

/// Arguments a supervised child needs; the supervisor appends `--worker-id`.
fn worker_child_args(config: &WorkerConfig, global: &GlobalOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--log-level".into(), global.log_level.clone().into()];
    if let Some(url) = &global.redis_url {
        args.push("--redis-url".into());
        args.push(url.into());
    }
    if let Some(prefix) = &global.key_prefix {
        args.push("--key-prefix".into());
        args.push(prefix.into());
    }

    args.push("worker".into());
    args.push("--workers".into());
    args.push("1".into());
    args.push("--supervised".into());
    args.push("--plugin-dir".into());
    args.push(config.plugin_dir.clone().into_os_string());
    if let Some(path) = &config.holidays_file {
        args.push("--holidays".into());
        args.push(path.clone().into_os_string());
    }
    if let Some(dir) = &config.metrics_dir {
        args.push("--metrics-dir".into());
        args.push(dir.clone().into_os_string());
    }
    args
}

async fn run_supervisor(config: &WorkerConfig, global: &GlobalOptions) -> anyhow::Result<()> {
    let command = WorkerCommand::current_exe(worker_child_args(config, global))?;
    let supervisor = Supervisor::new(command, config);

    info!(
        workers = supervisor.num_workers(),
        plugin_dir = %config.plugin_dir.display(),
        "Starting worker processes"
    );
    supervisor.run().await?;
    Ok(())
}

async fn run_inline_worker(
    worker_id: String,
    args: &WorkerArgs,
    config: &WorkerConfig,
    global: &GlobalOptions,
) -> anyhow::Result<()> {
    init_worker_metrics(&worker_id)?;

    let queue = Arc::new(global.connect().await?);
    if !queue.ping().await {
        warn!(worker_id = %worker_id, "Job store did not answer ping; continuing");
    }

    let plugins = PluginRegistry::discover(&config.plugin_dir)?;
    if plugins.is_empty() {
        warn!(
            worker_id = %worker_id,
            plugin_dir = %config.plugin_dir.display(),
            "No plugins found; every task will fail"
        );
    } else {
        info!(worker_id = %worker_id, plugins = ?plugins.names(), "Plugins loaded");
    }

    let calendar = match &config.holidays_file {
        Some(path) => WeekdayCalendar::from_file(path)?,
        None => WeekdayCalendar::new(),
    };

    let (handle, signal) = shutdown_channel();
    install_signal_handlers(handle, args.supervised);

    let metrics_file = config.metrics_file(&worker_id);
    let metrics_writer = metrics_file.clone().map(|path| {
        info!(worker_id = %worker_id, path = %path.display(), "Writing metrics file");
        spawn_metrics_writer(path, config.metrics_interval, signal.clone())
    });

    let worker = Worker::new(
        worker_id,
        Arc::clone(&queue),
        Arc::new(plugins),
        Arc::new(calendar),
        signal,
    );

    if args.once {
        match worker.run_once().await {
            Some(outcome) => {
                println!(
                    "Task {} {} ({} records)",
                    outcome.task_id, outcome.status, outcome.records_processed
                );
                if let Some(message) = outcome.error_message {
                    println!("  error: {}", message);
                }
            }
            None => println!("No task available."),
        }
    } else {
        worker.run().await;
    }

    if let Some(writer) = metrics_writer {
        writer.abort();
    }
    if let Some(path) = &metrics_file {
        if let Err(e) = write_metrics_file(path).await {
            warn!(path = %path.display(), error = %e, "Failed to write final metrics file");
        }
    }

    drop(worker);
    if let Ok(queue) = Arc::try_unwrap(queue) {
        queue.close();
    }
    Ok(())
}

// ============================================================================
// Queue Command Implementations
// ============================================================================

async fn run_enqueue_command(args: EnqueueArgs, global: &GlobalOptions) -> anyhow::Result<()> {
    let queue = global.connect().await?;

    let mut task = NewTask::new(args.plugin, args.task_type)
        .with_trade_dates(args.dates)
        .with_priority(args.priority);
    if let Some(execution_id) = args.execution_id {
        task = task.with_execution_id(execution_id);
    }
    if let Some(user_id) = args.user_id {
        task = task.with_user_id(user_id);
    }

    let task_id = queue
        .enqueue(task)
        .await
        .ok_or_else(|| anyhow::anyhow!("Failed to enqueue task: job store unavailable"))?;

    if args.json {
        println!("{}", serde_json::json!({ "task_id": task_id }));
    } else {
        println!("{}", task_id);
    }

    queue.close();
    Ok(())
}

async fn run_status_command(args: StatusArgs, global: &GlobalOptions) -> anyhow::Result<()> {
    let queue = global.connect().await?;
    let task = queue
        .get_task(args.task_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("Task {} not found", args.task_id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        print_task(&task);
    }

    queue.close();
    Ok(())
}

async fn run_cancel_command(args: CancelArgs, global: &GlobalOptions) -> anyhow::Result<()> {
    let queue = global.connect().await?;
    let cancelled = queue.cancel_task(args.task_id).await;
    queue.close();

    if !cancelled {
        anyhow::bail!(
            "Task {} was not cancelled: only pending tasks can be cancelled",
            args.task_id
        );
    }
    println!("Cancelled {}", args.task_id);
    Ok(())
}

async fn run_stats_command(args: StatsArgs, global: &GlobalOptions) -> anyhow::Result<()> {
    let queue = global.connect().await?;
    let stats = queue
        .get_queue_stats()
        .await
        .ok_or_else(|| anyhow::anyhow!("Failed to read queue stats: job store unavailable"))?;
    queue.close();

    if args.prometheus {
        init_metrics()?;
        MetricsCollector::new().set_queue_stats(&stats);
        print!("{}", export_metrics());
    } else if args.json {
        let output = serde_json::json!({
            "high": stats.high,
            "normal": stats.normal,
            "low": stats.low,
            "pending": stats.pending(),
            "running": stats.running,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Queue:");
        println!("  high:    {}", stats.high);
        println!("  normal:  {}", stats.normal);
        println!("  low:     {}", stats.low);
        println!("  running: {}", stats.running);
    }
    Ok(())
}

// ============================================================================
// Execution Command Implementations
// ============================================================================

async fn run_execution_command(args: ExecutionArgs, global: &GlobalOptions) -> anyhow::Result<()> {
    let queue = global.connect().await?;
    let result = match args.command {
        ExecutionSubcommand::Create(args) => run_execution_create(&queue, args).await,
        ExecutionSubcommand::Show(args) => run_execution_show(&queue, args).await,
        ExecutionSubcommand::Refresh(args) => run_execution_refresh(&queue, args).await,
    };
    queue.close();
    result
}

async fn run_execution_create(queue: &QueueClient, args: ExecutionCreateArgs) -> anyhow::Result<()> {
    let date_range = match (args.start, args.end) {
        (Some(start), Some(end)) => {
            if end < start {
                anyhow::bail!("--end {} is before --start {}", end, start);
            }
            Some(DateRange::new(start, end))
        }
        _ => None,
    };

    let execution_id = queue
        .create_execution(args.task_ids, args.trigger, args.group, date_range)
        .await
        .ok_or_else(|| anyhow::anyhow!("Failed to create execution: job store unavailable"))?;

    if args.json {
        println!("{}", serde_json::json!({ "execution_id": execution_id }));
    } else {
        println!("{}", execution_id);
    }
    Ok(())
}

async fn run_execution_show(queue: &QueueClient, args: ExecutionShowArgs) -> anyhow::Result<()> {
    let execution = queue
        .get_execution(args.execution_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("Execution {} not found", args.execution_id))?;

    let tasks = if args.tasks {
        queue
            .list_execution_tasks(args.execution_id)
            .await
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    if args.json {
        let output = if args.tasks {
            serde_json::json!({ "execution": execution, "tasks": tasks })
        } else {
            serde_json::to_value(&execution)?
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_execution(&execution);
        for task in &tasks {
            println!(
                "  - {} {} {} ({} records)",
                task.task_id, task.plugin_name, task.status, task.records_processed
            );
        }
    }
    Ok(())
}

async fn run_execution_refresh(
    queue: &QueueClient,
    args: ExecutionRefreshArgs,
) -> anyhow::Result<()> {
    let execution = queue
        .update_execution_stats(args.execution_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("Execution {} not found", args.execution_id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else {
        print_execution(&execution);
    }
    Ok(())
}

fn print_task(task: &TaskRecord) {
    println!("Task {}", task.task_id);
    println!("  plugin:    {}", task.plugin_name);
    println!("  type:      {}", task.task_type);
    println!("  priority:  {}", task.priority.lane());
    println!("  status:    {}", task.status);
    println!("  progress:  {}%", task.progress);
    println!("  records:   {}", task.records_processed);
    if !task.trade_dates.is_empty() {
        println!("  dates:     {}", task.trade_dates.join(","));
    }
    println!("  created:   {}", task.created_at.to_rfc3339());
    if let Some(started) = task.started_at {
        println!("  started:   {}", started.to_rfc3339());
    }
    if let Some(completed) = task.completed_at {
        println!("  completed: {}", completed.to_rfc3339());
    }
    if let Some(execution_id) = task.execution_id {
        println!("  execution: {}", execution_id);
    }
    if let Some(message) = &task.error_message {
        println!("  error:     {}", message);
    }
}

fn print_execution(execution: &ExecutionRecord) {
    println!("Execution {}", execution.execution_id);
    println!("  trigger:   {}", execution.trigger_type);
    if let Some(group) = &execution.group_name {
        println!("  group:     {}", group);
    }
    if let Some(range) = &execution.date_range {
        println!("  dates:     {} .. {}", range.start, range.end);
    }
    println!("  status:    {}", execution.status);
    println!(
        "  plugins:   {} total, {} completed, {} failed",
        execution.total_plugins, execution.completed_plugins, execution.failed_plugins
    );
    println!("  started:   {}", execution.started_at.to_rfc3339());
    if let Some(completed) = execution.completed_at {
        println!("  completed: {}", completed.to_rfc3339());
    }
}
