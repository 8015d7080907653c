//! Task scheduler
//!
//! A single-process executor over the persisted task table. A tick loop
//! queries for due tasks and launches each as a concurrent execution with a
//! deadline and a cancellation handle; every execution is finalized into an
//! append-only history record.

mod cron_util;

pub use cron_util::{initial_next_run, next_cron_after, parse_cron};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::ContainerEngine;
use crate::error::{Error, Result};
use crate::minecraft;
use crate::model::{
    ExecutionStatus, ExecutionTrigger, ScheduleKind, ScheduledTask, Server, ServerStatus,
    TaskExecution, TaskStatus, TaskType,
};
use crate::reconciler::Reconciler;
use crate::store::Database;

/// Deadline applied when a task declares no timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

struct SchedulerState {
    running: bool,
    tick_token: Option<CancellationToken>,
}

struct ExecutionHandle {
    task_id: Uuid,
    token: CancellationToken,
}

pub struct TaskScheduler {
    db: Arc<Database>,
    reconciler: Arc<Reconciler>,
    engine: Arc<dyn ContainerEngine>,
    check_interval: Duration,
    /// Scheduler state lock; always acquired before the execution map lock.
    state: Mutex<SchedulerState>,
    /// Live cancellation handles keyed by execution id.
    executions: Mutex<HashMap<Uuid, ExecutionHandle>>,
    tracker: TaskTracker,
}

impl TaskScheduler {
    pub fn new(
        db: Arc<Database>,
        reconciler: Arc<Reconciler>,
        engine: Arc<dyn ContainerEngine>,
        check_interval: Duration,
    ) -> Self {
        Self {
            db,
            reconciler,
            engine,
            check_interval,
            state: Mutex::new(SchedulerState {
                running: false,
                tick_token: None,
            }),
            executions: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Start the tick loop.
    pub fn start(self: Arc<Self>) {
        let mut state = self.state.lock();
        if state.running {
            return;
        }
        state.running = true;

        let token = CancellationToken::new();
        state.tick_token = Some(token.clone());

        let interval = self.check_interval;
        let scheduler = self.clone();
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Scheduler tick loop stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        scheduler.clone().tick_once().await;
                    }
                }
            }
        });

        info!("Task scheduler started (check interval {:?})", interval);
    }

    /// One tick: launch every due task that has no live execution.
    pub async fn tick_once(self: Arc<Self>) {
        let now = Utc::now();
        let due = match self.db.list_due_tasks(&now).await {
            Ok(due) => due,
            Err(e) => {
                warn!("Due-task query failed: {}", e);
                return;
            }
        };

        for task in due {
            if self.has_live_execution(&task.id) {
                debug!("Task {} still has a live execution; not relaunching", task.id);
                continue;
            }

            let scheduler = self.clone();
            let execution_id = Uuid::new_v4();
            self.tracker.spawn(async move {
                scheduler
                    .run_task(task, ExecutionTrigger::Scheduled, execution_id)
                    .await;
            });
        }
    }

    /// Manually fire a task, bypassing the due check. Returns the execution
    /// id; the execution itself runs in the background.
    pub async fn trigger(self: Arc<Self>, task_id: &Uuid) -> Result<Uuid> {
        let task = self
            .db
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::NotFound("task", task_id.to_string()))?;

        if self.has_live_execution(&task.id) {
            return Err(Error::Conflict(format!(
                "task {} already has a live execution",
                task.id
            )));
        }

        let execution_id = Uuid::new_v4();
        let scheduler = self.clone();
        self.tracker.spawn(async move {
            scheduler
                .run_task(task, ExecutionTrigger::Manual, execution_id)
                .await;
        });
        Ok(execution_id)
    }

    /// Cancel a live execution. The running dispatch observes the token and
    /// finalizes as Cancelled.
    pub async fn cancel(&self, execution_id: &Uuid) -> Result<()> {
        {
            let executions = self.executions.lock();
            if let Some(handle) = executions.get(execution_id) {
                handle.token.cancel();
                return Ok(());
            }
        }

        match self.db.get_execution(execution_id).await? {
            Some(execution) if execution.status.is_terminal() => Err(Error::Precondition(
                "execution has already finished".into(),
            )),
            Some(_) => Err(Error::Precondition(
                "execution is not cancellable from this process".into(),
            )),
            None => Err(Error::NotFound("execution", execution_id.to_string())),
        }
    }

    pub fn live_executions(&self) -> usize {
        self.executions.lock().len()
    }

    fn has_live_execution(&self, task_id: &Uuid) -> bool {
        self.executions
            .lock()
            .values()
            .any(|handle| handle.task_id == *task_id)
    }

    /// Stop the tick loop, cancel every live execution, and join.
    pub async fn shutdown(&self) {
        {
            // State lock first, then the execution map (lock order)
            let mut state = self.state.lock();
            state.running = false;
            if let Some(token) = state.tick_token.take() {
                token.cancel();
            }

            let executions = self.executions.lock();
            for handle in executions.values() {
                handle.token.cancel();
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        info!("Task scheduler stopped");
    }

    // ========================================================================
    // Execution protocol
    // ========================================================================

    /// Run one task invocation end to end. The execution record is always
    /// finalized before this returns.
    pub(crate) async fn run_task(
        &self,
        task: ScheduledTask,
        trigger: ExecutionTrigger,
        execution_id: Uuid,
    ) {
        let started_at = Utc::now();

        let server = match self.db.get_server(&task.server_id).await {
            Ok(server) => server,
            Err(e) => {
                warn!("Task {} could not load its server: {}", task.id, e);
                return;
            }
        };

        let online = server
            .as_ref()
            .is_some_and(|s| s.status == ServerStatus::Running);
        if task.require_online && !online {
            let skipped = TaskExecution {
                id: execution_id,
                task_id: task.id,
                server_id: task.server_id,
                status: ExecutionStatus::Skipped,
                trigger,
                started_at,
                ended_at: Some(started_at),
                duration_ms: Some(0),
                output: None,
                error: Some("server offline".into()),
            };
            if let Err(e) = self.db.create_execution(&skipped).await {
                warn!("Failed to record skipped execution for {}: {}", task.id, e);
            }
            self.advance_schedule(&task, started_at).await;
            return;
        }

        let mut execution = TaskExecution {
            id: execution_id,
            task_id: task.id,
            server_id: task.server_id,
            status: ExecutionStatus::Running,
            trigger,
            started_at,
            ended_at: None,
            duration_ms: None,
            output: None,
            error: None,
        };
        if let Err(e) = self.db.create_execution(&execution).await {
            warn!("Failed to insert execution for task {}: {}", task.id, e);
            return;
        }

        let deadline = if task.timeout_secs == 0 {
            DEFAULT_TIMEOUT
        } else {
            Duration::from_secs(task.timeout_secs)
        };

        let token = CancellationToken::new();
        self.executions.lock().insert(
            execution_id,
            ExecutionHandle {
                task_id: task.id,
                token: token.clone(),
            },
        );

        let outcome = tokio::select! {
            _ = token.cancelled() => Outcome::Cancelled,
            _ = tokio::time::sleep(deadline) => Outcome::Timeout,
            result = self.dispatch(&task, server.as_ref()) => match result {
                Ok(output) => Outcome::Completed(output),
                Err(e) => Outcome::Failed(e.to_string()),
            },
        };

        let ended_at = Utc::now();
        execution.ended_at = Some(ended_at);
        execution.duration_ms = Some((ended_at - started_at).num_milliseconds());
        match outcome {
            Outcome::Completed(output) => {
                execution.status = ExecutionStatus::Completed;
                execution.output = Some(output);
            }
            Outcome::Failed(message) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(message);
            }
            Outcome::Timeout => {
                execution.status = ExecutionStatus::Timeout;
                execution.error = Some("execution timed out".into());
            }
            Outcome::Cancelled => {
                execution.status = ExecutionStatus::Cancelled;
            }
        }

        if let Err(e) = self.db.update_execution(&execution).await {
            warn!("Failed to finalize execution {}: {}", execution_id, e);
        }

        self.executions.lock().remove(&execution_id);
        self.advance_schedule(&task, started_at).await;

        debug!(
            "Task {} execution {} finished: {}",
            task.id, execution_id, execution.status
        );
    }

    /// Task-type dispatch. Closed set; no registry.
    async fn dispatch(&self, task: &ScheduledTask, server: Option<&Server>) -> Result<String> {
        let server = server.ok_or_else(|| Error::NotFound("server", task.server_id.to_string()))?;

        match task.task_type {
            TaskType::Command => {
                let command = task
                    .config
                    .get("command")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| {
                        Error::InvalidArgument(
                            "command tasks require a non-empty config.command".into(),
                        )
                    })?;
                if !server.has_container() {
                    return Err(Error::Precondition("server has no container".into()));
                }

                let (output, success) = self.reconciler.exec_command(&server.id, command).await?;
                if success {
                    Ok(output)
                } else {
                    Err(Error::Internal(format!("command failed: {}", output)))
                }
            }

            TaskType::Start => {
                self.reconciler.start(&server.id).await?;
                Ok("server started".into())
            }

            TaskType::Stop => {
                self.reconciler.stop(&server.id).await?;
                Ok("server stopped".into())
            }

            TaskType::Restart => {
                self.reconciler.restart(&server.id).await?;
                Ok("server restarted".into())
            }

            TaskType::Script => {
                let script_path = task
                    .config
                    .get("script_path")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        Error::InvalidArgument(
                            "script tasks require a non-empty config.script_path".into(),
                        )
                    })?;
                let args = task
                    .config
                    .get("args")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let container_id = server
                    .container_id
                    .as_deref()
                    .ok_or_else(|| Error::Precondition("server has no container".into()))?;

                let argv =
                    minecraft::script_argv(script_path, args).map_err(Error::InvalidArgument)?;
                let output = self
                    .engine
                    .exec(container_id, &argv)
                    .await
                    .map_err(Error::from)?;

                if output.success() {
                    Ok(output.combined())
                } else {
                    Err(Error::Internal(format!(
                        "script exited with code {}: {}",
                        output.exit_code,
                        output.combined()
                    )))
                }
            }

            TaskType::Backup => Err(Error::Internal("backup tasks are not implemented".into())),
        }
    }

    /// Advance the schedule pointers after any execution.
    async fn advance_schedule(&self, task: &ScheduledTask, now: DateTime<Utc>) {
        let (next_run, status) = match task.schedule {
            ScheduleKind::Once => (None, TaskStatus::Disabled),
            ScheduleKind::Interval => (
                task.interval_secs
                    .map(|secs| now + chrono::Duration::seconds(secs as i64)),
                task.status,
            ),
            ScheduleKind::Cron => (
                task.cron_expr
                    .as_deref()
                    .and_then(|expr| next_cron_after(expr, now)),
                task.status,
            ),
        };

        if let Err(e) = self
            .db
            .update_task_next_run(&task.id, next_run, Some(now), status)
            .await
        {
            warn!("Failed to advance schedule for task {}: {}", task.id, e);
        }
    }
}

enum Outcome {
    Completed(String),
    Failed(String),
    Timeout,
    Cancelled,
}

#[cfg(test)]
mod tests;
