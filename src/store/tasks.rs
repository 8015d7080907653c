//! Scheduled task and execution persistence

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::model::{
    ExecutionStatus, ExecutionTrigger, ScheduleKind, ScheduledTask, TaskExecution, TaskStatus,
    TaskType,
};

use super::{from_millis, opt_from_millis, opt_to_millis, to_millis, Database, StoreError, StoreResult};

const TASK_COLUMNS: &str = "id, server_id, name, task_type, schedule, cron_expr, interval_secs, \
     run_at, timeout_secs, require_online, status, config, next_run, last_run, created_at";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        server_id: row.get(1)?,
        name: row.get(2)?,
        task_type: row.get(3)?,
        schedule: row.get(4)?,
        cron_expr: row.get(5)?,
        interval_secs: row.get(6)?,
        run_at: row.get(7)?,
        timeout_secs: row.get(8)?,
        require_online: row.get::<_, i64>(9)? != 0,
        status: row.get(10)?,
        config: row.get(11)?,
        next_run: row.get(12)?,
        last_run: row.get(13)?,
        created_at: row.get(14)?,
    })
}

struct TaskRow {
    id: String,
    server_id: String,
    name: String,
    task_type: String,
    schedule: String,
    cron_expr: Option<String>,
    interval_secs: Option<u64>,
    run_at: Option<i64>,
    timeout_secs: u64,
    require_online: bool,
    status: String,
    config: String,
    next_run: Option<i64>,
    last_run: Option<i64>,
    created_at: i64,
}

impl TaskRow {
    fn decode(self) -> StoreResult<ScheduledTask> {
        Ok(ScheduledTask {
            id: parse_uuid(&self.id)?,
            server_id: parse_uuid(&self.server_id)?,
            name: self.name,
            task_type: TaskType::from_str(&self.task_type)
                .ok_or_else(|| StoreError::Corrupt(format!("task type {}", self.task_type)))?,
            schedule: ScheduleKind::from_str(&self.schedule)
                .ok_or_else(|| StoreError::Corrupt(format!("schedule {}", self.schedule)))?,
            cron_expr: self.cron_expr,
            interval_secs: self.interval_secs,
            run_at: opt_from_millis(self.run_at),
            timeout_secs: self.timeout_secs,
            require_online: self.require_online,
            status: TaskStatus::from_str(&self.status)
                .ok_or_else(|| StoreError::Corrupt(format!("task status {}", self.status)))?,
            config: serde_json::from_str(&self.config)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            next_run: opt_from_millis(self.next_run),
            last_run: opt_from_millis(self.last_run),
            created_at: from_millis(self.created_at),
        })
    }
}

fn parse_uuid(s: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|_| StoreError::Corrupt(format!("uuid {}", s)))
}

impl Database {
    pub async fn create_task(&self, task: &ScheduledTask) -> StoreResult<()> {
        let config = serde_json::to_string(&task.config)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let conn = self.conn().await;
        conn.execute(
            r#"
            INSERT INTO scheduled_tasks
                (id, server_id, name, task_type, schedule, cron_expr, interval_secs,
                 run_at, timeout_secs, require_online, status, config, next_run,
                 last_run, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                task.id.to_string(),
                task.server_id.to_string(),
                task.name,
                task.task_type.to_string(),
                task.schedule.to_string(),
                task.cron_expr,
                task.interval_secs,
                opt_to_millis(&task.run_at),
                task.timeout_secs,
                task.require_online as i64,
                task.status.to_string(),
                config,
                opt_to_millis(&task.next_run),
                opt_to_millis(&task.last_run),
                to_millis(&task.created_at),
            ],
        )?;
        Ok(())
    }

    pub async fn get_task(&self, id: &Uuid) -> StoreResult<Option<ScheduledTask>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scheduled_tasks WHERE id = ?1",
            TASK_COLUMNS
        ))?;

        match stmt.query_row([id.to_string()], task_from_row) {
            Ok(row) => Ok(Some(row.decode()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    pub async fn list_tasks(&self, server_id: Option<&Uuid>) -> StoreResult<Vec<ScheduledTask>> {
        let conn = self.conn().await;

        let rows = match server_id {
            Some(server_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM scheduled_tasks WHERE server_id = ?1 ORDER BY created_at",
                    TASK_COLUMNS
                ))?;
                let result = stmt.query_map([server_id.to_string()], task_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                result
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM scheduled_tasks ORDER BY created_at",
                    TASK_COLUMNS
                ))?;
                let result = stmt.query_map([], task_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                result
            }
        };

        rows.into_iter().map(TaskRow::decode).collect()
    }

    /// Enabled tasks whose next run is due at `now`.
    pub async fn list_due_tasks(&self, now: &DateTime<Utc>) -> StoreResult<Vec<ScheduledTask>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scheduled_tasks \
             WHERE status = 'enabled' AND next_run IS NOT NULL AND next_run <= ?1 \
             ORDER BY next_run",
            TASK_COLUMNS
        ))?;

        let rows = stmt
            .query_map([to_millis(now)], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(TaskRow::decode).collect()
    }

    pub async fn update_task(&self, task: &ScheduledTask) -> StoreResult<()> {
        let config = serde_json::to_string(&task.config)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let conn = self.conn().await;
        let updated = conn.execute(
            r#"
            UPDATE scheduled_tasks SET
                name = ?2, task_type = ?3, schedule = ?4, cron_expr = ?5,
                interval_secs = ?6, run_at = ?7, timeout_secs = ?8,
                require_online = ?9, status = ?10, config = ?11, next_run = ?12,
                last_run = ?13
            WHERE id = ?1
            "#,
            params![
                task.id.to_string(),
                task.name,
                task.task_type.to_string(),
                task.schedule.to_string(),
                task.cron_expr,
                task.interval_secs,
                opt_to_millis(&task.run_at),
                task.timeout_secs,
                task.require_online as i64,
                task.status.to_string(),
                config,
                opt_to_millis(&task.next_run),
                opt_to_millis(&task.last_run),
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    /// Advance the schedule pointers; clearing `next_run` disables further
    /// scheduled firing.
    pub async fn update_task_next_run(
        &self,
        id: &Uuid,
        next_run: Option<DateTime<Utc>>,
        last_run: Option<DateTime<Utc>>,
        status: TaskStatus,
    ) -> StoreResult<()> {
        let conn = self.conn().await;
        let updated = conn.execute(
            "UPDATE scheduled_tasks SET next_run = ?2, last_run = ?3, status = ?4 WHERE id = ?1",
            params![
                id.to_string(),
                opt_to_millis(&next_run),
                opt_to_millis(&last_run),
                status.to_string(),
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("task {}", id)));
        }
        Ok(())
    }

    pub async fn delete_task(&self, id: &Uuid) -> StoreResult<()> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        let id = id.to_string();

        tx.execute("DELETE FROM task_executions WHERE task_id = ?1", [&id])?;
        let deleted = tx.execute("DELETE FROM scheduled_tasks WHERE id = ?1", [&id])?;
        tx.commit()?;

        if deleted == 0 {
            return Err(StoreError::NotFound(format!("task {}", id)));
        }
        Ok(())
    }

    // ========================================================================
    // Executions
    // ========================================================================

    pub async fn create_execution(&self, execution: &TaskExecution) -> StoreResult<()> {
        let conn = self.conn().await;
        conn.execute(
            r#"
            INSERT INTO task_executions
                (id, task_id, server_id, status, triggered_by, started_at, ended_at,
                 duration_ms, output, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                execution.id.to_string(),
                execution.task_id.to_string(),
                execution.server_id.to_string(),
                execution.status.to_string(),
                execution.trigger.to_string(),
                to_millis(&execution.started_at),
                opt_to_millis(&execution.ended_at),
                execution.duration_ms,
                execution.output,
                execution.error,
            ],
        )?;
        Ok(())
    }

    pub async fn update_execution(&self, execution: &TaskExecution) -> StoreResult<()> {
        let conn = self.conn().await;
        let updated = conn.execute(
            r#"
            UPDATE task_executions SET
                status = ?2, ended_at = ?3, duration_ms = ?4, output = ?5, error = ?6
            WHERE id = ?1
            "#,
            params![
                execution.id.to_string(),
                execution.status.to_string(),
                opt_to_millis(&execution.ended_at),
                execution.duration_ms,
                execution.output,
                execution.error,
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("execution {}", execution.id)));
        }
        Ok(())
    }

    pub async fn get_execution(&self, id: &Uuid) -> StoreResult<Option<TaskExecution>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, server_id, status, triggered_by, started_at, ended_at, \
             duration_ms, output, error FROM task_executions WHERE id = ?1",
        )?;

        match stmt.query_row([id.to_string()], execution_from_row) {
            Ok(row) => Ok(Some(row.decode()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    /// Execution history for one task, most recent first.
    pub async fn list_executions(
        &self,
        task_id: &Uuid,
        limit: usize,
    ) -> StoreResult<Vec<TaskExecution>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, server_id, status, triggered_by, started_at, ended_at, \
             duration_ms, output, error FROM task_executions \
             WHERE task_id = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![task_id.to_string(), limit as i64], execution_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(ExecutionRow::decode).collect()
    }
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRow> {
    Ok(ExecutionRow {
        id: row.get(0)?,
        task_id: row.get(1)?,
        server_id: row.get(2)?,
        status: row.get(3)?,
        triggered_by: row.get(4)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        duration_ms: row.get(7)?,
        output: row.get(8)?,
        error: row.get(9)?,
    })
}

struct ExecutionRow {
    id: String,
    task_id: String,
    server_id: String,
    status: String,
    triggered_by: String,
    started_at: i64,
    ended_at: Option<i64>,
    duration_ms: Option<i64>,
    output: Option<String>,
    error: Option<String>,
}

impl ExecutionRow {
    fn decode(self) -> StoreResult<TaskExecution> {
        Ok(TaskExecution {
            id: parse_uuid(&self.id)?,
            task_id: parse_uuid(&self.task_id)?,
            server_id: parse_uuid(&self.server_id)?,
            status: ExecutionStatus::from_str(&self.status)
                .ok_or_else(|| StoreError::Corrupt(format!("execution status {}", self.status)))?,
            trigger: ExecutionTrigger::from_str(&self.triggered_by)
                .ok_or_else(|| StoreError::Corrupt(format!("trigger {}", self.triggered_by)))?,
            started_at: from_millis(self.started_at),
            ended_at: opt_from_millis(self.ended_at),
            duration_ms: self.duration_ms,
            output: self.output,
            error: self.error,
        })
    }
}
