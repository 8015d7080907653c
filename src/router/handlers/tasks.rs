//! Task service handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{ScheduleKind, ScheduledTask, TaskExecution, TaskStatus, TaskType};
use crate::router::AppState;
use crate::scheduler::initial_next_run;

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub server_id: Option<Uuid>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<ScheduledTask>>> {
    Ok(Json(state.db.list_tasks(query.server_id.as_ref()).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub server_id: Uuid,
    pub name: String,
    pub task_type: TaskType,
    pub schedule: ScheduleKind,
    pub cron_expr: Option<String>,
    pub interval_secs: Option<u64>,
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default)]
    pub require_online: bool,
    #[serde(default = "default_config")]
    pub config: serde_json::Value,
}

fn default_config() -> serde_json::Value {
    json!({})
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<Json<ScheduledTask>> {
    if request.name.trim().is_empty() {
        return Err(Error::InvalidArgument("task name must not be empty".into()));
    }
    state
        .db
        .get_server(&request.server_id)
        .await?
        .ok_or_else(|| Error::NotFound("server", request.server_id.to_string()))?;

    let now = Utc::now();
    let mut task = ScheduledTask {
        id: Uuid::new_v4(),
        server_id: request.server_id,
        name: request.name,
        task_type: request.task_type,
        schedule: request.schedule,
        cron_expr: request.cron_expr,
        interval_secs: request.interval_secs,
        run_at: request.run_at,
        timeout_secs: request.timeout_secs,
        require_online: request.require_online,
        status: TaskStatus::Enabled,
        config: request.config,
        next_run: None,
        last_run: None,
        created_at: now,
    };

    task.validate_schedule().map_err(Error::InvalidArgument)?;
    task.next_run = initial_next_run(&task, now)?;

    state.db.create_task(&task).await?;
    Ok(Json(task))
}

async fn load_task(state: &AppState, id: &Uuid) -> Result<ScheduledTask> {
    state
        .db
        .get_task(id)
        .await?
        .ok_or_else(|| Error::NotFound("task", id.to_string()))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<ScheduledTask>> {
    Ok(Json(load_task(&state, &task_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub name: Option<String>,
    pub status: Option<TaskStatus>,
    pub schedule: Option<ScheduleKind>,
    pub cron_expr: Option<String>,
    pub interval_secs: Option<u64>,
    pub run_at: Option<DateTime<Utc>>,
    pub timeout_secs: Option<u64>,
    pub require_online: Option<bool>,
    pub config: Option<serde_json::Value>,
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<UpdateTaskRequest>,
) -> Result<Json<ScheduledTask>> {
    let mut task = load_task(&state, &task_id).await?;

    if let Some(name) = request.name {
        task.name = name;
    }
    if let Some(timeout_secs) = request.timeout_secs {
        task.timeout_secs = timeout_secs;
    }
    if let Some(require_online) = request.require_online {
        task.require_online = require_online;
    }
    if let Some(config) = request.config {
        task.config = config;
    }

    let schedule_changed = request.schedule.is_some()
        || request.cron_expr.is_some()
        || request.interval_secs.is_some()
        || request.run_at.is_some();
    if let Some(schedule) = request.schedule {
        task.schedule = schedule;
    }
    if schedule_changed {
        // A new discriminant replaces the old schedule fields wholesale
        task.cron_expr = request.cron_expr;
        task.interval_secs = request.interval_secs;
        task.run_at = request.run_at;
        task.validate_schedule().map_err(Error::InvalidArgument)?;
    }

    let was_enabled = task.status == TaskStatus::Enabled;
    if let Some(status) = request.status {
        task.status = status;
    }

    let reenabled = task.status == TaskStatus::Enabled && !was_enabled;
    if schedule_changed || reenabled {
        task.next_run = initial_next_run(&task, Utc::now())?;
    }
    if task.status == TaskStatus::Disabled {
        task.next_run = None;
    }

    state.db.update_task(&task).await?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    state.db.delete_task(&task_id).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn trigger_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let execution_id = state.scheduler.clone().trigger(&task_id).await?;
    Ok(Json(json!({ "execution_id": execution_id })))
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default = "default_execution_limit")]
    pub limit: usize,
}

fn default_execution_limit() -> usize {
    50
}

pub async fn list_executions(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<Vec<TaskExecution>>> {
    load_task(&state, &task_id).await?;
    Ok(Json(state.db.list_executions(&task_id, query.limit).await?))
}

pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    state.scheduler.cancel(&execution_id).await?;
    Ok(Json(json!({ "cancelled": true })))
}
