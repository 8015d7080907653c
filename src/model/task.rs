//! Scheduled task and execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a task does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Send an RCON command (config: `{"command": "..."}`)
    Command,
    Restart,
    Start,
    Stop,
    /// Reserved, returns not-implemented
    Backup,
    /// Run a script inside the container (config: `{"script_path": "...", "args": "..."}`)
    Script,
}

impl TaskType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "command" => Some(TaskType::Command),
            "restart" => Some(TaskType::Restart),
            "start" => Some(TaskType::Start),
            "stop" => Some(TaskType::Stop),
            "backup" => Some(TaskType::Backup),
            "script" => Some(TaskType::Script),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Command => "command",
            TaskType::Restart => "restart",
            TaskType::Start => "start",
            TaskType::Stop => "stop",
            TaskType::Backup => "backup",
            TaskType::Script => "script",
        };
        write!(f, "{}", s)
    }
}

/// Schedule discriminant; exactly one of the schedule-specific fields on
/// [`ScheduledTask`] is populated for the matching kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Cron,
    Interval,
    Once,
}

impl ScheduleKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cron" => Some(ScheduleKind::Cron),
            "interval" => Some(ScheduleKind::Interval),
            "once" => Some(ScheduleKind::Once),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduleKind::Cron => "cron",
            ScheduleKind::Interval => "interval",
            ScheduleKind::Once => "once",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enabled,
    Disabled,
}

impl TaskStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "enabled" => Some(TaskStatus::Enabled),
            "disabled" => Some(TaskStatus::Disabled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Enabled => write!(f, "enabled"),
            TaskStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// A per-server scheduled task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub server_id: Uuid,
    pub name: String,
    pub task_type: TaskType,
    pub schedule: ScheduleKind,
    pub cron_expr: Option<String>,
    pub interval_secs: Option<u64>,
    pub run_at: Option<DateTime<Utc>>,
    /// 0 means the executor default (5 minutes)
    pub timeout_secs: u64,
    /// Skip (with a Skipped execution) when the server is not Running
    pub require_online: bool,
    pub status: TaskStatus,
    /// Task-type specific payload
    pub config: serde_json::Value,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    /// Check that exactly the schedule field matching the discriminant is set.
    pub fn validate_schedule(&self) -> std::result::Result<(), String> {
        let (cron, interval, once) = (
            self.cron_expr.is_some(),
            self.interval_secs.is_some(),
            self.run_at.is_some(),
        );
        let ok = match self.schedule {
            ScheduleKind::Cron => cron && !interval && !once,
            ScheduleKind::Interval => interval && !cron && !once,
            ScheduleKind::Once => once && !cron && !interval,
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "schedule kind {} does not match populated fields",
                self.schedule
            ))
        }
    }
}

/// Terminal or in-flight state of one task invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    Skipped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "timeout" => Some(ExecutionStatus::Timeout),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            "skipped" => Some(ExecutionStatus::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTrigger {
    Scheduled,
    Manual,
}

impl ExecutionTrigger {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(ExecutionTrigger::Scheduled),
            "manual" => Some(ExecutionTrigger::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionTrigger::Scheduled => write!(f, "scheduled"),
            ExecutionTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Immutable record of one task invocation
///
/// `ended_at` is set exactly when the status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: Uuid,
    pub task_id: Uuid,
    pub server_id: Uuid,
    pub status: ExecutionStatus,
    pub trigger: ExecutionTrigger,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output: Option<String>,
    pub error: Option<String>,
}
