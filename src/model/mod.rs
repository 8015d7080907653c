//! Core data model
//!
//! Plain records shared by the store, the reconciler, the scheduler and the
//! HTTP surface. Held logic is limited to state-machine helpers and
//! validation; everything stateful lives in the owning subsystem.

mod route;
mod server;
mod task;
mod user;

pub use route::{normalize_hostname, ProxyRoute};
pub use server::{ModLoader, Server, ServerStatus};
pub use task::{
    ExecutionStatus, ExecutionTrigger, ScheduleKind, ScheduledTask, TaskExecution, TaskStatus,
    TaskType,
};
pub use user::{SessionRecord, User, UserRole};

use uuid::Uuid;

/// The settings row holding defaults applied to every new server.
pub const GLOBAL_SETTINGS_ID: Uuid = Uuid::nil();
