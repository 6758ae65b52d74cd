//! Durable data model: Execution, StepResult, Timer, Schedule, AuditEntry (SPEC_FULL §3).
//!
//! Grounded on the teacher's `domain/models/workflow_state.rs` (`WorkflowState` phase
//! tracking promoted here to a persisted `Execution`), `domain/models/task_schedule.rs`
//! (`TaskSchedule`/`TaskScheduleType`/`TaskScheduleStatus`, renamed `Schedule`/`ScheduleKind`/
//! `ScheduleStatus`), and `services/audit_log.rs` (`AuditEntry`, `AuditLevel`, kind-tagged
//! append-only record). Crates: `serde`, `chrono`, `uuid`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque execution id (SPEC_FULL §3: `Execution.id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExecutionId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// SPEC_FULL §3 / §4.6: the execution state machine.
///
/// ```text
/// pending → running → (completed | failed | sleeping | cancelled | compensation_failed)
/// sleeping → running (on timer fire / signal / resume)
/// failed → pending (on retry when attempt < maxAttempts)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Sleeping,
    Completed,
    Failed,
    Cancelled,
    CompensationFailed,
}

impl ExecutionStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::CompensationFailed
        ) || matches!(self, Self::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::CompensationFailed => "compensation_failed",
        }
    }
}

/// A durable, persisted workflow execution (SPEC_FULL §3: `Execution`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub task_id: String,
    pub input: Value,
    pub status: ExecutionStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub idempotency_key: Option<String>,
    pub cancel_reason: Option<String>,
}

impl Execution {
    pub fn new(task_id: impl Into<String>, input: Value, max_attempts: u32, idempotency_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ExecutionId::new(),
            task_id: task_id.into(),
            input,
            status: ExecutionStatus::Pending,
            attempt: 0,
            max_attempts,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            idempotency_key,
            cancel_reason: None,
        }
    }
}

/// One memoized step result, keyed by `(executionId, stepId)` (SPEC_FULL §3: `StepResult`,
/// invariant 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub execution_id: ExecutionId,
    pub step_id: String,
    /// The persisted outcome: a completed value, or a state marker used by `sleep` /
    /// `waitForSignal` (SPEC_FULL §3: "result | state marker (e.g. \"waiting\")").
    pub outcome: StepOutcome,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    Value(Value),
    /// A `sleep()` call recorded, not yet fired.
    Sleeping,
    /// A `sleep()` whose timer has fired; replay resumes normally.
    SleepFired,
    /// A `waitForSignal()` call recorded, not yet resolved.
    Waiting,
    /// A signal payload was delivered for this `waitForSignal()` call.
    SignalDelivered(Value),
    /// A `waitForSignal()` call that timed out before a signal arrived.
    TimedOut,
}

/// What kind of wakeup a [`Timer`] represents (SPEC_FULL §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Sleep,
    SignalTimeout,
    Scheduled,
    KickoffFailsafe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Pending,
    Fired,
}

/// A persisted future wakeup (SPEC_FULL §3: `Timer`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timer {
    pub id: Uuid,
    pub kind: TimerKind,
    pub execution_id: Option<ExecutionId>,
    pub step_id: Option<String>,
    pub schedule_id: Option<Uuid>,
    pub task_id: Option<String>,
    pub input: Option<Value>,
    pub fire_at: DateTime<Utc>,
    pub status: TimerStatus,
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
}

impl Timer {
    pub fn sleep(execution_id: ExecutionId, step_id: impl Into<String>, fire_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: TimerKind::Sleep,
            execution_id: Some(execution_id),
            step_id: Some(step_id.into()),
            schedule_id: None,
            task_id: None,
            input: None,
            fire_at,
            status: TimerStatus::Pending,
            claimed_by: None,
            claim_expires_at: None,
        }
    }

    pub fn signal_timeout(execution_id: ExecutionId, step_id: impl Into<String>, fire_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: TimerKind::SignalTimeout,
            execution_id: Some(execution_id),
            step_id: Some(step_id.into()),
            schedule_id: None,
            task_id: None,
            input: None,
            fire_at,
            status: TimerStatus::Pending,
            claimed_by: None,
            claim_expires_at: None,
        }
    }

    pub fn scheduled(schedule_id: Uuid, task_id: impl Into<String>, input: Value, fire_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: TimerKind::Scheduled,
            execution_id: None,
            step_id: None,
            schedule_id: Some(schedule_id),
            task_id: Some(task_id.into()),
            input: Some(input),
            fire_at,
            status: TimerStatus::Pending,
            claimed_by: None,
            claim_expires_at: None,
        }
    }

    pub fn kickoff_failsafe(execution_id: ExecutionId, fire_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: TimerKind::KickoffFailsafe,
            execution_id: Some(execution_id),
            step_id: None,
            schedule_id: None,
            task_id: None,
            input: None,
            fire_at,
            status: TimerStatus::Pending,
            claimed_by: None,
            claim_expires_at: None,
        }
    }

    pub fn is_claim_expired(&self, now: DateTime<Utc>) -> bool {
        match self.claim_expires_at {
            Some(expires) => now >= expires,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron,
    Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Paused,
}

/// A recurring or future plan that materializes Timers (SPEC_FULL §3: `Schedule`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub task_id: String,
    pub kind: ScheduleKind,
    /// Cron expression, or an interval encoded as whole seconds (`"<secs>"`), matching
    /// `schedule.pattern` in SPEC_FULL §3.
    pub pattern: String,
    pub input: Value,
    pub status: ScheduleStatus,
    pub next_run: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Discriminant kinds of append-only durable observations (SPEC_FULL §3: `AuditEntry`).
/// Grounded on `services/audit_log.rs`'s kind-tagged `AuditEntry` enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditKind {
    ExecutionStatusChanged { from: String, to: String },
    StepCompleted { step_id: String },
    SleepScheduled { step_id: String, fire_at: DateTime<Utc> },
    SleepCompleted { step_id: String },
    SignalWaiting { event_id: String },
    SignalDelivered { event_id: String },
    SignalTimedOut { event_id: String },
    EmitPublished { event_id: String },
    Note { message: String, meta: Option<Value> },
    SwitchEvaluated { condition: String, branch: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub execution_id: ExecutionId,
    pub at: DateTime<Utc>,
    pub kind: AuditKind,
}

impl AuditEntry {
    pub fn new(execution_id: ExecutionId, kind: AuditKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            at: Utc::now(),
            kind,
        }
    }
}
