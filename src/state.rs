use chrono::{DateTime, Local};
use serde::Serialize;

pub const MAX_LOGS: usize = 1000;

/* ---------- logging ---------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: LogLevel,
    pub scope: Option<String>,
    pub text: String,
    pub at: DateTime<Local>,
}

/* ---------- compilation ---------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStatus {
    Succeeded,
    Failed,
}

impl CompileStatus {
    pub fn is_success(self) -> bool {
        matches!(self, CompileStatus::Succeeded)
    }
}

/* ---------- repair lifecycle ---------- */

/// Where a repair session currently is.
///
/// Pending -> Compiling -> (Succeeded | Failed -> Repairing -> Compiling ...)
/// Any state may move to Aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairPhase {
    Pending,
    Compiling,
    Failed,
    Repairing,
    Succeeded,
    Aborted,
}

impl RepairPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RepairPhase::Succeeded | RepairPhase::Aborted)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    BudgetElapsed,
    AttemptCapReached(u32),
    LocalError(String),
    Llm(String),
    CandidateBusy,
    /// The model ended the conversation while the candidate still fails.
    Unresolved,
    Panicked(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::BudgetElapsed => write!(f, "wall-clock budget elapsed"),
            AbortReason::AttemptCapReached(n) => write!(f, "attempt cap of {n} reached"),
            AbortReason::LocalError(e) => write!(f, "local error: {e}"),
            AbortReason::Llm(e) => write!(f, "llm error: {e}"),
            AbortReason::CandidateBusy => write!(f, "candidate already has an active session"),
            AbortReason::Unresolved => write!(f, "model stopped with a failing candidate"),
            AbortReason::Panicked(e) => write!(f, "session panicked: {e}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum SessionOutcome {
    Succeeded,
    Aborted(AbortReason),
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Succeeded)
    }
}
