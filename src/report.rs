// src/report.rs
//
// End-of-batch summary: per-candidate outcomes plus counts, printable as a
// short summary or as JSON.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::forge::classify::ClassifierMode;
use crate::logger::Logger;
use crate::repair::batch::{BatchResult, CheckEntry, CheckState};
use crate::repair::session::SessionReport;
use crate::repair::{RepairLimits, Strategy};
use crate::state::{LogLevel, SessionOutcome};

const LOG_TAIL: usize = 50;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Counts {
    pub candidates: usize,
    /// Already compiling at pre-check.
    pub skipped: usize,
    pub succeeded: usize,
    pub aborted: usize,
    /// Pre-check could not run for these.
    pub errored: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub generated_at: String,
    pub project: PathBuf,
    pub strategy: Strategy,
    pub classifier: ClassifierMode,
    pub budget_secs: u64,
    pub max_attempts: u32,
    pub counts: Counts,
    pub log_warnings: usize,
    pub log_errors: usize,
    pub checked: Vec<CheckEntry>,
    pub sessions: Vec<SessionReport>,
    pub log_tail: Vec<String>,
}

impl BatchReport {
    pub fn new(
        result: BatchResult,
        project: &Path,
        strategy: Strategy,
        classifier: ClassifierMode,
        limits: &RepairLimits,
        log: &Logger,
    ) -> Self {
        let counts = count(&result);

        Self {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now().to_rfc3339(),
            project: project.to_path_buf(),
            strategy,
            classifier,
            budget_secs: limits.budget.as_secs(),
            max_attempts: limits.max_attempts,
            counts,
            log_warnings: log.count(LogLevel::Warn),
            log_errors: log.count(LogLevel::Error),
            checked: result.checked,
            sessions: result.sessions,
            log_tail: log.tail(LOG_TAIL),
        }
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| e.to_string())
    }

    pub fn write(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        fs::write(path, self.to_json()?).map_err(|e| format!("{}: {}", path.display(), e))
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let c = &self.counts;

        let _ = writeln!(out, "run: {}", self.run_id);
        let _ = writeln!(out, "project: {}", self.project.display());
        let _ = writeln!(
            out,
            "strategy: {:?}, classifier: {:?}, budget: {}s, max attempts: {}",
            self.strategy, self.classifier, self.budget_secs, self.max_attempts
        );
        let _ = writeln!(
            out,
            "candidates: {}, skipped: {}, succeeded: {}, aborted: {}, errored: {}",
            c.candidates, c.skipped, c.succeeded, c.aborted, c.errored
        );
        let _ = writeln!(out, "log: {} warning(s), {} error(s)", self.log_warnings, self.log_errors);

        if !self.sessions.is_empty() {
            let _ = writeln!(out, "sessions:");
            for s in &self.sessions {
                let verdict = match &s.outcome {
                    SessionOutcome::Succeeded => "ok".to_string(),
                    SessionOutcome::Aborted(reason) => format!("aborted ({reason})"),
                };
                let _ = writeln!(
                    out,
                    "  {:<24} {:>3} attempt(s) {:>3} revision(s) {:>8}ms  {}",
                    s.name, s.attempts, s.revisions, s.elapsed_ms, verdict
                );
            }
        }

        out
    }
}

fn count(result: &BatchResult) -> Counts {
    let mut c = Counts {
        candidates: result.checked.len(),
        ..Counts::default()
    };

    for entry in &result.checked {
        match entry.state {
            CheckState::Compiles => c.skipped += 1,
            CheckState::Error(_) => c.errored += 1,
            CheckState::Fails(_) | CheckState::Missing => {}
        }
    }

    for s in &result.sessions {
        if s.outcome.is_success() {
            c.succeeded += 1;
        } else {
            c.aborted += 1;
        }
    }

    c
}
