// src/repair/batch.rs
//
// Pre-check every candidate once, then run one repair session per failing
// candidate on the bounded pool. Each session is contained: an error or a
// panic is recorded for that candidate only.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::executor::pool::run_bounded;
use crate::forge::invoker::BuildInvoker;
use crate::llm::backend::LlmBackend;
use crate::logger::Logger;
use crate::project::layout::CandidatePaths;
use crate::repair::claims::CandidateClaims;
use crate::repair::session::{first_error_line, RepairContext, RepairSession, SessionReport};
use crate::repair::workspace::CandidateWorkspace;
use crate::repair::{RepairLimits, Strategy};
use crate::state::{AbortReason, CompileStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum CheckState {
    Compiles,
    Fails(String),
    /// No test file was generated for this source.
    Missing,
    Error(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckEntry {
    pub name: String,
    #[serde(flatten)]
    pub state: CheckState,
    pub test_path: PathBuf,
    pub report_path: PathBuf,
}

impl CheckEntry {
    /// Failing and missing candidates go to repair; a missing file then
    /// aborts its session with a local error.
    pub fn needs_repair(&self) -> bool {
        matches!(self.state, CheckState::Fails(_) | CheckState::Missing)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub checked: Vec<CheckEntry>,
    /// Completion order.
    pub sessions: Vec<SessionReport>,
}

pub struct BatchDriver {
    invoker: BuildInvoker,
    llm: Arc<dyn LlmBackend>,
    limits: RepairLimits,
    strategy: Strategy,
    workers: usize,
    claims: CandidateClaims,
    log: Logger,
}

impl BatchDriver {
    pub fn new(
        invoker: BuildInvoker,
        llm: Arc<dyn LlmBackend>,
        limits: RepairLimits,
        strategy: Strategy,
        workers: usize,
        log: Logger,
    ) -> Self {
        Self {
            invoker,
            llm,
            limits,
            strategy,
            workers,
            claims: CandidateClaims::new(),
            log,
        }
    }

    pub fn run_all(&self, candidates: &[CandidatePaths]) -> BatchResult {
        let checked = precheck(&self.invoker, candidates, self.workers);

        for entry in &checked {
            match &entry.state {
                CheckState::Compiles => self.log.scoped(&entry.name).success("compiles, skipped"),
                CheckState::Fails(first) => self.log.scoped(&entry.name).warn(format!("fails: {first}")),
                CheckState::Missing => self.log.scoped(&entry.name).warn("no test file"),
                CheckState::Error(e) => self.log.scoped(&entry.name).error(e.clone()),
            }
        }

        let by_name = index(candidates);
        let jobs: Vec<(String, CandidatePaths)> = checked
            .iter()
            .filter(|e| e.needs_repair())
            .filter_map(|e| by_name.get(&e.name).map(|p| (e.name.clone(), p.clone())))
            .collect();

        self.log.info(format!(
            "{} of {} candidate(s) need repair ({} workers, {:?})",
            jobs.len(),
            checked.len(),
            self.workers.min(jobs.len().max(1)),
            self.strategy
        ));

        let sessions = run_bounded(jobs, self.workers, |paths| self.repair_one(paths))
            .into_iter()
            .filter_map(|done| match done.result {
                Ok(report) => Some(report),
                Err(panic) => {
                    self.log.scoped(&done.label).error(format!("session panicked: {panic}"));
                    let paths = by_name.get(&done.label)?;
                    Some(SessionReport::not_started(paths, AbortReason::Panicked(panic)))
                }
            })
            .collect();

        BatchResult { checked, sessions }
    }

    fn repair_one(&self, paths: CandidatePaths) -> SessionReport {
        let log = self.log.scoped(&paths.name);

        let Some(_claim) = self.claims.claim(&paths.test) else {
            log.warn("another session owns this candidate");
            return SessionReport::not_started(&paths, AbortReason::CandidateBusy);
        };

        let context = match RepairContext::for_candidate(&paths, &log) {
            Ok(c) => c,
            Err(e) => {
                log.error(format!("cannot read source: {e}"));
                return SessionReport::not_started(&paths, AbortReason::LocalError(e));
            }
        };

        let workspace = Arc::new(CandidateWorkspace::new(paths, self.invoker.clone()));
        RepairSession::new(workspace, context, self.limits, log).run(self.strategy, self.llm.as_ref())
    }
}

/// Compiles every candidate once as it is on disk.
pub fn precheck(
    invoker: &BuildInvoker,
    candidates: &[CandidatePaths],
    workers: usize,
) -> Vec<CheckEntry> {
    let jobs = candidates
        .iter()
        .map(|p| (p.name.clone(), p.clone()))
        .collect();

    let by_name = index(candidates);

    run_bounded(jobs, workers, |paths: CandidatePaths| {
        let state = if !paths.test.is_file() {
            CheckState::Missing
        } else {
            match invoker.invoke(&paths) {
                Ok(r) if r.status == CompileStatus::Succeeded => CheckState::Compiles,
                Ok(r) => CheckState::Fails(first_error_line(&r.text).to_string()),
                Err(e) => CheckState::Error(e),
            }
        };
        (paths, state)
    })
    .into_iter()
    .filter_map(|done| {
        let (paths, state) = match done.result {
            Ok(pair) => pair,
            Err(panic) => (by_name.get(&done.label)?.clone(), CheckState::Error(panic)),
        };
        Some(CheckEntry {
            name: paths.name.clone(),
            state,
            test_path: paths.test,
            report_path: paths.report,
        })
    })
    .collect()
}

fn index(candidates: &[CandidatePaths]) -> HashMap<String, CandidatePaths> {
    candidates
        .iter()
        .map(|p| (p.name.clone(), p.clone()))
        .collect()
}
