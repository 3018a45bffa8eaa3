// src/repair/session.rs
//
// One repair session per candidate:
//
//   Pending -> Compiling -> Succeeded
//                       \-> Failed -> Repairing -> Compiling ...
//
// Any phase may end in Aborted (budget, attempt cap, local or LLM error).
// The budget is checked before every attempt and before every LLM request,
// so nothing new starts once it has elapsed. A build already running is
// allowed to finish.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

use crate::llm::backend::LlmBackend;
use crate::llm::extract::extract_code;
use crate::llm::prompt;
use crate::logger::Logger;
use crate::project::layout::CandidatePaths;
use crate::project::references::{resolve_references, ReferenceResolution};
use crate::project::source::SourceUnit;
use crate::repair::workspace::CandidateWorkspace;
use crate::repair::{RepairLimits, Strategy};
use crate::state::{AbortReason, CompileStatus, RepairPhase, SessionOutcome};

/// Read-only material shown to the model next to the failing file.
#[derive(Debug, Clone, Default)]
pub struct RepairContext {
    pub source: String,
    pub references: String,
}

impl RepairContext {
    pub fn for_candidate(paths: &CandidatePaths, log: &Logger) -> Result<Self, String> {
        let unit = SourceUnit::read(&paths.source)?;

        let resolution = resolve_references(&unit);
        match &resolution {
            ReferenceResolution::Unparsed(e) => {
                log.warn(format!("imports not parsed, continuing without references: {e}"))
            }
            ReferenceResolution::Resolved { partial: true, .. } => {
                log.warn("imports parsed from the pre-declaration text only")
            }
            _ => {}
        }

        Ok(Self {
            references: resolution.context_text(),
            source: unit.code,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub name: String,
    #[serde(flatten)]
    pub outcome: SessionOutcome,
    pub attempts: u32,
    pub revisions: u32,
    pub phase: RepairPhase,
    pub elapsed_ms: u64,
    pub test_path: PathBuf,
    pub report_path: PathBuf,
    pub last_status: Option<CompileStatus>,
}

impl SessionReport {
    /// Report for a session that never started.
    pub fn not_started(paths: &CandidatePaths, reason: AbortReason) -> Self {
        Self {
            name: paths.name.clone(),
            outcome: SessionOutcome::Aborted(reason),
            attempts: 0,
            revisions: 0,
            phase: RepairPhase::Aborted,
            elapsed_ms: 0,
            test_path: paths.test.clone(),
            report_path: paths.report.clone(),
            last_status: None,
        }
    }
}

pub struct RepairSession {
    pub(super) workspace: Arc<CandidateWorkspace>,
    pub(super) context: RepairContext,
    pub(super) limits: RepairLimits,
    pub(super) log: Logger,
    pub(super) revisions: u32,
    phase: RepairPhase,
    started: Instant,
}

impl RepairSession {
    pub fn new(
        workspace: Arc<CandidateWorkspace>,
        context: RepairContext,
        limits: RepairLimits,
        log: Logger,
    ) -> Self {
        Self {
            workspace,
            context,
            limits,
            log,
            revisions: 0,
            phase: RepairPhase::Pending,
            started: Instant::now(),
        }
    }

    pub fn run(self, strategy: Strategy, llm: &dyn LlmBackend) -> SessionReport {
        match strategy {
            Strategy::Directed => self.run_directed(llm),
            Strategy::Agent => self.run_agent(llm),
        }
    }

    /// Controller-driven loop: compile, and on failure ask for exactly one
    /// full-file revision before compiling again.
    pub fn run_directed(mut self, llm: &dyn LlmBackend) -> SessionReport {
        let mut content = match self.workspace.read_test() {
            Ok(c) => c,
            Err(e) => return self.finish(SessionOutcome::Aborted(AbortReason::LocalError(e))),
        };

        loop {
            if let Some(reason) = self.exhausted() {
                return self.finish(SessionOutcome::Aborted(reason));
            }

            self.set_phase(RepairPhase::Compiling);
            let report = match self.workspace.attempt(&content) {
                Ok(r) => r,
                Err(e) => return self.finish(SessionOutcome::Aborted(AbortReason::LocalError(e))),
            };

            if report.status.is_success() {
                return self.finish(SessionOutcome::Succeeded);
            }

            self.set_phase(RepairPhase::Failed);
            self.log.warn(format!(
                "attempt {} failed: {}",
                self.workspace.attempts(),
                first_error_line(&report.text)
            ));

            if let Some(reason) = self.exhausted() {
                return self.finish(SessionOutcome::Aborted(reason));
            }

            self.set_phase(RepairPhase::Repairing);
            let request = prompt::repair(
                &self.context.source,
                &self.context.references,
                &content,
                &report.text,
            );

            let answer = match llm.run(&request, self.llm_timeout()) {
                Ok(a) => a,
                Err(e) => return self.finish(SessionOutcome::Aborted(AbortReason::Llm(e))),
            };
            self.revisions += 1;

            let revised = extract_code(&answer.text);
            if revised.trim().is_empty() {
                self.log.warn("model returned an empty file");
            }

            let (added, removed) = diff_stat(&content, &revised);
            self.log
                .info(format!("revision {}: +{} -{}", self.revisions, added, removed));
            content = revised;
        }
    }

    pub(super) fn set_phase(&mut self, next: RepairPhase) {
        if !self.phase.is_terminal() {
            self.phase = next;
        }
    }

    /// Why no further attempt or request may start, if any.
    pub(super) fn exhausted(&self) -> Option<AbortReason> {
        if self.started.elapsed() >= self.limits.budget {
            return Some(AbortReason::BudgetElapsed);
        }

        let cap = self.limits.max_attempts;
        if cap > 0 && self.workspace.attempts() >= cap {
            return Some(AbortReason::AttemptCapReached(cap));
        }

        None
    }

    /// Request timeout clipped to what is left of the budget.
    pub(super) fn llm_timeout(&self) -> Duration {
        let remaining = self.limits.budget.saturating_sub(self.started.elapsed());
        remaining.min(self.limits.request_timeout)
    }

    pub(super) fn finish(mut self, outcome: SessionOutcome) -> SessionReport {
        let elapsed = self.started.elapsed();
        let aborted_in = self.phase;

        match &outcome {
            SessionOutcome::Succeeded => self.log.success(format!(
                "compiles after {} attempt(s), {} revision(s)",
                self.workspace.attempts(),
                self.revisions
            )),
            SessionOutcome::Aborted(reason) => {
                self.log.error(format!("aborted while {:?}: {}", aborted_in, reason))
            }
        }

        self.set_phase(if outcome.is_success() {
            RepairPhase::Succeeded
        } else {
            RepairPhase::Aborted
        });

        let paths = self.workspace.paths();
        SessionReport {
            name: paths.name.clone(),
            outcome,
            attempts: self.workspace.attempts(),
            revisions: self.revisions,
            phase: self.phase,
            elapsed_ms: elapsed.as_millis() as u64,
            test_path: paths.test.clone(),
            report_path: paths.report.clone(),
            last_status: self.workspace.last_status(),
        }
    }
}

fn diff_stat(before: &str, after: &str) -> (usize, usize) {
    TextDiff::from_lines(before, after)
        .iter_all_changes()
        .fold((0, 0), |(added, removed), change| match change.tag() {
            ChangeTag::Insert => (added + 1, removed),
            ChangeTag::Delete => (added, removed + 1),
            ChangeTag::Equal => (added, removed),
        })
}

pub(super) fn first_error_line(report: &str) -> &str {
    report
        .lines()
        .find(|l| l.contains("Error") || l.contains("error"))
        .or_else(|| report.lines().find(|l| !l.trim().is_empty()))
        .map(str::trim)
        .unwrap_or("<empty report>")
}


#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::fixture::{limits, Fixture};
    use super::*;
    use crate::forge::invoker::testing::ScriptedCompiler;
    use crate::llm::backend::testing::ScriptedBackend;

    const FIXED: &str = "pragma solidity ^0.8.0;\ncontract FooTest is Test {\n    function test_bar() public {}\n}";

    #[test]
    fn end_to_end_repair_succeeds_after_two_attempts() {
        let fx = Fixture::new(ScriptedCompiler::new(&[
            ("Error (2314): Expected '}' but got end of source", 1),
            ("Compiler run successful!", 0),
        ]));
        let llm = ScriptedBackend::replies(&[format!("Fixed it:\n```solidity\n{FIXED}\n```\nDone.").as_str()]);

        let report = fx.session(limits()).run_directed(&llm);

        assert_eq!(report.outcome, SessionOutcome::Succeeded);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.revisions, 1);
        assert_eq!(report.phase, RepairPhase::Succeeded);
        assert_eq!(llm.run_count(), 1);
        assert_eq!(fs::read_to_string(&report.test_path).unwrap(), FIXED);
        assert_eq!(
            fs::read_to_string(&report.report_path).unwrap(),
            "Compiler run successful!"
        );
    }

    #[test]
    fn compiling_candidate_needs_no_llm_call() {
        let fx = Fixture::new(ScriptedCompiler::always("Compiler run successful!", 0));
        let llm = ScriptedBackend::failing("must not be called");

        let report = fx.session(limits()).run_directed(&llm);

        assert_eq!(report.outcome, SessionOutcome::Succeeded);
        assert_eq!(report.attempts, 1);
        assert_eq!(llm.run_count(), 0);
    }

    #[test]
    fn each_failure_gets_exactly_one_revision_request() {
        let fx = Fixture::new(ScriptedCompiler::new(&[
            ("Error: one", 1),
            ("Error: two", 1),
            ("Error: three", 1),
            ("ok", 0),
        ]));
        let llm = ScriptedBackend::replies(&["```solidity\nA\n```", "```solidity\nB\n```", "```solidity\nC\n```"]);

        let report = fx.session(limits()).run_directed(&llm);

        assert_eq!(report.outcome, SessionOutcome::Succeeded);
        assert_eq!(report.attempts, 4);
        assert_eq!(report.revisions, 3);

        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].user.contains("Error: one"));
        assert!(prompts[1].user.contains("Error: two"));
        assert!(prompts[1].user.contains("\nA\n"));
        assert!(prompts[2].user.contains("Error: three"));
        assert!(prompts.iter().all(|p| p.user.contains(super::fixture::FOO)));
    }

    #[test]
    fn attempt_cap_stops_a_fast_failing_loop() {
        let fx = Fixture::new(ScriptedCompiler::always("Error: still broken", 1));
        let llm = ScriptedBackend::replies(&["```solidity\nX\n```"]);
        let mut l = limits();
        l.max_attempts = 3;

        let report = fx.session(l).run_directed(&llm);

        assert_eq!(
            report.outcome,
            SessionOutcome::Aborted(AbortReason::AttemptCapReached(3))
        );
        assert_eq!(report.attempts, 3);
        assert_eq!(llm.run_count(), 2);
        assert_eq!(report.last_status, Some(CompileStatus::Failed));
    }

    #[test]
    fn wall_clock_budget_bounds_the_loop() {
        let fx = Fixture::new(ScriptedCompiler::always("Error: never compiles", 1));
        let llm = ScriptedBackend::replies(&["```solidity\nX\n```"])
            .with_delay(Duration::from_millis(40));
        let l = RepairLimits {
            budget: Duration::from_millis(300),
            max_attempts: 0,
            request_timeout: Duration::from_secs(5),
        };

        let started = Instant::now();
        let report = fx.session(l).run_directed(&llm);

        assert_eq!(report.outcome, SessionOutcome::Aborted(AbortReason::BudgetElapsed));
        assert!(report.attempts >= 2);
        assert!(started.elapsed() < Duration::from_millis(300 + 1_000));
        assert_eq!(fx.compiler.call_count() as u32, report.attempts);
    }

    #[test]
    fn missing_candidate_aborts_with_local_error() {
        let fx = Fixture::new(ScriptedCompiler::always("ok", 0));
        fs::remove_file(fx.layout.test_dir.join("Foo.t.sol")).unwrap();
        let llm = ScriptedBackend::replies(&[]);

        let report = fx.session(limits()).run_directed(&llm);

        assert!(matches!(
            report.outcome,
            SessionOutcome::Aborted(AbortReason::LocalError(_))
        ));
        assert_eq!(report.attempts, 0);
    }

    #[test]
    fn llm_failure_aborts_the_session() {
        let fx = Fixture::new(ScriptedCompiler::always("Error: x", 1));
        let llm = ScriptedBackend::failing("LLM error 500");

        let report = fx.session(limits()).run_directed(&llm);

        assert_eq!(
            report.outcome,
            SessionOutcome::Aborted(AbortReason::Llm("LLM error 500".into()))
        );
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn context_reads_source_and_references() {
        let fx = Fixture::new(ScriptedCompiler::always("ok", 0));
        let src = fx.layout.contracts_dir.clone();
        fs::write(src.join("Lib.sol"), "library Lib {}").unwrap();
        fs::write(
            src.join("Foo.sol"),
            "import \"./Lib.sol\";\ncontract Foo { function bar() public {} }",
        )
        .unwrap();

        let ctx = RepairContext::for_candidate(&fx.layout.candidate("Foo.sol"), &Logger::new(false))
            .unwrap();
        assert!(ctx.source.contains("contract Foo"));
        assert_eq!(ctx.references, "./Lib.sol:\nlibrary Lib {}\n\n");
    }

    #[test]
    fn first_error_line_prefers_diagnostics() {
        assert_eq!(
            first_error_line("Compiling 1 files\nError (2314): Expected ';'\n"),
            "Error (2314): Expected ';'"
        );
        assert_eq!(first_error_line(""), "<empty report>");
    }
}
