// src/repair/agent.rs
//
// Model-driven repair. The model gets the failing file and the
// `compile_test_contract` tool and decides itself when to stop. The session
// status is that of the last compile.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::llm::backend::{LlmBackend, Message, ModelTurn};
use crate::llm::prompt;
use crate::repair::session::{first_error_line, RepairSession, SessionReport};
use crate::state::{AbortReason, RepairPhase, SessionOutcome};
use crate::tools::{CompileTestContract, Tool, ToolRegistry};

impl RepairSession {
    pub fn run_agent(mut self, llm: &dyn LlmBackend) -> SessionReport {
        let content = match self.workspace.read_test() {
            Ok(c) => c,
            Err(e) => return self.finish(SessionOutcome::Aborted(AbortReason::LocalError(e))),
        };

        let tools: Vec<Box<dyn Tool>> = vec![Box::new(CompileTestContract::new(Arc::clone(
            &self.workspace,
        )))];
        let registry = ToolRegistry::new(tools);
        let schema = registry.schema();

        let opening = prompt::agent_repair(&self.context.source, &self.context.references, &content);
        let mut messages = vec![Message::System(opening.system), Message::User(opening.user)];

        loop {
            if let Some(reason) = self.exhausted().or_else(|| self.turn_cap_reached()) {
                return self.finish(SessionOutcome::Aborted(reason));
            }

            self.set_phase(RepairPhase::Repairing);
            let turn = match llm.converse(&messages, &schema, self.llm_timeout()) {
                Ok(t) => t,
                Err(e) => return self.finish(SessionOutcome::Aborted(AbortReason::Llm(e))),
            };

            let (text, calls) = match turn {
                ModelTurn::Text(text) => {
                    self.log.info(format!("model finished: {}", one_line(&text)));
                    break;
                }
                ModelTurn::ToolCalls { text, calls } => (text, calls),
            };

            self.revisions += 1;
            if let Some(text) = text {
                messages.push(Message::Assistant(text));
            }

            for call in calls {
                if let Some(reason) = self.exhausted() {
                    return self.finish(SessionOutcome::Aborted(reason));
                }

                self.set_phase(RepairPhase::Compiling);
                let result = registry
                    .call(&call.name, call.arguments.clone())
                    .unwrap_or_else(|e| json!({ "error": e }));

                self.log_tool_result(&result);

                let call_id = call.call_id.clone();
                messages.push(Message::ToolCall(call));
                messages.push(Message::ToolResult {
                    call_id,
                    output: result.to_string(),
                });
            }
        }

        if self.workspace.last_status().is_none() {
            if let Some(reason) = self.exhausted() {
                return self.finish(SessionOutcome::Aborted(reason));
            }
            self.set_phase(RepairPhase::Compiling);
            if let Err(e) = self.workspace.compile_current() {
                return self.finish(SessionOutcome::Aborted(AbortReason::LocalError(e)));
            }
        }

        match self.workspace.last_status() {
            Some(status) if status.is_success() => self.finish(SessionOutcome::Succeeded),
            _ => self.finish(SessionOutcome::Aborted(AbortReason::Unresolved)),
        }
    }

    /// Model turns share the attempt cap so a model that never compiles still stops.
    fn turn_cap_reached(&self) -> Option<AbortReason> {
        let cap = self.limits.max_attempts;
        (cap > 0 && self.revisions >= cap).then_some(AbortReason::AttemptCapReached(cap))
    }

    fn log_tool_result(&self, result: &Value) {
        match result.get("status").and_then(Value::as_str) {
            Some("succeeded") => self
                .log
                .info(format!("attempt {} compiles", self.workspace.attempts())),
            Some(_) => self.log.warn(format!(
                "attempt {} failed: {}",
                self.workspace.attempts(),
                first_error_line(result.get("report").and_then(Value::as_str).unwrap_or(""))
            )),
            None => self.log.warn(format!(
                "tool call rejected: {}",
                result.get("error").and_then(Value::as_str).unwrap_or("unknown error")
            )),
        }
    }
}

fn one_line(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    line.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::*;
    use crate::forge::invoker::testing::ScriptedCompiler;
    use crate::llm::backend::testing::ScriptedBackend;
    use crate::llm::backend::ToolCall;
    use crate::repair::session::fixture::{limits, Fixture};
    use crate::repair::RepairLimits;
    use crate::state::CompileStatus;

    fn compile_call(id: &str, content: &str) -> ModelTurn {
        ModelTurn::ToolCalls {
            text: None,
            calls: vec![ToolCall {
                call_id: id.into(),
                name: "compile_test_contract".into(),
                arguments: json!({ "filecontent": content }),
            }],
        }
    }

    #[test]
    fn tool_loop_runs_until_the_model_stops() {
        let fx = Fixture::new(ScriptedCompiler::new(&[
            ("Error (7576): Undeclared identifier.", 1),
            ("Compiler run successful!", 0),
        ]));
        let llm = ScriptedBackend::turns(vec![
            compile_call("c1", "contract FooTest { x }"),
            compile_call("c2", "contract FooTest {}"),
            ModelTurn::Text("The test contract compiles now.".into()),
        ]);

        let report = fx.session(limits()).run_agent(&llm);

        assert_eq!(report.outcome, SessionOutcome::Succeeded);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.revisions, 2);
        assert_eq!(llm.turn_count(), 3);
        assert_eq!(fs::read_to_string(&report.test_path).unwrap(), "contract FooTest {}");

        let conversations = llm.conversations.lock().unwrap();
        let second = &conversations[1];
        assert!(matches!(&second[0], Message::System(_)));
        match second.last().unwrap() {
            Message::ToolResult { call_id, output } => {
                assert_eq!(call_id, "c1");
                assert!(output.contains("Undeclared identifier"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn model_that_never_compiles_gets_one_check() {
        let fx = Fixture::new(ScriptedCompiler::always("Compiler run successful!", 0));
        let llm = ScriptedBackend::turns(vec![ModelTurn::Text("looks fine".into())]);

        let report = fx.session(limits()).run_agent(&llm);

        assert_eq!(report.outcome, SessionOutcome::Succeeded);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.last_status, Some(CompileStatus::Succeeded));
    }

    #[test]
    fn stopping_on_a_failing_file_is_unresolved() {
        let fx = Fixture::new(ScriptedCompiler::always("Error: nope", 1));
        let llm = ScriptedBackend::turns(vec![
            compile_call("c1", "contract FooTest {"),
            ModelTurn::Text("I cannot fix this.".into()),
        ]);

        let report = fx.session(limits()).run_agent(&llm);

        assert_eq!(report.outcome, SessionOutcome::Aborted(AbortReason::Unresolved));
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn wall_clock_budget_ends_the_conversation() {
        let fx = Fixture::new(ScriptedCompiler::always("Error: never compiles", 1));
        let llm = ScriptedBackend::turns((0..200).map(|i| compile_call(&format!("c{i}"), "x")).collect())
            .with_delay(Duration::from_millis(40));
        let l = RepairLimits {
            budget: Duration::from_millis(300),
            max_attempts: 0,
            request_timeout: Duration::from_secs(5),
        };

        let started = Instant::now();
        let report = fx.session(l).run_agent(&llm);

        assert_eq!(report.outcome, SessionOutcome::Aborted(AbortReason::BudgetElapsed));
        assert!(report.attempts >= 2);
        assert!(llm.turn_count() < 200);
        assert!(started.elapsed() < Duration::from_millis(300 + 1_000));
        assert_eq!(fx.compiler.call_count() as u32, report.attempts);
    }

    #[test]
    fn attempt_cap_applies_to_tool_calls() {
        let fx = Fixture::new(ScriptedCompiler::always("Error: nope", 1));
        let llm = ScriptedBackend::turns((0..6).map(|i| compile_call(&format!("c{i}"), "x")).collect());
        let mut l = limits();
        l.max_attempts = 2;

        let report = fx.session(l).run_agent(&llm);

        assert_eq!(
            report.outcome,
            SessionOutcome::Aborted(AbortReason::AttemptCapReached(2))
        );
        assert_eq!(report.attempts, 2);
        assert_eq!(llm.turn_count(), 2);
    }
}
