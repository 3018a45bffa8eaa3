// src/tools/compile.rs

use std::sync::Arc;

use serde_json::{json, Value};

use super::{Tool, ToolResult};
use crate::repair::workspace::CandidateWorkspace;
use crate::state::CompileStatus;

pub const NAME: &str = "compile_test_contract";

/// Writes the given test file and compiles it, bound to one candidate.
pub struct CompileTestContract {
    workspace: Arc<CandidateWorkspace>,
}

impl CompileTestContract {
    pub fn new(workspace: Arc<CandidateWorkspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for CompileTestContract {
    fn name(&self) -> &'static str {
        NAME
    }

    fn schema(&self) -> Value {
        json!({
            "type": "function",
            "name": NAME,
            "description": "Write the full test contract file and compile it with forge. Returns the compiler output.",
            "parameters": {
                "type": "object",
                "properties": {
                    "filecontent": {
                        "type": "string",
                        "description": "Complete Solidity source of the test contract"
                    }
                },
                "required": ["filecontent"],
                "additionalProperties": false
            }
        })
    }

    fn call(&self, args: Value) -> ToolResult {
        let content = args
            .get("filecontent")
            .and_then(Value::as_str)
            .ok_or("missing filecontent")?;

        let report = self.workspace.attempt(content)?;

        Ok(json!({
            "status": match report.status {
                CompileStatus::Succeeded => "succeeded",
                CompileStatus::Failed => "failed",
            },
            "report": report.text,
            "report_path": report.path.display().to_string()
        }))
    }
}
