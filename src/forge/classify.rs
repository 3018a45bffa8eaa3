use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::state::CompileStatus;

/// How a build report is turned into a compile status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierMode {
    /// Report text containing "error" or "Error" fails.
    ///
    /// Coarse: a test naming a custom error (`InsufficientBalanceError`)
    /// echoed back by the compiler is misread as a failure.
    #[default]
    Substring,
    /// Process exit code; substring rule when the process had no exit code.
    ExitCode,
    /// Fails when either signal says so.
    Strict,
}

pub fn has_error_marker(text: &str) -> bool {
    text.contains("error") || text.contains("Error")
}

pub fn classify(mode: ClassifierMode, text: &str, exit_code: Option<i32>) -> CompileStatus {
    let failed = match (mode, exit_code) {
        (ClassifierMode::Substring, _) => has_error_marker(text),
        (ClassifierMode::ExitCode, Some(code)) => code != 0,
        (ClassifierMode::ExitCode, None) => has_error_marker(text),
        (ClassifierMode::Strict, code) => {
            has_error_marker(text) || code.map(|c| c != 0).unwrap_or(false)
        }
    };

    if failed {
        CompileStatus::Failed
    } else {
        CompileStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_mode_is_case_sensitive_on_two_spellings() {
        let m = ClassifierMode::Substring;
        assert_eq!(classify(m, "Compiler run successful!", Some(0)), CompileStatus::Succeeded);
        assert_eq!(classify(m, "Error (7576): Undeclared identifier.", Some(1)), CompileStatus::Failed);
        assert_eq!(classify(m, "compiler error", Some(0)), CompileStatus::Failed);
        assert_eq!(classify(m, "ERROR", Some(1)), CompileStatus::Succeeded);
    }

    #[test]
    fn exit_code_mode_prefers_the_structured_signal() {
        let m = ClassifierMode::ExitCode;
        assert_eq!(
            classify(m, "Compiled test/Foo.t.sol: revert CustomError()", Some(0)),
            CompileStatus::Succeeded
        );
        assert_eq!(classify(m, "", Some(1)), CompileStatus::Failed);
        assert_eq!(classify(m, "Error: killed", None), CompileStatus::Failed);
        assert_eq!(classify(m, "killed", None), CompileStatus::Succeeded);
    }

    #[test]
    fn strict_mode_fails_on_either_signal() {
        let m = ClassifierMode::Strict;
        assert_eq!(classify(m, "clean", Some(2)), CompileStatus::Failed);
        assert_eq!(classify(m, "Error", Some(0)), CompileStatus::Failed);
        assert_eq!(classify(m, "clean", Some(0)), CompileStatus::Succeeded);
        assert_eq!(classify(m, "clean", None), CompileStatus::Succeeded);
    }
}
