// The write-then-build step shared by both repair strategies and the
// `compile_test_contract` tool.

use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::forge::invoker::{BuildInvoker, BuildReport};
use crate::project::layout::CandidatePaths;
use crate::state::CompileStatus;

pub struct CandidateWorkspace {
    paths: CandidatePaths,
    invoker: BuildInvoker,
    attempts: AtomicU32,
    last_status: Mutex<Option<CompileStatus>>,
}

impl CandidateWorkspace {
    pub fn new(paths: CandidatePaths, invoker: BuildInvoker) -> Self {
        Self {
            paths,
            invoker,
            attempts: AtomicU32::new(0),
            last_status: Mutex::new(None),
        }
    }

    pub fn paths(&self) -> &CandidatePaths {
        &self.paths
    }

    pub fn read_test(&self) -> Result<String, String> {
        fs::read_to_string(&self.paths.test)
            .map_err(|e| format!("{}: {}", self.paths.test.display(), e))
    }

    /// Replaces the candidate file with `content` and compiles it.
    pub fn attempt(&self, content: &str) -> Result<BuildReport, String> {
        if let Some(parent) = self.paths.test.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        fs::write(&self.paths.test, content)
            .map_err(|e| format!("{}: {}", self.paths.test.display(), e))?;

        self.compile_current()
    }

    /// Compiles the candidate as it is on disk.
    pub fn compile_current(&self) -> Result<BuildReport, String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let report = self.invoker.invoke(&self.paths)?;

        *self
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.status);
        Ok(report)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn last_status(&self) -> Option<CompileStatus> {
        *self.last_status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::classify::ClassifierMode;
    use crate::forge::invoker::testing::ScriptedCompiler;
    use crate::project::layout::ProjectLayout;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn attempt_overwrites_the_candidate_and_records_status() {
        let tmp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(&tmp.path().join("Proj"), "src", "test");
        let compiler = Arc::new(ScriptedCompiler::new(&[
            ("Error: bad", 1),
            ("Compiler run successful!", 0),
        ]));
        let invoker = BuildInvoker::new(
            compiler.clone(),
            layout.scratch_dir.clone(),
            ClassifierMode::Substring,
        );
        let ws = CandidateWorkspace::new(layout.candidate("Foo.sol"), invoker);

        assert!(ws.read_test().is_err());

        let first = ws.attempt("contract FooTest {").unwrap();
        assert_eq!(first.status, CompileStatus::Failed);

        let second = ws.attempt("contract FooTest {}").unwrap();
        assert_eq!(second.status, CompileStatus::Succeeded);

        assert_eq!(ws.read_test().unwrap(), "contract FooTest {}");
        assert_eq!(ws.attempts(), 2);
        assert_eq!(ws.last_status(), Some(CompileStatus::Succeeded));
        assert_eq!(compiler.call_count(), 2);
    }
}
