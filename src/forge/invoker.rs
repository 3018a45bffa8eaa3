// src/forge/invoker.rs
//
// Runs the compiler against exactly one candidate file and stores a
// color-free report. The working directory is passed to every invocation;
// the process-wide current directory is never touched.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::forge::classify::{classify, ClassifierMode};
use crate::project::layout::{is_preserved, CandidatePaths};
use crate::state::CompileStatus;

#[derive(Debug, Clone)]
pub struct CompilerOutput {
    /// stdout followed by stderr.
    pub text: String,
    /// None when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

pub trait Compiler: Send + Sync {
    fn compile(&self, target: &Path, workdir: &Path) -> Result<CompilerOutput, String>;
}

/// `forge compile --contracts <file>`
pub struct ForgeCompiler {
    binary: PathBuf,
}

impl ForgeCompiler {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn run(&self, args: &[&str], workdir: &Path) -> Result<CompilerOutput, String> {
        let out = Command::new(&self.binary)
            .args(args)
            .current_dir(workdir)
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.binary.display(), e))?;

        Ok(combine(out))
    }
}

impl Compiler for ForgeCompiler {
    fn compile(&self, target: &Path, workdir: &Path) -> Result<CompilerOutput, String> {
        let out = Command::new(&self.binary)
            .arg("compile")
            .arg("--contracts")
            .arg(target)
            .current_dir(workdir)
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.binary.display(), e))?;

        Ok(combine(out))
    }
}

fn combine(out: Output) -> CompilerOutput {
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    if !out.stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&String::from_utf8_lossy(&out.stderr));
    }

    CompilerOutput {
        text,
        exit_code: out.status.code(),
    }
}

/// Same filter as `sed -r 's/\x1B\[[0-9;]*[mK]//g'`.
pub fn strip_ansi(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\x1B\[[0-9;]*[mK]").unwrap());
    re.replace_all(s, "").into_owned()
}

/* ============================================================
   Build invoker
   ============================================================ */

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub path: PathBuf,
    pub text: String,
    pub exit_code: Option<i32>,
    pub status: CompileStatus,
}

#[derive(Clone)]
pub struct BuildInvoker {
    compiler: Arc<dyn Compiler>,
    workdir: PathBuf,
    classifier: ClassifierMode,
}

impl BuildInvoker {
    pub fn new(compiler: Arc<dyn Compiler>, workdir: PathBuf, classifier: ClassifierMode) -> Self {
        Self {
            compiler,
            workdir,
            classifier,
        }
    }

    /// Compiles `paths.test` and overwrites `paths.report`.
    ///
    /// The candidate must already exist. A failing compile is not an error
    /// here; only local failures (missing file, spawn or write errors) are.
    pub fn invoke(&self, paths: &CandidatePaths) -> Result<BuildReport, String> {
        if !paths.test.is_file() {
            return Err(format!("candidate file not found: {}", paths.test.display()));
        }
        if is_preserved(&paths.report) {
            return Err(format!(
                "report path {} is reserved; rename {}",
                paths.report.display(),
                paths.source.display()
            ));
        }

        let out = self.compiler.compile(&paths.test, &self.workdir)?;
        let text = strip_ansi(&out.text);

        if let Some(parent) = paths.report.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        fs::write(&paths.report, &text)
            .map_err(|e| format!("{}: {}", paths.report.display(), e))?;

        Ok(BuildReport {
            path: paths.report.clone(),
            status: classify(self.classifier, &text, out.exit_code),
            exit_code: out.exit_code,
            text,
        })
    }
}
