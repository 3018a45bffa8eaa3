use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;

use crate::state::{LogLevel, LogLine, MAX_LOGS};

/// Shared run log.
///
/// Every worker gets a clone (optionally scoped to one candidate). Lines go to a
/// bounded ring buffer and, when echo is on, to stderr as they arrive.
#[derive(Clone)]
pub struct Logger {
    lines: Arc<Mutex<VecDeque<LogLine>>>,
    scope: Option<String>,
    echo: bool,
}

impl Logger {
    pub fn new(echo: bool) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            scope: None,
            echo,
        }
    }

    /// Same buffer, lines tagged with `scope`.
    pub fn scoped(&self, scope: impl Into<String>) -> Self {
        Self {
            lines: Arc::clone(&self.lines),
            scope: Some(scope.into()),
            echo: self.echo,
        }
    }

    pub fn log(&self, level: LogLevel, msg: impl Into<String>) {
        let line = LogLine {
            level,
            scope: self.scope.clone(),
            text: msg.into(),
            at: Local::now(),
        };

        if self.echo {
            eprintln!("{}", render(&line));
        }

        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() >= MAX_LOGS {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.log(LogLevel::Info, msg);
    }

    pub fn success(&self, msg: impl Into<String>) {
        self.log(LogLevel::Success, msg);
    }

    pub fn warn(&self, msg: impl Into<String>) {
        self.log(LogLevel::Warn, msg);
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.log(LogLevel::Error, msg);
    }

    /// Last `n` lines, rendered.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).map(render).collect()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|l| l.level == level)
            .count()
    }
}

fn render(line: &LogLine) -> String {
    let tag = match line.level {
        LogLevel::Info => "INFO ",
        LogLevel::Success => "OK   ",
        LogLevel::Warn => "WARN ",
        LogLevel::Error => "ERROR",
    };

    match &line.scope {
        Some(scope) => format!("[{}] {} {}: {}", line.at.format("%H:%M:%S"), tag, scope, line.text),
        None => format!("[{}] {} {}", line.at.format("%H:%M:%S"), tag, line.text),
    }
}
