//! Diagnostics and the per-pass diagnostic log.
//!
//! Every failure of a candidate ends up here as text. The log is a single
//! string buffer: entries are appended whole under one lock, and the buffer
//! is flushed exactly once, when the pass is over, into the diagnostic
//! artifact.

use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;

/// Name of the artifact that carries the flushed diagnostic text.
pub const DIAGNOSTIC_ARTIFACT: &str = "Error.selfgen.g.rs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Position in a host source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One diagnostic, tagged with the candidate that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub candidate: String,
    pub severity: Severity,
    pub code: Option<String>,
    pub message: String,
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn new(candidate: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            severity,
            code: None,
            message: message.into(),
            location: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} {}", code, self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        if let Some(location) = &self.location {
            write!(f, " ({})", location)?;
        }
        Ok(())
    }
}

/// Append-only diagnostic text for one pass.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    buffer: Mutex<String>,
    entries: Mutex<usize>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the diagnostics of one candidate as a single entry.
    ///
    /// Does nothing for an empty slice.
    pub fn record(&self, candidate: &str, diagnostics: &[Diagnostic]) {
        if diagnostics.is_empty() {
            return;
        }

        let mut entry = format!("Error From {}\n", candidate);
        for diagnostic in diagnostics {
            entry.push_str(&diagnostic.to_string());
            entry.push('\n');
        }

        let mut buffer = self.buffer.lock();
        buffer.push_str(&entry);
        *self.entries.lock() += 1;
    }

    /// Number of entries recorded so far.
    pub fn entry_count(&self) -> usize {
        *self.entries.lock()
    }

    /// Take the accumulated text. Consumes the log: one flush per pass.
    pub fn flush(self) -> String {
        self.buffer.into_inner()
    }
}

/// Render flushed diagnostic text as the body of the diagnostic artifact.
pub fn render_diagnostic_artifact(text: &str) -> String {
    format!("/*\n{}\n*/", text.replace("*/", "* /"))
}
