// This module defines the error types for selfgen using the thiserror crate for idiomatic
// Rust error handling. Each pipeline stage has its own enum: ConfigError for toolchain
// discovery, CompileError for building a generator unit (configuration mismatches, blocking
// rustc diagnostics, toolchain failures, deadlines), InvocationError for loading and running
// a unit (missing entry symbols, construction failures, panics, returned errors, deadlines),
// SinkError for artifact sinks and SourceError for reading host sources. Compile and
// invocation errors never abort a generation pass: they convert into tagged Diagnostic
// values that the pass records in its DiagnosticLog. Result aliases are provided for the
// common cases.

//! Error types for selfgen.
//!
//! Using thiserror for more idiomatic error handling.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::diagnostics::{Diagnostic, Severity};

/// Toolchain discovery and engine configuration failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to run rustc at {}: {source}", .path.display())]
    RustcUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not understand rustc output: {reason}")]
    RustcOutput {
        reason: String,
    },

    #[error("selfgen-macros library not found (searched {searched:?}); set SELFGEN_MACROS_LIB or --macros-lib")]
    MacrosLibraryNotFound {
        searched: Vec<PathBuf>,
    },

    #[error("Invalid configuration: {reason}")]
    Invalid {
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure to turn one candidate into a loadable unit.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Configuration error for {candidate}: {reason}")]
    Configuration {
        candidate: String,
        reason: String,
    },

    #[error("{candidate} failed to compile with {} error(s)", .diagnostics.len())]
    Diagnostics {
        candidate: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("Toolchain failure while compiling {candidate}: {reason}")]
    Toolchain {
        candidate: String,
        reason: String,
    },

    #[error("Compiling {candidate} exceeded the {deadline:?} deadline")]
    TimedOut {
        candidate: String,
        deadline: Duration,
    },

    #[error("I/O error while compiling {candidate}: {source}")]
    Io {
        candidate: String,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    pub fn candidate(&self) -> &str {
        match self {
            CompileError::Configuration { candidate, .. }
            | CompileError::Diagnostics { candidate, .. }
            | CompileError::Toolchain { candidate, .. }
            | CompileError::TimedOut { candidate, .. }
            | CompileError::Io { candidate, .. } => candidate,
        }
    }

    /// Convert into the diagnostics recorded for this candidate.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        match self {
            CompileError::Diagnostics { diagnostics, .. } => diagnostics,
            CompileError::Configuration { ref candidate, .. } => {
                vec![Diagnostic::new(candidate.clone(), Severity::Error, self.to_string()).with_code("SG0001")]
            }
            CompileError::Toolchain { ref candidate, .. } => {
                vec![Diagnostic::new(candidate.clone(), Severity::Error, self.to_string()).with_code("SG0002")]
            }
            CompileError::TimedOut { ref candidate, .. } => {
                vec![Diagnostic::new(candidate.clone(), Severity::Error, self.to_string()).with_code("SG0003")]
            }
            CompileError::Io { ref candidate, .. } => {
                vec![Diagnostic::new(candidate.clone(), Severity::Error, self.to_string()).with_code("SG0004")]
            }
        }
    }
}

/// Details of a panic raised inside a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanicReport {
    pub type_name: String,
    pub message: String,
    pub location: String,
    pub backtrace: String,
}

impl std::fmt::Display for PanicReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.type_name, self.message)?;
        if !self.location.is_empty() {
            write!(f, " at {}", self.location)?;
        }
        Ok(())
    }
}

/// Failure to load or run a compiled unit.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("Failed to load unit for {type_name}: {reason}")]
    Load {
        type_name: String,
        reason: String,
    },

    #[error("Type {type_name} not found in its compiled unit (missing {symbol})")]
    TypeNotFound {
        type_name: String,
        symbol: String,
    },

    #[error("Entry point {symbol} not found for {type_name}")]
    EntryPointNotFound {
        type_name: String,
        symbol: String,
    },

    #[error("Constructing {type_name} failed: {reason}")]
    ConstructionFailed {
        type_name: String,
        reason: String,
    },

    #[error("{type_name} panicked: {report}")]
    Runtime {
        type_name: String,
        report: PanicReport,
    },

    #[error("{type_name} returned an error: {message}")]
    Returned {
        type_name: String,
        message: String,
    },

    #[error("{type_name} did not finish within {deadline:?}")]
    TimedOut {
        type_name: String,
        deadline: Duration,
    },
}

impl InvocationError {
    pub fn type_name(&self) -> &str {
        match self {
            InvocationError::Load { type_name, .. }
            | InvocationError::TypeNotFound { type_name, .. }
            | InvocationError::EntryPointNotFound { type_name, .. }
            | InvocationError::ConstructionFailed { type_name, .. }
            | InvocationError::Runtime { type_name, .. }
            | InvocationError::Returned { type_name, .. }
            | InvocationError::TimedOut { type_name, .. } => type_name,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            InvocationError::Load { .. } => "SG0101",
            InvocationError::TypeNotFound { .. } => "SG0102",
            InvocationError::EntryPointNotFound { .. } => "SG0103",
            InvocationError::ConstructionFailed { .. } => "SG0104",
            InvocationError::Runtime { .. } => "SG0105",
            InvocationError::Returned { .. } => "SG0106",
            InvocationError::TimedOut { .. } => "SG0107",
        }
    }

    /// Convert into the single diagnostic recorded for this candidate.
    ///
    /// Runtime failures keep the captured backtrace in the message.
    pub fn into_diagnostic(self) -> Diagnostic {
        let code = self.code();
        let candidate = self.type_name().to_string();
        let message = match &self {
            InvocationError::Runtime { report, .. } if !report.backtrace.is_empty() => {
                format!("{}\n{}", self, report.backtrace.trim_end())
            }
            _ => self.to_string(),
        };
        Diagnostic::new(candidate, Severity::Error, message).with_code(code)
    }
}

/// Artifact sink failures.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Generated source {name} was already added in this pass")]
    Duplicate {
        name: String,
    },

    #[error("Invalid generated source name {name:?}")]
    InvalidName {
        name: String,
    },

    #[error("Failed to write generated source {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Reading host sources from disk.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not under the source root {}", .path.display(), .root.display())]
    OutsideRoot {
        path: PathBuf,
        root: PathBuf,
    },
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

/// Result type alias for invocation operations.
pub type InvocationResult<T> = Result<T, InvocationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_diagnostics_pass_through() {
        let diagnostic = Diagnostic::new("crate::a::B", Severity::Error, "cannot find value `x`").with_code("E0425");
        let error = CompileError::Diagnostics {
            candidate: "crate::a::B".to_string(),
            diagnostics: vec![diagnostic.clone()],
        };
        assert_eq!(error.candidate(), "crate::a::B");
        assert_eq!(error.into_diagnostics(), vec![diagnostic]);
    }

    #[test]
    fn test_configuration_error_becomes_diagnostic() {
        let error = CompileError::Configuration {
            candidate: "crate::Gen".to_string(),
            reason: "edition mismatch".to_string(),
        };
        let diagnostics = error.into_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].candidate, "crate::Gen");
        assert!(diagnostics[0].message.contains("edition mismatch"));
    }

    #[test]
    fn test_runtime_error_keeps_backtrace() {
        let error = InvocationError::Runtime {
            type_name: "crate::Gen".to_string(),
            report: PanicReport {
                type_name: "&str".to_string(),
                message: "boom".to_string(),
                location: "src/gen.rs:4:9".to_string(),
                backtrace: "   0: gen::run\n".to_string(),
            },
        };
        let diagnostic = error.into_diagnostic();
        assert_eq!(diagnostic.code.as_deref(), Some("SG0105"));
        assert!(diagnostic.message.contains("boom"));
        assert!(diagnostic.message.contains("src/gen.rs:4:9"));
        assert!(diagnostic.message.contains("gen::run"));
    }
}
