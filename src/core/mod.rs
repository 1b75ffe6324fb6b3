// This module is the shared infrastructure of selfgen that every pipeline stage relies on.
// It exports the error enums of each stage (configuration, compile, invocation, sink and
// source errors) and their Result aliases, the Diagnostic value type and the per-pass
// DiagnosticLog that collects every failure as text, the artifact sink abstraction with
// its in-memory and directory implementations, and the per-pass statistics session. None
// of these types know about syn, rustc or dynamic loading, which keeps them usable from
// the index, the compiler, the dispatcher and the CLI alike.

//! Core selfgen infrastructure
//!
//! # Key Components
//!
//! ## Errors (`error`)
//! - One `thiserror` enum per pipeline stage
//! - Conversion of compile and invocation failures into diagnostics
//!
//! ## Diagnostics (`diagnostics`)
//! - Candidate-tagged diagnostics
//! - The per-pass log and the diagnostic artifact
//!
//! ## Artifacts (`artifact`)
//! - The `ArtifactSink` trait and its in-memory and directory sinks
//!
//! ## Session Management (`session`)
//! - Pass statistics recorded concurrently by candidate workers

pub mod artifact;
pub mod diagnostics;
pub mod error;
pub mod session;

pub use artifact::{validate_artifact_name, ArtifactSink, DirectorySink, GeneratedArtifact, GeneratedSources};

pub use diagnostics::{
    render_diagnostic_artifact,
    Diagnostic,
    DiagnosticLog,
    Location,
    Severity,
    DIAGNOSTIC_ARTIFACT,
};

pub use error::{
    CompileError,
    CompileResult,
    ConfigError,
    InvocationError,
    InvocationResult,
    PanicReport,
    SinkError,
    SourceError,
};

pub use session::{FailureStage, PassSession, PassStats};
