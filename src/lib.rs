//! selfgen - Self-hosting source generators for Rust crates.
//!
//! selfgen lets a crate define its own source generators. A type marked with
//! `#[generator]` that implements [`SourceGenerator`] is compiled on the fly
//! into a small `cdylib` together with the runtime support module, loaded into
//! the generation pass, and run once over the crate's declarations. Whatever it
//! adds becomes a generated artifact; whatever goes wrong becomes diagnostic
//! text in `Error.selfgen.g.rs`.
//!
//! # Primary Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use selfgen::{Engine, EngineConfig, GeneratedSources, HostCompilation, ParseOptions};
//!
//! let compilation = HostCompilation::from_dir("src".as_ref(), ParseOptions::default())?;
//! let engine = Engine::new(EngineConfig::from_env()?)?;
//!
//! let sink = Arc::new(GeneratedSources::new());
//! let report = engine.run(&compilation, sink.clone());
//! println!("{}", report.stats);
//! ```
//!
//! # Architecture
//!
//! - [`syntax`] - Source trees, declaration index and candidate discovery
//! - [`runtime`] - Runtime support module shared by host and units
//! - [`compiler`] - Compiling one candidate into a unit with rustc
//! - [`dispatch`] - Loading a unit and invoking its generator
//! - [`pass`] - The generation pass driver
//! - [`core`] - Errors, diagnostics, artifact sinks and pass statistics
//! - [`config`] - Engine and toolchain configuration

pub mod config;
pub mod core;
pub mod syntax;
pub mod runtime;
pub mod compiler;
pub mod dispatch;
pub mod pass;

pub use config::{EngineConfig, ToolchainConfig};
pub use self::core::{
    // Artifacts
    ArtifactSink, DirectorySink, GeneratedArtifact, GeneratedSources,
    // Diagnostics
    Diagnostic, DiagnosticLog, Location, Severity, DIAGNOSTIC_ARTIFACT,
    // Errors
    CompileError, ConfigError, InvocationError, PanicReport, SinkError, SourceError,
    // Statistics
    PassSession, PassStats,
};
pub use compiler::{CompiledUnit, DynamicCompiler, ReferenceSet};
pub use dispatch::{InvocationDispatcher, InvocationReport};
pub use pass::{Engine, PassReport};
pub use runtime::{MarshalledDeclarations, RuntimeModule, RUNTIME_SOURCE, RUNTIME_VERSION};
pub use runtime::selfgen_rt::{GeneratorContext, SourceGenerator};
pub use syntax::{Candidate, DeclarationIndex, DeclarationRecord, Edition, HostCompilation, ParseOptions, SourceTree};
