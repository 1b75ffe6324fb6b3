// The generation pass driver. One call to Engine::run indexes the host compilation (with the
// runtime module mounted), marshals the declarations once, and then compiles and invokes
// every candidate in parallel on rayon, optionally on a dedicated pool. Each candidate is
// independent: a compile or invocation failure becomes an entry in the pass's DiagnosticLog
// and never affects the others. Generators cannot write the artifacts the pass emits itself.
// After all candidates finished, the log is flushed into the diagnostic artifact, which is
// emitted even when empty. The pass itself cannot fail; its PassReport carries the
// statistics, the diagnostic text and the candidates it saw.

//! Generation pass driver.

use std::sync::Arc;

use rayon::prelude::*;

use crate::compiler::{DynamicCompiler, ReferenceSet};
use crate::config::EngineConfig;
use crate::core::artifact::ArtifactSink;
use crate::core::diagnostics::{render_diagnostic_artifact, DiagnosticLog, DIAGNOSTIC_ARTIFACT};
use crate::core::error::ConfigError;
use crate::core::session::{FailureStage, PassSession, PassStats};
use crate::dispatch::InvocationDispatcher;
use crate::runtime::{MarshalledDeclarations, RuntimeModule};
use crate::syntax::{Candidate, DeclarationIndex, HostCompilation};

/// Outcome of one generation pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub stats: PassStats,
    /// Flushed diagnostic text; empty when every candidate succeeded.
    pub diagnostics: String,
    /// Fully qualified names of the candidates processed.
    pub candidates: Vec<String>,
}

impl PassReport {
    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Shared state of one running pass.
struct PassState<'a> {
    declarations: Arc<MarshalledDeclarations>,
    sink: &'a Arc<dyn ArtifactSink>,
    log: DiagnosticLog,
    session: PassSession,
}

/// Runs generation passes with a fixed configuration and toolchain.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    runtime: RuntimeModule,
    compiler: DynamicCompiler,
    dispatcher: InvocationDispatcher,
    pool: Option<rayon::ThreadPool>,
}

impl Engine {
    /// Discover the toolchain and build an engine.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let references = Arc::new(ReferenceSet::discover(&config.toolchain)?);
        Self::with_references(references, config)
    }

    /// Build an engine around an already discovered reference set.
    pub fn with_references(references: Arc<ReferenceSet>, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let runtime = config.runtime();
        let compiler = DynamicCompiler::new(references, runtime.clone())
            .with_timeout(config.compile_timeout)
            .with_flags(config.rustc_flags.clone());
        let mut dispatcher = InvocationDispatcher::new(config.invoke_timeout);
        if config.emit_runtime_module {
            dispatcher = dispatcher.with_reserved_name(runtime.file_name());
        }

        let pool = match config.threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|index| format!("selfgen-pass-{}", index))
                    .build()
                    .map_err(|err| ConfigError::Invalid {
                        reason: format!("failed to start {} worker threads: {}", threads, err),
                    })?,
            ),
            None => None,
        };

        Ok(Self {
            config,
            runtime,
            compiler,
            dispatcher,
            pool,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeModule {
        &self.runtime
    }

    pub fn compiler(&self) -> &DynamicCompiler {
        &self.compiler
    }

    pub fn dispatcher(&self) -> &InvocationDispatcher {
        &self.dispatcher
    }

    /// The declaration index a pass over `compilation` would see.
    pub fn index(&self, compilation: &HostCompilation) -> DeclarationIndex {
        DeclarationIndex::build(&compilation.with_runtime(&self.runtime), &self.runtime)
    }

    /// Run one generation pass, writing every artifact to `sink`.
    pub fn run(&self, compilation: &HostCompilation, sink: Arc<dyn ArtifactSink>) -> PassReport {
        let session = PassSession::new();
        let index = self.index(compilation);
        session.record_index(index.all().len(), index.candidates().len());
        log::info!(
            "generation pass over {} file(s): {} declaration(s), {} candidate(s)",
            compilation.trees().len(),
            index.all().len(),
            index.candidates().len()
        );

        let state = PassState {
            declarations: Arc::new(MarshalledDeclarations::new(index.all())),
            sink: &sink,
            log: DiagnosticLog::new(),
            session,
        };

        if self.config.emit_runtime_module {
            self.emit(&state, &self.runtime.file_name(), self.runtime.source().to_string());
        }

        let candidates = index.candidates();
        match &self.pool {
            Some(pool) => pool.install(|| {
                candidates
                    .par_iter()
                    .for_each(|candidate| self.process(candidate, &state))
            }),
            None => candidates
                .par_iter()
                .for_each(|candidate| self.process(candidate, &state)),
        }

        let PassState {
            log: diagnostic_log,
            session,
            ..
        } = state;
        let failed = diagnostic_log.entry_count();
        let diagnostics = diagnostic_log.flush();
        let artifact = render_diagnostic_artifact(&diagnostics);
        match sink.add_source(DIAGNOSTIC_ARTIFACT, artifact) {
            Ok(()) => session.record_artifact(),
            Err(err) => log::warn!("could not emit {}: {}", DIAGNOSTIC_ARTIFACT, err),
        }

        let stats = session.stats();
        log::info!(
            "generation pass finished in {:.2?}: {} candidate(s), {} with diagnostics",
            stats.elapsed,
            candidates.len(),
            failed
        );
        log::debug!("{}", stats);

        PassReport {
            stats,
            diagnostics,
            candidates: candidates
                .iter()
                .map(|candidate| candidate.fully_qualified_name().to_string())
                .collect(),
        }
    }

    /// Compile and invoke one candidate, recording any failure.
    fn process(&self, candidate: &Candidate, state: &PassState<'_>) {
        let name = candidate.fully_qualified_name();

        let unit = match self.compiler.compile(candidate) {
            Ok(unit) => unit,
            Err(err) => {
                log::debug!("{}", err);
                state.session.record_failure(FailureStage::Compile);
                state.log.record(name, &err.into_diagnostics());
                return;
            }
        };
        state.session.record_compiled(name, unit.size(), unit.compile_time());

        match self
            .dispatcher
            .invoke(unit, candidate, Arc::clone(&state.declarations), Arc::clone(state.sink))
        {
            Ok(report) => {
                state.session.record_invoked(report.sources_added);
            }
            Err(err) => {
                log::debug!("{}", err);
                state.session.record_failure(FailureStage::Invoke);
                state.log.record(name, &[err.into_diagnostic()]);
            }
        }
    }

    fn emit(&self, state: &PassState<'_>, name: &str, text: String) {
        match state.sink.add_source(name, text) {
            Ok(()) => state.session.record_artifact(),
            Err(err) => log::warn!("could not emit {}: {}", name, err),
        }
    }
}
