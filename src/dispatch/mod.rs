// This module runs compiled units. Before anything is loaded the unit's export table is
// checked for the candidate's construct and execute symbols, so a unit that does not expose
// the candidate is reported without mapping it. The image is then written to a private
// temporary file and loaded with libloading, and the generator is constructed and executed
// on a dedicated thread that owns the library. The calling thread waits for the outcome up
// to the invocation deadline. On timeout the sink is closed so late output is dropped, and
// the worker thread keeps its library mapped until it finishes, since code may still be
// running inside it. On completion the worker is joined before the library is closed so
// thread-local destructors registered by the unit have run.

//! Loading and invoking generator units.

pub mod sink;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hashbrown::HashSet;
use libloading::Library;

use crate::compiler::CompiledUnit;
use crate::core::artifact::ArtifactSink;
use crate::core::diagnostics::DIAGNOSTIC_ARTIFACT;
use crate::core::error::{InvocationError, InvocationResult, PanicReport};
use crate::runtime::marshal::MarshalledDeclarations;
use crate::runtime::selfgen_rt::{
    entry_symbol, ConstructEntry, ExecuteEntry, ReleaseEntry, CONSTRUCT_SYMBOL_PREFIX, EXECUTE_SYMBOL_PREFIX,
    RELEASE_SYMBOL_PREFIX, STATUS_OK, STATUS_PANICKED, STATUS_RETURNED_ERROR,
};
use crate::syntax::Candidate;

pub use sink::InvocationSink;

/// What a successful invocation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationReport {
    pub candidate: String,
    pub sources_added: usize,
    pub notes: Vec<String>,
    pub elapsed: Duration,
}

/// Exported entry point names for one candidate.
#[derive(Debug, Clone)]
struct EntryPoints {
    construct: String,
    execute: String,
    release: String,
}

impl EntryPoints {
    fn for_candidate(fully_qualified_name: &str) -> Self {
        Self {
            construct: entry_symbol(CONSTRUCT_SYMBOL_PREFIX, fully_qualified_name),
            execute: entry_symbol(EXECUTE_SYMBOL_PREFIX, fully_qualified_name),
            release: entry_symbol(RELEASE_SYMBOL_PREFIX, fully_qualified_name),
        }
    }
}

/// A unit image mapped into the process.
///
/// Field order matters: the library is closed before its file is removed.
struct LoadedUnit {
    library: Library,
    _file: tempfile::TempDir,
}

impl LoadedUnit {
    fn load(unit: &CompiledUnit) -> Result<Self, String> {
        let dir = tempfile::Builder::new()
            .prefix("selfgen-load-")
            .tempdir()
            .map_err(|err| format!("failed to create a load directory: {}", err))?;
        let path = image_path(dir.path());
        std::fs::write(&path, unit.image()).map_err(|err| format!("failed to write {}: {}", path.display(), err))?;

        // SAFETY: the image was produced by our own rustc invocation; its
        // initialisers are those of std and the unit's statics.
        let library = unsafe { Library::new(&path) }.map_err(|err| err.to_string())?;
        Ok(Self { library, _file: dir })
    }

    fn entry<T: Copy>(&self, symbol: &str) -> Option<T> {
        // SAFETY: `T` matches the signature the shim generated for `symbol`.
        unsafe { self.library.get::<T>(symbol.as_bytes()) }.ok().map(|entry| *entry)
    }
}

fn image_path(dir: &Path) -> PathBuf {
    dir.join(format!(
        "{}selfgen_unit{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    ))
}

/// Loads units and drives their generator through its lifecycle.
///
/// Generators may not add artifacts under a reserved name. The diagnostic
/// artifact is always reserved.
#[derive(Debug, Clone)]
pub struct InvocationDispatcher {
    timeout: Option<Duration>,
    reserved: Arc<HashSet<String>>,
}

impl Default for InvocationDispatcher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl InvocationDispatcher {
    /// A dispatcher whose invocations wait at most `timeout`; `None` waits indefinitely.
    pub fn new(timeout: Option<Duration>) -> Self {
        let mut reserved = HashSet::new();
        reserved.insert(DIAGNOSTIC_ARTIFACT.to_string());
        Self {
            timeout,
            reserved: Arc::new(reserved),
        }
    }

    /// Reserve one more artifact name for the pass itself.
    pub fn with_reserved_name(mut self, name: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.reserved).insert(name.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(name)
    }

    /// Construct the candidate's generator from `unit` and run it once over `declarations`.
    pub fn invoke(
        &self,
        unit: CompiledUnit,
        candidate: &Candidate,
        declarations: Arc<MarshalledDeclarations>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> InvocationResult<InvocationReport> {
        let type_name = candidate.fully_qualified_name().to_string();
        let entries = EntryPoints::for_candidate(&type_name);

        if !unit.has_export(&entries.construct) {
            return Err(InvocationError::TypeNotFound {
                type_name,
                symbol: entries.construct,
            });
        }
        if !unit.has_export(&entries.execute) {
            return Err(InvocationError::EntryPointNotFound {
                type_name,
                symbol: entries.execute,
            });
        }

        let loaded = LoadedUnit::load(&unit).map_err(|reason| InvocationError::Load {
            type_name: type_name.clone(),
            reason,
        })?;
        drop(unit);

        let sink = InvocationSink::new(type_name.clone(), artifacts, Arc::clone(&self.reserved));
        let started = Instant::now();
        let (sender, receiver) = mpsc::channel();

        let worker_sink = Arc::clone(&sink);
        let worker_type = type_name.clone();
        let worker = thread::Builder::new()
            .name(format!("selfgen-invoke-{}", type_name))
            .spawn(move || {
                let outcome = run_generator(&loaded, &entries, &worker_type, &worker_sink, &declarations);
                if let Err(mpsc::SendError((_, loaded))) = sender.send((outcome, loaded)) {
                    // The caller gave up on us; keep the code mapped.
                    std::mem::forget(loaded);
                }
            })
            .map_err(|err| InvocationError::Load {
                type_name: type_name.clone(),
                reason: format!("failed to spawn the invocation thread: {}", err),
            })?;

        let received = match self.timeout {
            Some(deadline) => receiver.recv_timeout(deadline),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok((outcome, loaded)) => {
                let _ = worker.join();
                drop(loaded);
                outcome?;
                let report = InvocationReport {
                    candidate: type_name,
                    sources_added: sink.sources_added(),
                    notes: sink.notes(),
                    elapsed: started.elapsed(),
                };
                log::debug!(
                    "{} added {} source(s) in {:.2?}",
                    report.candidate,
                    report.sources_added,
                    report.elapsed
                );
                Ok(report)
            }
            Err(RecvTimeoutError::Timeout) => {
                sink.close();
                log::warn!("{} is still running after {:?}; abandoning it", type_name, self.timeout);
                Err(InvocationError::TimedOut {
                    type_name,
                    deadline: self.timeout.unwrap_or_default(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                sink.close();
                Err(InvocationError::Runtime {
                    type_name,
                    report: PanicReport {
                        type_name: String::from("host"),
                        message: String::from("the invocation thread terminated without a result"),
                        ..PanicReport::default()
                    },
                })
            }
        }
    }
}

/// Construct, execute and release one generator. Runs on the invocation thread.
fn run_generator(
    loaded: &LoadedUnit,
    entries: &EntryPoints,
    type_name: &str,
    sink: &Arc<InvocationSink>,
    declarations: &MarshalledDeclarations,
) -> InvocationResult<()> {
    let construct = loaded
        .entry::<ConstructEntry>(&entries.construct)
        .ok_or_else(|| InvocationError::TypeNotFound {
            type_name: type_name.to_string(),
            symbol: entries.construct.clone(),
        })?;
    let execute = loaded
        .entry::<ExecuteEntry>(&entries.execute)
        .ok_or_else(|| InvocationError::EntryPointNotFound {
            type_name: type_name.to_string(),
            symbol: entries.execute.clone(),
        })?;
    let release = loaded.entry::<ReleaseEntry>(&entries.release);

    let raw = sink.raw();

    // SAFETY: `raw` and `sink` outlive the call; the entry was generated for `type_name`.
    let instance = unsafe { construct(&raw) };
    if instance.is_null() {
        let reason = sink
            .take_failure()
            .map(|report| report.to_string())
            .unwrap_or_else(|| String::from("the constructor returned no instance"));
        return Err(InvocationError::ConstructionFailed {
            type_name: type_name.to_string(),
            reason,
        });
    }

    // SAFETY: `instance` came from the matching construct entry and the
    // declaration arrays are kept alive by `declarations`.
    let status = unsafe { execute(instance, &raw, declarations.as_ptr(), declarations.len()) };

    match release {
        // SAFETY: `instance` is not used after this.
        Some(release) => unsafe { release(instance) },
        None => log::warn!("{} exports no release entry; leaking its instance", type_name),
    }

    let failure = sink.take_failure();
    match status {
        STATUS_OK => Ok(()),
        STATUS_RETURNED_ERROR => Err(InvocationError::Returned {
            type_name: type_name.to_string(),
            message: failure.map(|report| report.message).unwrap_or_default(),
        }),
        STATUS_PANICKED => Err(InvocationError::Runtime {
            type_name: type_name.to_string(),
            report: failure.unwrap_or_else(|| PanicReport {
                type_name: String::from("unknown"),
                message: String::from("panic without a report"),
                ..PanicReport::default()
            }),
        }),
        other => Err(InvocationError::ConstructionFailed {
            type_name: type_name.to_string(),
            reason: format!("the unit rejected its instance (status {})", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_point_names() {
        let entries = EntryPoints::for_candidate("crate::gen::Greeting");
        assert_eq!(entries.construct, "selfgen_construct__crate__gen__Greeting");
        assert_eq!(entries.execute, "selfgen_on_execute__crate__gen__Greeting");
        assert_eq!(entries.release, "selfgen_release__crate__gen__Greeting");
    }

    #[test]
    fn test_image_path_uses_platform_naming() {
        let path = image_path(Path::new("/tmp/x"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(std::env::consts::DLL_PREFIX));
        assert!(name.ends_with(std::env::consts::DLL_SUFFIX));
    }

    #[test]
    fn test_default_dispatcher_waits_indefinitely() {
        assert_eq!(InvocationDispatcher::default().timeout(), None);
        assert_eq!(
            InvocationDispatcher::new(Some(Duration::from_secs(1))).timeout(),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_diagnostic_artifact_is_always_reserved() {
        let dispatcher = InvocationDispatcher::default();
        assert!(dispatcher.is_reserved(DIAGNOSTIC_ARTIFACT));
        assert!(!dispatcher.is_reserved("selfgen_rt.rs"));

        let dispatcher = dispatcher.with_reserved_name("selfgen_rt.rs");
        assert!(dispatcher.is_reserved(DIAGNOSTIC_ARTIFACT));
        assert!(dispatcher.is_reserved("selfgen_rt.rs"));
    }
}
