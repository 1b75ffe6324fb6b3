// This module turns one candidate into a loadable unit. A unit is built from exactly two
// source fragments, the candidate's tree text (unmodified, at its original module path) and
// the runtime support module, joined by a generated crate root that exports the entry points
// for the candidate's fully qualified name. rustc compiles them as a cdylib in a private
// temporary workspace that is removed before compile returns; the image is read into memory
// together with its export table, which the dispatcher checks before loading anything. The
// compile is bounded by a deadline. Workspace prefixes are remapped away, so panic locations
// and backtraces from a running unit name files relative to the host's source root.
// Failures come back as CompileError values carrying rustc's error-level diagnostics mapped
// to host file paths; errors inside the generated root are restated in terms of the
// candidate, and warnings are dropped. Compiles share nothing but the read-only ReferenceSet
// and can run concurrently.

//! Dynamic compilation of generator units.

pub mod references;
pub mod rustc;
pub mod shim;

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use object::{BinaryFormat, Object};

use crate::core::diagnostics::{Diagnostic, Severity};
use crate::core::error::{CompileError, CompileResult};
use crate::runtime::RuntimeModule;
use crate::syntax::Candidate;

pub use references::{ReferenceSet, RustcVersion};
use rustc::FileMap;

/// Display name of a generated unit root in diagnostics.
const UNIT_ROOT: &str = "<selfgen unit root>";

/// An in-memory `cdylib` image for one candidate.
///
/// Only [`DynamicCompiler::compile`] creates these, after a successful rustc run.
#[derive(Debug)]
pub struct CompiledUnit {
    candidate: String,
    image: Vec<u8>,
    exports: Vec<String>,
    compile_time: Duration,
}

impl CompiledUnit {
    /// Fully qualified name of the candidate the unit was built for.
    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn size(&self) -> usize {
        self.image.len()
    }

    /// Exported symbol names, sorted.
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.exports.binary_search_by(|export| export.as_str().cmp(name)).is_ok()
    }

    pub fn compile_time(&self) -> Duration {
        self.compile_time
    }
}

/// Exported symbol names of an image, platform prefixes removed.
pub fn read_exports(image: &[u8]) -> Result<Vec<String>, object::Error> {
    let file = object::File::parse(image)?;
    let strip_underscore = file.format() == BinaryFormat::MachO;
    let mut names: Vec<String> = file
        .exports()?
        .iter()
        .map(|export| {
            let name = String::from_utf8_lossy(export.name());
            match name.strip_prefix('_') {
                Some(stripped) if strip_underscore => stripped.to_string(),
                _ => name.into_owned(),
            }
        })
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

/// Compiles candidates against a fixed reference set.
#[derive(Debug, Clone)]
pub struct DynamicCompiler {
    references: Arc<ReferenceSet>,
    runtime: RuntimeModule,
    timeout: Option<Duration>,
    flags: Vec<String>,
}

impl DynamicCompiler {
    pub fn new(references: Arc<ReferenceSet>, runtime: RuntimeModule) -> Self {
        Self {
            references,
            runtime,
            timeout: None,
            flags: Vec::new(),
        }
    }

    /// Bound every rustc run by `timeout`; `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra rustc flags, e.g. `-D warnings`.
    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn references(&self) -> &Arc<ReferenceSet> {
        &self.references
    }

    pub fn runtime(&self) -> &RuntimeModule {
        &self.runtime
    }

    /// Compile one candidate plus the runtime module into a unit.
    pub fn compile(&self, candidate: &Candidate) -> CompileResult<CompiledUnit> {
        let name = candidate.fully_qualified_name().to_string();
        let tree = candidate.tree();
        let started = Instant::now();

        let options = tree.options();
        if options != self.runtime.options() {
            return Err(CompileError::Configuration {
                candidate: name,
                reason: format!(
                    "{} was parsed as edition {} but the runtime module uses edition {}",
                    tree.path(),
                    options.edition,
                    self.runtime.options().edition
                ),
            });
        }
        self.references
            .check_edition(options.edition)
            .map_err(|reason| CompileError::Configuration {
                candidate: name.clone(),
                reason,
            })?;

        let io_error = |source| CompileError::Io {
            candidate: name.clone(),
            source,
        };

        let workspace = tempfile::Builder::new()
            .prefix("selfgen-unit-")
            .tempdir()
            .map_err(io_error)?;
        let dir = workspace.path();

        let runtime_file = dir.join(self.runtime.file_name());
        fs::write(&runtime_file, self.runtime.source()).map_err(io_error)?;

        let mut files = FileMap::new();
        files.insert(&runtime_file, self.runtime.file_name());

        let root_file = dir.join("lib.rs");
        let root = if tree.is_crate_root() {
            shim::crate_root_unit(
                &name,
                tree.text(),
                self.runtime.module_name(),
                &runtime_file,
                options.edition,
            )
        } else {
            let candidate_file = dir.join("src").join(workspace_relative(tree.path()));
            if let Some(parent) = candidate_file.parent() {
                fs::create_dir_all(parent).map_err(io_error)?;
            }
            fs::write(&candidate_file, tree.text()).map_err(io_error)?;
            files.insert(&candidate_file, tree.path());
            shim::unit_root(
                &name,
                tree.module_path(),
                &candidate_file,
                self.runtime.module_name(),
                &runtime_file,
                options.edition,
            )
        };
        fs::write(&root_file, root).map_err(io_error)?;
        let (root_display, first_generated_line) = if tree.is_crate_root() {
            (tree.path(), tree.text().lines().count() + 1)
        } else {
            (UNIT_ROOT, 1)
        };
        files.insert(&root_file, root_display);

        let output_file = dir.join(format!(
            "{}selfgen_unit{}",
            std::env::consts::DLL_PREFIX,
            std::env::consts::DLL_SUFFIX
        ));

        let mut command = self.references.command();
        command
            .current_dir(dir)
            .arg("--edition")
            .arg(options.edition.as_str())
            .args(["--crate-type", "cdylib", "--crate-name", "selfgen_unit"])
            .arg("--error-format=json")
            .args(["-C", "opt-level=0", "-C", "panic=unwind"])
            .args(self.references.library_args())
            .args(&self.flags)
            .arg(remap_path_prefix(dir))
            .arg(remap_path_prefix(&dir.join("src")))
            .arg("-o")
            .arg(&output_file)
            .arg(&root_file);

        log::debug!("compiling {} in {}", name, dir.display());
        let output = rustc::run_with_deadline(command, self.timeout)
            .map_err(|err| CompileError::Toolchain {
                candidate: name.clone(),
                reason: format!("failed to run {}: {}", self.references.rustc().display(), err),
            })?
            .ok_or_else(|| CompileError::TimedOut {
                candidate: name.clone(),
                deadline: self.timeout.unwrap_or_default(),
            })?;

        let diagnostics = explain_generated_code(
            rustc::parse_error_diagnostics(&output.stderr, &name, &files),
            &name,
            root_display,
            first_generated_line,
        );
        if !diagnostics.is_empty() {
            log::debug!("{} failed to compile with {} error(s)", name, diagnostics.len());
            return Err(CompileError::Diagnostics {
                candidate: name,
                diagnostics,
            });
        }
        if !output.status.success() {
            let stderr = rustc::plain_stderr(&output.stderr);
            return Err(CompileError::Diagnostics {
                diagnostics: vec![Diagnostic::new(
                    name.clone(),
                    Severity::Error,
                    format!("rustc exited with {} without reporting an error: {}", output.status, stderr),
                )
                .with_code("SG0002")],
                candidate: name,
            });
        }

        let image = fs::read(&output_file).map_err(|err| CompileError::Toolchain {
            candidate: name.clone(),
            reason: format!("rustc produced no image at {}: {}", output_file.display(), err),
        })?;
        let exports = read_exports(&image).map_err(|err| CompileError::Toolchain {
            candidate: name.clone(),
            reason: format!("unreadable image: {}", err),
        })?;

        if let Err(err) = workspace.close() {
            log::warn!("failed to remove the workspace of {}: {}", name, err);
        }

        let compile_time = started.elapsed();
        log::debug!(
            "compiled {} into {} bytes with {} exports in {:.2?}",
            name,
            image.len(),
            exports.len(),
            compile_time
        );

        Ok(CompiledUnit {
            candidate: name,
            image,
            exports,
            compile_time,
        })
    }
}

/// `--remap-path-prefix=<from>=`, stripping `from` from every recorded path.
fn remap_path_prefix(from: &Path) -> OsString {
    let mut arg = OsString::from("--remap-path-prefix=");
    arg.push(from);
    arg.push("=");
    arg
}

/// Restate errors located in generated code in terms of the candidate.
///
/// The only requirement the generated entry points add is `Default`.
fn explain_generated_code(
    diagnostics: Vec<Diagnostic>,
    candidate: &str,
    root: &str,
    first_generated_line: usize,
) -> Vec<Diagnostic> {
    diagnostics
        .into_iter()
        .map(|mut diagnostic| {
            let generated = diagnostic
                .location
                .as_ref()
                .is_some_and(|location| location.file == root && location.line as usize >= first_generated_line);
            if generated {
                if diagnostic.message.contains("Default") {
                    diagnostic.message = format!(
                        "{} has no zero-argument construction path: generator types must implement `Default`",
                        candidate
                    );
                }
                diagnostic.location = None;
            }
            diagnostic
        })
        .collect()
}

/// A tree path made relative and free of `..`, for placement under the workspace.
fn workspace_relative(path: &str) -> PathBuf {
    let relative: PathBuf = Path::new(path)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if relative.as_os_str().is_empty() {
        PathBuf::from("candidate.rs")
    } else {
        relative
    }
}
