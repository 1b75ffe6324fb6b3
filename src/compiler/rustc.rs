//! Running rustc and reading its JSON diagnostics.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::core::diagnostics::{Diagnostic, Location, Severity};

/// Poll interval while waiting for rustc.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Exit status and stderr of a finished rustc run.
#[derive(Debug)]
pub struct RustcOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

/// Run `command` to completion, killing it once `deadline` elapses.
///
/// Returns `Ok(None)` when the deadline expired.
pub fn run_with_deadline(mut command: Command, deadline: Option<Duration>) -> io::Result<Option<RustcOutput>> {
    command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());
    log::trace!("spawning {:?}", command);
    let mut child = command.spawn()?;

    let mut stderr_pipe = child.stderr.take();
    let reader = thread::spawn(move || {
        let mut stderr = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut stderr);
        }
        String::from_utf8_lossy(&stderr).into_owned()
    });

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if deadline.is_some_and(|deadline| started.elapsed() >= deadline) {
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stderr = reader.join().unwrap_or_default();
    Ok(status.map(|status| RustcOutput { status, stderr }))
}

#[derive(Debug, Deserialize)]
struct RustcDiagnostic {
    message: String,
    code: Option<RustcCode>,
    level: String,
    #[serde(default)]
    spans: Vec<RustcSpan>,
}

#[derive(Debug, Deserialize)]
struct RustcCode {
    code: String,
}

#[derive(Debug, Deserialize)]
struct RustcSpan {
    file_name: String,
    line_start: u32,
    column_start: u32,
    is_primary: bool,
}

/// Maps file names in rustc output back to host display paths.
#[derive(Debug, Default)]
pub struct FileMap {
    entries: Vec<(PathBuf, String)>,
}

impl FileMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, written: impl Into<PathBuf>, display: impl Into<String>) {
        self.entries.push((written.into(), display.into()));
    }

    /// Host name of a file rustc reported, either as written or with the
    /// workspace prefix remapped away. The shortest written path wins.
    pub fn display(&self, file_name: &str) -> String {
        let reported = Path::new(file_name);
        self.entries
            .iter()
            .filter(|(written, _)| reported == written.as_path() || written.ends_with(reported))
            .min_by_key(|(written, _)| written.components().count())
            .map(|(_, display)| display.clone())
            .unwrap_or_else(|| file_name.to_string())
    }
}

/// Error-level diagnostics from rustc's `--error-format=json` stderr.
///
/// Warnings, notes and the trailing "aborting due to" summary are dropped.
/// Lines that are not JSON diagnostics are ignored.
pub fn parse_error_diagnostics(stderr: &str, candidate: &str, files: &FileMap) -> Vec<Diagnostic> {
    stderr
        .lines()
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| serde_json::from_str::<RustcDiagnostic>(line).ok())
        .filter(|diagnostic| diagnostic.level.starts_with("error"))
        .filter(|diagnostic| !diagnostic.message.starts_with("aborting due to"))
        .map(|diagnostic| {
            let mut converted = Diagnostic::new(candidate, Severity::Error, diagnostic.message);
            if let Some(code) = diagnostic.code {
                converted = converted.with_code(code.code);
            }
            let primary = diagnostic
                .spans
                .iter()
                .find(|span| span.is_primary)
                .or_else(|| diagnostic.spans.first());
            if let Some(span) = primary {
                converted = converted.with_location(Location {
                    file: files.display(&span.file_name),
                    line: span.line_start,
                    column: span.column_start,
                });
            }
            converted
        })
        .collect()
}

/// Non-JSON stderr lines, for failures that produced no diagnostic.
pub fn plain_stderr(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| !line.starts_with('{'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STDERR: &str = r#"{"$message_type":"diagnostic","message":"unused variable: `y`","code":{"code":"unused_variables","explanation":null},"level":"warning","spans":[],"children":[],"rendered":"warning"}
{"$message_type":"diagnostic","message":"cannot find value `x` in this scope","code":{"code":"E0425","explanation":"..."},"level":"error","spans":[{"file_name":"/tmp/selfgen-unit-1/src/gen/broken.rs","byte_start":10,"byte_end":11,"line_start":9,"line_end":9,"column_start":13,"column_end":14,"is_primary":true,"text":[],"label":null,"suggested_replacement":null,"suggestion_applicability":null,"expansion":null}],"children":[],"rendered":"error"}
{"$message_type":"diagnostic","message":"aborting due to 1 previous error","code":null,"level":"error","spans":[],"children":[],"rendered":"error: aborting"}
error: linker output that is not json
"#;

    #[test]
    fn test_only_errors_are_kept() {
        let mut files = FileMap::new();
        files.insert("/tmp/selfgen-unit-1/src/gen/broken.rs", "gen/broken.rs");

        let diagnostics = parse_error_diagnostics(STDERR, "crate::gen::Broken", &files);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].candidate, "crate::gen::Broken");
        assert_eq!(
            diagnostics[0].to_string(),
            "E0425 cannot find value `x` in this scope (gen/broken.rs:9:13)"
        );
    }

    #[test]
    fn test_plain_stderr() {
        assert_eq!(plain_stderr(STDERR), "error: linker output that is not json");
    }

    #[test]
    fn test_remapped_names_resolve_to_their_own_file() {
        let mut files = FileMap::new();
        files.insert("/tmp/selfgen-unit-1/selfgen_rt.rs", "selfgen_rt.rs");
        files.insert("/tmp/selfgen-unit-1/src/gen/lib.rs", "gen/lib.rs");
        files.insert("/tmp/selfgen-unit-1/lib.rs", "<selfgen unit root>");

        assert_eq!(files.display("lib.rs"), "<selfgen unit root>");
        assert_eq!(files.display("gen/lib.rs"), "gen/lib.rs");
        assert_eq!(files.display("selfgen_rt.rs"), "selfgen_rt.rs");
    }

    #[test]
    fn test_unknown_files_keep_their_name() {
        let files = FileMap::new();
        assert_eq!(files.display("/rustc/library/core/src/lib.rs"), "/rustc/library/core/src/lib.rs");
    }

    #[cfg(unix)]
    #[test]
    fn test_deadline_kills_process() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let started = Instant::now();
        let output = run_with_deadline(command, Some(Duration::from_millis(100))).unwrap();
        assert!(output.is_none());
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
