// This module tracks per-pass statistics for selfgen generation passes. PassSession is
// shared by every candidate worker of one pass and records how far each candidate got
// (found, compiled, invoked, failed at compile or at invocation), how many artifacts were
// emitted, how many image bytes rustc produced and which candidate took longest to compile.
// Stats live behind a parking_lot mutex so rayon workers can record concurrently. PassStats
// is a plain snapshot with a Display impl used by the CLI and by log output at the end of
// each pass.

//! Generation pass statistics.
//!
//! One `PassSession` per pass; workers record into it concurrently and the
//! driver takes a `PassStats` snapshot when the pass is over.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Stage at which a candidate stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Compile,
    Invoke,
}

/// Shared statistics for one generation pass.
#[derive(Debug)]
pub struct PassSession {
    started: Instant,
    stats: Mutex<PassStats>,
}

impl PassSession {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            stats: Mutex::new(PassStats::default()),
        }
    }

    /// Record the declaration index size and the candidates found in it.
    pub fn record_index(&self, declarations: usize, candidates: usize) {
        let mut stats = self.stats.lock();
        stats.declarations_indexed = declarations;
        stats.candidates_found = candidates;
    }

    /// Record a successful compile.
    pub fn record_compiled(&self, candidate: &str, image_size: usize, elapsed: Duration) {
        let mut stats = self.stats.lock();
        stats.units_compiled += 1;
        stats.total_image_bytes += image_size;
        stats.total_compile_time += elapsed;

        if stats.slowest_compile < elapsed {
            stats.slowest_compile = elapsed;
            stats.slowest_candidate = candidate.to_string();
        }
    }

    /// Record a successful invocation.
    pub fn record_invoked(&self, artifacts: usize) {
        let mut stats = self.stats.lock();
        stats.units_invoked += 1;
        stats.artifacts_emitted += artifacts;
    }

    pub fn record_failure(&self, stage: FailureStage) {
        let mut stats = self.stats.lock();
        match stage {
            FailureStage::Compile => stats.compile_failures += 1,
            FailureStage::Invoke => stats.invocation_failures += 1,
        }
    }

    /// Record an artifact emitted by the driver itself (runtime module, diagnostics).
    pub fn record_artifact(&self) {
        self.stats.lock().artifacts_emitted += 1;
    }

    /// Snapshot the statistics, stamping the elapsed pass time.
    pub fn stats(&self) -> PassStats {
        let mut stats = self.stats.lock().clone();
        stats.elapsed = self.started.elapsed();
        stats
    }
}

impl Default for PassSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Generation pass statistics.
#[derive(Debug, Default, Clone)]
pub struct PassStats {
    /// Declarations in the index.
    pub declarations_indexed: usize,

    /// Candidates discovered.
    pub candidates_found: usize,

    /// Candidates that produced a unit.
    pub units_compiled: usize,

    /// Units whose entry point returned successfully.
    pub units_invoked: usize,

    pub compile_failures: usize,

    pub invocation_failures: usize,

    /// Artifacts added to the sink, including driver-emitted ones.
    pub artifacts_emitted: usize,

    /// Total size of all compiled images (bytes).
    pub total_image_bytes: usize,

    pub total_compile_time: Duration,

    /// Slowest single compile.
    pub slowest_compile: Duration,

    /// Candidate with the slowest compile.
    pub slowest_candidate: String,

    /// Wall time of the whole pass.
    pub elapsed: Duration,
}

impl PassStats {
    pub fn failures(&self) -> usize {
        self.compile_failures + self.invocation_failures
    }
}

impl fmt::Display for PassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Generation Pass Statistics:")?;
        writeln!(f, "  Declarations indexed: {}", self.declarations_indexed)?;
        writeln!(f, "  Candidates found: {}", self.candidates_found)?;
        writeln!(f, "  Units compiled: {}", self.units_compiled)?;
        writeln!(f, "  Units invoked: {}", self.units_invoked)?;
        writeln!(f, "  Compile failures: {}", self.compile_failures)?;
        writeln!(f, "  Invocation failures: {}", self.invocation_failures)?;
        writeln!(f, "  Artifacts emitted: {}", self.artifacts_emitted)?;
        writeln!(f, "  Total image size: {} bytes", self.total_image_bytes)?;

        if !self.slowest_candidate.is_empty() {
            writeln!(
                f,
                "  Slowest compile: {} ({:.2?})",
                self.slowest_candidate, self.slowest_compile
            )?;
        }

        writeln!(f, "  Elapsed: {:.2?}", self.elapsed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_session_creation() {
        let session = PassSession::new();
        let stats = session.stats();
        assert_eq!(stats.candidates_found, 0);
        assert_eq!(stats.units_compiled, 0);
        assert_eq!(stats.failures(), 0);
    }

    #[test]
    fn test_session_statistics() {
        let session = PassSession::new();

        session.record_index(40, 3);
        session.record_compiled("crate::A", 1000, Duration::from_millis(300));
        session.record_compiled("crate::B", 2000, Duration::from_millis(900));
        session.record_failure(FailureStage::Compile);
        session.record_invoked(2);
        session.record_failure(FailureStage::Invoke);
        session.record_artifact();

        let stats = session.stats();
        assert_eq!(stats.declarations_indexed, 40);
        assert_eq!(stats.candidates_found, 3);
        assert_eq!(stats.units_compiled, 2);
        assert_eq!(stats.total_image_bytes, 3000);
        assert_eq!(stats.slowest_candidate, "crate::B");
        assert_eq!(stats.units_invoked, 1);
        assert_eq!(stats.artifacts_emitted, 3);
        assert_eq!(stats.failures(), 2);
    }

    #[test]
    fn test_statistics_display() {
        let session = PassSession::new();
        session.record_index(10, 1);
        session.record_compiled("crate::gen::Greeting", 4096, Duration::from_millis(250));

        let output = format!("{}", session.stats());
        assert!(output.contains("Candidates found: 1"));
        assert!(output.contains("Units compiled: 1"));
        assert!(output.contains("crate::gen::Greeting"));
    }
}
