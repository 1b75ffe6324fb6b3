//! Generated artifacts and the sinks that receive them.

use std::fs;
use std::path::{Path, PathBuf};

use hashbrown::HashSet;
use parking_lot::Mutex;

use super::error::SinkError;

/// A generated source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub name: String,
    pub text: String,
}

/// Named-text append interface for generated sources.
///
/// Implementations must be safe to call from several generator invocations
/// at once. Names are unique per pass; a second `add_source` with a taken
/// name fails with [`SinkError::Duplicate`].
pub trait ArtifactSink: Send + Sync {
    fn add_source(&self, name: &str, text: String) -> Result<(), SinkError>;
}

/// Artifact names are plain file names.
pub fn validate_artifact_name(name: &str) -> Result<(), SinkError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.chars().any(char::is_control);
    if invalid {
        Err(SinkError::InvalidName { name: name.to_string() })
    } else {
        Ok(())
    }
}

/// In-memory sink, kept in insertion order.
#[derive(Debug, Default)]
pub struct GeneratedSources {
    artifacts: Mutex<Vec<GeneratedArtifact>>,
}

impl GeneratedSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.artifacts
            .lock()
            .iter()
            .find(|artifact| artifact.name == name)
            .map(|artifact| artifact.text.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.artifacts.lock().iter().map(|artifact| artifact.name.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<GeneratedArtifact> {
        self.artifacts.lock().clone()
    }

    pub fn into_artifacts(self) -> Vec<GeneratedArtifact> {
        self.artifacts.into_inner()
    }
}

impl ArtifactSink for GeneratedSources {
    fn add_source(&self, name: &str, text: String) -> Result<(), SinkError> {
        validate_artifact_name(name)?;
        let mut artifacts = self.artifacts.lock();
        if artifacts.iter().any(|artifact| artifact.name == name) {
            return Err(SinkError::Duplicate { name: name.to_string() });
        }
        artifacts.push(GeneratedArtifact {
            name: name.to_string(),
            text,
        });
        Ok(())
    }
}

/// Writes every artifact to `<dir>/<name>`.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    written: Mutex<HashSet<String>>,
}

impl DirectorySink {
    /// Create the sink, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            written: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> usize {
        self.written.lock().len()
    }
}

impl ArtifactSink for DirectorySink {
    fn add_source(&self, name: &str, text: String) -> Result<(), SinkError> {
        validate_artifact_name(name)?;
        let mut written = self.written.lock();
        if !written.insert(name.to_string()) {
            return Err(SinkError::Duplicate { name: name.to_string() });
        }

        let path = self.dir.join(name);
        if let Err(source) = fs::write(&path, text) {
            written.remove(name);
            return Err(SinkError::Io {
                name: name.to_string(),
                source,
            });
        }
        log::debug!("wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_sink_rejects_duplicates() {
        let sink = GeneratedSources::new();
        sink.add_source("Greeting.g.rs", "pub struct Greeting {}".to_string()).unwrap();
        let err = sink.add_source("Greeting.g.rs", String::new()).unwrap_err();
        assert!(matches!(err, SinkError::Duplicate { .. }));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get("Greeting.g.rs").as_deref(), Some("pub struct Greeting {}"));
    }

    #[test]
    fn test_artifact_names_must_be_plain() {
        for name in ["", "..", "a/b.rs", "a\\b.rs", "x\ny.rs"] {
            assert!(validate_artifact_name(name).is_err(), "{name:?} should be rejected");
        }
        assert!(validate_artifact_name("Error.selfgen.g.rs").is_ok());
    }

    #[test]
    fn test_directory_sink_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("generated")).unwrap();
        sink.add_source("a.g.rs", "// a".to_string()).unwrap();
        assert!(sink.add_source("a.g.rs", "// again".to_string()).is_err());
        assert_eq!(sink.written(), 1);
        let written = fs::read_to_string(dir.path().join("generated").join("a.g.rs")).unwrap();
        assert_eq!(written, "// a");
    }
}
