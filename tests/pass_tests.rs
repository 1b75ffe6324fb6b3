//! End-to-end generation pass tests. These need a working rustc.

mod common;

use std::fs;
use std::sync::Arc;

use common::*;
use selfgen::{DirectorySink, Engine, GeneratedSources, DIAGNOSTIC_ARTIFACT, RUNTIME_SOURCE};

fn engine() -> Option<Engine> {
    let references = references()?;
    Some(Engine::with_references(references, config()).unwrap())
}

#[test]
fn test_greeting_end_to_end() {
    let Some(engine) = engine() else { return };
    let compilation = host(&[
        ("crate", HOST_ROOT),
        ("crate::generators", "pub mod greeting;\n"),
        ("crate::generators::greeting", GREETING_SOURCE),
    ]);

    let sink = Arc::new(GeneratedSources::new());
    let report = engine.run(&compilation, sink.clone());

    assert!(!report.has_diagnostics(), "{}", report.diagnostics);
    assert_eq!(report.candidates, vec!["crate::generators::greeting::Greeting".to_string()]);
    assert_eq!(sink.get("Greeting.g.rs").as_deref(), Some("pub struct Greeting {}"));
    assert_eq!(sink.get(DIAGNOSTIC_ARTIFACT).as_deref(), Some("/*\n\n*/"));
    assert_eq!(sink.len(), 2);

    assert_eq!(report.stats.units_compiled, 1);
    assert_eq!(report.stats.units_invoked, 1);
    assert_eq!(report.stats.artifacts_emitted, 2);
}

#[test]
fn test_failures_are_isolated_per_candidate() {
    let Some(engine) = engine() else { return };
    let compilation = host(&[
        ("crate", HOST_ROOT),
        ("crate::generators", "pub mod greeting;\npub mod exploding;\npub mod broken;\n"),
        ("crate::generators::greeting", GREETING_SOURCE),
        ("crate::generators::exploding", PANIC_SOURCE),
        ("crate::generators::broken", BROKEN_SOURCE),
    ]);

    let sink = Arc::new(GeneratedSources::new());
    let report = engine.run(&compilation, sink.clone());

    assert_eq!(report.candidates.len(), 3);
    assert_eq!(sink.get("Greeting.g.rs").as_deref(), Some("pub struct Greeting {}"));
    assert_eq!(sink.len(), 2);

    let text = report.diagnostics.as_str();
    assert_eq!(text.matches("Error From ").count(), 2, "{}", text);
    assert!(text.contains("Error From crate::generators::broken::Broken\n"));
    assert!(text.contains("Error From crate::generators::exploding::Exploding\n"));
    assert!(text.contains("generator exploded"));
    assert!(!text.contains("Greeting"));

    let artifact = sink.get(DIAGNOSTIC_ARTIFACT).unwrap();
    assert!(artifact.starts_with("/*\n"));
    assert!(artifact.ends_with("\n*/"));
    assert!(artifact.contains("Error From crate::generators::broken::Broken"));

    assert_eq!(report.stats.compile_failures, 1);
    assert_eq!(report.stats.invocation_failures, 1);
    assert_eq!(report.stats.failures(), 2);
}

#[test]
fn test_returned_error_becomes_diagnostic() {
    let Some(engine) = engine() else { return };
    let compilation = host(&[("crate", HOST_ROOT), ("crate::generators", FAILING_SOURCE)]);

    let sink = Arc::new(GeneratedSources::new());
    let report = engine.run(&compilation, sink.clone());

    assert!(report.diagnostics.contains("Error From crate::generators::Failing\n"));
    assert!(report.diagnostics.contains("SG0106"));
    assert!(report.diagnostics.contains("no input to work with"));
}

#[test]
fn test_generators_see_the_declarations() {
    let Some(engine) = engine() else { return };
    let compilation = host(&[("crate", HOST_ROOT), ("crate::generators", LISTING_SOURCE)]);

    let sink = Arc::new(GeneratedSources::new());
    let report = engine.run(&compilation, sink.clone());

    assert!(!report.has_diagnostics(), "{}", report.diagnostics);
    let listing = sink.get("Listing.g.rs").unwrap();
    assert!(listing.contains("// Plain\n"));
    assert!(listing.contains("// Listing\n"));
}

#[test]
fn test_duplicate_artifact_name_is_a_runtime_failure() {
    let Some(engine) = engine() else { return };
    let twin = GREETING_SOURCE.replace("struct Greeting;", "struct Twin;").replace("for Greeting", "for Twin");
    let compilation = host(&[
        ("crate", HOST_ROOT),
        ("crate::generators", "pub mod greeting;\npub mod twin;\n"),
        ("crate::generators::greeting", GREETING_SOURCE),
        ("crate::generators::twin", &twin),
    ]);

    let sink = Arc::new(GeneratedSources::new());
    let report = engine.run(&compilation, sink.clone());

    assert_eq!(report.candidates.len(), 2);
    assert!(sink.get("Greeting.g.rs").is_some());
    assert_eq!(report.diagnostics.matches("Error From ").count(), 1, "{}", report.diagnostics);
    assert!(report.diagnostics.contains("rejected by the host"));
}

#[test]
fn test_generators_cannot_replace_the_diagnostic_artifact() {
    let Some(engine) = engine() else { return };
    let compilation = host(&[
        ("crate", HOST_ROOT),
        ("crate::generators", "pub mod hijack;\npub mod broken;\n"),
        ("crate::generators::hijack", HIJACK_SOURCE),
        ("crate::generators::broken", BROKEN_SOURCE),
    ]);

    let sink = Arc::new(GeneratedSources::new());
    let report = engine.run(&compilation, sink.clone());

    let artifact = sink.get(DIAGNOSTIC_ARTIFACT).unwrap();
    assert!(!artifact.contains("nothing to see"), "{}", artifact);
    assert!(artifact.contains("Error From crate::generators::broken::Broken\n"), "{}", artifact);
    assert!(artifact.contains("Error From crate::generators::hijack::Hijack\n"), "{}", artifact);
    assert!(report.diagnostics.contains("rejected by the host"));
    assert_eq!(report.stats.artifacts_emitted, 1);
}

#[test]
fn test_emitted_runtime_module_is_reserved() {
    let Some(references) = references() else { return };
    let engine = Engine::with_references(Arc::clone(&references), config().with_emit_runtime_module(true)).unwrap();
    assert!(engine.dispatcher().is_reserved("selfgen_rt.rs"));
    assert!(engine.dispatcher().is_reserved(DIAGNOSTIC_ARTIFACT));

    let engine = Engine::with_references(references, config()).unwrap();
    assert!(!engine.dispatcher().is_reserved("selfgen_rt.rs"));
}

#[test]
fn test_runtime_module_is_emitted_first() {
    let Some(references) = references() else { return };
    let engine = Engine::with_references(references, config().with_emit_runtime_module(true)).unwrap();
    let compilation = host(&[("crate", "pub struct Nothing;\n")]);

    let sink = Arc::new(GeneratedSources::new());
    let report = engine.run(&compilation, sink.clone());

    assert!(report.candidates.is_empty());
    assert_eq!(sink.names(), vec!["selfgen_rt.rs".to_string(), DIAGNOSTIC_ARTIFACT.to_string()]);
    assert_eq!(sink.get("selfgen_rt.rs").as_deref(), Some(RUNTIME_SOURCE));
}

#[test]
fn test_directory_sink_receives_artifacts() {
    let Some(engine) = engine() else { return };
    let out = tempfile::tempdir().unwrap();
    let compilation = host(&[("crate", HOST_ROOT), ("crate::generators", GREETING_SOURCE)]);

    let sink = Arc::new(DirectorySink::new(out.path()).unwrap());
    let report = engine.run(&compilation, sink.clone());

    assert!(!report.has_diagnostics(), "{}", report.diagnostics);
    assert_eq!(sink.written(), 2);
    assert_eq!(
        fs::read_to_string(out.path().join("Greeting.g.rs")).unwrap(),
        "pub struct Greeting {}"
    );
    assert!(out.path().join(DIAGNOSTIC_ARTIFACT).is_file());
}
