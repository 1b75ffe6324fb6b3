//! Declaration index tests over multi-file host crates.

mod common;

use std::fs;

use common::*;
use selfgen::runtime::MarshalledDeclarations;
use selfgen::{DeclarationIndex, HostCompilation, ParseOptions, RuntimeModule};

fn build(files: &[(&str, &str)]) -> DeclarationIndex {
    init_logging();
    let runtime = RuntimeModule::default();
    DeclarationIndex::build(&host(files).with_runtime(&runtime), &runtime)
}

fn candidate_names(index: &DeclarationIndex) -> Vec<String> {
    let mut names: Vec<String> = index
        .candidates()
        .iter()
        .map(|candidate| candidate.fully_qualified_name().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_candidates_across_files() {
    let index = build(&[
        ("crate", HOST_ROOT),
        ("crate::generators", "pub mod greeting;\npub mod exploding;\n"),
        ("crate::generators::greeting", GREETING_SOURCE),
        ("crate::generators::exploding", PANIC_SOURCE),
    ]);

    assert_eq!(
        candidate_names(&index),
        vec![
            "crate::generators::exploding::Exploding".to_string(),
            "crate::generators::greeting::Greeting".to_string(),
        ]
    );
    assert!(index.find("crate::Plain").is_some());
}

#[test]
fn test_attribute_and_impl_order_is_irrelevant() {
    let source = r#"use crate::selfgen_rt::{generator, Declaration, GeneratorContext, GeneratorResult, SourceGenerator};

impl SourceGenerator for Reordered {
    fn on_execute(&mut self, _c: &mut GeneratorContext<'_>, _n: &[Declaration]) -> GeneratorResult { Ok(()) }
}

#[derive(Default)]
#[generator]
pub struct Reordered;
"#;
    let index = build(&[("crate", HOST_ROOT), ("crate::generators", source)]);
    assert_eq!(candidate_names(&index), vec!["crate::generators::Reordered".to_string()]);
}

#[test]
fn test_glob_import_of_the_runtime_counts() {
    let source = r#"use crate::selfgen_rt::*;

#[generator]
#[derive(Default)]
pub struct Globbed;

impl SourceGenerator for Globbed {
    fn on_execute(&mut self, _c: &mut GeneratorContext<'_>, _n: &[Declaration]) -> GeneratorResult { Ok(()) }
}
"#;
    let index = build(&[("crate", HOST_ROOT), ("crate::generators", source)]);
    assert_eq!(candidate_names(&index), vec!["crate::generators::Globbed".to_string()]);
}

#[test]
fn test_same_named_trait_elsewhere_does_not_count() {
    let source = r#"use crate::selfgen_rt::generator;

pub trait SourceGenerator {}

#[generator]
#[derive(Default)]
pub struct Impostor;

impl SourceGenerator for Impostor {}
"#;
    let index = build(&[("crate", HOST_ROOT), ("crate::generators", source)]);
    assert!(index.candidates().is_empty());
}

#[test]
fn test_second_marker_excludes_candidate() {
    let source = GREETING_SOURCE.replace("#[generator]", "#[generator]\n#[crate::selfgen_rt::generator]");
    let index = build(&[("crate", HOST_ROOT), ("crate::generators::greeting", &source)]);
    assert!(index.candidates().is_empty());
    assert!(index.find("crate::generators::greeting::Greeting").is_some());
}

#[test]
fn test_marshalled_view_matches_records() {
    let index = build(&[("crate", HOST_ROOT), ("crate::generators::greeting", GREETING_SOURCE)]);
    let marshalled = MarshalledDeclarations::new(index.all());
    let declarations = marshalled.to_declarations();

    assert_eq!(declarations.len(), index.all().len());
    for (declaration, record) in declarations.iter().zip(index.all()) {
        assert_eq!(declaration.index, record.node.index());
        assert_eq!(declaration.kind, record.node.kind().as_str());
        assert_eq!(declaration.parent, record.node.parent());
        assert_eq!(declaration.text, record.node.text());
        assert_eq!(
            declaration.symbol.as_ref().map(|symbol| symbol.fully_qualified_name.clone()),
            record.symbol.as_ref().map(|symbol| symbol.fully_qualified_name.clone())
        );
    }
}

#[test]
fn test_host_from_directory() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path();
    fs::create_dir_all(src.join("generators")).unwrap();
    fs::write(src.join("lib.rs"), HOST_ROOT).unwrap();
    fs::write(src.join("generators/mod.rs"), "pub mod greeting;\n").unwrap();
    fs::write(src.join("generators/greeting.rs"), GREETING_SOURCE).unwrap();
    fs::write(src.join("notes.txt"), "not rust").unwrap();

    let compilation = HostCompilation::from_dir(src, ParseOptions::default()).unwrap();
    let mut modules: Vec<&str> = compilation.trees().iter().map(|tree| tree.module_path()).collect();
    modules.sort();
    assert_eq!(modules, vec!["crate", "crate::generators", "crate::generators::greeting"]);

    let runtime = RuntimeModule::default();
    let index = DeclarationIndex::build(&compilation.with_runtime(&runtime), &runtime);
    assert_eq!(
        candidate_names(&index),
        vec!["crate::generators::greeting::Greeting".to_string()]
    );
}
