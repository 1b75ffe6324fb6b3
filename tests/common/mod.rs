//! Shared helpers for the integration tests.
//!
//! Tests that compile units need rustc and the `selfgen_macros` library built
//! next to the test binary. When either cannot be discovered they print a
//! message and return early.

#![allow(dead_code)]

use std::sync::Arc;

use selfgen::{EngineConfig, HostCompilation, ParseOptions, ReferenceSet, ToolchainConfig};

pub const GREETING_SOURCE: &str = r#"use crate::selfgen_rt::{generator, Declaration, GeneratorContext, GeneratorResult, SourceGenerator};

#[generator]
#[derive(Default)]
pub struct Greeting;

impl SourceGenerator for Greeting {
    fn on_execute(&mut self, context: &mut GeneratorContext<'_>, _nodes: &[Declaration]) -> GeneratorResult {
        context.add_source("Greeting.g.rs", "pub struct Greeting {}");
        Ok(())
    }
}
"#;

pub const PANIC_SOURCE: &str = r#"use crate::selfgen_rt::{generator, Declaration, GeneratorContext, GeneratorResult, SourceGenerator};

#[generator]
#[derive(Default)]
pub struct Exploding;

impl SourceGenerator for Exploding {
    fn on_execute(&mut self, _context: &mut GeneratorContext<'_>, _nodes: &[Declaration]) -> GeneratorResult {
        panic!("generator exploded");
    }
}
"#;

pub const BROKEN_SOURCE: &str = r#"use crate::selfgen_rt::{generator, Declaration, GeneratorContext, GeneratorResult, SourceGenerator};

#[generator]
#[derive(Default)]
pub struct Broken;

impl SourceGenerator for Broken {
    fn on_execute(&mut self, _context: &mut GeneratorContext<'_>, _nodes: &[Declaration]) -> GeneratorResult {
        let count: u32 = "not a number";
        let _ = count;
        Ok(())
    }
}
"#;

/// Lists every struct it is given, one artifact per generator.
pub const LISTING_SOURCE: &str = r#"use crate::selfgen_rt::{generator, Declaration, GeneratorContext, GeneratorResult, SourceGenerator};

#[generator]
#[derive(Default)]
pub struct Listing;

impl SourceGenerator for Listing {
    fn on_execute(&mut self, context: &mut GeneratorContext<'_>, nodes: &[Declaration]) -> GeneratorResult {
        let mut names: Vec<&str> = nodes
            .iter()
            .filter(|node| node.is_kind("struct"))
            .filter_map(|node| node.name())
            .collect();
        names.sort();
        let text: String = names.iter().map(|name| format!("// {}\n", name)).collect();
        context.report(&format!("saw {} structs", names.len()));
        context.add_source("Listing.g.rs", &text);
        Ok(())
    }
}
"#;

pub const FAILING_SOURCE: &str = r#"use crate::selfgen_rt::{generator, Declaration, GeneratorContext, GeneratorResult, SourceGenerator};

#[generator]
#[derive(Default)]
pub struct Failing;

impl SourceGenerator for Failing {
    fn on_execute(&mut self, _context: &mut GeneratorContext<'_>, _nodes: &[Declaration]) -> GeneratorResult {
        Err("no input to work with".into())
    }
}
"#;

pub const CTOR_PANIC_SOURCE: &str = r#"use crate::selfgen_rt::{generator, Declaration, GeneratorContext, GeneratorResult, SourceGenerator};

#[generator]
pub struct Ctor;

impl Default for Ctor {
    fn default() -> Self {
        panic!("constructor exploded")
    }
}

impl SourceGenerator for Ctor {
    fn on_execute(&mut self, _context: &mut GeneratorContext<'_>, _nodes: &[Declaration]) -> GeneratorResult {
        Ok(())
    }
}
"#;

/// Adds its artifact only after two seconds.
pub const SLOW_SOURCE: &str = r#"use crate::selfgen_rt::{generator, Declaration, GeneratorContext, GeneratorResult, SourceGenerator};

#[generator]
#[derive(Default)]
pub struct Slow;

impl SourceGenerator for Slow {
    fn on_execute(&mut self, context: &mut GeneratorContext<'_>, _nodes: &[Declaration]) -> GeneratorResult {
        std::thread::sleep(std::time::Duration::from_secs(2));
        context.add_source("Late.g.rs", "pub struct Late;");
        Ok(())
    }
}
"#;

pub const NO_DEFAULT_SOURCE: &str = r#"use crate::selfgen_rt::{generator, Declaration, GeneratorContext, GeneratorResult, SourceGenerator};

#[generator]
pub struct NoDefault {
    pub count: u32,
}

impl SourceGenerator for NoDefault {
    fn on_execute(&mut self, _context: &mut GeneratorContext<'_>, _nodes: &[Declaration]) -> GeneratorResult {
        Ok(())
    }
}
"#;

/// Tries to write the pass's own diagnostic artifact.
pub const HIJACK_SOURCE: &str = r#"use crate::selfgen_rt::{generator, Declaration, GeneratorContext, GeneratorResult, SourceGenerator};

#[generator]
#[derive(Default)]
pub struct Hijack;

impl SourceGenerator for Hijack {
    fn on_execute(&mut self, context: &mut GeneratorContext<'_>, _nodes: &[Declaration]) -> GeneratorResult {
        context.add_source("Error.selfgen.g.rs", "/* nothing to see */");
        Ok(())
    }
}
"#;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The reference set, or `None` with a message when no toolchain is available.
pub fn references() -> Option<Arc<ReferenceSet>> {
    init_logging();
    match ReferenceSet::discover(&ToolchainConfig::default()) {
        Ok(references) => Some(Arc::new(references)),
        Err(err) => {
            eprintln!("skipping: {}", err);
            None
        }
    }
}

pub fn config() -> EngineConfig {
    EngineConfig::default().with_threads(Some(4))
}

/// A host crate made of `(module path, source)` pairs.
///
/// `crate` maps to `lib.rs`, `crate::a::b` to `a/b.rs`.
pub fn host(files: &[(&str, &str)]) -> HostCompilation {
    let mut compilation = HostCompilation::new(ParseOptions::default());
    for (module, text) in files {
        let path = match module.strip_prefix("crate::") {
            Some(rest) => format!("{}.rs", rest.replace("::", "/")),
            None => String::from("lib.rs"),
        };
        compilation.add_source(&path, module, text);
    }
    compilation
}

pub const HOST_ROOT: &str = "pub mod selfgen_rt;\npub mod generators;\n\npub struct Plain;\n";
