//! selfgen command line interface.
//!
//! Usage:
//!
//! ```text
//! selfgen generate --src <dir> --out <dir>
//! selfgen index --src <dir> [--candidates] [--json]
//! selfgen runtime [--out <file>]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use selfgen::config::{parse_extern, EngineConfig, ToolchainConfig};
use selfgen::{DeclarationIndex, DirectorySink, Edition, Engine, HostCompilation, ParseOptions, RuntimeModule};

#[derive(Parser, Debug)]
#[command(name = "selfgen")]
#[command(about = "Compile and run the source generators a crate defines for itself")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Edition host sources are parsed and units compiled with
    #[arg(long, global = true, default_value = "2021")]
    edition: Edition,

    /// Name of the runtime support module in the host crate
    #[arg(long = "runtime-module", global = true, default_value = "selfgen_rt")]
    runtime_module: String,

    /// rustc binary used for units
    #[arg(long, global = true, env = "SELFGEN_RUSTC")]
    rustc: Option<PathBuf>,

    /// Path of the selfgen_macros proc-macro library
    #[arg(long = "macros-lib", global = true, env = "SELFGEN_MACROS_LIB")]
    macros_lib: Option<PathBuf>,

    /// Extra crate available to units, as NAME=PATH
    #[arg(long = "extern", global = true, value_parser = parse_extern)]
    externs: Vec<(String, PathBuf)>,

    /// Extra library search directory for units
    #[arg(short = 'L', global = true)]
    search_paths: Vec<PathBuf>,

    /// Seconds allowed per unit compile, 0 for no limit
    #[arg(long = "compile-timeout", global = true, env = "SELFGEN_COMPILE_TIMEOUT", default_value_t = 300)]
    compile_timeout: u64,

    /// Seconds allowed per generator invocation, 0 for no limit
    #[arg(long = "invoke-timeout", global = true, env = "SELFGEN_INVOKE_TIMEOUT", default_value_t = 60)]
    invoke_timeout: u64,

    /// Worker threads, 0 for one per core
    #[arg(long, global = true, env = "SELFGEN_THREADS", default_value_t = 0)]
    threads: usize,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one generation pass and write the generated sources
    Generate {
        /// Source root of the host crate
        #[arg(long)]
        src: PathBuf,

        /// Directory generated sources are written to
        #[arg(long)]
        out: PathBuf,

        /// Also write the runtime module source to the output directory
        #[arg(long = "emit-runtime")]
        emit_runtime: bool,

        /// Extra rustc flag for every unit (repeatable)
        #[arg(long = "rustc-flag", allow_hyphen_values = true)]
        rustc_flags: Vec<String>,
    },

    /// Print the declaration index of a crate
    Index {
        /// Source root of the host crate
        #[arg(long)]
        src: PathBuf,

        /// Only print candidates
        #[arg(long)]
        candidates: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print or write the runtime support module source
    Runtime {
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn init_logging(global: &GlobalArgs) {
    let level = if global.quiet {
        log::LevelFilter::Error
    } else {
        match global.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn timeout(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

fn engine_config(global: &GlobalArgs) -> EngineConfig {
    EngineConfig::default()
        .with_edition(global.edition)
        .with_runtime_module(global.runtime_module.clone())
        .with_toolchain(ToolchainConfig {
            rustc: global.rustc.clone(),
            macros_lib: global.macros_lib.clone(),
            externs: global.externs.clone(),
            search_paths: global.search_paths.clone(),
        })
        .with_compile_timeout(timeout(global.compile_timeout))
        .with_invoke_timeout(timeout(global.invoke_timeout))
        .with_threads(Some(global.threads))
}

fn load_sources(src: &Path, options: ParseOptions) -> HostCompilation {
    match HostCompilation::from_dir(src, options) {
        Ok(compilation) => compilation,
        Err(err) => {
            log::error!("{}", err);
            process::exit(2);
        }
    }
}

fn generate(global: &GlobalArgs, src: PathBuf, out: PathBuf, emit_runtime: bool, rustc_flags: Vec<String>) -> i32 {
    let config = engine_config(global)
        .with_emit_runtime_module(emit_runtime)
        .with_rustc_flags(rustc_flags);
    let compilation = load_sources(&src, config.options);

    let engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(err) => {
            log::error!("{}", err);
            return 2;
        }
    };

    let sink = match DirectorySink::new(&out) {
        Ok(sink) => Arc::new(sink),
        Err(err) => {
            log::error!("Failed to create {}: {}", out.display(), err);
            return 2;
        }
    };

    let report = engine.run(&compilation, sink.clone());
    log::info!("Wrote {} file(s) to {}", sink.written(), out.display());
    eprint!("{}", report.stats);

    if report.has_diagnostics() {
        eprintln!("{}", report.diagnostics.trim_end());
        1
    } else {
        0
    }
}

#[derive(Serialize)]
struct IndexEntry<'a> {
    index: usize,
    kind: &'a str,
    file: &'a str,
    line: u32,
    column: u32,
    parent: Option<usize>,
    name: Option<&'a str>,
    fully_qualified_name: Option<&'a str>,
    candidate: bool,
}

fn index(global: &GlobalArgs, src: PathBuf, candidates_only: bool, json: bool) -> i32 {
    let config = engine_config(global);
    if let Err(err) = config.validate() {
        log::error!("{}", err);
        return 2;
    }
    let runtime = config.runtime();
    let compilation = load_sources(&src, config.options).with_runtime(&runtime);
    let index = DeclarationIndex::build(&compilation, &runtime);

    let entries: Vec<IndexEntry<'_>> = index
        .all()
        .iter()
        .map(|record| {
            let span = record.node.span();
            let fully_qualified_name = record.symbol.as_ref().map(|symbol| symbol.fully_qualified_name.as_str());
            IndexEntry {
                index: record.node.index(),
                kind: record.node.kind().as_str(),
                file: record.node.tree().path(),
                line: span.start_line,
                column: span.start_column,
                parent: record.node.parent(),
                name: record.symbol.as_ref().map(|symbol| symbol.name.as_str()),
                fully_qualified_name,
                candidate: fully_qualified_name.is_some_and(|name| {
                    index
                        .candidates()
                        .iter()
                        .any(|candidate| candidate.fully_qualified_name() == name)
                }),
            }
        })
        .filter(|entry| !candidates_only || entry.candidate)
        .collect();

    if json {
        match serde_json::to_string_pretty(&entries) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                log::error!("Failed to encode the index: {}", err);
                return 2;
            }
        }
    } else {
        for entry in &entries {
            println!(
                "{:>5} {:<12} {}:{}:{} {}{}",
                entry.index,
                entry.kind,
                entry.file,
                entry.line,
                entry.column,
                entry.fully_qualified_name.unwrap_or("-"),
                if entry.candidate { " [candidate]" } else { "" }
            );
        }
    }
    0
}

fn runtime(global: &GlobalArgs, out: Option<PathBuf>) -> i32 {
    let module = RuntimeModule::new(global.runtime_module.clone(), ParseOptions { edition: global.edition });
    match out {
        Some(path) => match fs::write(&path, module.source()) {
            Ok(()) => {
                log::info!("Wrote runtime module v{} to {}", module.version(), path.display());
                0
            }
            Err(err) => {
                log::error!("Failed to write {}: {}", path.display(), err);
                2
            }
        },
        None => {
            print!("{}", module.source());
            0
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.global);

    let code = match cli.command {
        Command::Generate {
            src,
            out,
            emit_runtime,
            rustc_flags,
        } => generate(&cli.global, src, out, emit_runtime, rustc_flags),
        Command::Index { src, candidates, json } => index(&cli.global, src, candidates, json),
        Command::Runtime { out } => runtime(&cli.global, out),
    };
    process::exit(code);
}
