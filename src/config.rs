//! Engine configuration.
//!
//! [`EngineConfig`] collects everything a generation pass needs besides its
//! input: the runtime module name and edition, the toolchain to compile units
//! with, deadlines and parallelism. Values come from `Default`, the `with_*`
//! builders, and [`EngineConfig::from_env`] for the `SELFGEN_*` variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::ConfigError;
use crate::runtime::{RuntimeModule, DEFAULT_MODULE_NAME};
use crate::syntax::{Edition, ParseOptions};

/// Default deadline for one rustc run.
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default deadline for one generator invocation.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Where rustc and the libraries units link against come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainConfig {
    /// rustc binary; `RUSTC` or `rustc` on `PATH` when unset.
    pub rustc: Option<PathBuf>,
    /// The `selfgen_macros` proc-macro library; searched next to the
    /// running executable when unset.
    pub macros_lib: Option<PathBuf>,
    /// Extra `--extern name=path` crates.
    pub externs: Vec<(String, PathBuf)>,
    /// Extra `-L` directories.
    pub search_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub runtime_module: String,
    pub options: ParseOptions,
    pub toolchain: ToolchainConfig,
    pub compile_timeout: Option<Duration>,
    pub invoke_timeout: Option<Duration>,
    /// Dedicated worker count; the global rayon pool when `None`.
    pub threads: Option<usize>,
    /// Emit the runtime module source as an artifact before any candidate runs.
    pub emit_runtime_module: bool,
    /// Extra rustc flags for every unit, e.g. `-D warnings`.
    pub rustc_flags: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runtime_module: DEFAULT_MODULE_NAME.to_string(),
            options: ParseOptions::default(),
            toolchain: ToolchainConfig::default(),
            compile_timeout: Some(DEFAULT_COMPILE_TIMEOUT),
            invoke_timeout: Some(DEFAULT_INVOKE_TIMEOUT),
            threads: None,
            emit_runtime_module: false,
            rustc_flags: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the `SELFGEN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|name| env::var(name).ok())
    }

    /// Overlay values looked up through `lookup`.
    ///
    /// Timeouts are whole seconds and `0` disables them; `SELFGEN_THREADS=0`
    /// means the global pool.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(rustc) = lookup("SELFGEN_RUSTC") {
            self.toolchain.rustc = Some(PathBuf::from(rustc));
        }
        if let Some(lib) = lookup("SELFGEN_MACROS_LIB") {
            self.toolchain.macros_lib = Some(PathBuf::from(lib));
        }
        if let Some(value) = lookup("SELFGEN_COMPILE_TIMEOUT") {
            self.compile_timeout = parse_timeout("SELFGEN_COMPILE_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("SELFGEN_INVOKE_TIMEOUT") {
            self.invoke_timeout = parse_timeout("SELFGEN_INVOKE_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("SELFGEN_THREADS") {
            let threads = parse_count("SELFGEN_THREADS", &value)?;
            self.threads = (threads > 0).then_some(threads);
        }
        Ok(self)
    }

    pub fn with_runtime_module(mut self, name: impl Into<String>) -> Self {
        self.runtime_module = name.into();
        self
    }

    pub fn with_edition(mut self, edition: Edition) -> Self {
        self.options.edition = edition;
        self
    }

    pub fn with_toolchain(mut self, toolchain: ToolchainConfig) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_compile_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.compile_timeout = timeout;
        self
    }

    pub fn with_invoke_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads.filter(|threads| *threads > 0);
        self
    }

    pub fn with_emit_runtime_module(mut self, emit: bool) -> Self {
        self.emit_runtime_module = emit;
        self
    }

    pub fn with_rustc_flags(mut self, flags: Vec<String>) -> Self {
        self.rustc_flags = flags;
        self
    }

    /// Check values that cannot be expressed by the types alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if syn::parse_str::<syn::Ident>(&self.runtime_module).is_err() {
            return Err(ConfigError::Invalid {
                reason: format!("runtime module name `{}` is not an identifier", self.runtime_module),
            });
        }
        for (name, _) in &self.toolchain.externs {
            if syn::parse_str::<syn::Ident>(name).is_err() {
                return Err(ConfigError::Invalid {
                    reason: format!("extern crate name `{}` is not an identifier", name),
                });
            }
        }
        Ok(())
    }

    pub fn runtime(&self) -> RuntimeModule {
        RuntimeModule::new(self.runtime_module.clone(), self.options)
    }
}

/// `name=path` as used by `--extern`.
pub fn parse_extern(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok((name.to_string(), PathBuf::from(path))),
        _ => Err(format!("expected NAME=PATH, got `{}`", value)),
    }
}

/// Seconds, `0` meaning no deadline.
pub fn parse_timeout(name: &str, value: &str) -> Result<Option<Duration>, ConfigError> {
    let seconds = parse_count(name, value)?;
    Ok((seconds > 0).then(|| Duration::from_secs(seconds as u64)))
}

fn parse_count(name: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| ConfigError::Invalid {
        reason: format!("{}={} is not a non-negative integer", name, value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.runtime_module, "selfgen_rt");
        assert_eq!(config.options.edition, Edition::E2021);
        assert_eq!(config.compile_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.invoke_timeout, Some(Duration::from_secs(60)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overlay() {
        let config = EngineConfig::default()
            .with_env(lookup(&[
                ("SELFGEN_RUSTC", "/opt/rust/bin/rustc"),
                ("SELFGEN_COMPILE_TIMEOUT", "0"),
                ("SELFGEN_INVOKE_TIMEOUT", "5"),
                ("SELFGEN_THREADS", "4"),
            ]))
            .unwrap();
        assert_eq!(config.toolchain.rustc, Some(PathBuf::from("/opt/rust/bin/rustc")));
        assert_eq!(config.compile_timeout, None);
        assert_eq!(config.invoke_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.threads, Some(4));
    }

    #[test]
    fn test_env_rejects_garbage() {
        let result = EngineConfig::default().with_env(lookup(&[("SELFGEN_THREADS", "many")]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_names() {
        assert!(EngineConfig::default().with_runtime_module("not a name").validate().is_err());

        let mut config = EngineConfig::default();
        config.toolchain.externs.push(("serde-json".to_string(), PathBuf::from("/x.rlib")));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_extern() {
        assert_eq!(
            parse_extern("serde=/deps/libserde.rlib").unwrap(),
            ("serde".to_string(), PathBuf::from("/deps/libserde.rlib"))
        );
        assert!(parse_extern("serde").is_err());
        assert!(parse_extern("=x").is_err());
    }
}
