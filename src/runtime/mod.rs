// This module owns the runtime support source that selfgen shares between a host crate and
// every generator unit it compiles. The source lives in selfgen_rt.rs; it is compiled into
// this library as runtime::selfgen_rt (so the host side uses the very same boundary types)
// and embedded as text so it can be written into host crates and unit workspaces verbatim.
// RuntimeModule describes where the module is mounted (crate::<name>) and with which parse
// options, and derives the paths of the marker attribute and capability trait from that. The
// marshal submodule converts the declaration index into the #[repr(C)] arrays handed to
// units.

//! Runtime support module.

pub mod marshal;
pub mod selfgen_rt;

use std::sync::Arc;

use crate::syntax::{ParseOptions, SourceTree};

pub use marshal::MarshalledDeclarations;

/// Source text of the runtime support module.
pub const RUNTIME_SOURCE: &str = include_str!("selfgen_rt.rs");

pub use selfgen_rt::RUNTIME_VERSION;

/// Default mount point of the runtime module.
pub const DEFAULT_MODULE_NAME: &str = "selfgen_rt";

/// The runtime module as mounted in one host crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeModule {
    module_name: String,
    options: ParseOptions,
}

impl RuntimeModule {
    pub fn new(module_name: impl Into<String>, options: ParseOptions) -> Self {
        Self {
            module_name: module_name.into(),
            options,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn options(&self) -> ParseOptions {
        self.options
    }

    pub fn source(&self) -> &'static str {
        RUNTIME_SOURCE
    }

    pub fn version(&self) -> u32 {
        RUNTIME_VERSION
    }

    /// `crate::<module>`.
    pub fn module_path(&self) -> String {
        format!("crate::{}", self.module_name)
    }

    /// File name the module is written under, relative to the crate's `src`.
    pub fn file_name(&self) -> String {
        format!("{}.rs", self.module_name)
    }

    /// Path of the marker attribute as re-exported by the module.
    pub fn marker_path(&self) -> String {
        format!("{}::generator", self.module_path())
    }

    /// Path of the capability trait.
    pub fn interface_path(&self) -> String {
        format!("{}::SourceGenerator", self.module_path())
    }

    /// The module as a source tree parsed with the host's options.
    pub fn tree(&self) -> Arc<SourceTree> {
        Arc::new(SourceTree::new(
            self.file_name(),
            self.module_path(),
            RUNTIME_SOURCE,
            self.options,
        ))
    }
}

impl Default for RuntimeModule {
    fn default() -> Self {
        Self::new(DEFAULT_MODULE_NAME, ParseOptions::default())
    }
}
