// This module models the host compilation that selfgen reads: the Rust edition a crate is
// parsed with, individual source files (SourceTree) with the module path they are mounted
// at, the ordered set of files that make up one crate (HostCompilation), and the immutable
// syntax nodes the declaration index hands out. Source text is kept as shared Arc<str> and
// reparsed with syn on demand because syn's trees are not Send. Host compilations can be
// assembled by hand or discovered from a source directory, where module paths follow the
// usual file layout (lib.rs and main.rs are the crate root, a/mod.rs and a.rs are crate::a).
// The runtime module tree is appended when the crate does not already carry it.

//! Host compilation model.
//!
//! [`HostCompilation`] is the input of a generation pass: an ordered list of
//! [`SourceTree`]s. The [`index`] submodule walks it and produces
//! [`SyntaxNode`]s paired with resolved symbols.

pub mod index;
pub mod resolve;

use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use walkdir::WalkDir;

use crate::core::error::SourceError;
use crate::runtime::selfgen_rt::Span;
use crate::runtime::RuntimeModule;

pub use index::{AttributeData, Candidate, DeclarationIndex, DeclarationRecord, Symbol};
pub use resolve::ScopeTable;

/// Rust edition a tree is parsed and compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Edition {
    E2015,
    E2018,
    #[default]
    E2021,
    E2024,
}

impl Edition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Edition::E2015 => "2015",
            Edition::E2018 => "2018",
            Edition::E2021 => "2021",
            Edition::E2024 => "2024",
        }
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Edition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "2015" => Ok(Edition::E2015),
            "2018" => Ok(Edition::E2018),
            "2021" => Ok(Edition::E2021),
            "2024" => Ok(Edition::E2024),
            other => Err(format!("unknown edition `{}`", other)),
        }
    }
}

/// Options a tree was parsed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ParseOptions {
    pub edition: Edition,
}

impl ParseOptions {
    pub fn new(edition: Edition) -> Self {
        Self { edition }
    }
}

/// One source file of the host crate.
#[derive(Debug)]
pub struct SourceTree {
    path: String,
    module_path: String,
    text: Arc<str>,
    options: ParseOptions,
    line_starts: Vec<usize>,
}

impl SourceTree {
    pub fn new(
        path: impl Into<String>,
        module_path: impl Into<String>,
        text: impl Into<Arc<str>>,
        options: ParseOptions,
    ) -> Self {
        let text = text.into();
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(offset, _)| offset + 1))
            .collect();
        Self {
            path: path.into(),
            module_path: module_path.into(),
            text,
            options,
            line_starts,
        }
    }

    /// Display path, relative to the source root when discovered from disk.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Module path the tree is mounted at, e.g. `crate::gen::greeting`.
    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn shared_text(&self) -> Arc<str> {
        Arc::clone(&self.text)
    }

    pub fn options(&self) -> ParseOptions {
        self.options
    }

    pub fn is_crate_root(&self) -> bool {
        self.module_path == "crate"
    }

    pub fn parse(&self) -> syn::Result<syn::File> {
        syn::parse_file(&self.text)
    }

    /// Byte offset of a 1-based line and 0-based character column.
    pub fn offset(&self, line: usize, column: usize) -> usize {
        let Some(&start) = line.checked_sub(1).and_then(|line| self.line_starts.get(line)) else {
            return self.text.len();
        };
        let rest = &self.text[start..];
        let line_end = rest.find('\n').unwrap_or(rest.len());
        rest[..line_end]
            .char_indices()
            .nth(column)
            .map(|(offset, _)| start + offset)
            .unwrap_or(start + line_end)
    }

    /// Span covering the whole file.
    pub fn full_span(&self) -> Span {
        let end_line = self.line_starts.len();
        let last_start = self.line_starts.last().copied().unwrap_or(0);
        Span {
            start_line: 1,
            start_column: 0,
            end_line: end_line as u32,
            end_column: self.text[last_start..].chars().count() as u32,
        }
    }

    pub fn slice(&self, range: &Range<usize>) -> &str {
        self.text.get(range.clone()).unwrap_or_default()
    }
}

/// Module path for a file, relative to the source root, following the usual layout.
///
/// Returns `None` for non-Rust files and paths whose components are not identifiers.
pub fn module_path_for(relative: &Path) -> Option<String> {
    if relative.extension().and_then(|ext| ext.to_str()) != Some("rs") {
        return None;
    }

    let mut segments = vec!["crate".to_string()];
    let components: Vec<String> = relative
        .iter()
        .map(|component| component.to_string_lossy().into_owned())
        .collect();
    let (file, dirs) = components.split_last()?;
    for dir in dirs {
        segments.push(dir.clone());
    }

    let stem = file.strip_suffix(".rs")?;
    match stem {
        "lib" | "main" if dirs.is_empty() => {}
        "mod" => {}
        stem => segments.push(stem.to_string()),
    }

    if segments[1..].iter().all(|segment| is_identifier(segment)) {
        Some(segments.join("::"))
    } else {
        None
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// Ordered source trees of one host crate.
#[derive(Debug, Clone, Default)]
pub struct HostCompilation {
    trees: Vec<Arc<SourceTree>>,
    options: ParseOptions,
}

impl HostCompilation {
    pub fn new(options: ParseOptions) -> Self {
        Self {
            trees: Vec::new(),
            options,
        }
    }

    /// Add a tree parsed with the compilation's options.
    pub fn add_source(&mut self, path: &str, module_path: &str, text: &str) -> Arc<SourceTree> {
        let tree = Arc::new(SourceTree::new(path, module_path, text, self.options));
        self.trees.push(Arc::clone(&tree));
        tree
    }

    pub fn add_tree(&mut self, tree: Arc<SourceTree>) {
        self.trees.push(tree);
    }

    pub fn trees(&self) -> &[Arc<SourceTree>] {
        &self.trees
    }

    pub fn options(&self) -> ParseOptions {
        self.options
    }

    pub fn tree_for_module(&self, module_path: &str) -> Option<&Arc<SourceTree>> {
        self.trees.iter().find(|tree| tree.module_path() == module_path)
    }

    /// Discover every `.rs` file under `root` in sorted path order.
    pub fn from_dir(root: &Path, options: ParseOptions) -> Result<Self, SourceError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|err| SourceError::Read {
                path: err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
                source: err.into(),
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        let mut compilation = Self::new(options);
        for path in files {
            let relative = path.strip_prefix(root).map_err(|_| SourceError::OutsideRoot {
                path: path.clone(),
                root: root.to_path_buf(),
            })?;
            let Some(module_path) = module_path_for(relative) else {
                if relative.extension().is_some_and(|ext| ext == "rs") {
                    log::warn!("skipping {}: not a module path", relative.display());
                }
                continue;
            };
            if compilation.tree_for_module(&module_path).is_some() {
                log::warn!("skipping {}: {} is already mounted", relative.display(), module_path);
                continue;
            }

            let text = fs::read_to_string(&path).map_err(|source| SourceError::Read {
                path: path.clone(),
                source,
            })?;
            let display = relative.to_string_lossy().replace('\\', "/");
            log::debug!("discovered {} as {}", display, module_path);
            compilation.add_source(&display, &module_path, &text);
        }

        Ok(compilation)
    }

    /// This compilation with the runtime module tree appended when missing.
    pub fn with_runtime(&self, runtime: &RuntimeModule) -> Self {
        let mut compilation = self.clone();
        if compilation.tree_for_module(&runtime.module_path()).is_none() {
            log::debug!("adding runtime module at {}", runtime.module_path());
            compilation.add_tree(runtime.tree());
        }
        compilation
    }
}

/// Syntactic kind of an indexed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Module,
    Struct,
    Enum,
    Union,
    Trait,
    TraitAlias,
    Impl,
    Fn,
    Const,
    Static,
    TypeAlias,
    Use,
    ExternCrate,
    ForeignMod,
    Macro,
    Method,
    AssocConst,
    AssocType,
    ForeignFn,
    ForeignStatic,
    ForeignType,
    Field,
    Variant,
    Other,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Module => "mod",
            NodeKind::Struct => "struct",
            NodeKind::Enum => "enum",
            NodeKind::Union => "union",
            NodeKind::Trait => "trait",
            NodeKind::TraitAlias => "trait_alias",
            NodeKind::Impl => "impl",
            NodeKind::Fn => "fn",
            NodeKind::Const => "const",
            NodeKind::Static => "static",
            NodeKind::TypeAlias => "type",
            NodeKind::Use => "use",
            NodeKind::ExternCrate => "extern_crate",
            NodeKind::ForeignMod => "foreign_mod",
            NodeKind::Macro => "macro",
            NodeKind::Method => "method",
            NodeKind::AssocConst => "assoc_const",
            NodeKind::AssocType => "assoc_type",
            NodeKind::ForeignFn => "foreign_fn",
            NodeKind::ForeignStatic => "foreign_static",
            NodeKind::ForeignType => "foreign_type",
            NodeKind::Field => "field",
            NodeKind::Variant => "variant",
            NodeKind::Other => "other",
        }
    }

    /// Structs, enums and unions.
    pub fn is_class_like(&self) -> bool {
        matches!(self, NodeKind::Struct | NodeKind::Enum | NodeKind::Union)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable node of a parsed tree.
#[derive(Debug, Clone)]
pub struct SyntaxNode {
    tree: Arc<SourceTree>,
    index: usize,
    kind: NodeKind,
    span: Span,
    range: Range<usize>,
    parent: Option<usize>,
}

impl SyntaxNode {
    pub fn new(
        tree: Arc<SourceTree>,
        index: usize,
        kind: NodeKind,
        span: Span,
        range: Range<usize>,
        parent: Option<usize>,
    ) -> Self {
        Self {
            tree,
            index,
            kind,
            span,
            range,
            parent,
        }
    }

    pub fn tree(&self) -> &Arc<SourceTree> {
        &self.tree
    }

    /// Position in the index traversal order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Source text of the node, attributes included.
    pub fn text(&self) -> &str {
        self.tree.slice(&self.range)
    }
}
