// This module builds the declaration index of a host compilation. Every tree is parsed once;
// the ScopeTable collects scopes, imports and impl facts across all of them, then a second
// syn visitor records each declaration node in pre-order (file root, items including those
// nested in function bodies, impl and trait members, foreign items, fields and variants)
// together with a best-effort resolved Symbol. The symbol carries the canonical paths of its
// attributes and the closed set of traits the declaration implements. Candidates are the
// structs, enums and unions that carry exactly one marker attribute and implement the
// capability trait, both compared by canonical path against the runtime module's items.

//! Declaration index.
//!
//! ```ignore
//! let runtime = RuntimeModule::new("selfgen_rt", ParseOptions::default());
//! let compilation = compilation.with_runtime(&runtime);
//! let index = DeclarationIndex::build(&compilation, &runtime);
//! for candidate in index.candidates() {
//!     println!("{}", candidate.fully_qualified_name());
//! }
//! ```

use std::ops::Range;
use std::sync::Arc;

use quote::ToTokens;
use serde::Serialize;
use syn::ext::IdentExt;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};

use super::resolve::{body_scope, ScopeTable};
use super::{HostCompilation, NodeKind, SourceTree, SyntaxNode};
use crate::runtime::selfgen_rt::Span;
use crate::runtime::RuntimeModule;

/// An attribute by canonical path, with its argument tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeData {
    pub path: String,
    pub arguments: String,
}

/// Resolved description of a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub kind: NodeKind,
    pub name: String,
    pub fully_qualified_name: String,
    pub containing_namespace: String,
    pub attributes: Vec<AttributeData>,
    /// Canonical paths of every implemented trait, supertraits included.
    pub interfaces: Vec<String>,
}

impl Symbol {
    /// Number of attributes with the given canonical path.
    pub fn attribute_count(&self, path: &str) -> usize {
        self.attributes.iter().filter(|attribute| attribute.path == path).count()
    }

    pub fn implements(&self, path: &str) -> bool {
        self.interfaces.iter().any(|interface| interface == path)
    }
}

/// A node of the index and its symbol, if it has one.
#[derive(Debug, Clone)]
pub struct DeclarationRecord {
    pub node: SyntaxNode,
    pub symbol: Option<Arc<Symbol>>,
}

/// A class-like declaration eligible for compilation and invocation.
#[derive(Debug, Clone)]
pub struct Candidate {
    node: SyntaxNode,
    symbol: Arc<Symbol>,
}

impl Candidate {
    pub fn new(node: SyntaxNode, symbol: Arc<Symbol>) -> Self {
        Self { node, symbol }
    }

    pub fn node(&self) -> &SyntaxNode {
        &self.node
    }

    pub fn symbol(&self) -> &Arc<Symbol> {
        &self.symbol
    }

    pub fn tree(&self) -> &Arc<SourceTree> {
        self.node.tree()
    }

    pub fn fully_qualified_name(&self) -> &str {
        &self.symbol.fully_qualified_name
    }
}

/// Every declaration of a host compilation, and the candidates among them.
#[derive(Debug, Clone, Default)]
pub struct DeclarationIndex {
    all: Vec<DeclarationRecord>,
    candidates: Vec<Candidate>,
    marker: String,
    interface: String,
}

impl DeclarationIndex {
    pub fn build(compilation: &HostCompilation, runtime: &RuntimeModule) -> Self {
        let parsed: Vec<Option<syn::File>> = compilation
            .trees()
            .iter()
            .map(|tree| match tree.parse() {
                Ok(file) => Some(file),
                Err(err) => {
                    let start = err.span().start();
                    log::warn!(
                        "{}:{}:{}: failed to parse, indexing the file root only: {}",
                        tree.path(),
                        start.line,
                        start.column,
                        err
                    );
                    None
                }
            })
            .collect();

        let mut table = ScopeTable::new();
        for (tree, file) in compilation.trees().iter().zip(&parsed) {
            table.add_file(tree.module_path(), file.as_ref());
        }
        table.finish();

        let marker = table.canonicalize(&runtime.marker_path());
        let interface = table.canonicalize(&runtime.interface_path());
        log::debug!("marker attribute resolves to {}, capability trait to {}", marker, interface);

        let mut all = Vec::new();
        for (tree, file) in compilation.trees().iter().zip(&parsed) {
            let mut recorder = Recorder {
                table: &table,
                tree,
                records: &mut all,
                parents: Vec::new(),
                scopes: vec![tree.module_path().to_string()],
                containers: Vec::new(),
            };
            recorder.record_file(file.as_ref());
        }

        let candidates: Vec<Candidate> = all
            .iter()
            .filter(|record| record.node.kind().is_class_like())
            .filter_map(|record| {
                let symbol = record.symbol.as_ref()?;
                let is_candidate = symbol.attribute_count(&marker) == 1 && symbol.implements(&interface);
                is_candidate.then(|| Candidate::new(record.node.clone(), Arc::clone(symbol)))
            })
            .collect();

        log::info!(
            "indexed {} declarations in {} trees, {} candidates",
            all.len(),
            compilation.trees().len(),
            candidates.len()
        );

        Self {
            all,
            candidates,
            marker,
            interface,
        }
    }

    pub fn all(&self) -> &[DeclarationRecord] {
        &self.all
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Canonical path of the marker attribute.
    pub fn marker_path(&self) -> &str {
        &self.marker
    }

    /// Canonical path of the capability trait.
    pub fn interface_path(&self) -> &str {
        &self.interface
    }

    /// First record whose symbol has the given fully qualified name.
    pub fn find(&self, fully_qualified_name: &str) -> Option<&DeclarationRecord> {
        self.all.iter().find(|record| {
            record
                .symbol
                .as_ref()
                .is_some_and(|symbol| symbol.fully_qualified_name == fully_qualified_name)
        })
    }

    pub fn into_parts(self) -> (Vec<DeclarationRecord>, Vec<Candidate>) {
        (self.all, self.candidates)
    }
}

/// Phase two: records in traversal order.
struct Recorder<'a> {
    table: &'a ScopeTable,
    tree: &'a Arc<SourceTree>,
    records: &'a mut Vec<DeclarationRecord>,
    parents: Vec<usize>,
    scopes: Vec<String>,
    /// Fully qualified name of the enclosing type, trait or variant.
    containers: Vec<String>,
}

impl Recorder<'_> {
    fn scope(&self) -> &str {
        self.scopes.last().map(String::as_str).unwrap_or("crate")
    }

    fn container(&self) -> String {
        self.containers.last().cloned().unwrap_or_else(|| self.scope().to_string())
    }

    fn record_file(&mut self, file: Option<&syn::File>) {
        let range = 0..self.tree.text().len();
        let root = self.push(NodeKind::File, self.tree.full_span(), range, None);
        let Some(file) = file else {
            return;
        };
        self.parents.push(root);
        for item in &file.items {
            self.visit_item(item);
        }
        self.parents.pop();
    }

    fn push(&mut self, kind: NodeKind, span: Span, range: Range<usize>, symbol: Option<Arc<Symbol>>) -> usize {
        let index = self.records.len();
        let node = SyntaxNode::new(
            Arc::clone(self.tree),
            index,
            kind,
            span,
            range,
            self.parents.last().copied(),
        );
        self.records.push(DeclarationRecord { node, symbol });
        index
    }

    fn record(&mut self, kind: NodeKind, node: &impl Spanned, symbol: Option<Arc<Symbol>>) -> usize {
        let span = node.span();
        let (start, end) = (span.start(), span.end());
        let range = self.tree.offset(start.line, start.column)..self.tree.offset(end.line, end.column);
        let span = Span {
            start_line: start.line as u32,
            start_column: start.column as u32,
            end_line: end.line as u32,
            end_column: end.column as u32,
        };
        self.push(kind, span, range, symbol)
    }

    fn symbol(
        &self,
        kind: NodeKind,
        name: String,
        namespace: String,
        attrs: &[syn::Attribute],
        interfaces: Vec<String>,
    ) -> Arc<Symbol> {
        let fully_qualified_name = format!("{}::{}", namespace, name);
        let attributes = attrs.iter().map(|attr| self.attribute(attr)).collect();
        Arc::new(Symbol {
            kind,
            name,
            fully_qualified_name,
            containing_namespace: namespace,
            attributes,
            interfaces,
        })
    }

    /// Symbol of an item declared directly in the current scope.
    fn item_symbol(&self, kind: NodeKind, ident: &syn::Ident, attrs: &[syn::Attribute]) -> Arc<Symbol> {
        let name = ident.unraw().to_string();
        let namespace = self.scope().to_string();
        let interfaces = match kind {
            NodeKind::Struct | NodeKind::Enum | NodeKind::Union => {
                self.table.interfaces_of(&format!("{}::{}", namespace, name))
            }
            NodeKind::Trait | NodeKind::TraitAlias => self.table.supertraits_of(&format!("{}::{}", namespace, name)),
            _ => Vec::new(),
        };
        self.symbol(kind, name, namespace, attrs, interfaces)
    }

    /// Symbol of a member of the enclosing type or trait.
    fn member_symbol(&self, kind: NodeKind, name: String, attrs: &[syn::Attribute]) -> Arc<Symbol> {
        self.symbol(kind, name, self.container(), attrs, Vec::new())
    }

    fn attribute(&self, attr: &syn::Attribute) -> AttributeData {
        let path = self
            .table
            .resolve_path(self.scope(), attr.path())
            .unwrap_or_else(|| attr.path().to_token_stream().to_string());
        let arguments = match &attr.meta {
            syn::Meta::Path(_) => String::new(),
            syn::Meta::List(list) => list.tokens.to_string(),
            syn::Meta::NameValue(name_value) => name_value.value.to_token_stream().to_string(),
        };
        AttributeData { path, arguments }
    }

    /// Record a node and visit its children beneath it.
    fn nested(&mut self, index: usize, container: Option<String>, children: impl FnOnce(&mut Self)) {
        self.parents.push(index);
        let has_container = container.is_some();
        if let Some(container) = container {
            self.containers.push(container);
        }
        children(self);
        if has_container {
            self.containers.pop();
        }
        self.parents.pop();
    }

    fn in_body(&mut self, ident: &syn::Ident, body: impl FnOnce(&mut Self)) {
        let scope = body_scope(self.scope(), ident);
        self.scopes.push(scope);
        // Items in a body are not members of the enclosing type.
        let containers = std::mem::take(&mut self.containers);
        body(self);
        self.containers = containers;
        self.scopes.pop();
    }

    fn record_fields(&mut self, fields: &syn::Fields) {
        for (position, field) in fields.iter().enumerate() {
            let name = match &field.ident {
                Some(ident) => ident.unraw().to_string(),
                None => position.to_string(),
            };
            let symbol = self.member_symbol(NodeKind::Field, name, &field.attrs);
            let index = self.record(NodeKind::Field, field, Some(symbol));
            self.nested(index, None, |this| visit::visit_field(this, field));
        }
    }
}

impl<'ast> Visit<'ast> for Recorder<'_> {
    fn visit_item(&mut self, node: &'ast syn::Item) {
        match node {
            syn::Item::Verbatim(tokens) => {
                self.record(NodeKind::Other, tokens, None);
            }
            _ => visit::visit_item(self, node),
        }
    }

    fn visit_item_struct(&mut self, node: &'ast syn::ItemStruct) {
        let symbol = self.item_symbol(NodeKind::Struct, &node.ident, &node.attrs);
        let fqn = symbol.fully_qualified_name.clone();
        let index = self.record(NodeKind::Struct, node, Some(symbol));
        self.nested(index, Some(fqn), |this| this.record_fields(&node.fields));
    }

    fn visit_item_enum(&mut self, node: &'ast syn::ItemEnum) {
        let symbol = self.item_symbol(NodeKind::Enum, &node.ident, &node.attrs);
        let fqn = symbol.fully_qualified_name.clone();
        let index = self.record(NodeKind::Enum, node, Some(symbol));
        self.nested(index, Some(fqn), |this| {
            for variant in &node.variants {
                this.visit_variant(variant);
            }
        });
    }

    fn visit_variant(&mut self, node: &'ast syn::Variant) {
        let symbol = self.member_symbol(NodeKind::Variant, node.ident.unraw().to_string(), &node.attrs);
        let fqn = symbol.fully_qualified_name.clone();
        let index = self.record(NodeKind::Variant, node, Some(symbol));
        self.nested(index, Some(fqn), |this| {
            this.record_fields(&node.fields);
            if let Some((_, discriminant)) = &node.discriminant {
                this.visit_expr(discriminant);
            }
        });
    }

    fn visit_item_union(&mut self, node: &'ast syn::ItemUnion) {
        let symbol = self.item_symbol(NodeKind::Union, &node.ident, &node.attrs);
        let fqn = symbol.fully_qualified_name.clone();
        let index = self.record(NodeKind::Union, node, Some(symbol));
        let fields = syn::Fields::Named(node.fields.clone());
        self.nested(index, Some(fqn), |this| this.record_fields(&fields));
    }

    fn visit_item_trait(&mut self, node: &'ast syn::ItemTrait) {
        let symbol = self.item_symbol(NodeKind::Trait, &node.ident, &node.attrs);
        let fqn = symbol.fully_qualified_name.clone();
        let index = self.record(NodeKind::Trait, node, Some(symbol));
        self.nested(index, Some(fqn), |this| {
            for item in &node.items {
                this.visit_trait_item(item);
            }
        });
    }

    fn visit_item_trait_alias(&mut self, node: &'ast syn::ItemTraitAlias) {
        let symbol = self.item_symbol(NodeKind::TraitAlias, &node.ident, &node.attrs);
        self.record(NodeKind::TraitAlias, node, Some(symbol));
    }

    fn visit_item_impl(&mut self, node: &'ast syn::ItemImpl) {
        let self_ty = self.table.resolve_type(self.scope(), &node.self_ty);
        let index = self.record(NodeKind::Impl, node, None);
        self.nested(index, Some(self_ty), |this| {
            for item in &node.items {
                this.visit_impl_item(item);
            }
        });
    }

    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        let symbol = self.item_symbol(NodeKind::Fn, &node.sig.ident, &node.attrs);
        let index = self.record(NodeKind::Fn, node, Some(symbol));
        self.nested(index, None, |this| {
            this.in_body(&node.sig.ident, |this| visit::visit_block(this, &node.block));
        });
    }

    fn visit_item_mod(&mut self, node: &'ast syn::ItemMod) {
        let symbol = self.item_symbol(NodeKind::Module, &node.ident, &node.attrs);
        let module = symbol.fully_qualified_name.clone();
        let index = self.record(NodeKind::Module, node, Some(symbol));
        if let Some((_, items)) = &node.content {
            self.nested(index, None, |this| {
                this.scopes.push(module);
                for item in items {
                    this.visit_item(item);
                }
                this.scopes.pop();
            });
        }
    }

    fn visit_item_const(&mut self, node: &'ast syn::ItemConst) {
        let symbol = self.item_symbol(NodeKind::Const, &node.ident, &node.attrs);
        let index = self.record(NodeKind::Const, node, Some(symbol));
        self.nested(index, None, |this| this.visit_expr(&node.expr));
    }

    fn visit_item_static(&mut self, node: &'ast syn::ItemStatic) {
        let symbol = self.item_symbol(NodeKind::Static, &node.ident, &node.attrs);
        let index = self.record(NodeKind::Static, node, Some(symbol));
        self.nested(index, None, |this| this.visit_expr(&node.expr));
    }

    fn visit_item_type(&mut self, node: &'ast syn::ItemType) {
        let symbol = self.item_symbol(NodeKind::TypeAlias, &node.ident, &node.attrs);
        self.record(NodeKind::TypeAlias, node, Some(symbol));
    }

    fn visit_item_use(&mut self, node: &'ast syn::ItemUse) {
        self.record(NodeKind::Use, node, None);
    }

    fn visit_item_extern_crate(&mut self, node: &'ast syn::ItemExternCrate) {
        self.record(NodeKind::ExternCrate, node, None);
    }

    fn visit_item_macro(&mut self, node: &'ast syn::ItemMacro) {
        let symbol = node
            .ident
            .as_ref()
            .map(|ident| self.item_symbol(NodeKind::Macro, ident, &node.attrs));
        self.record(NodeKind::Macro, node, symbol);
    }

    fn visit_item_foreign_mod(&mut self, node: &'ast syn::ItemForeignMod) {
        let index = self.record(NodeKind::ForeignMod, node, None);
        self.nested(index, None, |this| {
            for item in &node.items {
                this.visit_foreign_item(item);
            }
        });
    }

    fn visit_foreign_item(&mut self, node: &'ast syn::ForeignItem) {
        let (kind, ident, attrs) = match node {
            syn::ForeignItem::Fn(item) => (NodeKind::ForeignFn, Some(&item.sig.ident), &item.attrs),
            syn::ForeignItem::Static(item) => (NodeKind::ForeignStatic, Some(&item.ident), &item.attrs),
            syn::ForeignItem::Type(item) => (NodeKind::ForeignType, Some(&item.ident), &item.attrs),
            syn::ForeignItem::Macro(item) => (NodeKind::Macro, None, &item.attrs),
            _ => {
                self.record(NodeKind::Other, node, None);
                return;
            }
        };
        let symbol = ident.map(|ident| self.item_symbol(kind, ident, attrs));
        self.record(kind, node, symbol);
    }

    fn visit_impl_item(&mut self, node: &'ast syn::ImplItem) {
        match node {
            syn::ImplItem::Fn(item) => {
                let symbol = self.member_symbol(NodeKind::Method, item.sig.ident.unraw().to_string(), &item.attrs);
                let index = self.record(NodeKind::Method, item, Some(symbol));
                self.nested(index, None, |this| {
                    this.in_body(&item.sig.ident, |this| visit::visit_block(this, &item.block));
                });
            }
            syn::ImplItem::Const(item) => {
                let symbol = self.member_symbol(NodeKind::AssocConst, item.ident.unraw().to_string(), &item.attrs);
                let index = self.record(NodeKind::AssocConst, item, Some(symbol));
                self.nested(index, None, |this| this.visit_expr(&item.expr));
            }
            syn::ImplItem::Type(item) => {
                let symbol = self.member_symbol(NodeKind::AssocType, item.ident.unraw().to_string(), &item.attrs);
                self.record(NodeKind::AssocType, item, Some(symbol));
            }
            syn::ImplItem::Macro(item) => {
                self.record(NodeKind::Macro, item, None);
            }
            _ => {
                self.record(NodeKind::Other, node, None);
            }
        }
    }

    fn visit_trait_item(&mut self, node: &'ast syn::TraitItem) {
        match node {
            syn::TraitItem::Fn(item) => {
                let symbol = self.member_symbol(NodeKind::Method, item.sig.ident.unraw().to_string(), &item.attrs);
                let index = self.record(NodeKind::Method, item, Some(symbol));
                if let Some(block) = &item.default {
                    self.nested(index, None, |this| {
                        this.in_body(&item.sig.ident, |this| visit::visit_block(this, block));
                    });
                }
            }
            syn::TraitItem::Const(item) => {
                let symbol = self.member_symbol(NodeKind::AssocConst, item.ident.unraw().to_string(), &item.attrs);
                let index = self.record(NodeKind::AssocConst, item, Some(symbol));
                if let Some((_, expr)) = &item.default {
                    self.nested(index, None, |this| this.visit_expr(expr));
                }
            }
            syn::TraitItem::Type(item) => {
                let symbol = self.member_symbol(NodeKind::AssocType, item.ident.unraw().to_string(), &item.attrs);
                self.record(NodeKind::AssocType, item, Some(symbol));
            }
            syn::TraitItem::Macro(item) => {
                self.record(NodeKind::Macro, item, None);
            }
            _ => {
                self.record(NodeKind::Other, node, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::ParseOptions;

    fn index(files: &[(&str, &str)]) -> DeclarationIndex {
        let runtime = RuntimeModule::new("selfgen_rt", ParseOptions::default());
        let mut compilation = HostCompilation::new(ParseOptions::default());
        for (module, text) in files {
            compilation.add_source(&format!("{}.rs", module.replace("::", "/")), module, text);
        }
        DeclarationIndex::build(&compilation.with_runtime(&runtime), &runtime)
    }

    #[test]
    fn test_records_in_traversal_order() {
        let index = index(&[(
            "crate",
            "mod selfgen_rt;\nstruct A { x: u8, y: u8 }\nenum E { One(u8), Two }\nfn f() { struct Local; }\n",
        )]);

        let names: Vec<String> = index
            .all()
            .iter()
            .take_while(|record| record.node.tree().module_path() == "crate")
            .map(|record| match &record.symbol {
                Some(symbol) => symbol.fully_qualified_name.clone(),
                None => record.node.kind().to_string(),
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "file",
                "crate::selfgen_rt",
                "crate::A",
                "crate::A::x",
                "crate::A::y",
                "crate::E",
                "crate::E::One",
                "crate::E::One::0",
                "crate::E::Two",
                "crate::f",
                "crate::f::Local",
            ]
        );

        for (position, record) in index.all().iter().enumerate() {
            assert_eq!(record.node.index(), position);
            if let Some(parent) = record.node.parent() {
                assert!(parent < position);
            }
        }
    }

    #[test]
    fn test_spans_and_text() {
        let index = index(&[("crate", "mod selfgen_rt;\n\n/// Docs.\npub struct Greeting;\n")]);
        let record = index.find("crate::Greeting").unwrap();
        let span = record.node.span();
        assert_eq!((span.start_line, span.start_column), (3, 0));
        assert_eq!((span.end_line, span.end_column), (4, 20));
        assert_eq!(record.node.text(), "/// Docs.\npub struct Greeting;");
    }

    #[test]
    fn test_candidate_requires_marker_and_trait() {
        let source = r#"
mod selfgen_rt;
use crate::selfgen_rt::{generator, SourceGenerator, GeneratorContext, Declaration, GeneratorResult};

#[generator]
#[derive(Default)]
pub struct Good;
impl SourceGenerator for Good {
    fn on_execute(&mut self, _: &mut GeneratorContext<'_>, _: &[Declaration]) -> GeneratorResult { Ok(()) }
}

#[generator]
#[generator]
pub struct Twice;
impl SourceGenerator for Twice {
    fn on_execute(&mut self, _: &mut GeneratorContext<'_>, _: &[Declaration]) -> GeneratorResult { Ok(()) }
}

#[generator]
pub struct NoImpl;

pub struct NoMarker;
impl SourceGenerator for NoMarker {
    fn on_execute(&mut self, _: &mut GeneratorContext<'_>, _: &[Declaration]) -> GeneratorResult { Ok(()) }
}
"#;
        let index = index(&[("crate", source)]);
        let names: Vec<&str> = index.candidates().iter().map(|c| c.fully_qualified_name()).collect();
        assert_eq!(names, vec!["crate::Good"]);
        assert_eq!(index.marker_path(), "selfgen_macros::generator");
        assert_eq!(index.interface_path(), "crate::selfgen_rt::SourceGenerator");
    }

    #[test]
    fn test_unparsable_file_contributes_root_only() {
        let index = index(&[("crate", "mod selfgen_rt;"), ("crate::broken", "struct {")]);
        let broken: Vec<_> = index
            .all()
            .iter()
            .filter(|record| record.node.tree().module_path() == "crate::broken")
            .collect();
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].node.kind(), NodeKind::File);
        assert!(broken[0].symbol.is_none());
    }
}
