//! Declaration marshalling.
//!
//! The index is converted once per pass into `#[repr(C)]` arrays that every
//! unit of the pass reads. The arrays borrow the strings of the records they
//! were built from, so the records are kept alive alongside them.

use super::selfgen_rt::{declarations_from_raw, Declaration, RawDeclaration, RawStr, RawSymbol};
use crate::syntax::{DeclarationRecord, Symbol};

/// Boundary view of a declaration index.
pub struct MarshalledDeclarations {
    declarations: Vec<RawDeclaration>,
    // Everything below only keeps pointed-to memory alive.
    _symbols: Vec<Box<RawSymbol>>,
    _lists: Vec<Vec<RawStr>>,
    _records: Vec<DeclarationRecord>,
}

// The raw pointers only reference heap data owned by this value, which is
// never mutated after construction.
unsafe impl Send for MarshalledDeclarations {}
unsafe impl Sync for MarshalledDeclarations {}

impl MarshalledDeclarations {
    pub fn new(records: &[DeclarationRecord]) -> Self {
        let records = records.to_vec();
        let mut symbols = Vec::new();
        let mut lists = Vec::new();
        let mut declarations = Vec::with_capacity(records.len());

        for record in &records {
            let symbol = match &record.symbol {
                Some(symbol) => {
                    let raw = Box::new(raw_symbol(symbol, &mut lists));
                    let ptr: *const RawSymbol = &*raw;
                    symbols.push(raw);
                    ptr
                }
                None => std::ptr::null(),
            };

            let node = &record.node;
            declarations.push(RawDeclaration {
                kind: RawStr::new(node.kind().as_str()),
                file: RawStr::new(node.tree().path()),
                text: RawStr::new(node.text()),
                span: node.span(),
                parent: node.parent().map_or(-1, |parent| parent as isize),
                symbol,
            });
        }

        Self {
            declarations,
            _symbols: symbols,
            _lists: lists,
            _records: records,
        }
    }

    pub fn as_ptr(&self) -> *const RawDeclaration {
        self.declarations.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Read the arrays back the way a unit does.
    pub fn to_declarations(&self) -> Vec<Declaration> {
        unsafe { declarations_from_raw(self.as_ptr(), self.len()) }
    }
}

impl std::fmt::Debug for MarshalledDeclarations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarshalledDeclarations")
            .field("declarations", &self.declarations.len())
            .field("symbols", &self._symbols.len())
            .finish()
    }
}

fn raw_symbol(symbol: &Symbol, lists: &mut Vec<Vec<RawStr>>) -> RawSymbol {
    let attributes: Vec<RawStr> = symbol.attributes.iter().map(|attribute| RawStr::new(&attribute.path)).collect();
    let interfaces: Vec<RawStr> = symbol.interfaces.iter().map(|interface| RawStr::new(interface)).collect();

    let raw = RawSymbol {
        kind: RawStr::new(symbol.kind.as_str()),
        name: RawStr::new(&symbol.name),
        fully_qualified_name: RawStr::new(&symbol.fully_qualified_name),
        containing_namespace: RawStr::new(&symbol.containing_namespace),
        attributes: attributes.as_ptr(),
        attribute_count: attributes.len(),
        interfaces: interfaces.as_ptr(),
        interface_count: interfaces.len(),
    };
    lists.push(attributes);
    lists.push(interfaces);
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeModule;
    use crate::syntax::{DeclarationIndex, HostCompilation, ParseOptions};

    #[test]
    fn test_marshalled_view_matches_index() {
        let runtime = RuntimeModule::default();
        let mut compilation = HostCompilation::new(ParseOptions::default());
        compilation.add_source(
            "lib.rs",
            "crate",
            "mod selfgen_rt;\n#[derive(Debug)]\npub struct Point { pub x: i32 }\nimpl Point { fn new() {} }\n",
        );
        let index = DeclarationIndex::build(&compilation.with_runtime(&runtime), &runtime);
        let marshalled = MarshalledDeclarations::new(index.all());
        assert_eq!(marshalled.len(), index.all().len());

        let declarations = marshalled.to_declarations();
        let point = declarations.iter().find(|d| d.name() == Some("Point")).unwrap();
        assert_eq!(point.kind, "struct");
        assert_eq!(point.file, "lib.rs");
        assert_eq!(point.text, "#[derive(Debug)]\npub struct Point { pub x: i32 }");
        assert_eq!(point.span.start_line, 2);
        let symbol = point.symbol.as_ref().unwrap();
        assert_eq!(symbol.fully_qualified_name, "crate::Point");
        assert_eq!(symbol.containing_namespace, "crate");
        assert_eq!(symbol.attributes, vec!["derive".to_string()]);

        let field = &declarations[point.index + 1];
        assert_eq!(field.parent, Some(point.index));
        assert_eq!(field.symbol.as_ref().unwrap().fully_qualified_name, "crate::Point::x");

        let method = declarations.iter().find(|d| d.name() == Some("new")).unwrap();
        assert_eq!(method.symbol.as_ref().unwrap().containing_namespace, "crate::Point");

        let root = &declarations[0];
        assert_eq!(root.kind, "file");
        assert!(root.symbol.is_none());
        assert_eq!(root.parent, None);
    }
}
