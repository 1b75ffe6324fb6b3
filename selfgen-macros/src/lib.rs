// Marker attribute for selfgen source generators. The attribute is inert: it hands the
// annotated item back unchanged so the host crate compiles as written, and the selfgen
// declaration index recognises it by its resolved path. It only rejects arguments and
// items that are not structs, enums or unions, since those can never become generators.
// The crate has no dependencies so that rustc can load it with a single --extern flag
// when compiling generator units.

//! The `#[generator]` marker attribute.
//!
//! Applied to a `struct`, `enum` or `union` that implements
//! `SourceGenerator` from the selfgen runtime module. Normally reached through
//! the runtime module's re-export (`use crate::selfgen_rt::generator;`).

use proc_macro::{TokenStream, TokenTree};

#[proc_macro_attribute]
pub fn generator(attrs: TokenStream, item: TokenStream) -> TokenStream {
    if !attrs.is_empty() {
        return with_error("#[generator] takes no arguments", item);
    }

    if !is_type_declaration(&item) {
        return with_error("#[generator] can only be applied to a struct, enum or union", item);
    }

    item
}

/// Check the item's leading tokens for a type-declaring keyword.
fn is_type_declaration(item: &TokenStream) -> bool {
    item.clone().into_iter().any(|token| match token {
        TokenTree::Ident(ident) => {
            matches!(ident.to_string().as_str(), "struct" | "enum" | "union")
        }
        _ => false,
    })
}

fn with_error(message: &str, item: TokenStream) -> TokenStream {
    let mut output: TokenStream = format!("::core::compile_error! {{ {:?} }}", message)
        .parse()
        .unwrap_or_default();
    output.extend(item);
    output
}
