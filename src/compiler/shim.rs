//! Generated crate root of a unit.
//!
//! A unit is the candidate's tree text, unmodified, mounted at its original
//! module path, plus the runtime module, wired together by a generated root
//! that exports the construct, execute and release entry points:
//!
//! ```text
//! #[path = "/tmp/selfgen-unit-x/selfgen_rt.rs"] pub mod selfgen_rt;
//! pub mod gen { #[path = "/tmp/selfgen-unit-x/src/gen/greeting.rs"] pub mod greeting; }
//! #[no_mangle] pub unsafe extern "C" fn selfgen_construct__crate__gen__greeting__Greeting(..) { .. }
//! ```
//!
//! A crate-root candidate becomes the unit root itself, with the exports
//! appended after its text.

use std::path::Path;

use proc_macro2::{Span, TokenStream};
use quote::{format_ident, quote};

use crate::runtime::selfgen_rt::{entry_symbol, CONSTRUCT_SYMBOL_PREFIX, EXECUTE_SYMBOL_PREFIX, RELEASE_SYMBOL_PREFIX};
use crate::syntax::Edition;

/// An identifier for a path segment, raw when the segment is a keyword.
fn segment_ident(segment: &str) -> syn::Ident {
    if syn::parse_str::<syn::Ident>(segment).is_ok() {
        syn::Ident::new(segment, Span::call_site())
    } else {
        syn::Ident::new_raw(segment, Span::call_site())
    }
}

/// `crate::a::b` as tokens.
fn path_tokens(path: &str) -> TokenStream {
    let segments = path
        .split("::")
        .skip_while(|segment| *segment == "crate")
        .map(segment_ident);
    quote!(crate #(:: #segments)*)
}

fn path_literal(path: &Path) -> syn::LitStr {
    syn::LitStr::new(&path.to_string_lossy(), Span::call_site())
}

/// `#[path = ".."] pub mod name;` nested under inline parents.
pub fn mount_module(module_path: &str, file: &Path) -> TokenStream {
    let segments: Vec<&str> = module_path.split("::").skip_while(|segment| *segment == "crate").collect();
    let Some((last, parents)) = segments.split_last() else {
        return TokenStream::new();
    };

    let literal = path_literal(file);
    let last = segment_ident(last);
    let mut tokens = quote! {
        #[path = #literal]
        pub mod #last;
    };
    for parent in parents.iter().rev() {
        let parent = segment_ident(parent);
        tokens = quote! {
            pub mod #parent {
                #tokens
            }
        };
    }
    tokens
}

/// The three exported entry points for `fully_qualified_name`.
pub fn entry_points(fully_qualified_name: &str, runtime_module: &str, edition: Edition) -> TokenStream {
    let ty = path_tokens(fully_qualified_name);
    let rt = path_tokens(&format!("crate::{}", runtime_module));
    let construct = format_ident!("{}", entry_symbol(CONSTRUCT_SYMBOL_PREFIX, fully_qualified_name));
    let execute = format_ident!("{}", entry_symbol(EXECUTE_SYMBOL_PREFIX, fully_qualified_name));
    let release = format_ident!("{}", entry_symbol(RELEASE_SYMBOL_PREFIX, fully_qualified_name));
    let no_mangle = match edition {
        Edition::E2024 => quote!(#[unsafe(no_mangle)]),
        _ => quote!(#[no_mangle]),
    };

    quote! {
        #no_mangle
        pub unsafe extern "C" fn #construct(sink: *const #rt::RawSink) -> *mut ::core::ffi::c_void {
            unsafe { #rt::construct_entry::<#ty>(sink) }
        }

        #no_mangle
        pub unsafe extern "C" fn #execute(
            instance: *mut ::core::ffi::c_void,
            sink: *const #rt::RawSink,
            nodes: *const #rt::RawDeclaration,
            count: usize,
        ) -> i32 {
            unsafe { #rt::execute_entry::<#ty>(instance, sink, nodes, count) }
        }

        #no_mangle
        pub unsafe extern "C" fn #release(instance: *mut ::core::ffi::c_void) {
            unsafe { #rt::release_entry::<#ty>(instance) }
        }
    }
}

/// Crate root for a candidate mounted in its own module file.
pub fn unit_root(
    fully_qualified_name: &str,
    candidate_module: &str,
    candidate_file: &Path,
    runtime_module: &str,
    runtime_file: &Path,
    edition: Edition,
) -> String {
    let runtime = mount_module(&format!("crate::{}", runtime_module), runtime_file);
    let candidate = mount_module(candidate_module, candidate_file);
    let exports = entry_points(fully_qualified_name, runtime_module, edition);
    let tokens = quote! {
        #runtime
        #candidate
        #exports
    };
    format!("// Generated by selfgen for {}.\n{}\n", fully_qualified_name, tokens)
}

/// Crate root for a candidate declared in the host's crate root.
///
/// The runtime module is mounted only when the root does not declare it.
pub fn crate_root_unit(
    fully_qualified_name: &str,
    root_text: &str,
    runtime_module: &str,
    runtime_file: &Path,
    edition: Edition,
) -> String {
    let declares_runtime = syn::parse_file(root_text).is_ok_and(|file| {
        file.items.iter().any(|item| {
            matches!(item, syn::Item::Mod(module) if module.ident == runtime_module && module.content.is_none())
        })
    });

    let mut root = root_text.to_string();
    if !root.ends_with('\n') {
        root.push('\n');
    }
    root.push_str("\n// Generated by selfgen.\n");
    if !declares_runtime {
        root.push_str(&mount_module(&format!("crate::{}", runtime_module), runtime_file).to_string());
        root.push('\n');
    }
    root.push_str(&entry_points(fully_qualified_name, runtime_module, edition).to_string());
    root.push('\n');
    root
}
