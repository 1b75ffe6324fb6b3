//! selfgen runtime support module.
//!
//! This file is compiled verbatim into the host crate (as `crate::selfgen_rt`)
//! and into every generator unit built from it. Two copies of the same text
//! give two distinct Rust types, so everything that crosses the unit boundary
//! is `#[repr(C)]` and is matched by layout and by exported symbol name, never
//! by type identity.
//!
//! Generator authors only need [`generator`], [`SourceGenerator`],
//! [`GeneratorContext`], [`Declaration`] and [`GeneratorResult`]:
//!
//! ```ignore
//! use crate::selfgen_rt::{generator, Declaration, GeneratorContext, GeneratorResult, SourceGenerator};
//!
//! #[generator]
//! #[derive(Default)]
//! pub struct Greeting;
//!
//! impl SourceGenerator for Greeting {
//!     fn on_execute(&mut self, context: &mut GeneratorContext<'_>, _nodes: &[Declaration]) -> GeneratorResult {
//!         context.add_source("Greeting.g.rs", "pub struct Greeting {}");
//!         Ok(())
//!     }
//! }
//! ```

#![allow(dead_code)]

use std::any::Any;
use std::backtrace::Backtrace;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::{Mutex, Once};

pub use selfgen_macros::generator;

/// Bumped whenever a boundary type or entry signature changes.
pub const RUNTIME_VERSION: u32 = 1;

pub type GeneratorResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Capability trait every `#[generator]` type implements.
///
/// The host never calls this through a trait object. It reaches
/// `on_execute` through the unit's exported execute symbol.
pub trait SourceGenerator {
    fn on_execute(&mut self, context: &mut GeneratorContext<'_>, nodes: &[Declaration]) -> GeneratorResult;
}

/// Source span: 1-based lines, 0-based character columns.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

/// Resolved description of a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub kind: String,
    pub name: String,
    pub fully_qualified_name: String,
    pub containing_namespace: String,
    /// Canonical paths of the attributes on the declaration.
    pub attributes: Vec<String>,
    /// Canonical paths of every trait the declaration implements.
    pub interfaces: Vec<String>,
}

impl Symbol {
    pub fn has_attribute(&self, path: &str) -> bool {
        self.attributes.iter().any(|attribute| attribute == path)
    }

    pub fn implements(&self, path: &str) -> bool {
        self.interfaces.iter().any(|interface| interface == path)
    }
}

/// One node of the host's declaration index, as seen by generator code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub index: usize,
    pub kind: String,
    pub file: String,
    pub text: String,
    pub span: Span,
    pub parent: Option<usize>,
    pub symbol: Option<Symbol>,
}

impl Declaration {
    pub fn name(&self) -> Option<&str> {
        self.symbol.as_ref().map(|symbol| symbol.name.as_str())
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

/// Output sink handed to [`SourceGenerator::on_execute`].
pub struct GeneratorContext<'a> {
    sink: &'a RawSink,
    added: usize,
}

impl<'a> GeneratorContext<'a> {
    /// # Safety
    ///
    /// The callbacks in `sink` must be valid to call with `sink.state` for `'a`.
    pub unsafe fn from_raw(sink: &'a RawSink) -> Self {
        GeneratorContext { sink, added: 0 }
    }

    /// Add a generated source file. Panics if the host rejects the name,
    /// which happens when it is already taken in this pass or reserved for
    /// the pass itself.
    pub fn add_source(&mut self, name: &str, text: &str) {
        let accepted = unsafe { (self.sink.add_source)(self.sink.state, RawStr::new(name), RawStr::new(text)) };
        if !accepted {
            panic!("generated source `{}` was rejected by the host (duplicate or reserved name)", name);
        }
        self.added += 1;
    }

    /// Send a note to the host. Notes are logged and carried back in the
    /// invocation report; they never become diagnostics.
    pub fn report(&mut self, message: &str) {
        unsafe { (self.sink.report)(self.sink.state, RawStr::new(message)) }
    }

    pub fn sources_added(&self) -> usize {
        self.added
    }
}

// Boundary types.

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStr {
    pub ptr: *const u8,
    pub len: usize,
}

impl RawStr {
    pub const EMPTY: RawStr = RawStr { ptr: ptr::null(), len: 0 };

    pub fn new(text: &str) -> Self {
        RawStr { ptr: text.as_ptr(), len: text.len() }
    }

    /// # Safety
    ///
    /// `ptr` must be null or point at `len` readable bytes.
    pub unsafe fn to_owned_string(self) -> String {
        if self.ptr.is_null() || self.len == 0 {
            return String::new();
        }
        let bytes = unsafe { slice::from_raw_parts(self.ptr, self.len) };
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct RawSymbol {
    pub kind: RawStr,
    pub name: RawStr,
    pub fully_qualified_name: RawStr,
    pub containing_namespace: RawStr,
    pub attributes: *const RawStr,
    pub attribute_count: usize,
    pub interfaces: *const RawStr,
    pub interface_count: usize,
}

impl RawSymbol {
    /// # Safety
    ///
    /// Every pointer in `self` must be valid for its stated length.
    pub unsafe fn to_symbol(&self) -> Symbol {
        unsafe {
            Symbol {
                kind: self.kind.to_owned_string(),
                name: self.name.to_owned_string(),
                fully_qualified_name: self.fully_qualified_name.to_owned_string(),
                containing_namespace: self.containing_namespace.to_owned_string(),
                attributes: raw_list(self.attributes, self.attribute_count),
                interfaces: raw_list(self.interfaces, self.interface_count),
            }
        }
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct RawDeclaration {
    pub kind: RawStr,
    pub file: RawStr,
    pub text: RawStr,
    pub span: Span,
    /// Index of the parent declaration, or -1.
    pub parent: isize,
    /// Null when the declaration has no symbol.
    pub symbol: *const RawSymbol,
}

impl RawDeclaration {
    /// # Safety
    ///
    /// Every pointer in `self` must be valid for its stated length.
    pub unsafe fn to_declaration(&self, index: usize) -> Declaration {
        unsafe {
            Declaration {
                index,
                kind: self.kind.to_owned_string(),
                file: self.file.to_owned_string(),
                text: self.text.to_owned_string(),
                span: self.span,
                parent: if self.parent < 0 { None } else { Some(self.parent as usize) },
                symbol: if self.symbol.is_null() { None } else { Some((*self.symbol).to_symbol()) },
            }
        }
    }
}

/// # Safety
///
/// `nodes` must be null or point at `count` valid declarations.
pub unsafe fn declarations_from_raw(nodes: *const RawDeclaration, count: usize) -> Vec<Declaration> {
    if nodes.is_null() || count == 0 {
        return Vec::new();
    }
    let raw = unsafe { slice::from_raw_parts(nodes, count) };
    raw.iter()
        .enumerate()
        .map(|(index, node)| unsafe { node.to_declaration(index) })
        .collect()
}

unsafe fn raw_list(items: *const RawStr, count: usize) -> Vec<String> {
    if items.is_null() || count == 0 {
        return Vec::new();
    }
    let raw = unsafe { slice::from_raw_parts(items, count) };
    raw.iter().map(|item| unsafe { item.to_owned_string() }).collect()
}

/// Panic or error details reported by a unit.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawFailure {
    pub type_name: RawStr,
    pub message: RawStr,
    pub location: RawStr,
    pub backtrace: RawStr,
}

pub type AddSourceFn = unsafe extern "C" fn(*mut c_void, RawStr, RawStr) -> bool;
pub type ReportFn = unsafe extern "C" fn(*mut c_void, RawStr);
pub type FailFn = unsafe extern "C" fn(*mut c_void, RawFailure);

/// Host callbacks. `state` is opaque to the unit.
#[repr(C)]
pub struct RawSink {
    pub state: *mut c_void,
    pub add_source: AddSourceFn,
    pub report: ReportFn,
    pub fail: FailFn,
}

// Entry points.

pub const STATUS_OK: i32 = 0;
pub const STATUS_RETURNED_ERROR: i32 = 1;
pub const STATUS_PANICKED: i32 = 2;
pub const STATUS_NO_INSTANCE: i32 = 3;

pub type ConstructEntry = unsafe extern "C" fn(*const RawSink) -> *mut c_void;
pub type ExecuteEntry = unsafe extern "C" fn(*mut c_void, *const RawSink, *const RawDeclaration, usize) -> i32;
pub type ReleaseEntry = unsafe extern "C" fn(*mut c_void);

pub const CONSTRUCT_SYMBOL_PREFIX: &str = "selfgen_construct__";
pub const EXECUTE_SYMBOL_PREFIX: &str = "selfgen_on_execute__";
pub const RELEASE_SYMBOL_PREFIX: &str = "selfgen_release__";

/// Exported symbol name of an entry point for a fully qualified type name.
pub fn entry_symbol(prefix: &str, fully_qualified_name: &str) -> String {
    let mangled: String = fully_qualified_name
        .replace("::", "__")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("{}{}", prefix, mangled)
}

/// Build one `T` through `Default`.
///
/// # Safety
///
/// `sink` must be null or valid for the duration of the call.
pub unsafe fn construct_entry<T: SourceGenerator + Default>(sink: *const RawSink) -> *mut c_void {
    capture_panics();
    match panic::catch_unwind(T::default) {
        Ok(instance) => Box::into_raw(Box::new(instance)) as *mut c_void,
        Err(payload) => {
            unsafe { report_panic(sink, payload) };
            ptr::null_mut()
        }
    }
}

/// Run `on_execute` on an instance made by [`construct_entry`].
///
/// # Safety
///
/// `instance` must come from `construct_entry::<T>`; `sink` and `nodes`
/// must be valid for the duration of the call.
pub unsafe fn execute_entry<T: SourceGenerator>(
    instance: *mut c_void,
    sink: *const RawSink,
    nodes: *const RawDeclaration,
    count: usize,
) -> i32 {
    capture_panics();
    if instance.is_null() || sink.is_null() {
        return STATUS_NO_INSTANCE;
    }
    let generator = unsafe { &mut *(instance as *mut T) };
    let sink_ref = unsafe { &*sink };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let declarations = unsafe { declarations_from_raw(nodes, count) };
        let mut context = unsafe { GeneratorContext::from_raw(sink_ref) };
        generator.on_execute(&mut context, &declarations)
    }));

    match outcome {
        Ok(Ok(())) => STATUS_OK,
        Ok(Err(error)) => {
            unsafe { fail(sink_ref, "generator error", &error.to_string(), "", "") };
            STATUS_RETURNED_ERROR
        }
        Err(payload) => {
            unsafe { report_panic(sink, payload) };
            STATUS_PANICKED
        }
    }
}

/// # Safety
///
/// `instance` must be null or come from `construct_entry::<T>`, and must not
/// be used afterwards.
pub unsafe fn release_entry<T>(instance: *mut c_void) {
    if instance.is_null() {
        return;
    }
    let _ = panic::catch_unwind(AssertUnwindSafe(|| drop(unsafe { Box::from_raw(instance as *mut T) })));
}

// Panic capture. Each unit links its own copy of std, so the hook installed
// here only sees panics raised inside the unit.

struct PanicSite {
    location: String,
    backtrace: String,
}

static LAST_PANIC: Mutex<Option<PanicSite>> = Mutex::new(None);
static PANIC_HOOK: Once = Once::new();

fn capture_panics() {
    PANIC_HOOK.call_once(|| {
        panic::set_hook(Box::new(|info| {
            let site = PanicSite {
                location: info.location().map(|location| location.to_string()).unwrap_or_default(),
                backtrace: Backtrace::force_capture().to_string(),
            };
            if let Ok(mut slot) = LAST_PANIC.lock() {
                *slot = Some(site);
            }
        }));
    });
}

fn describe_payload(payload: &(dyn Any + Send)) -> (&'static str, String) {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        ("&str", (*message).to_string())
    } else if let Some(message) = payload.downcast_ref::<String>() {
        ("alloc::string::String", message.clone())
    } else {
        ("Box<dyn Any + Send>", String::from("panic payload is not a string"))
    }
}

unsafe fn report_panic(sink: *const RawSink, payload: Box<dyn Any + Send>) {
    let (type_name, message) = describe_payload(&*payload);
    let site = LAST_PANIC.lock().ok().and_then(|mut slot| slot.take());
    let (location, backtrace) = match site {
        Some(site) => (site.location, site.backtrace),
        None => (String::new(), String::new()),
    };
    if sink.is_null() {
        return;
    }
    unsafe { fail(&*sink, type_name, &message, &location, &backtrace) }
}

unsafe fn fail(sink: &RawSink, type_name: &str, message: &str, location: &str, backtrace: &str) {
    let failure = RawFailure {
        type_name: RawStr::new(type_name),
        message: RawStr::new(message),
        location: RawStr::new(location),
        backtrace: RawStr::new(backtrace),
    };
    unsafe { (sink.fail)(sink.state, failure) }
}
