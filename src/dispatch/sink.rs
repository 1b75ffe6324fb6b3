//! Host side of the output sink handed to a unit.
//!
//! Units call back into the host through three `extern "C"` functions whose
//! state pointer is an [`InvocationSink`]. Callbacks never unwind into the
//! unit and stop forwarding to the artifact sink once the invocation is closed.
//! Names the pass writes itself, such as the diagnostic artifact, are reserved
//! and rejected before they reach the artifact sink.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::Mutex;

use crate::core::artifact::ArtifactSink;
use crate::core::error::PanicReport;
use crate::runtime::selfgen_rt::{RawFailure, RawSink, RawStr};

/// Per-invocation sink state.
pub struct InvocationSink {
    candidate: String,
    artifacts: Arc<dyn ArtifactSink>,
    reserved: Arc<HashSet<String>>,
    closed: AtomicBool,
    added: AtomicUsize,
    notes: Mutex<Vec<String>>,
    failure: Mutex<Option<PanicReport>>,
}

impl InvocationSink {
    pub fn new(
        candidate: impl Into<String>,
        artifacts: Arc<dyn ArtifactSink>,
        reserved: Arc<HashSet<String>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            candidate: candidate.into(),
            artifacts,
            reserved,
            closed: AtomicBool::new(false),
            added: AtomicUsize::new(0),
            notes: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        })
    }

    /// Callback table for the unit. Valid while `self` is alive.
    pub fn raw(self: &Arc<Self>) -> RawSink {
        RawSink {
            state: Arc::as_ptr(self) as *mut c_void,
            add_source: host_add_source,
            report: host_report,
            fail: host_fail,
        }
    }

    /// Reject everything from now on.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sources_added(&self) -> usize {
        self.added.load(Ordering::SeqCst)
    }

    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().clone()
    }

    pub fn take_failure(&self) -> Option<PanicReport> {
        self.failure.lock().take()
    }

    pub fn add_source(&self, name: &str, text: String) -> bool {
        if self.is_closed() {
            log::warn!("{} added {} after its invocation was closed", self.candidate, name);
            return false;
        }
        if self.reserved.contains(name) {
            log::warn!("{} tried to add {}, which is reserved for the pass", self.candidate, name);
            return false;
        }
        match self.artifacts.add_source(name, text) {
            Ok(()) => {
                self.added.fetch_add(1, Ordering::SeqCst);
                log::debug!("{} added {}", self.candidate, name);
                true
            }
            Err(err) => {
                log::debug!("{} could not add {}: {}", self.candidate, name, err);
                false
            }
        }
    }

    pub fn report(&self, message: String) {
        if !self.is_closed() {
            log::info!("{}: {}", self.candidate, message);
            self.notes.lock().push(message);
        }
    }

    pub fn fail(&self, report: PanicReport) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(report);
        }
    }
}

unsafe extern "C" fn host_add_source(state: *mut c_void, name: RawStr, text: RawStr) -> bool {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let sink = unsafe { &*(state as *const InvocationSink) };
        let (name, text) = unsafe { (name.to_owned_string(), text.to_owned_string()) };
        sink.add_source(&name, text)
    }))
    .unwrap_or(false)
}

unsafe extern "C" fn host_report(state: *mut c_void, message: RawStr) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        let sink = unsafe { &*(state as *const InvocationSink) };
        sink.report(unsafe { message.to_owned_string() });
    }));
}

unsafe extern "C" fn host_fail(state: *mut c_void, failure: RawFailure) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        let sink = unsafe { &*(state as *const InvocationSink) };
        let report = unsafe {
            PanicReport {
                type_name: failure.type_name.to_owned_string(),
                message: failure.message.to_owned_string(),
                location: failure.location.to_owned_string(),
                backtrace: failure.backtrace.to_owned_string(),
            }
        };
        sink.fail(report);
    }));
}
