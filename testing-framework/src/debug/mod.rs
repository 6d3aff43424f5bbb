// File: testing-framework/src/debug/mod.rs
//
// Exception Debug Hook
//
// Installed as the fault sink of the unit runtime. Every fault is reported
// to the diagnostic channel first, the post-mortem session comes after and
// only for faults that are not benign. At most one session is open at any
// time: a unit faulting while a session is open is reported, nothing more.
//
//   Idle --qualifying fault--> SessionOpen --session ends--> Idle

/// Interactive post-mortem inspector
pub mod post_mortem;

pub use post_mortem::InteractivePostMortem;

use crate::orchestrator::Clock;
use crate::runtime::{
    panic_message, Fault, FaultKind, FaultSink, UnitContext, UnitId, UnitRegistry, UnitRuntime,
    UnitSnapshot,
};
use log::{debug, error, info};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

/// Where faults are reported before anything else happens
pub trait DiagnosticChannel: Send + Sync {
    /// Report one fault
    fn report(&self, context: &UnitContext, fault: &Fault);
}

/// Reports faults through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl DiagnosticChannel for LogDiagnostics {
    fn report(&self, context: &UnitContext, fault: &Fault) {
        if fault.is_benign() {
            info!("{} ({}) {}", context.name, context.id, fault);
        } else {
            error!(
                "Unhandled fault in {} ({}) after {:.3}s: {}",
                context.name,
                context.id,
                context.age.as_secs_f64(),
                fault
            );
        }
    }
}

/// Everything an inspector can look at
#[derive(Debug, Clone, Serialize)]
pub struct PostMortemSession {
    /// Unit that faulted
    pub unit: UnitId,
    /// Name of the unit
    pub name: String,
    /// Time the unit was alive
    pub age: Duration,
    /// Kind of the fault
    pub kind: FaultKind,
    /// Rendered fault, with its cause chain
    pub fault: String,
    /// Units alive when the session opened
    pub live_units: Vec<UnitSnapshot>,
}

/// Interactive inspection of a fault
pub trait PostMortem: Send + Sync {
    /// Run the session, returning when the user leaves it
    fn open(&self, session: &PostMortemSession);
}

/// Session state of the hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugState {
    /// No session open
    Idle,
    /// A session is open
    SessionOpen,
}

// Resets the active flag when the session ends, unwinding included
struct ActiveSession<'a>(&'a AtomicBool);

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fault sink offering a post-mortem session
pub struct DebugHook {
    diagnostics: Arc<dyn DiagnosticChannel>,
    post_mortem: Arc<dyn PostMortem>,
    registry: UnitRegistry,
    clock: Arc<dyn Clock>,
    active: AtomicBool,
    sessions_opened: AtomicU64,
}

impl DebugHook {
    /// Hook inspecting faults of `runtime`'s units
    pub fn new(
        diagnostics: Arc<dyn DiagnosticChannel>,
        post_mortem: Arc<dyn PostMortem>,
        runtime: &UnitRuntime,
    ) -> Self {
        Self {
            diagnostics,
            post_mortem,
            registry: runtime.registry(),
            clock: runtime.clock(),
            active: AtomicBool::new(false),
            sessions_opened: AtomicU64::new(0),
        }
    }

    /// Install the hook as `runtime`'s fault sink
    ///
    /// Returns false if a sink was already installed, the existing one is kept.
    pub fn install(self: &Arc<Self>, runtime: &UnitRuntime) -> bool {
        runtime.install_fault_sink(self.clone())
    }

    /// Current session state
    pub fn state(&self) -> DebugState {
        if self.active.load(Ordering::Acquire) {
            DebugState::SessionOpen
        } else {
            DebugState::Idle
        }
    }

    /// Number of sessions opened since the hook was created
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }

    /// Inspect the failure of a test phase
    ///
    /// Phases run on the root task rather than in a spawned unit, they are
    /// reported under [`UnitId::ROOT`].
    pub fn inspect_failure(&self, name: String, age: Duration, fault: &Fault) {
        let context = UnitContext {
            id: UnitId::ROOT,
            name,
            age,
        };
        self.handle_fault(&context, fault);
    }
}

impl FaultSink for DebugHook {
    fn handle_fault(&self, context: &UnitContext, fault: &Fault) {
        self.diagnostics.report(context, fault);

        if fault.is_benign() {
            return;
        }

        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                "A post-mortem session is already open, not inspecting {} ({})",
                context.name, context.id
            );
            return;
        }
        let _active = ActiveSession(&self.active);
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);

        let session = PostMortemSession {
            unit: context.id,
            name: context.name.clone(),
            age: context.age,
            kind: fault.kind(),
            fault: fault.to_string(),
            live_units: self.registry.snapshot(self.clock.now()),
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.post_mortem.open(&session)));
        if let Err(payload) = outcome {
            error!(
                "Post-mortem session for {} panicked: {}",
                context.id,
                panic_message(payload.as_ref())
            );
        }
    }
}
