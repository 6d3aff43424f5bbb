// File: testing-framework/src/runtime/mod.rs
//
// Cooperative runtime facade
//
// Tests run on a single-threaded tokio runtime, every background task they
// start (transports, pollers, node watchers) is a cooperative unit spawned
// through `UnitRuntime`. The facade gives the supervisor the three
// capabilities it needs from the runtime:
// - enumerate live units for diagnostics
// - register a single process-wide sink for unhandled unit faults
// - schedule work on the current thread of control

/// Unhandled unit faults
pub mod fault;
/// On-demand dump of the live units
pub mod monitor;
/// Registry of live units
pub mod registry;

pub use fault::{panic_message, ExitRequest, Fault, FaultKind};
#[cfg(unix)]
pub use monitor::spawn_monitoring_signal;
pub use monitor::dump_live_units;
pub use registry::{format_run_info, UnitId, UnitRegistry, UnitSnapshot};

use crate::orchestrator::{Clock, SystemClock};
use futures::FutureExt;
use lazy_static::lazy_static;
use log::{debug, error};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Context of the unit whose fault is reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitContext {
    /// Unit identifier
    pub id: UnitId,
    /// Name given at spawn time
    pub name: String,
    /// Time the unit was alive
    pub age: Duration,
}

/// Sink for faults that reached the top of a unit with no handler
///
/// Exactly one sink is installed per runtime, see
/// [`UnitRuntime::install_fault_sink`].
pub trait FaultSink: Send + Sync {
    /// Called once per unit that terminated with a fault
    fn handle_fault(&self, context: &UnitContext, fault: &Fault);
}

struct RuntimeInner {
    clock: Arc<dyn Clock>,
    registry: UnitRegistry,
    sink: OnceLock<Arc<dyn FaultSink>>,
}

impl RuntimeInner {
    fn report(&self, context: UnitContext, fault: Fault) {
        metrics::counter!(
            "tos_supervisor_unit_faults_total",
            "kind" => fault.kind().as_label()
        )
        .increment(1);

        match self.sink.get() {
            Some(sink) => sink.handle_fault(&context, &fault),
            None => error!("{} ({}) {}", context.name, context.id, fault),
        }
    }
}

lazy_static! {
    static ref GLOBAL_RUNTIME: UnitRuntime = UnitRuntime::new(Arc::new(SystemClock));
}

/// Handle over the cooperative runtime, cloning it is cheap
#[derive(Clone)]
pub struct UnitRuntime {
    inner: Arc<RuntimeInner>,
}

impl UnitRuntime {
    /// Create a runtime facade reading time from `clock`
    ///
    /// Tests create their own instance, production code shares
    /// [`UnitRuntime::global`].
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                clock,
                registry: UnitRegistry::new(),
                sink: OnceLock::new(),
            }),
        }
    }

    /// Process-wide instance
    pub fn global() -> &'static UnitRuntime {
        &GLOBAL_RUNTIME
    }

    /// Clock used to timestamp units
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    /// Registry of live units
    pub fn registry(&self) -> UnitRegistry {
        self.inner.registry.clone()
    }

    /// Snapshot of every unit still running
    pub fn live_units(&self) -> Vec<UnitSnapshot> {
        self.inner.registry.snapshot(self.inner.clock.now())
    }

    /// Install the unhandled fault sink
    ///
    /// Installation is idempotent: the first sink wins and later calls
    /// return `false` without replacing it.
    pub fn install_fault_sink(&self, sink: Arc<dyn FaultSink>) -> bool {
        let installed = self.inner.sink.set(sink).is_ok();
        if !installed {
            debug!("A fault sink is already installed, keeping the existing one");
        }
        installed
    }

    /// True once a fault sink has been installed
    pub fn has_fault_sink(&self) -> bool {
        self.inner.sink.get().is_some()
    }

    /// Spawn a named cooperative unit
    ///
    /// The unit is listed by [`live_units`](Self::live_units) until it
    /// terminates. An error, a panic or cancellation is forwarded to the fault
    /// sink; the fault never propagates into the task that spawned the unit.
    pub fn spawn_unit<F>(&self, name: impl Into<String>, work: F) -> UnitHandle
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let spawned_at = self.inner.clock.now();
        let id = self.inner.registry.register(&name, spawned_at);
        debug!("Spawned {} ({})", name, id);

        let mut watch = UnitWatch {
            inner: self.inner.clone(),
            context: Some(UnitContext {
                id,
                name: name.clone(),
                age: Duration::ZERO,
            }),
            spawned_at,
        };

        let join = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(work).catch_unwind().await;
            let fault = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(Fault::from_error(error)),
                Err(payload) => Some(Fault::from_panic(payload)),
            };
            watch.finish(fault);
        });

        UnitHandle { id, name, join }
    }
}

// Lives inside the unit's task: when the task is aborted or the runtime
// shuts down the future is dropped without finishing, which is reported as
// a cancellation.
struct UnitWatch {
    inner: Arc<RuntimeInner>,
    context: Option<UnitContext>,
    spawned_at: tokio::time::Instant,
}

impl UnitWatch {
    fn finish(&mut self, fault: Option<Fault>) {
        let Some(mut context) = self.context.take() else {
            return;
        };

        self.inner.registry.remove(context.id);
        context.age = self
            .inner
            .clock
            .now()
            .saturating_duration_since(self.spawned_at);

        match fault {
            Some(fault) => self.inner.report(context, fault),
            None => debug!("{} ({}) finished", context.name, context.id),
        }
    }
}

impl Drop for UnitWatch {
    fn drop(&mut self) {
        if self.context.is_some() {
            self.finish(Some(Fault::Cancelled));
        }
    }
}

/// Handle to a spawned unit
pub struct UnitHandle {
    id: UnitId,
    name: String,
    join: JoinHandle<()>,
}

impl UnitHandle {
    /// Unit identifier
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Unit name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel the unit at its next yield point
    pub fn cancel(&self) {
        self.join.abort();
    }

    /// True once the unit terminated, whatever the reason
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the unit to terminate
    ///
    /// Faults are delivered to the fault sink, not returned here.
    pub async fn join(self) {
        if let Err(err) = self.join.await {
            if !err.is_cancelled() {
                error!("{} ({}) join failed: {}", self.name, self.id, err);
            }
        }
    }
}
