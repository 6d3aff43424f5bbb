// File: testing-framework/src/runtime/monitor.rs
//
// On-demand dump of the live units
//
// A stuck suite can be inspected from outside: sending SIGUSR1 to the
// process writes the same unit listing a timeout failure carries.

use super::{format_run_info, UnitRuntime};
use log::info;

/// Log the units alive right now and return the rendered listing
pub fn dump_live_units(runtime: &UnitRuntime) -> String {
    let listing = format_run_info(&runtime.live_units());
    info!("Live units:\n{}", listing);
    listing
}

/// Dump the live units every time the process receives SIGUSR1
///
/// Must be called from within a tokio runtime. The listener runs until the
/// returned handle is aborted.
#[cfg(unix)]
pub fn spawn_monitoring_signal(
    runtime: &UnitRuntime,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut user_signal = signal(SignalKind::user_defined1())?;
    let runtime = runtime.clone();
    Ok(tokio::spawn(async move {
        while user_signal.recv().await.is_some() {
            dump_live_units(&runtime);
        }
    }))
}
