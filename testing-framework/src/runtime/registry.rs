//! Registry of live cooperative units
//!
//! Every unit spawned through [`UnitRuntime`](super::UnitRuntime) is recorded
//! here until it terminates, so a timeout report can list what was still
//! running when the alarm fired.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Identifier of a unit, unique per registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(u64);

impl UnitId {
    /// The task driving the test phases, never registered
    pub const ROOT: UnitId = UnitId(0);
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Point-in-time view of a live unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    /// Unit identifier
    pub id: UnitId,
    /// Name given at spawn time
    pub name: String,
    /// Time since the unit was spawned
    pub age: Duration,
}

struct LiveUnit {
    name: String,
    spawned_at: Instant,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    live: BTreeMap<UnitId, LiveUnit>,
}

/// Shared registry handle, cloning it is cheap
#[derive(Clone, Default)]
pub struct UnitRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl UnitRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live unit
    pub fn register(&self, name: &str, spawned_at: Instant) -> UnitId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = UnitId(state.next_id);
        state.live.insert(
            id,
            LiveUnit {
                name: name.to_string(),
                spawned_at,
            },
        );
        id
    }

    /// Forget a terminated unit, returns false if it was already removed
    pub fn remove(&self, id: UnitId) -> bool {
        self.state.lock().live.remove(&id).is_some()
    }

    /// Number of live units
    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    /// True when no unit is alive
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every live unit, oldest first
    pub fn snapshot(&self, now: Instant) -> Vec<UnitSnapshot> {
        self.state
            .lock()
            .live
            .iter()
            .map(|(id, unit)| UnitSnapshot {
                id: *id,
                name: unit.name.clone(),
                age: now.saturating_duration_since(unit.spawned_at),
            })
            .collect()
    }
}

/// Render a snapshot the way it is written into failure logs
pub fn format_run_info(units: &[UnitSnapshot]) -> String {
    if units.is_empty() {
        return "  <no live units>".to_string();
    }

    units
        .iter()
        .map(|unit| format!("  {} {} (alive for {:.3}s)", unit.id, unit.name, unit.age.as_secs_f64()))
        .collect::<Vec<_>>()
        .join("\n")
}
