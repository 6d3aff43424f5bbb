// File: testing-framework/src/timeout/alarm.rs
//
// Alarm Channel
//
// One re-armable one-shot timer and one handler slot for the whole process.
// The ordering of the sub-steps is what keeps a late notification from
// landing in an unrelated phase:
// - arm:    install the handler, then start the timer
// - disarm: stop the timer, then restore the previous handler
//
// The fault is not raised into the phase directly. The handler records it
// and wakes the guard, which drops the phase future at its next await.

use super::{Phase, PhaseTimeoutExceeded, TimeoutCause};
use crate::orchestrator::Clock;
use crate::runtime::{format_run_info, UnitRegistry, UnitRuntime};
use chrono::TimeDelta;
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// Callback run when the timer expires
pub type AlarmHandler = Arc<dyn Fn() + Send + Sync>;

/// Capability to deliver a timer notification to the current thread of control
///
/// Production uses [`TimerInterruptSource`], tests substitute
/// [`ManualInterruptSource`] which records every call.
pub trait InterruptSource: Send + Sync {
    /// Replace the handler, returning the previous one
    fn swap_handler(&self, handler: Option<AlarmHandler>) -> Option<AlarmHandler>;

    /// Start the one-shot countdown, replacing any running one
    fn start_timer(&self, after: Duration);

    /// Stop the countdown if it is running
    fn stop_timer(&self);
}

struct TimerShared {
    handler: Mutex<Option<AlarmHandler>>,
    stray: AtomicU64,
}

impl TimerShared {
    fn deliver(&self) {
        // Cloned so the handler runs without the slot locked
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(),
            None => {
                self.stray.fetch_add(1, Ordering::Relaxed);
                warn!("Alarm expired with no handler installed, notification dropped");
            }
        }
    }
}

/// Interrupt source backed by a tokio task sleeping on the injected clock
///
/// The timer task is spawned on the current runtime, `start_timer` must be
/// called from within one.
pub struct TimerInterruptSource {
    clock: Arc<dyn Clock>,
    shared: Arc<TimerShared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TimerInterruptSource {
    /// Create an idle source
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            shared: Arc::new(TimerShared {
                handler: Mutex::new(None),
                stray: AtomicU64::new(0),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Notifications that expired while no handler was installed
    pub fn stray_notifications(&self) -> u64 {
        self.shared.stray.load(Ordering::Relaxed)
    }

    /// True while a countdown is pending
    pub fn is_timer_running(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl InterruptSource for TimerInterruptSource {
    fn swap_handler(&self, handler: Option<AlarmHandler>) -> Option<AlarmHandler> {
        std::mem::replace(&mut *self.shared.handler.lock(), handler)
    }

    fn start_timer(&self, after: Duration) {
        let clock = self.clock.clone();
        let shared = self.shared.clone();
        let timer = tokio::spawn(async move {
            clock.sleep(after).await;
            shared.deliver();
        });

        if let Some(previous) = self.timer.lock().replace(timer) {
            previous.abort();
        }
    }

    fn stop_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

/// Call recorded by [`ManualInterruptSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCall {
    /// A handler was installed
    InstallHandler,
    /// The slot was reset to no handler
    RestoreHandler,
    /// The countdown was started
    StartTimer(Duration),
    /// The countdown was stopped
    StopTimer,
}

#[derive(Default)]
struct ManualSourceState {
    handler: Option<AlarmHandler>,
    armed_for: Option<Duration>,
    calls: Vec<InterruptCall>,
    stray: u64,
}

/// Fake interrupt source, the timer only expires through [`fire`](Self::fire)
#[derive(Default)]
pub struct ManualInterruptSource {
    state: Mutex<ManualSourceState>,
}

impl ManualInterruptSource {
    /// Create an idle source
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire the running countdown
    ///
    /// Returns true if a handler received the notification. Firing with no
    /// countdown running does nothing.
    pub fn fire(&self) -> bool {
        let handler = {
            let mut state = self.state.lock();
            if state.armed_for.take().is_none() {
                return false;
            }
            match state.handler.clone() {
                Some(handler) => handler,
                None => {
                    state.stray += 1;
                    return false;
                }
            }
        };

        handler();
        true
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<InterruptCall> {
        self.state.lock().calls.clone()
    }

    /// Forget the recorded calls
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Duration of the running countdown
    pub fn armed_for(&self) -> Option<Duration> {
        self.state.lock().armed_for
    }

    /// True while a handler is installed
    pub fn has_handler(&self) -> bool {
        self.state.lock().handler.is_some()
    }

    /// Notifications that expired while no handler was installed
    pub fn stray_notifications(&self) -> u64 {
        self.state.lock().stray
    }
}

impl InterruptSource for ManualInterruptSource {
    fn swap_handler(&self, handler: Option<AlarmHandler>) -> Option<AlarmHandler> {
        let mut state = self.state.lock();
        state.calls.push(match handler {
            Some(_) => InterruptCall::InstallHandler,
            None => InterruptCall::RestoreHandler,
        });
        std::mem::replace(&mut state.handler, handler)
    }

    fn start_timer(&self, after: Duration) {
        let mut state = self.state.lock();
        state.calls.push(InterruptCall::StartTimer(after));
        state.armed_for = Some(after);
    }

    fn stop_timer(&self) {
        let mut state = self.state.lock();
        state.calls.push(InterruptCall::StopTimer);
        state.armed_for = None;
    }
}

#[derive(Default)]
struct AlarmState {
    pending: Mutex<Option<PhaseTimeoutExceeded>>,
    notify: Notify,
    deadline: Mutex<Option<Instant>>,
}

/// Process-wide alarm used by the phase guard
pub struct AlarmChannel {
    source: Arc<dyn InterruptSource>,
    registry: UnitRegistry,
    clock: Arc<dyn Clock>,
    state: Arc<AlarmState>,
}

impl AlarmChannel {
    /// Alarm over `source`, dumping the units of `runtime` on expiry
    pub fn new(source: Arc<dyn InterruptSource>, runtime: &UnitRuntime) -> Self {
        Self {
            source,
            registry: runtime.registry(),
            clock: runtime.clock(),
            state: Arc::new(AlarmState::default()),
        }
    }

    /// Interrupt source driving this alarm
    pub fn source(&self) -> &Arc<dyn InterruptSource> {
        &self.source
    }

    /// Deadline of the armed countdown
    pub fn armed_deadline(&self) -> Option<Instant> {
        *self.state.deadline.lock()
    }

    /// True between `arm` and the release of the returned guard
    pub fn is_armed(&self) -> bool {
        self.armed_deadline().is_some()
    }

    /// Arm the alarm for `phase` with `budget` left
    ///
    /// `limit` is the configured limit reported on expiry. A budget of zero or
    /// less fails immediately.
    pub fn arm(
        &self,
        phase: Phase,
        limit: TimeDelta,
        budget: TimeDelta,
    ) -> Result<ArmedAlarm<'_>, PhaseTimeoutExceeded> {
        let after = match budget.to_std() {
            Ok(after) if !after.is_zero() => after,
            _ => {
                return Err(PhaseTimeoutExceeded::new(
                    phase,
                    limit,
                    TimeoutCause::BudgetExhausted,
                ))
            }
        };

        self.state.pending.lock().take();

        let handler = {
            let state = self.state.clone();
            let registry = self.registry.clone();
            let clock = self.clock.clone();
            Arc::new(move || {
                let timeout = PhaseTimeoutExceeded::new(phase, limit, TimeoutCause::AlarmFired)
                    .with_live_units(registry.snapshot(clock.now()));
                error!(
                    "{} alarm expired after {:?}, live units:\n{}",
                    phase,
                    after,
                    format_run_info(&timeout.live_units)
                );
                *state.pending.lock() = Some(timeout);
                state.notify.notify_one();
            }) as AlarmHandler
        };

        let previous = self.source.swap_handler(Some(handler));
        *self.state.deadline.lock() = Some(self.clock.now() + after);
        self.source.start_timer(after);
        debug!("Alarm armed for {} ({:?})", phase, after);

        Ok(ArmedAlarm {
            channel: self,
            phase,
            previous: Some(previous),
        })
    }

    /// Wait for the armed alarm to expire
    pub async fn expired(&self) -> PhaseTimeoutExceeded {
        loop {
            let fired = self.state.pending.lock().take();
            if let Some(timeout) = fired {
                return timeout;
            }
            self.state.notify.notified().await;
        }
    }
}

/// Scope guard of an armed alarm, releasing it disarms the alarm
///
/// Dropping the guard disarms too, so the alarm never outlives the phase
/// whatever way the phase ends.
#[must_use = "the alarm is disarmed as soon as the guard is dropped"]
pub struct ArmedAlarm<'a> {
    channel: &'a AlarmChannel,
    phase: Phase,
    previous: Option<Option<AlarmHandler>>,
}

impl ArmedAlarm<'_> {
    /// Phase the alarm was armed for
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Disarm explicitly
    pub fn disarm(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };

        let channel = self.channel;
        channel.source.stop_timer();
        channel.source.swap_handler(previous);
        channel.state.deadline.lock().take();
        channel.state.pending.lock().take();
        debug!("Alarm disarmed for {}", self.phase);
    }
}

impl Drop for ArmedAlarm<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
