// File: testing-framework/src/timeout/guard.rs
//
// Phase Guard
//
// Runs one phase under the alarm:
//   arm(budget) -> work | alarm -> disarm -> measure -> settle
// The alarm is armed through a scope guard, so it is disarmed whatever way
// the phase ends: success, error, panic or the phase future being dropped.

use super::{
    AlarmChannel, BudgetSettlement, BudgetStore, Phase, PhaseError, PhaseTimeoutExceeded,
};
use crate::orchestrator::Clock;
use chrono::TimeDelta;
use log::{debug, error, warn};
use std::future::Future;
use std::sync::Arc;
use tos_supervisor_common::time::format_secs;

/// Supervises the phases of a test
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use chrono::TimeDelta;
/// use tos_test_supervisor::orchestrator::ManualClock;
/// use tos_test_supervisor::runtime::UnitRuntime;
/// use tos_test_supervisor::timeout::{
///     AlarmChannel, BudgetStore, ManualInterruptSource, Phase, PhaseGuard, TimeoutLimits,
/// };
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let clock = Arc::new(ManualClock::new());
///     let runtime = UnitRuntime::new(clock.clone());
///     let alarm = AlarmChannel::new(Arc::new(ManualInterruptSource::new()), &runtime);
///     let guard = PhaseGuard::new(alarm, clock);
///
///     let mut store = BudgetStore::new(TimeoutLimits {
///         shared: TimeDelta::seconds(10),
///         teardown: TimeDelta::seconds(5),
///     });
///     let answer = guard
///         .run_shared(&mut store, Phase::Setup, async { anyhow::Ok(42) })
///         .await
///         .unwrap();
///     assert_eq!(answer, 42);
/// }
/// ```
pub struct PhaseGuard {
    alarm: AlarmChannel,
    clock: Arc<dyn Clock>,
}

impl PhaseGuard {
    /// Guard measuring phases with `clock`'s wall time
    pub fn new(alarm: AlarmChannel, clock: Arc<dyn Clock>) -> Self {
        Self { alarm, clock }
    }

    /// The alarm used for every phase
    pub fn alarm(&self) -> &AlarmChannel {
        &self.alarm
    }

    /// Run setup or call against the shared budget
    ///
    /// The phase does not start if the previous one left no budget or was
    /// measured with a skewed clock. Once it finished, its wall time is
    /// deducted from the store; an overrun fails the next phase.
    pub async fn run_shared<F, T>(
        &self,
        store: &mut BudgetStore,
        phase: Phase,
        work: F,
    ) -> Result<T, PhaseError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        debug_assert!(phase.uses_shared_budget());

        let budget = match store.ensure_available(phase) {
            Ok(budget) => budget,
            Err(timeout) => return Err(self.timed_out(timeout)),
        };

        let started_at = self.clock.wall_time();
        let outcome = self
            .supervise(phase, store.shared_limit(), budget, work)
            .await;
        let elapsed = self.clock.wall_time() - started_at;

        match store.settle(elapsed) {
            BudgetSettlement::Within { remaining } => {
                debug!(
                    "{} took {}, {} of the shared budget left",
                    phase,
                    format_secs(elapsed),
                    format_secs(remaining)
                );
            }
            BudgetSettlement::Overrun { remaining } => {
                warn!(
                    "{} took {} and overran the shared budget of {} by {}",
                    phase,
                    format_secs(elapsed),
                    format_secs(store.shared_limit()),
                    format_secs(-remaining)
                );
            }
            BudgetSettlement::ClockSkew { elapsed } => {
                warn!(
                    "{} measured a negative duration of {}, the wall clock went backwards. \
                     The remaining budget is forced to fail",
                    phase,
                    format_secs(elapsed)
                );
            }
        }

        outcome
    }

    /// Run teardown with its full, independent budget
    pub async fn run_teardown<F, T>(&self, store: &BudgetStore, work: F) -> Result<T, PhaseError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let limit = store.teardown_limit();
        self.supervise(Phase::Teardown, limit, limit, work).await
    }

    async fn supervise<F, T>(
        &self,
        phase: Phase,
        limit: TimeDelta,
        budget: TimeDelta,
        work: F,
    ) -> Result<T, PhaseError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let armed = match self.alarm.arm(phase, limit, budget) {
            Ok(armed) => armed,
            Err(timeout) => return Err(self.timed_out(timeout)),
        };

        let outcome = tokio::select! {
            biased;
            timeout = self.alarm.expired() => Err(self.timed_out(timeout)),
            result = work => result.map_err(|error| PhaseError::Failed { phase, error }),
        };

        armed.disarm();
        outcome
    }

    fn timed_out(&self, timeout: PhaseTimeoutExceeded) -> PhaseError {
        metrics::counter!(
            "tos_supervisor_phase_timeouts_total",
            "phase" => <&'static str>::from(timeout.phase)
        )
        .increment(1);

        if timeout.is_severe() {
            error!("{}", timeout);
        } else {
            warn!("{}", timeout);
        }
        PhaseError::Timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{ManualClock, PausedClock};
    use crate::runtime::UnitRuntime;
    use crate::timeout::{
        InterruptCall, ManualInterruptSource, TimeoutCause, TimeoutLimits, TimerInterruptSource,
    };
    use anyhow::anyhow;
    use tokio::time::Duration;

    struct Harness {
        clock: Arc<ManualClock>,
        source: Arc<ManualInterruptSource>,
        guard: PhaseGuard,
    }

    fn manual_harness() -> Harness {
        let clock = Arc::new(ManualClock::new());
        let runtime = UnitRuntime::new(clock.clone());
        let source = Arc::new(ManualInterruptSource::new());
        let guard = PhaseGuard::new(AlarmChannel::new(source.clone(), &runtime), clock.clone());
        Harness {
            clock,
            source,
            guard,
        }
    }

    fn store(shared: i64, teardown: i64) -> BudgetStore {
        BudgetStore::new(TimeoutLimits {
            shared: TimeDelta::seconds(shared),
            teardown: TimeDelta::seconds(teardown),
        })
    }

    #[tokio::test]
    async fn test_carry_over_from_setup_to_call() {
        let h = manual_harness();
        let mut store = store(10, 5);

        h.guard
            .run_shared(&mut store, Phase::Setup, async {
                h.clock.sleep(Duration::from_secs(6)).await;
                anyhow::Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.remaining(), TimeDelta::seconds(4));

        h.source.clear_calls();
        h.guard
            .run_shared(&mut store, Phase::Call, async {
                h.clock.sleep(Duration::from_secs(3)).await;
                anyhow::Ok(())
            })
            .await
            .unwrap();

        assert_eq!(store.remaining(), TimeDelta::seconds(1));
        assert_eq!(
            h.source.calls(),
            vec![
                InterruptCall::InstallHandler,
                InterruptCall::StartTimer(Duration::from_secs(4)),
                InterruptCall::StopTimer,
                InterruptCall::RestoreHandler,
            ]
        );
    }

    #[tokio::test]
    async fn test_alarm_cancels_call() {
        let h = manual_harness();
        let mut store = store(10, 5);
        store.settle(TimeDelta::seconds(6));

        let driver = async {
            tokio::task::yield_now().await;
            h.clock.advance(Duration::from_secs(5));
            assert!(h.source.fire());
        };
        let call = h.guard.run_shared(
            &mut store,
            Phase::Call,
            futures::future::pending::<anyhow::Result<()>>(),
        );
        let (outcome, ()) = tokio::join!(call, driver);

        let timeout = outcome.unwrap_err();
        let timeout = timeout.as_timeout().unwrap();
        assert_eq!(timeout.phase, Phase::Call);
        assert_eq!(timeout.cause, TimeoutCause::AlarmFired);
        assert_eq!(timeout.limit, TimeDelta::seconds(10));

        assert_eq!(store.remaining(), TimeDelta::seconds(-1));
        assert!(!h.guard.alarm().is_armed());
        assert!(!h.source.has_handler());
    }

    #[tokio::test]
    async fn test_work_error_passes_through_and_disarms() {
        let h = manual_harness();
        let mut store = store(10, 5);

        let err = h
            .guard
            .run_shared(&mut store, Phase::Setup, async {
                Err::<(), _>(anyhow!("node did not start"))
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PhaseError::Failed {
                phase: Phase::Setup,
                ..
            }
        ));
        assert_eq!(h.source.armed_for(), None);
        assert!(!h.source.has_handler());
    }

    #[tokio::test]
    async fn test_overrun_fails_next_phase_without_running_it() {
        let h = manual_harness();
        let mut store = store(10, 5);

        // The alarm never fires with the manual source, setup simply overruns
        h.guard
            .run_shared(&mut store, Phase::Setup, async {
                h.clock.sleep(Duration::from_secs(12)).await;
                anyhow::Ok(())
            })
            .await
            .unwrap();

        h.source.clear_calls();
        let mut ran = false;
        let err = h
            .guard
            .run_shared(&mut store, Phase::Call, async {
                ran = true;
                anyhow::Ok(())
            })
            .await
            .unwrap_err();

        assert!(!ran);
        assert_eq!(
            err.as_timeout().map(|t| t.cause),
            Some(TimeoutCause::BudgetExhausted)
        );
        assert!(h.source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_clock_skew_fails_next_phase() {
        let h = manual_harness();
        let mut store = store(10, 5);

        h.guard
            .run_shared(&mut store, Phase::Setup, async {
                h.clock.skew_wall(TimeDelta::seconds(-2));
                anyhow::Ok(())
            })
            .await
            .unwrap();

        let err = h
            .guard
            .run_shared(&mut store, Phase::Call, async { anyhow::Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(
            err.as_timeout().map(|t| (t.phase, t.cause)),
            Some((Phase::Call, TimeoutCause::ClockSkew))
        );
    }

    #[tokio::test]
    async fn test_teardown_always_gets_full_budget() {
        let h = manual_harness();
        let mut store = store(10, 5);
        store.settle(TimeDelta::seconds(30));
        assert!(store.is_exhausted());

        h.guard
            .run_teardown(&store, async { anyhow::Ok(()) })
            .await
            .unwrap();

        assert_eq!(
            h.source.calls()[..2],
            [
                InterruptCall::InstallHandler,
                InterruptCall::StartTimer(Duration::from_secs(5)),
            ]
        );
    }

    #[tokio::test]
    async fn test_real_timer_fires_and_leaves_no_stray_alarm() {
        let clock = Arc::new(PausedClock::new());
        let runtime = UnitRuntime::new(clock.clone());
        let source = Arc::new(TimerInterruptSource::new(clock.clone()));
        let guard = PhaseGuard::new(AlarmChannel::new(source.clone(), &runtime), clock.clone());
        let mut store = store(10, 5);

        let err = guard
            .run_shared(&mut store, Phase::Call, async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                anyhow::Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Phase::Call);
        assert!(err.is_timeout());

        // An unrelated phase armed right after must not see the old alarm
        guard
            .run_teardown(&store, async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                anyhow::Ok(())
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(source.stray_notifications(), 0);
        assert!(!source.is_timer_running());
    }
}
