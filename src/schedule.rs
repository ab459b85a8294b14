//! Repeating background tasks and their cancellation.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    runtime::Handle,
    select,
    sync::Notify,
    time::{Instant, MissedTickBehavior},
};
use tracing::{trace, warn};

use crate::{
    clock::{Clock, ManualClock},
    error::SchedulerError,
    mutex::Lock,
};

/// Work run on every tick of a scheduled task.
pub type Tick = Arc<dyn Fn() + Send + Sync>;

const SHORTEST_PERIOD: Duration = Duration::from_millis(1);

/// Cancellation token for a scheduled task. Clones share the same token; dropping one does not
/// cancel the task.
#[derive(Clone, Debug, Default)]
pub struct ScheduledTask(Arc<Cancellation>);

#[derive(Debug, Default)]
struct Cancellation {
    cancelled: AtomicBool,
    changed: Notify,
}

impl ScheduledTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the task. A tick already running completes; no further tick starts.
    pub fn cancel(&self) {
        if !self.0.cancelled.swap(true, Ordering::SeqCst) {
            self.0.changed.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.0.changed.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Runs a tick repeatedly, `period` apart, until the returned token is cancelled.
pub trait Scheduler: Send + Sync {
    fn schedule_with_fixed_delay(&self, period: Duration, tick: Tick) -> ScheduledTask;
}

/// Drives scheduled tasks on a tokio runtime. Each tick runs on the blocking pool, and the next
/// one is not started before it returns.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on.
    pub fn current() -> Result<Self, SchedulerError> {
        Ok(Self::new(Handle::try_current()?))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_with_fixed_delay(&self, period: Duration, tick: Tick) -> ScheduledTask {
        let period = period.max(SHORTEST_PERIOD);
        let task = ScheduledTask::new();
        let token = task.clone();
        self.handle.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        if token.is_cancelled() {
                            break;
                        }
                        // Ticks drive sink calls, which may block.
                        let tick = Arc::clone(&tick);
                        if let Err(e) = tokio::task::spawn_blocking(move || tick()).await {
                            warn!(error = %e, "scheduled tick failed");
                        }
                    }
                }
            }
            trace!(?period, "scheduled task stopped");
        });
        task
    }
}

struct ManualTask {
    period: Duration,
    next_due: Duration,
    tick: Tick,
    token: ScheduledTask,
}

/// Runs scheduled ticks only when [`advance`](Self::advance) moves its [`ManualClock`] past them.
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    tasks: Lock<Vec<ManualTask>>,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            tasks: Lock::new(Vec::new()),
        }
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Tasks scheduled and not yet cancelled.
    pub fn active_tasks(&self) -> usize {
        self.tasks.lock()
            .iter()
            .filter(|task| !task.token.is_cancelled())
            .count()
    }

    /// Move the clock forward by `by`, running every tick that falls due on the way in time
    /// order. Ticks run without the scheduler's lock held and may schedule or cancel tasks.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now() + by;
        loop {
            let due = {
                let mut tasks = self.tasks.lock();
                tasks.retain(|task| !task.token.is_cancelled());
                tasks
                    .iter_mut()
                    .filter(|task| task.next_due <= target)
                    .min_by_key(|task| task.next_due)
                    .map(|task| {
                        let at = task.next_due;
                        task.next_due += task.period;
                        (at, Arc::clone(&task.tick), task.token.clone())
                    })
            };
            let Some((at, tick, token)) = due else {
                break;
            };
            self.clock.advance_to(at);
            if !token.is_cancelled() {
                tick();
            }
        }
        self.clock.advance_to(target);
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_with_fixed_delay(&self, period: Duration, tick: Tick) -> ScheduledTask {
        let period = period.max(SHORTEST_PERIOD);
        let token = ScheduledTask::new();
        self.tasks.lock().push(ManualTask {
            period,
            next_due: self.clock.now() + period,
            tick,
            token: token.clone(),
        });
        token
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting() -> (Arc<AtomicUsize>, Tick) {
        let count = Arc::new(AtomicUsize::new(0));
        let tick_count = Arc::clone(&count);
        let tick: Tick = Arc::new(move || {
            tick_count.fetch_add(1, Ordering::SeqCst);
        });
        (count, tick)
    }

    #[test]
    fn manual_scheduler_runs_due_ticks() {
        let scheduler = ManualScheduler::new(Arc::new(ManualClock::new()));
        let (count, tick) = counting();
        scheduler.schedule_with_fixed_delay(Duration::from_millis(100), tick);
        scheduler.advance(Duration::from_millis(99));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.advance(Duration::from_millis(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        scheduler.advance(Duration::from_millis(350));
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.clock().now(), Duration::from_millis(450));
    }

    #[test]
    fn manual_scheduler_sets_clock_to_tick_time() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = ManualScheduler::new(Arc::clone(&clock));
        let seen = Arc::new(Lock::new(Vec::new()));
        let tick_seen = Arc::clone(&seen);
        let tick_clock = Arc::clone(&clock);
        scheduler.schedule_with_fixed_delay(
            Duration::from_millis(30),
            Arc::new(move || tick_seen.lock().push(tick_clock.now())),
        );
        scheduler.advance(Duration::from_millis(100));
        assert_eq!(
            *seen.lock(),
            vec![
                Duration::from_millis(30),
                Duration::from_millis(60),
                Duration::from_millis(90)
            ]
        );
    }

    #[test]
    fn cancelled_manual_task_stops() {
        let scheduler = ManualScheduler::new(Arc::new(ManualClock::new()));
        let (count, tick) = counting();
        let task = scheduler.schedule_with_fixed_delay(Duration::from_millis(10), tick);
        scheduler.advance(Duration::from_millis(25));
        assert_eq!(scheduler.active_tasks(), 1);
        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(scheduler.active_tasks(), 0);
        scheduler.advance(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_ticks_until_cancelled() {
        let scheduler = TokioScheduler::current().unwrap();
        let (count, tick) = counting();
        let task = scheduler.schedule_with_fixed_delay(Duration::from_millis(100), tick);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        task.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn tokio_scheduler_needs_a_runtime() {
        assert!(matches!(TokioScheduler::current(), Err(SchedulerError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let task = ScheduledTask::new();
        let waiter = task.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        task.cancel();
        handle.await.unwrap();
    }
}
