use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tracing::{debug, trace};

use crate::{
    Coalescer, Notification,
    clock::{AtomicStamp, duration_nanos},
    error::DeliveryError,
    mutex::Lock,
    notification::{SinkResult, forward_sink_to_notify},
    schedule::{ScheduledTask, Scheduler, Tick},
};

/// Non-zero minimum periods shorter than this are raised to it.
pub const MINIMUM_PERIOD_FLOOR: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Minimum time between deliveries; zero means unlimited.
    pub minimum_period: Duration,
    /// Start paused.
    pub paused: bool,
}

/// Delivery mode, derived from the minimum period and the paused flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Every notification reaches the sink as it arrives.
    PassThrough,
    /// Notifications are coalesced and flushed at most once per minimum period.
    RateLimited,
    /// Notifications are coalesced and nothing is delivered.
    Paused,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::PassThrough => "pass-through",
            Mode::RateLimited => "rate-limited",
            Mode::Paused => "paused",
        })
    }
}

fn clamp_period(period: Duration) -> Duration {
    if period.is_zero() {
        Duration::ZERO
    } else {
        period.max(MINIMUM_PERIOD_FLOOR)
    }
}

/// Puts a minimum period between deliveries from a [`Coalescer`].
///
/// While rate limited, a background task scheduled every minimum period flushes the coalescer
/// once something new has arrived and a full period has passed since the last delivery. A
/// notification that arrives after a quiet period is flushed right away by the caller's thread.
/// The background task and callers race for each delivery through a compare-and-set on the
/// last-delivery time, so only one of them drains.
///
/// Dropping the limiter terminates it.
pub struct RateLimiter<V> {
    shared: Arc<Shared<V>>,
}

struct Shared<V> {
    coalescer: Coalescer<V>,
    scheduler: Arc<dyn Scheduler>,
    control: Lock<Control>,
    /// Period in nanos while rate limited, zero in every other mode.
    limited_nanos: AtomicU64,
    terminated: AtomicBool,
    last_delivery: AtomicStamp,
}

/// Mode inputs and the running task, guarded apart from the coalescer's queue.
struct Control {
    minimum_period: Duration,
    paused: bool,
    task: Option<ScheduledTask>,
}

impl Control {
    fn mode(&self) -> Mode {
        if self.paused {
            Mode::Paused
        } else if self.minimum_period.is_zero() {
            Mode::PassThrough
        } else {
            Mode::RateLimited
        }
    }
}

impl<V: Clone + Send + 'static> RateLimiter<V> {
    pub fn new(coalescer: Coalescer<V>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_config(coalescer, scheduler, RateLimiterConfig::default())
    }

    pub fn with_config(
        coalescer: Coalescer<V>,
        scheduler: Arc<dyn Scheduler>,
        config: RateLimiterConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            coalescer,
            scheduler,
            control: Lock::new(Control {
                minimum_period: clamp_period(config.minimum_period),
                paused: config.paused,
                task: None,
            }),
            limited_nanos: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
            last_delivery: AtomicStamp::default(),
        });
        Shared::reconfigure(&shared, |_| {});
        Self { shared }
    }

    /// Accept a notification from the producer.
    ///
    /// Only pass-through delivery (and `ClientShutdown`) can fail here; failures while flushing
    /// queued notifications are logged instead.
    pub fn notify(&self, notification: Notification<V>) -> Result<(), DeliveryError> {
        self.shared.coalescer.notify(notification)?;
        if let Some(period) = self.shared.limited_period() {
            self.shared.try_deliver(period);
        }
        Ok(())
    }

    /// Deliver everything queued now, regardless of mode. Returns how many entries the sink
    /// accepted.
    pub fn drain(&self) -> usize {
        self.shared
            .last_delivery
            .advance(self.shared.coalescer.clock().now());
        self.shared.coalescer.drain()
    }

    /// Forget everything queued without delivering it.
    pub fn reset(&self) {
        self.shared.coalescer.reset();
    }

    /// Stop background flushing for good. Queued notifications stay queued until [`drain`] or
    /// [`reset`]. Idempotent.
    ///
    /// [`drain`]: Self::drain
    /// [`reset`]: Self::reset
    pub fn terminate(&self) {
        self.shared.terminate();
    }

    pub fn set_paused(&self, paused: bool) {
        Shared::reconfigure(&self.shared, |control| control.paused = paused);
    }

    /// Set the minimum period between deliveries. Zero disables rate limiting; anything shorter
    /// than [`MINIMUM_PERIOD_FLOOR`] is raised to it.
    pub fn set_minimum_period(&self, period: Duration) {
        let period = clamp_period(period);
        Shared::reconfigure(&self.shared, |control| control.minimum_period = period);
    }

    /// As [`set_minimum_period`](Self::set_minimum_period), in signed milliseconds; zero or
    /// negative disables rate limiting.
    pub fn set_minimum_period_millis(&self, millis: i64) {
        let period = u64::try_from(millis).map_or(Duration::ZERO, Duration::from_millis);
        self.set_minimum_period(period);
    }

    fn forward(&self, notification: Notification<V>) -> SinkResult {
        self.notify(notification).map_err(Into::into)
    }
}

impl<V> RateLimiter<V> {
    pub fn coalescer(&self) -> &Coalescer<V> {
        &self.shared.coalescer
    }

    pub fn mode(&self) -> Mode {
        self.shared.control.lock().mode()
    }

    pub fn minimum_period(&self) -> Duration {
        self.shared.control.lock().minimum_period
    }

    pub fn is_paused(&self) -> bool {
        self.shared.control.lock().paused
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }

    /// Clock time of the most recent delivery made by this limiter, `None` before the first.
    pub fn last_delivery(&self) -> Option<Duration> {
        self.shared.last_delivery.load()
    }
}

impl<V> Drop for RateLimiter<V> {
    fn drop(&mut self) {
        self.shared.terminate();
    }
}

forward_sink_to_notify!(RateLimiter);

impl<V> Shared<V> {
    fn limited_period(&self) -> Option<Duration> {
        match self.limited_nanos.load(Ordering::SeqCst) {
            0 => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        let mut control = self.control.lock();
        self.limited_nanos.store(0, Ordering::SeqCst);
        if let Some(task) = control.task.take() {
            task.cancel();
            debug!("rate limiter terminated");
        }
    }
}

impl<V: Clone + Send + 'static> Shared<V> {
    /// Apply `change` to the mode inputs, then cancel the running task, flip the coalescer's
    /// pass-through flag to match the new mode, and start a task if now rate limited. Anything
    /// the coalescer detached is delivered once both locks are released.
    fn reconfigure(this: &Arc<Self>, change: impl FnOnce(&mut Control)) {
        let (detached, limited) = {
            let mut control = this.control.lock();
            change(&mut control);
            if let Some(task) = control.task.take() {
                task.cancel();
            }
            let mode = control.mode();
            let detached = this.coalescer.set_pass_through(mode == Mode::PassThrough);
            let period = control.minimum_period;
            let limited = mode == Mode::RateLimited && !this.terminated.load(Ordering::SeqCst);
            if limited {
                this.limited_nanos.store(duration_nanos(period), Ordering::SeqCst);
                control.task = Some(this.scheduler.schedule_with_fixed_delay(period, Self::tick(this, period)));
            } else {
                this.limited_nanos.store(0, Ordering::SeqCst);
            }
            debug!(%mode, minimum_period = ?period, scheduled = limited, "rate limiter reconfigured");
            (detached, limited.then_some(period))
        };
        this.coalescer.deliver(detached);
        if let Some(period) = limited {
            this.try_deliver(period);
        }
    }

    fn tick(this: &Arc<Self>, period: Duration) -> Tick {
        let weak: Weak<Self> = Arc::downgrade(this);
        Arc::new(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.limited_period().is_some() {
                shared.try_deliver(period);
            }
        })
    }

    /// Drain if something arrived since the last delivery and `period` has passed since it.
    fn try_deliver(&self, period: Duration) -> bool {
        let Some(last_update) = self.coalescer.last_update() else {
            return false;
        };
        let now = self.coalescer.clock().now();
        let seen = self.last_delivery.load_raw();
        if let Some(last_delivery) = AtomicStamp::decode(seen) {
            let fresh = last_update > last_delivery
                || (last_update == last_delivery && self.coalescer.pending() > 0);
            if !fresh || now.saturating_sub(last_delivery) < period {
                return false;
            }
        }
        if !self.last_delivery.compare_and_set(seen, now) {
            return false;
        }
        let accepted = self.coalescer.drain();
        trace!(accepted, "rate-limited flush");
        true
    }
}
