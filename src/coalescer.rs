use std::{sync::Arc, time::Duration};

use tracing::{trace, warn};

use crate::{
    Notification,
    clock::{AtomicStamp, Clock, MonotonicClock},
    error::DeliveryError,
    model::CycleId,
    mutex::Lock,
    notification::{NotificationKind, Sink, SinkResult, forward_sink_to_notify},
    raw::{Raw, Retention},
};

/// Pins the cycle behind the most recent full result so it outlives its producer while a
/// coalescer still refers to it.
///
/// Called with the coalescer's lock held; implementations must not call back into the pipeline.
pub trait ResultRetainer: Send + Sync {
    fn retain(&self, cycle: CycleId);
    fn release(&self, cycle: CycleId);
}

/// Merges and queues notifications on their way to a single [`Sink`].
///
/// Starts in pass-through mode: every notification goes straight to the sink on the calling
/// thread. With pass-through off, notifications are queued; `CycleCompleted` and
/// `CycleFragmentCompleted` merge into their queued counterpart (which then moves to the back of
/// the queue), and a completion drops the start of the cycle it superseded. [`drain`] hands the
/// queue to the sink in order.
///
/// The sink is never called with the internal lock held.
///
/// [`drain`]: Coalescer::drain
pub struct Coalescer<V> {
    inner: Lock<Raw<V>>,
    sink: Arc<dyn Sink<V>>,
    clock: Arc<dyn Clock>,
    retainer: Option<Arc<dyn ResultRetainer>>,
    last_update: AtomicStamp,
}

impl<V> Coalescer<V> {
    pub fn new(sink: Arc<dyn Sink<V>>) -> Self {
        Self::with_clock(sink, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(sink: Arc<dyn Sink<V>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Lock::new(Raw::new()),
            sink,
            clock,
            retainer: None,
            last_update: AtomicStamp::default(),
        }
    }

    /// Install the collaborator used when latest-result retention is on.
    pub fn with_retainer(mut self, retainer: Arc<dyn ResultRetainer>) -> Self {
        self.retainer = Some(retainer);
        self
    }

    pub fn sink(&self) -> &Arc<dyn Sink<V>> {
        &self.sink
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn is_pass_through(&self) -> bool {
        self.inner.lock().is_pass_through()
    }

    /// Number of queued entries.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending()
    }

    /// Clock time of the most recent notification, `None` before the first.
    pub fn last_update(&self) -> Option<Duration> {
        self.last_update.load()
    }

    pub fn is_latest_result_retained(&self) -> bool {
        self.inner.lock().is_retaining()
    }

    pub fn set_latest_result_retained(&self, retain: bool) {
        let mut inner = self.inner.lock();
        let retention = inner.set_retaining(retain);
        self.apply(retention);
    }

    /// Forget everything queued without delivering it.
    pub fn reset(&self) {
        self.inner.lock().clear();
    }

    fn apply(&self, retention: Retention) {
        let Some(retainer) = &self.retainer else {
            return;
        };
        if let Some(cycle) = retention.retain {
            retainer.retain(cycle);
        }
        if let Some(cycle) = retention.release {
            retainer.release(cycle);
        }
    }
}

impl<V: Clone> Coalescer<V> {
    /// Accept a notification from the producer.
    ///
    /// In pass-through mode, and always for `ClientShutdown`, the sink is invoked before this
    /// returns and its failure is reported here. Otherwise the notification is queued or merged
    /// and the call never fails.
    pub fn notify(&self, notification: Notification<V>) -> Result<(), DeliveryError> {
        if let Notification::ClientShutdown(_) = notification {
            return notification.deliver_to(&*self.sink);
        }
        let passed = {
            let mut inner = self.inner.lock();
            let (passed, retention) = inner.push(notification);
            self.apply(retention);
            self.last_update.advance(self.clock.now());
            passed
        };
        match passed {
            Some(notification) => notification.deliver_to(&*self.sink),
            None => Ok(()),
        }
    }

    /// Switch pass-through on or off.
    ///
    /// Switching it on detaches the queue, which the caller must then [`deliver`](Self::deliver)
    /// or it is lost. Switching it off returns an empty batch.
    pub fn set_pass_through(&self, pass_through: bool) -> Detached<V> {
        let entries = self.inner.lock().set_pass_through(pass_through);
        Detached { entries }
    }

    /// Deliver everything queued, in queue order.
    ///
    /// Deliveries from separate drains never overlap: if another drain is still delivering, this
    /// one hands its entries over to it and returns at once. Returns how many entries the sink
    /// accepted during this call, including entries handed over by others.
    pub fn drain(&self) -> usize {
        let claimed = {
            let mut inner = self.inner.lock();
            let entries = inner.take_all();
            inner.claim_delivery(entries)
        };
        self.deliver_claimed(claimed)
    }

    /// Deliver a detached batch to this coalescer's sink, in turn with any drain in progress.
    pub fn deliver(&self, detached: Detached<V>) -> usize {
        let claimed = self.inner.lock().claim_delivery(detached.entries);
        self.deliver_claimed(claimed)
    }

    fn deliver_claimed(&self, claimed: Option<Vec<Notification<V>>>) -> usize {
        let Some(entries) = claimed else {
            return 0;
        };
        let mut turn = DeliveryTurn {
            coalescer: self,
            done: false,
        };
        let mut accepted = Detached { entries }.deliver(&*self.sink);
        while let Some(entries) = turn.next() {
            accepted += Detached { entries }.deliver(&*self.sink);
        }
        accepted
    }

    fn forward(&self, notification: Notification<V>) -> SinkResult {
        self.notify(notification).map_err(Into::into)
    }
}

forward_sink_to_notify!(Coalescer);

/// The delivery turn held by one draining caller. Dropped early (a sink panicked), it gives the
/// turn up so later drains are not stranded.
struct DeliveryTurn<'a, V> {
    coalescer: &'a Coalescer<V>,
    done: bool,
}

impl<V> DeliveryTurn<'_, V> {
    fn next(&mut self) -> Option<Vec<Notification<V>>> {
        let next = self.coalescer.inner.lock().next_handoff();
        self.done = next.is_none();
        next
    }
}

impl<V> Drop for DeliveryTurn<'_, V> {
    fn drop(&mut self) {
        if !self.done {
            self.coalescer.inner.lock().release_delivery();
        }
    }
}

/// Notifications detached from a coalescer's queue, in delivery order.
#[derive(Debug)]
pub struct Detached<V> {
    entries: Vec<Notification<V>>,
}

impl<V> Default for Detached<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> Detached<V> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.entries.iter().map(Notification::kind).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification<V>> {
        self.entries.iter()
    }

    /// Hand every entry to `sink`, in order. A rejected entry is logged and counts as delivered;
    /// the rest still go out. Returns how many entries the sink accepted.
    pub fn deliver(self, sink: &(impl Sink<V> + ?Sized)) -> usize {
        if self.entries.is_empty() {
            return 0;
        }
        let total = self.entries.len();
        let mut accepted = 0;
        for notification in self.entries {
            match notification.deliver_to(sink) {
                Ok(()) => accepted += 1,
                Err(e) => warn!(kind = %e.kind, error = %e.source, "sink rejected queued notification"),
            }
        }
        trace!(total, accepted, "delivered detached notifications");
        accepted
    }
}

impl<V> IntoIterator for Detached<V> {
    type Item = Notification<V>;
    type IntoIter = std::vec::IntoIter<Notification<V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
