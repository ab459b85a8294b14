use std::mem;

use tracing::debug;

use crate::{
    Notification,
    merge::{merge_delta, merge_full, merge_into},
    model::{ComputationResult, CycleId, DeltaResult},
    queue::{EntryRef, Queue},
};

/// Single-threaded coalescing state; always used under the coalescer's lock.
pub(super) struct Raw<V> {
    queue: Queue<Notification<V>>,
    previous_cycle_started: Option<EntryRef>,
    latest_cycle_started: Option<EntryRef>,
    cycle_completed: Option<EntryRef>,
    cycle_fragment_completed: Option<EntryRef>,
    pass_through: bool,
    retain_latest: bool,
    retained: Option<CycleId>,
    /// Someone is delivering detached entries to the sink.
    delivering: bool,
    /// Detached entries waiting for the current deliverer, in queue order.
    handoff: Vec<Notification<V>>,
}

/// Builds the notification a merge slot holds from its first payload.
type Build<V> = fn(Option<ComputationResult<V>>, Option<DeltaResult<V>>) -> Notification<V>;

/// Retention side effects the caller must apply to its `ResultRetainer`.
#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct Retention {
    pub(super) retain: Option<CycleId>,
    pub(super) release: Option<CycleId>,
}

impl<V> Raw<V> {
    pub(super) fn new() -> Self {
        Self {
            queue: Queue::new(),
            previous_cycle_started: None,
            latest_cycle_started: None,
            cycle_completed: None,
            cycle_fragment_completed: None,
            pass_through: true,
            retain_latest: false,
            retained: None,
            delivering: false,
            handoff: Vec::new(),
        }
    }

    pub(super) fn is_pass_through(&self) -> bool {
        self.pass_through
    }

    pub(super) fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Flip the pass-through flag. Turning it on detaches whatever was queued.
    pub(super) fn set_pass_through(&mut self, pass_through: bool) -> Vec<Notification<V>> {
        let was = self.pass_through;
        self.pass_through = pass_through;
        if pass_through && !was {
            self.take_all()
        } else {
            Vec::new()
        }
    }

    pub(super) fn take_all(&mut self) -> Vec<Notification<V>> {
        self.clear_slots();
        self.queue.take_all()
    }

    pub(super) fn clear(&mut self) {
        self.clear_slots();
        self.queue.clear();
    }

    /// Take the delivery turn for `entries`, together with anything handed off before them.
    ///
    /// While another caller holds the turn, `entries` join its hand-off list and `None` is
    /// returned; that caller delivers them after what it is delivering now.
    pub(super) fn claim_delivery(
        &mut self,
        entries: Vec<Notification<V>>,
    ) -> Option<Vec<Notification<V>>> {
        if self.delivering {
            self.handoff.extend(entries);
            return None;
        }
        if entries.is_empty() && self.handoff.is_empty() {
            return None;
        }
        self.delivering = true;
        let mut batch = mem::take(&mut self.handoff);
        batch.extend(entries);
        Some(batch)
    }

    /// Next batch for the turn holder. Gives up the turn when nothing is left.
    pub(super) fn next_handoff(&mut self) -> Option<Vec<Notification<V>>> {
        if self.handoff.is_empty() {
            self.delivering = false;
            None
        } else {
            Some(mem::take(&mut self.handoff))
        }
    }

    /// Give up the turn without draining the hand-off list; the next claim picks it up.
    pub(super) fn release_delivery(&mut self) {
        self.delivering = false;
    }

    pub(super) fn is_retaining(&self) -> bool {
        self.retain_latest
    }

    pub(super) fn set_retaining(&mut self, retain: bool) -> Retention {
        self.retain_latest = retain;
        if retain {
            Retention::default()
        } else {
            Retention {
                retain: None,
                release: self.retained.take(),
            }
        }
    }

    fn clear_slots(&mut self) {
        self.previous_cycle_started = None;
        self.latest_cycle_started = None;
        self.cycle_completed = None;
        self.cycle_fragment_completed = None;
    }

    fn unlink(&mut self, entry: EntryRef) {
        let removed = self.queue.remove(entry);
        assert!(removed.is_some(), "slot referenced a detached queue entry");
    }

    fn retain_result(&mut self, full: Option<&ComputationResult<V>>) -> Retention {
        let Some(full) = full.filter(|_| self.retain_latest) else {
            return Retention::default();
        };
        let cycle = full.cycle_id();
        if self.retained == Some(cycle) {
            return Retention::default();
        }
        Retention {
            retain: Some(cycle),
            release: self.retained.replace(cycle),
        }
    }

    fn release_result(&mut self) -> Retention {
        Retention {
            retain: None,
            release: self.retained.take(),
        }
    }
}

impl<V: Clone> Raw<V> {
    /// Queue or merge a notification.
    ///
    /// Returns the notification back untouched when in pass-through mode, or when it is a
    /// `ClientShutdown`; the caller delivers it.
    pub(super) fn push(&mut self, notification: Notification<V>) -> (Option<Notification<V>>, Retention) {
        let retention = match &notification {
            Notification::CycleCompleted { full, .. } => self.retain_result(full.as_ref()),
            Notification::ProcessTerminated { .. } => self.release_result(),
            _ => Retention::default(),
        };
        if self.pass_through || matches!(notification, Notification::ClientShutdown(_)) {
            return (Some(notification), retention);
        }
        match notification {
            Notification::CycleStarted(_) => self.push_cycle_started(notification),
            Notification::CycleCompleted { full, delta } => {
                let slot = self.cycle_completed;
                self.cycle_completed = Some(self.merge_or_append(slot, full, delta, |full, delta| {
                    Notification::CycleCompleted { full, delta }
                }));
                if let Some(previous) = self.previous_cycle_started.take() {
                    self.unlink(previous);
                }
            }
            Notification::CycleFragmentCompleted { full, delta } => {
                let slot = self.cycle_fragment_completed;
                self.cycle_fragment_completed =
                    Some(self.merge_or_append(slot, full, delta, |full, delta| {
                        Notification::CycleFragmentCompleted { full, delta }
                    }));
            }
            other => {
                self.queue.append(other);
            }
        }
        (None, retention)
    }

    fn push_cycle_started(&mut self, notification: Notification<V>) {
        if let Some(stale) = self.previous_cycle_started.take() {
            debug!("cycle started twice without a completion; dropping the older start");
            self.unlink(stale);
        }
        self.previous_cycle_started = self.latest_cycle_started.take();
        self.latest_cycle_started = Some(self.queue.append(notification));
    }

    fn merge_or_append(
        &mut self,
        slot: Option<EntryRef>,
        full: Option<ComputationResult<V>>,
        delta: Option<DeltaResult<V>>,
        build: Build<V>,
    ) -> EntryRef {
        let Some(entry) = slot else {
            return self.queue.append(build(full, delta));
        };
        match self.queue.get_mut(entry) {
            Some(
                Notification::CycleCompleted {
                    full: acc_full,
                    delta: acc_delta,
                }
                | Notification::CycleFragmentCompleted {
                    full: acc_full,
                    delta: acc_delta,
                },
            ) => {
                merge_into(acc_full, full, merge_full);
                merge_into(acc_delta, delta, merge_delta);
            }
            _ => panic!("merge slot does not hold a mergeable notification"),
        }
        let moved = self.queue.move_to_tail(entry);
        debug_assert!(moved);
        entry
    }
}
