//! Update-coalescing, rate-limited notification pipeline.
//!
//! A `mergewatch` pipeline sits between a producer of computation-cycle notifications and a
//! single downstream [`Sink`] that should not be driven at producer speed. It merges redundant
//! notifications so the sink sees the latest state rather than every intermediate one, keeps a
//! well-defined order between notification kinds while doing so, and can put a minimum period
//! between deliveries.
//!
//! Core behaviors:
//! * [`Coalescer`] starts in pass-through mode: notifications go straight to the sink on the
//!   calling thread. With pass-through off they are queued until [`Coalescer::drain`].
//! * `CycleCompleted` and `CycleFragmentCompleted` are mergeable: at most one of each is queued,
//!   and a later occurrence merges into it key-latest-wins (see [`merge`]) and moves it to the back
//!   of the queue. A kind that keeps updating is therefore delivered after the kinds that went
//!   quiet.
//! * `CycleStarted` is superseded on completion: a completion drops the start of any earlier cycle
//!   still queued, and a third start without a completion drops the oldest.
//! * `ClientShutdown` bypasses the queue entirely and is delivered at once.
//! * [`RateLimiter`] wraps a coalescer and switches between pass-through, rate-limited, and paused
//!   delivery. While rate limited a background task (see [`Scheduler`]) flushes at most once per
//!   minimum period; while paused nothing is delivered.
//! * The sink is never called with a pipeline lock held: queued notifications are detached under
//!   the lock and delivered after it is released, so a sink may block or call back in.
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//!
//! use mergewatch::{
//!     Coalescer, Failure, Notification, Sink, SinkResult,
//!     model::{CompiledDefinition, ComputationResult, CycleMetadata, DeltaResult, ExecutionOptions},
//! };
//!
//! #[derive(Default)]
//! struct Log(Mutex<Vec<String>>);
//!
//! impl Log {
//!     fn push(&self, entry: String) -> SinkResult {
//!         self.0.lock().unwrap().push(entry);
//!         Ok(())
//!     }
//! }
//!
//! impl Sink<i32> for Log {
//!     fn definition_compiled(&self, c: CompiledDefinition) -> SinkResult {
//!         self.push(format!("compiled {}", c.name))
//!     }
//!     fn definition_compilation_failed(&self, _: chrono::DateTime<chrono::Utc>, _: Failure) -> SinkResult {
//!         self.push("compilation failed".into())
//!     }
//!     fn cycle_started(&self, _: CycleMetadata) -> SinkResult {
//!         self.push("started".into())
//!     }
//!     fn cycle_completed(&self, _: Option<ComputationResult<i32>>, delta: Option<DeltaResult<i32>>) -> SinkResult {
//!         self.push(format!("completed with {} values", delta.map_or(0, |d| d.results.len())))
//!     }
//!     fn cycle_fragment_completed(&self, _: Option<ComputationResult<i32>>, _: Option<DeltaResult<i32>>) -> SinkResult {
//!         self.push("fragment".into())
//!     }
//!     fn cycle_execution_failed(&self, _: ExecutionOptions, _: Failure) -> SinkResult {
//!         self.push("execution failed".into())
//!     }
//!     fn process_completed(&self) -> SinkResult {
//!         self.push("process completed".into())
//!     }
//!     fn process_terminated(&self, _: bool) -> SinkResult {
//!         self.push("terminated".into())
//!     }
//!     fn client_shutdown(&self, _: Option<Failure>) -> SinkResult {
//!         self.push("shutdown".into())
//!     }
//! }
//!
//! let log = Arc::new(Log::default());
//! let coalescer: Coalescer<i32> = Coalescer::new(log.clone());
//! coalescer.set_pass_through(false);
//! for (name, v) in [("pv", 1), ("delta", 2)] {
//!     let mut delta = DeltaResult::default();
//!     delta.results.insert("Default", "swap-1", name, v);
//!     coalescer.notify(Notification::CycleCompleted { full: None, delta: Some(delta) }).unwrap();
//! }
//! // Nothing reaches the sink until the queue is drained, and then only one merged completion.
//! assert!(log.0.lock().unwrap().is_empty());
//! assert_eq!(coalescer.drain(), 1);
//! assert_eq!(*log.0.lock().unwrap(), vec!["completed with 2 values".to_string()]);
//! ```

pub mod clock;
pub mod merge;
pub mod model;
pub mod queue;
pub mod schedule;

mod coalescer;
mod error;
mod mutex;
mod notification;
mod raw;
mod rate_limit;

pub use crate::{
    clock::{Clock, ManualClock, MonotonicClock},
    coalescer::{Coalescer, Detached, ResultRetainer},
    error::{DeliveryError, Failure, SchedulerError, SinkError},
    notification::{Notification, NotificationKind, Sink, SinkResult},
    rate_limit::{MINIMUM_PERIOD_FLOOR, Mode, RateLimiter, RateLimiterConfig},
    schedule::{ManualScheduler, ScheduledTask, Scheduler, TokioScheduler},
};
