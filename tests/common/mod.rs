#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, OnceLock},
};

use chrono::{DateTime, Utc};
use mergewatch::{
    Failure, Notification, NotificationKind, ResultRetainer, Sink, SinkResult,
    model::{
        CompiledDefinition, ComputationResult, CycleId, CycleMetadata, DeltaResult,
        ExecutionOptions, ResultMetadata,
    },
};

type Hook = Box<dyn Fn(&Notification<i32>) + Send + Sync>;

/// Records every call it receives, optionally rejecting some kinds.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<Notification<i32>>>,
    reject: Mutex<HashSet<NotificationKind>>,
    hook: OnceLock<Hook>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record calls of `kind` but report them as failed.
    pub fn reject(&self, kind: NotificationKind) {
        self.reject.lock().unwrap().insert(kind);
    }

    /// Run `hook` after each call is recorded, with no sink lock held.
    pub fn on_record(&self, hook: impl Fn(&Notification<i32>) + Send + Sync + 'static) {
        assert!(self.hook.set(Box::new(hook)).is_ok(), "hook already set");
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.calls.lock().unwrap().iter().map(Notification::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn take(&self) -> Vec<Notification<i32>> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn record(&self, notification: Notification<i32>) -> SinkResult {
        let kind = notification.kind();
        self.calls.lock().unwrap().push(notification.clone());
        if let Some(hook) = self.hook.get() {
            hook(&notification);
        }
        if self.reject.lock().unwrap().contains(&kind) {
            return Err(format!("{kind} rejected").into());
        }
        Ok(())
    }
}

impl Sink<i32> for RecordingSink {
    fn definition_compiled(&self, compiled: CompiledDefinition) -> SinkResult {
        self.record(Notification::DefinitionCompiled(compiled))
    }

    fn definition_compilation_failed(&self, timestamp: DateTime<Utc>, error: Failure) -> SinkResult {
        self.record(Notification::DefinitionCompilationFailed { timestamp, error })
    }

    fn cycle_started(&self, metadata: CycleMetadata) -> SinkResult {
        self.record(Notification::CycleStarted(metadata))
    }

    fn cycle_completed(
        &self,
        full: Option<ComputationResult<i32>>,
        delta: Option<DeltaResult<i32>>,
    ) -> SinkResult {
        self.record(Notification::CycleCompleted { full, delta })
    }

    fn cycle_fragment_completed(
        &self,
        full: Option<ComputationResult<i32>>,
        delta: Option<DeltaResult<i32>>,
    ) -> SinkResult {
        self.record(Notification::CycleFragmentCompleted { full, delta })
    }

    fn cycle_execution_failed(&self, options: ExecutionOptions, error: Failure) -> SinkResult {
        self.record(Notification::CycleExecutionFailed { options, error })
    }

    fn process_completed(&self) -> SinkResult {
        self.record(Notification::ProcessCompleted)
    }

    fn process_terminated(&self, interrupted: bool) -> SinkResult {
        self.record(Notification::ProcessTerminated { interrupted })
    }

    fn client_shutdown(&self, error: Option<Failure>) -> SinkResult {
        self.record(Notification::ClientShutdown(error))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetainCall {
    Retain(CycleId),
    Release(CycleId),
}

#[derive(Default)]
pub struct RecordingRetainer {
    pub calls: Mutex<Vec<RetainCall>>,
}

impl ResultRetainer for RecordingRetainer {
    fn retain(&self, cycle: CycleId) {
        self.calls.lock().unwrap().push(RetainCall::Retain(cycle));
    }

    fn release(&self, cycle: CycleId) {
        self.calls.lock().unwrap().push(RetainCall::Release(cycle));
    }
}

pub fn failure(message: &str) -> Failure {
    Arc::new(std::io::Error::other(message.to_owned()))
}

pub fn compiled(name: &str) -> Notification<i32> {
    Notification::DefinitionCompiled(CompiledDefinition {
        name: name.to_owned(),
        ..Default::default()
    })
}

pub fn started(cycle: u64) -> Notification<i32> {
    Notification::CycleStarted(CycleMetadata {
        cycle_id: CycleId(cycle),
        ..Default::default()
    })
}

fn metadata(cycle: u64) -> ResultMetadata {
    ResultMetadata {
        cycle_id: CycleId(cycle),
        ..Default::default()
    }
}

fn delta(cycle: u64, values: &[(&str, i32)]) -> DeltaResult<i32> {
    let mut delta = DeltaResult::new(metadata(cycle), None);
    for &(name, v) in values {
        delta.results.insert("Default", "target", name, v);
    }
    delta
}

fn full(cycle: u64, values: &[(&str, i32)]) -> ComputationResult<i32> {
    let mut full = ComputationResult::new(metadata(cycle));
    for &(name, v) in values {
        full.results.insert("Default", "target", name, v);
    }
    full
}

/// A completion carrying only a delta.
pub fn completed_delta(cycle: u64, values: &[(&str, i32)]) -> Notification<i32> {
    Notification::CycleCompleted {
        full: None,
        delta: Some(delta(cycle, values)),
    }
}

/// A completion carrying the same values as both full result and delta.
pub fn completed(cycle: u64, values: &[(&str, i32)]) -> Notification<i32> {
    Notification::CycleCompleted {
        full: Some(full(cycle, values)),
        delta: Some(delta(cycle, values)),
    }
}

pub fn fragment(cycle: u64, values: &[(&str, i32)]) -> Notification<i32> {
    Notification::CycleFragmentCompleted {
        full: Some(full(cycle, values)),
        delta: Some(delta(cycle, values)),
    }
}

/// Delta values of a completion or fragment, by value name.
pub fn delta_values(notification: &Notification<i32>) -> BTreeMap<String, i32> {
    let (Notification::CycleCompleted { delta, .. } | Notification::CycleFragmentCompleted { delta, .. }) =
        notification
    else {
        panic!("no delta on {:?}", notification.kind());
    };
    delta
        .as_ref()
        .map(|d| d.results.iter().map(|(_, _, name, v)| (name.to_owned(), *v)).collect())
        .unwrap_or_default()
}

/// Full-result values of a completion or fragment, by value name.
pub fn full_values(notification: &Notification<i32>) -> BTreeMap<String, i32> {
    let (Notification::CycleCompleted { full, .. } | Notification::CycleFragmentCompleted { full, .. }) =
        notification
    else {
        panic!("no full result on {:?}", notification.kind());
    };
    full.as_ref()
        .map(|f| f.results.iter().map(|(_, _, name, v)| (name.to_owned(), *v)).collect())
        .unwrap_or_default()
}

pub fn values(pairs: &[(&str, i32)]) -> BTreeMap<String, i32> {
    pairs.iter().map(|&(k, v)| (k.to_owned(), v)).collect()
}
