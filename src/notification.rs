use std::fmt;

use chrono::{DateTime, Utc};

use crate::{
    error::{DeliveryError, Failure, SinkError},
    model::{CompiledDefinition, ComputationResult, CycleMetadata, DeltaResult, ExecutionOptions},
};

/// One event a producer emits toward a [`Sink`].
#[derive(Clone, Debug)]
pub enum Notification<V> {
    DefinitionCompiled(CompiledDefinition),
    DefinitionCompilationFailed {
        timestamp: DateTime<Utc>,
        error: Failure,
    },
    CycleStarted(CycleMetadata),
    /// Mergeable: a later occurrence folds into the queued one.
    CycleCompleted {
        full: Option<ComputationResult<V>>,
        delta: Option<DeltaResult<V>>,
    },
    /// Mergeable: a later occurrence folds into the queued one.
    CycleFragmentCompleted {
        full: Option<ComputationResult<V>>,
        delta: Option<DeltaResult<V>>,
    },
    CycleExecutionFailed {
        options: ExecutionOptions,
        error: Failure,
    },
    ProcessCompleted,
    ProcessTerminated {
        interrupted: bool,
    },
    /// Out-of-band and terminal; never queued.
    ClientShutdown(Option<Failure>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    DefinitionCompiled,
    DefinitionCompilationFailed,
    CycleStarted,
    CycleCompleted,
    CycleFragmentCompleted,
    CycleExecutionFailed,
    ProcessCompleted,
    ProcessTerminated,
    ClientShutdown,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DefinitionCompiled => "definition-compiled",
            Self::DefinitionCompilationFailed => "definition-compilation-failed",
            Self::CycleStarted => "cycle-started",
            Self::CycleCompleted => "cycle-completed",
            Self::CycleFragmentCompleted => "cycle-fragment-completed",
            Self::CycleExecutionFailed => "cycle-execution-failed",
            Self::ProcessCompleted => "process-completed",
            Self::ProcessTerminated => "process-terminated",
            Self::ClientShutdown => "client-shutdown",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<V> Notification<V> {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::DefinitionCompiled(_) => NotificationKind::DefinitionCompiled,
            Self::DefinitionCompilationFailed { .. } => NotificationKind::DefinitionCompilationFailed,
            Self::CycleStarted(_) => NotificationKind::CycleStarted,
            Self::CycleCompleted { .. } => NotificationKind::CycleCompleted,
            Self::CycleFragmentCompleted { .. } => NotificationKind::CycleFragmentCompleted,
            Self::CycleExecutionFailed { .. } => NotificationKind::CycleExecutionFailed,
            Self::ProcessCompleted => NotificationKind::ProcessCompleted,
            Self::ProcessTerminated { .. } => NotificationKind::ProcessTerminated,
            Self::ClientShutdown(_) => NotificationKind::ClientShutdown,
        }
    }

    /// Invoke the sink method matching this notification.
    pub fn deliver_to(self, sink: &(impl Sink<V> + ?Sized)) -> Result<(), DeliveryError> {
        let kind = self.kind();
        let result = match self {
            Self::DefinitionCompiled(compiled) => sink.definition_compiled(compiled),
            Self::DefinitionCompilationFailed { timestamp, error } => {
                sink.definition_compilation_failed(timestamp, error)
            }
            Self::CycleStarted(metadata) => sink.cycle_started(metadata),
            Self::CycleCompleted { full, delta } => sink.cycle_completed(full, delta),
            Self::CycleFragmentCompleted { full, delta } => sink.cycle_fragment_completed(full, delta),
            Self::CycleExecutionFailed { options, error } => sink.cycle_execution_failed(options, error),
            Self::ProcessCompleted => sink.process_completed(),
            Self::ProcessTerminated { interrupted } => sink.process_terminated(interrupted),
            Self::ClientShutdown(error) => sink.client_shutdown(error),
        };
        result.map_err(|source| DeliveryError { kind, source })
    }
}

pub type SinkResult = Result<(), SinkError>;

/// The downstream consumer: one method per [`Notification`] variant.
///
/// Implementations may block and may fail. They are never invoked while a pipeline lock is held,
/// so they may call back into the pipeline that is delivering to them.
pub trait Sink<V>: Send + Sync {
    fn definition_compiled(&self, compiled: CompiledDefinition) -> SinkResult;

    fn definition_compilation_failed(&self, timestamp: DateTime<Utc>, error: Failure) -> SinkResult;

    fn cycle_started(&self, metadata: CycleMetadata) -> SinkResult;

    fn cycle_completed(
        &self,
        full: Option<ComputationResult<V>>,
        delta: Option<DeltaResult<V>>,
    ) -> SinkResult;

    fn cycle_fragment_completed(
        &self,
        full: Option<ComputationResult<V>>,
        delta: Option<DeltaResult<V>>,
    ) -> SinkResult;

    fn cycle_execution_failed(&self, options: ExecutionOptions, error: Failure) -> SinkResult;

    fn process_completed(&self) -> SinkResult;

    fn process_terminated(&self, interrupted: bool) -> SinkResult;

    fn client_shutdown(&self, error: Option<Failure>) -> SinkResult;
}

/// Adapts a [`Sink`] implementation whose every method funnels into `notify`.
macro_rules! forward_sink_to_notify {
    ($ty:ident) => {
        impl<V: Clone + Send + 'static> $crate::notification::Sink<V> for $ty<V> {
            fn definition_compiled(
                &self,
                compiled: $crate::model::CompiledDefinition,
            ) -> $crate::notification::SinkResult {
                self.forward($crate::Notification::DefinitionCompiled(compiled))
            }

            fn definition_compilation_failed(
                &self,
                timestamp: ::chrono::DateTime<::chrono::Utc>,
                error: $crate::error::Failure,
            ) -> $crate::notification::SinkResult {
                self.forward($crate::Notification::DefinitionCompilationFailed { timestamp, error })
            }

            fn cycle_started(
                &self,
                metadata: $crate::model::CycleMetadata,
            ) -> $crate::notification::SinkResult {
                self.forward($crate::Notification::CycleStarted(metadata))
            }

            fn cycle_completed(
                &self,
                full: Option<$crate::model::ComputationResult<V>>,
                delta: Option<$crate::model::DeltaResult<V>>,
            ) -> $crate::notification::SinkResult {
                self.forward($crate::Notification::CycleCompleted { full, delta })
            }

            fn cycle_fragment_completed(
                &self,
                full: Option<$crate::model::ComputationResult<V>>,
                delta: Option<$crate::model::DeltaResult<V>>,
            ) -> $crate::notification::SinkResult {
                self.forward($crate::Notification::CycleFragmentCompleted { full, delta })
            }

            fn cycle_execution_failed(
                &self,
                options: $crate::model::ExecutionOptions,
                error: $crate::error::Failure,
            ) -> $crate::notification::SinkResult {
                self.forward($crate::Notification::CycleExecutionFailed { options, error })
            }

            fn process_completed(&self) -> $crate::notification::SinkResult {
                self.forward($crate::Notification::ProcessCompleted)
            }

            fn process_terminated(&self, interrupted: bool) -> $crate::notification::SinkResult {
                self.forward($crate::Notification::ProcessTerminated { interrupted })
            }

            fn client_shutdown(
                &self,
                error: Option<$crate::error::Failure>,
            ) -> $crate::notification::SinkResult {
                self.forward($crate::Notification::ClientShutdown(error))
            }
        }
    };
}

pub(crate) use forward_sink_to_notify;
