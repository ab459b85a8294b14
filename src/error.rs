use std::{error::Error as StdError, sync::Arc};

use thiserror::Error;

use crate::notification::NotificationKind;

/// What a [`Sink`](crate::Sink) returns when it cannot accept a notification.
pub type SinkError = Box<dyn StdError + Send + Sync>;

/// Shareable error payload carried by failure notifications.
pub type Failure = Arc<dyn StdError + Send + Sync>;

/// A sink rejected a notification.
#[derive(Debug, Error)]
#[error("sink failed to accept {kind} notification")]
pub struct DeliveryError {
    pub kind: NotificationKind,
    #[source]
    pub source: SinkError,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no tokio runtime available to drive scheduled flushes")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
