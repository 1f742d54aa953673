//! Errors - エラー型と分類
//!
//! - [`JobError`]: アプリケーション側の失敗（エンジンのエラーではない）
//! - [`StoreError`]: バックエンドストアの一時的な障害
//! - [`QueueError`]: キュー操作の呼び出し元に返るエラー

use thiserror::Error;

use super::ids::JobId;
use crate::typed::{RegistryError, UndecodedJob};

/// Failure raised by a job's own code (handle / failed hook / payload codec).
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job failed: {0}")]
    Failed(String),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors from the backing store. Treated as transient; the engine never retries them.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),
}

/// Why a reserved envelope could not be turned back into a job.
#[derive(Debug, Error)]
pub enum DecodeReason {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("payload rejected: {0}")]
    Payload(#[source] JobError),
}

/// A popped envelope that could not be decoded.
///
/// The envelope stays in the reservation structure. `job` can be handed back to
/// `delete` or `release` so the caller decides its fate.
#[derive(Debug)]
pub struct DecodeFailure {
    pub job: UndecodedJob,
    pub reason: DecodeReason,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode reserved job: {}", .0.reason)]
    Decode(Box<DecodeFailure>),

    #[error("job {0} is not reserved by this worker")]
    NotReserved(JobId),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl QueueError {
    /// Is this a store outage (retry later) rather than a problem with the job itself?
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Store(_))
    }
}
