//! QueueBackend port - producers と workers が依存するキューの契約
//!
//! # 実装
//! - **StoreQueue**: 順序付きストアを使う永続キュー（複数プロセス対応）
//! - **ImmediateQueue**: 呼び出し元で同期実行する（ローカル/テスト用）

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::QueueError;
use crate::typed::Job;

/// Contract honoured by every queue backend.
///
/// Workers loop `pop -> handle -> delete | release`. `delete`/`release` are only valid
/// for a job this worker popped itself.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Same as `later(Duration::ZERO, job, queue)`.
    async fn push(&self, job: &mut dyn Job, queue: &str) -> Result<(), QueueError> {
        self.later(Duration::ZERO, job, queue).await
    }

    /// Enqueue `job` so it becomes eligible after `delay`. Assigns an identity if absent.
    async fn later(&self, delay: Duration, job: &mut dyn Job, queue: &str) -> Result<(), QueueError>;

    /// Claim the next ready job, waiting a bounded time. `Ok(None)` means nothing was ready.
    async fn pop(&self, queue: &str) -> Result<Option<Box<dyn Job>>, QueueError>;

    /// Acknowledge a popped job after successful execution.
    async fn delete(&self, queue: &str, job: &dyn Job) -> Result<(), QueueError>;

    /// Give a popped job back after a failed run: retried after `delay`, or dead-lettered
    /// once its attempts are exhausted.
    async fn release(&self, queue: &str, job: &mut dyn Job, delay: Duration) -> Result<(), QueueError>;

    /// Ready + delayed backlog. In-flight and dead-lettered jobs are not counted.
    async fn size(&self, queue: &str) -> Result<i64, QueueError>;
}
