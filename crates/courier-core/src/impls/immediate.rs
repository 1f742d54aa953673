//! ImmediateQueue - 呼び出し元でその場で実行するキュー（ローカル/テスト用）
//!
//! ストアも並行性も持たず、push/later が job を直接実行します。
//! 失敗してもリトライせず、job の failed フックを呼ぶだけです。

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::QueueError;
use crate::ports::{IdGenerator, QueueBackend, SystemClock, UlidGenerator};
use crate::typed::Job;

pub struct ImmediateQueue {
    ids: Box<dyn IdGenerator>,
    default_queue: String,
}

impl ImmediateQueue {
    pub fn new() -> Self {
        Self {
            ids: Box::new(UlidGenerator::new(SystemClock)),
            default_queue: "default".to_string(),
        }
    }

    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }
}

impl Default for ImmediateQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for ImmediateQueue {
    /// Sleeps for `delay`, then runs the job here.
    ///
    /// A failing job is handed to its `failed` hook and the call still succeeds;
    /// only an error from the hook itself is returned.
    async fn later(&self, delay: Duration, job: &mut dyn Job, queue: &str) -> Result<(), QueueError> {
        if job.id().is_none() {
            job.set_id(self.ids.generate_job_id());
        }
        let queue = match (queue.is_empty(), job.queue().is_empty()) {
            (false, _) => queue.to_string(),
            (true, false) => job.queue().to_string(),
            (true, true) => self.default_queue.clone(),
        };
        job.set_queue(&queue);

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match job.handle().await {
            Ok(()) => {
                debug!(job_id = ?job.id(), queue = %queue, "job ran inline");
                Ok(())
            }
            Err(error) => {
                warn!(job_id = ?job.id(), queue = %queue, error = %error, "inline job failed");
                job.failed(&error).await?;
                Ok(())
            }
        }
    }

    async fn pop(&self, _queue: &str) -> Result<Option<Box<dyn Job>>, QueueError> {
        Ok(None)
    }

    async fn delete(&self, _queue: &str, _job: &dyn Job) -> Result<(), QueueError> {
        Ok(())
    }

    async fn release(&self, _queue: &str, _job: &mut dyn Job, _delay: Duration) -> Result<(), QueueError> {
        Ok(())
    }

    async fn size(&self, _queue: &str) -> Result<i64, QueueError> {
        Ok(0)
    }
}
