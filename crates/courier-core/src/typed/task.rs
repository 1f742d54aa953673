//! Task trait - 型付き job の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - Type erasure パターン (`TypedJob<T>` → `dyn Job`)

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::job::{Job, JobMeta};
use crate::domain::JobError;

/// Task は job の型名と引数の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
/// }
///
/// #[async_trait]
/// impl Task for SendEmail {
///     const TYPE: &'static str = "mail.send.v1";
///
///     async fn handle(&self) -> Result<(), JobError> {
///         Ok(())
///     }
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize + DeserializeOwned`: payload の保存と復元
/// - `Default`: registry が zero-value を作るため
#[async_trait]
pub trait Task: Serialize + DeserializeOwned + Default + fmt::Debug + Send + Sync + 'static {
    /// 命名規約: `{domain}.{action}.v{major}`（例: `mail.send.v1`）
    const TYPE: &'static str;

    /// 0 は既定値（3）を意味する
    const MAX_ATTEMPTS: u32 = 0;

    async fn handle(&self) -> Result<(), JobError>;

    async fn failed(&self, _error: &JobError) -> Result<(), JobError> {
        Ok(())
    }
}

/// Adapts a [`Task`] to the object-safe [`Job`] contract; payload is the task as JSON.
#[derive(Debug, Default)]
pub struct TypedJob<T: Task> {
    meta: JobMeta,
    task: T,
}

impl<T: Task> TypedJob<T> {
    pub fn new(task: T) -> Self {
        Self {
            meta: JobMeta {
                max_attempts: T::MAX_ATTEMPTS,
                ..JobMeta::default()
            },
            task,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.meta.max_attempts = max_attempts;
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.meta.queue = queue.into();
        self
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn into_task(self) -> T {
        self.task
    }
}

#[async_trait]
impl<T: Task> Job for TypedJob<T> {
    fn job_type(&self) -> &str {
        T::TYPE
    }

    fn meta(&self) -> &JobMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut JobMeta {
        &mut self.meta
    }

    fn payload(&self) -> Result<String, JobError> {
        Ok(serde_json::to_string(&self.task)?)
    }

    fn set_payload(&mut self, payload: &str) -> Result<(), JobError> {
        self.task = serde_json::from_str(payload)?;
        Ok(())
    }

    async fn handle(&mut self) -> Result<(), JobError> {
        self.task.handle().await
    }

    async fn failed(&mut self, error: &JobError) -> Result<(), JobError> {
        self.task.failed(error).await
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{ExpireReservation, SendEmail};
    use super::*;

    #[test]
    fn payload_roundtrips_through_set_payload() {
        let job = SendEmail::job("a@example.com");
        let payload = job.payload().unwrap();

        let mut restored = TypedJob::<SendEmail>::default();
        restored.set_payload(&payload).unwrap();
        assert_eq!(restored.task(), job.task());
    }

    #[test]
    fn malformed_payload_is_a_payload_error() {
        let mut job = TypedJob::<SendEmail>::default();
        let err = job.set_payload("{not json").unwrap_err();
        assert!(matches!(err, JobError::Payload(_)));
    }

    #[test]
    fn max_attempts_comes_from_task_constant() {
        let job = TypedJob::new(ExpireReservation { reservation_id: 9 });
        assert_eq!(job.max_attempts(), 5);

        let job = SendEmail::job("a@example.com");
        assert_eq!(job.max_attempts(), 3);

        let job = SendEmail::job("a@example.com").with_max_attempts(1);
        assert_eq!(job.max_attempts(), 1);
    }

    #[tokio::test]
    async fn handle_delegates_to_task() {
        let mut ok = SendEmail::job("a@example.com");
        assert!(ok.handle().await.is_ok());

        let mut failing = TypedJob::new(ExpireReservation { reservation_id: 9 });
        let err = failing.handle().await.unwrap_err();
        assert_eq!(err.to_string(), "job failed: reservation 9 is locked");
    }
}
