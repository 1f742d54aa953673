//! Job trait - キューが扱う job の能力コントラクト
//!
//! # 二層構造
//! - **Job（object-safe）**: キュー/ワーカーが `Box<dyn Job>` として扱う
//! - **Task（型付き）**: serde で payload を表現する具体的な job（`TypedJob<T>` で Job に変換）

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobError, JobId};

/// Applied when a job reports `max_attempts == 0`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Queue bookkeeping carried by every job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobMeta {
    /// Assigned on first push when absent.
    pub id: Option<JobId>,
    pub queue: String,
    pub attempts: u32,
    /// 0 means "use the default" (see [`Job::max_attempts`]).
    pub max_attempts: u32,
    /// Set on first push and preserved across retries.
    pub created_at: Option<DateTime<Utc>>,
    /// Exact reserved record, set by pop. Needed to delete/release the reservation.
    pub(crate) reservation: Option<String>,
}

impl JobMeta {
    pub fn reservation(&self) -> Option<&str> {
        self.reservation.as_deref()
    }

    pub fn is_reserved(&self) -> bool {
        self.reservation.is_some()
    }
}

/// Job は識別子・キュー名・試行回数を持ち、自身の payload を (de)serialize し、実行できる
///
/// Handlers must be idempotent: delivery is at-least-once.
#[async_trait]
pub trait Job: fmt::Debug + Send + Sync {
    /// Registry name used to rebuild this job from an envelope.
    fn job_type(&self) -> &str;

    fn meta(&self) -> &JobMeta;

    fn meta_mut(&mut self) -> &mut JobMeta;

    /// Serialize the job's arguments.
    fn payload(&self) -> Result<String, JobError>;

    /// Restore the job's arguments from [`Job::payload`] output.
    fn set_payload(&mut self, payload: &str) -> Result<(), JobError>;

    /// Run the effect.
    async fn handle(&mut self) -> Result<(), JobError>;

    /// Hook for a failed run.
    async fn failed(&mut self, _error: &JobError) -> Result<(), JobError> {
        Ok(())
    }

    /// Non-retryable jobs are dead-lettered on their first release.
    fn retryable(&self) -> bool {
        true
    }

    fn id(&self) -> Option<&JobId> {
        self.meta().id.as_ref()
    }

    fn set_id(&mut self, id: JobId) {
        self.meta_mut().id = Some(id);
    }

    fn attempts(&self) -> u32 {
        self.meta().attempts
    }

    fn set_attempts(&mut self, attempts: u32) {
        self.meta_mut().attempts = attempts;
    }

    fn queue(&self) -> &str {
        &self.meta().queue
    }

    fn set_queue(&mut self, queue: &str) {
        self.meta_mut().queue = queue.to_string();
    }

    fn max_attempts(&self) -> u32 {
        match self.meta().max_attempts {
            0 => DEFAULT_MAX_ATTEMPTS,
            n => n,
        }
    }
}
