//! Placeholder job for reserved envelopes that could not be rebuilt.

use async_trait::async_trait;

use super::job::{Job, JobMeta};
use crate::domain::JobError;

/// Stands in for a popped envelope whose type is unknown or whose payload was rejected.
///
/// It keeps the original type name and payload so that releasing it dead-letters the
/// envelope intact. It is never retryable and cannot be executed.
#[derive(Debug, Clone)]
pub struct UndecodedJob {
    meta: JobMeta,
    job_type: String,
    payload: String,
}

impl UndecodedJob {
    pub(crate) fn new(meta: JobMeta, job_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            meta,
            job_type: job_type.into(),
            payload: payload.into(),
        }
    }
}

#[async_trait]
impl Job for UndecodedJob {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn meta(&self) -> &JobMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut JobMeta {
        &mut self.meta
    }

    fn payload(&self) -> Result<String, JobError> {
        Ok(self.payload.clone())
    }

    fn set_payload(&mut self, payload: &str) -> Result<(), JobError> {
        self.payload = payload.to_string();
        Ok(())
    }

    async fn handle(&mut self) -> Result<(), JobError> {
        Err(JobError::failed(format!(
            "job type '{}' cannot be executed by this worker",
            self.job_type
        )))
    }

    fn retryable(&self) -> bool {
        false
    }
}
