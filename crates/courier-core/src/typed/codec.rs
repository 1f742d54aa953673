//! EnvelopeCodec - Job と Envelope の相互変換
//!
//! # デシリアライズフロー
//! 1. 予約レコード（JSON 文字列）を Envelope に decode
//! 2. Envelope の type 名で JobRegistry から zero-value の job を作成
//! 3. payload を set_payload で復元し、メタデータ（id, attempts など）を戻す
//! 4. どこかで失敗したら UndecodedJob を含む DecodeFailure を返す

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::job::{Job, JobMeta};
use super::registry::JobRegistry;
use super::undecoded::UndecodedJob;
use crate::domain::{DecodeFailure, DecodeReason, Envelope, JobError, JobId, QueueError};

pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Build the envelope for `job`, eligible at `now + delay`.
    ///
    /// `created_at` is kept from the job when it has been pushed before.
    /// Every call issues a new `token`.
    pub fn seal(
        job: &dyn Job,
        id: JobId,
        queue: &str,
        now: DateTime<Utc>,
        delay: Duration,
    ) -> Result<Envelope, JobError> {
        let created_at = job.meta().created_at.unwrap_or(now);
        let available_at = add_delay(now, delay).max(created_at);
        Ok(Envelope {
            id,
            token: Envelope::fresh_token(now),
            job_type: job.job_type().to_string(),
            queue: queue.to_string(),
            payload: job.payload()?,
            attempts: job.attempts(),
            max_attempts: job.max_attempts(),
            created_at,
            available_at,
        })
    }

    pub fn encode(envelope: &Envelope) -> Result<String, QueueError> {
        serde_json::to_string(envelope).map_err(QueueError::Encode)
    }

    pub fn decode(raw: &str) -> Result<Envelope, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Rebuild the job held in the reserved record `raw` popped from `queue`.
    pub fn open(
        registry: &JobRegistry,
        queue: &str,
        raw: &str,
    ) -> Result<Box<dyn Job>, Box<DecodeFailure>> {
        let envelope = match Self::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                let meta = JobMeta {
                    queue: queue.to_string(),
                    reservation: Some(raw.to_string()),
                    ..JobMeta::default()
                };
                return Err(Box::new(DecodeFailure {
                    job: UndecodedJob::new(meta, "", raw),
                    reason: DecodeReason::Envelope(e),
                }));
            }
        };

        let meta = JobMeta {
            id: Some(envelope.id.clone()),
            queue: envelope.queue.clone(),
            attempts: envelope.attempts,
            max_attempts: envelope.max_attempts,
            created_at: Some(envelope.created_at),
            reservation: Some(raw.to_string()),
        };
        let undecoded = |meta: JobMeta, reason: DecodeReason| {
            Box::new(DecodeFailure {
                job: UndecodedJob::new(meta, envelope.job_type.as_str(), envelope.payload.as_str()),
                reason,
            })
        };

        let mut job = match registry.create(&envelope.job_type) {
            Ok(job) => job,
            Err(e) => return Err(undecoded(meta, DecodeReason::Registry(e))),
        };
        if let Err(e) = job.set_payload(&envelope.payload) {
            return Err(undecoded(meta, DecodeReason::Payload(e)));
        }
        *job.meta_mut() = meta;
        Ok(job)
    }
}

fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::task::fixtures::SendEmail;
    use crate::typed::{RegistryError, Task};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn registry() -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry.register_task::<SendEmail>().unwrap();
        registry
    }

    #[test]
    fn seal_sets_eligibility_from_delay() {
        let job = SendEmail::job("a@example.com");
        let env =
            EnvelopeCodec::seal(&job, JobId::new("j1"), "emails", now(), Duration::from_secs(5))
                .unwrap();

        assert_eq!(env.job_type, SendEmail::TYPE);
        assert_eq!(env.queue, "emails");
        assert_eq!(env.created_at, now());
        assert_eq!(env.available_at, now() + TimeDelta::seconds(5));
        assert_eq!(env.max_attempts, 3);
    }

    #[test]
    fn seal_preserves_original_creation_time() {
        let mut job = SendEmail::job("a@example.com");
        let created = now() - TimeDelta::minutes(10);
        job.meta_mut().created_at = Some(created);
        job.set_attempts(2);

        let env = EnvelopeCodec::seal(&job, JobId::new("j1"), "emails", now(), Duration::ZERO)
            .unwrap();
        assert_eq!(env.created_at, created);
        assert_eq!(env.available_at, now());
        assert_eq!(env.attempts, 2);
    }

    #[test]
    fn sealing_twice_gives_distinct_records() {
        let job = SendEmail::job("a@example.com");
        let a = EnvelopeCodec::seal(&job, JobId::new("j1"), "emails", now(), Duration::ZERO).unwrap();
        let b = EnvelopeCodec::seal(&job, JobId::new("j1"), "emails", now(), Duration::ZERO).unwrap();

        assert_ne!(a.token, b.token);
        assert_ne!(EnvelopeCodec::encode(&a).unwrap(), EnvelopeCodec::encode(&b).unwrap());
    }

    #[test]
    fn available_at_never_precedes_created_at() {
        let mut job = SendEmail::job("a@example.com");
        job.meta_mut().created_at = Some(now() + TimeDelta::seconds(30));

        let env = EnvelopeCodec::seal(&job, JobId::new("j1"), "q", now(), Duration::ZERO).unwrap();
        assert!(env.available_at >= env.created_at);
    }

    #[test]
    fn open_restores_job_and_metadata() {
        let mut job = SendEmail::job("a@example.com");
        job.set_attempts(1);
        let env = EnvelopeCodec::seal(&job, JobId::new("j1"), "emails", now(), Duration::ZERO)
            .unwrap();
        let raw = EnvelopeCodec::encode(&env).unwrap();

        let restored = EnvelopeCodec::open(&registry(), "emails", &raw).unwrap();
        assert_eq!(restored.id().map(JobId::as_str), Some("j1"));
        assert_eq!(restored.queue(), "emails");
        assert_eq!(restored.attempts(), 1);
        assert_eq!(restored.meta().reservation(), Some(raw.as_str()));
        assert_eq!(restored.payload().unwrap(), job.payload().unwrap());
    }

    #[test]
    fn open_unregistered_type_keeps_envelope_for_the_caller() {
        let job = SendEmail::job("a@example.com");
        let env = EnvelopeCodec::seal(&job, JobId::new("j1"), "emails", now(), Duration::ZERO)
            .unwrap();
        let raw = EnvelopeCodec::encode(&env).unwrap();

        let failure = EnvelopeCodec::open(&JobRegistry::new(), "emails", &raw).unwrap_err();
        assert!(matches!(
            failure.reason,
            DecodeReason::Registry(RegistryError::NotRegistered(ref t)) if t == SendEmail::TYPE
        ));
        assert_eq!(failure.job.job_type(), SendEmail::TYPE);
        assert_eq!(failure.job.payload().unwrap(), env.payload);
        assert_eq!(failure.job.meta().reservation(), Some(raw.as_str()));
        assert!(!failure.job.retryable());
    }

    #[test]
    fn open_rejects_malformed_envelope() {
        let failure = EnvelopeCodec::open(&registry(), "emails", "not json").unwrap_err();
        assert!(matches!(failure.reason, DecodeReason::Envelope(_)));
        assert_eq!(failure.job.queue(), "emails");
        assert!(failure.job.id().is_none());
    }

    #[test]
    fn open_rejects_malformed_payload() {
        let job = SendEmail::job("a@example.com");
        let mut env = EnvelopeCodec::seal(&job, JobId::new("j1"), "emails", now(), Duration::ZERO)
            .unwrap();
        env.payload = "[1,2,3]".into();
        let raw = EnvelopeCodec::encode(&env).unwrap();

        let failure = EnvelopeCodec::open(&registry(), "emails", &raw).unwrap_err();
        assert!(matches!(failure.reason, DecodeReason::Payload(_)));
        assert_eq!(failure.job.id().map(JobId::as_str), Some("j1"));
    }
}
