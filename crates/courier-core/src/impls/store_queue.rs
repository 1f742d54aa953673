//! StoreQueue - 順序付きストアを使う永続キュー
//!
//! # 構造（queue 名 Q ごと）
//! - `queues:Q` ready list（FIFO）
//! - `queues:Q:delayed` 遅延 job（score = available_at）
//! - `queues:Q:reserved` 実行中 job（score = 予約期限）
//! - `queues:failed` dead-letter（全 queue 共通）
//!
//! # Pop の前処理
//! 1. delayed から期限が来たものを ready へ移す（migration）
//! 2. retry_after が設定されていれば、期限切れの予約を ready へ戻す（reap）
//!
//! どちらも「exact value で remove できた場合だけ append」なので、
//! 複数ワーカーが同時に実行しても移動されるのは 1 コピーだけです。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::app::QueueCounts;
use crate::config::QueueConfig;
use crate::domain::{DeadLetter, Envelope, EnvelopeState, JobId, QueueError, QueueKeys, RetryPolicy};
use crate::ports::{Clock, IdGenerator, QueueBackend, Store, SystemClock, UlidGenerator};
use crate::typed::{EnvelopeCodec, Job, JobRegistry};

/// Durable, multi-process queue over a [`Store`].
pub struct StoreQueue<S> {
    store: S,
    registry: Arc<JobRegistry>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
    config: QueueConfig,
}

impl<S: Store> StoreQueue<S> {
    pub fn new(store: S, registry: Arc<JobRegistry>, config: QueueConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            store,
            registry,
            ids: Box::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            config,
        }
    }

    /// Replace the clock (ids are regenerated from it too).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Box::new(UlidGenerator::new(Arc::clone(&clock)));
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Store keys for `queue` (`""` means the default queue).
    pub fn keys(&self, queue: &str) -> QueueKeys {
        QueueKeys::new(&self.config.prefix, self.resolve(queue))
    }

    fn resolve<'a>(&'a self, queue: &'a str) -> &'a str {
        if queue.is_empty() {
            &self.config.default_queue
        } else {
            queue
        }
    }

    /// Caller's queue, else the job's own, else the default.
    fn queue_for(&self, queue: &str, job: &dyn Job) -> String {
        let name = if queue.is_empty() { job.queue() } else { queue };
        self.resolve(name).to_string()
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Score recorded on a new reservation.
    fn reservation_deadline(&self) -> i64 {
        match self.config.retry_after() {
            Some(ttl) => {
                let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                self.now_ms().saturating_add(ttl_ms)
            }
            None => i64::MAX,
        }
    }

    /// Move due members of `from` onto the ready list `to`.
    async fn migrate(&self, from: &str, to: &str) -> Result<usize, QueueError> {
        let due = self
            .store
            .due(from, self.now_ms(), self.config.migration_batch)
            .await?;

        let mut moved = 0;
        for member in &due {
            // false: another worker promoted it first
            if self.store.promote(from, to, member).await? {
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Delayed jobs whose `available_at` has passed become ready.
    pub async fn migrate_delayed(&self, queue: &str) -> Result<usize, QueueError> {
        let keys = self.keys(queue);
        let moved = self.migrate(&keys.delayed, &keys.ready).await?;
        if moved > 0 {
            debug!(queue = self.resolve(queue), moved, "migrated delayed jobs");
        }
        Ok(moved)
    }

    /// Reservations past their deadline go back to ready with attempts unchanged.
    ///
    /// No-op when `retry_after` is disabled.
    pub async fn reap_expired(&self, queue: &str) -> Result<usize, QueueError> {
        if self.config.retry_after().is_none() {
            return Ok(0);
        }
        let keys = self.keys(queue);
        let reaped = self.migrate(&keys.reserved, &keys.ready).await?;
        if reaped > 0 {
            warn!(
                queue = self.resolve(queue),
                reaped, "requeued expired reservations"
            );
        }
        Ok(reaped)
    }

    pub async fn counts(&self, queue: &str) -> Result<QueueCounts, QueueError> {
        let keys = self.keys(queue);
        Ok(QueueCounts {
            ready: self.store.list_len(&keys.ready).await?,
            delayed: self.store.set_len(&keys.delayed).await?,
            reserved: self.store.set_len(&keys.reserved).await?,
            dead: self.store.list_len(&keys.failed).await?,
        })
    }

    /// Dead-lettered jobs, oldest first. Unreadable records are skipped.
    pub async fn failed_jobs(&self, offset: usize, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        let failed = QueueKeys::failed_key(&self.config.prefix);
        let raws = self.store.range(&failed, offset, limit).await?;
        Ok(raws
            .iter()
            .filter_map(|raw| match serde_json::from_str::<DeadLetter>(raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable dead-letter record");
                    None
                }
            })
            .collect())
    }

    /// Take a dead-lettered job out of the failed list and push it again with
    /// attempts reset. Returns `false` when no record has that id.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn retry_failed(&self, id: &JobId) -> Result<bool, QueueError> {
        let failed = QueueKeys::failed_key(&self.config.prefix);
        let page = self.config.migration_batch;
        let mut offset = 0;

        loop {
            let raws = self.store.range(&failed, offset, page).await?;
            if raws.is_empty() {
                return Ok(false);
            }

            for raw in &raws {
                let Ok(record) = serde_json::from_str::<DeadLetter>(raw) else {
                    continue;
                };
                if &record.envelope.id != id {
                    continue;
                }
                if !self.store.remove(&failed, raw).await? {
                    // Retried concurrently by someone else
                    return Ok(false);
                }

                let now = self.clock.now();
                let envelope = Envelope {
                    token: Envelope::fresh_token(now),
                    attempts: 0,
                    created_at: now,
                    available_at: now,
                    ..record.envelope
                };
                let keys = self.keys(&record.queue);
                self.store
                    .push_ready(&keys.ready, &EnvelopeCodec::encode(&envelope)?)
                    .await?;
                debug!(queue = %record.queue, "dead-lettered job pushed again");
                return Ok(true);
            }
            offset += raws.len();
        }
    }

    /// `release` with the delay chosen by `policy` for the job's next attempt.
    pub async fn release_with_backoff(
        &self,
        queue: &str,
        job: &mut dyn Job,
        policy: &RetryPolicy,
    ) -> Result<(), QueueError> {
        let delay = policy.next_delay(job.attempts().saturating_add(1));
        self.release(queue, job, delay).await
    }

    async fn dead_letter(&self, keys: &QueueKeys, queue: &str, job: &dyn Job) -> Result<(), QueueError> {
        let now = self.clock.now();
        // Only a malformed envelope has no id
        let id = job.id().cloned().unwrap_or_else(|| self.ids.generate_job_id());
        let envelope = EnvelopeCodec::seal(job, id, queue, now, Duration::ZERO)?;
        let record = DeadLetter {
            queue: queue.to_string(),
            envelope,
            failed_at: now,
        };
        let raw = serde_json::to_string(&record).map_err(QueueError::Encode)?;
        self.store.append(&keys.failed, &raw).await?;

        warn!(
            job_id = %record.envelope.id,
            job_type = %record.envelope.job_type,
            attempts = record.envelope.attempts,
            "job dead-lettered"
        );
        Ok(())
    }
}

fn reservation_of(job: &dyn Job) -> Result<&str, QueueError> {
    job.meta()
        .reservation()
        .ok_or_else(|| QueueError::NotReserved(job.id().cloned().unwrap_or_else(|| JobId::new(""))))
}

#[async_trait]
impl<S: Store> QueueBackend for StoreQueue<S> {
    #[instrument(skip(self, job), fields(job_type = job.job_type()))]
    async fn later(&self, delay: Duration, job: &mut dyn Job, queue: &str) -> Result<(), QueueError> {
        let queue = self.queue_for(queue, &*job);
        let keys = self.keys(&queue);
        let now = self.clock.now();

        let id = match job.id().cloned() {
            Some(id) => id,
            None => {
                let id = self.ids.generate_job_id();
                job.set_id(id.clone());
                id
            }
        };
        job.set_queue(&queue);
        if job.meta().max_attempts == 0 {
            job.meta_mut().max_attempts = self.config.default_max_attempts;
        }

        let envelope = EnvelopeCodec::seal(&*job, id, &queue, now, delay)?;
        job.meta_mut().created_at = Some(envelope.created_at);
        let raw = EnvelopeCodec::encode(&envelope)?;

        match EnvelopeState::initial(delay) {
            EnvelopeState::Delayed => {
                self.store
                    .schedule(&keys.delayed, envelope.available_score(), &raw)
                    .await?
            }
            _ => self.store.push_ready(&keys.ready, &raw).await?,
        }

        debug!(
            job_id = %envelope.id,
            queue = %queue,
            attempts = envelope.attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "job enqueued"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pop(&self, queue: &str) -> Result<Option<Box<dyn Job>>, QueueError> {
        let queue = self.resolve(queue);
        let keys = self.keys(queue);

        self.migrate_delayed(queue).await?;
        self.reap_expired(queue).await?;

        let Some(raw) = self
            .store
            .pop_reserve(
                &keys.ready,
                &keys.reserved,
                self.reservation_deadline(),
                self.config.block_for(),
            )
            .await?
        else {
            return Ok(None);
        };

        match EnvelopeCodec::open(&self.registry, queue, &raw) {
            Ok(job) => {
                debug!(job_id = ?job.id(), attempts = job.attempts(), "job reserved");
                Ok(Some(job))
            }
            Err(failure) => {
                warn!(
                    job_type = failure.job.job_type(),
                    error = %failure.reason,
                    "reserved job could not be decoded"
                );
                Err(QueueError::Decode(failure))
            }
        }
    }

    #[instrument(skip(self, job), fields(job_id = ?job.id()))]
    async fn delete(&self, queue: &str, job: &dyn Job) -> Result<(), QueueError> {
        let raw = reservation_of(job)?;
        let keys = self.keys(&self.queue_for(queue, job));

        if !self.store.unschedule(&keys.reserved, raw).await? {
            warn!("reservation already gone; the job may run again");
        }
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_id = ?job.id()))]
    async fn release(&self, queue: &str, job: &mut dyn Job, delay: Duration) -> Result<(), QueueError> {
        let raw = reservation_of(&*job)?.to_string();
        let queue = self.queue_for(queue, &*job);
        let keys = self.keys(&queue);

        let previous = job.attempts();
        let attempts = previous.saturating_add(1);
        job.set_attempts(attempts);

        // The new copy is written before the reservation is dropped, so a crash in
        // between can only duplicate the job, never lose it.
        let written = if attempts >= job.max_attempts() || !job.retryable() {
            self.dead_letter(&keys, &queue, &*job).await
        } else {
            self.later(delay, job, &queue).await
        };
        if let Err(e) = written {
            // nothing was stored; a retried release must count this failure once
            job.set_attempts(previous);
            return Err(e);
        }

        if !self.store.unschedule(&keys.reserved, &raw).await? {
            warn!("reservation already gone; the job may run again");
        }
        job.meta_mut().reservation = None;
        Ok(())
    }

    async fn size(&self, queue: &str) -> Result<i64, QueueError> {
        let keys = self.keys(queue);
        let ready = self.store.list_len(&keys.ready).await?;
        let delayed = self.store.set_len(&keys.delayed).await?;
        Ok(i64::try_from(ready.saturating_add(delayed)).unwrap_or(i64::MAX))
    }
}
