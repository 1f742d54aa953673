//! WorkerLoop - pop → handle → delete | failed → release
//!
//! # フロー
//! 1. QueueBackend::pop() で job を予約（bounded wait）
//! 2. Job::handle() を実行
//! 3. 成功: delete（ack）
//! 4. 失敗: Job::failed() を呼び、RetryPolicy の遅延で release
//!    （attempts が上限に達していれば queue 側が dead-letter にする）
//! 5. decode できなかった job はログを出して release（= dead-letter）

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{QueueError, RetryPolicy};
use crate::ports::QueueBackend;
use crate::typed::Job;

/// Pause after a store error before the next pop.
const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Pause after a round in which every queue came back empty.
const IDLE_PAUSE: Duration = Duration::from_millis(25);

/// Counters shared by every worker of a group.
#[derive(Debug, Default)]
pub struct WorkerStats {
    succeeded: AtomicU64,
    released: AtomicU64,
    undecodable: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub succeeded: u64,
    pub released: u64,
    pub undecodable: u64,
    pub errors: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Worker group handle.
/// - `request_shutdown()` で全ワーカーに停止を通知（実行中の job は最後まで走る）
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl WorkerGroup {
    /// Spawn `n` workers popping `queues` in order (earlier names first).
    pub fn spawn(
        n: usize,
        backend: Arc<dyn QueueBackend>,
        queues: Vec<String>,
        policy: RetryPolicy,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(WorkerStats::default());
        let queues: Arc<[String]> = queues.into();
        let policy = Arc::new(policy);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = Worker {
                id: worker_id,
                backend: Arc::clone(&backend),
                queues: Arc::clone(&queues),
                policy: Arc::clone(&policy),
                stats: Arc::clone(&stats),
            };
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker.run(rx)));
        }

        info!(workers = n, queues = ?queues, "worker group started");
        Self {
            shutdown_tx,
            joins,
            stats,
        }
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Request shutdown for all workers.
    /// In-flight jobs are not cancelled; workers stop before their next pop.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) -> WorkerStatsSnapshot {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker task panicked");
            }
        }
        let stats = self.stats.snapshot();
        info!(?stats, "worker group stopped");
        stats
    }
}

struct Worker {
    id: usize,
    backend: Arc<dyn QueueBackend>,
    queues: Arc<[String]>,
    policy: Arc<RetryPolicy>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(worker = self.id, "worker started");
        'outer: loop {
            let mut busy = false;
            for queue in self.queues.iter() {
                // pop の bounded wait が唯一の待ち時間なので、ここで shutdown を確認する
                if *shutdown_rx.borrow() {
                    break 'outer;
                }

                match self.backend.pop(queue).await {
                    Ok(Some(job)) => {
                        busy = true;
                        self.process(queue, job).await;
                    }
                    Ok(None) => {}
                    Err(QueueError::Decode(failure)) => {
                        busy = true;
                        WorkerStats::bump(&self.stats.undecodable);
                        error!(
                            worker = self.id,
                            queue = %queue,
                            job_type = failure.job.job_type(),
                            error = %failure.reason,
                            "dead-lettering undecodable job"
                        );
                        let mut job = failure.job;
                        if let Err(e) = self.backend.release(queue, &mut job, Duration::ZERO).await {
                            error!(worker = self.id, error = %e, "release of undecodable job failed");
                        }
                    }
                    Err(e) => {
                        WorkerStats::bump(&self.stats.errors);
                        error!(worker = self.id, queue = %queue, error = %e, "pop failed");
                        tokio::select! {
                            _ = shutdown_rx.changed() => {}
                            _ = tokio::time::sleep(ERROR_PAUSE) => {}
                        }
                    }
                }
            }

            // pop may return at once (ImmediateQueue never blocks)
            if !busy {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // sender gone: the group handle was dropped
                        if changed.is_err() {
                            break 'outer;
                        }
                    }
                    _ = tokio::time::sleep(IDLE_PAUSE) => {}
                }
            }
        }
        debug!(worker = self.id, "worker stopped");
    }

    async fn process(&self, queue: &str, mut job: Box<dyn Job>) {
        match job.handle().await {
            Ok(()) => {
                WorkerStats::bump(&self.stats.succeeded);
                if let Err(e) = self.backend.delete(queue, job.as_ref()).await {
                    WorkerStats::bump(&self.stats.errors);
                    error!(worker = self.id, job_id = ?job.id(), error = %e, "delete failed");
                }
            }
            Err(failure) => {
                WorkerStats::bump(&self.stats.released);
                warn!(
                    worker = self.id,
                    job_id = ?job.id(),
                    job_type = job.job_type(),
                    attempts = job.attempts(),
                    error = %failure,
                    "job failed"
                );
                if let Err(e) = job.failed(&failure).await {
                    warn!(worker = self.id, job_id = ?job.id(), error = %e, "failed hook errored");
                }

                let delay = self.policy.next_delay(job.attempts().saturating_add(1));
                if let Err(e) = self.backend.release(queue, job.as_mut(), delay).await {
                    WorkerStats::bump(&self.stats.errors);
                    error!(worker = self.id, job_id = ?job.id(), error = %e, "release failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::impls::{InMemoryStore, StoreQueue};
    use crate::typed::task::fixtures::{ExpireReservation, SendEmail};
    use crate::typed::{JobRegistry, TypedJob};

    fn store_queue(registry: JobRegistry) -> Arc<StoreQueue<InMemoryStore>> {
        let config = QueueConfig {
            block_for_ms: 10,
            ..QueueConfig::default()
        };
        Arc::new(StoreQueue::new(InMemoryStore::new(), Arc::new(registry), config))
    }

    fn registry() -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry.register_task::<SendEmail>().unwrap();
        registry.register_task::<ExpireReservation>().unwrap();
        registry
    }

    async fn wait_until<F>(mut done: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn workers_drain_the_queue() {
        let queue = store_queue(registry());
        for i in 0..5 {
            let mut job = SendEmail::job(&format!("user{i}@example.com"));
            queue.push(&mut job, "emails").await.unwrap();
        }

        let group = WorkerGroup::spawn(
            2,
            queue.clone(),
            vec!["emails".into()],
            RetryPolicy::fixed(Duration::ZERO),
        );
        wait_until(|| group.stats().succeeded == 5).await;
        let stats = group.shutdown_and_join().await;

        assert_eq!(stats.succeeded, 5);
        assert!(queue.counts("emails").await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn failing_job_ends_in_dead_letter() {
        let queue = store_queue(registry());
        let mut job = TypedJob::new(ExpireReservation { reservation_id: 7 }).with_max_attempts(2);
        queue.push(&mut job, "default").await.unwrap();

        let group = WorkerGroup::spawn(
            1,
            queue.clone(),
            vec!["default".into()],
            RetryPolicy::fixed(Duration::ZERO),
        );
        wait_until(|| group.stats().released == 2).await;
        group.shutdown_and_join().await;

        let counts = queue.counts("default").await.unwrap();
        assert_eq!(counts.dead, 1);
        assert_eq!(counts.backlog(), 0);
        assert_eq!(queue.failed_jobs(0, 1).await.unwrap()[0].envelope.attempts, 2);
    }

    #[tokio::test]
    async fn undecodable_job_is_dead_lettered() {
        let producer = store_queue(registry());
        let mut job = SendEmail::job("a@example.com");
        producer.push(&mut job, "emails").await.unwrap();

        // same store, registry without the type
        let worker_queue = Arc::new(StoreQueue::new(
            producer.store().clone(),
            Arc::new(JobRegistry::new()),
            producer.config().clone(),
        ));
        let group = WorkerGroup::spawn(
            1,
            worker_queue.clone(),
            vec!["emails".into()],
            RetryPolicy::default(),
        );
        wait_until(|| group.stats().undecodable == 1).await;
        group.shutdown_and_join().await;

        let counts = worker_queue.counts("emails").await.unwrap();
        assert_eq!(counts.reserved, 0);
        assert_eq!(counts.dead, 1);
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let queue = store_queue(registry());
        let group = WorkerGroup::spawn(3, queue, vec!["emails".into()], RetryPolicy::default());

        let stats = tokio::time::timeout(Duration::from_secs(2), group.shutdown_and_join())
            .await
            .expect("workers stop after the current pop");
        assert_eq!(stats, WorkerStatsSnapshot::default());
    }

    /// Backend whose `pop` never waits.
    #[derive(Default)]
    struct EmptyBackend {
        pops: AtomicU64,
    }

    #[async_trait::async_trait]
    impl QueueBackend for EmptyBackend {
        async fn later(&self, _delay: Duration, _job: &mut dyn Job, _queue: &str) -> Result<(), QueueError> {
            Ok(())
        }
        async fn pop(&self, _queue: &str) -> Result<Option<Box<dyn Job>>, QueueError> {
            self.pops.fetch_add(1, Ordering::Relaxed);
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

    #[tokio::test]
    async fn idle_workers_pause_between_empty_rounds() {
        let backend = Arc::new(EmptyBackend::default());
        let group = WorkerGroup::spawn(1, backend.clone(), vec!["a".into(), "b".into()], RetryPolicy::default());

        tokio::time::sleep(Duration::from_millis(200)).await;
        group.shutdown_and_join().await;

        // two pops per round, one round per IDLE_PAUSE
        let pops = backend.pops.load(Ordering::Relaxed);
        assert!(pops >= 2, "worker never popped");
        assert!(pops < 100, "worker spun: {pops} pops");
    }
}
