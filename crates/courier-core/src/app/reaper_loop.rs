//! ReaperLoop - 期限切れ予約の回収と遅延 job の移動を定期実行
//!
//! Pop の前処理でも同じことをするので必須ではありません。
//! ワーカーが止まっている queue でも期限切れの予約を ready に戻したいときに使います。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::domain::QueueError;
use crate::impls::StoreQueue;
use crate::ports::Store;

/// ReaperLoop は一定間隔で migrate_delayed / reap_expired を実行
///
/// # フロー
/// 1. interval ごとに各 queue の delayed を ready へ移す
/// 2. 期限切れの予約を ready へ戻す（attempts は変えない）
/// 3. shutdown が来たら抜ける
pub struct ReaperLoop<S> {
    queue: Arc<StoreQueue<S>>,
    queues: Vec<String>,
    interval: Duration,
}

/// Totals from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sweep {
    pub migrated: usize,
    pub reaped: usize,
}

impl<S: Store + 'static> ReaperLoop<S> {
    pub fn new(queue: Arc<StoreQueue<S>>, queues: Vec<String>, interval: Duration) -> Self {
        Self {
            queue,
            queues,
            interval,
        }
    }

    /// One pass over every queue.
    pub async fn sweep(&self) -> Result<Sweep, QueueError> {
        let mut total = Sweep::default();
        for queue in &self.queues {
            total.migrated += self.queue.migrate_delayed(queue).await?;
            total.reaped += self.queue.reap_expired(queue).await?;
        }
        Ok(total)
    }

    /// Sweep every `interval` until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(sweep) if sweep != Sweep::default() => {
                            debug!(migrated = sweep.migrated, reaped = sweep.reaped, "reaper sweep");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "reaper sweep failed"),
                    }
                }
            }
        }
        debug!("reaper stopped");
    }

    /// Run on a tokio task; send `true` on the returned sender to stop it.
    pub fn spawn(self) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let join = tokio::spawn(self.run(rx));
        (tx, join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::impls::InMemoryStore;
    use crate::ports::{ManualClock, QueueBackend};
    use crate::typed::JobRegistry;
    use crate::typed::task::fixtures::SendEmail;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<StoreQueue<InMemoryStore>>, ManualClock) {
        let mut registry = JobRegistry::new();
        registry.register_task::<SendEmail>().unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let config = QueueConfig {
            block_for_ms: 10,
            retry_after_secs: Some(30),
            ..QueueConfig::default()
        };
        let queue = StoreQueue::new(InMemoryStore::new(), Arc::new(registry), config)
            .with_clock(Arc::new(clock.clone()));
        (Arc::new(queue), clock)
    }

    #[tokio::test]
    async fn sweep_moves_due_and_expired_entries() {
        let (queue, clock) = setup();
        queue.push(&mut SendEmail::job("a@example.com"), "emails").await.unwrap();
        queue
            .later(Duration::from_secs(10), &mut SendEmail::job("b@example.com"), "emails")
            .await
            .unwrap();
        let _abandoned = queue.pop("emails").await.unwrap().unwrap();

        let reaper = ReaperLoop::new(Arc::clone(&queue), vec!["emails".into()], Duration::from_secs(1));
        assert_eq!(reaper.sweep().await.unwrap(), Sweep::default());

        clock.advance(Duration::from_secs(31));
        assert_eq!(
            reaper.sweep().await.unwrap(),
            Sweep {
                migrated: 1,
                reaped: 1
            }
        );
        let counts = queue.counts("emails").await.unwrap();
        assert_eq!(counts.ready, 2);
        assert_eq!(counts.reserved, 0);
    }

    #[tokio::test]
    async fn spawned_reaper_stops_on_signal() {
        let (queue, _clock) = setup();
        let reaper = ReaperLoop::new(queue, vec!["emails".into()], Duration::from_millis(5));
        let (stop, join) = reaper.spawn();

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .expect("reaper exits")
            .unwrap();
    }
}
