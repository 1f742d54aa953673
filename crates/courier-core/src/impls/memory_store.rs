//! In-memory store implementation.
//!
//! Lists and sorted sets live behind one mutex, so every `Store` method is atomic.
//! Useful for tests and single-process deployments; nothing survives a restart.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::StoreError;
use crate::ports::Store;

/// Sorted set with Redis semantics: one score per member, ordered by (score, member).
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, score: i64, member: &str) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn up_to(&self, max_score: i64, limit: usize) -> Vec<String> {
        self.ordered
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .take(limit)
            .map(|(_, member)| member.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

#[derive(Debug, Default)]
struct InMemoryStoreState {
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, SortedSet>,
}

impl InMemoryStoreState {
    fn push_back(&mut self, list: &str, value: &str) {
        self.lists
            .entry(list.to_string())
            .or_default()
            .push_back(value.to_string());
    }

    fn pop_front(&mut self, list: &str) -> Option<String> {
        self.lists.get_mut(list).and_then(VecDeque::pop_front)
    }

    fn set_mut(&mut self, set: &str) -> &mut SortedSet {
        self.sets.entry(set.to_string()).or_default()
    }

    fn remove_member(&mut self, set: &str, member: &str) -> bool {
        self.sets.get_mut(set).is_some_and(|s| s.remove(member))
    }
}

/// In-memory store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryStoreState>>,
    notify: Arc<Notify>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn push_ready(&self, list: &str, value: &str) -> Result<(), StoreError> {
        self.state.lock().await.push_back(list, value);
        // Notify outside the lock
        self.notify.notify_waiters();
        Ok(())
    }

    async fn append(&self, list: &str, value: &str) -> Result<(), StoreError> {
        self.state.lock().await.push_back(list, value);
        Ok(())
    }

    async fn schedule(&self, set: &str, score: i64, member: &str) -> Result<(), StoreError> {
        self.state.lock().await.set_mut(set).insert(score, member);
        Ok(())
    }

    async fn due(&self, set: &str, max_score: i64, limit: usize) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(set)
            .map(|s| s.up_to(max_score, limit))
            .unwrap_or_default())
    }

    async fn promote(&self, set: &str, list: &str, member: &str) -> Result<bool, StoreError> {
        let moved = {
            let mut state = self.state.lock().await;
            let removed = state.remove_member(set, member);
            if removed {
                state.push_back(list, member);
            }
            removed
        };
        if moved {
            self.notify.notify_waiters();
        }
        Ok(moved)
    }

    async fn pop_reserve(
        &self,
        list: &str,
        reserved: &str,
        score: i64,
        wait: Duration,
    ) -> Result<Option<String>, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before checking, so a push between the check and the
            // wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(value) = state.pop_front(list) {
                    state.set_mut(reserved).insert(score, &value);
                    return Ok(Some(value));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn unschedule(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.remove_member(set, member))
    }

    async fn remove(&self, list: &str, value: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(items) = state.lists.get_mut(list) else {
            return Ok(false);
        };
        match items.iter().position(|item| item == value) {
            Some(index) => {
                items.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn range(&self, list: &str, offset: usize, limit: usize) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .lists
            .get(list)
            .map(|items| items.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_len(&self, list: &str) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.lists.get(list).map_or(0, |items| items.len() as u64))
    }

    async fn set_len(&self, set: &str) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sets.get(set).map_or(0, |s| s.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_list_is_fifo() {
        let store = InMemoryStore::new();
        store.push_ready("q", "a").await.unwrap();
        store.push_ready("q", "b").await.unwrap();

        let first = store.pop_reserve("q", "r", 10, Duration::ZERO).await.unwrap();
        let second = store.pop_reserve("q", "r", 10, Duration::ZERO).await.unwrap();
        assert_eq!(first.as_deref(), Some("a"));
        assert_eq!(second.as_deref(), Some("b"));
        assert_eq!(store.set_len("r").await.unwrap(), 2);
        assert_eq!(store.list_len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn due_is_a_score_range_query() {
        let store = InMemoryStore::new();
        store.schedule("d", 300, "late").await.unwrap();
        store.schedule("d", 100, "early").await.unwrap();
        store.schedule("d", 200, "middle").await.unwrap();

        assert_eq!(store.due("d", 200, 10).await.unwrap(), vec!["early", "middle"]);
        assert_eq!(store.due("d", 200, 1).await.unwrap(), vec!["early"]);
        assert!(store.due("d", 50, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rescheduling_a_member_moves_its_score() {
        let store = InMemoryStore::new();
        store.schedule("d", 100, "x").await.unwrap();
        store.schedule("d", 500, "x").await.unwrap();

        assert_eq!(store.set_len("d").await.unwrap(), 1);
        assert!(store.due("d", 100, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn promote_moves_a_member_once() {
        let store = InMemoryStore::new();
        store.schedule("d", 100, "x").await.unwrap();

        assert!(store.promote("d", "q", "x").await.unwrap());
        assert!(!store.promote("d", "q", "x").await.unwrap());
        assert_eq!(store.list_len("q").await.unwrap(), 1);
        assert_eq!(store.set_len("d").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_list() {
        let store = InMemoryStore::new();
        let start = Instant::now();
        let popped = store
            .pop_reserve("q", "r", 0, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(popped, None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn push_wakes_blocked_pop() {
        let store = InMemoryStore::new();
        let waiter = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .pop_reserve("q", "r", 0, Duration::from_secs(5))
                    .await
                    .unwrap()
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.push_ready("q", "hello").await.unwrap();

        assert_eq!(waiter.await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn remove_and_range_on_lists() {
        let store = InMemoryStore::new();
        for v in ["a", "b", "c"] {
            store.append("l", v).await.unwrap();
        }

        assert_eq!(store.range("l", 1, 5).await.unwrap(), vec!["b", "c"]);
        assert!(store.remove("l", "b").await.unwrap());
        assert!(!store.remove("l", "b").await.unwrap());
        assert_eq!(store.range("l", 0, 10).await.unwrap(), vec!["a", "c"]);
        assert!(!store.unschedule("missing", "a").await.unwrap());
    }
}
