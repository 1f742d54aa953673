//! Store port - 順序付きストア（Redis または InMemory）
//!
//! キューエンジンが必要とするのは list と sorted set の原子的なプリミティブだけです。
//! 各メソッドはストア上で 1 回の原子的操作として実行されなければなりません
//! （複数操作をまたぐロックは持たない）。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::StoreError;

/// Store は list / sorted set の原子的操作を提供
///
/// # 設計原則
/// - list: ready 構造と dead-letter 構造（FIFO）
/// - sorted set: delayed 構造と reserved 構造（score は epoch ミリ秒）
/// - 値は完全一致で削除される（同じ値の 2 回目の削除は no-op）
#[async_trait]
pub trait Store: Send + Sync {
    /// Append to a ready list and wake any poppers blocked on it.
    async fn push_ready(&self, list: &str, value: &str) -> Result<(), StoreError>;

    /// Append to a plain list (no wake-up).
    async fn append(&self, list: &str, value: &str) -> Result<(), StoreError>;

    /// Add `member` to a sorted set (or move it to `score` when already present).
    async fn schedule(&self, set: &str, score: i64, member: &str) -> Result<(), StoreError>;

    /// Members with `score <= max_score`, lowest score first, at most `limit`.
    async fn due(&self, set: &str, max_score: i64, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Remove `member` from `set`; only if it was present, append it to the ready `list`.
    ///
    /// Returns whether this call moved it. Concurrent callers racing on the same member
    /// see exactly one `true`.
    async fn promote(&self, set: &str, list: &str, member: &str) -> Result<bool, StoreError>;

    /// Pop the head of `list` and add it to `reserved` with `score`, as one operation.
    ///
    /// Waits up to `wait` for an item; `Ok(None)` on timeout.
    async fn pop_reserve(
        &self,
        list: &str,
        reserved: &str,
        score: i64,
        wait: Duration,
    ) -> Result<Option<String>, StoreError>;

    /// Remove `member` from a sorted set. Returns whether it was present.
    async fn unschedule(&self, set: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove the first occurrence of `value` from a list. Returns whether it was present.
    async fn remove(&self, list: &str, value: &str) -> Result<bool, StoreError>;

    /// `limit` list items starting at `offset`.
    async fn range(&self, list: &str, offset: usize, limit: usize) -> Result<Vec<String>, StoreError>;

    async fn list_len(&self, list: &str) -> Result<u64, StoreError>;

    async fn set_len(&self, set: &str) -> Result<u64, StoreError>;
}
