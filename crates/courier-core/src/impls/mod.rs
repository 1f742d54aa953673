//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **StoreQueue**: Store の上に組んだ永続キュー（QueueBackend）
//! - **ImmediateQueue**: その場で実行する QueueBackend（ローカル/テスト用）
//! - **InMemoryStore**: 開発・テスト用の Store
//! - **RedisStore**: 本番用の Store（feature `redis`）

pub mod immediate;
pub mod memory_store;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store_queue;

// 主要な型を再エクスポート
pub use self::immediate::ImmediateQueue;
pub use self::memory_store::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis_store::RedisStore;
pub use self::store_queue::StoreQueue;
