//! courier-core
//!
//! Core building blocks for the Courier job queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, state, keys, retry, errors）
//! - **typed**: job コントラクト（Job trait, Task trait, JobRegistry, EnvelopeCodec）
//! - **ports**: 抽象化レイヤー（QueueBackend, Store, Clock, IdGenerator）
//! - **impls**: 実装（StoreQueue, ImmediateQueue, InMemoryStore, RedisStore）
//! - **app**: アプリケーション層（QueueBuilder, WorkerGroup, ReaperLoop, QueueCounts）
//! - **config**: QueueConfig（環境変数による上書きと検証）
//!
//! # 配送保証
//! At-least-once。ワーカーが落ちた場合や予約が期限切れになった場合、
//! 同じ job が再度実行されうるので handler は冪等に書くこと。

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;
