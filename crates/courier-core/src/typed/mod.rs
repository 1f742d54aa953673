//! Typed - job コントラクトと型付き Task API
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait - serde で引数を表現する型安全な job
//! - **内部（Dyn）**: `Job` trait - object-safe, type erasure（`TypedJob<T>` で変換）
//!
//! `JobRegistry` が型名から job を作り直し、`EnvelopeCodec` が Envelope との変換を担う。

pub mod codec;
pub mod job;
pub mod registry;
pub mod task;
pub mod undecoded;

// 主要な trait/型 を再エクスポート
pub use self::codec::EnvelopeCodec;
pub use self::job::{DEFAULT_MAX_ATTEMPTS, Job, JobMeta};
pub use self::registry::{JobFactory, JobRegistry, RegistryError};
pub use self::task::{Task, TypedJob};
pub use self::undecoded::UndecodedJob;
