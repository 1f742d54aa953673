//! App - アプリケーション層
//!
//! ports と impls を組み合わせて、キューを動かす部品を提供します。
//!
//! # 主要コンポーネント
//! - **QueueBuilder**: registry・設定・ストアのワイヤリングと起動時検証
//! - **WorkerGroup**: pop→handle→delete/release を回すワーカー群
//! - **ReaperLoop**: 遅延 job の移動と期限切れ予約の回収を定期実行
//! - **QueueCounts**: キューの観測用カウント

pub mod builder;
pub mod reaper_loop;
pub mod status;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, QueueBuilder};
pub use self::reaper_loop::{ReaperLoop, Sweep};
pub use self::status::QueueCounts;
pub use self::worker_loop::{WorkerGroup, WorkerStats, WorkerStatsSnapshot};
