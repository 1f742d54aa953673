//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（Redis など）や時刻・ID 生成への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod backend;
pub mod clock;
pub mod id_generator;
pub mod store;

// 主要な trait を再エクスポート
pub use self::backend::QueueBackend;
pub use self::clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, SequentialIds, UlidGenerator};
pub use self::store::Store;
