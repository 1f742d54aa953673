//! QueueBuilder - キューの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use crate::config::{ConfigError, QueueConfig};
use crate::impls::StoreQueue;
use crate::ports::{Clock, Store};
use crate::typed::{Job, JobRegistry, RegistryError, Task};

/// QueueBuilder は JobRegistry と設定をまとめて StoreQueue を構築
///
/// # 使用例
/// ```ignore
/// let queue = QueueBuilder::new()
///     .register_task::<SendEmail>()?
///     .expect_types(&["mail.send.v1"])
///     .config(QueueConfig::from_env()?)
///     .build(InMemoryStore::new())?;
/// ```
///
/// # Fail-fast 設計
/// - expect_types() で期待される job type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す（ストアに残った job が decode できなくなるのを起動時に防ぐ）
pub struct QueueBuilder {
    registry: JobRegistry,
    expected_types: Option<Vec<String>>,
    config: QueueConfig,
    clock: Option<Arc<dyn Clock>>,
}

/// BuildError はキュー構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing job types: {0:?}. These job types were expected but not registered.")]
    MissingJobTypes(Vec<String>),

    #[error("invalid queue config: {0}")]
    Config(#[from] ConfigError),
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self {
            registry: JobRegistry::new(),
            expected_types: None,
            config: QueueConfig::default(),
            clock: None,
        }
    }

    /// Task を登録
    pub fn register_task<T: Task>(mut self) -> Result<Self, RegistryError> {
        self.registry.register_task::<T>()?;
        Ok(self)
    }

    /// 任意の Job 型を factory で登録
    pub fn register<F>(mut self, job_type: impl Into<String>, factory: F) -> Result<Self, RegistryError>
    where
        F: Fn() -> Box<dyn Job> + Send + Sync + 'static,
    {
        self.registry.register(job_type, factory)?;
        Ok(self)
    }

    /// 期待される job type のリストを設定
    pub fn expect_types(mut self, job_types: &[&str]) -> Self {
        self.expected_types = Some(job_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 検証済みの JobRegistry を取り出す（ImmediateQueue など store を使わない場合）
    pub fn build_registry(self) -> Result<JobRegistry, BuildError> {
        self.check_expected()?;
        Ok(self.registry)
    }

    /// # 検証
    /// - config.validate()
    /// - expect_types() で設定された type が全て登録されているか
    pub fn build<S: Store>(self, store: S) -> Result<StoreQueue<S>, BuildError> {
        self.config.validate()?;
        self.check_expected()?;

        let queue = StoreQueue::new(store, Arc::new(self.registry), self.config);
        Ok(match self.clock {
            Some(clock) => queue.with_clock(clock),
            None => queue,
        })
    }

    fn check_expected(&self) -> Result<(), BuildError> {
        if let Some(expected) = &self.expected_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingJobTypes(missing));
            }
        }
        Ok(())
    }
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}
