//! JobRegistry - 型名から job を再構築するためのファクトリ登録
//!
//! # 学習ポイント
//! - HashMap での型消去された factory の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権（バックエンドが所有し、テストごとに差し替え可能）

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::job::Job;
use super::task::{Task, TypedJob};

/// Builds a zero-value job whose payload is filled in afterwards.
pub type JobFactory = Arc<dyn Fn() -> Box<dyn Job> + Send + Sync>;

/// JobRegistry は型名 → factory の対応表
///
/// # 使用例
/// ```ignore
/// let mut registry = JobRegistry::new();
/// registry.register_task::<SendEmail>()?;
/// registry.register("billing.charge.v1", || Box::new(ChargeJob::default()))?;
///
/// let job = registry.create("mail.send.v1")?;
/// ```
///
/// Registration happens at process start; lookups afterwards are read-only.
#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<String, JobFactory>,
}

/// RegistryError は JobRegistry の操作エラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("job type '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("job type '{0}' is not registered")]
    NotRegistered(String),
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, job_type: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Job> + Send + Sync + 'static,
    {
        let job_type = job_type.into();
        if self.factories.contains_key(&job_type) {
            return Err(RegistryError::AlreadyRegistered(job_type));
        }
        self.factories.insert(job_type, Arc::new(factory));
        Ok(())
    }

    /// Register a [`Task`] under its `TYPE`.
    pub fn register_task<T: Task>(&mut self) -> Result<(), RegistryError> {
        self.register(T::TYPE, || Box::new(TypedJob::new(T::default())))
    }

    pub fn create(&self, job_type: &str) -> Result<Box<dyn Job>, RegistryError> {
        let factory = self
            .factories
            .get(job_type)
            .ok_or_else(|| RegistryError::NotRegistered(job_type.to_string()))?;
        Ok(factory())
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
    }

    /// Registered type names, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}
