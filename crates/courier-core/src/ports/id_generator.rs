//! IdGenerator port - job identity の採番
//!
//! Push 時に id を持たない job にだけ使われます。
//! 生成された id は retry をまたいで変わりません。

use std::sync::atomic::{AtomicU64, Ordering};

use ulid::Ulid;

use crate::domain::JobId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

/// `job-<ULID>`; the timestamp half comes from the injected clock.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        // pre-epoch clocks clamp to 0
        let millis = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        JobId::from(Ulid::from_parts(millis, rand::random()))
    }
}

/// `{prefix}1`, `{prefix}2`, ... Predictable ids for tests and fixtures.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn generate_job_id(&self) -> JobId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        JobId::new(format!("{}{n}", self.prefix))
    }
}
