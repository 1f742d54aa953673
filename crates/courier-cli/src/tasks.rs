//! Demo job types.

use async_trait::async_trait;
use courier_core::domain::JobError;
use courier_core::typed::Task;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WelcomeEmail {
    pub to: String,
}

#[async_trait]
impl Task for WelcomeEmail {
    const TYPE: &'static str = "mail.welcome.v1";

    async fn handle(&self) -> Result<(), JobError> {
        info!(to = %self.to, "sending welcome email");
        Ok(())
    }
}

/// Fails every time when `decline` is set, so it ends in the dead-letter list.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChargeCard {
    pub order_id: u64,
    pub decline: bool,
}

#[async_trait]
impl Task for ChargeCard {
    const TYPE: &'static str = "billing.charge.v1";
    const MAX_ATTEMPTS: u32 = 2;

    async fn handle(&self) -> Result<(), JobError> {
        if self.decline {
            return Err(JobError::failed(format!("card declined for order {}", self.order_id)));
        }
        info!(order_id = self.order_id, "card charged");
        Ok(())
    }

    async fn failed(&self, error: &JobError) -> Result<(), JobError> {
        info!(order_id = self.order_id, %error, "notifying billing team");
        Ok(())
    }
}
