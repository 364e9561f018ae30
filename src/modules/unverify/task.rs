use super::service::Unverifier;
use crate::{platform::SerenityPlatform, tasks::Task};
use async_trait::async_trait;
use chrono::Utc;
use poise::serenity_prelude::Context;
use std::time::{Duration, Instant};
use tracing::debug;

/// Periodically gives members back what an expired unverify took.
#[derive(Clone, Debug)]
pub struct UnverifyTask {
    unverifier: Unverifier,
    interval: Duration,
}

impl UnverifyTask {
    pub fn new(unverifier: Unverifier, interval: Duration) -> Self {
        Self {
            unverifier,
            interval,
        }
    }
}

#[async_trait]
impl Task for UnverifyTask {
    fn name(&self) -> &str {
        "Reverify"
    }

    fn schedule(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn execute(
        &mut self,
        ctx: &Context,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let start = Instant::now();
        let platform = SerenityPlatform::new(ctx);

        let processed = self.unverifier.restore_due(&platform, Utc::now()).await;
        if processed > 0 {
            debug!(
                "Reverify pass handled {} records in {:?}",
                processed,
                start.elapsed()
            );
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn Task> {
        Box::new(self.clone())
    }
}
