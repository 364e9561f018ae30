use super::service::VoicePool;
use crate::{platform::SerenityPlatform, tasks::Task};
use async_trait::async_trait;
use poise::serenity_prelude::Context;
use std::time::Duration;

/// Catch-up pass for anything the voice state handler missed, e.g. across restarts.
#[derive(Clone, Debug)]
pub struct VoiceSyncTask {
    pool: VoicePool,
    interval: Duration,
}

impl VoiceSyncTask {
    pub fn new(pool: VoicePool, interval: Duration) -> Self {
        Self { pool, interval }
    }
}

#[async_trait]
impl Task for VoiceSyncTask {
    fn name(&self) -> &str {
        "VoiceSync"
    }

    fn schedule(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn execute(
        &mut self,
        ctx: &Context,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.pool.sync_all(&SerenityPlatform::new(ctx)).await;
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn Task> {
        Box::new(self.clone())
    }
}
