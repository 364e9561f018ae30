use async_trait::async_trait;
use poise::serenity_prelude::{Context, FullEvent};

use super::service::VoicePool;
use crate::{events::EventHandler, platform::SerenityPlatform};

#[derive(Debug, Clone)]
pub struct VoiceStateHandler {
    pool: VoicePool,
}

impl VoiceStateHandler {
    pub fn new(pool: VoicePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventHandler for VoiceStateHandler {
    fn name(&self) -> &str {
        "VoiceState"
    }

    fn wants(&self, event: &FullEvent) -> bool {
        matches!(event, FullEvent::VoiceStateUpdate { .. })
    }

    async fn handle(
        &self,
        ctx: &Context,
        event: &FullEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let FullEvent::VoiceStateUpdate { old, new } = event else {
            return Ok(());
        };
        let Some(guild_id) = new.guild_id else {
            return Ok(());
        };

        let before = old.as_ref().and_then(|state| state.channel_id);
        self.pool
            .handle_voice_state(&SerenityPlatform::new(ctx), guild_id, before, new.channel_id)
            .await?;
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn EventHandler> {
        Box::new(self.clone())
    }
}
