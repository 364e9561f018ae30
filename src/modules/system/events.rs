use crate::events::EventHandler;
use async_trait::async_trait;
use poise::serenity_prelude::{ActivityData, Context, FullEvent, OnlineStatus};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ReadyHandler {
    prefix: String,
}

impl ReadyHandler {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl EventHandler for ReadyHandler {
    fn name(&self) -> &str {
        "Ready"
    }

    fn wants(&self, event: &FullEvent) -> bool {
        matches!(event, FullEvent::Ready { .. })
    }

    async fn handle(
        &self,
        ctx: &Context,
        event: &FullEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let FullEvent::Ready { data_about_bot } = event {
            info!(
                "Connected as {} to {} guilds",
                data_about_bot.user.name,
                data_about_bot.guilds.len()
            );
            ctx.set_presence(
                Some(ActivityData::listening(format!("{}help", self.prefix))),
                OnlineStatus::Online,
            );
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn EventHandler> {
        Box::new(self.clone())
    }
}
