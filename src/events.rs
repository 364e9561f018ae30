use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use poise::serenity_prelude::{Context, FullEvent};
use std::fmt::Debug;
use tokio::sync::RwLock;
use tracing::{error, trace};

#[async_trait]
pub trait EventHandler: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Cheap pre-filter so uninterested handlers are not spawned at all.
    fn wants(&self, _event: &FullEvent) -> bool {
        true
    }

    async fn handle(
        &self,
        ctx: &Context,
        event: &FullEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn box_clone(&self) -> Box<dyn EventHandler>;
}

#[derive(Debug, Default)]
pub struct EventManager {
    handlers: RwLock<Vec<Box<dyn EventHandler>>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_handler(&self, handler: impl EventHandler + 'static) {
        self.handlers.write().await.push(Box::new(handler));
    }

    /// Runs every interested handler on its own task and waits for all of
    /// them. A failing or panicking handler never affects the others.
    pub async fn handle_event(&self, ctx: &Context, event: &FullEvent) {
        let interested: Vec<Box<dyn EventHandler>> = self
            .handlers
            .read()
            .await
            .iter()
            .filter(|h| h.wants(event))
            .map(|h| h.box_clone())
            .collect();
        if interested.is_empty() {
            return;
        }

        let mut futures = FuturesUnordered::new();
        for handler in interested {
            let ctx = ctx.clone();
            let event = event.clone();
            let name = handler.name().to_string();

            let task = tokio::spawn(async move {
                trace!("Dispatching {} to {}", event.snake_case_name(), handler.name());
                if let Err(e) = handler.handle(&ctx, &event).await {
                    error!("Error in event handler {}: {}", handler.name(), e);
                }
            });
            futures.push(async move { (name, task.await) });
        }

        while let Some((name, result)) = futures.next().await {
            if let Err(e) = result {
                error!("Event handler {} panicked: {}", name, e);
            }
        }
    }
}
