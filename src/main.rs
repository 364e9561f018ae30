use config::Config;
use databases::Databases;
use events::{EventHandler, EventManager};
use modules::{
    system::events::ReadyHandler,
    unverify::{
        commands::{gn, selfunverify},
        service::{Unverifier, UnverifyTimings},
        task::UnverifyTask,
        unverify,
    },
    voice::{
        commands::{lock, unlock},
        handler::VoiceStateHandler,
        service::VoicePool,
        task::VoiceSyncTask,
        voice,
    },
};
use poise::serenity_prelude::{self as serenity, CreateAllowedMentions, FullEvent};
use std::sync::Arc;
use tasks::TaskManager;
use tracing::{error, info, trace};
use tracing_subscriber::EnvFilter;

mod config;
mod database;
mod databases;
mod events;
mod modules;
mod platform;
mod tasks;
mod utils;

#[derive(Clone, Debug)]
pub struct Data {
    pub config: Arc<Config>,
    pub dbs: Arc<Databases>,
    pub task_manager: Arc<TaskManager>,
    pub event_manager: Arc<EventManager>,
    pub unverifier: Unverifier,
    pub voice: VoicePool,
}

impl Data {
    async fn new(config: Config, task_manager: Arc<TaskManager>) -> Result<Self, Error> {
        let dbs = Arc::new(Databases::open(&config).await?);
        let unverifier = Unverifier::new(dbs.unverify.clone(), UnverifyTimings::from(&config));
        let voice = VoicePool::new(dbs.voice.clone(), config.prefix.clone());

        let event_manager = Arc::new(EventManager::new());
        event_manager
            .add_handler(ReadyHandler::new(config.prefix.clone()))
            .await;
        event_manager
            .add_handler(VoiceStateHandler::new(voice.clone()))
            .await;

        Ok(Self {
            config: Arc::new(config),
            dbs,
            task_manager,
            event_manager,
            unverifier,
            voice,
        })
    }

    pub async fn init_tasks(&self, ctx: &serenity::Context) {
        let reverify = UnverifyTask::new(self.unverifier.clone(), self.config.unverify_interval);
        self.task_manager.add_task(reverify).await;

        let voice_sync = VoiceSyncTask::new(self.voice.clone(), self.config.voice_interval);
        self.task_manager.add_task(voice_sync).await;

        self.task_manager.start_tasks(ctx.clone()).await;
    }
}

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

fn location(ctx: &Context<'_>) -> String {
    ctx.guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.to_string())
}

#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_GUILD")]
async fn register(ctx: Context<'_>) -> Result<(), Error> {
    poise::builtins::register_application_commands_buttons(ctx).await?;
    Ok(())
}

/// Show what the bot can do
#[poise::command(slash_command, prefix_command)]
async fn help(
    ctx: Context<'_>,
    #[description = "Command to show help about"]
    #[autocomplete = "poise::builtins::autocomplete_command"]
    command: Option<String>,
) -> Result<(), Error> {
    poise::builtins::help(
        ctx,
        command.as_deref(),
        poise::builtins::HelpConfiguration {
            ephemeral: true,
            ..Default::default()
        },
    )
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("starting gatekeeper");

    if let Err(e) = run().await {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let token = std::env::var("DISCORD_TOKEN").expect("missing DISCORD_TOKEN");
    let config = Config::from_env();
    let grace = config.shutdown_grace;
    let prefix = config.prefix.clone();
    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let task_manager = Arc::new(TaskManager::new());
    let data = Data::new(config, task_manager.clone()).await?;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions::<Data, Error> {
            allowed_mentions: Some(CreateAllowedMentions::new().empty_roles().empty_users()),
            commands: vec![
                register(),
                help(),
                unverify(),
                selfunverify(),
                gn(),
                voice(),
                lock(),
                unlock(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(prefix),
                ..Default::default()
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    trace!(
                        "Command {} used by {} in {}",
                        ctx.command().qualified_name,
                        ctx.author().tag(),
                        location(&ctx)
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command {} completed for {} in {}",
                        ctx.command().qualified_name,
                        ctx.author().tag(),
                        location(&ctx)
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!(
                                "Command {} failed for {} in {}: {:?}",
                                ctx.command().qualified_name,
                                ctx.author().tag(),
                                location(&ctx),
                                error
                            );
                            let _ = ctx.say("❌ Something went wrong, please try again later.").await;
                        }
                        err => {
                            if let Err(e) = poise::builtins::on_error(err).await {
                                error!("Error while handling framework error: {}", e);
                            }
                        }
                    }
                })
            },
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    data.event_manager.handle_event(ctx, event).await;
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                // The first Ready arrives before any handler is attached.
                ReadyHandler::new(data.config.prefix.clone())
                    .handle(
                        ctx,
                        &FullEvent::Ready {
                            data_about_bot: ready.clone(),
                        },
                    )
                    .await?;

                data.init_tasks(ctx).await;
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shard_manager.shutdown_all().await;
        }
    });

    let result = client.start().await;
    task_manager.shutdown(grace).await;
    info!("stopped");
    Ok(result?)
}
