use super::error::VoiceError;
use crate::{platform::SerenityPlatform, Context, Error};
use poise::{
    command,
    serenity_prelude::{self as serenity, ChannelId, ChannelType, GuildId, Mentionable},
};

fn guild_id(ctx: &Context<'_>) -> Result<GuildId, Error> {
    Ok(ctx.guild_id().ok_or("This command only works in a server")?)
}

async fn refuse(ctx: Context<'_>, err: VoiceError) -> Result<(), Error> {
    match err {
        VoiceError::Db(e) => Err(e.into()),
        err => {
            ctx.say(format!("❌ {}", err)).await?;
            Ok(())
        }
    }
}

/// Set the category whose voice channels are managed
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn category(
    ctx: Context<'_>,
    #[description = "Category for dynamic voice channels"]
    #[channel_types("Category")]
    category: serenity::GuildChannel,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    if category.kind != ChannelType::Category {
        ctx.say("❌ Please select a category.").await?;
        return Ok(());
    }

    ctx.defer().await?;
    let platform = SerenityPlatform::new(ctx.serenity_context());
    if let Err(e) = ctx
        .data()
        .voice
        .set_category(&platform, guild_id, category.id)
        .await
    {
        return refuse(ctx, e).await;
    }

    ctx.say("✅ Category for dynamic voice channels set.").await?;
    Ok(())
}

/// Set the bitrate of high resolution channels
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn bitrate(
    ctx: Context<'_>,
    #[description = "Bitrate in bits per second, e.g. 128000"] bitrate: u32,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let platform = SerenityPlatform::new(ctx.serenity_context());

    if let Err(e) = ctx.data().voice.set_bitrate(&platform, guild_id, bitrate).await {
        return refuse(ctx, e).await;
    }

    ctx.say(format!("✅ Bitrate for dynamic voice channels set to {}.", bitrate))
        .await?;
    Ok(())
}

/// Stop managing voice channels on this server
#[command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;

    let message = match ctx.data().voice.disable(guild_id).await {
        Ok(true) => "✅ Voice channel settings disabled.",
        Ok(false) => "📝 Dynamic voice channels were not enabled.",
        Err(e) => return refuse(ctx, e).await,
    };
    ctx.say(message).await?;
    Ok(())
}

/// Show the current voice channel settings
#[command(
    slash_command,
    prefix_command,
    guild_only,
    ephemeral,
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;

    let Some(settings) = ctx.data().voice.db().settings(guild_id.get()).await else {
        ctx.say("📝 Dynamic voice channels are disabled.").await?;
        return Ok(());
    };

    let category = settings.category_id.map_or_else(
        || "Functionality not enabled.".to_string(),
        |id| ChannelId::new(id).mention().to_string(),
    );
    let bitrate = settings.high_res_bitrate.map_or_else(
        || "No high resolution settings in place.".to_string(),
        |b| b.to_string(),
    );

    ctx.say(format!(
        "🔊 **Voice channel configuration**\n> Used category: {}\n> High bitrate: {}",
        category, bitrate
    ))
    .await?;
    Ok(())
}

/// Hide this voice channel from everyone outside it
#[command(slash_command, prefix_command, guild_only, channel_cooldown = 10)]
pub async fn lock(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let platform = SerenityPlatform::new(ctx.serenity_context());

    if let Err(e) = ctx
        .data()
        .voice
        .lock(&platform, guild_id, ctx.channel_id())
        .await
    {
        return refuse(ctx, e).await;
    }

    ctx.say("🔒 Channel locked.").await?;
    Ok(())
}

/// Make this voice channel visible again
#[command(slash_command, prefix_command, guild_only)]
pub async fn unlock(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let platform = SerenityPlatform::new(ctx.serenity_context());

    if let Err(e) = ctx
        .data()
        .voice
        .unlock(&platform, guild_id, ctx.channel_id())
        .await
    {
        return refuse(ctx, e).await;
    }

    ctx.say("🔓 Channel unlocked.").await?;
    Ok(())
}
