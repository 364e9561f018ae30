use super::{ChannelInfo, GuildInfo, MemberInfo, Platform, PlatformError, RoleInfo};
use async_trait::async_trait;
use poise::serenity_prelude::{
    self as serenity, ChannelId, ChannelType, Context, CreateChannel, CreateMessage, Guild,
    GuildChannel, GuildId, PermissionOverwrite, PermissionOverwriteType, PremiumTier, RoleId,
    UserId,
};

impl From<serenity::Error> for PlatformError {
    fn from(err: serenity::Error) -> Self {
        let status = match &err {
            serenity::Error::Http(http) => http.status_code().map(|s| s.as_u16()),
            _ => None,
        };
        match status {
            Some(403) => PlatformError::Forbidden,
            Some(404) => PlatformError::NotFound,
            _ => PlatformError::Other(err.to_string()),
        }
    }
}

/// `Platform` backed by the gateway cache, falling back to HTTP where the
/// cache cannot answer.
#[derive(Clone)]
pub struct SerenityPlatform {
    ctx: Context,
}

impl SerenityPlatform {
    pub fn new(ctx: &Context) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn bitrate_limit(tier: PremiumTier) -> u32 {
        match tier {
            PremiumTier::Tier1 => 128_000,
            PremiumTier::Tier2 => 256_000,
            PremiumTier::Tier3 => 384_000,
            _ => 96_000,
        }
    }

    fn describe(guild: &Guild, channel: &GuildChannel) -> ChannelInfo {
        let connected = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel.id))
            .count();

        ChannelInfo {
            id: channel.id,
            name: channel.name.clone(),
            kind: channel.kind,
            parent_id: channel.parent_id,
            connected,
            has_activity: channel.last_message_id.is_some(),
            overwrites: channel.permission_overwrites.clone(),
        }
    }
}

#[async_trait]
impl Platform for SerenityPlatform {
    async fn guild(&self, guild_id: GuildId) -> Option<GuildInfo> {
        let guild = self.ctx.cache.guild(guild_id)?;
        Some(GuildInfo {
            id: guild.id,
            name: guild.name.clone(),
            bitrate_limit: Self::bitrate_limit(guild.premium_tier),
        })
    }

    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Result<MemberInfo, PlatformError> {
        let member = guild_id.member(&self.ctx, user_id).await?;
        Ok(MemberInfo {
            user_id: member.user.id,
            name: member.user.name.clone(),
            roles: member.roles.clone(),
        })
    }

    async fn role(&self, guild_id: GuildId, role_id: RoleId) -> Option<RoleInfo> {
        let guild = self.ctx.cache.guild(guild_id)?;
        guild.roles.get(&role_id).map(|role| RoleInfo {
            id: role.id,
            name: role.name.clone(),
        })
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.ctx
            .http
            .add_member_role(guild_id, user_id, role_id, Some(reason))
            .await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.ctx
            .http
            .remove_member_role(guild_id, user_id, role_id, Some(reason))
            .await?;
        Ok(())
    }

    async fn channels(&self, guild_id: GuildId) -> Vec<ChannelInfo> {
        match self.ctx.cache.guild(guild_id) {
            Some(guild) => guild
                .channels
                .values()
                .map(|channel| Self::describe(&guild, channel))
                .collect(),
            None => Vec::new(),
        }
    }

    async fn channel(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<ChannelInfo> {
        let guild = self.ctx.cache.guild(guild_id)?;
        let channel = guild.channels.get(&channel_id)?;
        Some(Self::describe(&guild, channel))
    }

    async fn can_view(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<bool, PlatformError> {
        let guild = self
            .ctx
            .cache
            .guild(guild_id)
            .ok_or(PlatformError::NotFound)?;
        let channel = guild
            .channels
            .get(&channel_id)
            .ok_or(PlatformError::NotFound)?;
        let member = guild
            .members
            .get(&user_id)
            .ok_or(PlatformError::NotFound)?;
        Ok(guild.user_permissions_in(channel, member).view_channel())
    }

    async fn set_overwrite(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
        overwrite: PermissionOverwrite,
    ) -> Result<(), PlatformError> {
        channel_id
            .create_permission(&self.ctx.http, overwrite)
            .await?;
        Ok(())
    }

    async fn delete_overwrite(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
        kind: PermissionOverwriteType,
    ) -> Result<(), PlatformError> {
        channel_id.delete_permission(&self.ctx.http, kind).await?;
        Ok(())
    }

    async fn create_voice_channel(
        &self,
        guild_id: GuildId,
        category_id: ChannelId,
        name: &str,
        bitrate: Option<u32>,
    ) -> Result<ChannelId, PlatformError> {
        let mut builder = CreateChannel::new(name)
            .kind(ChannelType::Voice)
            .category(category_id);
        if let Some(bitrate) = bitrate {
            builder = builder.bitrate(bitrate);
        }

        let channel = guild_id.create_channel(&self.ctx, builder).await?;
        Ok(channel.id)
    }

    async fn delete_channel(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError> {
        channel_id.delete(&self.ctx).await?;
        Ok(())
    }

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> Result<(), PlatformError> {
        channel_id.say(&self.ctx.http, content).await?;
        Ok(())
    }

    async fn direct_message(&self, user_id: UserId, content: &str) -> Result<(), PlatformError> {
        user_id
            .direct_message(&self.ctx, CreateMessage::new().content(content))
            .await?;
        Ok(())
    }
}
