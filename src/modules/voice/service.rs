use dashmap::DashSet;
use poise::serenity_prelude::{ChannelId, ChannelType, GuildId, PermissionOverwriteType, RoleId};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::database::{VoiceHandler, VoiceSettings};
use super::error::VoiceError;
use crate::platform::{with_view, ChannelInfo, Platform, PlatformError};

pub const HIGH_RES_PREFIX: &str = "HI-RES-";
pub const MIN_HIGH_BITRATE: u32 = 64_000;

const ADJECTIVES: &[&str] = &["Red", "Green", "Blue", "Black", "White", "Pink", "Orange"];
const NOUNS: &[&str] = &[
    "cat",
    "dog",
    "elephant",
    "horse",
    "mouse",
    "fish",
    "octopus",
    "cockroach",
    "butterfly",
    "owl",
    "fox",
    "tiger",
    "bear",
    "sheep",
    "duck",
    "panda",
    "rabbit",
    "wolf",
];

pub fn random_channel_name(high_res: bool) -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Red");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("cat");
    if high_res {
        format!("{}{} {}", HIGH_RES_PREFIX, adjective, noun)
    } else {
        format!("{} {}", adjective, noun)
    }
}

/// Keeps one free voice channel of each kind in every managed category.
#[derive(Debug, Clone)]
pub struct VoicePool {
    db: VoiceHandler,
    /// Roles the bot failed to edit while locking. Lives as long as the process.
    admin_roles: Arc<DashSet<RoleId>>,
    prefix: String,
}

impl VoicePool {
    pub fn new(db: VoiceHandler, prefix: impl Into<String>) -> Self {
        Self {
            db,
            admin_roles: Arc::new(DashSet::new()),
            prefix: prefix.into(),
        }
    }

    pub fn db(&self) -> &VoiceHandler {
        &self.db
    }

    pub fn welcome_message(&self) -> String {
        format!(
            "Welcome. Voice channel can become invisible by calling the command `{}lock`.",
            self.prefix
        )
    }

    /// One reconciler pass over every guild with pooling enabled.
    pub async fn sync_all(&self, platform: &dyn Platform) {
        for settings in self.db.active_settings().await {
            let guild_id = GuildId::new(settings.guild_id);
            if let Err(e) = self.sync_guild(platform, guild_id).await {
                warn!(%guild_id, "Voice sync failed: {}", e);
            }
        }
    }

    pub async fn sync_guild(&self, platform: &dyn Platform, guild_id: GuildId) -> Result<(), VoiceError> {
        let Some(settings) = self.valid_settings(guild_id).await else {
            return Ok(());
        };

        self.sweep_locks(platform).await?;

        let Some(category) = self.category(platform, guild_id, &settings).await else {
            warn!(%guild_id, "Non-existent category for voice settings");
            return Ok(());
        };

        if let Some(bitrate) = settings.high_res_bitrate {
            self.maintain_one_empty(platform, guild_id, category.id, Some(bitrate))
                .await;
        }
        self.maintain_one_empty(platform, guild_id, category.id, None)
            .await;
        Ok(())
    }

    async fn valid_settings(&self, guild_id: GuildId) -> Option<VoiceSettings> {
        self.db
            .settings(guild_id.get())
            .await
            .filter(|s| s.category_id.is_some())
    }

    async fn category(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        settings: &VoiceSettings,
    ) -> Option<ChannelInfo> {
        let category_id = ChannelId::new(settings.category_id?);
        platform
            .channel(guild_id, category_id)
            .await
            .filter(|c| c.kind == ChannelType::Category)
    }

    /// Drops lock marks whose guild stopped pooling or whose channel is gone.
    pub async fn sweep_locks(&self, platform: &dyn Platform) -> Result<usize, VoiceError> {
        let mut removed = 0;
        for mark in self.db.locks().await {
            let guild_id = GuildId::new(mark.guild_id);
            let stale = !self.db.validate_settings(mark.guild_id).await
                || platform
                    .channel(guild_id, ChannelId::new(mark.channel_id))
                    .await
                    .is_none();
            if stale && self.db.remove_lock(mark.channel_id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Dropped {} stale lock marks", removed);
        }
        Ok(removed)
    }

    async fn maintain_one_empty(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        category_id: ChannelId,
        bitrate: Option<u32>,
    ) {
        let high_res = bitrate.is_some();
        let empty: Vec<ChannelInfo> = platform
            .channels(guild_id)
            .await
            .into_iter()
            .filter(|c| c.kind == ChannelType::Voice && c.parent_id == Some(category_id))
            .filter(|c| c.connected == 0)
            .filter(|c| c.name.starts_with(HIGH_RES_PREFIX) == high_res)
            .collect();

        let (abandoned, fresh): (Vec<_>, Vec<_>) = empty.into_iter().partition(|c| c.has_activity);

        if fresh.is_empty() {
            self.create_channel(platform, guild_id, category_id, bitrate)
                .await;
        }
        for channel in abandoned {
            self.remove_channel(platform, guild_id, channel.id).await;
        }
    }

    async fn create_channel(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        category_id: ChannelId,
        bitrate: Option<u32>,
    ) {
        let limit = platform.guild(guild_id).await.map(|g| g.bitrate_limit);
        let bitrate = match (bitrate, limit) {
            (Some(b), Some(limit)) => Some(b.min(limit)),
            (b, _) => b,
        };
        let name = random_channel_name(bitrate.is_some());

        match platform
            .create_voice_channel(guild_id, category_id, &name, bitrate)
            .await
        {
            Ok(channel_id) => debug!(%guild_id, %channel_id, "Created voice channel {}", name),
            Err(e) => warn!(%guild_id, %category_id, "Could not create voice channel: {}", e),
        }
    }

    async fn remove_channel(&self, platform: &dyn Platform, guild_id: GuildId, channel_id: ChannelId) {
        match platform.delete_channel(guild_id, channel_id).await {
            Ok(()) => debug!(%guild_id, %channel_id, "Removed empty voice channel"),
            Err(e) => warn!(%guild_id, %channel_id, "Could not delete empty voice channel: {}", e),
        }
    }

    async fn in_category(
        platform: &dyn Platform,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        category_id: ChannelId,
    ) -> Option<ChannelInfo> {
        platform
            .channel(guild_id, channel_id?)
            .await
            .filter(|c| c.parent_id == Some(category_id))
    }

    /// Reacts to a member joining, leaving or moving between voice channels.
    pub async fn handle_voice_state(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        before: Option<ChannelId>,
        after: Option<ChannelId>,
    ) -> Result<(), VoiceError> {
        if before == after {
            return Ok(());
        }
        let Some(settings) = self.valid_settings(guild_id).await else {
            return Ok(());
        };
        let Some(category) = self.category(platform, guild_id, &settings).await else {
            return Ok(());
        };

        if let Some(joined) = Self::in_category(platform, guild_id, after, category.id).await {
            if !joined.has_activity {
                self.db.remove_lock(joined.id.get()).await?;
                if let Err(e) = platform
                    .send_message(joined.id, &self.welcome_message())
                    .await
                {
                    warn!(%guild_id, channel_id = %joined.id, "Could not send welcome message: {}", e);
                }
            }
            self.sync_guild(platform, guild_id).await?;
        }

        if let Some(left) = Self::in_category(platform, guild_id, before, category.id).await {
            if left.connected == 0 {
                self.db.remove_lock(left.id.get()).await?;
                self.remove_channel(platform, guild_id, left.id).await;
            }
        }
        Ok(())
    }

    /// The managed voice channel `channel_id` together with its category.
    async fn managed(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(ChannelInfo, ChannelInfo), VoiceError> {
        let settings = self
            .valid_settings(guild_id)
            .await
            .ok_or(VoiceError::NotManaged)?;
        let category = self
            .category(platform, guild_id, &settings)
            .await
            .ok_or(VoiceError::NotManaged)?;
        let channel = Self::in_category(platform, guild_id, Some(channel_id), category.id)
            .await
            .filter(|c| c.kind == ChannelType::Voice)
            .ok_or(VoiceError::NotManaged)?;
        Ok((channel, category))
    }

    /// Hides the channel from every role the category has an overwrite for.
    pub async fn lock(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(), VoiceError> {
        let (channel, category) = self.managed(platform, guild_id, channel_id).await?;
        if self.db.is_locked(channel_id.get()).await {
            return Err(VoiceError::AlreadyLocked);
        }
        self.db
            .set_lock(guild_id.get(), channel_id.get(), true)
            .await?;

        for (role_id, _) in category.role_overwrites() {
            if self.admin_roles.contains(&role_id) {
                continue;
            }
            let kind = PermissionOverwriteType::Role(role_id);
            let hidden = with_view(channel.overwrite_for(kind), kind, Some(false));
            match platform
                .set_overwrite(guild_id, channel_id, hidden)
                .await
            {
                Ok(()) => {}
                Err(PlatformError::Forbidden) => {
                    debug!(%guild_id, %role_id, "Remembering role the bot cannot edit");
                    self.admin_roles.insert(role_id);
                }
                Err(e) => warn!(%guild_id, %channel_id, %role_id, "Could not hide channel: {}", e),
            }
        }

        info!(%guild_id, %channel_id, "Voice channel locked");
        Ok(())
    }

    /// Puts the category's own overwrite back for each of its roles.
    pub async fn unlock(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(), VoiceError> {
        let (_, category) = self.managed(platform, guild_id, channel_id).await?;
        if !self.db.is_locked(channel_id.get()).await {
            return Err(VoiceError::AlreadyUnlocked);
        }
        self.db
            .set_lock(guild_id.get(), channel_id.get(), false)
            .await?;

        for (role_id, overwrite) in category.role_overwrites() {
            if let Err(e) = platform
                .set_overwrite(guild_id, channel_id, overwrite.clone())
                .await
            {
                warn!(%guild_id, %channel_id, %role_id, "Could not restore channel overwrite: {}", e);
            }
        }

        info!(%guild_id, %channel_id, "Voice channel unlocked");
        Ok(())
    }

    pub async fn set_category(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        category_id: ChannelId,
    ) -> Result<(), VoiceError> {
        self.db.set_category(guild_id.get(), category_id.get()).await?;
        info!(%guild_id, %category_id, "Category for dynamic voice channels set");
        self.sync_guild(platform, guild_id).await
    }

    /// Accepts `bitrate` only when it is above the standard rate and within
    /// what the guild's boost level allows.
    pub async fn set_bitrate(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        bitrate: u32,
    ) -> Result<(), VoiceError> {
        let limit = platform
            .guild(guild_id)
            .await
            .map_or(MIN_HIGH_BITRATE, |g| g.bitrate_limit);
        if !(bitrate > MIN_HIGH_BITRATE && bitrate <= limit) {
            return Err(VoiceError::InvalidBitrate { limit });
        }

        self.db.set_high_bitrate(guild_id.get(), bitrate).await?;
        info!(%guild_id, bitrate, "Bitrate for dynamic voice channels set");
        self.sync_guild(platform, guild_id).await
    }

    pub async fn disable(&self, guild_id: GuildId) -> Result<bool, VoiceError> {
        let removed = self.db.remove_settings(guild_id.get()).await?;
        if removed {
            info!(%guild_id, "Voice channel settings disabled");
        }
        Ok(removed)
    }
}
