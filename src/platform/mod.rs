//! The slice of the chat platform the moderation components depend on.
//!
//! Every lookup may miss and every mutation may be refused. Callers decide
//! whether that matters; the reconcilers log and move on.

use async_trait::async_trait;
use poise::serenity_prelude::{
    ChannelId, ChannelType, GuildId, PermissionOverwrite, PermissionOverwriteType, Permissions,
    RoleId, UserId,
};
use thiserror::Error;

mod discord;
#[cfg(test)]
pub mod fake;

pub use discord::SerenityPlatform;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("not found")]
    NotFound,
    #[error("missing permissions")]
    Forbidden,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct GuildInfo {
    pub id: GuildId,
    pub name: String,
    /// Highest bitrate a voice channel may use in this guild.
    pub bitrate_limit: u32,
}

#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub user_id: UserId,
    pub name: String,
    pub roles: Vec<RoleId>,
}

#[derive(Debug, Clone)]
pub struct RoleInfo {
    pub id: RoleId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelType,
    pub parent_id: Option<ChannelId>,
    /// Members currently connected, voice channels only.
    pub connected: usize,
    /// Whether anything was ever posted in the channel's chat.
    pub has_activity: bool,
    pub overwrites: Vec<PermissionOverwrite>,
}

impl ChannelInfo {
    pub fn overwrite_for(&self, kind: PermissionOverwriteType) -> Option<&PermissionOverwrite> {
        self.overwrites.iter().find(|o| same_target(&o.kind, &kind))
    }

    pub fn member_overwrite(&self, user_id: UserId) -> Option<&PermissionOverwrite> {
        self.overwrite_for(PermissionOverwriteType::Member(user_id))
    }

    pub fn role_overwrites(&self) -> impl Iterator<Item = (RoleId, &PermissionOverwrite)> {
        self.overwrites.iter().filter_map(|o| match o.kind {
            PermissionOverwriteType::Role(id) => Some((id, o)),
            _ => None,
        })
    }
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn guild(&self, guild_id: GuildId) -> Option<GuildInfo>;

    /// Cache first, then a network fetch.
    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Result<MemberInfo, PlatformError>;

    async fn role(&self, guild_id: GuildId, role_id: RoleId) -> Option<RoleInfo>;

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn channels(&self, guild_id: GuildId) -> Vec<ChannelInfo>;

    async fn channel(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<ChannelInfo>;

    /// Effective VIEW_CHANNEL for the member, role and overwrite inheritance included.
    async fn can_view(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<bool, PlatformError>;

    /// Creates or replaces the overwrite for `overwrite.kind`.
    async fn set_overwrite(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        overwrite: PermissionOverwrite,
    ) -> Result<(), PlatformError>;

    async fn delete_overwrite(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        kind: PermissionOverwriteType,
    ) -> Result<(), PlatformError>;

    async fn create_voice_channel(
        &self,
        guild_id: GuildId,
        category_id: ChannelId,
        name: &str,
        bitrate: Option<u32>,
    ) -> Result<ChannelId, PlatformError>;

    async fn delete_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError>;

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> Result<(), PlatformError>;

    async fn direct_message(&self, user_id: UserId, content: &str) -> Result<(), PlatformError>;
}

pub fn same_target(a: &PermissionOverwriteType, b: &PermissionOverwriteType) -> bool {
    match (a, b) {
        (PermissionOverwriteType::Member(x), PermissionOverwriteType::Member(y)) => x == y,
        (PermissionOverwriteType::Role(x), PermissionOverwriteType::Role(y)) => x == y,
        _ => false,
    }
}

/// `base` with VIEW_CHANNEL forced to `allow` (or cleared with `None`),
/// other bits untouched. `None` means the member has no overwrite yet.
pub fn with_view(
    base: Option<&PermissionOverwrite>,
    kind: PermissionOverwriteType,
    allow: Option<bool>,
) -> PermissionOverwrite {
    let (mut allowed, mut denied) = base
        .map(|o| (o.allow, o.deny))
        .unwrap_or((Permissions::empty(), Permissions::empty()));

    allowed.remove(Permissions::VIEW_CHANNEL);
    denied.remove(Permissions::VIEW_CHANNEL);
    match allow {
        Some(true) => allowed.insert(Permissions::VIEW_CHANNEL),
        Some(false) => denied.insert(Permissions::VIEW_CHANNEL),
        None => {}
    }

    PermissionOverwrite {
        allow: allowed,
        deny: denied,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_view_keeps_unrelated_bits() {
        let kind = PermissionOverwriteType::Member(UserId::new(5));
        let base = PermissionOverwrite {
            allow: Permissions::SEND_MESSAGES | Permissions::VIEW_CHANNEL,
            deny: Permissions::CONNECT,
            kind,
        };

        let hidden = with_view(Some(&base), kind, Some(false));
        assert_eq!(hidden.allow, Permissions::SEND_MESSAGES);
        assert_eq!(hidden.deny, Permissions::CONNECT | Permissions::VIEW_CHANNEL);

        let cleared = with_view(Some(&hidden), kind, None);
        assert_eq!(cleared.allow, Permissions::SEND_MESSAGES);
        assert_eq!(cleared.deny, Permissions::CONNECT);

        let fresh = with_view(None, kind, Some(true));
        assert_eq!(fresh.allow, Permissions::VIEW_CHANNEL);
        assert!(fresh.deny.is_empty());
    }
}
