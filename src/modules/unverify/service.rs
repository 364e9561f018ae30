use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    ChannelId, ChannelType, GuildId, PermissionOverwriteType, RoleId, UserId,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::database::{
    NewRestriction, RestrictionKind, RestrictionRecord, RestrictionStatus, UnverifyHandler,
};
use super::error::UnverifyError;
use crate::{
    config::Config,
    database::DbError,
    platform::{with_view, MemberInfo, Platform, PlatformError},
    utils::truncate_chars,
};

pub const MAX_REASON_CHARS: usize = 1024;

#[derive(Debug, Clone)]
pub struct UnverifyTimings {
    /// Records ending this far in the future are already picked up.
    pub lookahead: Duration,
    /// Minimum gap between two visits of a record that could not be restored.
    pub staleness: Duration,
    /// Pause between stripping roles and touching channel overwrites.
    pub settle_delay: Duration,
}

impl From<&Config> for UnverifyTimings {
    fn from(config: &Config) -> Self {
        Self {
            lookahead: config.unverify_lookahead,
            staleness: config.unverify_staleness,
            settle_delay: config.settle_delay,
        }
    }
}

/// What an imposition needs to know about the restriction being created.
#[derive(Debug, Clone)]
pub struct Imposition {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub end_time: DateTime<Utc>,
    pub reason: Option<String>,
    pub kind: RestrictionKind,
    pub channels_to_keep: Vec<ChannelId>,
}

#[derive(Debug, Clone)]
pub struct Unverifier {
    db: UnverifyHandler,
    timings: UnverifyTimings,
}

impl Unverifier {
    pub fn new(db: UnverifyHandler, timings: UnverifyTimings) -> Self {
        Self { db, timings }
    }

    pub fn db(&self) -> &UnverifyHandler {
        &self.db
    }

    /// Strips the member's roles and channel access and persists exactly what
    /// was changed so that `restore` can undo it.
    pub async fn impose(
        &self,
        platform: &dyn Platform,
        request: Imposition,
    ) -> Result<RestrictionRecord, UnverifyError> {
        let Imposition {
            guild_id,
            user_id,
            end_time,
            reason,
            kind,
            channels_to_keep,
        } = request;
        let start_time = Utc::now();

        let config = self
            .db
            .guild_config(guild_id.get())
            .await
            .ok_or(UnverifyError::NotConfigured)?;
        if end_time < start_time {
            return Err(UnverifyError::EndTimePassed);
        }
        if self
            .db
            .waiting_for_member(guild_id.get(), user_id.get())
            .await
            .is_some()
        {
            return Err(UnverifyError::AlreadyUnverified);
        }
        let member = platform
            .member(guild_id, user_id)
            .await
            .map_err(|_| UnverifyError::MemberNotFound)?;
        let unverify_role = RoleId::new(config.unverify_role_id);
        let audit = kind.to_string();

        let removed_roles = self
            .strip_roles(platform, guild_id, &member, unverify_role, &audit)
            .await;

        if !self.timings.settle_delay.is_zero() {
            tokio::time::sleep(self.timings.settle_delay).await;
        }

        let (hidden, granted) = self
            .hide_channels(platform, guild_id, user_id, &channels_to_keep)
            .await;

        match platform.role(guild_id, unverify_role).await {
            Some(_) => {
                if let Err(e) = platform
                    .add_role(guild_id, user_id, unverify_role, &audit)
                    .await
                {
                    warn!(%guild_id, %user_id, role_id = %unverify_role, "Adding unverify role failed: {}", e);
                }
            }
            None => {
                warn!(%guild_id, %user_id, role_id = %unverify_role, "Adding unverify role failed: role not found")
            }
        }

        let record = self
            .db
            .insert(NewRestriction {
                guild_id: guild_id.get(),
                user_id: user_id.get(),
                start_time,
                end_time,
                roles_to_return: removed_roles.iter().map(|r| r.get()).collect(),
                channels_to_return: hidden.iter().map(|c| c.get()).collect(),
                channels_to_remove: granted.iter().map(|c| c.get()).collect(),
                reason: reason.map(|r| truncate_chars(&r, MAX_REASON_CHARS)),
                kind,
            })
            .await?;

        info!(
            %guild_id,
            %user_id,
            idx = record.idx,
            "Member unverified until {} ({})",
            record.end_time,
            kind
        );
        Ok(record)
    }

    async fn strip_roles(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        member: &MemberInfo,
        unverify_role: RoleId,
        audit: &str,
    ) -> Vec<RoleId> {
        let mut removed = Vec::new();
        for &role_id in member.roles.iter().filter(|&&r| r != unverify_role) {
            match platform
                .remove_role(guild_id, member.user_id, role_id, audit)
                .await
            {
                Ok(()) => removed.push(role_id),
                // Deleted in the meantime; nothing to give back later.
                Err(PlatformError::NotFound) => {
                    debug!(%guild_id, %role_id, "Role vanished before it could be removed")
                }
                Err(e) => warn!(
                    %guild_id,
                    user_id = %member.user_id,
                    %role_id,
                    "Removing role from {} failed: {}",
                    member.name,
                    e
                ),
            }
        }
        removed
    }

    /// Returns `(hidden, granted)`: channels the member lost and channels the
    /// member was temporarily let into.
    async fn hide_channels(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        user_id: UserId,
        channels_to_keep: &[ChannelId],
    ) -> (Vec<ChannelId>, Vec<ChannelId>) {
        let mut hidden = Vec::new();
        let mut granted = Vec::new();
        let target = PermissionOverwriteType::Member(user_id);

        for channel in platform.channels(guild_id).await {
            if channel.kind == ChannelType::Category {
                continue;
            }
            let visible = match platform.can_view(guild_id, channel.id, user_id).await {
                Ok(visible) => visible,
                Err(e) => {
                    warn!(%guild_id, %user_id, channel_id = %channel.id, "Could not resolve permissions: {}", e);
                    continue;
                }
            };
            let keep = channels_to_keep.contains(&channel.id);
            let view = match (keep, visible) {
                (true, false) => true,
                (false, true) => false,
                _ => continue,
            };

            let overwrite = with_view(channel.member_overwrite(user_id), target, Some(view));
            match platform.set_overwrite(guild_id, channel.id, overwrite).await {
                Ok(()) if view => granted.push(channel.id),
                Ok(()) => hidden.push(channel.id),
                Err(e) => warn!(
                    %guild_id,
                    %user_id,
                    channel_id = %channel.id,
                    "Changing access to {} failed: {}",
                    channel.name,
                    e
                ),
            }
        }

        (hidden, granted)
    }

    /// Ends the member's restriction at `now`; the next reconciler tick
    /// performs the actual restoration.
    pub async fn pardon(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<RestrictionRecord, UnverifyError> {
        let record = self
            .db
            .pardon(guild_id.get(), user_id.get(), Utc::now())
            .await?;
        info!(%guild_id, %user_id, idx = record.idx, "Unverify pardoned");
        Ok(record)
    }

    /// One reconciler pass. Records are processed one at a time in end-time
    /// order; a failing record never stops the ones behind it.
    pub async fn restore_due(&self, platform: &dyn Platform, now: DateTime<Utc>) -> usize {
        let span = |d: Duration| chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero());
        let before = now
            .checked_add_signed(span(self.timings.lookahead))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let checked_before = now
            .checked_sub_signed(span(self.timings.staleness))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let due = self.db.find_waiting_due(before, checked_before).await;
        if !due.is_empty() {
            debug!("Reverifying {} due records", due.len());
        }

        let count = due.len();
        for record in due {
            let idx = record.idx;
            if let Err(e) = self.restore(platform, record).await {
                error!(idx, "Failed to persist reverify outcome: {}", e);
            }
        }
        count
    }

    /// Waits for the record's end time if needed, then gives back everything
    /// the imposition took. Safe to run more than once.
    pub async fn restore(
        &self,
        platform: &dyn Platform,
        record: RestrictionRecord,
    ) -> Result<RestrictionStatus, DbError> {
        let guild_id = GuildId::new(record.guild_id);
        let user_id = UserId::new(record.user_id);

        let Some(guild) = platform.guild(guild_id).await else {
            if record.status != RestrictionStatus::GuildNotFound {
                warn!(%guild_id, idx = record.idx, "Reverify failed: guild was not found");
            } else {
                debug!(%guild_id, idx = record.idx, "Reverify failed: guild still was not found");
            }
            self.db
                .mark(record.idx, RestrictionStatus::GuildNotFound, Utc::now())
                .await?;
            return Ok(RestrictionStatus::GuildNotFound);
        };

        let member = match platform.member(guild_id, user_id).await {
            Ok(member) => member,
            Err(PlatformError::NotFound) => {
                if record.status != RestrictionStatus::MemberLeft {
                    warn!(%guild_id, %user_id, idx = record.idx, "Reverify failed: member was not found");
                }
                self.db
                    .mark(record.idx, RestrictionStatus::MemberLeft, Utc::now())
                    .await?;
                return Ok(RestrictionStatus::MemberLeft);
            }
            Err(e) => {
                warn!(%guild_id, %user_id, idx = record.idx, "Reverify postponed: {}", e);
                self.db.mark(record.idx, record.status, Utc::now()).await?;
                return Ok(record.status);
            }
        };

        if let Ok(remaining) = (record.end_time - Utc::now()).to_std() {
            tokio::time::sleep(remaining).await;
        }

        info!(%guild_id, %user_id, idx = record.idx, "Reverifying {}", member.name);

        self.return_roles(platform, guild_id, &member, &record).await;
        self.return_channels(platform, guild_id, user_id, &record).await;
        self.remove_temp_channels(platform, guild_id, user_id, &record)
            .await;
        self.drop_unverify_role(platform, guild_id, &member).await;

        let notice = format!("Your access to the guild **{}** was returned.", guild.name);
        if let Err(e) = platform.direct_message(user_id, &notice).await {
            info!(%guild_id, %user_id, "Couldn't send reverify info to {}: {}", member.name, e);
        }

        self.db
            .mark(record.idx, RestrictionStatus::Finished, Utc::now())
            .await?;
        info!(%guild_id, %user_id, idx = record.idx, "Reverify success");
        Ok(RestrictionStatus::Finished)
    }

    async fn return_roles(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        member: &MemberInfo,
        record: &RestrictionRecord,
    ) {
        for role_id in record.roles_to_return.iter().map(|&id| RoleId::new(id)) {
            if member.roles.contains(&role_id) {
                continue;
            }
            let Some(role) = platform.role(guild_id, role_id).await else {
                warn!(%guild_id, %role_id, "Role could not be found");
                continue;
            };
            if let Err(e) = platform
                .add_role(guild_id, member.user_id, role_id, "Reverify")
                .await
            {
                warn!(
                    %guild_id,
                    user_id = %member.user_id,
                    %role_id,
                    "Returning role {} to {} failed: {}",
                    role.name,
                    member.name,
                    e
                );
            }
        }
    }

    async fn return_channels(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        user_id: UserId,
        record: &RestrictionRecord,
    ) {
        let target = PermissionOverwriteType::Member(user_id);
        for channel_id in record.channels_to_return.iter().map(|&id| ChannelId::new(id)) {
            let Some(channel) = platform.channel(guild_id, channel_id).await else {
                warn!(%guild_id, %user_id, %channel_id, "Could not return channel: it doesn't exist");
                continue;
            };
            let overwrite = with_view(channel.member_overwrite(user_id), target, Some(true));
            if let Err(e) = platform.set_overwrite(guild_id, channel_id, overwrite).await {
                warn!(%guild_id, %user_id, %channel_id, "Could not return {}: {}", channel.name, e);
            }
        }
    }

    async fn remove_temp_channels(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        user_id: UserId,
        record: &RestrictionRecord,
    ) {
        let target = PermissionOverwriteType::Member(user_id);
        for channel_id in record.channels_to_remove.iter().map(|&id| ChannelId::new(id)) {
            let Some(channel) = platform.channel(guild_id, channel_id).await else {
                warn!(%guild_id, %user_id, %channel_id, "Could not remove temporary access: channel doesn't exist");
                continue;
            };
            let Some(existing) = channel.member_overwrite(user_id) else {
                continue;
            };

            let cleared = with_view(Some(existing), target, None);
            let result = if cleared.allow.is_empty() && cleared.deny.is_empty() {
                platform.delete_overwrite(guild_id, channel_id, target).await
            } else {
                platform.set_overwrite(guild_id, channel_id, cleared).await
            };
            if let Err(e) = result {
                warn!(%guild_id, %user_id, %channel_id, "Could not remove temporary access to {}: {}", channel.name, e);
            }
        }
    }

    async fn drop_unverify_role(&self, platform: &dyn Platform, guild_id: GuildId, member: &MemberInfo) {
        let Some(config) = self.db.guild_config(guild_id.get()).await else {
            return;
        };
        let role_id = RoleId::new(config.unverify_role_id);
        if platform.role(guild_id, role_id).await.is_none() {
            warn!(%guild_id, user_id = %member.user_id, %role_id, "Removing unverify role failed: role not found");
            return;
        }
        if !member.roles.contains(&role_id) {
            return;
        }
        if let Err(e) = platform
            .remove_role(guild_id, member.user_id, role_id, "Reverify")
            .await
        {
            warn!(%guild_id, user_id = %member.user_id, %role_id, "Removing unverify role from {} failed: {}", member.name, e);
        }
    }
}
