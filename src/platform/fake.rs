//! In-memory platform for tests.

use super::{same_target, ChannelInfo, GuildInfo, MemberInfo, Platform, PlatformError, RoleInfo};
use async_trait::async_trait;
use poise::serenity_prelude::{
    ChannelId, ChannelType, GuildId, PermissionOverwrite, PermissionOverwriteType, Permissions,
    RoleId, UserId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct FakeChannel {
    pub name: String,
    pub kind: ChannelType,
    pub parent_id: Option<ChannelId>,
    pub connected: HashSet<UserId>,
    pub has_activity: bool,
    pub overwrites: Vec<PermissionOverwrite>,
    /// Visible to everyone without an overwrite.
    pub public: bool,
    /// Roles granting visibility when the channel is not public.
    pub visible_to: HashSet<RoleId>,
}

impl FakeChannel {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ChannelType::Text,
            parent_id: None,
            connected: HashSet::new(),
            has_activity: false,
            overwrites: Vec::new(),
            public: true,
            visible_to: HashSet::new(),
        }
    }

    pub fn category(name: &str) -> Self {
        Self {
            kind: ChannelType::Category,
            ..Self::text(name)
        }
    }

    pub fn voice(name: &str, parent: ChannelId) -> Self {
        Self {
            kind: ChannelType::Voice,
            parent_id: Some(parent),
            ..Self::text(name)
        }
    }

    pub fn hidden(mut self, roles: &[RoleId]) -> Self {
        self.public = false;
        self.visible_to = roles.iter().copied().collect();
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeGuild {
    pub name: String,
    pub bitrate_limit: u32,
    pub roles: HashMap<RoleId, String>,
    pub members: HashMap<UserId, HashSet<RoleId>>,
    pub channels: BTreeMap<ChannelId, FakeChannel>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub guilds: HashMap<GuildId, FakeGuild>,
    pub forbidden_roles: HashSet<RoleId>,
    pub forbidden_channels: HashSet<ChannelId>,
    /// Roles whose channel overwrites the bot may not edit.
    pub protected_roles: HashSet<RoleId>,
    /// Every `set_overwrite` attempt, refused ones included.
    pub overwrite_calls: Vec<(ChannelId, PermissionOverwriteType)>,
    pub dm_blocked: HashSet<UserId>,
    pub dms: Vec<(UserId, String)>,
    pub messages: Vec<(ChannelId, String)>,
    pub role_grants: Vec<(UserId, RoleId)>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn next_id(state: &mut FakeState) -> u64 {
        state.next_id += 1;
        10_000 + state.next_id
    }

    pub fn add_guild(&self, guild_id: GuildId, name: &str) {
        self.state().guilds.insert(
            guild_id,
            FakeGuild {
                name: name.to_string(),
                bitrate_limit: 384_000,
                ..Default::default()
            },
        );
    }

    pub fn create_role(&self, guild_id: GuildId, role_id: RoleId, name: &str) {
        self.guild_mut(guild_id, |g| {
            g.roles.insert(role_id, name.to_string());
        });
    }

    pub fn delete_role(&self, guild_id: GuildId, role_id: RoleId) {
        self.guild_mut(guild_id, |g| {
            g.roles.remove(&role_id);
            for roles in g.members.values_mut() {
                roles.remove(&role_id);
            }
        });
    }

    pub fn add_member(&self, guild_id: GuildId, user_id: UserId, roles: &[RoleId]) {
        self.guild_mut(guild_id, |g| {
            g.members.insert(user_id, roles.iter().copied().collect());
        });
    }

    pub fn add_channel(&self, guild_id: GuildId, channel_id: ChannelId, channel: FakeChannel) {
        self.guild_mut(guild_id, |g| {
            g.channels.insert(channel_id, channel);
        });
    }

    pub fn connect(&self, guild_id: GuildId, channel_id: ChannelId, user_id: UserId) {
        self.with_channel(guild_id, channel_id, |c| {
            c.connected.insert(user_id);
        });
    }

    pub fn disconnect(&self, guild_id: GuildId, channel_id: ChannelId, user_id: UserId) {
        self.with_channel(guild_id, channel_id, |c| {
            c.connected.remove(&user_id);
        });
    }

    pub fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> HashSet<RoleId> {
        self.state().guilds[&guild_id].members[&user_id].clone()
    }

    pub fn visible_channels(&self, guild_id: GuildId, user_id: UserId) -> HashSet<ChannelId> {
        let state = self.state();
        let guild = &state.guilds[&guild_id];
        guild
            .channels
            .iter()
            .filter(|(_, c)| c.kind != ChannelType::Category)
            .filter(|(_, c)| Self::view_allowed(guild, c, user_id))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn channel_overwrites(&self, guild_id: GuildId, channel_id: ChannelId) -> Vec<PermissionOverwrite> {
        self.state().guilds[&guild_id].channels[&channel_id]
            .overwrites
            .clone()
    }

    pub fn voice_channels_in(&self, guild_id: GuildId, category: ChannelId) -> Vec<(ChannelId, String)> {
        self.state().guilds[&guild_id]
            .channels
            .iter()
            .filter(|(_, c)| c.kind == ChannelType::Voice && c.parent_id == Some(category))
            .map(|(id, c)| (*id, c.name.clone()))
            .collect()
    }

    pub fn guild_mut(&self, guild_id: GuildId, f: impl FnOnce(&mut FakeGuild)) {
        if let Some(guild) = self.state().guilds.get_mut(&guild_id) {
            f(guild);
        }
    }

    pub fn with_channel(&self, guild_id: GuildId, channel_id: ChannelId, f: impl FnOnce(&mut FakeChannel)) {
        self.guild_mut(guild_id, |g| {
            if let Some(channel) = g.channels.get_mut(&channel_id) {
                f(channel);
            }
        });
    }

    fn view_allowed(guild: &FakeGuild, channel: &FakeChannel, user_id: UserId) -> bool {
        let Some(roles) = guild.members.get(&user_id) else {
            return false;
        };
        let member_overwrite = channel
            .overwrites
            .iter()
            .find(|o| matches!(o.kind, PermissionOverwriteType::Member(id) if id == user_id));
        if let Some(overwrite) = member_overwrite {
            if overwrite.deny.contains(Permissions::VIEW_CHANNEL) {
                return false;
            }
            if overwrite.allow.contains(Permissions::VIEW_CHANNEL) {
                return true;
            }
        }
        channel.public || roles.iter().any(|r| channel.visible_to.contains(r))
    }

    fn describe(id: ChannelId, channel: &FakeChannel) -> ChannelInfo {
        ChannelInfo {
            id,
            name: channel.name.clone(),
            kind: channel.kind,
            parent_id: channel.parent_id,
            connected: channel.connected.len(),
            has_activity: channel.has_activity,
            overwrites: channel.overwrites.clone(),
        }
    }

    fn channel_guard(
        state: &mut FakeState,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<&mut FakeChannel, PlatformError> {
        if state.forbidden_channels.contains(&channel_id) {
            return Err(PlatformError::Forbidden);
        }
        state
            .guilds
            .get_mut(&guild_id)
            .and_then(|g| g.channels.get_mut(&channel_id))
            .ok_or(PlatformError::NotFound)
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn guild(&self, guild_id: GuildId) -> Option<GuildInfo> {
        self.state().guilds.get(&guild_id).map(|g| GuildInfo {
            id: guild_id,
            name: g.name.clone(),
            bitrate_limit: g.bitrate_limit,
        })
    }

    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Result<MemberInfo, PlatformError> {
        let state = self.state();
        let roles = state
            .guilds
            .get(&guild_id)
            .and_then(|g| g.members.get(&user_id))
            .ok_or(PlatformError::NotFound)?;
        Ok(MemberInfo {
            user_id,
            name: format!("user-{}", user_id.get()),
            roles: roles.iter().copied().collect(),
        })
    }

    async fn role(&self, guild_id: GuildId, role_id: RoleId) -> Option<RoleInfo> {
        let state = self.state();
        let name = state.guilds.get(&guild_id)?.roles.get(&role_id)?;
        Some(RoleInfo {
            id: role_id,
            name: name.clone(),
        })
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        if state.forbidden_roles.contains(&role_id) {
            return Err(PlatformError::Forbidden);
        }
        let guild = state.guilds.get_mut(&guild_id).ok_or(PlatformError::NotFound)?;
        if !guild.roles.contains_key(&role_id) {
            return Err(PlatformError::NotFound);
        }
        let roles = guild.members.get_mut(&user_id).ok_or(PlatformError::NotFound)?;
        if roles.insert(role_id) {
            state.role_grants.push((user_id, role_id));
        }
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        if state.forbidden_roles.contains(&role_id) {
            return Err(PlatformError::Forbidden);
        }
        let guild = state.guilds.get_mut(&guild_id).ok_or(PlatformError::NotFound)?;
        if !guild.roles.contains_key(&role_id) {
            return Err(PlatformError::NotFound);
        }
        guild
            .members
            .get_mut(&user_id)
            .ok_or(PlatformError::NotFound)?
            .remove(&role_id);
        Ok(())
    }

    async fn channels(&self, guild_id: GuildId) -> Vec<ChannelInfo> {
        self.state()
            .guilds
            .get(&guild_id)
            .map(|g| g.channels.iter().map(|(id, c)| Self::describe(*id, c)).collect())
            .unwrap_or_default()
    }

    async fn channel(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<ChannelInfo> {
        let state = self.state();
        let channel = state.guilds.get(&guild_id)?.channels.get(&channel_id)?;
        Some(Self::describe(channel_id, channel))
    }

    async fn can_view(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<bool, PlatformError> {
        let state = self.state();
        let guild = state.guilds.get(&guild_id).ok_or(PlatformError::NotFound)?;
        let channel = guild.channels.get(&channel_id).ok_or(PlatformError::NotFound)?;
        Ok(Self::view_allowed(guild, channel, user_id))
    }

    async fn set_overwrite(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        overwrite: PermissionOverwrite,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.overwrite_calls.push((channel_id, overwrite.kind));
        if let PermissionOverwriteType::Role(role_id) = overwrite.kind {
            if state.protected_roles.contains(&role_id) {
                return Err(PlatformError::Forbidden);
            }
        }
        let channel = Self::channel_guard(&mut state, guild_id, channel_id)?;
        channel
            .overwrites
            .retain(|o| !same_target(&o.kind, &overwrite.kind));
        channel.overwrites.push(overwrite);
        Ok(())
    }

    async fn delete_overwrite(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        kind: PermissionOverwriteType,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        let channel = Self::channel_guard(&mut state, guild_id, channel_id)?;
        channel.overwrites.retain(|o| !same_target(&o.kind, &kind));
        Ok(())
    }

    async fn create_voice_channel(
        &self,
        guild_id: GuildId,
        category_id: ChannelId,
        name: &str,
        _bitrate: Option<u32>,
    ) -> Result<ChannelId, PlatformError> {
        let mut state = self.state();
        let id = ChannelId::new(Self::next_id(&mut state));
        let guild = state.guilds.get_mut(&guild_id).ok_or(PlatformError::NotFound)?;
        guild.channels.insert(id, FakeChannel::voice(name, category_id));
        Ok(id)
    }

    async fn delete_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        Self::channel_guard(&mut state, guild_id, channel_id)?;
        if let Some(guild) = state.guilds.get_mut(&guild_id) {
            guild.channels.remove(&channel_id);
        }
        Ok(())
    }

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> Result<(), PlatformError> {
        let mut state = self.state();
        for guild in state.guilds.values_mut() {
            if let Some(channel) = guild.channels.get_mut(&channel_id) {
                channel.has_activity = true;
            }
        }
        state.messages.push((channel_id, content.to_string()));
        Ok(())
    }

    async fn direct_message(&self, user_id: UserId, content: &str) -> Result<(), PlatformError> {
        let mut state = self.state();
        if state.dm_blocked.contains(&user_id) {
            return Err(PlatformError::Forbidden);
        }
        state.dms.push((user_id, content.to_string()));
        Ok(())
    }
}
