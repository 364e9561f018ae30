use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use super::error::UnverifyError;
use crate::database::{Database, DbError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RestrictionStatus {
    Waiting,
    Finished,
    MemberLeft,
    GuildNotFound,
}

impl fmt::Display for RestrictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Finished => write!(f, "finished"),
            Self::MemberLeft => write!(f, "member left server"),
            Self::GuildNotFound => write!(f, "guild could not be found"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RestrictionKind {
    SelfUnverify,
    Unverify,
}

impl fmt::Display for RestrictionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfUnverify => write!(f, "Selfunverify"),
            Self::Unverify => write!(f, "Unverify"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictionRecord {
    pub idx: u64,
    pub guild_id: u64,
    pub user_id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    pub roles_to_return: Vec<u64>,
    pub channels_to_return: Vec<u64>,
    pub channels_to_remove: Vec<u64>,
    pub reason: Option<String>,
    pub status: RestrictionStatus,
    pub kind: RestrictionKind,
}

/// Everything a restriction needs before it gets an index.
#[derive(Debug, Clone)]
pub struct NewRestriction {
    pub guild_id: u64,
    pub user_id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub roles_to_return: Vec<u64>,
    pub channels_to_return: Vec<u64>,
    pub channels_to_remove: Vec<u64>,
    pub reason: Option<String>,
    pub kind: RestrictionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildUnverifyConfig {
    pub guild_id: u64,
    pub unverify_role_id: u64,
}

#[derive(Default, Serialize, Deserialize, Clone, Debug)]
pub struct UnverifyDatabase {
    pub next_idx: u64,
    pub items: BTreeMap<u64, RestrictionRecord>,
    pub configs: HashMap<u64, GuildUnverifyConfig>,
}

impl UnverifyDatabase {
    fn waiting_for(&self, guild_id: u64, user_id: u64) -> Option<&RestrictionRecord> {
        self.items.values().find(|r| {
            r.guild_id == guild_id && r.user_id == user_id && r.status == RestrictionStatus::Waiting
        })
    }
}

pub type UnverifyHandler = Database<UnverifyDatabase>;

impl UnverifyHandler {
    /// Waiting records ending before `before` that were not looked at since
    /// `checked_before`, soonest first.
    pub async fn find_waiting_due(
        &self,
        before: DateTime<Utc>,
        checked_before: DateTime<Utc>,
    ) -> Vec<RestrictionRecord> {
        let mut due: Vec<_> = self
            .read(|db| {
                db.items
                    .values()
                    .filter(|r| r.status == RestrictionStatus::Waiting && r.end_time < before)
                    .filter(|r| r.last_checked.map_or(true, |t| t < checked_before))
                    .cloned()
                    .collect()
            })
            .await;
        due.sort_by_key(|r| (r.end_time, r.idx));
        due
    }

    pub async fn waiting_for_member(&self, guild_id: u64, user_id: u64) -> Option<RestrictionRecord> {
        self.read(|db| db.waiting_for(guild_id, user_id).cloned()).await
    }

    pub async fn insert(&self, new: NewRestriction) -> Result<RestrictionRecord, UnverifyError> {
        self.transaction(|db| {
            if new.end_time < new.start_time {
                return Err(UnverifyError::EndTimePassed);
            }
            if db.waiting_for(new.guild_id, new.user_id).is_some() {
                return Err(UnverifyError::AlreadyUnverified);
            }

            db.next_idx += 1;
            let record = RestrictionRecord {
                idx: db.next_idx,
                guild_id: new.guild_id,
                user_id: new.user_id,
                start_time: new.start_time,
                end_time: new.end_time,
                last_checked: None,
                roles_to_return: new.roles_to_return,
                channels_to_return: new.channels_to_return,
                channels_to_remove: new.channels_to_remove,
                reason: new.reason,
                status: RestrictionStatus::Waiting,
                kind: new.kind,
            };
            db.items.insert(record.idx, record.clone());
            Ok(record)
        })
        .await
    }

    /// Records the outcome of one reconciler visit.
    pub async fn mark(
        &self,
        idx: u64,
        status: RestrictionStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.transaction(|db| {
            if let Some(record) = db.items.get_mut(&idx) {
                record.status = status;
                record.last_checked = Some(checked_at);
            }
            Ok(())
        })
        .await
    }

    /// Moves the end of the member's waiting restriction to `now` and makes it
    /// eligible for the very next reconciler tick.
    pub async fn pardon(
        &self,
        guild_id: u64,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<RestrictionRecord, UnverifyError> {
        self.transaction(|db| {
            let idx = db
                .waiting_for(guild_id, user_id)
                .map(|r| r.idx)
                .ok_or(UnverifyError::NotUnverified)?;
            let record = db.items.get_mut(&idx).ok_or(UnverifyError::NotUnverified)?;
            record.end_time = now;
            record.last_checked = None;
            Ok(record.clone())
        })
        .await
    }

    pub async fn list(
        &self,
        guild_id: u64,
        status: Option<RestrictionStatus>,
    ) -> Vec<RestrictionRecord> {
        self.read(|db| {
            db.items
                .values()
                .filter(|r| r.guild_id == guild_id)
                .filter(|r| status.map_or(true, |s| r.status == s))
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn get(&self, idx: u64) -> Option<RestrictionRecord> {
        self.read(|db| db.items.get(&idx).cloned()).await
    }

    /// DANGER: forgets the record without restoring anything.
    pub async fn remove(&self, idx: u64) -> Result<Option<RestrictionRecord>, DbError> {
        self.transaction(|db| Ok(db.items.remove(&idx))).await
    }

    pub async fn guild_config(&self, guild_id: u64) -> Option<GuildUnverifyConfig> {
        self.read(|db| db.configs.get(&guild_id).cloned()).await
    }

    pub async fn set_guild_config(
        &self,
        guild_id: u64,
        unverify_role_id: u64,
    ) -> Result<GuildUnverifyConfig, DbError> {
        self.transaction(|db| {
            let config = GuildUnverifyConfig {
                guild_id,
                unverify_role_id,
            };
            db.configs.insert(guild_id, config.clone());
            Ok(config)
        })
        .await
    }
}
