use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::database::{Database, DbError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceSettings {
    pub guild_id: u64,
    pub category_id: Option<u64>,
    pub high_res_bitrate: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockMark {
    pub guild_id: u64,
    pub channel_id: u64,
    pub locked: bool,
}

#[derive(Default, Serialize, Deserialize, Clone, Debug)]
pub struct VoiceDatabase {
    pub settings: HashMap<u64, VoiceSettings>,
    /// Keyed by channel id, one mark per channel.
    pub locked: HashMap<u64, LockMark>,
}

pub type VoiceHandler = Database<VoiceDatabase>;

impl VoiceHandler {
    pub async fn settings(&self, guild_id: u64) -> Option<VoiceSettings> {
        self.read(|db| db.settings.get(&guild_id).cloned()).await
    }

    /// Settings of guilds where pooling is switched on.
    pub async fn active_settings(&self) -> Vec<VoiceSettings> {
        self.read(|db| {
            db.settings
                .values()
                .filter(|s| s.category_id.is_some())
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn validate_settings(&self, guild_id: u64) -> bool {
        self.settings(guild_id)
            .await
            .is_some_and(|s| s.category_id.is_some())
    }

    pub async fn set_category(&self, guild_id: u64, category_id: u64) -> Result<VoiceSettings, DbError> {
        self.update_settings(guild_id, |s| s.category_id = Some(category_id))
            .await
    }

    pub async fn set_high_bitrate(&self, guild_id: u64, bitrate: u32) -> Result<VoiceSettings, DbError> {
        self.update_settings(guild_id, |s| s.high_res_bitrate = Some(bitrate))
            .await
    }

    async fn update_settings(
        &self,
        guild_id: u64,
        f: impl FnOnce(&mut VoiceSettings),
    ) -> Result<VoiceSettings, DbError> {
        self.transaction(|db| {
            let settings = db.settings.entry(guild_id).or_insert_with(|| VoiceSettings {
                guild_id,
                ..Default::default()
            });
            f(&mut *settings);
            Ok(settings.clone())
        })
        .await
    }

    pub async fn remove_settings(&self, guild_id: u64) -> Result<bool, DbError> {
        self.transaction(|db| Ok(db.settings.remove(&guild_id).is_some()))
            .await
    }

    pub async fn is_locked(&self, channel_id: u64) -> bool {
        self.read(|db| db.locked.get(&channel_id).is_some_and(|m| m.locked))
            .await
    }

    pub async fn set_lock(&self, guild_id: u64, channel_id: u64, locked: bool) -> Result<(), DbError> {
        self.transaction(|db| {
            db.locked.insert(
                channel_id,
                LockMark {
                    guild_id,
                    channel_id,
                    locked,
                },
            );
            Ok(())
        })
        .await
    }

    pub async fn remove_lock(&self, channel_id: u64) -> Result<bool, DbError> {
        self.transaction(|db| Ok(db.locked.remove(&channel_id).is_some()))
            .await
    }

    pub async fn locks(&self) -> Vec<LockMark> {
        self.read(|db| db.locked.values().cloned().collect()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn settings_need_a_category_to_be_valid() {
        let db = VoiceHandler::in_memory();

        db.set_high_bitrate(1, 128_000).await.unwrap();
        assert!(!db.validate_settings(1).await);
        assert!(db.active_settings().await.is_empty());

        let settings = db.set_category(1, 50).await.unwrap();
        assert_eq!(settings.high_res_bitrate, Some(128_000));
        assert!(db.validate_settings(1).await);

        assert!(db.remove_settings(1).await.unwrap());
        assert!(!db.validate_settings(1).await);
        assert!(!db.remove_settings(1).await.unwrap());
    }

    #[tokio::test]
    async fn one_lock_mark_per_channel() {
        let db = VoiceHandler::in_memory();

        db.set_lock(1, 10, true).await.unwrap();
        db.set_lock(1, 10, false).await.unwrap();
        assert_eq!(db.locks().await.len(), 1);
        assert!(!db.is_locked(10).await);

        db.set_lock(1, 10, true).await.unwrap();
        assert!(db.is_locked(10).await);
        assert!(db.remove_lock(10).await.unwrap());
        assert!(!db.is_locked(10).await);
    }
}
